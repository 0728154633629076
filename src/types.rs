use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Query pattern recorded for every benchmark run.
pub const QUERY_PATTERN: &str = "find()";

/// One persisted benchmark run. Rows are append-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub id: i64,
    pub experiment_name: String,
    pub cursor_type: String,
    pub query_pattern: String,
    pub document_count: u64,
    pub execution_time: f64, // seconds
    pub memory_usage: f64,   // bytes, currently unmeasured
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for ExperimentResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.experiment_name, self.cursor_type)
    }
}

/// Result fields supplied by the caller; id and timestamp come from the store.
#[derive(Clone, Debug, PartialEq)]
pub struct NewExperimentResult {
    pub experiment_name: String,
    pub cursor_type: String,
    pub query_pattern: String,
    pub document_count: u64,
    pub execution_time: f64,
    pub memory_usage: f64,
}

impl NewExperimentResult {
    pub fn for_run(cursor_type: &str, document_count: u64, execution_time: f64) -> Self {
        Self {
            experiment_name: format!("Cursor Test - {} documents", document_count),
            cursor_type: cursor_type.to_string(),
            query_pattern: QUERY_PATTERN.to_string(),
            document_count,
            execution_time,
            memory_usage: 0.0,
        }
    }
}

/// The four canned read strategies.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorStrategy {
    NoCursor,
    BatchSize,
    Limit,
    Skip,
}

impl CursorStrategy {
    pub const ALL: [CursorStrategy; 4] = [
        CursorStrategy::NoCursor,
        CursorStrategy::BatchSize,
        CursorStrategy::Limit,
        CursorStrategy::Skip,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "no_cursor" => Some(Self::NoCursor),
            "batch_size" => Some(Self::BatchSize),
            "limit" => Some(Self::Limit),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoCursor => "no_cursor",
            Self::BatchSize => "batch_size",
            Self::Limit => "limit",
            Self::Skip => "skip",
        }
    }
}

impl fmt::Display for CursorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_name_and_strategy() {
        let result = ExperimentResult {
            id: 1,
            experiment_name: "Test Experiment".into(),
            cursor_type: "no_cursor".into(),
            query_pattern: QUERY_PATTERN.into(),
            document_count: 100,
            execution_time: 1.5,
            memory_usage: 0.0,
            timestamp: Utc::now(),
        };
        assert_eq!(result.to_string(), "Test Experiment - no_cursor");
    }

    #[test]
    fn new_result_labels_run() {
        let new = NewExperimentResult::for_run("skip", 250, 0.25);
        assert_eq!(new.experiment_name, "Cursor Test - 250 documents");
        assert_eq!(new.query_pattern, "find()");
        assert_eq!(new.memory_usage, 0.0);
    }

    #[test]
    fn strategy_names_round_trip() {
        for strategy in CursorStrategy::ALL {
            assert_eq!(CursorStrategy::parse(strategy.as_str()), Some(strategy));
        }
        assert_eq!(CursorStrategy::parse("default"), None);
        assert_eq!(CursorStrategy::parse("LIMIT"), None);
    }
}
