use mongodb::bson::{Bson, Document};
use serde::Serialize;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExplainVerbosity {
    QueryPlanner,
    ExecutionStats,
    AllPlansExecution,
}

impl ExplainVerbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueryPlanner => "queryPlanner",
            Self::ExecutionStats => "executionStats",
            Self::AllPlansExecution => "allPlansExecution",
        }
    }

    /// Picks the richest verbosity the server understands, from `buildInfo`.
    /// Servers before 3.0 only accept the bare planner output.
    pub fn negotiate(build_info: &Document) -> Self {
        match server_major_version(build_info) {
            Some(major) if major >= 3 => Self::ExecutionStats,
            _ => Self::QueryPlanner,
        }
    }
}

fn server_major_version(build_info: &Document) -> Option<i64> {
    if let Ok(parts) = build_info.get_array("versionArray") {
        return parts.first().and_then(bson_as_i64);
    }
    build_info
        .get_str("version")
        .ok()
        .and_then(|v| v.split('.').next())
        .and_then(|major| major.parse().ok())
}

fn bson_as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) => Some(*v as i64),
        _ => None,
    }
}

/// The parts of an explain plan worth showing to a user.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ExplainSummary {
    pub stage: String,
    pub input_stage: Option<String>,
    pub index_name: Option<String>,
    pub n_returned: Option<i64>,
    pub total_docs_examined: Option<i64>,
    pub execution_time_millis: Option<i64>,
}

impl ExplainSummary {
    pub fn from_document(explain: &Document) -> Self {
        let plan = explain
            .get_document("queryPlanner")
            .and_then(|planner| planner.get_document("winningPlan"))
            .ok();

        let stage = plan
            .and_then(|p| p.get_str("stage").ok())
            .unwrap_or("UNKNOWN")
            .to_string();
        let input = plan.and_then(|p| p.get_document("inputStage").ok());
        let input_stage = input.and_then(|i| i.get_str("stage").ok()).map(str::to_string);
        let index_name = plan.and_then(find_index_scan);

        let stats = explain.get_document("executionStats").ok();
        let stat = |key: &str| stats.and_then(|s| s.get(key)).and_then(bson_as_i64);

        Self {
            stage,
            input_stage,
            index_name,
            n_returned: stat("nReturned"),
            total_docs_examined: stat("totalDocsExamined"),
            execution_time_millis: stat("executionTimeMillis"),
        }
    }

    pub fn used_index(&self) -> bool {
        self.index_name.is_some() || self.stage == "IXSCAN"
    }
}

/// Index name of the first IXSCAN down the `inputStage` chain.
fn find_index_scan(stage: &Document) -> Option<String> {
    if stage.get_str("stage").ok() == Some("IXSCAN") {
        return stage.get_str("indexName").ok().map(str::to_string);
    }
    stage.get_document("inputStage").ok().and_then(find_index_scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn negotiates_from_version_array() {
        let modern = doc! { "version": "7.0.2", "versionArray": [7, 0, 2, 0] };
        assert_eq!(ExplainVerbosity::negotiate(&modern), ExplainVerbosity::ExecutionStats);

        let legacy = doc! { "version": "2.6.12" };
        assert_eq!(ExplainVerbosity::negotiate(&legacy), ExplainVerbosity::QueryPlanner);

        assert_eq!(ExplainVerbosity::negotiate(&doc! {}), ExplainVerbosity::QueryPlanner);
    }

    #[test]
    fn summary_detects_index_scan() {
        let explain = doc! {
            "queryPlanner": {
                "winningPlan": {
                    "stage": "FETCH",
                    "inputStage": { "stage": "IXSCAN", "indexName": "age_1" },
                },
            },
            "executionStats": {
                "nReturned": 12,
                "totalDocsExamined": 12,
                "executionTimeMillis": 3,
            },
        };
        let summary = ExplainSummary::from_document(&explain);
        assert_eq!(summary.stage, "FETCH");
        assert_eq!(summary.index_name.as_deref(), Some("age_1"));
        assert!(summary.used_index());
        assert_eq!(summary.n_returned, Some(12));
        assert_eq!(summary.execution_time_millis, Some(3));
    }

    #[test]
    fn summary_of_collection_scan_has_no_stats() {
        let explain = doc! {
            "queryPlanner": { "winningPlan": { "stage": "COLLSCAN" } },
        };
        let summary = ExplainSummary::from_document(&explain);
        assert_eq!(summary.stage, "COLLSCAN");
        assert!(!summary.used_index());
        assert_eq!(summary.n_returned, None);
    }
}
