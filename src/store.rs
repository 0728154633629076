use crate::error::Result;
use crate::types::{ExperimentResult, NewExperimentResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;

const DDL: &str = "
CREATE TABLE IF NOT EXISTS experiment_results (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    experiment_name TEXT    NOT NULL,
    cursor_type     TEXT    NOT NULL,
    query_pattern   TEXT    NOT NULL,
    document_count  INTEGER NOT NULL CHECK (document_count >= 0),
    execution_time  REAL    NOT NULL,
    memory_usage    REAL    NOT NULL,
    timestamp_us    INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_experiment_results_timestamp
    ON experiment_results(timestamp_us);

CREATE TRIGGER IF NOT EXISTS experiment_results_append_only
    BEFORE UPDATE ON experiment_results
BEGIN
    SELECT RAISE(ABORT, 'experiment results are append-only');
END;
";

/// Persistence port for benchmark results.
pub trait ResultStore: Send + Sync {
    /// Stores a new row, assigning its id and timestamp.
    fn insert(&self, new: NewExperimentResult) -> Result<ExperimentResult>;

    /// All rows, newest first.
    fn list_recent(&self) -> Result<Vec<ExperimentResult>>;

    fn count(&self) -> Result<u64>;
}

#[derive(Clone)]
pub struct SqliteResultStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteResultStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(DDL)?;
        Ok(())
    }
}

fn row_to_result(row: &Row<'_>) -> rusqlite::Result<ExperimentResult> {
    let micros: i64 = row.get(7)?;
    let timestamp = DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or_default();
    let document_count: i64 = row.get(4)?;
    Ok(ExperimentResult {
        id: row.get(0)?,
        experiment_name: row.get(1)?,
        cursor_type: row.get(2)?,
        query_pattern: row.get(3)?,
        document_count: document_count.max(0) as u64,
        execution_time: row.get(5)?,
        memory_usage: row.get(6)?,
        timestamp,
    })
}

impl ResultStore for SqliteResultStore {
    fn insert(&self, new: NewExperimentResult) -> Result<ExperimentResult> {
        let conn = self.conn.lock();

        // Timestamps must strictly increase with insertion order.
        let last: Option<i64> = conn
            .query_row(
                "SELECT MAX(timestamp_us) FROM experiment_results",
                [],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let now = Utc::now().timestamp_micros();
        let micros = match last {
            Some(last) if last >= now => last + 1,
            _ => now,
        };

        conn.execute(
            "INSERT INTO experiment_results
                (experiment_name, cursor_type, query_pattern, document_count,
                 execution_time, memory_usage, timestamp_us)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new.experiment_name,
                new.cursor_type,
                new.query_pattern,
                i64::try_from(new.document_count).unwrap_or(i64::MAX),
                new.execution_time,
                new.memory_usage,
                micros,
            ],
        )?;
        let id = conn.last_insert_rowid();

        Ok(ExperimentResult {
            id,
            experiment_name: new.experiment_name,
            cursor_type: new.cursor_type,
            query_pattern: new.query_pattern,
            document_count: new.document_count,
            execution_time: new.execution_time,
            memory_usage: new.memory_usage,
            timestamp: DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or_default(),
        })
    }

    fn list_recent(&self) -> Result<Vec<ExperimentResult>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, experiment_name, cursor_type, query_pattern, document_count,
                    execution_time, memory_usage, timestamp_us
             FROM experiment_results
             ORDER BY timestamp_us DESC, id DESC",
        )?;
        let rows = stmt.query_map([], row_to_result)?;

        let mut results = Vec::new();
        for r in rows {
            results.push(r?);
        }
        Ok(results)
    }

    fn count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM experiment_results", [], |row| {
            row.get(0)
        })?;
        Ok(n.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> SqliteResultStore {
        let store = SqliteResultStore::memory().unwrap();
        store.init_schema().unwrap();
        store
    }

    #[test]
    fn insert_assigns_id_and_timestamp() {
        let store = store();
        let saved = store
            .insert(NewExperimentResult::for_run("no_cursor", 100, 1.5))
            .unwrap();
        assert!(saved.id > 0);
        assert_eq!(saved.document_count, 100);
        assert_eq!(saved.cursor_type, "no_cursor");
        assert_eq!(saved.to_string(), "Cursor Test - 100 documents - no_cursor");
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn list_is_newest_first_with_strict_timestamps() {
        let store = store();
        for (i, strategy) in ["no_cursor", "batch_size", "limit", "skip"].iter().enumerate() {
            store
                .insert(NewExperimentResult::for_run(strategy, i as u64, 0.0))
                .unwrap();
        }

        let listed = store.list_recent().unwrap();
        let names: Vec<&str> = listed.iter().map(|r| r.cursor_type.as_str()).collect();
        assert_eq!(names, vec!["skip", "limit", "batch_size", "no_cursor"]);
        for pair in listed.windows(2) {
            assert!(pair[0].timestamp > pair[1].timestamp);
        }
    }

    #[test]
    fn rows_cannot_be_updated() {
        let store = store();
        store
            .insert(NewExperimentResult::for_run("limit", 10, 0.1))
            .unwrap();
        let conn = store.conn.lock();
        let updated = conn.execute("UPDATE experiment_results SET cursor_type = 'skip'", []);
        assert!(updated.is_err());
    }

    #[test]
    fn survives_reopen() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("results.sqlite3");
        {
            let store = SqliteResultStore::open(&path)?;
            store.init_schema()?;
            store.insert(NewExperimentResult::for_run("skip", 20, 0.2))?;
        }

        let store = SqliteResultStore::open(&path)?;
        store.init_schema()?;
        let listed = store.list_recent()?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].cursor_type, "skip");
        assert_eq!(listed[0].document_count, 20);
        Ok(())
    }
}
