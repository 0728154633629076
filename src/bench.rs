//! Benchmark runner: seed the test collection, run one canned read, time it,
//! record the result.

use crate::collection::{seed_document, Connector, DocumentCollection, ReadConfig};
use crate::error::{Error, Result};
use crate::estimator::{BatchEstimate, BatchSizeEstimator};
use crate::explain::ExplainSummary;
use crate::lifecycle::drain_with_explicit_close;
use crate::store::ResultStore;
use crate::types::{CursorStrategy, ExperimentResult, NewExperimentResult};
use std::sync::Arc;
use std::time::Instant;

pub const DEFAULT_CURSOR_TYPE: &str = "default";
pub const DEFAULT_DOC_COUNT: u64 = 1000;

/// Documents per `insert_many` while seeding.
pub const SEED_CHUNK: u64 = 10_000;

/// Parses the `doc_count` query value. Missing means the default.
pub fn parse_doc_count(raw: Option<&str>) -> Result<u64> {
    match raw {
        None => Ok(DEFAULT_DOC_COUNT),
        Some(v) => v
            .trim()
            .parse::<u64>()
            .map_err(|_| Error::InvalidDocCount(v.to_string())),
    }
}

#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub result: ExperimentResult,
    /// `None` when the strategy name was not recognized and nothing was read.
    pub documents_read: Option<u64>,
    pub seeded: u64,
}

#[derive(Clone)]
pub struct BenchRunner {
    connector: Arc<dyn Connector>,
    results: Arc<dyn ResultStore>,
    estimator: BatchSizeEstimator,
    strict: bool,
}

impl BenchRunner {
    pub fn new(connector: Arc<dyn Connector>, results: Arc<dyn ResultStore>) -> Self {
        Self {
            connector,
            results,
            estimator: BatchSizeEstimator::default(),
            strict: false,
        }
    }

    pub fn with_estimator(mut self, estimator: BatchSizeEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// Reject unknown strategy names instead of recording a no-op run.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn results(&self) -> &Arc<dyn ResultStore> {
        &self.results
    }

    /// Runs `f` against the result store on the blocking pool; SQLite calls
    /// must not stall the async workers.
    async fn with_results<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ResultStore) -> Result<T> + Send + 'static,
    {
        let results = self.results.clone();
        tokio::task::spawn_blocking(move || f(results.as_ref())).await?
    }

    /// Every recorded run, newest first.
    pub async fn recent_results(&self) -> Result<Vec<ExperimentResult>> {
        self.with_results(|results| results.list_recent()).await
    }

    pub async fn run(&self, cursor_type: &str, doc_count: u64) -> Result<RunOutcome> {
        let strategy = CursorStrategy::parse(cursor_type);
        if strategy.is_none() && self.strict {
            return Err(Error::UnknownStrategy(cursor_type.to_string()));
        }

        let collection = self.connector.connect().await?;
        let seeded = seed(collection.as_ref(), doc_count).await?;

        let started = Instant::now();
        let documents_read = match strategy {
            Some(strategy) => Some(read_with(collection.as_ref(), strategy, doc_count).await?),
            None => None,
        };
        let execution_time = started.elapsed().as_secs_f64();

        if strategy.is_none() {
            tracing::warn!(event = "unknown_strategy", cursor_type, "no read performed");
        }

        let new = NewExperimentResult::for_run(cursor_type, doc_count, execution_time);
        let result = self.with_results(move |results| results.insert(new)).await?;

        tracing::info!(
            event = "experiment_run",
            id = result.id,
            cursor_type,
            doc_count,
            seeded,
            documents_read,
            execution_time
        );

        Ok(RunOutcome {
            result,
            documents_read,
            seeded,
        })
    }

    pub async fn explain(&self, cursor_type: &str, doc_count: u64) -> Result<ExplainSummary> {
        let strategy = CursorStrategy::parse(cursor_type)
            .ok_or_else(|| Error::UnknownStrategy(cursor_type.to_string()))?;
        let collection = self.connector.connect().await?;
        let raw = collection
            .explain(ReadConfig::for_strategy(strategy, doc_count))
            .await?;
        Ok(ExplainSummary::from_document(&raw))
    }

    pub async fn estimate(&self) -> Result<BatchEstimate> {
        let collection = self.connector.connect().await?;
        self.estimator.estimate_for(collection.as_ref()).await
    }
}

/// Tops the collection up to `target` documents, indexes continuing from the
/// current count. Never removes anything. Returns how many were inserted.
pub async fn seed(collection: &dyn DocumentCollection, target: u64) -> Result<u64> {
    seed_in_chunks(collection, target, SEED_CHUNK).await
}

/// [`seed`] with at most `chunk` documents held in memory per insert.
pub async fn seed_in_chunks(
    collection: &dyn DocumentCollection,
    target: u64,
    chunk: u64,
) -> Result<u64> {
    let existing = collection.count().await?;
    if existing >= target {
        return Ok(0);
    }

    let chunk = chunk.max(1);
    let mut inserted = 0;
    let mut next = existing;
    while next < target {
        let end = next.saturating_add(chunk).min(target);
        let docs = (next..end).map(seed_document).collect();
        inserted += collection.insert_many(docs).await?;
        next = end;
    }
    tracing::debug!(event = "collection_seeded", existing, inserted);
    Ok(inserted)
}

/// Runs the read for `strategy` to completion and returns the document count.
pub async fn read_with(
    collection: &dyn DocumentCollection,
    strategy: CursorStrategy,
    doc_count: u64,
) -> Result<u64> {
    let cursor = collection
        .find(ReadConfig::for_strategy(strategy, doc_count))
        .await?;
    let docs = drain_with_explicit_close(cursor).await?;
    Ok(docs.len() as u64)
}
