//! Document store port.
//!
//! The benchmark runner, the batch-size estimator and the lifecycle demos only
//! talk to a [`DocumentCollection`]. [`crate::mongo`] implements it over the
//! MongoDB driver and [`crate::memory`] keeps everything in process.

use crate::error::Result;
use crate::types::CursorStrategy;
use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use std::sync::Arc;

/// Server-side batch size used by the `batch_size` strategy.
pub const STRATEGY_BATCH_SIZE: u32 = 100;

/// Results skipped by the `skip` strategy.
pub const STRATEGY_SKIP: u64 = 10;

/// Options for a single `find()`. A limit of 0 means "no limit", as on the
/// server.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadConfig {
    pub filter: Option<Document>,
    pub limit: Option<i64>,
    pub skip: Option<u64>,
    pub batch_size: Option<u32>,
    /// Tailable, await-data cursor. Only meaningful on capped collections.
    pub tailable: bool,
}

impl ReadConfig {
    pub fn for_strategy(strategy: CursorStrategy, doc_count: u64) -> Self {
        let limit = i64::try_from(doc_count).unwrap_or(i64::MAX);
        match strategy {
            CursorStrategy::NoCursor | CursorStrategy::Limit => Self {
                limit: Some(limit),
                ..Self::default()
            },
            CursorStrategy::BatchSize => Self {
                batch_size: Some(STRATEGY_BATCH_SIZE),
                ..Self::default()
            },
            CursorStrategy::Skip => Self {
                limit: Some(limit),
                skip: Some(STRATEGY_SKIP),
                ..Self::default()
            },
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn tailing(mut self) -> Self {
        self.tailable = true;
        self
    }

    /// `find` command body used for explain.
    pub fn to_find_command(&self, collection: &str) -> Document {
        let filter = self.filter.clone().unwrap_or_default();
        let mut command = doc! { "find": collection, "filter": filter };
        if let Some(limit) = self.limit {
            command.insert("limit", limit);
        }
        if let Some(skip) = self.skip {
            command.insert("skip", i64::try_from(skip).unwrap_or(i64::MAX));
        }
        if let Some(batch_size) = self.batch_size {
            command.insert("batchSize", i64::from(batch_size));
        }
        if self.tailable {
            command.insert("tailable", true);
            command.insert("awaitData", true);
        }
        command
    }
}

/// Server-side result handle. Must be closed; dropping also releases it.
#[async_trait]
pub trait DocumentCursor: Send {
    /// Next document, fetching another batch from the server when the local
    /// one is exhausted.
    async fn next(&mut self) -> Result<Option<Document>>;

    async fn close(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait DocumentCollection: Send + Sync {
    async fn count(&self) -> Result<u64>;

    /// Returns the number of inserted documents.
    async fn insert_many(&self, docs: Vec<Document>) -> Result<u64>;

    async fn find(&self, config: ReadConfig) -> Result<Box<dyn DocumentCursor>>;

    /// Raw explain output for the read `config` describes.
    async fn explain(&self, config: ReadConfig) -> Result<Document>;

    /// Ascending single-field index; returns the index name (`{field}_1`).
    async fn create_index(&self, field: &str) -> Result<String>;

    /// Up to `n` documents from the front of the collection.
    async fn sample(&self, n: usize) -> Result<Vec<Document>> {
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let cursor = self.find(ReadConfig::default().with_limit(limit)).await?;
        crate::lifecycle::drain_with_explicit_close(cursor).await
    }
}

/// Opens a collection handle. Each benchmark run connects anew.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn DocumentCollection>>;
}

/// Placeholder document written when seeding the benchmark collection.
pub fn seed_document(index: u64) -> Document {
    doc! {
        "index": i64::try_from(index).unwrap_or(i64::MAX),
        "data": format!("test_data_{}", index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategies_map_to_read_configs() {
        let no_cursor = ReadConfig::for_strategy(CursorStrategy::NoCursor, 50);
        assert_eq!(no_cursor.limit, Some(50));
        assert_eq!(no_cursor.batch_size, None);

        let batch = ReadConfig::for_strategy(CursorStrategy::BatchSize, 50);
        assert_eq!(batch.limit, None);
        assert_eq!(batch.batch_size, Some(100));

        let skip = ReadConfig::for_strategy(CursorStrategy::Skip, 50);
        assert_eq!(skip.skip, Some(10));
        assert_eq!(skip.limit, Some(50));
    }

    #[test]
    fn find_command_carries_options() {
        let command = ReadConfig::for_strategy(CursorStrategy::Skip, 7).to_find_command("test_data");
        assert_eq!(command.get_str("find").ok(), Some("test_data"));
        assert_eq!(command.get_i64("limit").ok(), Some(7));
        assert_eq!(command.get_i64("skip").ok(), Some(10));
        assert!(command.get("batchSize").is_none());
        assert_eq!(command.get_document("filter").ok(), Some(&doc! {}));
    }

    #[test]
    fn find_command_carries_filter_and_tailing() {
        let config = ReadConfig::default()
            .with_filter(doc! { "age": { "$gt": 30 } })
            .tailing();
        let command = config.to_find_command("users");
        assert_eq!(
            command.get_document("filter").ok(),
            Some(&doc! { "age": { "$gt": 30 } })
        );
        assert_eq!(command.get_bool("tailable").ok(), Some(true));
        assert_eq!(command.get_bool("awaitData").ok(), Some(true));
    }

    #[test]
    fn seed_documents_are_indexed() {
        let doc = seed_document(3);
        assert_eq!(doc.get_i64("index").ok(), Some(3));
        assert_eq!(doc.get_str("data").ok(), Some("test_data_3"));
    }
}
