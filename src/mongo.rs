//! MongoDB implementation of the document store port.

use crate::collection::{Connector, DocumentCollection, DocumentCursor, ReadConfig};
use crate::error::{Error, Result};
use crate::explain::ExplainVerbosity;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::options::{CreateCollectionOptions, CursorType, FindOptions};
use mongodb::{Client, Collection, Cursor, Database, IndexModel};
use std::sync::Arc;
use tokio::sync::OnceCell;

pub struct MongoCollection {
    db: Database,
    collection: Collection<Document>,
    verbosity: ExplainVerbosity,
}

impl MongoCollection {
    pub fn name(&self) -> &str {
        self.collection.name()
    }
}

fn find_options(config: &ReadConfig) -> FindOptions {
    let mut options = FindOptions::default();
    options.limit = config.limit;
    options.skip = config.skip;
    options.batch_size = config.batch_size;
    if config.tailable {
        options.cursor_type = Some(CursorType::TailableAwait);
        options.no_cursor_timeout = Some(true);
    }
    options
}

#[async_trait]
impl DocumentCollection for MongoCollection {
    async fn count(&self) -> Result<u64> {
        Ok(self.collection.count_documents(doc! {}, None).await?)
    }

    async fn insert_many(&self, docs: Vec<Document>) -> Result<u64> {
        if docs.is_empty() {
            return Ok(0);
        }
        let result = self.collection.insert_many(docs, None).await?;
        Ok(result.inserted_ids.len() as u64)
    }

    async fn find(&self, config: ReadConfig) -> Result<Box<dyn DocumentCursor>> {
        let cursor = self
            .collection
            .find(config.filter.clone(), find_options(&config))
            .await?;
        Ok(Box::new(MongoCursor { inner: cursor }))
    }

    async fn explain(&self, config: ReadConfig) -> Result<Document> {
        let command = doc! {
            "explain": config.to_find_command(self.name()),
            "verbosity": self.verbosity.as_str(),
        };
        Ok(self.db.run_command(command, None).await?)
    }

    async fn create_index(&self, field: &str) -> Result<String> {
        let model = IndexModel::builder().keys(doc! { field: 1 }).build();
        let created = self.collection.create_index(model, None).await?;
        Ok(created.index_name)
    }
}

struct MongoCursor {
    inner: Cursor<Document>,
}

#[async_trait]
impl DocumentCursor for MongoCursor {
    async fn next(&mut self) -> Result<Option<Document>> {
        self.inner.try_next().await.map_err(Error::from_cursor)
    }

    // The driver issues killCursors when the cursor is dropped.
    async fn close(self: Box<Self>) -> Result<()> {
        drop(self);
        Ok(())
    }
}

/// Connects to MongoDB on every call. The explain verbosity is negotiated
/// with the server on the first successful connect and reused afterwards.
pub struct MongoConnector {
    uri: Option<String>,
    database: String,
    collection: String,
    verbosity: OnceCell<ExplainVerbosity>,
}

impl MongoConnector {
    pub fn new(uri: Option<String>, database: &str, collection: &str) -> Self {
        Self {
            uri,
            database: database.to_string(),
            collection: collection.to_string(),
            verbosity: OnceCell::new(),
        }
    }

    pub async fn open_collection(&self, name: &str) -> Result<MongoCollection> {
        let uri = self.uri.as_deref().ok_or(Error::Unconfigured)?;
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(&self.database);

        let verbosity = *self
            .verbosity
            .get_or_try_init(|| async {
                let build_info = db.run_command(doc! { "buildInfo": 1 }, None).await?;
                let verbosity = ExplainVerbosity::negotiate(&build_info);
                tracing::debug!(event = "explain_verbosity", verbosity = verbosity.as_str());
                Ok::<_, Error>(verbosity)
            })
            .await?;

        Ok(MongoCollection {
            collection: db.collection::<Document>(name),
            db,
            verbosity,
        })
    }

    /// Recreates `name` as a capped collection of `size` bytes holding at
    /// most `max` documents. Tailable cursors need a capped collection.
    pub async fn open_capped(&self, name: &str, size: u64, max: u64) -> Result<MongoCollection> {
        let collection = self.open_collection(name).await?;
        if let Err(err) = collection.collection.drop(None).await {
            tracing::debug!(event = "drop_capped", collection = name, error = %err);
        }

        let mut options = CreateCollectionOptions::default();
        options.capped = Some(true);
        options.size = Some(size);
        options.max = Some(max);
        collection.db.create_collection(name, options).await?;
        Ok(collection)
    }
}

#[async_trait]
impl Connector for MongoConnector {
    async fn connect(&self) -> Result<Arc<dyn DocumentCollection>> {
        let collection = self.open_collection(&self.collection).await?;
        Ok(Arc::new(collection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_uri_fails_on_first_use() {
        let connector = MongoConnector::new(None, "cursor_analysis", "test_data");
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, Error::Unconfigured));
    }

    #[test]
    fn options_follow_read_config() {
        let options = find_options(&ReadConfig {
            limit: Some(50),
            skip: Some(10),
            batch_size: Some(100),
            ..ReadConfig::default()
        });
        assert_eq!(options.limit, Some(50));
        assert_eq!(options.skip, Some(10));
        assert_eq!(options.batch_size, Some(100));
        assert!(options.cursor_type.is_none());
    }

    #[test]
    fn tailing_requests_tailable_await_cursor() {
        let options = find_options(&ReadConfig::default().tailing());
        assert!(matches!(options.cursor_type, Some(CursorType::TailableAwait)));
        assert_eq!(options.no_cursor_timeout, Some(true));
    }
}
