//! Cursor lifecycle patterns: every path out of these functions closes the
//! cursor, including the error path.

use crate::collection::DocumentCursor;
use crate::error::{Error, Result};
use futures::future::BoxFuture;
use mongodb::bson::Document;
use std::time::Duration;

/// Reads a cursor to the end, then closes it.
pub async fn drain_with_explicit_close(mut cursor: Box<dyn DocumentCursor>) -> Result<Vec<Document>> {
    let mut docs = Vec::new();
    let outcome = loop {
        match cursor.next().await {
            Ok(Some(doc)) => docs.push(doc),
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    let closed = cursor.close().await;
    outcome?;
    closed?;
    Ok(docs)
}

/// Runs `body` against the cursor and closes it afterwards, whatever `body`
/// returned.
pub async fn with_cursor<T, F>(mut cursor: Box<dyn DocumentCursor>, body: F) -> Result<T>
where
    F: for<'c> FnOnce(&'c mut dyn DocumentCursor) -> BoxFuture<'c, Result<T>>,
{
    let outcome = body(cursor.as_mut()).await;
    let closed = cursor.close().await;
    let value = outcome?;
    closed?;
    Ok(value)
}

/// Groups documents into batches of `batch_size` (at least 1) and hands each
/// batch to `on_batch`, the last one possibly short. Returns the number of
/// documents processed.
pub async fn process_in_batches<F>(
    mut cursor: Box<dyn DocumentCursor>,
    batch_size: usize,
    mut on_batch: F,
) -> Result<u64>
where
    F: FnMut(Vec<Document>) + Send,
{
    let batch_size = batch_size.max(1);
    let mut batch = Vec::with_capacity(batch_size);
    let mut processed = 0u64;

    let outcome = loop {
        match cursor.next().await {
            Ok(Some(doc)) => {
                batch.push(doc);
                processed += 1;
                if batch.len() >= batch_size {
                    on_batch(std::mem::replace(&mut batch, Vec::with_capacity(batch_size)));
                }
            }
            Ok(None) => {
                if !batch.is_empty() {
                    on_batch(std::mem::take(&mut batch));
                }
                break Ok(());
            }
            Err(e) => break Err(e),
        }
    };

    let closed = cursor.close().await;
    outcome?;
    closed?;
    Ok(processed)
}

/// Calls `on_doc` for every document, then closes the cursor.
pub async fn for_each<F>(mut cursor: Box<dyn DocumentCursor>, mut on_doc: F) -> Result<u64>
where
    F: FnMut(Document) + Send,
{
    let mut seen = 0u64;
    let outcome = loop {
        match cursor.next().await {
            Ok(Some(doc)) => {
                on_doc(doc);
                seen += 1;
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    let closed = cursor.close().await;
    outcome?;
    closed?;
    Ok(seen)
}

/// Follows a tailable cursor until `wanted` documents have arrived or the
/// cursor dies, then closes it. Returns the number of documents seen.
pub async fn tail<F>(
    mut cursor: Box<dyn DocumentCursor>,
    wanted: u64,
    mut on_doc: F,
) -> Result<u64>
where
    F: FnMut(Document) + Send,
{
    let mut seen = 0u64;
    let outcome = async {
        while seen < wanted {
            match cursor.next().await? {
                Some(doc) => {
                    on_doc(doc);
                    seen += 1;
                }
                None => break,
            }
        }
        Ok::<_, Error>(())
    }
    .await;

    let closed = cursor.close().await;
    outcome?;
    closed?;
    Ok(seen)
}

/// Outcome of reading from a cursor after it sat idle.
#[derive(Debug, PartialEq)]
pub enum IdleRead {
    /// The server still had the cursor; carries the number of documents read.
    Completed(u64),
    /// The cursor was invalidated while idle. It has been closed and dropped.
    Expired { read_before_expiry: u64 },
}

/// Reads one document, waits `idle` (calling `while_idle` first, which lets
/// callers simulate server-side expiry), then tries to finish the read.
///
/// An invalidated cursor is not recreated; the error is reported and the
/// cursor discarded. Any other error propagates.
pub async fn read_after_idle<F>(
    mut cursor: Box<dyn DocumentCursor>,
    idle: Duration,
    while_idle: F,
) -> Result<IdleRead>
where
    F: FnOnce() + Send,
{
    let mut read = 0u64;
    let outcome = async {
        if cursor.next().await?.is_some() {
            read += 1;
        }
        while_idle();
        tokio::time::sleep(idle).await;
        while cursor.next().await?.is_some() {
            read += 1;
        }
        Ok::<_, Error>(())
    }
    .await;

    let closed = cursor.close().await;
    match outcome {
        Ok(()) => {
            closed?;
            Ok(IdleRead::Completed(read))
        }
        Err(Error::CursorExpired) => {
            tracing::warn!(event = "cursor_expired", read_before_expiry = read);
            if let Err(e) = closed {
                tracing::warn!(event = "cursor_close_failed", error = %e);
            }
            Ok(IdleRead::Expired { read_before_expiry: read })
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{seed_document, DocumentCollection, ReadConfig};
    use crate::memory::MemoryCollection;
    use futures::FutureExt;

    fn seeded(n: u64) -> MemoryCollection {
        MemoryCollection::with_documents((0..n).map(seed_document).collect())
    }

    #[tokio::test]
    async fn scoped_cursor_closes_on_error() {
        let collection = seeded(5);
        let cursor = collection.find(ReadConfig::default()).await.unwrap();

        let outcome: Result<()> = with_cursor(cursor, |c| {
            async move {
                c.next().await?;
                Err(Error::InvalidDocCount("boom".into()))
            }
            .boxed()
        })
        .await;

        assert!(outcome.is_err());
        assert_eq!(collection.open_cursors(), 0);
    }

    #[tokio::test]
    async fn scoped_cursor_returns_body_value() {
        let collection = seeded(5);
        let cursor = collection.find(ReadConfig::default()).await.unwrap();

        let first = with_cursor(cursor, |c| {
            async move { Ok(c.next().await?.and_then(|d| d.get_i64("index").ok())) }.boxed()
        })
        .await
        .unwrap();

        assert_eq!(first, Some(0));
        assert_eq!(collection.open_cursors(), 0);
    }

    #[tokio::test]
    async fn batches_include_short_tail() {
        let collection = seeded(7);
        let cursor = collection
            .find(ReadConfig::default().with_batch_size(3))
            .await
            .unwrap();

        let mut sizes = Vec::new();
        let processed = process_in_batches(cursor, 3, |batch| sizes.push(batch.len()))
            .await
            .unwrap();

        assert_eq!(processed, 7);
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(collection.open_cursors(), 0);
    }

    #[tokio::test]
    async fn idle_cursor_that_expires_is_discarded() {
        let collection = seeded(10);
        let cursor = collection
            .find(ReadConfig::default().with_batch_size(1))
            .await
            .unwrap();

        let handle = collection.clone();
        let outcome = read_after_idle(cursor, Duration::from_millis(1), move || {
            handle.expire_cursors()
        })
        .await
        .unwrap();

        assert_eq!(outcome, IdleRead::Expired { read_before_expiry: 1 });
        assert_eq!(collection.open_cursors(), 0);
    }

    #[tokio::test]
    async fn idle_cursor_that_survives_completes() {
        let collection = seeded(4);
        let cursor = collection.find(ReadConfig::default()).await.unwrap();

        let outcome = read_after_idle(cursor, Duration::from_millis(1), || {})
            .await
            .unwrap();

        assert_eq!(outcome, IdleRead::Completed(4));
    }

    #[tokio::test]
    async fn for_each_visits_in_order() {
        let collection = seeded(4);
        let cursor = collection.find(ReadConfig::default()).await.unwrap();

        let mut indexes = Vec::new();
        let seen = for_each(cursor, |d| indexes.push(d.get_i64("index").unwrap()))
            .await
            .unwrap();

        assert_eq!(seen, 4);
        assert_eq!(indexes, vec![0, 1, 2, 3]);
        assert_eq!(collection.open_cursors(), 0);
    }

    #[tokio::test]
    async fn tail_stops_after_wanted_documents() {
        let collection = seeded(1);
        let cursor = collection.find(ReadConfig::default().tailing()).await.unwrap();

        let writer = collection.clone();
        let inserter = tokio::spawn(async move {
            for i in 1..3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                writer.insert_many(vec![seed_document(i)]).await.unwrap();
            }
        });

        let mut indexes = Vec::new();
        let seen = tokio::time::timeout(
            Duration::from_secs(5),
            tail(cursor, 3, |d| indexes.push(d.get_i64("index").unwrap())),
        )
        .await
        .unwrap()
        .unwrap();
        inserter.await.unwrap();

        assert_eq!(seen, 3);
        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(collection.open_cursors(), 0);
    }
}
