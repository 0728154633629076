//! Iteration-pattern comparison: one limited read consumed five different
//! ways, each timed over several iterations.

use crate::collection::{DocumentCollection, DocumentCursor, ReadConfig};
use crate::error::{Error, Result};
use crate::lifecycle::{drain_with_explicit_close, for_each, process_in_batches, with_cursor};
use futures::{stream, FutureExt, Stream, TryStreamExt};
use mongodb::bson::Document;
use serde::Serialize;
use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationPattern {
    /// Drain into a `Vec`, then map.
    CollectAll,
    /// Consume the cursor as a `Stream`.
    StreamLoop,
    /// Call `next` until exhausted inside a scoped cursor.
    ManualNext,
    ForEach,
    Batched,
}

impl IterationPattern {
    pub const ALL: [IterationPattern; 5] = [
        IterationPattern::CollectAll,
        IterationPattern::StreamLoop,
        IterationPattern::ManualNext,
        IterationPattern::ForEach,
        IterationPattern::Batched,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IterationPattern::CollectAll => "collect_all",
            IterationPattern::StreamLoop => "stream_loop",
            IterationPattern::ManualNext => "manual_next",
            IterationPattern::ForEach => "for_each",
            IterationPattern::Batched => "batched",
        }
    }
}

/// Stand-in for per-document work.
pub fn process_document(mut doc: Document) -> Document {
    let mut value = 0.0_f64;
    for i in 0..1000_u32 {
        value += f64::from(i).sqrt();
    }
    doc.insert("_simulatedField", value);
    doc
}

/// Turns a cursor into a stream of documents. The cursor is released when
/// the stream ends or is dropped.
pub fn cursor_stream(cursor: Box<dyn DocumentCursor>) -> impl Stream<Item = Result<Document>> + Send {
    stream::try_unfold(cursor, |mut cursor| async move {
        let next = cursor.next().await?;
        Ok::<_, Error>(next.map(|doc| (doc, cursor)))
    })
}

/// Runs one read with `pattern`; returns the number of processed documents.
pub async fn run_pattern(
    collection: &dyn DocumentCollection,
    pattern: IterationPattern,
    config: &ReadConfig,
    batch_size: usize,
) -> Result<u64> {
    let cursor = collection.find(config.clone()).await?;

    let processed = match pattern {
        IterationPattern::CollectAll => {
            let docs = drain_with_explicit_close(cursor).await?;
            let processed: Vec<Document> = docs.into_iter().map(process_document).collect();
            processed.len() as u64
        }
        IterationPattern::StreamLoop => {
            let mut docs = Box::pin(cursor_stream(cursor));
            let mut processed = Vec::new();
            while let Some(doc) = docs.try_next().await? {
                processed.push(process_document(doc));
            }
            processed.len() as u64
        }
        IterationPattern::ManualNext => {
            with_cursor(cursor, |c| {
                async move {
                    let mut processed = Vec::new();
                    while let Some(doc) = c.next().await? {
                        processed.push(process_document(doc));
                    }
                    Ok(processed.len() as u64)
                }
                .boxed()
            })
            .await?
        }
        IterationPattern::ForEach => {
            let mut processed = Vec::new();
            for_each(cursor, |doc| processed.push(process_document(doc))).await?;
            processed.len() as u64
        }
        IterationPattern::Batched => {
            let mut processed = Vec::new();
            process_in_batches(cursor, batch_size, |batch| {
                processed.extend(batch.into_iter().map(process_document))
            })
            .await?;
            processed.len() as u64
        }
    };

    Ok(processed)
}

#[derive(Clone, Debug, Serialize)]
pub struct PatternTiming {
    pub pattern: IterationPattern,
    pub times_ms: Vec<f64>,
    pub average_ms: f64,
    pub documents: u64,
}

impl PatternTiming {
    /// Percent difference of the average against `baseline`; positive is
    /// slower.
    pub fn relative_to(&self, baseline: &PatternTiming) -> f64 {
        if baseline.average_ms <= 0.0 {
            return 0.0;
        }
        (self.average_ms - baseline.average_ms) / baseline.average_ms * 100.0
    }
}

/// Times every pattern over `iterations` runs (at least one) of the same
/// read. The first entry is the `CollectAll` baseline.
pub async fn compare_patterns(
    collection: &dyn DocumentCollection,
    config: &ReadConfig,
    batch_size: usize,
    iterations: usize,
) -> Result<Vec<PatternTiming>> {
    let iterations = iterations.max(1);
    let mut timings = Vec::with_capacity(IterationPattern::ALL.len());

    for pattern in IterationPattern::ALL {
        let mut times_ms = Vec::with_capacity(iterations);
        let mut documents = 0;
        for iteration in 0..iterations {
            let start = Instant::now();
            documents = run_pattern(collection, pattern, config, batch_size).await?;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            tracing::debug!(
                event = "iteration_pattern",
                pattern = pattern.as_str(),
                iteration,
                elapsed_ms,
                documents,
            );
            times_ms.push(elapsed_ms);
        }
        let average_ms = times_ms.iter().sum::<f64>() / times_ms.len() as f64;
        timings.push(PatternTiming {
            pattern,
            times_ms,
            average_ms,
            documents,
        });
    }

    Ok(timings)
}
