//! Sampling batch-size estimator.
//!
//! Samples a few documents, approximates their wire size through their JSON
//! length and sizes a batch so one round trip stays under a memory ceiling.

use crate::collection::DocumentCollection;
use crate::error::Result;
use mongodb::bson::{Bson, DateTime, Document};
use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::Value;
use std::io;

/// Matches the 16 MiB document size limit of the store's wire format.
pub const DEFAULT_MEMORY_CEILING: u64 = 16 * 1024 * 1024;
pub const DEFAULT_SAMPLE_SIZE: usize = 5;
/// Assumed document size when the collection is empty.
pub const DEFAULT_DOC_SIZE: u64 = 1024;

pub const MIN_BATCH_SIZE: u32 = 10;
pub const MAX_BATCH_SIZE: u32 = 1000;

/// JSON length to binary encoding correction. Calibrated against the
/// `json.dumps(doc, default=str)` layout that [`serialized_len`] reproduces.
const ENCODING_FACTOR: f64 = 1.1;
/// 20% headroom against estimation error.
const SAFETY_MARGIN: f64 = 1.2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BatchEstimate {
    pub average_document_size: u64,
    pub batch_size: u32,
    pub sampled: usize,
}

/// JSON length of one document: `", "` and `": "` separators, non-ASCII
/// escaped as `\uXXXX`, ObjectIds and dates written as plain strings.
pub fn serialized_len(doc: &Document) -> usize {
    let value = plain_json(&Bson::Document(doc.clone()));
    let mut out = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut out, SpacedAsciiFormatter);
    match value.serialize(&mut ser) {
        Ok(()) => out.len(),
        Err(_) => value.to_string().len(),
    }
}

fn plain_json(value: &Bson) -> Value {
    match value {
        Bson::Document(doc) => Value::Object(
            doc.iter()
                .map(|(key, v)| (key.clone(), plain_json(v)))
                .collect(),
        ),
        Bson::Array(items) => Value::Array(items.iter().map(plain_json).collect()),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => Value::String(plain_datetime(*dt)),
        other => other.clone().into_relaxed_extjson(),
    }
}

/// `YYYY-MM-DD HH:MM:SS`, with microseconds only when non-zero.
fn plain_datetime(dt: DateTime) -> String {
    let millis = dt.timestamp_millis();
    match chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis) {
        Some(t) if millis % 1000 == 0 => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        Some(t) => t.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        None => millis.to_string(),
    }
}

struct SpacedAsciiFormatter;

impl Formatter for SpacedAsciiFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (i, ch) in fragment.char_indices() {
            if ch.is_ascii() {
                continue;
            }
            writer.write_all(fragment[start..i].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units).iter() {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = i + ch.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

/// Average sample size with the encoding correction applied, or
/// [`DEFAULT_DOC_SIZE`] for an empty sample.
pub fn estimate_document_size(sample: &[Document]) -> u64 {
    if sample.is_empty() {
        return DEFAULT_DOC_SIZE;
    }
    let total: usize = sample.iter().map(serialized_len).sum();
    let average = total as f64 / sample.len() as f64;
    (average * ENCODING_FACTOR) as u64
}

/// `floor(ceiling / (avg * 1.2))`, clamped to `[10, 1000]`.
pub fn batch_size_for(avg_doc_size: u64, memory_ceiling: u64) -> u32 {
    let per_doc = avg_doc_size.max(1) as f64 * SAFETY_MARGIN;
    let raw = (memory_ceiling as f64 / per_doc).floor();
    raw.clamp(f64::from(MIN_BATCH_SIZE), f64::from(MAX_BATCH_SIZE)) as u32
}

#[derive(Clone, Copy, Debug)]
pub struct BatchSizeEstimator {
    pub sample_size: usize,
    pub memory_ceiling: u64,
}

impl Default for BatchSizeEstimator {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            memory_ceiling: DEFAULT_MEMORY_CEILING,
        }
    }
}

impl BatchSizeEstimator {
    pub fn new(sample_size: usize, memory_ceiling: u64) -> Self {
        Self {
            sample_size,
            memory_ceiling,
        }
    }

    /// Estimates from an already drawn sample. A known average size takes
    /// precedence over the sample.
    pub fn estimate(&self, sample: &[Document], known_avg: Option<u64>) -> BatchEstimate {
        let sample = &sample[..sample.len().min(self.sample_size)];
        let average_document_size = known_avg.unwrap_or_else(|| estimate_document_size(sample));
        BatchEstimate {
            average_document_size,
            batch_size: batch_size_for(average_document_size, self.memory_ceiling),
            sampled: sample.len(),
        }
    }

    /// Draws the sample from `collection`, then estimates.
    pub async fn estimate_for(&self, collection: &dyn DocumentCollection) -> Result<BatchEstimate> {
        let sample = collection.sample(self.sample_size).await?;
        let estimate = self.estimate(&sample, None);
        tracing::debug!(
            event = "batch_size_estimated",
            sampled = estimate.sampled,
            average_document_size = estimate.average_document_size,
            batch_size = estimate.batch_size
        );
        Ok(estimate)
    }
}
