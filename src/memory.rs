//! In-process document collection with the server's limit/skip/batch rules,
//! top-level comparison filters, single-field indexes and tailable cursors.

use crate::collection::{Connector, DocumentCollection, DocumentCursor, ReadConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use parking_lot::RwLock;
use std::cmp::Ordering as CmpOrdering;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Size of the first batch when no batch size is requested.
const DEFAULT_FIRST_BATCH: usize = 101;

#[derive(Default)]
struct MemoryStats {
    finds: AtomicU64,
    inserts: AtomicU64,
    batches: AtomicU64,
    open_cursors: AtomicU64,
    generation: AtomicU64,
}

#[derive(Clone)]
pub struct MemoryCollection {
    docs: Arc<RwLock<Vec<Document>>>,
    indexes: Arc<RwLock<Vec<String>>>,
    stats: Arc<MemoryStats>,
    /// Bumped on every insert; tailing cursors wait on it.
    appended: Arc<watch::Sender<u64>>,
}

impl Default for MemoryCollection {
    fn default() -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            docs: Arc::default(),
            indexes: Arc::default(),
            stats: Arc::default(),
            appended: Arc::new(appended),
        }
    }
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(docs: Vec<Document>) -> Self {
        let collection = Self::new();
        *collection.docs.write() = docs;
        collection
    }

    /// Number of `find` calls issued so far.
    pub fn finds(&self) -> u64 {
        self.stats.finds.load(Ordering::SeqCst)
    }

    /// Number of `insert_many` calls issued so far.
    pub fn inserts(&self) -> u64 {
        self.stats.inserts.load(Ordering::SeqCst)
    }

    /// Round trips made by cursors, first batch included.
    pub fn batches_fetched(&self) -> u64 {
        self.stats.batches.load(Ordering::SeqCst)
    }

    pub fn open_cursors(&self) -> u64 {
        self.stats.open_cursors.load(Ordering::SeqCst)
    }

    /// Invalidates every cursor opened so far, as the server does once a
    /// cursor sits idle past its timeout.
    pub fn expire_cursors(&self) {
        self.stats.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Vec<Document> {
        self.docs.read().clone()
    }

    fn select(&self, config: &ReadConfig) -> VecDeque<Document> {
        let docs = self.docs.read();
        let skip = config.skip.map(|s| s as usize).unwrap_or(0);
        let limit = match config.limit {
            Some(l) if l != 0 => l.unsigned_abs() as usize,
            _ => usize::MAX,
        };
        docs.iter()
            .filter(|doc| passes(doc, config.filter.as_ref()))
            .skip(skip)
            .take(limit)
            .cloned()
            .collect()
    }

    /// First filtered field that has an index.
    fn usable_index(&self, filter: Option<&Document>) -> Option<String> {
        let filter = filter?;
        let indexes = self.indexes.read();
        filter
            .keys()
            .find(|field| indexes.iter().any(|indexed| indexed == *field))
            .cloned()
    }
}

fn passes(doc: &Document, filter: Option<&Document>) -> bool {
    filter.map_or(true, |f| matches_filter(doc, f))
}

/// Top-level equality and `$eq`/`$ne`/`$gt`/`$gte`/`$lt`/`$lte` conditions.
/// Unsupported operators match nothing.
pub fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(field, condition)| {
        let value = doc.get(field);
        match condition {
            Bson::Document(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => ops
                .iter()
                .all(|(op, operand)| matches_operator(value, op, operand)),
            expected => matches_operator(value, "$eq", expected),
        }
    })
}

fn matches_operator(value: Option<&Bson>, op: &str, operand: &Bson) -> bool {
    let ordering = value.and_then(|v| compare_bson(v, operand));
    let equal = ordering == Some(CmpOrdering::Equal) || value == Some(operand);
    match op {
        "$eq" => equal,
        "$ne" => !equal,
        "$gt" => ordering == Some(CmpOrdering::Greater),
        "$gte" => matches!(ordering, Some(CmpOrdering::Greater | CmpOrdering::Equal)),
        "$lt" => ordering == Some(CmpOrdering::Less),
        "$lte" => matches!(ordering, Some(CmpOrdering::Less | CmpOrdering::Equal)),
        _ => false,
    }
}

fn compare_bson(a: &Bson, b: &Bson) -> Option<CmpOrdering> {
    fn number(v: &Bson) -> Option<f64> {
        match v {
            Bson::Int32(n) => Some(f64::from(*n)),
            Bson::Int64(n) => Some(*n as f64),
            Bson::Double(n) => Some(*n),
            _ => None,
        }
    }
    match (number(a), number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => match (a, b) {
            (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
            _ => None,
        },
    }
}

#[async_trait]
impl DocumentCollection for MemoryCollection {
    async fn count(&self) -> Result<u64> {
        Ok(self.docs.read().len() as u64)
    }

    async fn insert_many(&self, docs: Vec<Document>) -> Result<u64> {
        self.stats.inserts.fetch_add(1, Ordering::SeqCst);
        let inserted = docs.len() as u64;
        self.docs.write().extend(docs);
        self.appended.send_modify(|n| *n += 1);
        Ok(inserted)
    }

    async fn find(&self, config: ReadConfig) -> Result<Box<dyn DocumentCursor>> {
        self.stats.finds.fetch_add(1, Ordering::SeqCst);
        self.stats.open_cursors.fetch_add(1, Ordering::SeqCst);

        if config.tailable {
            return Ok(Box::new(TailCursor {
                docs: self.docs.clone(),
                stats: self.stats.clone(),
                filter: config.filter,
                position: 0,
                appended: self.appended.subscribe(),
                open: true,
            }));
        }

        let remaining = self.select(&config);
        let mut cursor = MemoryCursor {
            stats: self.stats.clone(),
            generation: self.stats.generation.load(Ordering::SeqCst),
            batch_size: config.batch_size.map(|b| b as usize).filter(|b| *b > 0),
            remaining,
            batch: VecDeque::new(),
            open: true,
        };
        let first = cursor.batch_size.unwrap_or(DEFAULT_FIRST_BATCH);
        cursor.fetch(first);
        Ok(Box::new(cursor))
    }

    async fn explain(&self, config: ReadConfig) -> Result<Document> {
        let (total, matching) = {
            let docs = self.docs.read();
            let matching = docs
                .iter()
                .filter(|doc| passes(doc, config.filter.as_ref()))
                .count() as i64;
            (docs.len() as i64, matching)
        };
        let returned = self.select(&config).len() as i64;
        let skipped = config.skip.map(|s| s as i64).unwrap_or(0).min(matching);
        let index = self.usable_index(config.filter.as_ref());

        let filter = config.filter.clone().unwrap_or_default();
        let (mut plan, examined) = match &index {
            Some(field) => {
                let ixscan = doc! {
                    "stage": "IXSCAN",
                    "keyPattern": { field.as_str(): 1 },
                    "indexName": format!("{}_1", field),
                };
                let fetch = doc! { "stage": "FETCH", "filter": filter, "inputStage": ixscan };
                (fetch, (returned + skipped).min(matching))
            }
            None if config.filter.is_some() => {
                let scan = doc! { "stage": "COLLSCAN", "filter": filter, "direction": "forward" };
                (scan, total)
            }
            None => {
                let scan = doc! { "stage": "COLLSCAN", "direction": "forward" };
                (scan, (returned + skipped).min(total))
            }
        };
        if config.skip.is_some() {
            plan = doc! { "stage": "SKIP", "skipAmount": skipped, "inputStage": plan };
        }
        if let Some(limit) = config.limit.filter(|l| *l != 0) {
            plan = doc! { "stage": "LIMIT", "limitAmount": limit, "inputStage": plan };
        }

        Ok(doc! {
            "queryPlanner": { "winningPlan": plan },
            "executionStats": {
                "nReturned": returned,
                "totalDocsExamined": examined,
                "executionTimeMillis": 0_i64,
            },
        })
    }

    async fn create_index(&self, field: &str) -> Result<String> {
        let mut indexes = self.indexes.write();
        if !indexes.iter().any(|f| f == field) {
            indexes.push(field.to_string());
        }
        Ok(format!("{}_1", field))
    }
}

struct MemoryCursor {
    stats: Arc<MemoryStats>,
    generation: u64,
    batch_size: Option<usize>,
    remaining: VecDeque<Document>,
    batch: VecDeque<Document>,
    open: bool,
}

impl MemoryCursor {
    fn fetch(&mut self, n: usize) {
        self.stats.batches.fetch_add(1, Ordering::SeqCst);
        let n = n.min(self.remaining.len());
        self.batch.extend(self.remaining.drain(..n));
    }

    fn release(&mut self) {
        if self.open {
            self.open = false;
            self.stats.open_cursors.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl DocumentCursor for MemoryCursor {
    async fn next(&mut self) -> Result<Option<Document>> {
        if let Some(doc) = self.batch.pop_front() {
            return Ok(Some(doc));
        }
        if self.remaining.is_empty() {
            return Ok(None);
        }
        if self.generation != self.stats.generation.load(Ordering::SeqCst) {
            return Err(Error::CursorExpired);
        }
        let n = self.batch_size.unwrap_or(usize::MAX);
        self.fetch(n);
        Ok(self.batch.pop_front())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut cursor = self;
        cursor.release();
        Ok(())
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.release();
    }
}

/// Tailable cursor: once caught up it waits for the next insert instead of
/// finishing.
struct TailCursor {
    docs: Arc<RwLock<Vec<Document>>>,
    stats: Arc<MemoryStats>,
    filter: Option<Document>,
    position: usize,
    appended: watch::Receiver<u64>,
    open: bool,
}

impl TailCursor {
    fn release(&mut self) {
        if self.open {
            self.open = false;
            self.stats.open_cursors.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl DocumentCursor for TailCursor {
    async fn next(&mut self) -> Result<Option<Document>> {
        loop {
            let found = {
                let docs = self.docs.read();
                let mut found = None;
                while self.position < docs.len() {
                    let doc = &docs[self.position];
                    self.position += 1;
                    if passes(doc, self.filter.as_ref()) {
                        found = Some(doc.clone());
                        break;
                    }
                }
                found
            };
            if found.is_some() {
                return Ok(found);
            }
            if self.appended.changed().await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut cursor = self;
        cursor.release();
        Ok(())
    }
}

impl Drop for TailCursor {
    fn drop(&mut self) {
        self.release();
    }
}

/// Hands out the same in-process collection on every connect.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    collection: MemoryCollection,
}

impl MemoryConnector {
    pub fn new(collection: MemoryCollection) -> Self {
        Self { collection }
    }

    pub fn collection(&self) -> &MemoryCollection {
        &self.collection
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn DocumentCollection>> {
        Ok(Arc::new(self.collection.clone()))
    }
}
