//! Walks through cursor handling patterns against a users collection.
//!
//! ```bash
//! # against a live server
//! MONGODB_URI=mongodb://localhost:27017 cursor-demo all
//! # without a server
//! cursor-demo --memory all
//! ```

use clap::{Parser, Subcommand};
use cursor_lab::collection::{DocumentCollection, ReadConfig};
use cursor_lab::config::{load_dotenv, Settings};
use cursor_lab::estimator::BatchSizeEstimator;
use cursor_lab::explain::ExplainSummary;
use cursor_lab::iteration::{self, IterationPattern};
use cursor_lab::lifecycle::{self, IdleRead};
use cursor_lab::memory::MemoryCollection;
use cursor_lab::mongo::MongoConnector;
use futures::FutureExt;
use mongodb::bson::{doc, Document};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "cursor-demo", version, about = "Cursor lifecycle walkthrough")]
struct Cli {
    #[arg(long, env = "MONGODB_URI")]
    uri: Option<String>,

    #[arg(long, default_value = "cursor_analysis")]
    database: String,

    #[arg(long, default_value = "users")]
    collection: String,

    /// Use an in-process collection of sample users instead of a server.
    #[arg(long)]
    memory: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize the explain plan of an `age > 30` query.
    Explain {
        /// Create the `age` index first.
        #[arg(long)]
        index: bool,
    },
    /// Explicit close, scoped close and batched processing.
    Handling,
    /// Read with a batch size derived from sampled document sizes.
    Optimize,
    /// Hold a cursor idle, then try to resume it.
    Timeout {
        #[arg(long, default_value_t = 10)]
        idle_secs: u64,
    },
    /// Follow a tailable cursor on a capped collection while events arrive.
    Tailable {
        #[arg(long, default_value_t = 5)]
        events: u64,
        #[arg(long, default_value_t = 2000)]
        interval_ms: u64,
    },
    /// Time the iteration patterns against each other.
    Iterate {
        #[arg(long, default_value_t = 5)]
        iterations: usize,
        #[arg(long, default_value_t = 100)]
        limit: i64,
        #[arg(long, default_value_t = 20)]
        batch_size: u32,
    },
    /// Explain (indexed), handling, optimize and iterate.
    All,
}

const CAPPED_COLLECTION: &str = "logs_capped";
const CAPPED_SIZE: u64 = 1024 * 1024;
const CAPPED_MAX: u64 = 100;

fn sample_users() -> Vec<Document> {
    let names = ["Ana", "Luis", "Marta", "Jorge", "Lucia", "Pablo", "Elena", "Diego"];
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let age = 22 + (i as i32) * 4;
            doc! { "name": *name, "age": age }
        })
        .collect()
}

fn describe(doc: &Document) -> String {
    doc.get_str("name")
        .map(str::to_string)
        .unwrap_or_else(|_| doc.to_string())
}

async fn explain(users: &dyn DocumentCollection, index: bool) -> anyhow::Result<()> {
    println!("\n=== explain ===");
    if index {
        let name = users.create_index("age").await?;
        println!("index ready: {}", name);
    }
    let query = ReadConfig::default().with_filter(doc! { "age": { "$gt": 30 } });
    let raw = users.explain(query).await?;
    let summary = ExplainSummary::from_document(&raw);
    println!("winning plan stage: {}", summary.stage);
    if let Some(n) = summary.n_returned {
        println!("documents returned: {}", n);
    }
    if let Some(n) = summary.total_docs_examined {
        println!("documents examined: {}", n);
    }
    if let Some(ms) = summary.execution_time_millis {
        println!("execution time (ms): {}", ms);
    }
    match &summary.index_name {
        Some(index) => println!("index used: {}", index),
        None => println!("no index used (collection scan)"),
    }
    Ok(())
}

async fn handling(users: &dyn DocumentCollection) -> anyhow::Result<()> {
    println!("\n=== cursor handling ===");

    let over_25 = ReadConfig::default().with_filter(doc! { "age": { "$gt": 25 } });

    println!("1. scoped cursor");
    let cursor = users.find(over_25.clone().with_batch_size(2)).await?;
    lifecycle::with_cursor(cursor, |c| {
        async move {
            while let Some(doc) = c.next().await? {
                println!("processing: {}", describe(&doc));
            }
            Ok(())
        }
        .boxed()
    })
    .await?;

    println!("2. explicit close");
    let cursor = users.find(over_25.clone().with_batch_size(2)).await?;
    let docs = lifecycle::drain_with_explicit_close(cursor).await?;
    println!("read {} documents, cursor closed", docs.len());

    println!("3. batched processing");
    let cursor = users.find(over_25.with_batch_size(3)).await?;
    let processed = lifecycle::process_in_batches(cursor, 3, |batch| {
        println!("processing batch of {} documents", batch.len());
    })
    .await?;
    println!("processed {} documents, cursor closed", processed);
    Ok(())
}

async fn optimize(users: &dyn DocumentCollection, estimator: BatchSizeEstimator) -> anyhow::Result<()> {
    println!("\n=== batch size optimization ===");
    let estimate = estimator.estimate_for(users).await?;
    println!("average document size: {} bytes", estimate.average_document_size);
    println!("batch size: {} documents", estimate.batch_size);

    let cursor = users
        .find(ReadConfig::default().with_batch_size(estimate.batch_size))
        .await?;
    let docs = lifecycle::drain_with_explicit_close(cursor).await?;
    for (i, doc) in docs.iter().take(3).enumerate() {
        println!("document {}: {}", i + 1, describe(doc));
    }
    println!("total documents processed: {}", docs.len());
    Ok(())
}

async fn timeout(
    users: &dyn DocumentCollection,
    idle: Duration,
    memory: Option<MemoryCollection>,
) -> anyhow::Result<()> {
    println!("\n=== cursor timeout ===");
    let cursor = users.find(ReadConfig::default().with_batch_size(1)).await?;
    println!("cursor open, idling for {:?}", idle);

    let outcome = lifecycle::read_after_idle(cursor, idle, move || {
        if let Some(memory) = memory {
            memory.expire_cursors();
        }
    })
    .await?;

    match outcome {
        IdleRead::Completed(n) => println!("cursor still valid, read {} documents", n),
        IdleRead::Expired { read_before_expiry } => println!(
            "cursor expired after {} document(s); it was closed and not recreated",
            read_before_expiry
        ),
    }
    Ok(())
}

async fn tailable(
    logs: Arc<dyn DocumentCollection>,
    events: u64,
    interval: Duration,
) -> anyhow::Result<()> {
    println!("\n=== tailable cursor ===");
    logs.insert_many(vec![doc! { "message": "log start", "level": "info" }])
        .await?;

    let cursor = logs.find(ReadConfig::default().tailing()).await?;

    let writer = logs.clone();
    let inserter = tokio::spawn(async move {
        for i in 1..=events {
            tokio::time::sleep(interval).await;
            let event = doc! { "message": format!("event {}", i), "level": "info" };
            if let Err(err) = writer.insert_many(vec![event]).await {
                tracing::warn!(event = "tail_insert_failed", error = %err);
                break;
            }
        }
    });

    let seen = lifecycle::tail(cursor, events + 1, |doc| {
        println!("new log: {}", doc.get_str("message").unwrap_or("?"));
    })
    .await?;
    inserter.await?;
    println!("followed {} documents, cursor closed", seen);
    Ok(())
}

async fn iterate(
    users: &dyn DocumentCollection,
    iterations: usize,
    limit: i64,
    batch_size: u32,
) -> anyhow::Result<()> {
    println!("\n=== iteration patterns ===");
    println!("iterations: {}, limit: {}, batch size: {}", iterations, limit, batch_size);
    let config = ReadConfig::default()
        .with_limit(limit)
        .with_batch_size(batch_size);

    let timings =
        iteration::compare_patterns(users, &config, batch_size as usize, iterations).await?;
    for timing in &timings {
        println!(
            "{:<12} {:>9.2} ms  ({} docs)",
            timing.pattern.as_str(),
            timing.average_ms,
            timing.documents
        );
    }

    if let Some(baseline) = timings.iter().find(|t| t.pattern == IterationPattern::CollectAll) {
        println!("compared with {}:", baseline.pattern.as_str());
        for timing in timings.iter().filter(|t| t.pattern != baseline.pattern) {
            let diff = timing.relative_to(baseline);
            let word = if diff > 0.0 { "slower" } else { "faster" };
            println!("  {} is {:.2}% {}", timing.pattern.as_str(), diff.abs(), word);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = load_dotenv(None);
    let cli = Cli::parse();
    let cfg = Settings::from_env();
    cursor_lab::init_logging(&cfg.log_level);
    if let Err(err) = dotenv {
        tracing::warn!(event = "dotenv_failed", error = %err);
    }

    let memory = cli.memory.then(|| MemoryCollection::with_documents(sample_users()));
    let connector = MongoConnector::new(cli.uri.clone(), &cli.database, &cli.collection);
    let users: Arc<dyn DocumentCollection> = match &memory {
        Some(collection) => Arc::new(collection.clone()),
        None => Arc::new(connector.open_collection(&cli.collection).await?),
    };
    let estimator = BatchSizeEstimator::new(cfg.sample_size, cfg.memory_ceiling);

    match cli.cmd {
        Command::Explain { index } => explain(users.as_ref(), index).await?,
        Command::Handling => handling(users.as_ref()).await?,
        Command::Optimize => optimize(users.as_ref(), estimator).await?,
        Command::Timeout { idle_secs } => {
            timeout(users.as_ref(), Duration::from_secs(idle_secs), memory).await?
        }
        Command::Tailable { events, interval_ms } => {
            let logs: Arc<dyn DocumentCollection> = if cli.memory {
                Arc::new(MemoryCollection::new())
            } else {
                Arc::new(
                    connector
                        .open_capped(CAPPED_COLLECTION, CAPPED_SIZE, CAPPED_MAX)
                        .await?,
                )
            };
            tailable(logs, events, Duration::from_millis(interval_ms)).await?
        }
        Command::Iterate {
            iterations,
            limit,
            batch_size,
        } => iterate(users.as_ref(), iterations, limit, batch_size).await?,
        Command::All => {
            explain(users.as_ref(), true).await?;
            handling(users.as_ref()).await?;
            optimize(users.as_ref(), estimator).await?;
            iterate(users.as_ref(), 5, 100, 20).await?;
        }
    }
    Ok(())
}
