use cursor_lab::api;
use cursor_lab::bench::BenchRunner;
use cursor_lab::config::{load_dotenv, Settings};
use cursor_lab::estimator::BatchSizeEstimator;
use cursor_lab::mongo::MongoConnector;
use cursor_lab::store::SqliteResultStore;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = load_dotenv(None);
    let cfg = Settings::from_env();
    cursor_lab::init_logging(&cfg.log_level);
    if let Err(err) = dotenv {
        tracing::warn!(event = "dotenv_failed", error = %err);
    }

    tracing::info!(
        event = "config_loaded",
        mongodb_configured = cfg.mongodb_uri.is_some(),
        database = %cfg.database,
        collection = %cfg.collection,
        results_db = ?cfg.results_db,
        strict_strategies = cfg.strict_strategies
    );

    // 1. Result log
    let results = SqliteResultStore::open(&cfg.results_db)?;
    results.init_schema()?;

    // 2. Document store; a missing URI only fails once a run needs it
    let connector = MongoConnector::new(cfg.mongodb_uri.clone(), &cfg.database, &cfg.collection);

    // 3. Runner and HTTP surface
    let runner = BenchRunner::new(Arc::new(connector), Arc::new(results))
        .with_estimator(BatchSizeEstimator::new(cfg.sample_size, cfg.memory_ceiling))
        .strict(cfg.strict_strategies);

    api::start_server(Arc::new(runner), cfg.port).await
}
