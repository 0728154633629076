pub mod api;
pub mod bench;
pub mod collection;
pub mod config;
pub mod error;
pub mod estimator;
pub mod explain;
pub mod iteration;
pub mod lifecycle;
pub mod memory;
pub mod mongo;
pub mod store;
pub mod types;

pub use error::{Error, Result};

/// JSON logs on stderr, filtered by `log_level` (an `EnvFilter` directive).
pub fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(std::io::stderr)
        .init();
}
