use crate::estimator::{DEFAULT_MEMORY_CEILING, DEFAULT_SAMPLE_SIZE};
use std::env;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct Settings {
    pub mongodb_uri: Option<String>,
    pub database: String,
    pub collection: String,
    pub results_db: PathBuf,
    pub port: u16,
    /// Reject unknown strategy names instead of running nothing.
    pub strict_strategies: bool,
    pub sample_size: usize,
    pub memory_ceiling: u64,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mongodb_uri: None,
            database: "cursor_analysis".to_string(),
            collection: "test_data".to_string(),
            results_db: PathBuf::from("cursor_lab.sqlite3"),
            port: 8000,
            strict_strategies: false,
            sample_size: DEFAULT_SAMPLE_SIZE,
            memory_ceiling: DEFAULT_MEMORY_CEILING,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Reads the process environment. Call [`load_dotenv`] first to pick up
    /// a `.env` file.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        cfg.mongodb_uri = lookup("MONGODB_URI").filter(|v| !v.trim().is_empty());
        if let Some(v) = lookup("CURSOR_LAB_DATABASE") {
            cfg.database = v;
        }
        if let Some(v) = lookup("CURSOR_LAB_COLLECTION") {
            cfg.collection = v;
        }
        if let Some(v) = lookup("CURSOR_LAB_RESULTS_DB") {
            cfg.results_db = PathBuf::from(v);
        }
        if let Some(n) = lookup("CURSOR_LAB_PORT").and_then(|v| v.parse().ok()) {
            cfg.port = n;
        }
        if let Some(v) = lookup("CURSOR_LAB_STRICT") {
            cfg.strict_strategies = matches!(v.trim(), "1" | "true" | "yes" | "on");
        }
        if let Some(n) = lookup("CURSOR_LAB_SAMPLE_SIZE").and_then(|v| v.parse().ok()) {
            cfg.sample_size = n;
        }
        if let Some(n) = lookup("CURSOR_LAB_MEMORY_CEILING").and_then(|v| v.parse().ok()) {
            cfg.memory_ceiling = n;
        }
        if let Some(v) = lookup("CURSOR_LAB_LOG") {
            cfg.log_level = v;
        }
        cfg
    }
}

/// Loads `path`, or `.env` from the working directory and its parents, into
/// the process environment. A missing file is not an error; an unreadable or
/// malformed one is.
pub fn load_dotenv(path: Option<&Path>) -> Result<(), dotenvy::Error> {
    let loaded = match path {
        Some(path) => dotenvy::from_path(path),
        None => dotenvy::dotenv().map(|_| ()),
    };
    match loaded {
        Err(err) if err.not_found() => Ok(()),
        other => other,
    }
}
