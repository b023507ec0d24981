//! Structured logging setup
//!
//! Installs a global `tracing` subscriber. `RUST_LOG` takes precedence over
//! the configured level when it is set.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Tracing target used for audit events of write dispatches
pub const AUDIT_TARGET: &str = "velroute::audit";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit one JSON object per event instead of human-readable lines
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInstalled(String),
}

/// Map a configured level name to a `Level`, defaulting to INFO
pub fn parse_level(level: &str) -> Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Build the filter: `RUST_LOG` if present, otherwise the configured level
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => {
            EnvFilter::try_new(directives).map_err(|e| LoggingError::Filter(e.to_string()))
        }
        _ => Ok(EnvFilter::new(parse_level(&config.level).to_string())),
    }
}

/// Install the global subscriber
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_filter(config)?;
    let builder = FmtSubscriber::builder().with_env_filter(filter);

    let result = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };

    result.map_err(|e| LoggingError::AlreadyInstalled(e.to_string()))
}
