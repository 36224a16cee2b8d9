//! Logging and tracing setup
//!
//! The balancer only emits `tracing` events; the host process decides whether
//! to install this subscriber or its own.

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable selecting the log output format (`json` or `pretty`)
pub const LOG_FORMAT_ENV: &str = "AFFINITY_LOG_FORMAT";

/// Output format for the fmt layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// Resolve the format from [`LOG_FORMAT_ENV`], defaulting to JSON
    pub fn from_env() -> Self {
        Self::from_name(&std::env::var(LOG_FORMAT_ENV).unwrap_or_else(|_| "json".to_string()))
    }

    fn from_name(name: &str) -> Self {
        match name {
            "pretty" => Self::Pretty,
            _ => Self::Json,
        }
    }
}

/// Initialize the tracing/logging subsystem
pub fn init_tracing() -> Result<()> {
    let format = LogFormat::from_env();

    // Use JSON format for structured logging in production
    let json_layer = (format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
    });

    // Pretty format for development
    let pretty_layer = (format == LogFormat::Pretty).then(|| {
        fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    info!(format = ?format, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_names() {
        assert_eq!(LogFormat::from_name("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_name("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_name("anything-else"), LogFormat::Json);
    }

    #[test]
    fn test_init_tracing_installs_once() {
        assert!(init_tracing().is_ok());
        // A second global subscriber is refused rather than silently replaced
        assert!(init_tracing().is_err());
    }
}
