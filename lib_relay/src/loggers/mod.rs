//! # Logging Setup
//!
//! Configures the global `tracing` subscriber for the relay binaries:
//! - a human-readable, ANSI-colored console layer;
//! - a JSON layer on a daily rolling file in `log_dir`;
//! - an `EnvFilter` where `RUST_LOG` overrides the configured level.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Where and how much to log.
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Prefix of the rolling log files.
    pub app_name: String,
    /// Directory for the rolling log files; created if missing.
    pub log_dir: PathBuf,
    /// Default filter directive, e.g. `info` or `lib_relay=debug,info`.
    pub level: String,
}

/// Builds the filter: `RUST_LOG` if set and valid, else `level`, else `info`.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// # Setup Logging
///
/// Installs the global subscriber. The returned guard flushes the file
/// writer when dropped and must be kept alive for the life of the process.
pub fn setup_logging(options: &LoggingOptions) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&options.log_dir)
        .with_context(|| format!("creating log directory {}", options.log_dir.display()))?;

    let file_appender = rolling::daily(&options.log_dir, format!("{}.log", options.app_name));
    let (writer, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer().with_ansi(false).with_writer(writer).json();

    tracing_subscriber::registry()
        .with(build_filter(&options.level))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("installing the global tracing subscriber")?;

    tracing::info!("Logging initialized with level: {}", options.level);
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_creates_the_log_directory() {
        let temp = tempfile::tempdir().unwrap();
        let log_dir = temp.path().join("nested").join("logs");
        let options = LoggingOptions {
            app_name: "relay_test".to_string(),
            log_dir: log_dir.clone(),
            level: "debug".to_string(),
        };

        // Another test in this binary may have installed a subscriber already;
        // the directory is created either way.
        let _guard = setup_logging(&options);
        assert!(log_dir.is_dir());
    }

    #[test]
    fn invalid_level_falls_back() {
        let filter = build_filter("[[not a directive");
        assert!(!filter.to_string().is_empty());
    }
}
