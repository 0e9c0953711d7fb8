//! Logging system configuration and initialization
//!
//! This module provides the logging setup with:
//! - Console output and/or daily-rolling file output
//! - Optional structured JSON format for files
//! - `RUST_LOG` override of the configured level
//! - Local-time timestamps

#![allow(clippy::uninlined_format_args)]

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use once_cell::sync::Lazy;
use tracing::{Subscriber, info};
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    EnvFilter, Registry,
    Layer,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "feed-harvester.log";

// Keeps the non-blocking file writers alive for the life of the process
static LOG_GUARDS: Lazy<Mutex<Vec<WorkerGuard>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Timestamps in the machine's local timezone
struct LocalTimeFormatter;

impl FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f %:z"))
    }
}

/// Build the filter: `RUST_LOG` wins, otherwise the configured level with
/// chatty dependencies held back unless tracing everything.
pub fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut directives = vec![config.level.clone()];
        if !config.level.to_lowercase().contains("trace") {
            directives.extend(
                ["reqwest=info", "hyper=warn", "hyper_util=warn", "h2=warn", "html5ever=warn", "selectors=warn", "chromiumoxide=warn", "tungstenite=warn"]
                    .iter()
                    .map(|d| d.to_string()),
            );
        }
        directives.push(format!("feed_harvester={}", config.level));
        EnvFilter::new(directives.join(","))
    })
}

/// Initialize logging with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default())
}

/// Initialize logging with custom configuration
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(config);
    let registry = Registry::default().with(env_filter);

    match (config.file_output, config.console_output) {
        (true, console) => {
            let file_writer = open_file_writer(&config.log_dir)?;

            if config.json_format {
                let file_layer = fmt::Layer::new()
                    .json()
                    .with_writer(file_writer)
                    .with_timer(LocalTimeFormatter)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false);
                registry
                    .with(file_layer)
                    .with(console.then(console_layer))
                    .try_init()?;
            } else {
                let file_layer = fmt::Layer::new()
                    .with_writer(file_writer)
                    .with_timer(LocalTimeFormatter)
                    .with_target(false)
                    .with_ansi(false);
                registry
                    .with(file_layer)
                    .with(console.then(console_layer))
                    .try_init()?;
            }
        }
        (false, true) => {
            registry.with(console_layer()).try_init()?;
        }
        (false, false) => {
            return Err(anyhow!("No logging output configured"));
        }
    }

    info!("Logging system initialized");
    info!("Log level: {}", config.level);
    if config.file_output {
        info!("Log directory: {:?}", config.log_dir);
    }
    Ok(())
}

/// Stdout layer, boxed so it stacks on either file layer
fn console_layer<S>() -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::Layer::new()
        .with_writer(std::io::stdout)
        .with_timer(LocalTimeFormatter)
        .with_target(false)
        .boxed()
}

fn open_file_writer(log_dir: &Path) -> Result<non_blocking::NonBlocking> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", log_dir, e))?;

    let appender = rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = non_blocking(appender);
    LOG_GUARDS
        .lock()
        .map_err(|_| anyhow!("Log guard registry poisoned"))?
        .push(guard);
    Ok(writer)
}

/// Log system information for diagnostics
pub fn log_system_info() {
    info!("=== Feed Harvester ===");
    info!("Application version: {}", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {}", std::env::consts::OS);
    if let Ok(current_dir) = std::env::current_dir() {
        info!("Working directory: {:?}", current_dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.console_output);
        assert!(!config.file_output);
    }

    #[test]
    fn test_no_outputs_is_an_error() {
        let config = LoggingConfig {
            console_output: false,
            file_output: false,
            ..LoggingConfig::default()
        };
        assert!(init_logging_with_config(&config).is_err());
    }

    // The only test that installs the global subscriber
    #[test]
    fn test_json_file_with_console_initializes() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            json_format: true,
            console_output: true,
            file_output: true,
            log_dir: dir.path().join("logs"),
            ..LoggingConfig::default()
        };

        assert!(init_logging_with_config(&config).is_ok());
        assert!(dir.path().join("logs").is_dir());
    }

    #[test]
    fn test_file_writer_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("nested").join("logs");
        assert!(open_file_writer(&log_dir).is_ok());
        assert!(log_dir.is_dir());
    }
}
