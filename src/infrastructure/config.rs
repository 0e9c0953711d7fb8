//! Configuration infrastructure
//!
//! Layered loading with the `config` crate:
//! 1. Built-in defaults (the `defaults` module below)
//! 2. Optional `config/default.toml` next to the working directory
//! 3. Optional user file passed on the command line
//! 4. Environment overrides `FEED_HARVESTER__SECTION__KEY`

#![allow(clippy::uninlined_format_args)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::domain::SourceConfig;
use crate::infrastructure::parsing::ParsingConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Sources in processing order
    pub sources: Vec<SourceConfig>,
    pub http: HttpConfig,
    pub browser: BrowserConfig,
    pub pacing: PacingConfig,
    pub filter: FilterConfig,
    pub parsing: ParsingConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
    pub budget: BudgetConfig,
    pub logging: LoggingConfig,
}

/// Plain HTTP retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Browser-like identity sent with every request
    pub user_agent: String,

    /// Per-request timeout in seconds
    pub timeout_seconds: u64,

    /// Attempt ceiling for transient (connect/TLS) failures
    pub max_attempts: u32,

    /// CSS selector whose presence marks a CAPTCHA wall
    pub captcha_selector: String,
}

/// Driven browser settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,

    /// Extra Chromium switches, appended to the anti-fingerprinting defaults
    pub extra_args: Vec<String>,

    /// Selector whose presence marks a login wall
    pub login_wall_selector: String,

    /// Number of scroll-and-wait cycles before extraction
    pub scroll_cycles: u32,
}

/// Deliberate wait points, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub retry_delay_ms: u64,
    pub pre_parse_delay_ms: u64,
    pub render_wait_ms: u64,
    pub login_check_wait_ms: u64,
    pub login_poll_interval_ms: u64,
    pub scroll_wait_ms: u64,
    pub detail_wait_ms: u64,
    pub dismiss_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Global block-list, replaced per source by `SourceConfig::blocklist`
    pub blocklist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Raw items scanned per requested record
    pub overscan_factor: usize,

    /// Broadcast capacity for pipeline events
    pub event_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one CSV file per source
    pub data_dir: PathBuf,
}

/// How the ledger decides whether a task is affordable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffordabilityRule {
    /// `remaining - estimate >= 0`; the actual charge may still overshoot
    RemainingCoversEstimate,
    /// Remaining budget must cover the larger of estimate and actual cost
    StrictCeiling,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub enabled: bool,
    pub initial_budget: f64,
    pub alert_threshold: f64,
    pub top_up_amount: f64,
    /// Day of month on which the top-up is applied
    pub top_up_day: u32,
    pub rule: AffordabilityRule,
    pub ledger_file: PathBuf,
    pub balance_file: PathBuf,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Directory for rolling log files
    pub log_dir: PathBuf,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::USER_AGENT.to_string(),
            timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            max_attempts: defaults::MAX_FETCH_ATTEMPTS,
            captcha_selector: defaults::CAPTCHA_SELECTOR.to_string(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            window_width: 1920,
            window_height: 1080,
            extra_args: Vec::new(),
            login_wall_selector: defaults::LOGIN_WALL_SELECTOR.to_string(),
            scroll_cycles: defaults::SCROLL_CYCLES,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: defaults::RETRY_DELAY_MS,
            pre_parse_delay_ms: defaults::PRE_PARSE_DELAY_MS,
            render_wait_ms: defaults::RENDER_WAIT_MS,
            login_check_wait_ms: defaults::LOGIN_CHECK_WAIT_MS,
            login_poll_interval_ms: defaults::LOGIN_POLL_INTERVAL_MS,
            scroll_wait_ms: defaults::SCROLL_WAIT_MS,
            detail_wait_ms: defaults::DETAIL_WAIT_MS,
            dismiss_wait_ms: defaults::DISMISS_WAIT_MS,
        }
    }
}

impl PacingConfig {
    /// Every wait set to zero, for tests and dry runs
    pub fn immediate() -> Self {
        Self {
            retry_delay_ms: 0,
            pre_parse_delay_ms: 0,
            render_wait_ms: 0,
            login_check_wait_ms: 0,
            login_poll_interval_ms: 0,
            scroll_wait_ms: 0,
            detail_wait_ms: 0,
            dismiss_wait_ms: 0,
        }
    }

    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub const fn pre_parse_delay(&self) -> Duration {
        Duration::from_millis(self.pre_parse_delay_ms)
    }

    pub const fn render_wait(&self) -> Duration {
        Duration::from_millis(self.render_wait_ms)
    }

    pub const fn login_check_wait(&self) -> Duration {
        Duration::from_millis(self.login_check_wait_ms)
    }

    pub const fn login_poll_interval(&self) -> Duration {
        Duration::from_millis(self.login_poll_interval_ms)
    }

    pub const fn scroll_wait(&self) -> Duration {
        Duration::from_millis(self.scroll_wait_ms)
    }

    pub const fn detail_wait(&self) -> Duration {
        Duration::from_millis(self.detail_wait_ms)
    }

    pub const fn dismiss_wait(&self) -> Duration {
        Duration::from_millis(self.dismiss_wait_ms)
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            blocklist: defaults::BLOCKLIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            overscan_factor: defaults::OVERSCAN_FACTOR,
            event_capacity: defaults::EVENT_CAPACITY,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(defaults::DATA_DIR),
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_budget: defaults::INITIAL_BUDGET,
            alert_threshold: defaults::ALERT_THRESHOLD,
            top_up_amount: defaults::TOP_UP_AMOUNT,
            top_up_day: defaults::TOP_UP_DAY,
            rule: AffordabilityRule::RemainingCoversEstimate,
            ledger_file: Path::new(defaults::DATA_DIR).join("cost_log.csv"),
            balance_file: Path::new(defaults::DATA_DIR).join("budget.txt"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl AppConfig {
    /// Load defaults, `config/default.toml` and `path` (all optional), then
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(defaults::ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        info!("Loaded configuration ({} sources)", config.sources.len());
        Ok(config)
    }

    /// Parse a TOML document directly
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.max_attempts == 0 {
            return Err(validation("http.max_attempts must be greater than 0"));
        }
        if self.pipeline.overscan_factor == 0 {
            return Err(validation("pipeline.overscan_factor must be greater than 0"));
        }
        if self.budget.enabled && !(1..=28).contains(&self.budget.top_up_day) {
            return Err(validation("budget.top_up_day must be between 1 and 28"));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(validation("source name must not be empty"));
            }
            if source.limit == 0 {
                return Err(validation(&format!("source '{}' has a zero limit", source.name)));
            }
            if !seen.insert(source.key()) {
                return Err(validation(&format!("source '{}' is configured twice", source.key())));
            }
        }
        Ok(())
    }
}

fn validation(message: &str) -> ConfigError {
    ConfigError::Validation {
        message: message.to_string(),
    }
}

/// Default configuration values
pub mod defaults {
    /// Environment variable prefix
    pub const ENV_PREFIX: &str = "FEED_HARVESTER";

    pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/98.0.4758.102 Safari/537.36";

    /// Default request timeout in seconds
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 10;

    /// Attempt ceiling for transient fetch failures
    pub const MAX_FETCH_ATTEMPTS: u32 = 3;

    /// Fixed delay between fetch attempts
    pub const RETRY_DELAY_MS: u64 = 2000;

    /// Delay between a successful response and DOM inspection
    pub const PRE_PARSE_DELAY_MS: u64 = 2000;

    /// Initial render wait after navigation
    pub const RENDER_WAIT_MS: u64 = 10_000;

    /// Extra wait before probing for the login wall
    pub const LOGIN_CHECK_WAIT_MS: u64 = 5000;

    /// Interval for re-probing a login wall while suspended
    pub const LOGIN_POLL_INTERVAL_MS: u64 = 5000;

    pub const SCROLL_CYCLES: u32 = 5;
    pub const SCROLL_WAIT_MS: u64 = 3000;
    pub const DETAIL_WAIT_MS: u64 = 3000;
    pub const DISMISS_WAIT_MS: u64 = 2000;

    pub const CAPTCHA_SELECTOR: &str = "div.g-recaptcha";
    pub const LOGIN_WALL_SELECTOR: &str = "[data-e2e=\"top-login-button\"], button[data-e2e=\"login-button\"]";

    pub const BLOCKLIST: &[&str] = &["crypto", "advertisement", "promote", "sponsored"];

    /// Raw listing items scanned per requested record
    pub const OVERSCAN_FACTOR: usize = 2;

    pub const EVENT_CAPACITY: usize = 1024;

    pub const DATA_DIR: &str = "data";

    pub const INITIAL_BUDGET: f64 = 100.0;
    pub const ALERT_THRESHOLD: f64 = 20.0;
    pub const TOP_UP_AMOUNT: f64 = 100.0;
    pub const TOP_UP_DAY: u32 = 15;

    /// Default log level
    pub const LOG_LEVEL: &str = "info";
}
