use std::collections::HashSet;
use std::time::Duration;

use config::{Config, File, FileFormat};
pub use config::ConfigError;
use serde::Deserialize;

use crate::grid::{FeedConfig, GridConfig, GridError, GridResult, PaperExchangeInput, SupervisorConfig};

/// Main configuration struct
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
    /// Price feed polling
    #[serde(default)]
    pub feed: FeedSettings,
    /// Per-ticker supervisor timing
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    /// Paper exchange parameters
    #[serde(default)]
    pub paper: PaperSettings,
    /// One ladder per ticker
    pub grids: Vec<GridConfig>,
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize)]
pub struct FeedSettings {
    #[serde(default = "default_feed_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_feed_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_feed_interval_ms(),
            request_timeout_ms: default_feed_timeout_ms(),
            error_threshold: default_error_threshold(),
        }
    }
}

impl FeedSettings {
    pub fn to_feed_config(&self) -> FeedConfig {
        FeedConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            error_threshold: self.error_threshold,
        }
    }
}

fn default_feed_interval_ms() -> u64 {
    1000
}

fn default_feed_timeout_ms() -> u64 {
    5000
}

fn default_error_threshold() -> u32 {
    5
}

#[derive(Debug, Deserialize)]
pub struct SupervisorSettings {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_price_wait_timeout_ms")]
    pub price_wait_timeout_ms: u64,
    /// Relative distance to a level that triggers a reconciliation pass
    #[serde(default = "default_proximity_band")]
    pub proximity_band: f64,
    /// Ticks between forced full passes (0 disables)
    #[serde(default = "default_full_scan_every")]
    pub full_scan_every: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            price_wait_timeout_ms: default_price_wait_timeout_ms(),
            proximity_band: default_proximity_band(),
            full_scan_every: default_full_scan_every(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl SupervisorSettings {
    pub fn to_supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            price_wait_timeout: Duration::from_millis(self.price_wait_timeout_ms),
            proximity_band: self.proximity_band,
            full_scan_every: self.full_scan_every,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_price_wait_timeout_ms() -> u64 {
    5000
}

fn default_proximity_band() -> f64 {
    0.005
}

fn default_full_scan_every() -> u32 {
    30
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Deserialize)]
pub struct PaperSettings {
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
    #[serde(default = "default_paper_fee_rate")]
    pub fee_rate: f64,
}

impl Default for PaperSettings {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
            fee_rate: default_paper_fee_rate(),
        }
    }
}

impl PaperSettings {
    pub fn to_input(&self) -> PaperExchangeInput {
        PaperExchangeInput {
            initial_balance: self.initial_balance,
            fee_rate: self.fee_rate,
        }
    }
}

fn default_initial_balance() -> f64 {
    100_000.0
}

fn default_paper_fee_rate() -> f64 {
    0.001
}

impl Settings {
    /// Load settings from a configuration file
    pub fn new(config_path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(config_path))
            // Environment variables override the file
            // e.g. GRID_LOG__LEVEL=debug
            .add_source(config::Environment::with_prefix("GRID").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Parse settings from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// Check every grid and reject duplicate tickers
    pub fn validate(&self) -> GridResult<()> {
        if self.grids.is_empty() {
            return Err(GridError::InvalidConfig("no grids configured".into()));
        }

        let mut seen = HashSet::new();
        for grid in &self.grids {
            grid.validate()?;
            if !seen.insert(grid.ticker.as_str()) {
                return Err(GridError::InvalidConfig(format!(
                    "ticker {} configured twice",
                    grid.ticker
                )));
            }
        }

        if !(self.supervisor.proximity_band >= 0.0 && self.supervisor.proximity_band < 1.0) {
            return Err(GridError::InvalidConfig(
                "proximity_band must be in [0, 1)".into(),
            ));
        }

        Ok(())
    }

    pub fn tickers(&self) -> Vec<String> {
        self.grids.iter().map(|g| g.ticker.clone()).collect()
    }
}
