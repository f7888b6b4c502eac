//! Market simulation configuration

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default price tick period in milliseconds
pub const DEFAULT_TICK_MS: u64 = 1500;

/// Default maximum per-tick price drift in basis points (300 = ±3%)
pub const DEFAULT_MAX_DRIFT_BP: i64 = 300;

/// Default cash balance granted to a newly registered account
pub const DEFAULT_STARTING_BALANCE: &str = "10000.00";

/// Configuration for the market simulation service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Price tick period in milliseconds
    pub tick_ms: u64,
    /// Maximum symmetric per-tick drift, in basis points of the current price
    pub max_drift_bp: i64,
    /// Lowest price a tick may produce
    #[serde(with = "rust_decimal::serde::float")]
    pub price_floor: Decimal,
    /// Cash balance granted on registration
    #[serde(with = "rust_decimal::serde::float")]
    pub starting_balance: Decimal,
    /// Default number of trade records returned by the history query
    pub history_limit: usize,
    /// Per-subscriber broadcast queue depth
    pub subscriber_buffer: usize,
    /// Milliseconds a trade may wait on its account lock before ServiceBusy
    pub lock_timeout_ms: u64,
    /// HTTP/WebSocket bind port
    pub port: u16,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            tick_ms: DEFAULT_TICK_MS,
            max_drift_bp: DEFAULT_MAX_DRIFT_BP,
            price_floor: Decimal::new(1, 2), // 0.01
            starting_balance: DEFAULT_STARTING_BALANCE.parse().unwrap_or(Decimal::ZERO),
            history_limit: 50,
            subscriber_buffer: 64,
            lock_timeout_ms: 2000,
            port: 3001,
        }
    }
}

impl MarketConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let config: MarketConfig =
            serde_yaml::from_str(&content).context("Failed to parse config YAML")?;
        Ok(config)
    }

    /// Tick period as a Duration
    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_ms)
    }

    /// Account lock acquisition budget as a Duration
    pub fn lock_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.lock_timeout_ms)
    }
}
