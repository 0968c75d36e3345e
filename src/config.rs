//! Configuration loading.
//!
//! Layered: defaults < `config.toml` < `FILINGBOT__*` environment variables.

use crate::error::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub price: PriceConfig,
}

impl Config {
    /// Load from a TOML file (optional) with environment overrides, e.g.
    /// `FILINGBOT__DATABASE__PATH=data/sim.db`.
    pub fn load(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("FILINGBOT").separator("__"))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

/// Quota guard settings. Two independent pools share the window mechanism.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Requests per window for anonymous (fingerprinted) callers.
    #[serde(default = "default_unauth_limit")]
    pub unauth_limit: u32,
    /// AI-feature calls per window for authenticated users.
    #[serde(default = "default_ai_limit")]
    pub ai_limit: u32,
    /// Fixed window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Soft cap on tracked identities before an eviction pass runs.
    #[serde(default = "default_max_identities")]
    pub max_identities: usize,
}

fn default_unauth_limit() -> u32 {
    20
}

fn default_ai_limit() -> u32 {
    100
}

fn default_window_secs() -> u64 {
    3600
}

fn default_max_identities() -> usize {
    10_000
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            unauth_limit: default_unauth_limit(),
            ai_limit: default_ai_limit(),
            window_secs: default_window_secs(),
            max_identities: default_max_identities(),
        }
    }
}

/// Paper trading engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Signals with |predicted return| below this percentage are rejected.
    #[serde(default = "default_min_predicted_return")]
    pub min_predicted_return_pct: Decimal,
    /// Scales confidence into an allocation fraction before the portfolio
    /// max-position cap applies.
    #[serde(default = "default_sizing_factor")]
    pub confidence_sizing_factor: Decimal,
    /// Flat commission charged at entry and again at exit.
    #[serde(default = "default_commission")]
    pub commission: Decimal,
    /// Open positions are force-closed after this many days.
    #[serde(default = "default_hold_period_days")]
    pub hold_period_days: i64,
}

fn default_min_predicted_return() -> Decimal {
    dec!(2.0)
}

fn default_sizing_factor() -> Decimal {
    dec!(0.15)
}

fn default_commission() -> Decimal {
    dec!(1.00)
}

fn default_hold_period_days() -> i64 {
    7
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            min_predicted_return_pct: default_min_predicted_return(),
            confidence_sizing_factor: default_sizing_factor(),
            commission: default_commission(),
            hold_period_days: default_hold_period_days(),
        }
    }
}

/// SQLite database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/filingbot.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Quote service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceConfig {
    #[serde(default = "default_price_url")]
    pub base_url: String,
    #[serde(default = "default_price_timeout")]
    pub timeout_secs: u64,
}

fn default_price_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_price_timeout() -> u64 {
    10
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            base_url: default_price_url(),
            timeout_secs: default_price_timeout(),
        }
    }
}
