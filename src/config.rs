//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable support for API credentials. The config is validated once at
//! startup; the rest of the system only ever sees a valid struct.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Bounds enforced by [`Config::validate`].
const MIN_PRICE: f64 = 0.0001;
const MAX_PRICE: f64 = 100_000.0;
const MIN_GRIDS: usize = 2;
const MAX_GRIDS: usize = 1000;
const MAX_UNITS: u32 = 100_000_000;

/// Configuration errors, all fatal before the bot enters its run loop.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("OANDA credentials missing: set account.account_id / account.access_token or OANDA_ACCOUNT_ID / OANDA_ACCESS_TOKEN")]
    MissingCredentials,

    #[error("unknown environment '{0}' (expected 'practice' or 'live')")]
    UnknownEnvironment(String),

    #[error("invalid instrument name '{0}'")]
    InvalidInstrument(String),

    #[error("lower level ({lower}) must be less than upper level ({upper})")]
    InvalidRange { lower: f64, upper: f64 },

    #[error("price level {0} outside supported range")]
    PriceOutOfBounds(f64),

    #[error("number_of_grids ({0}) must be between {MIN_GRIDS} and {MAX_GRIDS}")]
    GridCountOutOfBounds(usize),

    #[error("units_per_trade ({0}) must be between 1 and {MAX_UNITS}")]
    UnitsOutOfBounds(u32),

    #[error("{name} ({value}) must be positive")]
    NonPositive { name: &'static str, value: f64 },

    #[error("check_interval_seconds must be at least 1")]
    ZeroInterval,
}

/// Broker environment selecting the API host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Practice,
    Live,
}

impl Environment {
    pub fn api_base_url(self) -> &'static str {
        match self {
            Environment::Practice => "https://api-fxpractice.oanda.com",
            Environment::Live => "https://api-fxtrade.oanda.com",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Practice => write!(f, "practice"),
            Environment::Live => write!(f, "live"),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub account: AccountConfig,
    pub trading: TradingConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Broker account credentials and environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default = "default_environment")]
    pub environment: Environment,
}

fn default_environment() -> Environment {
    Environment::Practice
}

/// Grid range and sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub instrument: String,
    pub lower_level: f64,
    pub upper_level: f64,
    pub number_of_grids: usize,
    pub units_per_trade: u32,
}

/// Account-level risk limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Halt once unrealized P&L reaches minus this many account-currency units.
    pub max_loss: f64,
    /// Halt once more than this many grid slots hold filled positions.
    pub max_open_positions: usize,
    /// Suppress new orders for the cycle when the spread is wider than this.
    pub max_spread_pips: f64,
    /// Halt when margin used exceeds this fraction of equity.
    pub margin_critical_ratio: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            max_loss: 50.0,
            max_open_positions: 10,
            max_spread_pips: 2.0,
            margin_critical_ratio: 0.5,
        }
    }
}

/// Polling cadence and HTTP behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub check_interval_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            check_interval_seconds: 60,
            request_timeout_seconds: 10,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file and validate it.
    ///
    /// Credentials fall back to `OANDA_ACCOUNT_ID` / `OANDA_ACCESS_TOKEN`
    /// environment variables when absent from the file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        let mut config: Config = serde_json::from_str(&contents)?;

        if config.account.account_id.is_none() {
            if let Ok(account_id) = std::env::var("OANDA_ACCOUNT_ID") {
                config.account.account_id = Some(account_id);
            }
        }
        if config.account.access_token.is_none() {
            if let Ok(token) = std::env::var("OANDA_ACCESS_TOKEN") {
                config.account.access_token = Some(token);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate field values; called once from [`Config::from_file`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.account.account_id.as_deref().unwrap_or("").is_empty()
            || self.account.access_token.as_deref().unwrap_or("").is_empty()
        {
            return Err(ConfigError::MissingCredentials);
        }

        let instrument = &self.trading.instrument;
        if instrument.len() < 3 || instrument.len() > 20 {
            return Err(ConfigError::InvalidInstrument(instrument.clone()));
        }

        let (lower, upper) = (self.trading.lower_level, self.trading.upper_level);
        for level in [lower, upper] {
            if !(MIN_PRICE..=MAX_PRICE).contains(&level) {
                return Err(ConfigError::PriceOutOfBounds(level));
            }
        }
        if lower >= upper {
            return Err(ConfigError::InvalidRange { lower, upper });
        }

        let grids = self.trading.number_of_grids;
        if !(MIN_GRIDS..=MAX_GRIDS).contains(&grids) {
            return Err(ConfigError::GridCountOutOfBounds(grids));
        }

        let units = self.trading.units_per_trade;
        if units == 0 || units > MAX_UNITS {
            return Err(ConfigError::UnitsOutOfBounds(units));
        }

        if self.risk.max_loss <= 0.0 {
            return Err(ConfigError::NonPositive {
                name: "risk.max_loss",
                value: self.risk.max_loss,
            });
        }
        if self.risk.max_spread_pips <= 0.0 {
            return Err(ConfigError::NonPositive {
                name: "risk.max_spread_pips",
                value: self.risk.max_spread_pips,
            });
        }
        if self.risk.margin_critical_ratio <= 0.0 {
            return Err(ConfigError::NonPositive {
                name: "risk.margin_critical_ratio",
                value: self.risk.margin_critical_ratio,
            });
        }

        if self.monitoring.check_interval_seconds == 0 {
            return Err(ConfigError::ZeroInterval);
        }

        Ok(())
    }
}
