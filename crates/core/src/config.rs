//! Configuration structures for the simulated brokerage.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration for a simulated brokerage instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Account configuration.
    pub account: AccountConfig,
    /// Fill model configuration.
    pub fill: FillConfig,
    /// Fee schedule.
    pub fees: FeeConfig,
    /// Buying power configuration.
    pub buying_power: BuyingPowerConfig,
    /// Brokerage model configuration.
    pub brokerage: BrokerageModelConfig,
}

impl Config {
    /// Parse a JSON document. Missing sections take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.account.initial_cash < 0.0 {
            return Err(Error::config("account.initial_cash must be >= 0"));
        }
        if self.fill.tick_size <= 0.0 {
            return Err(Error::config("fill.tick_size must be > 0"));
        }
        if let Some(p) = self.fill.max_volume_participation {
            if !(p > 0.0 && p <= 1.0) {
                return Err(Error::config(
                    "fill.max_volume_participation must be in (0, 1]",
                ));
            }
        }
        if self.buying_power.leverage < 1.0 {
            return Err(Error::config("buying_power.leverage must be >= 1"));
        }
        match self.fees {
            FeeConfig::PerOrder { fee } if fee < 0.0 => {
                Err(Error::config("fees.fee must be >= 0"))
            }
            FeeConfig::PerUnit { per_unit, minimum } if per_unit < 0.0 || minimum < 0.0 => {
                Err(Error::config("fees.per_unit and fees.minimum must be >= 0"))
            }
            FeeConfig::Bps { bps } if bps < 0.0 => Err(Error::config("fees.bps must be >= 0")),
            _ => Ok(()),
        }
    }
}

/// Account configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Account currency.
    pub currency: String,
    /// Starting cash.
    pub initial_cash: f64,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            initial_cash: 100_000.0,
        }
    }
}

/// Fill model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FillConfig {
    /// Slippage in ticks applied against market-priced fills.
    pub slippage_ticks: u32,
    /// Tick size (minimum price increment).
    pub tick_size: f64,
    /// Cap each fill to this fraction of the bar's volume. `None` fills in full.
    pub max_volume_participation: Option<f64>,
}

impl Default for FillConfig {
    fn default() -> Self {
        Self {
            slippage_ticks: 0,
            tick_size: 0.01,
            max_volume_participation: None,
        }
    }
}

impl FillConfig {
    /// Slippage as a price amount.
    pub fn slippage(&self) -> f64 {
        self.slippage_ticks as f64 * self.tick_size
    }
}

/// Fee schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schedule", rename_all = "snake_case")]
pub enum FeeConfig {
    /// Flat fee per order, charged once.
    PerOrder { fee: f64 },
    /// Fee per unit traded with a per-order minimum.
    PerUnit { per_unit: f64, minimum: f64 },
    /// Basis points of notional.
    Bps { bps: f64 },
}

impl Default for FeeConfig {
    fn default() -> Self {
        FeeConfig::PerOrder { fee: 1.0 }
    }
}

/// Buying power configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuyingPowerConfig {
    /// Maximum gross leverage (1.0 = cash account).
    pub leverage: f64,
}

impl Default for BuyingPowerConfig {
    fn default() -> Self {
        Self { leverage: 1.0 }
    }
}

/// Brokerage model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerageModelConfig {
    /// Veto fills while the market is closed.
    pub require_open_market: bool,
}

impl Default for BrokerageModelConfig {
    fn default() -> Self {
        Self {
            require_open_market: true,
        }
    }
}
