//! Job and provider configuration.
//!
//! Plain serde structs with kebab-case keys. Loading them (files, flags,
//! environment) is left to the embedding binary; this module only defines the
//! shape, the defaults and [`JobConfig::validate`].

use std::path::PathBuf;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::Credentials;
use crate::grid::GridConfig;
use crate::shared::default_lot_size;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required field `{0}`")]
    Missing(&'static str),

    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Result type alias for configuration checks
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Exchange account a job trades with.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProviderConfig {
    pub name: String,
    pub key: String,
    pub secret: String,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl ProviderConfig {
    /// Signing credentials, `None` when key or secret is blank.
    pub fn credentials(&self) -> Option<Credentials> {
        let credentials = Credentials::new(self.key.clone(), self.secret.clone());
        (!credentials.is_empty()).then_some(credentials)
    }
}

/// Which notifications a job sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AlertConfig {
    /// Notify placed buy orders
    pub buy: bool,
    /// Notify placed sell orders
    pub sell: bool,
    /// Minutes without activity before an idle alert, 0 disables
    pub idle: u32,
    /// Hours of the day (UTC) at which the daily summary is sent
    pub summary: Vec<u32>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            buy: true,
            sell: true,
            idle: 0,
            summary: Vec::new(),
        }
    }
}

/// One grid job: a market, its strategy parameters and its alerts.
///
/// ```json
/// {
///   "symbol": "BTC_ETH",
///   "primary": "BTC",
///   "volume": "0.05",
///   "step": "0.0001",
///   "fee": "0.25",
///   "enabled": true,
///   "provider": "main",
///   "alerts": { "idle": 120, "summary": [8, 20] }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct JobConfig {
    /// Pair symbol as the exchange spells it, e.g. `BTC_ETH`
    pub symbol: String,
    /// Quote asset of the pair, e.g. `BTC`
    pub primary: String,
    /// Root directory of the filled-order records
    pub order_dir: PathBuf,
    /// Quote amount spent per buy
    pub volume: Decimal,
    pub step: Decimal,
    pub buy_step: Option<Decimal>,
    pub sell_step: Option<Decimal>,
    /// Trading fee in percent
    pub fee: Decimal,
    /// Overrides the lot step published by the exchange
    pub lot_size: Option<Decimal>,
    pub enabled: bool,
    /// Keep a local order book of the market channel
    pub watch_market: bool,
    pub alerts: AlertConfig,
    /// Name of the [`ProviderConfig`] to trade with
    pub provider: String,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            symbol: String::new(),
            primary: String::new(),
            order_dir: PathBuf::from("data").join("orders"),
            volume: Decimal::ZERO,
            step: Decimal::ZERO,
            buy_step: None,
            sell_step: None,
            fee: Decimal::ZERO,
            lot_size: None,
            enabled: false,
            watch_market: false,
            alerts: AlertConfig::default(),
            provider: String::new(),
        }
    }
}

impl JobConfig {
    /// Base asset of the pair: the symbol without the quote asset and without
    /// the first occurrence of each separator kind (`BTC_ETH` with primary
    /// `BTC` gives `ETH`).
    pub fn secondary(&self) -> String {
        ['_', '-', '/']
            .into_iter()
            .fold(self.symbol.replacen(&self.primary, "", 1), |base, sep| {
                base.replacen(sep, "", 1)
            })
    }

    /// Strategy parameters, with the lot step resolved from the configured
    /// override, then the exchange's value, then the default.
    pub fn grid(&self, exchange_lot: Option<Decimal>) -> GridConfig {
        GridConfig {
            step: self.step,
            buy_step: self.buy_step,
            sell_step: self.sell_step,
            volume: self.volume,
            fee_percent: self.fee,
            lot_size: self
                .lot_size
                .or(exchange_lot)
                .filter(|lot| *lot > Decimal::ZERO)
                .unwrap_or_else(default_lot_size),
        }
    }

    /// Check the fields a job cannot run without.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::Missing("symbol"));
        }
        if self.primary.trim().is_empty() {
            return Err(ConfigError::Missing("primary"));
        }
        if !self.symbol.contains(&self.primary) {
            return Err(ConfigError::Invalid {
                field: "primary",
                reason: format!("{} is not part of {}", self.primary, self.symbol),
            });
        }
        if self.secondary().is_empty() {
            return Err(ConfigError::Invalid {
                field: "symbol",
                reason: format!("no base asset left in {}", self.symbol),
            });
        }
        if self.provider.trim().is_empty() {
            return Err(ConfigError::Missing("provider"));
        }

        positive("volume", self.volume)?;
        positive("step", self.step)?;
        for (field, step) in [("buy-step", self.buy_step), ("sell-step", self.sell_step)] {
            if let Some(step) = step {
                if step < Decimal::ZERO {
                    return Err(ConfigError::Invalid {
                        field,
                        reason: format!("{} is negative", step),
                    });
                }
            }
        }
        if self.fee < Decimal::ZERO || self.fee >= Decimal::ONE_HUNDRED {
            return Err(ConfigError::Invalid {
                field: "fee",
                reason: format!("{} is not a percentage below 100", self.fee),
            });
        }
        if let Some(lot) = self.lot_size {
            positive("lot-size", lot)?;
        }
        if let Some(hour) = self.alerts.summary.iter().find(|h| **h > 23) {
            return Err(ConfigError::Invalid {
                field: "alerts",
                reason: format!("summary hour {} out of range", hour),
            });
        }
        Ok(())
    }
}

fn positive(field: &'static str, value: Decimal) -> ConfigResult<()> {
    if value <= Decimal::ZERO {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{} is not positive", value),
        });
    }
    Ok(())
}
