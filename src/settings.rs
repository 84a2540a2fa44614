//! File-backed settings. Environment variables override these during
//! [`LedgerConfig::resolve`](crate::config::LedgerConfig::resolve).

use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub alerts: AlertSettings,
    pub fx: FxSettings,
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Database file; `":memory:"` for a throwaway database.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub deductible_near_pct: Decimal,
    pub deductible_near_abs: Decimal,
    pub due_soon_days: u32,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            deductible_near_pct: dec!(0.10),
            deductible_near_abs: dec!(20000),
            due_soon_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FxSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub lookback_days: u32,
}

impl Default for FxSettings {
    fn default() -> Self {
        Self {
            base_url: crate::fx::boi::DEFAULT_BOI_URL.to_string(),
            timeout_secs: 15,
            max_attempts: 3,
            lookback_days: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Cron expression with a seconds field, evaluated in UTC.
    pub sweep_schedule: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            sweep_schedule: "0 0 6 * * *".to_string(),
        }
    }
}

impl Settings {
    /// Default settings file location (`<config dir>/caseledger/settings.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("caseledger").join("settings.toml"))
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }
}
