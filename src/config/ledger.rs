use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::config::helpers::{
    optional_env, parse_decimal_env, parse_string_env, parse_u32_env, parse_u64_env,
};
use crate::error::ConfigError;
use crate::settings::Settings;

const MEMORY_PATH: &str = ":memory:";

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `None` opens an in-memory database.
    pub path: Option<PathBuf>,
}

/// Thresholds for the daily alert sweep.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Fraction of the total deductible below which a case is "near" exhaustion.
    pub deductible_near_pct: Decimal,
    /// Absolute ILS floor below which a case is "near" exhaustion.
    pub deductible_near_abs: Decimal,
    pub due_soon_days: u32,
}

impl Default for AlertConfig {
    fn default() -> Self {
        let settings = crate::settings::AlertSettings::default();
        Self {
            deductible_near_pct: settings.deductible_near_pct,
            deductible_near_abs: settings.deductible_near_abs,
            due_soon_days: settings.due_soon_days,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FxConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub lookback_days: u32,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub expression: String,
    pub schedule: cron::Schedule,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub database: DatabaseConfig,
    pub alerts: AlertConfig,
    pub fx: FxConfig,
    pub scheduler: SchedulerConfig,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("caseledger"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("caseledger.db")
}

fn resolve_db_path(raw: Option<String>) -> Option<PathBuf> {
    match raw {
        Some(value) if value == MEMORY_PATH => None,
        Some(value) => Some(PathBuf::from(value)),
        None => Some(default_db_path()),
    }
}

fn validate_near_pct(value: Decimal) -> Result<Decimal, ConfigError> {
    if value < Decimal::ZERO || value > Decimal::ONE {
        return Err(ConfigError::InvalidValue {
            key: "ALERT_DEDUCTIBLE_NEAR_PCT".to_string(),
            message: format!("must be between 0 and 1, got {value}"),
        });
    }
    Ok(value)
}

fn validate_near_abs(value: Decimal) -> Result<Decimal, ConfigError> {
    if value < Decimal::ZERO {
        return Err(ConfigError::InvalidValue {
            key: "ALERT_DEDUCTIBLE_NEAR_ABS".to_string(),
            message: format!("must not be negative, got {value}"),
        });
    }
    Ok(value)
}

fn validate_base_url(raw: String) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        return Err(ConfigError::InvalidValue {
            key: "FX_BASE_URL".to_string(),
            message: format!("must be an http(s) URL, got '{trimmed}'"),
        });
    }
    Ok(trimmed.to_string())
}

fn parse_schedule(expression: String) -> Result<SchedulerConfig, ConfigError> {
    let schedule =
        cron::Schedule::from_str(&expression).map_err(|e| ConfigError::InvalidValue {
            key: "SWEEP_SCHEDULE".to_string(),
            message: format!("invalid cron expression '{expression}': {e}"),
        })?;
    Ok(SchedulerConfig {
        expression,
        schedule,
    })
}

impl LedgerConfig {
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let db_path = optional_env("CASELEDGER_DB_PATH")?.or_else(|| settings.database.path.clone());

        let max_attempts = parse_u32_env("FX_MAX_ATTEMPTS", settings.fx.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "FX_MAX_ATTEMPTS".to_string(),
                message: "at least one attempt is required".to_string(),
            });
        }

        Ok(Self {
            database: DatabaseConfig {
                path: resolve_db_path(db_path),
            },
            alerts: AlertConfig {
                deductible_near_pct: validate_near_pct(parse_decimal_env(
                    "ALERT_DEDUCTIBLE_NEAR_PCT",
                    settings.alerts.deductible_near_pct,
                )?)?,
                deductible_near_abs: validate_near_abs(parse_decimal_env(
                    "ALERT_DEDUCTIBLE_NEAR_ABS",
                    settings.alerts.deductible_near_abs,
                )?)?,
                due_soon_days: parse_u32_env("ALERT_DUE_SOON_DAYS", settings.alerts.due_soon_days)?,
            },
            fx: FxConfig {
                base_url: validate_base_url(parse_string_env(
                    "FX_BASE_URL",
                    settings.fx.base_url.clone(),
                )?)?,
                timeout: Duration::from_secs(parse_u64_env(
                    "FX_TIMEOUT_SECS",
                    settings.fx.timeout_secs,
                )?),
                max_attempts,
                lookback_days: parse_u32_env("FX_LOOKBACK_DAYS", settings.fx.lookback_days)?,
            },
            scheduler: parse_schedule(parse_string_env(
                "SWEEP_SCHEDULE",
                settings.scheduler.sweep_schedule.clone(),
            )?)?,
        })
    }
}
