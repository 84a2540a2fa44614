use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::ConfigError;

/// Read an env var, treating unset and blank the same.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value is not valid UTF-8".to_string(),
        }),
    }
}

pub(crate) fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    optional_env(key)?.map_or(Ok(default), |raw| parse_bool(key, &raw))
}

pub(crate) fn parse_string_env(key: &str, default: String) -> Result<String, ConfigError> {
    Ok(optional_env(key)?.unwrap_or(default))
}

pub(crate) fn parse_decimal(key: &str, raw: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(raw).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected a decimal, got '{raw}': {e}"),
    })
}

pub(crate) fn parse_decimal_env(key: &str, default: Decimal) -> Result<Decimal, ConfigError> {
    optional_env(key)?.map_or(Ok(default), |raw| parse_decimal(key, &raw))
}

pub(crate) fn parse_u32_env(key: &str, default: u32) -> Result<u32, ConfigError> {
    optional_env(key)?.map_or(Ok(default), |raw| {
        raw.parse::<u32>().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a non-negative integer, got '{raw}': {e}"),
        })
    })
}

pub(crate) fn parse_u64_env(key: &str, default: u64) -> Result<u64, ConfigError> {
    optional_env(key)?.map_or(Ok(default), |raw| {
        raw.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a non-negative integer, got '{raw}': {e}"),
        })
    })
}
