//! Bank of Israel representative-rate client (SDMX-JSON).

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::FxConfig;
use crate::error::FxError;
use crate::fx::{FxRateSource, quantize_rate};

pub const DEFAULT_BOI_URL: &str = "https://api.boi.org.il/SDMX/v2/data/EXR/RER_USD_ILS";

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(4);

/// Delay before retry number `attempt` (1-based): 0.5s doubling, capped at 4s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    INITIAL_BACKOFF.saturating_mul(factor).min(MAX_BACKOFF)
}

pub struct BoiClient {
    http: reqwest::Client,
    base_url: String,
    max_attempts: u32,
}

impl BoiClient {
    pub fn new(config: &FxConfig) -> Result<Self, FxError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FxError::Transport {
                attempts: 0,
                message: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            max_attempts: config.max_attempts.max(1),
        })
    }

    async fn fetch_once(&self, date: NaiveDate) -> Result<Value, String> {
        let day = date.format("%Y-%m-%d").to_string();
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("startPeriod", day.as_str()),
                ("endPeriod", day.as_str()),
                ("format", "sdmx-json"),
            ])
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(format!("HTTP {}: {}", status, snippet));
        }
        response.json::<Value>().await.map_err(|e| e.to_string())
    }

    async fn fetch(&self, date: NaiveDate) -> Result<Value, FxError> {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match self.fetch_once(date).await {
                Ok(body) => return Ok(body),
                Err(message) => {
                    warn!(date = %date, attempt, error = %message, "BOI rate request failed");
                    last_error = message;
                }
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }
        Err(FxError::Transport {
            attempts: self.max_attempts,
            message: last_error,
        })
    }
}

#[async_trait]
impl FxRateSource for BoiClient {
    fn name(&self) -> &'static str {
        "BOI"
    }

    async fn rate_on(&self, date: NaiveDate) -> Result<Option<(Decimal, NaiveDate)>, FxError> {
        let body = self.fetch(date).await?;
        let parsed = parse_sdmx_rate(&body)?;
        debug!(date = %date, found = parsed.is_some(), "BOI rate fetched");
        Ok(parsed)
    }
}

/// Extract the last observation of the first series.
///
/// Missing datasets, series or observations mean "no quote" and yield `None`.
pub fn parse_sdmx_rate(data: &Value) -> Result<Option<(Decimal, NaiveDate)>, FxError> {
    let Some(series) = data
        .pointer("/dataSets/0/series")
        .and_then(Value::as_object)
        .and_then(|all| all.values().next())
    else {
        return Ok(None);
    };
    let Some(observations) = series.get("observations").and_then(Value::as_object) else {
        return Ok(None);
    };
    let Some(dates) = data
        .pointer("/structure/dimensions/observation/0/values")
        .and_then(Value::as_array)
    else {
        return Ok(None);
    };

    let Some((index, values)) = observations
        .iter()
        .filter_map(|(key, values)| key.parse::<usize>().ok().map(|idx| (idx, values)))
        .max_by_key(|(idx, _)| *idx)
    else {
        return Ok(None);
    };

    let raw_rate = match values.get(0) {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => return Ok(None),
    };
    let rate = Decimal::from_str(&raw_rate)
        .or_else(|_| Decimal::from_scientific(&raw_rate))
        .map_err(|e| FxError::Parse(format!("rate '{}': {}", raw_rate, e)))?;

    let Some(date_id) = dates.get(index).and_then(|entry| {
        entry
            .get("id")
            .or_else(|| entry.get("name"))
            .and_then(Value::as_str)
    }) else {
        return Ok(None);
    };
    let rate_date = NaiveDate::parse_from_str(date_id, "%Y-%m-%d")
        .map_err(|e| FxError::Parse(format!("date '{}': {}", date_id, e)))?;

    Ok(Some((quantize_rate(rate), rate_date)))
}
