//! Runtime configuration: TOML settings overlaid with environment variables.

pub(crate) mod helpers;
mod ledger;

pub use ledger::{AlertConfig, DatabaseConfig, FxConfig, LedgerConfig, SchedulerConfig};

use crate::error::ConfigError;

/// `CASELEDGER_LOG_JSON`: emit JSON log lines instead of the human format.
pub fn json_logging_enabled() -> Result<bool, ConfigError> {
    helpers::parse_bool_env("CASELEDGER_LOG_JSON", false)
}
