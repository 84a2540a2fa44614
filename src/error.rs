//! Error types for the ledger engine and its collaborators.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::FeeEventType;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("failed to parse settings: {0}")]
    ParseError(String),

    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[cfg(feature = "libsql")]
    #[error("libsql error: {0}")]
    LibSql(#[from] libsql::Error),
}

/// Exchange-rate lookup failures.
#[derive(Debug, thiserror::Error)]
pub enum FxError {
    #[error("no USD/ILS rate found for {date} (searched back {searched_days} days)")]
    NoRate { date: NaiveDate, searched_days: u32 },

    #[error("FX request failed after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },

    #[error("unreadable FX response: {0}")]
    Parse(String),

    #[error("FX cache error: {0}")]
    Cache(#[from] DatabaseError),
}

/// Notification delivery failures. Never propagated into ledger writes.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Failures surfaced by mutating and read-side ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("amount must be greater than 0 (got {0})")]
    InvalidAmount(Decimal),

    #[error("quantity must be >= 1 (got {0})")]
    InvalidQuantity(i32),

    #[error("fee event type {} requires an amount override", .0.as_str())]
    MissingOverride(FeeEventType),

    #[error("either a USD or an ILS deductible must be provided")]
    MissingDeductible,

    #[error("invalid case input: {0}")]
    InvalidInput(String),

    #[error("case {0} not found")]
    CaseNotFound(Uuid),

    #[error("case with reference '{0}' already exists")]
    DuplicateCaseReference(String),

    #[error("notification {0} not found")]
    NotificationNotFound(Uuid),

    #[error(transparent)]
    FxLookupFailure(#[from] FxError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}
