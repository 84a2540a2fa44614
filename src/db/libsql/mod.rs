//! libSQL (embedded SQLite) backend.

mod ledger;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use ::libsql::{Builder, Connection, Value};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::Database;
use crate::db::libsql_migrations::SCHEMA;
use crate::error::DatabaseError;

/// libSQL-backed implementation of [`Database`].
///
/// In-memory databases hold a single shared connection, because every new
/// connection to `:memory:` would open an empty database.
pub struct LibSqlBackend {
    db: Arc<::libsql::Database>,
    shared: Option<Connection>,
}

impl LibSqlBackend {
    /// Open (or create) a database file on disk.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!(
                    "failed to create database dir {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("failed to open {}: {}", path.display(), e)))?;
        Ok(Self {
            db: Arc::new(db),
            shared: None,
        })
    }

    /// Open a throwaway in-memory database. Used by tests and dry runs.
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        Ok(Self {
            db: Arc::new(db),
            shared: Some(conn),
        })
    }

    pub(crate) async fn connect(&self) -> Result<Connection, DatabaseError> {
        if let Some(conn) = &self.shared {
            return Ok(conn.clone());
        }
        let conn = self
            .db
            .connect()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        conn.execute("PRAGMA busy_timeout = 5000", ()).await?;
        conn.execute("PRAGMA foreign_keys = ON", ()).await?;
        Ok(conn)
    }
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute_batch(SCHEMA)
            .await
            .map_err(|e| DatabaseError::Query(format!("migration failed: {}", e)))?;
        Ok(())
    }
}

// ==================== Row helpers ====================

pub(crate) fn get_text(row: &::libsql::Row, idx: i32) -> String {
    row.get::<String>(idx).unwrap_or_default()
}

pub(crate) fn get_opt_text(row: &::libsql::Row, idx: i32) -> Option<String> {
    match row.get_value(idx) {
        Ok(Value::Text(s)) => Some(s),
        _ => None,
    }
}

pub(crate) fn get_i64(row: &::libsql::Row, idx: i32) -> i64 {
    row.get::<i64>(idx).unwrap_or_default()
}

pub(crate) fn opt_text(value: Option<&str>) -> Value {
    match value {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

pub(crate) fn opt_text_owned(value: Option<String>) -> Value {
    match value {
        Some(s) => Value::Text(s),
        None => Value::Null,
    }
}

pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub(crate) fn fmt_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn opt_date(date: Option<NaiveDate>) -> Value {
    opt_text_owned(date.map(fmt_date))
}

pub(crate) fn opt_decimal(value: Option<Decimal>) -> Value {
    opt_text_owned(value.map(|d| d.to_string()))
}

pub(crate) fn opt_uuid(value: Option<Uuid>) -> Value {
    opt_text_owned(value.map(|id| id.to_string()))
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| DatabaseError::Serialization(format!("invalid timestamp '{}': {}", raw, e)))
}

pub(crate) fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| DatabaseError::Serialization(format!("invalid {} date '{}': {}", field, raw, e)))
}

pub(crate) fn parse_opt_date(
    raw: Option<String>,
    field: &str,
) -> Result<Option<NaiveDate>, DatabaseError> {
    raw.map(|value| parse_date(&value, field)).transpose()
}

pub(crate) fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, DatabaseError> {
    Decimal::from_str(raw.trim()).map_err(|e| {
        DatabaseError::Serialization(format!("invalid {} amount '{}': {}", field, raw, e))
    })
}

pub(crate) fn parse_opt_decimal(
    raw: Option<String>,
    field: &str,
) -> Result<Option<Decimal>, DatabaseError> {
    raw.map(|value| parse_decimal(&value, field)).transpose()
}

pub(crate) fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw)
        .map_err(|e| DatabaseError::Serialization(format!("invalid {} uuid: {}", field, e)))
}

/// Map SQLite uniqueness failures onto [`DatabaseError::Constraint`].
pub(crate) fn classify_write_error(err: DatabaseError) -> DatabaseError {
    match err {
        DatabaseError::LibSql(inner) => {
            let msg = inner.to_string();
            if msg.contains("UNIQUE constraint failed") {
                DatabaseError::Constraint(msg)
            } else {
                DatabaseError::Query(msg)
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use super::{parse_date, parse_decimal, parse_timestamp};

    #[test]
    fn parse_timestamp_accepts_rfc3339_and_sqlite_formats() {
        let a = parse_timestamp("2026-03-01T10:00:00+00:00").expect("rfc3339");
        let b = parse_timestamp("2026-03-01 10:00:00").expect("sqlite datetime");
        assert_eq!(a, b);
    }

    #[test]
    fn parse_decimal_keeps_exact_cents() {
        assert_eq!(parse_decimal("1105.65", "amount").expect("decimal"), dec!(1105.65));
        assert!(parse_decimal("12,00", "amount").is_err());
    }

    #[test]
    fn parse_date_rejects_garbage() {
        assert_eq!(
            parse_date("2025-01-01", "accrual_month").expect("date"),
            NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid")
        );
        assert!(parse_date("01/01/2025", "accrual_month").is_err());
    }
}
