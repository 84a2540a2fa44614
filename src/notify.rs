//! Outbound delivery of alert notifications.
//!
//! Notifications are persisted before delivery; a sink failure is logged by
//! the caller and never undoes ledger state.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::db::{NotificationRecord, Severity};
use crate::error::NotifyError;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &NotificationRecord) -> Result<(), NotifyError>;
}

/// Writes notifications to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &NotificationRecord) -> Result<(), NotifyError> {
        let case_id = notification
            .case_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        match notification.severity {
            Severity::Info => info!(
                kind = notification.notification_type.as_str(),
                case_id = %case_id,
                title = %notification.title,
                "{}",
                notification.message
            ),
            Severity::Warning | Severity::Danger => warn!(
                kind = notification.notification_type.as_str(),
                severity = notification.severity.as_str(),
                case_id = %case_id,
                title = %notification.title,
                "{}",
                notification.message
            ),
        }
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn deliver(&self, _notification: &NotificationRecord) -> Result<(), NotifyError> {
        Ok(())
    }
}
