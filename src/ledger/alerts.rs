//! Daily sweep: roll schedules forward, then raise de-duplicated alerts.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AlertConfig;
use crate::db::{
    CaseRecord, CaseStatus, Database, NotificationRecord, NotificationType,
    RetainerAccrualRecord, Severity,
};
use crate::error::LedgerError;
use crate::ledger::CaseFailure;
use crate::ledger::excess::excess_for_case;
use crate::ledger::money::quantize;
use crate::ledger::retainer::roll_forward_open_cases;
use crate::notify::NotificationSink;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub cases_scanned: usize,
    pub accruals_added: usize,
    pub notifications_sent: usize,
    pub failures: Vec<CaseFailure>,
}

struct Alert {
    notification_type: NotificationType,
    key: String,
    case_id: Uuid,
    title: String,
    message: String,
    severity: Severity,
}

/// Persist, deliver and log one alert unless its key was already used.
async fn emit(
    db: &dyn Database,
    sink: &dyn NotificationSink,
    alert: Alert,
) -> Result<bool, LedgerError> {
    if db.has_alert(alert.notification_type, &alert.key).await? {
        return Ok(false);
    }
    let notification = NotificationRecord {
        id: Uuid::new_v4(),
        case_id: Some(alert.case_id),
        notification_type: alert.notification_type,
        title: alert.title,
        message: alert.message,
        severity: alert.severity,
        is_read: false,
        created_at: Utc::now(),
    };
    db.create_notification(&notification).await?;
    if let Err(err) = sink.deliver(&notification).await {
        warn!(
            case_id = %alert.case_id,
            kind = alert.notification_type.as_str(),
            error = %err,
            "Notification delivery failed"
        );
    }
    db.record_alert(alert.notification_type, &alert.key, Some(alert.case_id))
        .await?;
    Ok(true)
}

async fn case_alerts(
    db: &dyn Database,
    sink: &dyn NotificationSink,
    config: &AlertConfig,
    case: &CaseRecord,
) -> Result<usize, LedgerError> {
    let mut sent = 0;

    if case.insurer_started
        && let Some(start) = case.insurer_start_date
    {
        let raised = emit(
            db,
            sink,
            Alert {
                notification_type: NotificationType::InsurerStartedPaying,
                key: format!("case:{}:insurer_started", case.id),
                case_id: case.id,
                title: "Insurer started paying".to_string(),
                message: format!(
                    "Case '{}': the insurer has been paying since {}.",
                    case.case_reference, start
                ),
                severity: Severity::Info,
            },
        )
        .await?;
        sent += usize::from(raised);
    }

    let remaining = excess_for_case(db, case).await?;
    let pct_threshold = quantize(case.deductible_ils_gross * config.deductible_near_pct);
    let abs_threshold = quantize(config.deductible_near_abs);
    if remaining < pct_threshold || remaining < abs_threshold {
        let raised = emit(
            db,
            sink,
            Alert {
                notification_type: NotificationType::DeductibleNearExhaustion,
                key: format!("case:{}:deductible_near", case.id),
                case_id: case.id,
                title: "Deductible nearly exhausted".to_string(),
                message: format!(
                    "Case '{}': {} ILS (gross) left of {} ILS.",
                    case.case_reference, remaining, case.deductible_ils_gross
                ),
                severity: Severity::Warning,
            },
        )
        .await?;
        sent += usize::from(raised);
    }

    Ok(sent)
}

async fn accrual_alerts(
    db: &dyn Database,
    sink: &dyn NotificationSink,
    accrual: &RetainerAccrualRecord,
    today: NaiveDate,
    due_soon_until: NaiveDate,
) -> Result<usize, LedgerError> {
    let month = accrual.accrual_month.format("%Y-%m");
    let mut sent = 0;

    if today <= accrual.due_date && accrual.due_date <= due_soon_until {
        let raised = emit(
            db,
            sink,
            Alert {
                notification_type: NotificationType::RetainerDueSoon,
                key: format!("accrual:{}:due_soon", accrual.id),
                case_id: accrual.case_id,
                title: "Retainer payment due soon".to_string(),
                message: format!(
                    "Retainer for {} is due by {} (net 60).",
                    month, accrual.due_date
                ),
                severity: Severity::Info,
            },
        )
        .await?;
        sent += usize::from(raised);
    }

    if accrual.due_date < today {
        let raised = emit(
            db,
            sink,
            Alert {
                notification_type: NotificationType::RetainerOverdue,
                key: format!("accrual:{}:overdue", accrual.id),
                case_id: accrual.case_id,
                title: "Retainer payment overdue".to_string(),
                message: format!(
                    "Retainer for {} was due by {} (net 60).",
                    month, accrual.due_date
                ),
                severity: Severity::Danger,
            },
        )
        .await?;
        sent += usize::from(raised);
    }

    Ok(sent)
}

/// One full pass over all open cases.
///
/// A failure on one case is recorded in the report and the sweep moves on.
pub async fn run_daily_sweep(
    db: &dyn Database,
    sink: &dyn NotificationSink,
    config: &AlertConfig,
    today: NaiveDate,
) -> Result<SweepReport, LedgerError> {
    let roll = roll_forward_open_cases(db, today).await?;
    let mut report = SweepReport {
        cases_scanned: roll.cases_scanned,
        accruals_added: roll.accruals_added,
        notifications_sent: 0,
        failures: roll.failures,
    };

    let open_cases = db.list_cases_by_status(CaseStatus::Open).await?;
    for case in &open_cases {
        match case_alerts(db, sink, config, case).await {
            Ok(sent) => report.notifications_sent += sent,
            Err(err) => {
                warn!(case_id = %case.id, error = %err, "Case alert evaluation failed");
                report.failures.push(CaseFailure::new(case, &err));
            }
        }
    }

    let by_id: HashMap<Uuid, &CaseRecord> = open_cases.iter().map(|c| (c.id, c)).collect();
    let due_soon_until = today + Duration::days(i64::from(config.due_soon_days));
    for accrual in db.list_unpaid_accruals().await? {
        let Some(case) = by_id.get(&accrual.case_id) else {
            continue;
        };
        match accrual_alerts(db, sink, &accrual, today, due_soon_until).await {
            Ok(sent) => report.notifications_sent += sent,
            Err(err) => {
                warn!(
                    case_id = %case.id,
                    accrual_id = %accrual.id,
                    error = %err,
                    "Accrual alert evaluation failed"
                );
                report.failures.push(CaseFailure::new(case, &err));
            }
        }
    }

    info!(
        cases_scanned = report.cases_scanned,
        accruals_added = report.accruals_added,
        notifications_sent = report.notifications_sent,
        failures = report.failures.len(),
        "Daily sweep complete"
    );
    Ok(report)
}

/// Newest first.
pub async fn list_notifications(
    db: &dyn Database,
    limit: i64,
) -> Result<Vec<NotificationRecord>, LedgerError> {
    Ok(db.list_notifications(limit.clamp(1, 500)).await?)
}

pub async fn mark_notification_read(db: &dyn Database, id: Uuid) -> Result<(), LedgerError> {
    if db.mark_notification_read(id).await? {
        Ok(())
    } else {
        Err(LedgerError::NotificationNotFound(id))
    }
}

#[cfg(all(test, feature = "libsql"))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use crate::config::AlertConfig;
    use crate::db::libsql::LibSqlBackend;
    use crate::db::{
        AlertStore, CaseRecord, CaseStatus, CaseStore, CaseType, Database, FxSource, LedgerBatch,
        NotificationRecord, NotificationType,
    };
    use crate::error::NotifyError;
    use crate::notify::NotificationSink;

    use super::run_daily_sweep;

    /// Counts delivery attempts and rejects every one.
    #[derive(Default)]
    struct RejectingSink {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl NotificationSink for RejectingSink {
        async fn deliver(&self, notification: &NotificationRecord) -> Result<(), NotifyError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(NotifyError::Delivery(format!(
                "endpoint unreachable for {}",
                notification.notification_type.as_str()
            )))
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn insurer_case() -> CaseRecord {
        CaseRecord {
            id: Uuid::new_v4(),
            case_reference: "sink-1".to_string(),
            case_name: None,
            case_type: CaseType::Court,
            status: CaseStatus::Open,
            open_date: date(2025, 1, 15),
            retainer_anchor_date: date(2025, 7, 1),
            branch_name: None,
            deductible_usd: None,
            fx_rate_usd_ils: None,
            fx_date_used: None,
            fx_source: FxSource::Imported,
            deductible_ils_gross: dec!(10000.00),
            insurer_started: true,
            insurer_start_date: Some(date(2025, 2, 1)),
            retainer_snapshot_ils_gross: None,
            retainer_snapshot_through_month: None,
            expenses_snapshot_ils_gross: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn delivery_failure_keeps_the_notification_and_the_alert_key() {
        let db = LibSqlBackend::new_memory().await.expect("memory db");
        db.run_migrations().await.expect("migrations");
        let case = insurer_case();
        db.insert_case(&case, &LedgerBatch::new(case.id))
            .await
            .expect("insert");
        let sink = RejectingSink::default();
        let config = AlertConfig::default();

        let first = run_daily_sweep(&db, &sink, &config, date(2025, 3, 1))
            .await
            .expect("sweep");
        assert!(first.failures.is_empty());
        assert!(first.notifications_sent >= 1);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), first.notifications_sent);

        let stored = db.list_notifications(50).await.expect("notifications");
        assert_eq!(stored.len(), first.notifications_sent);
        assert!(
            stored
                .iter()
                .any(|n| n.notification_type == NotificationType::InsurerStartedPaying)
        );
        assert!(
            db.has_alert(
                NotificationType::InsurerStartedPaying,
                &format!("case:{}:insurer_started", case.id)
            )
            .await
            .expect("alert lookup")
        );

        let rerun = run_daily_sweep(&db, &sink, &config, date(2025, 3, 1))
            .await
            .expect("sweep rerun");
        assert_eq!(rerun.notifications_sent, 0);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), first.notifications_sent);
    }
}
