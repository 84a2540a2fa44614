use chrono::NaiveDate;
use libsql::{Connection, params};
use uuid::Uuid;

use crate::db::{
    ActivityRecord, ActivityStore, AlertStore, CaseRecord, CaseStatus, CaseStore, CaseType,
    ExpenseCategory, ExpensePayer, ExpenseRecord, FeeEventRecord, FeeEventType, FxRateRecord,
    FxRateStore, FxSource, LedgerBatch, LedgerStore, NotificationRecord, NotificationType,
    RetainerAccrualRecord, RetainerPaymentRecord, Severity,
};
use crate::error::DatabaseError;

use super::{
    LibSqlBackend, classify_write_error, fmt_date, fmt_ts, get_i64, get_opt_text, get_text,
    opt_date, opt_decimal, opt_text, opt_uuid, parse_date, parse_decimal, parse_opt_date,
    parse_opt_decimal, parse_timestamp, parse_uuid,
};

const CASE_COLUMNS: &str = "id, case_reference, case_name, case_type, status, open_date, \
     retainer_anchor_date, branch_name, deductible_usd, fx_rate_usd_ils, fx_date_used, fx_source, \
     deductible_ils_gross, insurer_started, insurer_start_date, retainer_snapshot_ils_gross, \
     retainer_snapshot_through_month, expenses_snapshot_ils_gross, created_at";

const EXPENSE_COLUMNS: &str = "id, case_id, supplier_name, amount_ils_gross, service_description, \
     demand_received_date, expense_date, category, payer, attachment_url, split_group_id, \
     is_split_part, created_at";

const ACCRUAL_COLUMNS: &str =
    "id, case_id, accrual_month, invoice_date, due_date, amount_ils_gross, is_paid";

const FEE_EVENT_COLUMNS: &str = "id, case_id, sequence, event_type, event_date, quantity, \
     amount_override_ils_gross, computed_amount_ils_gross, amount_covered_by_credit_ils_gross, \
     amount_due_cash_ils_gross, created_at";

fn parse_enum<T>(raw: &str, field: &str, parse: fn(&str) -> Option<T>) -> Result<T, DatabaseError> {
    parse(raw).ok_or_else(|| DatabaseError::Serialization(format!("invalid {} '{}'", field, raw)))
}

fn row_to_case_record(row: &libsql::Row) -> Result<CaseRecord, DatabaseError> {
    Ok(CaseRecord {
        id: parse_uuid(&get_text(row, 0), "cases.id")?,
        case_reference: get_text(row, 1),
        case_name: get_opt_text(row, 2),
        case_type: parse_enum(&get_text(row, 3), "case_type", CaseType::from_db_value)?,
        status: parse_enum(&get_text(row, 4), "case status", CaseStatus::from_db_value)?,
        open_date: parse_date(&get_text(row, 5), "open_date")?,
        retainer_anchor_date: parse_date(&get_text(row, 6), "retainer_anchor_date")?,
        branch_name: get_opt_text(row, 7),
        deductible_usd: parse_opt_decimal(get_opt_text(row, 8), "deductible_usd")?,
        fx_rate_usd_ils: parse_opt_decimal(get_opt_text(row, 9), "fx_rate_usd_ils")?,
        fx_date_used: parse_opt_date(get_opt_text(row, 10), "fx_date_used")?,
        fx_source: parse_enum(&get_text(row, 11), "fx_source", FxSource::from_db_value)?,
        deductible_ils_gross: parse_decimal(&get_text(row, 12), "deductible_ils_gross")?,
        insurer_started: get_i64(row, 13) != 0,
        insurer_start_date: parse_opt_date(get_opt_text(row, 14), "insurer_start_date")?,
        retainer_snapshot_ils_gross: parse_opt_decimal(
            get_opt_text(row, 15),
            "retainer_snapshot_ils_gross",
        )?,
        retainer_snapshot_through_month: parse_opt_date(
            get_opt_text(row, 16),
            "retainer_snapshot_through_month",
        )?,
        expenses_snapshot_ils_gross: parse_opt_decimal(
            get_opt_text(row, 17),
            "expenses_snapshot_ils_gross",
        )?,
        created_at: parse_timestamp(&get_text(row, 18))?,
    })
}

fn row_to_expense_record(row: &libsql::Row) -> Result<ExpenseRecord, DatabaseError> {
    Ok(ExpenseRecord {
        id: parse_uuid(&get_text(row, 0), "expenses.id")?,
        case_id: parse_uuid(&get_text(row, 1), "expenses.case_id")?,
        supplier_name: get_opt_text(row, 2),
        amount_ils_gross: parse_decimal(&get_text(row, 3), "expense")?,
        service_description: get_opt_text(row, 4),
        demand_received_date: parse_opt_date(get_opt_text(row, 5), "demand_received_date")?,
        expense_date: parse_date(&get_text(row, 6), "expense_date")?,
        category: parse_enum(
            &get_text(row, 7),
            "expense category",
            ExpenseCategory::from_db_value,
        )?,
        payer: parse_enum(&get_text(row, 8), "expense payer", ExpensePayer::from_db_value)?,
        attachment_url: get_opt_text(row, 9),
        split_group_id: get_opt_text(row, 10)
            .map(|value| parse_uuid(&value, "expenses.split_group_id"))
            .transpose()?,
        is_split_part: get_i64(row, 11) != 0,
        created_at: parse_timestamp(&get_text(row, 12))?,
    })
}

fn row_to_accrual_record(row: &libsql::Row) -> Result<RetainerAccrualRecord, DatabaseError> {
    Ok(RetainerAccrualRecord {
        id: parse_uuid(&get_text(row, 0), "retainer_accruals.id")?,
        case_id: parse_uuid(&get_text(row, 1), "retainer_accruals.case_id")?,
        accrual_month: parse_date(&get_text(row, 2), "accrual_month")?,
        invoice_date: parse_date(&get_text(row, 3), "invoice_date")?,
        due_date: parse_date(&get_text(row, 4), "due_date")?,
        amount_ils_gross: parse_decimal(&get_text(row, 5), "accrual")?,
        is_paid: get_i64(row, 6) != 0,
    })
}

fn row_to_payment_record(row: &libsql::Row) -> Result<RetainerPaymentRecord, DatabaseError> {
    Ok(RetainerPaymentRecord {
        id: parse_uuid(&get_text(row, 0), "retainer_payments.id")?,
        case_id: parse_uuid(&get_text(row, 1), "retainer_payments.case_id")?,
        payment_date: parse_date(&get_text(row, 2), "payment_date")?,
        amount_ils_gross: parse_decimal(&get_text(row, 3), "payment")?,
        created_at: parse_timestamp(&get_text(row, 4))?,
    })
}

fn row_to_fee_event_record(row: &libsql::Row) -> Result<FeeEventRecord, DatabaseError> {
    Ok(FeeEventRecord {
        id: parse_uuid(&get_text(row, 0), "fee_events.id")?,
        case_id: parse_uuid(&get_text(row, 1), "fee_events.case_id")?,
        sequence: get_i64(row, 2),
        event_type: parse_enum(&get_text(row, 3), "fee event type", FeeEventType::from_db_value)?,
        event_date: parse_date(&get_text(row, 4), "event_date")?,
        quantity: i32::try_from(get_i64(row, 5))
            .map_err(|_| DatabaseError::Serialization("invalid fee quantity".to_string()))?,
        amount_override_ils_gross: parse_opt_decimal(get_opt_text(row, 6), "fee override")?,
        computed_amount_ils_gross: parse_decimal(&get_text(row, 7), "fee computed")?,
        amount_covered_by_credit_ils_gross: parse_decimal(&get_text(row, 8), "fee covered")?,
        amount_due_cash_ils_gross: parse_decimal(&get_text(row, 9), "fee due")?,
        created_at: parse_timestamp(&get_text(row, 10))?,
    })
}

fn row_to_notification_record(row: &libsql::Row) -> Result<NotificationRecord, DatabaseError> {
    Ok(NotificationRecord {
        id: parse_uuid(&get_text(row, 0), "notifications.id")?,
        case_id: get_opt_text(row, 1)
            .map(|value| parse_uuid(&value, "notifications.case_id"))
            .transpose()?,
        notification_type: parse_enum(
            &get_text(row, 2),
            "notification type",
            NotificationType::from_db_value,
        )?,
        title: get_text(row, 3),
        message: get_text(row, 4),
        severity: parse_enum(&get_text(row, 5), "severity", Severity::from_db_value)?,
        is_read: get_i64(row, 6) != 0,
        created_at: parse_timestamp(&get_text(row, 7))?,
    })
}

fn row_to_activity_record(row: &libsql::Row) -> Result<ActivityRecord, DatabaseError> {
    let details_raw = get_text(row, 4);
    let details = if details_raw.trim().is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(&details_raw)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?
    };
    Ok(ActivityRecord {
        id: parse_uuid(&get_text(row, 0), "activity_log.id")?,
        action: get_text(row, 1),
        entity_type: get_text(row, 2),
        entity_id: get_opt_text(row, 3),
        details,
        created_at: parse_timestamp(&get_text(row, 5))?,
    })
}

async fn insert_activity(conn: &Connection, entry: &ActivityRecord) -> Result<(), DatabaseError> {
    let details = serde_json::to_string(&entry.details)
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    conn.execute(
        "INSERT INTO activity_log (id, action, entity_type, entity_id, details, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.id.to_string(),
            entry.action.as_str(),
            entry.entity_type.as_str(),
            opt_text(entry.entity_id.as_deref()),
            details,
            fmt_ts(&entry.created_at),
        ],
    )
    .await?;
    Ok(())
}

/// Write every row of a batch on an open transaction.
async fn write_batch(conn: &Connection, batch: &LedgerBatch) -> Result<(), DatabaseError> {
    let case_id = batch.case_id.to_string();

    for expense in &batch.expenses {
        conn.execute(
            "INSERT INTO expenses \
             (id, case_id, supplier_name, amount_ils_gross, service_description, demand_received_date, \
              expense_date, category, payer, attachment_url, split_group_id, is_split_part, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                expense.id.to_string(),
                case_id.as_str(),
                opt_text(expense.supplier_name.as_deref()),
                expense.amount_ils_gross.to_string(),
                opt_text(expense.service_description.as_deref()),
                opt_date(expense.demand_received_date),
                fmt_date(expense.expense_date),
                expense.category.as_str(),
                expense.payer.as_str(),
                opt_text(expense.attachment_url.as_deref()),
                opt_uuid(expense.split_group_id),
                i64::from(expense.is_split_part),
                fmt_ts(&expense.created_at),
            ],
        )
        .await?;
    }

    for accrual in &batch.accruals {
        conn.execute(
            "INSERT INTO retainer_accruals \
             (id, case_id, accrual_month, invoice_date, due_date, amount_ils_gross, is_paid) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                accrual.id.to_string(),
                case_id.as_str(),
                fmt_date(accrual.accrual_month),
                fmt_date(accrual.invoice_date),
                fmt_date(accrual.due_date),
                accrual.amount_ils_gross.to_string(),
                i64::from(accrual.is_paid),
            ],
        )
        .await?;
    }

    for payment in &batch.payments {
        conn.execute(
            "INSERT INTO retainer_payments (id, case_id, payment_date, amount_ils_gross, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                payment.id.to_string(),
                case_id.as_str(),
                fmt_date(payment.payment_date),
                payment.amount_ils_gross.to_string(),
                fmt_ts(&payment.created_at),
            ],
        )
        .await?;
    }

    for event in &batch.fee_events {
        conn.execute(
            "INSERT INTO fee_events \
             (id, case_id, sequence, event_type, event_date, quantity, amount_override_ils_gross, \
              computed_amount_ils_gross, amount_covered_by_credit_ils_gross, amount_due_cash_ils_gross, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                event.id.to_string(),
                case_id.as_str(),
                event.sequence,
                event.event_type.as_str(),
                fmt_date(event.event_date),
                i64::from(event.quantity),
                opt_decimal(event.amount_override_ils_gross),
                event.computed_amount_ils_gross.to_string(),
                event.amount_covered_by_credit_ils_gross.to_string(),
                event.amount_due_cash_ils_gross.to_string(),
                fmt_ts(&event.created_at),
            ],
        )
        .await?;
    }

    for (accrual_id, is_paid) in &batch.accrual_paid {
        conn.execute(
            "UPDATE retainer_accruals SET is_paid = ?3 WHERE case_id = ?1 AND id = ?2",
            params![case_id.as_str(), accrual_id.to_string(), i64::from(*is_paid)],
        )
        .await?;
    }

    for allocation in &batch.fee_allocations {
        conn.execute(
            "UPDATE fee_events SET \
                amount_covered_by_credit_ils_gross = ?3, \
                amount_due_cash_ils_gross = ?4 \
             WHERE case_id = ?1 AND id = ?2",
            params![
                case_id.as_str(),
                allocation.fee_event_id.to_string(),
                allocation.covered.to_string(),
                allocation.due.to_string(),
            ],
        )
        .await?;
    }

    if let Some(start) = batch.insurer_started_on {
        conn.execute(
            "UPDATE cases SET insurer_started = 1, insurer_start_date = ?2 \
             WHERE id = ?1 AND insurer_started = 0",
            params![case_id.as_str(), fmt_date(start)],
        )
        .await?;
    }

    if let Some(status) = batch.status {
        conn.execute(
            "UPDATE cases SET status = ?2 WHERE id = ?1",
            params![case_id.as_str(), status.as_str()],
        )
        .await?;
    }

    for entry in &batch.activity {
        insert_activity(conn, entry).await?;
    }

    Ok(())
}

#[async_trait::async_trait]
impl CaseStore for LibSqlBackend {
    async fn insert_case(
        &self,
        case: &CaseRecord,
        batch: &LedgerBatch,
    ) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute("BEGIN", ()).await?;
        let insert_result = async {
            conn.execute(
                &format!(
                    "INSERT INTO cases ({CASE_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
                ),
                params![
                    case.id.to_string(),
                    case.case_reference.as_str(),
                    opt_text(case.case_name.as_deref()),
                    case.case_type.as_str(),
                    case.status.as_str(),
                    fmt_date(case.open_date),
                    fmt_date(case.retainer_anchor_date),
                    opt_text(case.branch_name.as_deref()),
                    opt_decimal(case.deductible_usd),
                    opt_decimal(case.fx_rate_usd_ils),
                    opt_date(case.fx_date_used),
                    case.fx_source.as_str(),
                    case.deductible_ils_gross.to_string(),
                    i64::from(case.insurer_started),
                    opt_date(case.insurer_start_date),
                    opt_decimal(case.retainer_snapshot_ils_gross),
                    opt_date(case.retainer_snapshot_through_month),
                    opt_decimal(case.expenses_snapshot_ils_gross),
                    fmt_ts(&case.created_at),
                ],
            )
            .await?;
            write_batch(&conn, batch).await
        }
        .await;

        match insert_result {
            Ok(()) => {
                conn.execute("COMMIT", ()).await?;
                Ok(())
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(classify_write_error(err))
            }
        }
    }

    async fn get_case(&self, case_id: Uuid) -> Result<Option<CaseRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {CASE_COLUMNS} FROM cases WHERE id = ?1 LIMIT 1"),
                params![case_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_case_record(&row)).transpose()
    }

    async fn get_case_by_reference(
        &self,
        case_reference: &str,
    ) -> Result<Option<CaseRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {CASE_COLUMNS} FROM cases WHERE case_reference = ?1 LIMIT 1"),
                params![case_reference],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_case_record(&row)).transpose()
    }

    async fn list_cases(&self) -> Result<Vec<CaseRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {CASE_COLUMNS} FROM cases ORDER BY open_date DESC, created_at DESC"),
                (),
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_case_record(&row)?);
        }
        Ok(out)
    }

    async fn list_cases_by_status(
        &self,
        status: CaseStatus,
    ) -> Result<Vec<CaseRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {CASE_COLUMNS} FROM cases WHERE status = ?1 \
                     ORDER BY open_date ASC, created_at ASC"
                ),
                params![status.as_str()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_case_record(&row)?);
        }
        Ok(out)
    }

}

#[async_trait::async_trait]
impl LedgerStore for LibSqlBackend {
    async fn list_expenses(&self, case_id: Uuid) -> Result<Vec<ExpenseRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE case_id = ?1 \
                     ORDER BY expense_date ASC, created_at ASC, rowid ASC"
                ),
                params![case_id.to_string()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_expense_record(&row)?);
        }
        Ok(out)
    }

    async fn list_accruals(
        &self,
        case_id: Uuid,
    ) -> Result<Vec<RetainerAccrualRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ACCRUAL_COLUMNS} FROM retainer_accruals WHERE case_id = ?1 \
                     ORDER BY accrual_month ASC"
                ),
                params![case_id.to_string()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_accrual_record(&row)?);
        }
        Ok(out)
    }

    async fn list_unpaid_accruals(&self) -> Result<Vec<RetainerAccrualRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ACCRUAL_COLUMNS} FROM retainer_accruals WHERE is_paid = 0 \
                     ORDER BY case_id ASC, accrual_month ASC"
                ),
                (),
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_accrual_record(&row)?);
        }
        Ok(out)
    }

    async fn list_payments(
        &self,
        case_id: Uuid,
    ) -> Result<Vec<RetainerPaymentRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT id, case_id, payment_date, amount_ils_gross, created_at \
                 FROM retainer_payments WHERE case_id = ?1 \
                 ORDER BY payment_date ASC, created_at ASC, rowid ASC",
                params![case_id.to_string()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_payment_record(&row)?);
        }
        Ok(out)
    }

    async fn list_fee_events(&self, case_id: Uuid) -> Result<Vec<FeeEventRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {FEE_EVENT_COLUMNS} FROM fee_events WHERE case_id = ?1 \
                     ORDER BY event_date ASC, sequence ASC"
                ),
                params![case_id.to_string()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_fee_event_record(&row)?);
        }
        Ok(out)
    }

    async fn apply_ledger_batch(&self, batch: &LedgerBatch) -> Result<(), DatabaseError> {
        if batch.is_empty() {
            return Ok(());
        }
        let conn = self.connect().await?;
        conn.execute("BEGIN", ()).await?;
        match write_batch(&conn, batch).await {
            Ok(()) => {
                conn.execute("COMMIT", ()).await?;
                Ok(())
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(classify_write_error(err))
            }
        }
    }
}

#[async_trait::async_trait]
impl AlertStore for LibSqlBackend {
    async fn has_alert(
        &self,
        notification_type: NotificationType,
        key: &str,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                "SELECT 1 FROM alert_events WHERE type = ?1 AND key = ?2 LIMIT 1",
                params![notification_type.as_str(), key],
            )
            .await?
            .next()
            .await?;
        Ok(row.is_some())
    }

    async fn record_alert(
        &self,
        notification_type: NotificationType,
        key: &str,
        case_id: Option<Uuid>,
    ) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO alert_events (type, key, case_id, last_sent_at) \
             VALUES (?1, ?2, ?3, datetime('now')) \
             ON CONFLICT (type, key) DO UPDATE SET last_sent_at = datetime('now')",
            params![notification_type.as_str(), key, opt_uuid(case_id)],
        )
        .await?;
        Ok(())
    }

    async fn create_notification(
        &self,
        notification: &NotificationRecord,
    ) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO notifications (id, case_id, type, title, message, severity, is_read, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                notification.id.to_string(),
                opt_uuid(notification.case_id),
                notification.notification_type.as_str(),
                notification.title.as_str(),
                notification.message.as_str(),
                notification.severity.as_str(),
                i64::from(notification.is_read),
                fmt_ts(&notification.created_at),
            ],
        )
        .await?;
        Ok(())
    }

    async fn list_notifications(
        &self,
        limit: i64,
    ) -> Result<Vec<NotificationRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT id, case_id, type, title, message, severity, is_read, created_at \
                 FROM notifications ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                params![limit],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_notification_record(&row)?);
        }
        Ok(out)
    }

    async fn mark_notification_read(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let updated = conn
            .execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ?1",
                params![id.to_string()],
            )
            .await?;
        Ok(updated > 0)
    }
}

#[async_trait::async_trait]
impl FxRateStore for LibSqlBackend {
    async fn get_fx_rate(
        &self,
        rate_date: NaiveDate,
    ) -> Result<Option<FxRateRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                "SELECT rate_date, rate_usd_ils, source FROM fx_rates WHERE rate_date = ?1 LIMIT 1",
                params![fmt_date(rate_date)],
            )
            .await?
            .next()
            .await?;
        row.map(|row| {
            Ok(FxRateRecord {
                rate_date: parse_date(&get_text(&row, 0), "rate_date")?,
                rate_usd_ils: parse_decimal(&get_text(&row, 1), "fx rate")?,
                source: get_text(&row, 2),
            })
        })
        .transpose()
    }

    async fn put_fx_rate(&self, rate: &FxRateRecord) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO fx_rates (rate_date, rate_usd_ils, source) VALUES (?1, ?2, ?3) \
             ON CONFLICT (rate_date) DO NOTHING",
            params![
                fmt_date(rate.rate_date),
                rate.rate_usd_ils.to_string(),
                rate.source.as_str(),
            ],
        )
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ActivityStore for LibSqlBackend {
    async fn append_activity(&self, entry: &ActivityRecord) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        insert_activity(&conn, entry).await
    }

    async fn list_activity(&self, limit: i64) -> Result<Vec<ActivityRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT id, action, entity_type, entity_id, details, created_at \
                 FROM activity_log ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                params![limit],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_activity_record(&row)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use crate::db::libsql::LibSqlBackend;
    use crate::db::{
        ActivityRecord, ActivityStore, CaseRecord, CaseStatus, CaseStore, CaseType, Database,
        FeeAllocation, FeeEventRecord, FeeEventType, FxSource, LedgerBatch, LedgerStore,
        RetainerAccrualRecord,
    };
    use crate::error::DatabaseError;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn sample_case(reference: &str) -> CaseRecord {
        CaseRecord {
            id: Uuid::new_v4(),
            case_reference: reference.to_string(),
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
            insurer_started: false,
            insurer_start_date: None,
            retainer_snapshot_ils_gross: None,
            retainer_snapshot_through_month: None,
            expenses_snapshot_ils_gross: None,
            created_at: Utc::now(),
        }
    }

    async fn backend() -> LibSqlBackend {
        let db = LibSqlBackend::new_memory().await.expect("memory db");
        db.run_migrations().await.expect("migrations");
        db
    }

    #[tokio::test]
    async fn case_round_trips_with_exact_decimals() {
        let db = backend().await;
        let case = sample_case("rt-1");
        db.insert_case(&case, &LedgerBatch::new(case.id))
            .await
            .expect("insert");

        let loaded = db.get_case(case.id).await.expect("get").expect("exists");
        assert_eq!(loaded.deductible_ils_gross, dec!(10000.00));
        assert_eq!(loaded.deductible_ils_gross.to_string(), "10000.00");
        assert_eq!(loaded.retainer_anchor_date, date(2025, 7, 1));
    }

    #[tokio::test]
    async fn duplicate_reference_is_a_constraint_error() {
        let db = backend().await;
        let first = sample_case("dup");
        db.insert_case(&first, &LedgerBatch::new(first.id))
            .await
            .expect("first insert");
        let second = sample_case("dup");
        let err = db
            .insert_case(&second, &LedgerBatch::new(second.id))
            .await
            .expect_err("duplicate must fail");
        assert!(matches!(err, DatabaseError::Constraint(_)), "got {err:?}");
        assert!(db.get_case(second.id).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_rows_behind() {
        let db = backend().await;
        let case = sample_case("atomic");
        db.insert_case(&case, &LedgerBatch::new(case.id))
            .await
            .expect("insert");

        let month = date(2025, 7, 1);
        let accrual = RetainerAccrualRecord {
            id: Uuid::new_v4(),
            case_id: case.id,
            accrual_month: month,
            invoice_date: month,
            due_date: date(2025, 8, 30),
            amount_ils_gross: dec!(1115.10),
            is_paid: false,
        };
        let mut batch = LedgerBatch::new(case.id);
        batch.accruals.push(accrual.clone());
        // Same month twice violates UNIQUE(case_id, accrual_month).
        batch.accruals.push(RetainerAccrualRecord {
            id: Uuid::new_v4(),
            ..accrual
        });

        assert!(db.apply_ledger_batch(&batch).await.is_err());
        assert!(db.list_accruals(case.id).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn fee_events_order_by_date_then_sequence() {
        let db = backend().await;
        let case = sample_case("fees");
        db.insert_case(&case, &LedgerBatch::new(case.id))
            .await
            .expect("insert");

        let mk = |sequence: i64, event_date: NaiveDate| FeeEventRecord {
            id: Uuid::new_v4(),
            case_id: case.id,
            sequence,
            event_type: FeeEventType::DemandFix,
            event_date,
            quantity: 1,
            amount_override_ils_gross: None,
            computed_amount_ils_gross: dec!(5000.00),
            amount_covered_by_credit_ils_gross: dec!(0.00),
            amount_due_cash_ils_gross: dec!(5000.00),
            created_at: Utc::now(),
        };
        let late = mk(1, date(2025, 9, 1));
        let early_second = mk(3, date(2025, 8, 1));
        let early_first = mk(2, date(2025, 8, 1));

        let mut batch = LedgerBatch::new(case.id);
        batch.fee_events = vec![late.clone(), early_second.clone(), early_first.clone()];
        batch.fee_allocations.push(FeeAllocation {
            fee_event_id: late.id,
            covered: dec!(1000.00),
            due: dec!(4000.00),
        });
        db.apply_ledger_batch(&batch).await.expect("batch");

        let events = db.list_fee_events(case.id).await.expect("list");
        let order: Vec<Uuid> = events.iter().map(|e| e.id).collect();
        assert_eq!(order, vec![early_first.id, early_second.id, late.id]);
        assert_eq!(events[2].amount_covered_by_credit_ils_gross, dec!(1000.00));
        assert_eq!(events[2].amount_due_cash_ils_gross, dec!(4000.00));
    }

    #[tokio::test]
    async fn insurer_start_is_set_only_once() {
        let db = backend().await;
        let case = sample_case("insurer");
        db.insert_case(&case, &LedgerBatch::new(case.id))
            .await
            .expect("insert");

        let mut first = LedgerBatch::new(case.id);
        first.insurer_started_on = Some(date(2025, 3, 1));
        db.apply_ledger_batch(&first).await.expect("first");
        let mut second = LedgerBatch::new(case.id);
        second.insurer_started_on = Some(date(2025, 4, 1));
        db.apply_ledger_batch(&second).await.expect("second");

        let loaded = db.get_case(case.id).await.expect("get").expect("exists");
        assert!(loaded.insurer_started);
        assert_eq!(loaded.insurer_start_date, Some(date(2025, 3, 1)));
    }

    #[tokio::test]
    async fn status_change_rolls_back_with_its_batch() {
        let db = backend().await;
        let case = sample_case("status");
        db.insert_case(&case, &LedgerBatch::new(case.id))
            .await
            .expect("insert");

        let entry = ActivityRecord::new(
            "case_status_changed",
            "case",
            Some(case.id.to_string()),
            serde_json::json!({ "status": "CLOSED" }),
        );
        let mut failing = LedgerBatch::new(case.id);
        failing.status = Some(CaseStatus::Closed);
        // Reusing the activity id violates the primary key after the status update.
        failing.activity = vec![entry.clone(), entry.clone()];
        assert!(db.apply_ledger_batch(&failing).await.is_err());

        let loaded = db.get_case(case.id).await.expect("get").expect("exists");
        assert_eq!(loaded.status, CaseStatus::Open);
        assert!(db.list_activity(10).await.expect("activity").is_empty());

        let mut ok = LedgerBatch::new(case.id);
        ok.status = Some(CaseStatus::Closed);
        ok.activity.push(entry);
        db.apply_ledger_batch(&ok).await.expect("batch");

        let loaded = db.get_case(case.id).await.expect("get").expect("exists");
        assert_eq!(loaded.status, CaseStatus::Closed);
        assert_eq!(db.list_activity(10).await.expect("activity").len(), 1);
    }
}
