//! Monthly retainer schedule, payments and the oldest-first allocator.

use std::collections::HashSet;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{
    ActivityRecord, CaseRecord, CaseStatus, Database, LedgerBatch, RetainerAccrualRecord,
    RetainerPaymentRecord,
};
use crate::error::LedgerError;
use crate::ledger::CaseFailure;
use crate::ledger::fees::plan_credit_allocations;
use crate::ledger::money::{quantize, sum};

pub const RETAINER_BASE_NET_ILS: Decimal = dec!(945.00);
const VAT_BEFORE_2025: Decimal = dec!(0.17);
const VAT_FROM_2025: Decimal = dec!(0.18);
const VAT_CUTOVER_YEAR: i32 = 2025;
pub const DUE_OFFSET_DAYS: i64 = 60;

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}

/// First day of the month after the one containing `date`.
pub fn next_month(date: NaiveDate) -> NaiveDate {
    month_start(month_start(date) + Duration::days(32))
}

/// Semiannual anchor: opened Jan–Jun bills from July 1, Jul–Dec from January 1 next year.
pub fn retainer_anchor_date(open_date: NaiveDate) -> NaiveDate {
    // Next half-year boundary strictly after the opening month.
    let mut cursor = next_month(open_date);
    while cursor.month() != 1 && cursor.month() != 7 {
        cursor = next_month(cursor);
    }
    cursor
}

/// First month that still needs an accrual row.
///
/// A retainer snapshot with a through-month already covers everything up to
/// and including that month. A through-month without a snapshot amount is ignored.
pub fn effective_start_month(case: &CaseRecord) -> NaiveDate {
    match (
        case.retainer_snapshot_ils_gross,
        case.retainer_snapshot_through_month,
    ) {
        (Some(_), Some(through)) => next_month(through),
        _ => month_start(case.retainer_anchor_date),
    }
}

pub fn vat_rate_for_month(accrual_month: NaiveDate) -> Decimal {
    if accrual_month.year() < VAT_CUTOVER_YEAR {
        VAT_BEFORE_2025
    } else {
        VAT_FROM_2025
    }
}

pub fn retainer_gross_for_month(accrual_month: NaiveDate) -> Decimal {
    quantize(RETAINER_BASE_NET_ILS * (Decimal::ONE + vat_rate_for_month(accrual_month)))
}

/// Accrual rows missing between the case's start month and `through_month`, inclusive.
pub fn plan_accruals(
    case: &CaseRecord,
    existing: &[RetainerAccrualRecord],
    through_month: NaiveDate,
) -> Vec<RetainerAccrualRecord> {
    let through = month_start(through_month);
    let have: HashSet<NaiveDate> = existing.iter().map(|a| a.accrual_month).collect();

    let mut planned = Vec::new();
    let mut cursor = effective_start_month(case);
    while cursor <= through {
        if !have.contains(&cursor) {
            planned.push(RetainerAccrualRecord {
                id: Uuid::new_v4(),
                case_id: case.id,
                accrual_month: cursor,
                invoice_date: cursor,
                due_date: cursor + Duration::days(DUE_OFFSET_DAYS),
                amount_ils_gross: retainer_gross_for_month(cursor),
                is_paid: false,
            });
        }
        cursor = next_month(cursor);
    }
    planned
}

/// Mark accruals paid oldest-first from the cumulative cash received.
///
/// Once an accrual cannot be covered, it and every later accrual are unpaid.
pub fn allocate_payments(
    accruals: &[RetainerAccrualRecord],
    total_paid: Decimal,
) -> Vec<(Uuid, bool)> {
    let mut ordered: Vec<&RetainerAccrualRecord> = accruals.iter().collect();
    ordered.sort_by_key(|a| a.accrual_month);

    let mut credit = quantize(total_paid);
    let mut exhausted = false;
    ordered
        .into_iter()
        .map(|accrual| {
            if !exhausted && credit >= accrual.amount_ils_gross {
                credit = quantize(credit - accrual.amount_ils_gross);
                (accrual.id, true)
            } else {
                exhausted = true;
                (accrual.id, false)
            }
        })
        .collect()
}

pub fn total_paid(payments: &[RetainerPaymentRecord]) -> Decimal {
    sum(payments.iter().map(|p| p.amount_ils_gross))
}

/// Extend a case's schedule through `through_month`; returns the rows added.
///
/// Newly added months are allocated against payments already on file.
pub async fn ensure_accruals(
    db: &dyn Database,
    case: &CaseRecord,
    through_month: NaiveDate,
) -> Result<Vec<RetainerAccrualRecord>, LedgerError> {
    let existing = db.list_accruals(case.id).await?;
    let planned = plan_accruals(case, &existing, through_month);
    if planned.is_empty() {
        return Ok(planned);
    }

    let payments = db.list_payments(case.id).await?;
    let mut all = existing;
    all.extend(planned.iter().cloned());

    let mut batch = LedgerBatch::new(case.id);
    batch.accruals = planned.clone();
    batch.accrual_paid = allocate_payments(&all, total_paid(&payments));
    batch.activity.push(ActivityRecord::new(
        "retainer_accruals_added",
        "case",
        Some(case.id.to_string()),
        serde_json::json!({
            "count": planned.len(),
            "through_month": month_start(through_month).to_string(),
        }),
    ));
    db.apply_ledger_batch(&batch).await?;

    debug!(case_id = %case.id, added = planned.len(), "Retainer accruals extended");
    Ok(planned)
}

#[derive(Debug, Clone, Default)]
pub struct RollForwardReport {
    pub cases_scanned: usize,
    pub accruals_added: usize,
    pub failures: Vec<CaseFailure>,
}

/// Roll every open case's schedule forward to `through_month`.
///
/// Cases holding a retainer snapshot without a through-month are skipped.
pub async fn roll_forward_open_cases(
    db: &dyn Database,
    through_month: NaiveDate,
) -> Result<RollForwardReport, LedgerError> {
    let cases = db.list_cases_by_status(CaseStatus::Open).await?;
    let mut report = RollForwardReport::default();

    for case in cases {
        if case.retainer_snapshot_ils_gross.is_some()
            && case.retainer_snapshot_through_month.is_none()
        {
            debug!(case_id = %case.id, "Skipping roll-forward: snapshot has no through-month");
            continue;
        }
        report.cases_scanned += 1;
        match ensure_accruals(db, &case, through_month).await {
            Ok(added) => report.accruals_added += added.len(),
            Err(err) => {
                warn!(case_id = %case.id, error = %err, "Retainer roll-forward failed");
                report.failures.push(CaseFailure::new(&case, &err));
            }
        }
    }

    info!(
        cases_scanned = report.cases_scanned,
        accruals_added = report.accruals_added,
        failures = report.failures.len(),
        "Retainer roll-forward complete"
    );
    Ok(report)
}

#[derive(Debug, Clone)]
pub struct PaymentInput {
    pub payment_date: NaiveDate,
    pub amount_ils_gross: Decimal,
}

/// Record a retainer payment, then reallocate accruals and fee credit.
///
/// The schedule is brought current through `today`'s month first; all rows
/// commit together.
pub async fn add_retainer_payment(
    db: &dyn Database,
    case_id: Uuid,
    input: PaymentInput,
    today: NaiveDate,
) -> Result<RetainerPaymentRecord, LedgerError> {
    let amount = quantize(input.amount_ils_gross);
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(amount));
    }
    let case = db
        .get_case(case_id)
        .await?
        .ok_or(LedgerError::CaseNotFound(case_id))?;

    let existing = db.list_accruals(case_id).await?;
    let planned = plan_accruals(&case, &existing, today);
    let mut payments = db.list_payments(case_id).await?;
    let fee_events = db.list_fee_events(case_id).await?;

    let payment = RetainerPaymentRecord {
        id: Uuid::new_v4(),
        case_id,
        payment_date: input.payment_date,
        amount_ils_gross: amount,
        created_at: Utc::now(),
    };
    payments.push(payment.clone());
    let paid = total_paid(&payments);

    let mut accruals = existing;
    accruals.extend(planned.iter().cloned());

    let mut batch = LedgerBatch::new(case_id);
    batch.accruals = planned;
    batch.payments.push(payment.clone());
    batch.accrual_paid = allocate_payments(&accruals, paid);
    batch.fee_allocations = plan_credit_allocations(&fee_events, paid);
    batch.activity.push(ActivityRecord::new(
        "retainer_payment_added",
        "retainer_payment",
        Some(payment.id.to_string()),
        serde_json::json!({
            "case_id": case_id,
            "amount_ils_gross": amount.to_string(),
            "payment_date": payment.payment_date.to_string(),
        }),
    ));
    db.apply_ledger_batch(&batch).await?;

    info!(
        case_id = %case_id,
        amount = %amount,
        total_paid = %paid,
        "Retainer payment recorded"
    );
    Ok(payment)
}

/// Accruals in ascending month order.
pub async fn list_accruals(
    db: &dyn Database,
    case_id: Uuid,
) -> Result<Vec<RetainerAccrualRecord>, LedgerError> {
    Ok(db.list_accruals(case_id).await?)
}

/// Payments, newest first.
pub async fn list_payments(
    db: &dyn Database,
    case_id: Uuid,
) -> Result<Vec<RetainerPaymentRecord>, LedgerError> {
    let mut rows = db.list_payments(case_id).await?;
    rows.reverse();
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetainerSummary {
    pub accrued_total_ils_gross: Decimal,
    pub paid_total_ils_gross: Decimal,
    pub applied_to_fees_total_ils_gross: Decimal,
    pub credit_balance_ils_gross: Decimal,
    pub fees_due_total_ils_gross: Decimal,
}

pub async fn retainer_summary(
    db: &dyn Database,
    case_id: Uuid,
) -> Result<RetainerSummary, LedgerError> {
    if db.get_case(case_id).await?.is_none() {
        return Err(LedgerError::CaseNotFound(case_id));
    }
    let accruals = db.list_accruals(case_id).await?;
    let payments = db.list_payments(case_id).await?;
    let fee_events = db.list_fee_events(case_id).await?;

    let paid = total_paid(&payments);
    let applied = sum(fee_events
        .iter()
        .map(|e| e.amount_covered_by_credit_ils_gross));
    let credit = quantize(paid - applied).max(quantize(Decimal::ZERO));

    Ok(RetainerSummary {
        accrued_total_ils_gross: sum(accruals.iter().map(|a| a.amount_ils_gross)),
        paid_total_ils_gross: paid,
        applied_to_fees_total_ils_gross: applied,
        credit_balance_ils_gross: credit,
        fees_due_total_ils_gross: sum(fee_events.iter().map(|e| e.amount_due_cash_ils_gross)),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use crate::db::{CaseRecord, CaseStatus, CaseType, FxSource, RetainerAccrualRecord};

    use super::{
        allocate_payments, effective_start_month, next_month, plan_accruals,
        retainer_anchor_date, retainer_gross_for_month,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn case_with(anchor: NaiveDate, through: Option<NaiveDate>) -> CaseRecord {
        CaseRecord {
            id: Uuid::new_v4(),
            case_reference: "r-1".to_string(),
            case_name: None,
            case_type: CaseType::Court,
            status: CaseStatus::Open,
            open_date: date(2024, 1, 10),
            retainer_anchor_date: anchor,
            branch_name: None,
            deductible_usd: None,
            fx_rate_usd_ils: None,
            fx_date_used: None,
            fx_source: FxSource::Imported,
            deductible_ils_gross: dec!(10000.00),
            insurer_started: false,
            insurer_start_date: None,
            retainer_snapshot_ils_gross: through.map(|_| dec!(5000.00)),
            retainer_snapshot_through_month: through,
            expenses_snapshot_ils_gross: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn anchor_follows_the_half_year() {
        assert_eq!(retainer_anchor_date(date(2026, 2, 15)), date(2026, 7, 1));
        assert_eq!(retainer_anchor_date(date(2026, 6, 30)), date(2026, 7, 1));
        assert_eq!(retainer_anchor_date(date(2026, 7, 1)), date(2027, 1, 1));
        assert_eq!(retainer_anchor_date(date(2026, 10, 1)), date(2027, 1, 1));
        assert_eq!(retainer_anchor_date(date(2026, 12, 31)), date(2027, 1, 1));
        assert_eq!(retainer_anchor_date(date(2026, 1, 1)), date(2026, 7, 1));
    }

    #[test]
    fn next_month_rolls_over_the_year() {
        assert_eq!(next_month(date(2024, 12, 31)), date(2025, 1, 1));
        assert_eq!(next_month(date(2024, 1, 31)), date(2024, 2, 1));
    }

    #[test]
    fn gross_follows_vat_cutover() {
        assert_eq!(retainer_gross_for_month(date(2024, 12, 1)), dec!(1105.65));
        assert_eq!(retainer_gross_for_month(date(2025, 1, 1)), dec!(1115.10));
    }

    #[test]
    fn snapshot_through_month_moves_the_start() {
        let plain = case_with(date(2023, 7, 1), None);
        assert_eq!(effective_start_month(&plain), date(2023, 7, 1));
        let snap = case_with(date(2023, 7, 1), Some(date(2024, 12, 1)));
        assert_eq!(effective_start_month(&snap), date(2025, 1, 1));
    }

    #[test]
    fn through_month_without_snapshot_amount_keeps_the_anchor() {
        let mut case = case_with(date(2024, 7, 1), Some(date(2024, 12, 1)));
        case.retainer_snapshot_ils_gross = None;
        assert_eq!(effective_start_month(&case), date(2024, 7, 1));

        let planned = plan_accruals(&case, &[], date(2025, 2, 10));
        assert_eq!(planned.len(), 8);
        assert_eq!(planned[0].accrual_month, date(2024, 7, 1));
    }

    #[test]
    fn plan_fills_only_missing_months() {
        let case = case_with(date(2024, 11, 1), None);
        let first = plan_accruals(&case, &[], date(2025, 2, 14));
        let months: Vec<NaiveDate> = first.iter().map(|a| a.accrual_month).collect();
        assert_eq!(
            months,
            vec![date(2024, 11, 1), date(2024, 12, 1), date(2025, 1, 1), date(2025, 2, 1)]
        );
        assert_eq!(first[0].due_date, date(2024, 12, 31));
        assert_eq!(first[0].invoice_date, date(2024, 11, 1));
        assert_eq!(first[1].amount_ils_gross, dec!(1105.65));
        assert_eq!(first[2].amount_ils_gross, dec!(1115.10));

        assert!(plan_accruals(&case, &first, date(2025, 2, 1)).is_empty());
        assert!(plan_accruals(&case, &first, date(2024, 12, 1)).is_empty());
    }

    #[test]
    fn plan_is_empty_before_the_anchor() {
        let case = case_with(date(2027, 1, 1), None);
        assert!(plan_accruals(&case, &[], date(2026, 10, 16)).is_empty());
    }

    fn accrual(month: NaiveDate, amount: rust_decimal::Decimal) -> RetainerAccrualRecord {
        RetainerAccrualRecord {
            id: Uuid::new_v4(),
            case_id: Uuid::nil(),
            accrual_month: month,
            invoice_date: month,
            due_date: month,
            amount_ils_gross: amount,
            is_paid: false,
        }
    }

    #[test]
    fn allocation_is_oldest_first() {
        let dec_2024 = accrual(date(2024, 12, 1), dec!(1105.65));
        let jan_2025 = accrual(date(2025, 1, 1), dec!(1115.10));
        let feb_2025 = accrual(date(2025, 2, 1), dec!(1115.10));
        // Deliberately out of order.
        let rows = vec![feb_2025.clone(), dec_2024.clone(), jan_2025.clone()];

        let flags = allocate_payments(&rows, dec!(2300.00));
        assert_eq!(
            flags,
            vec![(dec_2024.id, true), (jan_2025.id, true), (feb_2025.id, false)]
        );

        let flags = allocate_payments(&rows, dec!(1105.64));
        assert!(flags.iter().all(|(_, paid)| !paid));
    }
}
