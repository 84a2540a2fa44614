//! Staged attorney fees and cash-basis retainer credit.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;
use uuid::Uuid;

use crate::db::{
    ActivityRecord, Database, FeeAllocation, FeeEventRecord, FeeEventType, LedgerBatch,
};
use crate::error::LedgerError;
use crate::ledger::money::quantize;
use crate::ledger::retainer::total_paid;

/// Fixed schedule amount; `None` for types billed only by override.
pub fn base_amount(event_type: FeeEventType) -> Option<Decimal> {
    let amount = match event_type {
        FeeEventType::CourtStage1Defense => dec!(20000.00),
        FeeEventType::CourtStage2Damages => dec!(15000.00),
        FeeEventType::CourtStage3Evidence => dec!(15000.00),
        FeeEventType::CourtStage4Proofs => dec!(15000.00),
        FeeEventType::CourtStage5Summaries => dec!(10000.00),
        FeeEventType::AmendedDefensePartial => dec!(10000.00),
        FeeEventType::AmendedDefenseFull => dec!(20000.00),
        FeeEventType::ThirdPartyNotice => dec!(10000.00),
        FeeEventType::AdditionalProofHearing => dec!(1500.00),
        FeeEventType::DemandFix => dec!(5000.00),
        FeeEventType::DemandHourly => dec!(700.00),
        FeeEventType::SmallClaimsManual => return None,
    };
    Some(amount)
}

pub fn compute_fee_amount(
    event_type: FeeEventType,
    quantity: i32,
    amount_override: Option<Decimal>,
) -> Result<Decimal, LedgerError> {
    // Per-unit quantity is stored with the event, override or not.
    if event_type.is_per_unit() && quantity < 1 {
        return Err(LedgerError::InvalidQuantity(quantity));
    }
    if let Some(value) = amount_override {
        return Ok(quantize(value));
    }
    let base = base_amount(event_type).ok_or(LedgerError::MissingOverride(event_type))?;
    if !event_type.is_per_unit() {
        return Ok(quantize(base));
    }
    Ok(quantize(base * Decimal::from(quantity)))
}

/// Greedy oldest-first credit: `(covered, due)` per amount, same order.
pub fn apply_credit(amounts: &[Decimal], available_credit: Decimal) -> Vec<(Decimal, Decimal)> {
    let mut credit = quantize(available_credit).max(quantize(Decimal::ZERO));
    amounts
        .iter()
        .map(|amount| {
            let total = quantize(*amount);
            let covered = quantize(credit.min(total));
            let due = quantize(total - covered);
            credit = quantize(credit - covered);
            (covered, due)
        })
        .collect()
}

/// Recompute the credit split for every fee event of a case.
pub fn plan_credit_allocations(
    events: &[FeeEventRecord],
    total_paid: Decimal,
) -> Vec<FeeAllocation> {
    let mut ordered: Vec<&FeeEventRecord> = events.iter().collect();
    ordered.sort_by_key(|e| (e.event_date, e.sequence));

    let amounts: Vec<Decimal> = ordered
        .iter()
        .map(|e| e.computed_amount_ils_gross)
        .collect();
    ordered
        .into_iter()
        .zip(apply_credit(&amounts, total_paid))
        .map(|(event, (covered, due))| FeeAllocation {
            fee_event_id: event.id,
            covered,
            due,
        })
        .collect()
}

/// Re-run the credit allocation for a case from its full payment history.
pub async fn apply_retainer_credit(
    db: &dyn Database,
    case_id: Uuid,
) -> Result<Vec<FeeAllocation>, LedgerError> {
    if db.get_case(case_id).await?.is_none() {
        return Err(LedgerError::CaseNotFound(case_id));
    }
    let payments = db.list_payments(case_id).await?;
    let events = db.list_fee_events(case_id).await?;
    let allocations = plan_credit_allocations(&events, total_paid(&payments));

    let mut batch = LedgerBatch::new(case_id);
    batch.fee_allocations = allocations.clone();
    db.apply_ledger_batch(&batch).await?;
    Ok(allocations)
}

#[derive(Debug, Clone)]
pub struct FeeEventInput {
    pub event_type: FeeEventType,
    pub event_date: NaiveDate,
    pub quantity: i32,
    pub amount_override_ils_gross: Option<Decimal>,
}

/// Record a fee event and reallocate retainer credit across all of the case's events.
pub async fn add_fee_event(
    db: &dyn Database,
    case_id: Uuid,
    input: FeeEventInput,
) -> Result<FeeEventRecord, LedgerError> {
    if let Some(value) = input.amount_override_ils_gross
        && quantize(value) <= Decimal::ZERO
    {
        return Err(LedgerError::InvalidAmount(quantize(value)));
    }
    let computed = compute_fee_amount(
        input.event_type,
        input.quantity,
        input.amount_override_ils_gross,
    )?;
    if db.get_case(case_id).await?.is_none() {
        return Err(LedgerError::CaseNotFound(case_id));
    }

    let mut events = db.list_fee_events(case_id).await?;
    let payments = db.list_payments(case_id).await?;
    let sequence = events.iter().map(|e| e.sequence).max().unwrap_or(0) + 1;

    let mut event = FeeEventRecord {
        id: Uuid::new_v4(),
        case_id,
        sequence,
        event_type: input.event_type,
        event_date: input.event_date,
        quantity: if input.event_type.is_per_unit() {
            input.quantity
        } else {
            input.quantity.max(1)
        },
        amount_override_ils_gross: input.amount_override_ils_gross.map(quantize),
        computed_amount_ils_gross: computed,
        amount_covered_by_credit_ils_gross: quantize(Decimal::ZERO),
        amount_due_cash_ils_gross: computed,
        created_at: Utc::now(),
    };
    events.push(event.clone());
    let allocations = plan_credit_allocations(&events, total_paid(&payments));
    if let Some(own) = allocations.iter().find(|a| a.fee_event_id == event.id) {
        event.amount_covered_by_credit_ils_gross = own.covered;
        event.amount_due_cash_ils_gross = own.due;
    }

    let mut batch = LedgerBatch::new(case_id);
    batch.fee_events.push(event.clone());
    batch.fee_allocations = allocations;
    batch.activity.push(ActivityRecord::new(
        "fee_event_added",
        "fee_event",
        Some(event.id.to_string()),
        serde_json::json!({
            "case_id": case_id,
            "event_type": event.event_type.as_str(),
            "computed_amount_ils_gross": computed.to_string(),
        }),
    ));
    db.apply_ledger_batch(&batch).await?;

    info!(
        case_id = %case_id,
        event_type = event.event_type.as_str(),
        amount = %computed,
        covered = %event.amount_covered_by_credit_ils_gross,
        "Fee event recorded"
    );
    Ok(event)
}

/// Fee events, newest first.
pub async fn list_fee_events(
    db: &dyn Database,
    case_id: Uuid,
) -> Result<Vec<FeeEventRecord>, LedgerError> {
    let mut rows = db.list_fee_events(case_id).await?;
    rows.reverse();
    Ok(rows)
}
