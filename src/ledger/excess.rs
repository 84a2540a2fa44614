//! Excess remaining: deductible capacity less retainer and non-attorney costs.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::{
    CaseRecord, Database, ExpenseCategory, ExpensePayer, ExpenseRecord, RetainerPaymentRecord,
};
use crate::error::LedgerError;
use crate::ledger::money::{quantize, sum};
use crate::ledger::retainer::total_paid;

/// Retainer consumed: snapshot (pre-system history) plus every live payment.
pub fn retainer_component(case: &CaseRecord, payments: &[RetainerPaymentRecord]) -> Decimal {
    let live = total_paid(payments);
    match case.retainer_snapshot_ils_gross {
        Some(snapshot) => quantize(snapshot + live),
        None => live,
    }
}

/// Expenses consumed: snapshot plus CLIENT_DEDUCTIBLE rows outside ATTORNEY_FEE.
pub fn expense_component(case: &CaseRecord, expenses: &[ExpenseRecord]) -> Decimal {
    let live = sum(expenses
        .iter()
        .filter(|e| {
            e.payer == ExpensePayer::ClientDeductible
                && e.category != ExpenseCategory::AttorneyFee
        })
        .map(|e| e.amount_ils_gross));
    quantize(case.expenses_snapshot_ils_gross.unwrap_or(Decimal::ZERO) + live)
}

pub fn excess_remaining(
    case: &CaseRecord,
    payments: &[RetainerPaymentRecord],
    expenses: &[ExpenseRecord],
) -> Decimal {
    let consumed = quantize(retainer_component(case, payments) + expense_component(case, expenses));
    quantize(case.deductible_ils_gross - consumed).max(quantize(Decimal::ZERO))
}

pub async fn case_excess_remaining(
    db: &dyn Database,
    case_id: Uuid,
) -> Result<Decimal, LedgerError> {
    let case = db
        .get_case(case_id)
        .await?
        .ok_or(LedgerError::CaseNotFound(case_id))?;
    excess_for_case(db, &case).await
}

pub(crate) async fn excess_for_case(
    db: &dyn Database,
    case: &CaseRecord,
) -> Result<Decimal, LedgerError> {
    let payments = db.list_payments(case.id).await?;
    let expenses = db.list_expenses(case.id).await?;
    Ok(excess_remaining(case, &payments, &expenses))
}
