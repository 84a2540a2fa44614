//! Deductible capacity and the expense split across it.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::{Database, ExpensePayer, ExpenseRecord};
use crate::error::LedgerError;
use crate::ledger::money::{quantize, sum};

/// Split an expense into `(on_deductible, on_insurer)` given the remaining capacity.
pub fn split(amount: Decimal, remaining: Decimal) -> Result<(Decimal, Decimal), LedgerError> {
    let amount = quantize(amount);
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(amount));
    }
    let remaining = quantize(remaining);

    if remaining <= Decimal::ZERO {
        return Ok((quantize(Decimal::ZERO), amount));
    }
    if amount <= remaining {
        return Ok((amount, quantize(Decimal::ZERO)));
    }
    Ok((remaining, quantize(amount - remaining)))
}

/// `deductible - consumed`, never below zero.
pub fn deductible_remaining(deductible: Decimal, consumed: Decimal) -> Decimal {
    let remaining = quantize(deductible - consumed);
    if remaining < Decimal::ZERO {
        quantize(Decimal::ZERO)
    } else {
        remaining
    }
}

/// Total booked against the client deductible, any category.
pub fn consumed_on_deductible(expenses: &[ExpenseRecord]) -> Decimal {
    sum(expenses
        .iter()
        .filter(|e| e.payer == ExpensePayer::ClientDeductible)
        .map(|e| e.amount_ils_gross))
}

/// Remaining deductible capacity for a case, recomputed from its expenses.
pub async fn case_deductible_remaining(
    db: &dyn Database,
    case_id: Uuid,
) -> Result<Decimal, LedgerError> {
    let case = db
        .get_case(case_id)
        .await?
        .ok_or(LedgerError::CaseNotFound(case_id))?;
    let expenses = db.list_expenses(case_id).await?;
    Ok(deductible_remaining(
        case.deductible_ils_gross,
        consumed_on_deductible(&expenses),
    ))
}
