use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::db::{
    ActivityRecord, Database, ExpenseCategory, ExpensePayer, ExpenseRecord, LedgerBatch,
};
use crate::error::LedgerError;
use crate::ledger::deductible::{consumed_on_deductible, deductible_remaining, split};
use crate::ledger::money::quantize;

#[derive(Debug, Clone)]
pub struct ExpenseInput {
    pub amount_ils_gross: Decimal,
    pub expense_date: NaiveDate,
    pub category: ExpenseCategory,
    pub payer: ExpensePayer,
    pub supplier_name: Option<String>,
    pub service_description: Option<String>,
    pub demand_received_date: Option<NaiveDate>,
    pub attachment_url: Option<String>,
}

impl ExpenseInput {
    pub fn new(
        amount_ils_gross: Decimal,
        expense_date: NaiveDate,
        category: ExpenseCategory,
        payer: ExpensePayer,
    ) -> Self {
        Self {
            amount_ils_gross,
            expense_date,
            category,
            payer,
            supplier_name: None,
            service_description: None,
            demand_received_date: None,
            attachment_url: None,
        }
    }

    fn row(
        &self,
        case_id: Uuid,
        amount: Decimal,
        payer: ExpensePayer,
        split_group_id: Option<Uuid>,
    ) -> ExpenseRecord {
        ExpenseRecord {
            id: Uuid::new_v4(),
            case_id,
            supplier_name: self.supplier_name.clone(),
            amount_ils_gross: amount,
            service_description: self.service_description.clone(),
            demand_received_date: self.demand_received_date,
            expense_date: self.expense_date,
            category: self.category,
            payer,
            attachment_url: self.attachment_url.clone(),
            split_group_id,
            is_split_part: split_group_id.is_some(),
            created_at: Utc::now(),
        }
    }
}

/// Book an expense, splitting it across the deductible boundary when needed.
///
/// Returns the rows written: one, or a CLIENT_DEDUCTIBLE/INSURER pair sharing
/// a split group.
pub async fn add_expense(
    db: &dyn Database,
    case_id: Uuid,
    input: ExpenseInput,
) -> Result<Vec<ExpenseRecord>, LedgerError> {
    let amount = quantize(input.amount_ils_gross);
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(amount));
    }
    let case = db
        .get_case(case_id)
        .await?
        .ok_or(LedgerError::CaseNotFound(case_id))?;

    let rows = match input.payer {
        ExpensePayer::Insurer => vec![input.row(case_id, amount, ExpensePayer::Insurer, None)],
        ExpensePayer::ClientDeductible => {
            let existing = db.list_expenses(case_id).await?;
            let remaining =
                deductible_remaining(case.deductible_ils_gross, consumed_on_deductible(&existing));
            let (on_deductible, on_insurer) = split(amount, remaining)?;

            if on_insurer.is_zero() {
                vec![input.row(case_id, on_deductible, ExpensePayer::ClientDeductible, None)]
            } else if on_deductible.is_zero() {
                vec![input.row(case_id, on_insurer, ExpensePayer::Insurer, None)]
            } else {
                let group = Uuid::new_v4();
                vec![
                    input.row(case_id, on_deductible, ExpensePayer::ClientDeductible, Some(group)),
                    input.row(case_id, on_insurer, ExpensePayer::Insurer, Some(group)),
                ]
            }
        }
    };

    let reaches_insurer = rows.iter().any(|r| r.payer == ExpensePayer::Insurer);
    let mut batch = LedgerBatch::new(case_id);
    if reaches_insurer && !case.insurer_started {
        batch.insurer_started_on = Some(input.expense_date);
        info!(
            case_id = %case_id,
            start_date = %input.expense_date,
            "Deductible exhausted; insurer now paying"
        );
    }
    batch.expenses = rows.clone();
    batch.activity.push(ActivityRecord::new(
        "expense_added",
        "expense",
        Some(rows.iter().map(|r| r.id.to_string()).collect::<Vec<_>>().join(",")),
        serde_json::json!({
            "case_id": case_id,
            "amount_ils_gross": amount.to_string(),
            "category": input.category.as_str(),
            "split": rows.len() > 1,
        }),
    ));
    db.apply_ledger_batch(&batch).await?;

    info!(
        case_id = %case_id,
        amount = %amount,
        rows = rows.len(),
        category = input.category.as_str(),
        "Expense recorded"
    );
    Ok(rows)
}

/// Expenses for a case, newest first.
pub async fn list_expenses(
    db: &dyn Database,
    case_id: Uuid,
) -> Result<Vec<ExpenseRecord>, LedgerError> {
    let mut rows = db.list_expenses(case_id).await?;
    rows.reverse();
    Ok(rows)
}
