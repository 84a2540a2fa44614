//! The ledger engine.
//!
//! Every figure (remaining deductible, paid flags, fee credit) is recomputed
//! from stored rows on each call. Mutations build one [`LedgerBatch`] and hand
//! it to the store, which commits it atomically.
//!
//! [`LedgerBatch`]: crate::db::LedgerBatch

pub mod alerts;
pub mod cases;
pub mod deductible;
pub mod excess;
pub mod expenses;
pub mod fees;
pub mod money;
pub mod retainer;

use serde::Serialize;
use uuid::Uuid;

use crate::db::CaseRecord;
use crate::error::LedgerError;

pub use alerts::{SweepReport, list_notifications, mark_notification_read, run_daily_sweep};
pub use cases::{
    CaseConfig, CaseOverview, DeductibleInput, case_overview, create_case, list_cases,
    update_case_status,
};
pub use deductible::{case_deductible_remaining, deductible_remaining, split};
pub use excess::{case_excess_remaining, excess_remaining};
pub use expenses::{ExpenseInput, add_expense, list_expenses};
pub use fees::{
    FeeEventInput, add_fee_event, apply_credit, apply_retainer_credit, compute_fee_amount,
    list_fee_events,
};
pub use money::quantize;
pub use retainer::{
    PaymentInput, RetainerSummary, RollForwardReport, add_retainer_payment, ensure_accruals,
    list_accruals, list_payments, retainer_summary, roll_forward_open_cases,
};

/// A case the sweep could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseFailure {
    pub case_id: Uuid,
    pub case_reference: String,
    pub error: String,
}

impl CaseFailure {
    pub(crate) fn new(case: &CaseRecord, err: &LedgerError) -> Self {
        Self {
            case_id: case.id,
            case_reference: case.case_reference.clone(),
            error: err.to_string(),
        }
    }
}
