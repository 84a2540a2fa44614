//! Case creation, status changes and the per-case overview.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::db::{
    ActivityRecord, CaseRecord, CaseStatus, CaseType, Database, FxSource, LedgerBatch,
};
use crate::error::{DatabaseError, LedgerError};
use crate::fx::FxLookup;
use crate::ledger::deductible::{consumed_on_deductible, deductible_remaining};
use crate::ledger::excess::excess_remaining;
use crate::ledger::money::quantize;
use crate::ledger::retainer::{
    RetainerSummary, month_start, plan_accruals, retainer_anchor_date, retainer_summary,
};

/// The deductible as supplied: USD (converted at the opening-date rate) or ILS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeductibleInput {
    Usd(Decimal),
    Ils(Decimal),
}

#[derive(Debug, Clone)]
pub struct CaseConfig {
    pub case_reference: String,
    pub case_name: Option<String>,
    pub case_type: CaseType,
    pub open_date: NaiveDate,
    pub deductible: Option<DeductibleInput>,
    pub branch_name: Option<String>,
    /// Overrides the derived semiannual anchor.
    pub retainer_anchor_date: Option<NaiveDate>,
    pub retainer_snapshot_ils_gross: Option<Decimal>,
    pub retainer_snapshot_through_month: Option<NaiveDate>,
    pub expenses_snapshot_ils_gross: Option<Decimal>,
}

impl CaseConfig {
    pub fn new(
        case_reference: impl Into<String>,
        case_type: CaseType,
        open_date: NaiveDate,
        deductible: DeductibleInput,
    ) -> Self {
        Self {
            case_reference: case_reference.into(),
            case_name: None,
            case_type,
            open_date,
            deductible: Some(deductible),
            branch_name: None,
            retainer_anchor_date: None,
            retainer_snapshot_ils_gross: None,
            retainer_snapshot_through_month: None,
            expenses_snapshot_ils_gross: None,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn snapshot(value: Option<Decimal>, field: &str) -> Result<Option<Decimal>, LedgerError> {
    match value.map(quantize) {
        Some(v) if v < Decimal::ZERO => Err(LedgerError::InvalidInput(format!(
            "{} must not be negative (got {})",
            field, v
        ))),
        other => Ok(other),
    }
}

/// Open a case and generate its retainer schedule through `today`'s month.
pub async fn create_case(
    db: &dyn Database,
    fx: &FxLookup,
    config: CaseConfig,
    today: NaiveDate,
) -> Result<CaseRecord, LedgerError> {
    let case_reference = config.case_reference.trim().to_string();
    if case_reference.is_empty() {
        return Err(LedgerError::InvalidInput(
            "case_reference is required".to_string(),
        ));
    }
    let deductible = config.deductible.ok_or(LedgerError::MissingDeductible)?;
    let retainer_snapshot =
        snapshot(config.retainer_snapshot_ils_gross, "retainer_snapshot_ils_gross")?;
    let expenses_snapshot =
        snapshot(config.expenses_snapshot_ils_gross, "expenses_snapshot_ils_gross")?;
    if config.retainer_snapshot_through_month.is_some() && retainer_snapshot.is_none() {
        return Err(LedgerError::InvalidInput(
            "retainer_snapshot_through_month requires retainer_snapshot_ils_gross".to_string(),
        ));
    }

    if db.get_case_by_reference(&case_reference).await?.is_some() {
        return Err(LedgerError::DuplicateCaseReference(case_reference));
    }

    let (deductible_usd, fx_rate, fx_date_used, fx_source, deductible_ils) = match deductible {
        DeductibleInput::Usd(usd) => {
            let usd = quantize(usd);
            if usd <= Decimal::ZERO {
                return Err(LedgerError::InvalidAmount(usd));
            }
            let (rate, used) = fx.usd_ils_rate(config.open_date).await?;
            (Some(usd), Some(rate), Some(used), FxSource::Boi, quantize(usd * rate))
        }
        DeductibleInput::Ils(ils) => {
            let ils = quantize(ils);
            if ils <= Decimal::ZERO {
                return Err(LedgerError::InvalidAmount(ils));
            }
            (None, None, None, FxSource::Imported, ils)
        }
    };

    let case = CaseRecord {
        id: Uuid::new_v4(),
        case_reference,
        case_name: non_empty(config.case_name),
        case_type: config.case_type,
        status: CaseStatus::Open,
        open_date: config.open_date,
        retainer_anchor_date: config
            .retainer_anchor_date
            .unwrap_or_else(|| retainer_anchor_date(config.open_date)),
        branch_name: non_empty(config.branch_name),
        deductible_usd,
        fx_rate_usd_ils: fx_rate,
        fx_date_used,
        fx_source,
        deductible_ils_gross: deductible_ils,
        insurer_started: false,
        insurer_start_date: None,
        retainer_snapshot_ils_gross: retainer_snapshot,
        retainer_snapshot_through_month: config.retainer_snapshot_through_month.map(month_start),
        expenses_snapshot_ils_gross: expenses_snapshot,
        created_at: Utc::now(),
    };

    let mut batch = LedgerBatch::new(case.id);
    batch.accruals = plan_accruals(&case, &[], today);
    batch.activity.push(ActivityRecord::new(
        "case_created",
        "case",
        Some(case.id.to_string()),
        serde_json::json!({
            "case_reference": case.case_reference,
            "deductible_ils_gross": case.deductible_ils_gross.to_string(),
            "fx_source": case.fx_source.as_str(),
            "accruals": batch.accruals.len(),
        }),
    ));

    match db.insert_case(&case, &batch).await {
        Ok(()) => {}
        Err(DatabaseError::Constraint(_)) => {
            return Err(LedgerError::DuplicateCaseReference(case.case_reference));
        }
        Err(err) => return Err(err.into()),
    }

    info!(
        case_id = %case.id,
        case_reference = %case.case_reference,
        deductible = %case.deductible_ils_gross,
        anchor = %case.retainer_anchor_date,
        accruals = batch.accruals.len(),
        "Case created"
    );
    Ok(case)
}

/// Change a case's status and log the change in one transaction.
pub async fn update_case_status(
    db: &dyn Database,
    case_id: Uuid,
    status: CaseStatus,
) -> Result<CaseRecord, LedgerError> {
    let mut case = db
        .get_case(case_id)
        .await?
        .ok_or(LedgerError::CaseNotFound(case_id))?;

    let mut batch = LedgerBatch::new(case_id);
    batch.status = Some(status);
    batch.activity.push(ActivityRecord::new(
        "case_status_changed",
        "case",
        Some(case_id.to_string()),
        serde_json::json!({ "status": status.as_str() }),
    ));
    db.apply_ledger_batch(&batch).await?;

    case.status = status;
    info!(case_id = %case_id, status = status.as_str(), "Case status updated");
    Ok(case)
}

pub async fn list_cases(db: &dyn Database) -> Result<Vec<CaseRecord>, LedgerError> {
    Ok(db.list_cases().await?)
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseOverview {
    pub case: CaseRecord,
    pub excess_remaining_ils_gross: Decimal,
    pub deductible_remaining_ils_gross: Decimal,
    pub retainer: RetainerSummary,
}

pub async fn case_overview(db: &dyn Database, case_id: Uuid) -> Result<CaseOverview, LedgerError> {
    let case = db
        .get_case(case_id)
        .await?
        .ok_or(LedgerError::CaseNotFound(case_id))?;
    let expenses = db.list_expenses(case_id).await?;
    let payments = db.list_payments(case_id).await?;

    Ok(CaseOverview {
        excess_remaining_ils_gross: excess_remaining(&case, &payments, &expenses),
        deductible_remaining_ils_gross: deductible_remaining(
            case.deductible_ils_gross,
            consumed_on_deductible(&expenses),
        ),
        retainer: retainer_summary(db, case_id).await?,
        case,
    })
}
