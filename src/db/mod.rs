//! Database abstraction layer.
//!
//! Provides a backend-agnostic `Database` trait that unifies all persistence
//! operations the ledger engine needs. The engine never keeps running
//! counters: every figure is recomputed from the rows returned here.
//!
//! Mutations are expressed as a [`LedgerBatch`] that the backend must commit
//! atomically, so a deductible/insurer split or a payment together with its
//! reallocation either lands in full or not at all.

#[cfg(feature = "libsql")]
pub mod libsql;

#[cfg(feature = "libsql")]
pub mod libsql_migrations;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;

/// Create a database backend from configuration, run migrations, and return it.
pub async fn connect_from_config(
    config: &crate::config::DatabaseConfig,
) -> Result<Arc<dyn Database>, DatabaseError> {
    #[cfg(feature = "libsql")]
    {
        let backend = match config.path.as_deref() {
            Some(path) => libsql::LibSqlBackend::new_local(path)
                .await
                .map_err(|e| DatabaseError::Pool(e.to_string()))?,
            None => libsql::LibSqlBackend::new_memory()
                .await
                .map_err(|e| DatabaseError::Pool(e.to_string()))?,
        };
        backend.run_migrations().await?;
        Ok(Arc::new(backend))
    }
    #[cfg(not(feature = "libsql"))]
    {
        let _ = config;
        Err(DatabaseError::Pool(
            "No database backend available. Enable the 'libsql' feature.".to_string(),
        ))
    }
}

/// Kind of proceeding a case belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseType {
    Court,
    DemandLetter,
    SmallClaims,
}

impl CaseType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Court => "COURT",
            Self::DemandLetter => "DEMAND_LETTER",
            Self::SmallClaims => "SMALL_CLAIMS",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "COURT" => Some(Self::Court),
            "DEMAND_LETTER" => Some(Self::DemandLetter),
            "SMALL_CLAIMS" => Some(Self::SmallClaims),
            _ => None,
        }
    }
}

/// Case lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseStatus {
    Open,
    Closed,
}

impl CaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "OPEN" => Some(Self::Open),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Where the case deductible figure came from. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FxSource {
    Boi,
    Imported,
}

impl FxSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boi => "BOI",
            Self::Imported => "IMPORTED",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "BOI" => Some(Self::Boi),
            "IMPORTED" => Some(Self::Imported),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpenseCategory {
    AttorneyFee,
    Expert,
    MedicalInfo,
    Investigator,
    Fees,
    Other,
}

impl ExpenseCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AttorneyFee => "ATTORNEY_FEE",
            Self::Expert => "EXPERT",
            Self::MedicalInfo => "MEDICAL_INFO",
            Self::Investigator => "INVESTIGATOR",
            Self::Fees => "FEES",
            Self::Other => "OTHER",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "ATTORNEY_FEE" => Some(Self::AttorneyFee),
            "EXPERT" => Some(Self::Expert),
            "MEDICAL_INFO" => Some(Self::MedicalInfo),
            "INVESTIGATOR" => Some(Self::Investigator),
            "FEES" => Some(Self::Fees),
            "OTHER" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Who bears an expense row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpensePayer {
    ClientDeductible,
    Insurer,
}

impl ExpensePayer {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientDeductible => "CLIENT_DEDUCTIBLE",
            Self::Insurer => "INSURER",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "CLIENT_DEDUCTIBLE" => Some(Self::ClientDeductible),
            "INSURER" => Some(Self::Insurer),
            _ => None,
        }
    }
}

/// Billable attorney-fee milestones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeeEventType {
    CourtStage1Defense,
    CourtStage2Damages,
    CourtStage3Evidence,
    CourtStage4Proofs,
    CourtStage5Summaries,
    AmendedDefensePartial,
    AmendedDefenseFull,
    ThirdPartyNotice,
    /// Quantity counts hearings.
    AdditionalProofHearing,
    DemandFix,
    /// Quantity counts hours.
    DemandHourly,
    SmallClaimsManual,
}

impl FeeEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CourtStage1Defense => "COURT_STAGE_1_DEFENSE",
            Self::CourtStage2Damages => "COURT_STAGE_2_DAMAGES",
            Self::CourtStage3Evidence => "COURT_STAGE_3_EVIDENCE",
            Self::CourtStage4Proofs => "COURT_STAGE_4_PROOFS",
            Self::CourtStage5Summaries => "COURT_STAGE_5_SUMMARIES",
            Self::AmendedDefensePartial => "AMENDED_DEFENSE_PARTIAL",
            Self::AmendedDefenseFull => "AMENDED_DEFENSE_FULL",
            Self::ThirdPartyNotice => "THIRD_PARTY_NOTICE",
            Self::AdditionalProofHearing => "ADDITIONAL_PROOF_HEARING",
            Self::DemandFix => "DEMAND_FIX",
            Self::DemandHourly => "DEMAND_HOURLY",
            Self::SmallClaimsManual => "SMALL_CLAIMS_MANUAL",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "COURT_STAGE_1_DEFENSE" => Some(Self::CourtStage1Defense),
            "COURT_STAGE_2_DAMAGES" => Some(Self::CourtStage2Damages),
            "COURT_STAGE_3_EVIDENCE" => Some(Self::CourtStage3Evidence),
            "COURT_STAGE_4_PROOFS" => Some(Self::CourtStage4Proofs),
            "COURT_STAGE_5_SUMMARIES" => Some(Self::CourtStage5Summaries),
            "AMENDED_DEFENSE_PARTIAL" => Some(Self::AmendedDefensePartial),
            "AMENDED_DEFENSE_FULL" => Some(Self::AmendedDefenseFull),
            "THIRD_PARTY_NOTICE" => Some(Self::ThirdPartyNotice),
            "ADDITIONAL_PROOF_HEARING" => Some(Self::AdditionalProofHearing),
            "DEMAND_FIX" => Some(Self::DemandFix),
            "DEMAND_HOURLY" => Some(Self::DemandHourly),
            "SMALL_CLAIMS_MANUAL" => Some(Self::SmallClaimsManual),
            _ => None,
        }
    }

    /// Types billed as `base × quantity`.
    pub fn is_per_unit(self) -> bool {
        matches!(self, Self::AdditionalProofHearing | Self::DemandHourly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    DeductibleNearExhaustion,
    InsurerStartedPaying,
    RetainerDueSoon,
    RetainerOverdue,
}

impl NotificationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeductibleNearExhaustion => "DEDUCTIBLE_NEAR_EXHAUSTION",
            Self::InsurerStartedPaying => "INSURER_STARTED_PAYING",
            Self::RetainerDueSoon => "RETAINER_DUE_SOON",
            Self::RetainerOverdue => "RETAINER_OVERDUE",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "DEDUCTIBLE_NEAR_EXHAUSTION" => Some(Self::DeductibleNearExhaustion),
            "INSURER_STARTED_PAYING" => Some(Self::InsurerStartedPaying),
            "RETAINER_DUE_SOON" => Some(Self::RetainerDueSoon),
            "RETAINER_OVERDUE" => Some(Self::RetainerOverdue),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Danger,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Danger => "danger",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "danger" => Some(Self::Danger),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: Uuid,
    pub case_reference: String,
    pub case_name: Option<String>,
    pub case_type: CaseType,
    pub status: CaseStatus,
    pub open_date: NaiveDate,
    pub retainer_anchor_date: NaiveDate,
    pub branch_name: Option<String>,
    pub deductible_usd: Option<Decimal>,
    pub fx_rate_usd_ils: Option<Decimal>,
    pub fx_date_used: Option<NaiveDate>,
    pub fx_source: FxSource,
    /// Total deductible capacity. Never changes after creation.
    pub deductible_ils_gross: Decimal,
    pub insurer_started: bool,
    pub insurer_start_date: Option<NaiveDate>,
    pub retainer_snapshot_ils_gross: Option<Decimal>,
    pub retainer_snapshot_through_month: Option<NaiveDate>,
    pub expenses_snapshot_ils_gross: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    pub id: Uuid,
    pub case_id: Uuid,
    pub supplier_name: Option<String>,
    pub amount_ils_gross: Decimal,
    pub service_description: Option<String>,
    pub demand_received_date: Option<NaiveDate>,
    pub expense_date: NaiveDate,
    pub category: ExpenseCategory,
    pub payer: ExpensePayer,
    pub attachment_url: Option<String>,
    pub split_group_id: Option<Uuid>,
    pub is_split_part: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetainerAccrualRecord {
    pub id: Uuid,
    pub case_id: Uuid,
    /// First day of the billed month; unique per case.
    pub accrual_month: NaiveDate,
    pub invoice_date: NaiveDate,
    pub due_date: NaiveDate,
    pub amount_ils_gross: Decimal,
    pub is_paid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetainerPaymentRecord {
    pub id: Uuid,
    pub case_id: Uuid,
    pub payment_date: NaiveDate,
    pub amount_ils_gross: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeEventRecord {
    pub id: Uuid,
    pub case_id: Uuid,
    /// Per-case insertion order; breaks ties between events on the same date.
    pub sequence: i64,
    pub event_type: FeeEventType,
    pub event_date: NaiveDate,
    pub quantity: i32,
    pub amount_override_ils_gross: Option<Decimal>,
    pub computed_amount_ils_gross: Decimal,
    pub amount_covered_by_credit_ils_gross: Decimal,
    pub amount_due_cash_ils_gross: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub case_id: Option<Uuid>,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxRateRecord {
    pub rate_date: NaiveDate,
    pub rate_usd_ils: Decimal,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn new(
        action: &str,
        entity_type: &str,
        entity_id: Option<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id,
            details,
            created_at: Utc::now(),
        }
    }
}

/// Recomputed credit split for one fee event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeAllocation {
    pub fee_event_id: Uuid,
    pub covered: Decimal,
    pub due: Decimal,
}

/// All ledger writes produced by one mutating operation on one case.
///
/// Backends must apply the whole batch in a single transaction.
#[derive(Debug, Clone, Default)]
pub struct LedgerBatch {
    pub case_id: Uuid,
    pub expenses: Vec<ExpenseRecord>,
    pub accruals: Vec<RetainerAccrualRecord>,
    pub payments: Vec<RetainerPaymentRecord>,
    pub fee_events: Vec<FeeEventRecord>,
    /// Full `is_paid` recomputation for every accrual of the case.
    pub accrual_paid: Vec<(Uuid, bool)>,
    /// Full credit recomputation for every fee event of the case.
    pub fee_allocations: Vec<FeeAllocation>,
    /// Flip `insurer_started` on, at most once per case.
    pub insurer_started_on: Option<NaiveDate>,
    pub status: Option<CaseStatus>,
    pub activity: Vec<ActivityRecord>,
}

impl LedgerBatch {
    pub fn new(case_id: Uuid) -> Self {
        Self {
            case_id,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.expenses.is_empty()
            && self.accruals.is_empty()
            && self.payments.is_empty()
            && self.fee_events.is_empty()
            && self.accrual_paid.is_empty()
            && self.fee_allocations.is_empty()
            && self.insurer_started_on.is_none()
            && self.status.is_none()
            && self.activity.is_empty()
    }
}

// ==================== Sub-traits ====================
//
// Each sub-trait groups related persistence methods. The `Database` supertrait
// combines them all; leaf consumers can depend on a specific sub-trait instead.

#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Insert a case together with its initial ledger rows, atomically.
    async fn insert_case(&self, case: &CaseRecord, batch: &LedgerBatch)
    -> Result<(), DatabaseError>;
    async fn get_case(&self, case_id: Uuid) -> Result<Option<CaseRecord>, DatabaseError>;
    async fn get_case_by_reference(
        &self,
        case_reference: &str,
    ) -> Result<Option<CaseRecord>, DatabaseError>;
    async fn list_cases(&self) -> Result<Vec<CaseRecord>, DatabaseError>;
    async fn list_cases_by_status(
        &self,
        status: CaseStatus,
    ) -> Result<Vec<CaseRecord>, DatabaseError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Expenses for a case, oldest first (`expense_date`, then creation).
    async fn list_expenses(&self, case_id: Uuid) -> Result<Vec<ExpenseRecord>, DatabaseError>;
    /// Accruals for a case in ascending `accrual_month` order.
    async fn list_accruals(
        &self,
        case_id: Uuid,
    ) -> Result<Vec<RetainerAccrualRecord>, DatabaseError>;
    /// Unpaid accruals across all cases.
    async fn list_unpaid_accruals(&self) -> Result<Vec<RetainerAccrualRecord>, DatabaseError>;
    async fn list_payments(
        &self,
        case_id: Uuid,
    ) -> Result<Vec<RetainerPaymentRecord>, DatabaseError>;
    /// Fee events ordered by (`event_date`, `sequence`).
    async fn list_fee_events(&self, case_id: Uuid) -> Result<Vec<FeeEventRecord>, DatabaseError>;
    async fn apply_ledger_batch(&self, batch: &LedgerBatch) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn has_alert(
        &self,
        notification_type: NotificationType,
        key: &str,
    ) -> Result<bool, DatabaseError>;
    async fn record_alert(
        &self,
        notification_type: NotificationType,
        key: &str,
        case_id: Option<Uuid>,
    ) -> Result<(), DatabaseError>;
    async fn create_notification(
        &self,
        notification: &NotificationRecord,
    ) -> Result<(), DatabaseError>;
    /// Newest first.
    async fn list_notifications(
        &self,
        limit: i64,
    ) -> Result<Vec<NotificationRecord>, DatabaseError>;
    async fn mark_notification_read(&self, id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait FxRateStore: Send + Sync {
    async fn get_fx_rate(&self, rate_date: NaiveDate)
    -> Result<Option<FxRateRecord>, DatabaseError>;
    /// Insert unless a rate for that date already exists.
    async fn put_fx_rate(&self, rate: &FxRateRecord) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn append_activity(&self, entry: &ActivityRecord) -> Result<(), DatabaseError>;
    /// Newest first.
    async fn list_activity(&self, limit: i64) -> Result<Vec<ActivityRecord>, DatabaseError>;
}

/// Backend-agnostic database supertrait.
#[async_trait]
pub trait Database:
    CaseStore + LedgerStore + AlertStore + FxRateStore + ActivityStore + Send + Sync
{
    /// Run schema migrations for this backend.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}
