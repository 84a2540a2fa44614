//! caseledger command-line entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use caseledger::config::{self, LedgerConfig};
use caseledger::db::{
    self, CaseRecord, CaseStatus, CaseType, Database, ExpenseCategory, ExpensePayer, FeeEventType,
};
use caseledger::fx::{BoiClient, FxLookup};
use caseledger::ledger::{
    self, CaseConfig, DeductibleInput, ExpenseInput, FeeEventInput, PaymentInput,
};
use caseledger::notify::LogSink;
use caseledger::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "caseledger", version, about = "Legal case finance ledger")]
struct Cli {
    /// Settings file (TOML). Defaults to the user config directory.
    #[arg(long, env = "CASELEDGER_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and schema.
    Init,
    /// Open a new case.
    CreateCase(CreateCaseArgs),
    /// Book an expense against a case.
    AddExpense(AddExpenseArgs),
    /// Record a retainer payment.
    AddPayment(AddPaymentArgs),
    /// Record a fee event.
    AddFee(AddFeeArgs),
    /// Open or close a case.
    SetStatus {
        /// Case reference or id.
        case: String,
        #[arg(value_parser = parse_status)]
        status: CaseStatus,
    },
    /// Print a case with its balances and ledger rows.
    Show {
        /// Case reference or id.
        case: String,
    },
    /// List notifications, optionally marking one read.
    Notifications {
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long)]
        mark_read: Option<Uuid>,
    },
    /// Run one alert sweep now.
    Sweep,
    /// Run the alert sweep on the configured cron schedule until interrupted.
    Schedule,
}

#[derive(Args, Debug)]
struct CreateCaseArgs {
    #[arg(long)]
    reference: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long, value_parser = parse_case_type)]
    case_type: CaseType,
    #[arg(long)]
    open_date: NaiveDate,
    #[arg(long, conflicts_with = "deductible_ils")]
    deductible_usd: Option<Decimal>,
    #[arg(long)]
    deductible_ils: Option<Decimal>,
    #[arg(long)]
    branch: Option<String>,
    #[arg(long)]
    anchor_date: Option<NaiveDate>,
    #[arg(long)]
    retainer_snapshot: Option<Decimal>,
    #[arg(long)]
    retainer_snapshot_through: Option<NaiveDate>,
    #[arg(long)]
    expenses_snapshot: Option<Decimal>,
}

#[derive(Args, Debug)]
struct AddExpenseArgs {
    case: String,
    #[arg(long)]
    amount: Decimal,
    #[arg(long)]
    date: NaiveDate,
    #[arg(long, value_parser = parse_category)]
    category: ExpenseCategory,
    #[arg(long, value_parser = parse_payer, default_value = "CLIENT_DEDUCTIBLE")]
    payer: ExpensePayer,
    #[arg(long)]
    supplier: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    demand_received: Option<NaiveDate>,
    #[arg(long)]
    attachment_url: Option<String>,
}

#[derive(Args, Debug)]
struct AddPaymentArgs {
    case: String,
    #[arg(long)]
    amount: Decimal,
    #[arg(long)]
    date: NaiveDate,
}

#[derive(Args, Debug)]
struct AddFeeArgs {
    case: String,
    #[arg(long, value_parser = parse_fee_type)]
    event_type: FeeEventType,
    #[arg(long)]
    date: NaiveDate,
    #[arg(long, default_value_t = 1)]
    quantity: i32,
    #[arg(long = "override")]
    amount_override: Option<Decimal>,
}

fn normalize_enum_arg(raw: &str) -> String {
    raw.trim().to_ascii_uppercase().replace('-', "_")
}

fn parse_case_type(raw: &str) -> Result<CaseType, String> {
    CaseType::from_db_value(&normalize_enum_arg(raw))
        .ok_or_else(|| format!("unknown case type '{raw}'"))
}

fn parse_status(raw: &str) -> Result<CaseStatus, String> {
    CaseStatus::from_db_value(&normalize_enum_arg(raw))
        .ok_or_else(|| format!("unknown status '{raw}'"))
}

fn parse_category(raw: &str) -> Result<ExpenseCategory, String> {
    ExpenseCategory::from_db_value(&normalize_enum_arg(raw))
        .ok_or_else(|| format!("unknown expense category '{raw}'"))
}

fn parse_payer(raw: &str) -> Result<ExpensePayer, String> {
    ExpensePayer::from_db_value(&normalize_enum_arg(raw))
        .ok_or_else(|| format!("unknown payer '{raw}'"))
}

fn parse_fee_type(raw: &str) -> Result<FeeEventType, String> {
    FeeEventType::from_db_value(&normalize_enum_arg(raw))
        .ok_or_else(|| format!("unknown fee event type '{raw}'"))
}

fn init_tracing() -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("caseledger=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if config::json_logging_enabled()? {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn find_case(db: &dyn Database, key: &str) -> anyhow::Result<CaseRecord> {
    let found = match Uuid::parse_str(key) {
        Ok(id) => db.get_case(id).await?,
        Err(_) => db.get_case_by_reference(key.trim()).await?,
    };
    found.with_context(|| format!("case '{key}' not found"))
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing()?;

    let cli = Cli::parse();
    let settings_path = cli.config.clone().or_else(Settings::default_path);
    let settings = match settings_path.as_deref() {
        Some(path) => Settings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };
    let config = LedgerConfig::resolve(&settings)?;
    let store = db::connect_from_config(&config.database).await?;

    run(cli.command, &config, store).await
}

async fn run(
    command: Command,
    config: &LedgerConfig,
    store: Arc<dyn Database>,
) -> anyhow::Result<()> {
    let db = store.as_ref();
    match command {
        Command::Init => {
            match &config.database.path {
                Some(path) => println!("Database ready at {}", path.display()),
                None => println!("In-memory database ready"),
            }
        }
        Command::CreateCase(args) => {
            let deductible = match (args.deductible_usd, args.deductible_ils) {
                (Some(usd), _) => Some(DeductibleInput::Usd(usd)),
                (None, Some(ils)) => Some(DeductibleInput::Ils(ils)),
                (None, None) => None,
            };
            let fx = FxLookup::new(
                Arc::new(BoiClient::new(&config.fx)?),
                store.clone(),
                config.fx.lookback_days,
            );
            let case = ledger::create_case(
                db,
                &fx,
                CaseConfig {
                    case_reference: args.reference,
                    case_name: args.name,
                    case_type: args.case_type,
                    open_date: args.open_date,
                    deductible,
                    branch_name: args.branch,
                    retainer_anchor_date: args.anchor_date,
                    retainer_snapshot_ils_gross: args.retainer_snapshot,
                    retainer_snapshot_through_month: args.retainer_snapshot_through,
                    expenses_snapshot_ils_gross: args.expenses_snapshot,
                },
                today(),
            )
            .await?;
            print_json(&case)?;
        }
        Command::AddExpense(args) => {
            let case = find_case(db, &args.case).await?;
            let rows = ledger::add_expense(
                db,
                case.id,
                ExpenseInput {
                    amount_ils_gross: args.amount,
                    expense_date: args.date,
                    category: args.category,
                    payer: args.payer,
                    supplier_name: args.supplier,
                    service_description: args.description,
                    demand_received_date: args.demand_received,
                    attachment_url: args.attachment_url,
                },
            )
            .await?;
            print_json(&rows)?;
        }
        Command::AddPayment(args) => {
            let case = find_case(db, &args.case).await?;
            let payment = ledger::add_retainer_payment(
                db,
                case.id,
                PaymentInput {
                    payment_date: args.date,
                    amount_ils_gross: args.amount,
                },
                today(),
            )
            .await?;
            print_json(&payment)?;
        }
        Command::AddFee(args) => {
            let case = find_case(db, &args.case).await?;
            let event = ledger::add_fee_event(
                db,
                case.id,
                FeeEventInput {
                    event_type: args.event_type,
                    event_date: args.date,
                    quantity: args.quantity,
                    amount_override_ils_gross: args.amount_override,
                },
            )
            .await?;
            print_json(&event)?;
        }
        Command::SetStatus { case, status } => {
            let case = find_case(db, &case).await?;
            let updated = ledger::update_case_status(db, case.id, status).await?;
            print_json(&updated)?;
        }
        Command::Show { case } => {
            let case = find_case(db, &case).await?;
            let overview = ledger::case_overview(db, case.id).await?;
            print_json(&serde_json::json!({
                "overview": overview,
                "accruals": ledger::list_accruals(db, case.id).await?,
                "payments": ledger::list_payments(db, case.id).await?,
                "expenses": ledger::list_expenses(db, case.id).await?,
                "fee_events": ledger::list_fee_events(db, case.id).await?,
            }))?;
        }
        Command::Notifications { limit, mark_read } => {
            if let Some(id) = mark_read {
                ledger::mark_notification_read(db, id).await?;
            }
            print_json(&ledger::list_notifications(db, limit).await?)?;
        }
        Command::Sweep => {
            let report = ledger::run_daily_sweep(db, &LogSink, &config.alerts, today()).await?;
            print_json(&report)?;
        }
        Command::Schedule => schedule_loop(config, db).await?,
    }
    Ok(())
}

async fn schedule_loop(config: &LedgerConfig, db: &dyn Database) -> anyhow::Result<()> {
    info!(schedule = %config.scheduler.expression, "Sweep scheduler started");
    loop {
        let Some(next) = config.scheduler.schedule.upcoming(Utc).next() else {
            bail!(
                "cron expression '{}' has no upcoming run",
                config.scheduler.expression
            );
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        info!(next_run = %next, "Waiting for next sweep");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                match ledger::run_daily_sweep(db, &LogSink, &config.alerts, today()).await {
                    Ok(report) => info!(
                        notifications_sent = report.notifications_sent,
                        failures = report.failures.len(),
                        "Scheduled sweep finished"
                    ),
                    Err(err) => error!(error = %err, "Scheduled sweep failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received; stopping scheduler");
                return Ok(());
            }
        }
    }
}
