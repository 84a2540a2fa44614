//! SQLite-dialect schema for the libSQL backend.
//!
//! Monetary columns are decimal TEXT so values round-trip exactly through
//! `rust_decimal`; dates are ISO-8601 `YYYY-MM-DD` TEXT.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cases (
    id TEXT PRIMARY KEY,
    case_reference TEXT NOT NULL UNIQUE,
    case_name TEXT,
    case_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'OPEN',
    open_date TEXT NOT NULL,
    retainer_anchor_date TEXT NOT NULL,
    branch_name TEXT,
    deductible_usd TEXT,
    fx_rate_usd_ils TEXT,
    fx_date_used TEXT,
    fx_source TEXT NOT NULL DEFAULT 'BOI',
    deductible_ils_gross TEXT NOT NULL,
    insurer_started INTEGER NOT NULL DEFAULT 0,
    insurer_start_date TEXT,
    retainer_snapshot_ils_gross TEXT,
    retainer_snapshot_through_month TEXT,
    expenses_snapshot_ils_gross TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cases_status ON cases(status);

CREATE TABLE IF NOT EXISTS expenses (
    id TEXT PRIMARY KEY,
    case_id TEXT NOT NULL REFERENCES cases(id) ON DELETE CASCADE,
    supplier_name TEXT,
    amount_ils_gross TEXT NOT NULL,
    service_description TEXT,
    demand_received_date TEXT,
    expense_date TEXT NOT NULL,
    category TEXT NOT NULL,
    payer TEXT NOT NULL,
    attachment_url TEXT,
    split_group_id TEXT,
    is_split_part INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_expenses_case ON expenses(case_id);

CREATE TABLE IF NOT EXISTS retainer_accruals (
    id TEXT PRIMARY KEY,
    case_id TEXT NOT NULL REFERENCES cases(id) ON DELETE CASCADE,
    accrual_month TEXT NOT NULL,
    invoice_date TEXT NOT NULL,
    due_date TEXT NOT NULL,
    amount_ils_gross TEXT NOT NULL,
    is_paid INTEGER NOT NULL DEFAULT 0,
    UNIQUE (case_id, accrual_month)
);

CREATE TABLE IF NOT EXISTS retainer_payments (
    id TEXT PRIMARY KEY,
    case_id TEXT NOT NULL REFERENCES cases(id) ON DELETE CASCADE,
    payment_date TEXT NOT NULL,
    amount_ils_gross TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_retainer_payments_case ON retainer_payments(case_id);

CREATE TABLE IF NOT EXISTS fee_events (
    id TEXT PRIMARY KEY,
    case_id TEXT NOT NULL REFERENCES cases(id) ON DELETE CASCADE,
    sequence INTEGER NOT NULL,
    event_type TEXT NOT NULL,
    event_date TEXT NOT NULL,
    quantity INTEGER NOT NULL DEFAULT 1,
    amount_override_ils_gross TEXT,
    computed_amount_ils_gross TEXT NOT NULL,
    amount_covered_by_credit_ils_gross TEXT NOT NULL DEFAULT '0.00',
    amount_due_cash_ils_gross TEXT NOT NULL DEFAULT '0.00',
    created_at TEXT NOT NULL,
    UNIQUE (case_id, sequence)
);

CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,
    case_id TEXT REFERENCES cases(id) ON DELETE SET NULL,
    type TEXT NOT NULL,
    title TEXT NOT NULL,
    message TEXT NOT NULL,
    severity TEXT NOT NULL DEFAULT 'info',
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notifications_created ON notifications(created_at);

CREATE TABLE IF NOT EXISTS alert_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    case_id TEXT REFERENCES cases(id) ON DELETE CASCADE,
    type TEXT NOT NULL,
    key TEXT NOT NULL,
    last_sent_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (type, key)
);

CREATE TABLE IF NOT EXISTS fx_rates (
    rate_date TEXT PRIMARY KEY,
    rate_usd_ils TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT 'BOI',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS activity_log (
    id TEXT PRIMARY KEY,
    action TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT,
    details TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);
"#;
