//! Case finance ledger: deductibles, monthly retainers, itemized expenses and
//! staged attorney fees, with automatic allocation between a client's
//! deductible and the insurer.

pub mod config;
pub mod db;
pub mod error;
pub mod fx;
pub mod ledger;
pub mod notify;
pub mod settings;

pub use error::{ConfigError, DatabaseError, FxError, LedgerError, NotifyError};
