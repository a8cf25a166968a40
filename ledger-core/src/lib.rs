//! Ledger Core
//!
//! Wire and domain types shared by the transaction and ledger services.
//!
//! # Invariants
//!
//! - An account balance never drops below zero
//! - A transfer moves funds between two distinct accounts and conserves their sum
//! - A ledger record takes its id and creation time from the projector, never from the event

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod error;
pub mod types;

// Re-exports
pub use error::{Error, Result};
pub use types::{Account, Transaction, TransactionLedger, TransactionStatus, TransactionType};
