use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerServiceError>;

#[derive(Error, Debug)]
pub enum LedgerServiceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Ledger insert timed out after {0:?}")]
    InsertTimeout(Duration),
}
