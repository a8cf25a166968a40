//! Error types for transaction payloads

use thiserror::Error;

/// Result type for payload operations
pub type Result<T> = std::result::Result<T, Error>;

/// Payload errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// `transaction_type` is not one of deposit, withdrawal or transfer
    #[error("Unsupported transaction type: {0:?}")]
    UnsupportedTransactionType(String),

    /// Unknown status string
    #[error("Unknown transaction status: {0:?}")]
    UnknownStatus(String),
}
