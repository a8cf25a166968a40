use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransactionServiceError>;

#[derive(Error, Debug)]
pub enum TransactionServiceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported transaction type: {0:?}")]
    UnsupportedTransactionType(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Insufficient funds in {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account: String,
        balance: Decimal,
        requested: Decimal,
    },

    #[error("Rejected on an earlier delivery of {key}: {reason}")]
    PreviouslyRejected { key: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Balance store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Expected {expected} rows to change, {actual} did")]
    UnexpectedRowCount { expected: u64, actual: u64 },

    #[error("Message bus error: {0}")]
    Bus(#[from] message_bus::Error),
}

impl TransactionServiceError {
    /// Terminal for the transaction: park it on the dead-letter topic, never retry.
    pub fn is_business_rejection(&self) -> bool {
        matches!(
            self,
            TransactionServiceError::Validation(_)
                | TransactionServiceError::UnsupportedTransactionType(_)
                | TransactionServiceError::AccountNotFound(_)
                | TransactionServiceError::InsufficientFunds { .. }
                | TransactionServiceError::PreviouslyRejected { .. }
        )
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            TransactionServiceError::Validation(_) => "validation",
            TransactionServiceError::UnsupportedTransactionType(_) => "unsupported_type",
            TransactionServiceError::AccountNotFound(_) => "not_found",
            TransactionServiceError::InsufficientFunds { .. } => "insufficient_funds",
            TransactionServiceError::PreviouslyRejected { .. } => "previously_rejected",
            TransactionServiceError::Database(_) => "database",
            TransactionServiceError::StoreUnavailable(_) => "store_unavailable",
            TransactionServiceError::UnexpectedRowCount { .. } => "row_count",
            TransactionServiceError::Bus(_) => "bus",
        }
    }
}

impl From<ledger_core::Error> for TransactionServiceError {
    fn from(err: ledger_core::Error) -> Self {
        match err {
            ledger_core::Error::UnsupportedTransactionType(kind) => {
                TransactionServiceError::UnsupportedTransactionType(kind)
            }
            other => TransactionServiceError::Validation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_rejections() {
        assert!(TransactionServiceError::Validation("x".into()).is_business_rejection());
        assert!(TransactionServiceError::AccountNotFound("Acc1".into()).is_business_rejection());
        assert!(TransactionServiceError::InsufficientFunds {
            account: "Acc1".into(),
            balance: Decimal::from(30),
            requested: Decimal::from(50),
        }
        .is_business_rejection());
        assert!(TransactionServiceError::PreviouslyRejected {
            key: "TRANSACTION:1".into(),
            reason: "Account not found: Acc9".into(),
        }
        .is_business_rejection());
    }

    #[test]
    fn test_infra_errors_are_not_rejections() {
        assert!(!TransactionServiceError::StoreUnavailable("down".into()).is_business_rejection());
        assert!(!TransactionServiceError::Database(sqlx::Error::PoolTimedOut).is_business_rejection());
        assert!(!TransactionServiceError::UnexpectedRowCount { expected: 2, actual: 1 }.is_business_rejection());
    }
}
