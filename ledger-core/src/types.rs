//! Core types for the transaction ledger
//!
//! `Transaction` is the bus payload and is decoded leniently: unknown
//! transaction kinds still decode so that the router can reject them
//! explicitly instead of the runtime dropping them as garbage.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Kind of balance mutation a transaction requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    /// Credit the source account
    Deposit,
    /// Debit the source account
    Withdrawal,
    /// Move funds from the source to the destination account
    Transfer,
}

impl TransactionType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Transfer => "transfer",
        }
    }
}

impl FromStr for TransactionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "transfer" => Ok(TransactionType::Transfer),
            other => Err(Error::UnsupportedTransactionType(other.to_string())),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status carried on payloads and ledger records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Submitted, not yet applied
    Pending,
    /// Applied and recorded in the ledger
    Completed,
    /// Rejected
    Failed,
}

impl TransactionStatus {
    /// Storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(Error::UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction request as carried on the `transaction`, `transaction-ledger`
/// and `dead-ledger` topics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Source account number
    pub from_account_id: String,

    /// Destination account number (transfers only; may arrive empty)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_account_id: Option<String>,

    /// Requested amount
    pub amount: Decimal,

    /// Raw kind; see [`Transaction::kind`]
    pub transaction_type: String,

    /// Free-form description
    #[serde(default)]
    pub description: String,

    /// Submission time as stamped by the producer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Producer-side status
    #[serde(default)]
    pub status: String,
}

impl Transaction {
    /// Parse the transaction kind. Unknown kinds are an error.
    pub fn kind(&self) -> crate::Result<TransactionType> {
        self.transaction_type.parse()
    }

    /// Destination account, treating an empty string as absent
    pub fn destination(&self) -> Option<&str> {
        self.to_account_id
            .as_deref()
            .map(str::trim)
            .filter(|account| !account.is_empty())
    }
}

/// Immutable ledger record of a completed transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLedger {
    /// Record id (UUIDv7 for time-ordering)
    pub id: Uuid,
    /// Source account number
    pub from_account_id: String,
    /// Destination account number
    pub to_account_id: Option<String>,
    /// Amount applied
    pub amount: Decimal,
    /// Transaction kind as received
    pub transaction_type: String,
    /// Free-form description
    pub description: String,
    /// Projection time
    pub created_at: DateTime<Utc>,
    /// Always `Completed` for projected records
    pub status: TransactionStatus,
}

impl TransactionLedger {
    /// Build the ledger record for a successfully applied transaction.
    ///
    /// Id, creation time and status are assigned here; whatever the payload
    /// carried for them is discarded.
    pub fn project(tx: Transaction) -> Self {
        Self {
            id: Uuid::now_v7(),
            to_account_id: tx.destination().map(str::to_string),
            from_account_id: tx.from_account_id,
            amount: tx.amount,
            transaction_type: tx.transaction_type,
            description: tx.description,
            created_at: Utc::now(),
            status: TransactionStatus::Completed,
        }
    }
}

/// Account row in the balance store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Row id
    pub id: Uuid,
    /// Unique account number
    pub account_number: String,
    /// Current balance, never negative
    pub balance: Decimal,
    /// Whether the account accepts activity
    pub is_active: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last balance change
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Open an active account with the given balance
    pub fn open(account_number: impl Into<String>, balance: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_number: account_number.into(),
            balance,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}
