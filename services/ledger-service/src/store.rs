use async_trait::async_trait;
use ledger_core::TransactionLedger;
use uuid::Uuid;

use crate::errors::Result;

/// Append-only ledger storage
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append `record`, keyed by the delivery it was projected from.
    ///
    /// If a record for `source_key` already exists nothing is written and the
    /// existing record's id is returned.
    async fn insert(&self, record: &TransactionLedger, source_key: &str) -> Result<Uuid>;
}
