//! Balance store capabilities used by the engine.
//!
//! A [`BalanceTransaction`] is a scoped unit of work: row locks taken through
//! it are held until [`BalanceTransaction::commit`] or until it is dropped,
//! and dropping it without committing discards every write.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::errors::Result;

/// What an earlier delivery of the same message settled on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedOutcome {
    /// Its mutation committed
    Applied,
    /// It was rejected for this reason and dead-lettered
    Rejected(String),
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn account_exists(&self, account_number: &str) -> Result<bool>;

    /// Outcome committed under `key`, if any.
    async fn recorded_outcome(&self, key: &str) -> Result<Option<RecordedOutcome>>;

    /// Durably record that the message under `key` was rejected. A key that
    /// already has an outcome keeps it.
    async fn record_rejection(&self, key: &str, reason: &str) -> Result<()>;

    /// Open a unit of work on one pooled connection.
    async fn begin(&self) -> Result<Box<dyn BalanceTransaction>>;
}

#[async_trait]
pub trait BalanceTransaction: Send {
    /// Record `key` as processed. Returns `false` if a committed unit of work
    /// already recorded it. The record is discarded on rollback.
    async fn claim_idempotency_key(&mut self, key: &str) -> Result<bool>;

    /// Exclusively lock one account row and read its balance.
    async fn lock_balance(&mut self, account_number: &str) -> Result<Option<Decimal>>;

    /// Exclusively lock both rows in ascending account-number order and read
    /// their balances. Missing accounts are absent from the result.
    async fn lock_balances(&mut self, first: &str, second: &str) -> Result<Vec<(String, Decimal)>>;

    /// Set one balance; returns the number of rows changed.
    async fn write_balance(&mut self, account_number: &str, balance: Decimal) -> Result<u64>;

    /// Set two balances in a single statement; returns the number of rows changed.
    async fn write_balance_pair(
        &mut self,
        first: (&str, Decimal),
        second: (&str, Decimal),
    ) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
