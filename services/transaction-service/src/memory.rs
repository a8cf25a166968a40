//! In-memory balance store.
//!
//! Each account sits behind its own async mutex, which plays the part of the
//! row lock: a unit of work holds the guards it acquired until it commits or
//! is dropped. Writes are staged and only applied on commit. Idempotency keys
//! get the same treatment, so a duplicate claim waits for the first holder to
//! finish, as it would on a unique index. Rejections are recorded directly,
//! outside any unit of work.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use ledger_core::Account;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::errors::{Result, TransactionServiceError};
use crate::store::{AccountStore, BalanceTransaction, RecordedOutcome};

#[derive(Default)]
struct Inner {
    accounts: DashMap<String, Arc<Mutex<Account>>>,
    processed: DashMap<String, Arc<Mutex<bool>>>,
    rejected: DashMap<String, String>,
    unavailable: AtomicBool,
}

#[derive(Clone, Default)]
pub struct InMemoryAccountStore {
    inner: Arc<Inner>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_account(&self, account: Account) {
        self.inner
            .accounts
            .insert(account.account_number.clone(), Arc::new(Mutex::new(account)));
    }

    pub fn open_account(&self, account_number: &str, balance: Decimal) {
        self.insert_account(Account::open(account_number, balance));
    }

    /// Snapshot of an account; waits for any unit of work holding it.
    pub async fn account(&self, account_number: &str) -> Option<Account> {
        let row = self.row(account_number)?;
        let account = row.lock().await.clone();
        Some(account)
    }

    pub async fn balance(&self, account_number: &str) -> Option<Decimal> {
        self.account(account_number).await.map(|account| account.balance)
    }

    /// Simulate losing the database: new units of work and lookups fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn row(&self, account_number: &str) -> Option<Arc<Mutex<Account>>> {
        self.inner
            .accounts
            .get(account_number)
            .map(|row| row.value().clone())
    }

    fn check_available(&self) -> Result<()> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(TransactionServiceError::StoreUnavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn account_exists(&self, account_number: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.inner.accounts.contains_key(account_number))
    }

    async fn recorded_outcome(&self, key: &str) -> Result<Option<RecordedOutcome>> {
        self.check_available()?;
        if let Some(reason) = self.inner.rejected.get(key) {
            return Ok(Some(RecordedOutcome::Rejected(reason.value().clone())));
        }

        let slot = self.inner.processed.get(key).map(|slot| slot.value().clone());
        let applied = match slot {
            Some(slot) => *slot.lock().await,
            None => false,
        };
        Ok(applied.then_some(RecordedOutcome::Applied))
    }

    async fn record_rejection(&self, key: &str, reason: &str) -> Result<()> {
        self.check_available()?;
        if self.recorded_outcome(key).await?.is_none() {
            self.inner
                .rejected
                .entry(key.to_string())
                .or_insert_with(|| reason.to_string());
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn BalanceTransaction>> {
        self.check_available()?;
        Ok(Box::new(MemoryBalanceTransaction {
            store: self.clone(),
            locked: Vec::new(),
            staged: HashMap::new(),
            claimed: None,
        }))
    }
}

pub struct MemoryBalanceTransaction {
    store: InMemoryAccountStore,
    locked: Vec<OwnedMutexGuard<Account>>,
    staged: HashMap<String, Decimal>,
    claimed: Option<OwnedMutexGuard<bool>>,
}

impl MemoryBalanceTransaction {
    /// Lock a row (re-entrant within this unit of work) and read its balance,
    /// including any write staged here.
    async fn lock_row(&mut self, account_number: &str) -> Option<Decimal> {
        if let Some(staged) = self.staged.get(account_number) {
            return Some(*staged);
        }
        if let Some(guard) = self
            .locked
            .iter()
            .find(|guard| guard.account_number == account_number)
        {
            return Some(guard.balance);
        }

        let row = self.store.row(account_number)?;
        let guard = row.lock_owned().await;
        let balance = guard.balance;
        self.locked.push(guard);
        Some(balance)
    }
}

#[async_trait]
impl BalanceTransaction for MemoryBalanceTransaction {
    async fn claim_idempotency_key(&mut self, key: &str) -> Result<bool> {
        let slot = self
            .store
            .inner
            .processed
            .entry(key.to_string())
            .or_default()
            .value()
            .clone();

        let guard = slot.lock_owned().await;
        if *guard {
            return Ok(false);
        }
        self.claimed = Some(guard);
        Ok(true)
    }

    async fn lock_balance(&mut self, account_number: &str) -> Result<Option<Decimal>> {
        Ok(self.lock_row(account_number).await)
    }

    async fn lock_balances(&mut self, first: &str, second: &str) -> Result<Vec<(String, Decimal)>> {
        let mut ordered = [first, second];
        ordered.sort_unstable();

        let mut rows = Vec::with_capacity(2);
        for (index, account_number) in ordered.iter().enumerate() {
            if index > 0 && ordered[index - 1] == *account_number {
                continue;
            }
            if let Some(balance) = self.lock_row(account_number).await {
                rows.push((account_number.to_string(), balance));
            }
        }
        Ok(rows)
    }

    async fn write_balance(&mut self, account_number: &str, balance: Decimal) -> Result<u64> {
        if self.lock_row(account_number).await.is_none() {
            return Ok(0);
        }
        self.staged.insert(account_number.to_string(), balance);
        Ok(1)
    }

    async fn write_balance_pair(
        &mut self,
        first: (&str, Decimal),
        second: (&str, Decimal),
    ) -> Result<u64> {
        let mut changed = self.write_balance(first.0, first.1).await?;
        if second.0 != first.0 {
            changed += self.write_balance(second.0, second.1).await?;
        }
        Ok(changed)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryBalanceTransaction {
            store,
            mut locked,
            staged,
            claimed,
        } = *self;
        store.check_available()?;

        let now = Utc::now();
        for guard in locked.iter_mut() {
            if let Some(balance) = staged.get(&guard.account_number) {
                guard.balance = *balance;
                guard.updated_at = now;
            }
        }
        if let Some(mut processed) = claimed {
            *processed = true;
        }
        Ok(())
    }
}
