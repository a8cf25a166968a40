//! In-memory ledger store for tests and local runs.

use async_trait::async_trait;
use ledger_core::TransactionLedger;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::{LedgerServiceError, Result};
use crate::store::LedgerStore;

#[derive(Default)]
struct Inner {
    records: Mutex<Vec<(String, TransactionLedger)>>,
    unavailable: AtomicBool,
}

#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    inner: Arc<Inner>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records in insertion order
    pub fn records(&self) -> Vec<TransactionLedger> {
        self.inner
            .records
            .lock()
            .iter()
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub fn source_keys(&self) -> Vec<String> {
        self.inner
            .records
            .lock()
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Make every insert fail until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn insert(&self, record: &TransactionLedger, source_key: &str) -> Result<Uuid> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerServiceError::StoreUnavailable(
                "in-memory ledger store marked unavailable".to_string(),
            ));
        }

        let mut records = self.inner.records.lock();
        if let Some((_, existing)) = records.iter().find(|(key, _)| key == source_key) {
            return Ok(existing.id);
        }
        records.push((source_key.to_string(), record.clone()));
        Ok(record.id)
    }
}
