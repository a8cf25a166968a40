//! Ledger projection.
//!
//! Each transaction on the ledger topic becomes one immutable record. The
//! record's id, creation time and status are assigned here; the payload's own
//! values for those fields are ignored. An insert failure is returned to the
//! subscriber so the delivery is redelivered rather than acknowledged.
//!
//! Records are keyed by the forwarded transaction's own delivery key, carried
//! as the ledger message's dedup id, so the same transaction forwarded twice
//! still yields one record.

use async_trait::async_trait;
use ledger_core::{Transaction, TransactionLedger};
use message_bus::{Delivery, MessageHandler};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use crate::errors::{LedgerServiceError, Result};
use crate::metrics::LEDGER_RECORDS;
use crate::store::LedgerStore;

pub struct LedgerProjector {
    store: Arc<dyn LedgerStore>,
    insert_timeout: Duration,
}

impl LedgerProjector {
    pub fn new(store: Arc<dyn LedgerStore>, insert_timeout: Duration) -> Self {
        Self {
            store,
            insert_timeout,
        }
    }

    /// Project `tx` and append it, keyed by `source_key`. Returns the stored record id.
    pub async fn project(&self, tx: Transaction, source_key: &str) -> Result<Uuid> {
        let record = TransactionLedger::project(tx);

        let inserted = tokio::time::timeout(self.insert_timeout, self.store.insert(&record, source_key))
            .await
            .map_err(|_| LedgerServiceError::InsertTimeout(self.insert_timeout))
            .and_then(|result| result);

        match inserted {
            Ok(id) if id == record.id => {
                LEDGER_RECORDS.with_label_values(&["inserted"]).inc();
                info!(
                    id = %id,
                    source_key,
                    kind = %record.transaction_type,
                    from = %record.from_account_id,
                    amount = %record.amount,
                    "Ledger record inserted"
                );
                Ok(id)
            }
            Ok(id) => {
                LEDGER_RECORDS.with_label_values(&["duplicate"]).inc();
                info!(id = %id, source_key, "Ledger record already present");
                Ok(id)
            }
            Err(e) => {
                LEDGER_RECORDS.with_label_values(&["failed"]).inc();
                error!(source_key, error = %e, "Ledger insert failed, leaving for redelivery");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl MessageHandler for LedgerProjector {
    type Message = Transaction;

    async fn handle(&self, message: Transaction, delivery: &Delivery) -> anyhow::Result<()> {
        self.project(message, &delivery.origin_key()).await?;
        Ok(())
    }
}
