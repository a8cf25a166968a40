//! Success/failure forwarding.
//!
//! Every decoded transaction ends up on exactly one output topic: the ledger
//! topic when the router accepted it, the dead-letter topic when it was
//! rejected for a business reason. The inbound bytes are forwarded as they
//! arrived. Infrastructure failures are forwarded nowhere; they surface as a
//! handler error so the delivery stays unacknowledged and is redelivered.

use async_trait::async_trait;
use ledger_core::Transaction;
use message_bus::{BusPublisher, Delivery, MessageHandler, Topic};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::errors::Result;
use crate::metrics::TRANSACTION_OUTCOMES;
use crate::router::TransactionRouter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarded {
    Ledger,
    DeadLetter,
}

impl Forwarded {
    pub fn topic(&self) -> Topic {
        match self {
            Forwarded::Ledger => Topic::TransactionLedger,
            Forwarded::DeadLetter => Topic::DeadLedger,
        }
    }
}

pub struct TransactionForwarder {
    router: TransactionRouter,
    publisher: Arc<dyn BusPublisher>,
}

impl TransactionForwarder {
    pub fn new(router: TransactionRouter, publisher: Arc<dyn BusPublisher>) -> Self {
        Self { router, publisher }
    }

    pub async fn forward(&self, tx: &Transaction, delivery: &Delivery) -> Result<Forwarded> {
        let key = delivery.key();

        let forwarded = match self.router.route(tx, Some(&key)).await {
            Ok(applied) => {
                info!(
                    delivery_key = %key,
                    kind = %tx.transaction_type,
                    from = %tx.from_account_id,
                    amount = %tx.amount,
                    applied = applied.as_str(),
                    "Transaction applied"
                );
                TRANSACTION_OUTCOMES
                    .with_label_values(&["applied", applied.as_str()])
                    .inc();
                Forwarded::Ledger
            }
            Err(e) if e.is_business_rejection() => {
                warn!(
                    delivery_key = %key,
                    kind = %tx.transaction_type,
                    from = %tx.from_account_id,
                    amount = %tx.amount,
                    reason = %e,
                    "Transaction rejected, dead-lettering"
                );
                TRANSACTION_OUTCOMES
                    .with_label_values(&["rejected", e.kind()])
                    .inc();
                Forwarded::DeadLetter
            }
            Err(e) => {
                error!(delivery_key = %key, error = %e, "Transaction failed, leaving for redelivery");
                TRANSACTION_OUTCOMES
                    .with_label_values(&["failed", e.kind()])
                    .inc();
                return Err(e);
            }
        };

        // Same key on both topics: a redelivered message that is re-forwarded
        // inside the duplicate window is dropped by the bus.
        self.publisher
            .publish(forwarded.topic(), delivery.payload.clone(), Some(&key))
            .await?;

        Ok(forwarded)
    }
}

#[async_trait]
impl MessageHandler for TransactionForwarder {
    type Message = Transaction;

    async fn handle(&self, message: Transaction, delivery: &Delivery) -> anyhow::Result<()> {
        self.forward(&message, delivery).await?;
        Ok(())
    }
}
