//! Transaction topic through the balance engine and into the ledger

use bytes::Bytes;
use ledger_core::TransactionStatus;
use ledger_service::memory::InMemoryLedgerStore;
use ledger_service::LedgerProjector;
use message_bus::{BusPublisher, InMemoryBus, MessageHandler, Subscriber, SubscriberConfig, Topic};
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use transaction_service::memory::InMemoryAccountStore;
use transaction_service::{TransactionForwarder, TransactionRouter};

struct Pipeline {
    bus: InMemoryBus,
    accounts: InMemoryAccountStore,
    ledger: InMemoryLedgerStore,
    forwarder: TransactionForwarder,
    projector: LedgerProjector,
}

impl Pipeline {
    fn new() -> Self {
        let bus = InMemoryBus::new();
        let accounts = InMemoryAccountStore::new();
        let ledger = InMemoryLedgerStore::new();
        let forwarder = TransactionForwarder::new(
            TransactionRouter::new(Arc::new(accounts.clone())),
            Arc::new(bus.clone()),
        );
        let projector = LedgerProjector::new(Arc::new(ledger.clone()), Duration::from_secs(5));
        Self {
            bus,
            accounts,
            ledger,
            forwarder,
            projector,
        }
    }

    async fn submit(&self, payload: serde_json::Value) {
        self.bus
            .publish(Topic::Transaction, Bytes::from(payload.to_string()), None)
            .await
            .unwrap();
    }

    async fn drain<H: MessageHandler>(&self, topic: Topic, handler: &H) {
        let subscriber = Subscriber::new(self.bus.group(topic), SubscriberConfig::default());
        let (_tx, mut rx) = watch::channel(false);
        subscriber.consume_claim(handler, &mut rx).await.unwrap();
    }

    async fn settle(&self) {
        self.drain(Topic::Transaction, &self.forwarder).await;
        self.drain(Topic::TransactionLedger, &self.projector).await;
    }
}

#[tokio::test]
async fn test_deposit_reaches_ledger_as_completed_record() {
    let p = Pipeline::new();
    p.accounts.open_account("Acc1", dec!(0));
    p.submit(json!({
        "id": "00000000-0000-4000-8000-000000000001",
        "from_account_id": "Acc1",
        "amount": 100,
        "transaction_type": "deposit",
        "created_at": "2001-01-01T00:00:00Z",
        "status": "pending",
    }))
    .await;

    p.settle().await;

    assert_eq!(p.accounts.balance("Acc1").await, Some(dec!(100)));
    let records = p.ledger.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, TransactionStatus::Completed);
    assert_ne!(records[0].id.to_string(), "00000000-0000-4000-8000-000000000001");
    assert!(records[0].created_at.timestamp() > 978_307_200);
    assert_eq!(records[0].amount, dec!(100));
    assert_eq!(p.ledger.source_keys(), vec!["TRANSACTION:1".to_string()]);
}

#[tokio::test]
async fn test_rejected_withdrawal_never_reaches_ledger() {
    let p = Pipeline::new();
    p.accounts.open_account("Acc1", dec!(30));
    p.submit(json!({"from_account_id": "Acc1", "amount": 50, "transaction_type": "withdrawal"}))
        .await;

    p.settle().await;

    assert_eq!(p.accounts.balance("Acc1").await, Some(dec!(30)));
    assert!(p.ledger.records().is_empty());
    assert_eq!(p.bus.messages(Topic::DeadLedger).len(), 1);
}

#[tokio::test]
async fn test_mixed_batch_settles_consistently() {
    let p = Pipeline::new();
    p.accounts.open_account("Acc1", dec!(100));
    p.accounts.open_account("Acc2", dec!(10));

    p.submit(json!({"from_account_id": "Acc1", "to_account_id": "Acc2", "amount": 40, "transaction_type": "transfer"}))
        .await;
    p.submit(json!({"from_account_id": "Acc2", "amount": 5, "transaction_type": "withdrawal"}))
        .await;
    p.submit(json!({"from_account_id": "Acc1", "amount": 1, "transaction_type": "refund"}))
        .await;
    p.submit(json!({"from_account_id": "Acc2", "to_account_id": "Acc1", "amount": 500, "transaction_type": "transfer"}))
        .await;

    p.settle().await;

    assert_eq!(p.accounts.balance("Acc1").await, Some(dec!(60)));
    assert_eq!(p.accounts.balance("Acc2").await, Some(dec!(45)));

    let kinds: Vec<_> = p
        .ledger
        .records()
        .into_iter()
        .map(|r| r.transaction_type)
        .collect();
    assert_eq!(kinds, vec!["transfer", "withdrawal"]);
    assert_eq!(p.bus.messages(Topic::DeadLedger).len(), 2);
    assert_eq!(p.bus.acked(Topic::Transaction), vec![1, 2, 3, 4]);
}
