use ledger_core::{Transaction, TransactionType};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use crate::engine::{Applied, BalanceEngine};
use crate::errors::{Result, TransactionServiceError};
use crate::store::{AccountStore, RecordedOutcome};

/// Classifies a transaction and dispatches it to the engine.
///
/// Unknown kinds fail closed: they are rejected rather than acknowledged as
/// a no-op, so they end up on the dead-letter topic.
///
/// With an idempotency key, the first settled outcome is final. A rejection
/// is recorded under the key before it is returned, and a later delivery of
/// the same key replays the recorded outcome instead of evaluating the
/// transaction again against balances that may have moved since.
#[derive(Clone)]
pub struct TransactionRouter {
    store: Arc<dyn AccountStore>,
    engine: BalanceEngine,
}

impl TransactionRouter {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self {
            engine: BalanceEngine::new(store.clone()),
            store,
        }
    }

    pub async fn route(&self, tx: &Transaction, idempotency_key: Option<&str>) -> Result<Applied> {
        let Some(key) = idempotency_key else {
            return self.dispatch(tx, None).await;
        };

        match self.store.recorded_outcome(key).await? {
            Some(RecordedOutcome::Applied) => return Ok(Applied::Duplicate),
            Some(RecordedOutcome::Rejected(reason)) => {
                return Err(TransactionServiceError::PreviouslyRejected {
                    key: key.to_string(),
                    reason,
                })
            }
            None => {}
        }

        match self.dispatch(tx, Some(key)).await {
            Err(e) if e.is_business_rejection() => {
                self.store.record_rejection(key, &e.to_string()).await?;
                Err(e)
            }
            other => other,
        }
    }

    async fn dispatch(&self, tx: &Transaction, idempotency_key: Option<&str>) -> Result<Applied> {
        if tx.amount <= Decimal::ZERO {
            return Err(TransactionServiceError::Validation(format!(
                "amount must be positive, got {}",
                tx.amount
            )));
        }
        let kind = tx.kind()?;

        if !self.store.account_exists(&tx.from_account_id).await? {
            return Err(TransactionServiceError::AccountNotFound(
                tx.from_account_id.clone(),
            ));
        }

        debug!(
            kind = %kind,
            from = %tx.from_account_id,
            to = ?tx.destination(),
            amount = %tx.amount,
            "Routing transaction"
        );

        match kind {
            TransactionType::Deposit => {
                self.engine
                    .credit(&tx.from_account_id, tx.amount, idempotency_key)
                    .await
            }
            TransactionType::Withdrawal => {
                self.engine
                    .debit(&tx.from_account_id, tx.amount, idempotency_key)
                    .await
            }
            TransactionType::Transfer => {
                let to = tx.destination().ok_or_else(|| {
                    TransactionServiceError::Validation(
                        "transfer requires to_account_id".to_string(),
                    )
                })?;
                self.engine
                    .transfer(&tx.from_account_id, to, tx.amount, idempotency_key)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryAccountStore;
    use rust_decimal_macros::dec;

    fn transaction(kind: &str, from: &str, to: Option<&str>, amount: Decimal) -> Transaction {
        Transaction {
            from_account_id: from.to_string(),
            to_account_id: to.map(str::to_string),
            amount,
            transaction_type: kind.to_string(),
            description: String::new(),
            created_at: None,
            status: "pending".to_string(),
        }
    }

    fn router() -> (TransactionRouter, InMemoryAccountStore) {
        let store = InMemoryAccountStore::new();
        store.open_account("Acc1", dec!(100));
        store.open_account("Acc2", dec!(10));
        (TransactionRouter::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_unknown_type_fails_closed() {
        let (router, store) = router();

        let result = router.route(&transaction("refund", "Acc1", None, dec!(5)), None).await;

        assert!(matches!(result, Err(TransactionServiceError::UnsupportedTransactionType(k)) if k == "refund"));
        assert_eq!(store.balance("Acc1").await, Some(dec!(100)));
    }

    #[tokio::test]
    async fn test_missing_source_is_not_found() {
        let (router, _) = router();

        let result = router.route(&transaction("deposit", "nobody", None, dec!(5)), None).await;

        assert!(matches!(result, Err(TransactionServiceError::AccountNotFound(a)) if a == "nobody"));
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let (router, _) = router();

        let result = router.route(&transaction("deposit", "Acc1", None, dec!(0)), None).await;

        assert!(matches!(result, Err(TransactionServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_transfer_with_empty_destination_rejected() {
        let (router, store) = router();

        let result = router
            .route(&transaction("transfer", "Acc1", Some(""), dec!(5)), None)
            .await;

        assert!(matches!(result, Err(TransactionServiceError::Validation(_))));
        assert_eq!(store.balance("Acc1").await, Some(dec!(100)));
    }

    #[tokio::test]
    async fn test_recorded_rejection_is_replayed() {
        let (router, store) = router();
        let withdrawal = transaction("withdrawal", "Acc2", None, dec!(50));

        let first = router.route(&withdrawal, Some("TRANSACTION:7")).await;
        assert!(matches!(first, Err(TransactionServiceError::InsufficientFunds { .. })));

        router.route(&transaction("deposit", "Acc2", None, dec!(100)), None).await.unwrap();
        let again = router.route(&withdrawal, Some("TRANSACTION:7")).await;

        assert!(matches!(again, Err(TransactionServiceError::PreviouslyRejected { key, .. }) if key == "TRANSACTION:7"));
        assert_eq!(store.balance("Acc2").await, Some(dec!(110)));
    }

    #[tokio::test]
    async fn test_applied_key_is_not_reevaluated() {
        let (router, store) = router();
        let withdrawal = transaction("withdrawal", "Acc1", None, dec!(60));

        router.route(&withdrawal, Some("TRANSACTION:8")).await.unwrap();
        let again = router.route(&withdrawal, Some("TRANSACTION:8")).await.unwrap();

        assert_eq!(again, Applied::Duplicate);
        assert_eq!(store.balance("Acc1").await, Some(dec!(40)));
    }

    #[tokio::test]
    async fn test_outage_before_routing_is_not_a_rejection() {
        let (router, store) = router();
        store.set_unavailable(true);
        let result = router
            .route(&transaction("refund", "Acc1", None, dec!(5)), Some("TRANSACTION:10"))
            .await;
        assert!(matches!(result, Err(TransactionServiceError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_dispatch_by_kind() {
        let (router, store) = router();

        router.route(&transaction("deposit", "Acc2", None, dec!(5)), None).await.unwrap();
        router.route(&transaction("withdrawal", "Acc1", None, dec!(20)), None).await.unwrap();
        router
            .route(&transaction("transfer", "Acc1", Some("Acc2"), dec!(30)), None)
            .await
            .unwrap();

        assert_eq!(store.balance("Acc1").await, Some(dec!(50)));
        assert_eq!(store.balance("Acc2").await, Some(dec!(45)));
    }
}
