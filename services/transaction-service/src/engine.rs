//! Balance Update Engine
//!
//! Every mutation runs in one unit of work on the balance store:
//!
//! 1. claim the idempotency key (if any)
//! 2. lock the affected rows
//! 3. check the business rules against the locked balances
//! 4. write and commit
//!
//! Any error before commit drops the unit of work, which rolls it back, so a
//! rejected mutation leaves balances exactly as they were. Transfers lock both
//! rows in ascending account-number order; every transfer sharing the two
//! accounts therefore queues on the same first lock and no wait-cycle can form.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::{Result, TransactionServiceError};
use crate::store::{AccountStore, BalanceTransaction};

/// Outcome of an accepted mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Committed,
    /// The idempotency key was already processed; nothing changed.
    Duplicate,
}

impl Applied {
    pub fn as_str(&self) -> &'static str {
        match self {
            Applied::Committed => "committed",
            Applied::Duplicate => "duplicate",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Credit,
    Debit,
}

#[derive(Clone)]
pub struct BalanceEngine {
    store: Arc<dyn AccountStore>,
}

impl BalanceEngine {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    pub async fn credit(&self, account: &str, amount: Decimal, key: Option<&str>) -> Result<Applied> {
        self.update_balance(account, amount, Direction::Credit, key).await
    }

    pub async fn debit(&self, account: &str, amount: Decimal, key: Option<&str>) -> Result<Applied> {
        self.update_balance(account, amount, Direction::Debit, key).await
    }

    async fn update_balance(
        &self,
        account: &str,
        amount: Decimal,
        direction: Direction,
        key: Option<&str>,
    ) -> Result<Applied> {
        if amount < Decimal::ZERO {
            return Err(TransactionServiceError::Validation(format!(
                "amount must not be negative, got {}",
                amount
            )));
        }

        let mut tx = self.store.begin().await?;
        if !claim(tx.as_mut(), key).await? {
            return Ok(Applied::Duplicate);
        }

        let balance = tx
            .lock_balance(account)
            .await?
            .ok_or_else(|| TransactionServiceError::AccountNotFound(account.to_string()))?;

        let new_balance = match direction {
            Direction::Credit => balance + amount,
            Direction::Debit => {
                if balance < amount {
                    return Err(TransactionServiceError::InsufficientFunds {
                        account: account.to_string(),
                        balance,
                        requested: amount,
                    });
                }
                balance - amount
            }
        };

        let changed = tx.write_balance(account, new_balance).await?;
        if changed == 0 {
            return Err(TransactionServiceError::AccountNotFound(account.to_string()));
        }

        tx.commit().await?;

        info!(
            account,
            %amount,
            direction = ?direction,
            %new_balance,
            "Balance updated"
        );
        Ok(Applied::Committed)
    }

    pub async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
        key: Option<&str>,
    ) -> Result<Applied> {
        if amount <= Decimal::ZERO {
            return Err(TransactionServiceError::Validation(format!(
                "transfer amount must be positive, got {}",
                amount
            )));
        }
        if from == to {
            return Err(TransactionServiceError::Validation(format!(
                "cannot transfer from {} to itself",
                from
            )));
        }

        let mut tx = self.store.begin().await?;
        if !claim(tx.as_mut(), key).await? {
            return Ok(Applied::Duplicate);
        }

        let rows = tx.lock_balances(from, to).await?;
        let balance_of = |account: &str| {
            rows.iter()
                .find(|(number, _)| number == account)
                .map(|(_, balance)| *balance)
                .ok_or_else(|| TransactionServiceError::AccountNotFound(account.to_string()))
        };
        let from_balance = balance_of(from)?;
        let to_balance = balance_of(to)?;

        if from_balance < amount {
            return Err(TransactionServiceError::InsufficientFunds {
                account: from.to_string(),
                balance: from_balance,
                requested: amount,
            });
        }

        let changed = tx
            .write_balance_pair((from, from_balance - amount), (to, to_balance + amount))
            .await?;
        if changed != 2 {
            return Err(TransactionServiceError::UnexpectedRowCount {
                expected: 2,
                actual: changed,
            });
        }

        tx.commit().await?;

        info!(from, to, %amount, "Transfer committed");
        Ok(Applied::Committed)
    }
}

async fn claim(tx: &mut (dyn BalanceTransaction + 'static), key: Option<&str>) -> Result<bool> {
    let Some(key) = key else {
        return Ok(true);
    };

    let fresh = tx.claim_idempotency_key(key).await?;
    if !fresh {
        debug!(idempotency_key = key, "Already applied, skipping mutation");
    }
    Ok(fresh)
}
