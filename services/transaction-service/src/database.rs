use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Postgres, Transaction};
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::errors::Result;
use crate::store::{AccountStore, BalanceTransaction, RecordedOutcome};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .connect(&config.url)
            .await?;

        Ok(Database { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create the idempotency table. The accounts table is owned by the account service.
    pub async fn bootstrap_schema(&self) -> Result<()> {
        self.pool
            .execute(include_str!("../migrations/0001_processed_transactions.sql"))
            .await?;

        info!("Transaction service schema ready");
        Ok(())
    }
}

/// Balance store on `usersschema.accounts`
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn account_exists(&self, account_number: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM usersschema.accounts WHERE account_number = $1)",
        )
        .bind(account_number)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn recorded_outcome(&self, key: &str) -> Result<Option<RecordedOutcome>> {
        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT outcome, reason FROM usersschema.processed_transactions WHERE idempotency_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(outcome, reason)| match outcome.as_str() {
            "rejected" => RecordedOutcome::Rejected(reason),
            _ => RecordedOutcome::Applied,
        }))
    }

    async fn record_rejection(&self, key: &str, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usersschema.processed_transactions (idempotency_key, outcome, reason)
            VALUES ($1, 'rejected', $2)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn BalanceTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgBalanceTransaction { tx }))
    }
}

/// Rolls back on drop unless committed.
pub struct PgBalanceTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BalanceTransaction for PgBalanceTransaction {
    async fn claim_idempotency_key(&mut self, key: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO usersschema.processed_transactions (idempotency_key)
            VALUES ($1)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(key)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn lock_balance(&mut self, account_number: &str) -> Result<Option<Decimal>> {
        let balance = sqlx::query_scalar::<_, Decimal>(
            "SELECT balance FROM usersschema.accounts WHERE account_number = $1 FOR UPDATE",
        )
        .bind(account_number)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(balance)
    }

    async fn lock_balances(&mut self, first: &str, second: &str) -> Result<Vec<(String, Decimal)>> {
        // Rows are locked as they come out of the sort, so every caller
        // acquires them in the same order.
        let rows = sqlx::query_as::<_, (String, Decimal)>(
            r#"
            SELECT account_number, balance
            FROM usersschema.accounts
            WHERE account_number IN ($1, $2)
            ORDER BY account_number
            FOR UPDATE
            "#,
        )
        .bind(first)
        .bind(second)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows)
    }

    async fn write_balance(&mut self, account_number: &str, balance: Decimal) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE usersschema.accounts
            SET balance = $1, updated_at = NOW()
            WHERE account_number = $2
            "#,
        )
        .bind(balance)
        .bind(account_number)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn write_balance_pair(
        &mut self,
        first: (&str, Decimal),
        second: (&str, Decimal),
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE usersschema.accounts
            SET balance = CASE
                    WHEN account_number = $1 THEN $2
                    WHEN account_number = $3 THEN $4
                END,
                updated_at = NOW()
            WHERE account_number IN ($1, $3)
            "#,
        )
        .bind(first.0)
        .bind(first.1)
        .bind(second.0)
        .bind(second.1)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let PgBalanceTransaction { tx } = *self;
        tx.commit().await?;
        Ok(())
    }
}
