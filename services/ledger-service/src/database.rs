use async_trait::async_trait;
use ledger_core::TransactionLedger;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Executor;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::errors::Result;
use crate::store::LedgerStore;

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

    pub async fn bootstrap_schema(&self) -> Result<()> {
        self.pool
            .execute(include_str!("../migrations/0001_ledger_transactions.sql"))
            .await?;

        info!("Ledger schema ready");
        Ok(())
    }
}

/// Ledger store on `ledger.transactions`
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn insert(&self, record: &TransactionLedger, source_key: &str) -> Result<Uuid> {
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO ledger.transactions (
                id, source_key, from_account_id, to_account_id, amount,
                transaction_type, description, created_at, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (source_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(record.id)
        .bind(source_key)
        .bind(&record.from_account_id)
        .bind(record.to_account_id.as_deref())
        .bind(record.amount)
        .bind(&record.transaction_type)
        .bind(&record.description)
        .bind(record.created_at)
        .bind(record.status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            return Ok(id);
        }

        let existing = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM ledger.transactions WHERE source_key = $1",
        )
        .bind(source_key)
        .fetch_one(&self.pool)
        .await?;

        debug!(source_key, id = %existing, "Ledger record already present");
        Ok(existing)
    }
}
