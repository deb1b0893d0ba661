//! PostgreSQL store
//!
//! # Tables
//!
//! - `wallets` - one row per wallet; `CHECK (balance >= 0)` is the balance constraint
//! - `transactions_history` - append-only log; `wallet_id` references `wallets(id)`
//!
//! An atomic unit is a database transaction. The balance `UPDATE` takes the row
//! lock, so concurrent units on the same wallet queue behind each other while the
//! check constraint is evaluated on the write itself. Dropping an uncommitted
//! `sqlx::Transaction` rolls it back.

use super::{
    AtomicUnit, LedgerStore, StoreError, StoreResult, TransactionLog, WalletStore,
    BALANCE_CONSTRAINT,
};
use crate::config::DatabaseConfig;
use crate::types::{OperationType, Transaction, Wallet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres};
use uuid::Uuid;

const CHECK_VIOLATION: &str = "23514";
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Embedded schema migrations
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// PostgreSQL-backed ledger store
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect a pool
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await?;

        tracing::info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );

        Ok(Self { pool })
    }

    /// Apply embedded migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        MIGRATOR.run(&self.pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }
}

/// Row shape of `transactions_history`
#[derive(Debug, FromRow)]
struct TransactionRow {
    id: Uuid,
    wallet_id: Uuid,
    amount: Decimal,
    transaction_type: String,
    executed_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let operation_type = row
            .transaction_type
            .parse::<OperationType>()
            .map_err(|e| StoreError::Corrupt(format!("transaction {}: {}", row.id, e)))?;

        Ok(Transaction {
            id: row.id,
            wallet_id: row.wallet_id,
            amount: row.amount,
            operation_type,
            executed_at: row.executed_at,
        })
    }
}

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

fn constraint_name(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.constraint().map(str::to_string),
        _ => None,
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    type Unit = PgUnit;

    async fn create_wallet(&self, wallet: &Wallet) -> StoreResult<Wallet> {
        let created = sqlx::query_as::<_, Wallet>(
            r#"
            INSERT INTO wallets (id, balance, created_at, updated_at, deleted)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, balance, created_at, updated_at, deleted
            "#,
        )
        .bind(wallet.id)
        .bind(wallet.balance)
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .bind(wallet.deleted)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn find_wallet(&self, wallet_id: Uuid) -> StoreResult<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(
            r#"
            SELECT id, balance, created_at, updated_at, deleted
            FROM wallets
            WHERE id = $1 AND deleted = false
            "#,
        )
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet)
    }

    async fn soft_delete_wallet(
        &self,
        wallet_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(
            r#"
            UPDATE wallets
            SET deleted = true, updated_at = $2
            WHERE id = $1 AND deleted = false
            RETURNING id, balance, created_at, updated_at, deleted
            "#,
        )
        .bind(wallet_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet)
    }

    async fn list_transactions(&self, wallet_id: Uuid) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, wallet_id, amount, transaction_type, executed_at
            FROM transactions_history
            WHERE wallet_id = $1
            ORDER BY executed_at, id
            "#,
        )
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn begin(&self) -> StoreResult<PgUnit> {
        let tx = self.pool.begin().await?;
        Ok(PgUnit { tx })
    }
}

/// Atomic unit over a PostgreSQL transaction
pub struct PgUnit {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl std::fmt::Debug for PgUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgUnit").finish_non_exhaustive()
    }
}

#[async_trait]
impl WalletStore for PgUnit {
    async fn apply_delta(&mut self, wallet_id: Uuid, delta: Decimal) -> StoreResult<Wallet> {
        // clock_timestamp() is read once the row lock is held, unlike now().
        let result = sqlx::query_as::<_, Wallet>(
            r#"
            UPDATE wallets
            SET balance = balance + $2,
                updated_at = GREATEST(clock_timestamp(), updated_at)
            WHERE id = $1 AND deleted = false
            RETURNING id, balance, created_at, updated_at, deleted
            "#,
        )
        .bind(wallet_id)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await;

        match result {
            Ok(Some(wallet)) => Ok(wallet),
            Ok(None) => Err(StoreError::WalletNotFound(wallet_id)),
            Err(e) if sqlstate(&e).as_deref() == Some(CHECK_VIOLATION) => {
                Err(StoreError::ConstraintViolated {
                    constraint: constraint_name(&e)
                        .unwrap_or_else(|| BALANCE_CONSTRAINT.to_string()),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl TransactionLog for PgUnit {
    async fn append(&mut self, entry: &Transaction) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO transactions_history (id, wallet_id, amount, transaction_type, executed_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.id)
        .bind(entry.wallet_id)
        .bind(entry.amount)
        .bind(entry.operation_type.as_str())
        .bind(entry.executed_at)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if sqlstate(&e).as_deref() == Some(FOREIGN_KEY_VIOLATION) => {
                Err(StoreError::ReferentialViolation {
                    wallet_id: entry.wallet_id,
                })
            }
            Err(e) if sqlstate(&e).as_deref() == Some(CHECK_VIOLATION) => {
                Err(StoreError::ConstraintViolated {
                    constraint: constraint_name(&e)
                        .unwrap_or_else(|| "transactions_history_check".to_string()),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl AtomicUnit for PgUnit {
    async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
