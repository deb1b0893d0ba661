//! Storage layer
//!
//! The engine talks to storage through three traits:
//!
//! - [`LedgerStore`] - the store handle: wallet creation, reads, soft-delete,
//!   and [`LedgerStore::begin`] which opens an atomic unit
//! - [`WalletStore`] - balance mutation inside a unit, with the non-negative
//!   balance enforced as a write-time constraint
//! - [`TransactionLog`] - append-only log writes inside a unit, referentially
//!   bound to a wallet
//!
//! An [`AtomicUnit`] is all-or-nothing. Dropping it without [`AtomicUnit::commit`]
//! discards every staged write and releases its row locks.
//!
//! # Backends
//!
//! - [`postgres::PgStore`] - sqlx/PostgreSQL; constraints are table constraints
//! - [`memory::MemoryStore`] - in-process; per-wallet row locks in a `DashMap`

pub mod memory;
pub mod postgres;

use crate::types::{Transaction, Wallet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Name of the non-negative balance constraint (matches the SQL migration)
pub const BALANCE_CONSTRAINT: &str = "wallets_balance_non_negative";

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store boundary errors
///
/// A constraint violation names the constraint only; the engine decides what
/// it means for the caller.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No non-deleted wallet with this ID
    #[error("wallet {0} not found")]
    WalletNotFound(Uuid),

    /// A write would breach a standing constraint; nothing was written
    #[error("constraint violated: {constraint}")]
    ConstraintViolated {
        /// Constraint name
        constraint: String,
    },

    /// Log entry references a wallet that is not valid at insert time
    #[error("transaction references invalid wallet {wallet_id}")]
    ReferentialViolation {
        /// Referenced wallet
        wallet_id: Uuid,
    },

    /// Database error (connectivity, commit, ...)
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failure
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Stored data could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Balance mutation inside an atomic unit
#[async_trait]
pub trait WalletStore: Send {
    /// Lock the wallet row and add `delta` to its balance
    ///
    /// `updated_at` is stamped once the row lock is held and never moves backwards,
    /// so the returned wallet carries the persistence time of this change.
    ///
    /// Fails with [`StoreError::WalletNotFound`] when no non-deleted row matches and with
    /// [`StoreError::ConstraintViolated`] when the resulting balance would be negative.
    /// Either failure leaves the row untouched.
    async fn apply_delta(&mut self, wallet_id: Uuid, delta: Decimal) -> StoreResult<Wallet>;
}

/// Append-only transaction log inside an atomic unit
#[async_trait]
pub trait TransactionLog: Send {
    /// Append one entry; [`StoreError::ReferentialViolation`] if its wallet is not valid
    async fn append(&mut self, entry: &Transaction) -> StoreResult<()>;
}

/// All-or-nothing unit of work
#[async_trait]
pub trait AtomicUnit: WalletStore + TransactionLog {
    /// Publish every staged write together
    async fn commit(self) -> StoreResult<()>;

    /// Discard every staged write
    async fn rollback(self) -> StoreResult<()>;
}

/// Store handle shared by the engine
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Unit type opened by [`LedgerStore::begin`]
    type Unit: AtomicUnit + 'static;

    /// Persist a new wallet
    async fn create_wallet(&self, wallet: &Wallet) -> StoreResult<Wallet>;

    /// Fetch a wallet, excluding soft-deleted ones
    async fn find_wallet(&self, wallet_id: Uuid) -> StoreResult<Option<Wallet>>;

    /// Mark a wallet deleted; `None` if it was absent or already deleted
    async fn soft_delete_wallet(
        &self,
        wallet_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Wallet>>;

    /// Log entries of a wallet ordered by execution time, then ID
    async fn list_transactions(&self, wallet_id: Uuid) -> StoreResult<Vec<Transaction>>;

    /// Open an atomic unit
    async fn begin(&self) -> StoreResult<Self::Unit>;
}
