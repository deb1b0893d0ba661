//! In-process store
//!
//! Each wallet row sits behind its own async mutex inside a `DashMap`, so units
//! on different wallets never contend. A unit locks a row the first time it
//! writes to it (like `UPDATE` taking a row lock in Postgres), stages its
//! changes, and publishes balance and log entries together on commit while it
//! still holds the lock. Dropping a unit releases the locks and discards the
//! staged state.
//!
//! Reads go to the last published copy of a row and never wait for a unit,
//! matching a committed read in Postgres.

use super::{
    AtomicUnit, LedgerStore, StoreError, StoreResult, TransactionLog, WalletStore,
    BALANCE_CONSTRAINT,
};
use crate::types::{Transaction, Wallet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

struct Row {
    /// Row lock; the guarded value is the committed state
    lock: Arc<Mutex<Wallet>>,
    /// Committed state for lock-free reads, written only under `lock`
    published: RwLock<Wallet>,
}

impl Row {
    fn new(wallet: Wallet) -> Self {
        Self {
            lock: Arc::new(Mutex::new(wallet.clone())),
            published: RwLock::new(wallet),
        }
    }
}

#[derive(Default)]
struct Tables {
    wallets: DashMap<Uuid, Arc<Row>>,
    history: RwLock<HashMap<Uuid, Vec<Transaction>>>,
}

/// In-memory ledger store
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Tables>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of log entries across all wallets
    pub fn transaction_count(&self) -> usize {
        self.tables.history.read().values().map(Vec::len).sum()
    }

    // Clone the Arc out so no shard lock is held across an await.
    fn row(&self, wallet_id: Uuid) -> Option<Arc<Row>> {
        self.tables.wallets.get(&wallet_id).map(|r| r.value().clone())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("wallets", &self.tables.wallets.len())
            .field("transactions", &self.transaction_count())
            .finish()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Unit = MemoryUnit;

    async fn create_wallet(&self, wallet: &Wallet) -> StoreResult<Wallet> {
        self.tables
            .wallets
            .insert(wallet.id, Arc::new(Row::new(wallet.clone())));
        Ok(wallet.clone())
    }

    async fn find_wallet(&self, wallet_id: Uuid) -> StoreResult<Option<Wallet>> {
        let Some(row) = self.row(wallet_id) else {
            return Ok(None);
        };
        let wallet = row.published.read();
        Ok((!wallet.deleted).then(|| wallet.clone()))
    }

    async fn soft_delete_wallet(
        &self,
        wallet_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Wallet>> {
        let Some(row) = self.row(wallet_id) else {
            return Ok(None);
        };
        let mut wallet = row.lock.lock().await;
        if wallet.deleted {
            return Ok(None);
        }
        wallet.deleted = true;
        wallet.updated_at = at.max(wallet.updated_at);
        *row.published.write() = wallet.clone();
        Ok(Some(wallet.clone()))
    }

    async fn list_transactions(&self, wallet_id: Uuid) -> StoreResult<Vec<Transaction>> {
        let mut entries = self
            .tables
            .history
            .read()
            .get(&wallet_id)
            .cloned()
            .unwrap_or_default();
        entries.sort_by(|a, b| a.executed_at.cmp(&b.executed_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn begin(&self) -> StoreResult<MemoryUnit> {
        Ok(MemoryUnit {
            store: self.clone(),
            locked: HashMap::new(),
            entries: Vec::new(),
        })
    }
}

struct LockedRow {
    row: Arc<Row>,
    guard: OwnedMutexGuard<Wallet>,
    staged: Wallet,
}

/// Atomic unit over a [`MemoryStore`]
pub struct MemoryUnit {
    store: MemoryStore,
    locked: HashMap<Uuid, LockedRow>,
    entries: Vec<Transaction>,
}

impl std::fmt::Debug for MemoryUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryUnit")
            .field("locked", &self.locked.len())
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl MemoryUnit {
    /// Lock a row for the rest of the unit, or reuse the lock already held
    async fn lock_row(&mut self, wallet_id: Uuid) -> StoreResult<Option<&mut LockedRow>> {
        if !self.locked.contains_key(&wallet_id) {
            let Some(row) = self.store.row(wallet_id) else {
                return Ok(None);
            };
            let guard = row.lock.clone().lock_owned().await;
            let staged = guard.clone();
            self.locked.insert(wallet_id, LockedRow { row, guard, staged });
        }
        Ok(self.locked.get_mut(&wallet_id))
    }
}

#[async_trait]
impl WalletStore for MemoryUnit {
    async fn apply_delta(&mut self, wallet_id: Uuid, delta: Decimal) -> StoreResult<Wallet> {
        let row = match self.lock_row(wallet_id).await? {
            Some(row) if !row.staged.deleted => row,
            _ => return Err(StoreError::WalletNotFound(wallet_id)),
        };

        let balance = row
            .staged
            .balance
            .checked_add(delta)
            .ok_or_else(|| StoreError::ConstraintViolated {
                constraint: "wallets_balance_overflow".to_string(),
            })?;
        if balance < Decimal::ZERO {
            return Err(StoreError::ConstraintViolated {
                constraint: BALANCE_CONSTRAINT.to_string(),
            });
        }

        row.staged.balance = balance;
        row.staged.updated_at = Utc::now().max(row.staged.updated_at);
        Ok(row.staged.clone())
    }
}

#[async_trait]
impl TransactionLog for MemoryUnit {
    async fn append(&mut self, entry: &Transaction) -> StoreResult<()> {
        // Key-share style check: the referenced row must exist and stay locked until commit.
        let valid = matches!(
            self.lock_row(entry.wallet_id).await?,
            Some(row) if !row.staged.deleted
        );
        if !valid {
            return Err(StoreError::ReferentialViolation {
                wallet_id: entry.wallet_id,
            });
        }
        self.entries.push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl AtomicUnit for MemoryUnit {
    async fn commit(mut self) -> StoreResult<()> {
        let mut history = self.store.tables.history.write();
        for entry in self.entries.drain(..) {
            history.entry(entry.wallet_id).or_default().push(entry);
        }
        for locked in self.locked.values_mut() {
            *locked.guard = locked.staged.clone();
            *locked.row.published.write() = locked.staged.clone();
        }
        drop(history);
        // Row guards drop here, after both balance and log are in place.
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        Ok(())
    }
}
