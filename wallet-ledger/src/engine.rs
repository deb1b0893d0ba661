//! Ledger engine
//!
//! Orchestrates the wallet store and the transaction log. Every balance
//! operation runs as one atomic unit:
//!
//! ```text
//! validate ──► begin ──► apply_delta ──► append ──► commit
//!                            │              │          │
//!                            ▼              ▼          ▼
//!                  WalletNotFound /   WalletNotFound  Storage
//!                  InsufficientBalance
//! ```
//!
//! Validation happens before the store is touched. Any failure after `begin`
//! rolls the unit back, so a caller never observes a balance change without
//! its log entry or the other way round.
//!
//! # Example
//!
//! ```no_run
//! use rust_decimal::Decimal;
//! use wallet_ledger::{LedgerEngine, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> wallet_ledger::Result<()> {
//!     let engine = LedgerEngine::new(MemoryStore::new())?;
//!     let wallet = engine.create_wallet().await?;
//!     engine.deposit(wallet.id, Decimal::new(50000, 2)).await?;
//!     Ok(())
//! }
//! ```

use crate::{
    config::EngineConfig,
    error::{Error, Result},
    metrics::Metrics,
    store::{AtomicUnit, LedgerStore, StoreError, TransactionLog, WalletStore},
    types::{BalanceCheck, Operation, OperationRequest, OperationType, Transaction, Wallet},
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Main engine interface
pub struct LedgerEngine<S> {
    /// Backing store
    store: Arc<S>,

    /// Configuration
    config: EngineConfig,

    /// Prometheus collectors
    metrics: Metrics,
}

impl<S: LedgerStore> LedgerEngine<S> {
    /// Engine with default configuration
    pub fn new(store: S) -> Result<Self> {
        Self::with_config(store, EngineConfig::default())
    }

    /// Engine with explicit configuration
    pub fn with_config(store: S, config: EngineConfig) -> Result<Self> {
        Ok(Self {
            store: Arc::new(store),
            config,
            metrics: Metrics::new()?,
        })
    }

    /// Backing store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Prometheus collectors
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Create a wallet with zero balance
    pub async fn create_wallet(&self) -> Result<Wallet> {
        let wallet = self.store.create_wallet(&Wallet::new()).await?;
        self.metrics.record_wallet_created();

        tracing::info!(wallet_id = %wallet.id, "Wallet created");

        Ok(wallet)
    }

    /// Get a non-deleted wallet
    pub async fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet> {
        self.store
            .find_wallet(wallet_id)
            .await?
            .ok_or(Error::WalletNotFound(wallet_id))
    }

    /// Soft-delete a wallet
    ///
    /// Waits for in-flight operations on the wallet (they hold its row lock).
    /// Afterwards the wallet is invisible to reads and refuses operations.
    pub async fn delete_wallet(&self, wallet_id: Uuid) -> Result<Wallet> {
        let wallet = self
            .store
            .soft_delete_wallet(wallet_id, Utc::now())
            .await?
            .ok_or(Error::WalletNotFound(wallet_id))?;

        tracing::info!(wallet_id = %wallet_id, balance = %wallet.balance, "Wallet soft-deleted");

        Ok(wallet)
    }

    /// Transaction history of a non-deleted wallet, oldest first
    pub async fn list_transactions(&self, wallet_id: Uuid) -> Result<Vec<Transaction>> {
        self.get_wallet(wallet_id).await?;
        Ok(self.store.list_transactions(wallet_id).await?)
    }

    /// Deposit `amount` into a wallet
    pub async fn deposit(&self, wallet_id: Uuid, amount: Decimal) -> Result<Transaction> {
        self.apply_operation(wallet_id, OperationType::Deposit, amount)
            .await
    }

    /// Withdraw `amount` from a wallet
    pub async fn withdraw(&self, wallet_id: Uuid, amount: Decimal) -> Result<Transaction> {
        self.apply_operation(wallet_id, OperationType::Withdraw, amount)
            .await
    }

    /// Apply a raw request
    ///
    /// `expected` pins the operation type for entry points such as a deposit
    /// endpoint; see [`OperationRequest::validate`].
    pub async fn submit(
        &self,
        request: &OperationRequest,
        expected: Option<OperationType>,
    ) -> Result<Transaction> {
        if let Some(client_id) = request.id {
            tracing::debug!(client_id = %client_id, "Ignoring client-supplied transaction id");
        }

        let operation = request.validate(expected)?;
        self.execute(operation).await
    }

    /// Validate and apply one balance operation atomically
    pub async fn apply_operation(
        &self,
        wallet_id: Uuid,
        operation_type: OperationType,
        amount: Decimal,
    ) -> Result<Transaction> {
        let operation = Operation::new(wallet_id, operation_type, amount)?;
        self.execute(operation).await
    }

    /// Reconcile a wallet's balance against its log
    ///
    /// Reads the wallet and its log separately, so the result is only meaningful
    /// while no operations on the wallet are in flight.
    pub async fn verify_balance(&self, wallet_id: Uuid) -> Result<BalanceCheck> {
        let wallet = self.get_wallet(wallet_id).await?;
        let entries = self.store.list_transactions(wallet_id).await?;

        let computed_balance = entries
            .iter()
            .map(Transaction::signed_amount)
            .fold(Decimal::ZERO, |acc, amount| acc + amount);

        Ok(BalanceCheck {
            wallet_id,
            stored_balance: wallet.balance,
            computed_balance,
            transaction_count: entries.len(),
        })
    }

    async fn execute(&self, operation: Operation) -> Result<Transaction> {
        let operation_type = operation.operation_type();
        let _timer = self.metrics.start_operation(operation_type);

        let result = self.run_unit(&operation).await;

        self.metrics
            .record_operation(operation_type, result.as_ref().map(|_| ()).map_err(Error::kind));

        match &result {
            Ok(entry) => tracing::debug!(
                transaction_id = %entry.id,
                wallet_id = %entry.wallet_id,
                operation = %operation_type,
                amount = %entry.amount,
                "Operation applied"
            ),
            Err(e) if e.is_retryable() => tracing::warn!(
                wallet_id = %operation.wallet_id(),
                operation = %operation_type,
                error = %e,
                "Operation failed on storage"
            ),
            Err(e) => tracing::debug!(
                wallet_id = %operation.wallet_id(),
                operation = %operation_type,
                error = %e,
                "Operation rejected"
            ),
        }

        result
    }

    /// Stage under the deadline, then commit outside it
    ///
    /// A timeout can only fire before commit starts, so `Error::Timeout` always
    /// means nothing was applied.
    async fn run_unit(&self, operation: &Operation) -> Result<Transaction> {
        let staged = match self.config.operation_timeout() {
            // Dropping the unfinished future drops its unit, which rolls it back.
            Some(limit) => tokio::time::timeout(limit, self.stage(operation))
                .await
                .unwrap_or(Err(Error::Timeout(limit))),
            None => self.stage(operation).await,
        };
        let (unit, entry) = staged?;

        unit.commit().await?;

        Ok(entry)
    }

    /// Begin a unit, move the balance and append the log entry, leaving the unit open
    async fn stage(&self, operation: &Operation) -> Result<(S::Unit, Transaction)> {
        let mut unit = self.store.begin().await?;

        let wallet = match unit
            .apply_delta(operation.wallet_id(), operation.delta())
            .await
        {
            Ok(wallet) => wallet,
            Err(e) => return Err(abort(unit, delta_error(operation, e)).await),
        };

        let entry = Transaction::record(operation, wallet.updated_at);
        if let Err(e) = unit.append(&entry).await {
            return Err(abort(unit, append_error(e)).await);
        }

        Ok((unit, entry))
    }
}

/// Roll back and return the error that caused the abort
async fn abort<U: AtomicUnit>(unit: U, error: Error) -> Error {
    if let Err(e) = unit.rollback().await {
        tracing::warn!(error = %e, "Rollback failed; transaction discarded by the store");
    }
    error
}

/// The generic constraint signal only means "insufficient balance" for a debit.
fn delta_error(operation: &Operation, error: StoreError) -> Error {
    match error {
        StoreError::WalletNotFound(id) => Error::WalletNotFound(id),
        StoreError::ConstraintViolated { .. } if operation.delta() < Decimal::ZERO => {
            Error::InsufficientBalance {
                wallet_id: operation.wallet_id(),
                requested: operation.amount(),
            }
        }
        other => Error::Storage(other),
    }
}

fn append_error(error: StoreError) -> Error {
    match error {
        StoreError::ReferentialViolation { wallet_id } => Error::WalletNotFound(wallet_id),
        other => Error::Storage(other),
    }
}

impl<S> std::fmt::Debug for LedgerEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ValidationError};
    use crate::metrics::OUTCOME_OK;
    use crate::store::{MemoryStore, StoreResult};
    use crate::types::OperationRequest;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn engine() -> LedgerEngine<MemoryStore> {
        LedgerEngine::new(MemoryStore::new()).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_wallet() {
        let engine = engine();
        let wallet = engine.create_wallet().await.unwrap();
        assert_eq!(wallet.balance, Decimal::ZERO);
        assert!(!wallet.deleted);

        let fetched = engine.get_wallet(wallet.id).await.unwrap();
        assert_eq!(fetched, wallet);
        assert_eq!(engine.metrics().wallets_created.get(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_wallet() {
        let engine = engine();
        let err = engine.get_wallet(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WalletNotFound);
    }

    #[tokio::test]
    async fn test_deposit_withdraw_scenario() {
        let engine = engine();
        let wallet = engine.create_wallet().await.unwrap();

        let first = engine.deposit(wallet.id, dec!(500)).await.unwrap();
        assert_eq!(first.operation_type, OperationType::Deposit);
        assert_eq!(first.amount, dec!(500));
        assert_eq!(engine.get_wallet(wallet.id).await.unwrap().balance, dec!(500));

        let second = engine.withdraw(wallet.id, dec!(250)).await.unwrap();
        assert_eq!(second.operation_type, OperationType::Withdraw);
        assert_eq!(engine.get_wallet(wallet.id).await.unwrap().balance, dec!(250));

        let err = engine.withdraw(wallet.id, dec!(5000)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientBalance { wallet_id, requested }
                if wallet_id == wallet.id && requested == dec!(5000)
        ));

        let after = engine.get_wallet(wallet.id).await.unwrap();
        assert_eq!(after.balance, dec!(250));

        let history = engine.list_transactions(wallet.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, first.id);
        assert_eq!(history[1].id, second.id);

        let check = engine.verify_balance(wallet.id).await.unwrap();
        assert!(check.is_consistent());
        assert_eq!(check.transaction_count, 2);
    }

    #[tokio::test]
    async fn test_updated_at_refreshed_on_mutation() {
        let engine = engine();
        let wallet = engine.create_wallet().await.unwrap();
        let entry = engine.deposit(wallet.id, dec!(1)).await.unwrap();

        let after = engine.get_wallet(wallet.id).await.unwrap();
        assert_eq!(after.updated_at, entry.executed_at);
        assert_eq!(after.created_at, wallet.created_at);
        assert!(after.updated_at >= wallet.updated_at);
    }

    #[tokio::test]
    async fn test_validation_never_reaches_storage() {
        let engine = engine();
        let wallet = engine.create_wallet().await.unwrap();

        let err = engine.deposit(wallet.id, Decimal::ZERO).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::NonPositiveAmount(_))
        ));

        let err = engine.withdraw(Uuid::nil(), dec!(10)).await.unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::EmptyWalletId)));

        let request = OperationRequest {
            wallet_id: wallet.id,
            amount: dec!(10),
            operation_type: Some("TRANSFER".to_string()),
            ..Default::default()
        };
        let err = engine.submit(&request, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);

        assert_eq!(engine.store().transaction_count(), 0);
        assert_eq!(
            engine.metrics().operation_count(OperationType::Deposit, "validation_failed"),
            0,
            "rejected before an operation is started"
        );
    }

    #[tokio::test]
    async fn test_submit_uses_endpoint_type_and_ignores_client_id() {
        let engine = engine();
        let wallet = engine.create_wallet().await.unwrap();
        let client_id = Uuid::new_v4();

        let request = OperationRequest {
            id: Some(client_id),
            wallet_id: wallet.id,
            amount: dec!(42),
            operation_type: None,
        };
        let entry = engine
            .submit(&request, Some(OperationType::Deposit))
            .await
            .unwrap();

        assert_ne!(entry.id, client_id);
        assert_eq!(entry.operation_type, OperationType::Deposit);
        assert_eq!(engine.get_wallet(wallet.id).await.unwrap().balance, dec!(42));
    }

    #[tokio::test]
    async fn test_operations_on_deleted_wallet() {
        let engine = engine();
        let wallet = engine.create_wallet().await.unwrap();
        engine.deposit(wallet.id, dec!(10)).await.unwrap();

        let deleted = engine.delete_wallet(wallet.id).await.unwrap();
        assert!(deleted.deleted);

        let err = engine.deposit(wallet.id, dec!(5)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WalletNotFound);
        let err = engine.get_wallet(wallet.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WalletNotFound);
        let err = engine.delete_wallet(wallet.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WalletNotFound);
        let err = engine.list_transactions(wallet.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WalletNotFound);

        assert_eq!(engine.store().transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_wallet_leaves_no_trace() {
        let engine = engine();
        let err = engine.deposit(Uuid::new_v4(), dec!(5)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WalletNotFound);
        assert_eq!(engine.store().transaction_count(), 0);
        assert_eq!(
            engine
                .metrics()
                .operation_count(OperationType::Deposit, "wallet_not_found"),
            1
        );
    }

    #[tokio::test]
    async fn test_metrics_count_outcomes() {
        let engine = engine();
        let wallet = engine.create_wallet().await.unwrap();
        engine.deposit(wallet.id, dec!(1)).await.unwrap();
        engine.withdraw(wallet.id, dec!(2)).await.unwrap_err();

        let metrics = engine.metrics();
        assert_eq!(metrics.operation_count(OperationType::Deposit, OUTCOME_OK), 1);
        assert_eq!(
            metrics.operation_count(OperationType::Withdraw, "insufficient_balance"),
            1
        );
    }

    /// Store wrapper that injects failures into the atomic unit
    #[derive(Clone, Default)]
    struct FaultyStore {
        inner: MemoryStore,
        fail_append: Arc<AtomicBool>,
        fail_commit: Arc<AtomicBool>,
        slow_commit_ack: Arc<AtomicBool>,
        deposit_constraint: Arc<AtomicBool>,
    }

    struct FaultyUnit {
        inner: crate::store::memory::MemoryUnit,
        fail_append: bool,
        fail_commit: bool,
        slow_commit_ack: bool,
        deposit_constraint: bool,
    }

    #[async_trait]
    impl WalletStore for FaultyUnit {
        async fn apply_delta(&mut self, wallet_id: Uuid, delta: Decimal) -> StoreResult<Wallet> {
            if self.deposit_constraint && delta > Decimal::ZERO {
                return Err(StoreError::ConstraintViolated {
                    constraint: "wallets_balance_upper_bound".to_string(),
                });
            }
            self.inner.apply_delta(wallet_id, delta).await
        }
    }

    #[async_trait]
    impl TransactionLog for FaultyUnit {
        async fn append(&mut self, entry: &Transaction) -> StoreResult<()> {
            if self.fail_append {
                return Err(StoreError::ReferentialViolation {
                    wallet_id: entry.wallet_id,
                });
            }
            self.inner.append(entry).await
        }
    }

    #[async_trait]
    impl AtomicUnit for FaultyUnit {
        async fn commit(self) -> StoreResult<()> {
            if self.fail_commit {
                return Err(StoreError::Database(sqlx::Error::PoolClosed));
            }
            let slow_ack = self.slow_commit_ack;
            self.inner.commit().await?;
            // Durable already; only the acknowledgement is late.
            if slow_ack {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Ok(())
        }

        async fn rollback(self) -> StoreResult<()> {
            self.inner.rollback().await
        }
    }

    #[async_trait]
    impl LedgerStore for FaultyStore {
        type Unit = FaultyUnit;

        async fn create_wallet(&self, wallet: &Wallet) -> StoreResult<Wallet> {
            self.inner.create_wallet(wallet).await
        }

        async fn find_wallet(&self, wallet_id: Uuid) -> StoreResult<Option<Wallet>> {
            self.inner.find_wallet(wallet_id).await
        }

        async fn soft_delete_wallet(
            &self,
            wallet_id: Uuid,
            at: DateTime<Utc>,
        ) -> StoreResult<Option<Wallet>> {
            self.inner.soft_delete_wallet(wallet_id, at).await
        }

        async fn list_transactions(&self, wallet_id: Uuid) -> StoreResult<Vec<Transaction>> {
            self.inner.list_transactions(wallet_id).await
        }

        async fn begin(&self) -> StoreResult<FaultyUnit> {
            Ok(FaultyUnit {
                inner: self.inner.begin().await?,
                fail_append: self.fail_append.load(Ordering::SeqCst),
                fail_commit: self.fail_commit.load(Ordering::SeqCst),
                slow_commit_ack: self.slow_commit_ack.load(Ordering::SeqCst),
                deposit_constraint: self.deposit_constraint.load(Ordering::SeqCst),
            })
        }
    }

    #[tokio::test]
    async fn test_referential_failure_rolls_back_balance() {
        let store = FaultyStore::default();
        let engine = LedgerEngine::new(store.clone()).unwrap();
        let wallet = engine.create_wallet().await.unwrap();

        store.fail_append.store(true, Ordering::SeqCst);
        let err = engine.deposit(wallet.id, dec!(100)).await.unwrap_err();
        assert!(matches!(err, Error::WalletNotFound(id) if id == wallet.id));

        let after = engine.get_wallet(wallet.id).await.unwrap();
        assert_eq!(after.balance, Decimal::ZERO);
        assert_eq!(store.inner.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_failure_is_storage_error_without_effect() {
        let store = FaultyStore::default();
        let engine = LedgerEngine::new(store.clone()).unwrap();
        let wallet = engine.create_wallet().await.unwrap();

        store.fail_commit.store(true, Ordering::SeqCst);
        let err = engine.deposit(wallet.id, dec!(100)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
        assert!(err.is_retryable());

        assert_eq!(engine.get_wallet(wallet.id).await.unwrap().balance, Decimal::ZERO);
        assert_eq!(store.inner.transaction_count(), 0);

        store.fail_commit.store(false, Ordering::SeqCst);
        engine.deposit(wallet.id, dec!(100)).await.unwrap();
        assert_eq!(engine.get_wallet(wallet.id).await.unwrap().balance, dec!(100));
    }

    #[tokio::test]
    async fn test_constraint_on_credit_is_not_insufficient_balance() {
        let store = FaultyStore::default();
        let engine = LedgerEngine::new(store.clone()).unwrap();
        let wallet = engine.create_wallet().await.unwrap();

        store.deposit_constraint.store(true, Ordering::SeqCst);
        let err = engine.deposit(wallet.id, dec!(1)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Storage(StoreError::ConstraintViolated { .. })
        ));
    }

    #[tokio::test]
    async fn test_slow_commit_ack_is_not_reported_as_timeout() {
        let store = FaultyStore::default();
        let config = EngineConfig {
            operation_timeout_ms: Some(50),
        };
        let engine = LedgerEngine::with_config(store.clone(), config).unwrap();
        let wallet = engine.create_wallet().await.unwrap();

        store.slow_commit_ack.store(true, Ordering::SeqCst);
        let entry = engine.deposit(wallet.id, dec!(100)).await.unwrap();
        assert_eq!(entry.amount, dec!(100));

        assert_eq!(engine.get_wallet(wallet.id).await.unwrap().balance, dec!(100));
        assert_eq!(store.inner.transaction_count(), 1);
        assert_eq!(
            engine.metrics().operation_count(OperationType::Deposit, OUTCOME_OK),
            1
        );
    }
}
