//! Error types for the ledger

use crate::store::StoreError;
use crate::types::OperationType;
use rust_decimal::Decimal;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Request rejected before any storage access
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Wallet absent or soft-deleted
    #[error("Wallet not found: {0}")]
    WalletNotFound(Uuid),

    /// Withdrawal would take the balance below zero
    #[error("Insufficient balance in wallet {wallet_id}: requested {requested}")]
    InsufficientBalance {
        /// Target wallet
        wallet_id: Uuid,
        /// Amount of the refused withdrawal
        requested: Decimal,
    },

    /// Infrastructure failure (connectivity, commit, corrupt rows)
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Operation abandoned after the configured deadline; nothing was applied
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Metrics registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Error taxonomy exposed across the engine boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input
    ValidationFailed,
    /// Wallet absent or soft-deleted
    WalletNotFound,
    /// Balance would go negative
    InsufficientBalance,
    /// Generic infrastructure failure, safe to retry
    StorageUnavailable,
}

impl ErrorKind {
    /// Stable snake_case label, used in metrics and API error bodies
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::WalletNotFound => "wallet_not_found",
            ErrorKind::InsufficientBalance => "insufficient_balance",
            ErrorKind::StorageUnavailable => "storage_unavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify the error for the caller
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::ValidationFailed,
            Error::WalletNotFound(_) => ErrorKind::WalletNotFound,
            Error::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Error::Storage(_) | Error::Timeout(_) | Error::Metrics(_) => {
                ErrorKind::StorageUnavailable
            }
        }
    }

    /// Infrastructure failures never leave partial state, so they can be retried as-is.
    /// Domain and validation errors need fresh input first.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::StorageUnavailable
    }
}

/// Input validation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Nil wallet id
    #[error("wallet ID is empty")]
    EmptyWalletId,

    /// Zero or negative amount
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    /// Missing operation type
    #[error("operation type is empty")]
    EmptyOperationType,

    /// Operation type outside DEPOSIT / WITHDRAW
    #[error("operation type not allowed: {0}")]
    UnknownOperationType(String),

    /// Operation type does not match the endpoint it was sent to
    #[error("operation type {actual} does not match {expected}")]
    OperationTypeMismatch {
        /// Type required by the entry point
        expected: OperationType,
        /// Type found in the request
        actual: OperationType,
    },
}
