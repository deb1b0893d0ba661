//! Wallet Ledger
//!
//! Wallet balances with an append-only transaction history.
//!
//! # Architecture
//!
//! - **Wallet Store**: current balance per wallet, non-negative by constraint
//! - **Transaction Log**: one immutable entry per applied operation
//! - **Ledger Engine**: validates requests and runs each operation as a single
//!   atomic unit against both
//!
//! # Invariants
//!
//! - A balance never goes below zero
//! - A balance change and its log entry commit together or not at all
//! - Operations on one wallet are serialized by its row lock
//! - Replaying a wallet's log reproduces its balance

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod store;
pub mod types;

// Re-exports
pub use config::{DatabaseConfig, EngineConfig, StoreBackend};
pub use engine::LedgerEngine;
pub use error::{Error, ErrorKind, Result, ValidationError};
pub use metrics::Metrics;
pub use store::{LedgerStore, MemoryStore, PgStore, StoreError};
pub use types::{BalanceCheck, Operation, OperationRequest, OperationType, Transaction, Wallet};
