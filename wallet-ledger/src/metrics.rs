//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger engine.
//!
//! # Metrics
//!
//! - `wallet_ledger_operations_total{operation,outcome}` - Balance operations by result
//! - `wallet_ledger_operation_duration_seconds{operation}` - Histogram of operation latencies
//! - `wallet_ledger_wallets_created_total` - Wallets created

use crate::error::ErrorKind;
use crate::types::OperationType;
use prometheus::{
    Encoder, HistogramOpts, HistogramTimer, HistogramVec, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

/// Outcome label for a successful operation
pub const OUTCOME_OK: &str = "ok";

/// Metrics collector
///
/// Each collector owns its registry, so several engines (e.g. in tests) can live
/// in one process without clashing on the global default registry.
#[derive(Clone)]
pub struct Metrics {
    /// Operations by type and outcome
    pub operations_total: IntCounterVec,

    /// Operation duration histogram
    pub operation_duration: HistogramVec,

    /// Wallets created
    pub wallets_created: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_total = IntCounterVec::new(
            Opts::new(
                "wallet_ledger_operations_total",
                "Balance operations by type and outcome",
            ),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "wallet_ledger_operation_duration_seconds",
                "Histogram of balance operation latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let wallets_created = IntCounter::new(
            "wallet_ledger_wallets_created_total",
            "Total number of wallets created",
        )?;
        registry.register(Box::new(wallets_created.clone()))?;

        Ok(Self {
            operations_total,
            operation_duration,
            wallets_created,
            registry,
        })
    }

    /// Start timing an operation; the duration is recorded when the timer drops
    pub fn start_operation(&self, operation: OperationType) -> HistogramTimer {
        self.operation_duration
            .with_label_values(&[operation.as_str()])
            .start_timer()
    }

    /// Record an operation outcome
    pub fn record_operation(&self, operation: OperationType, outcome: Result<(), ErrorKind>) {
        let outcome = match outcome {
            Ok(()) => OUTCOME_OK,
            Err(kind) => kind.as_str(),
        };
        self.operations_total
            .with_label_values(&[operation.as_str(), outcome])
            .inc();
    }

    /// Record wallet creation
    pub fn record_wallet_created(&self) {
        self.wallets_created.inc();
    }

    /// Count of operations with a given outcome
    pub fn operation_count(&self, operation: OperationType, outcome: &str) -> u64 {
        self.operations_total
            .with_label_values(&[operation.as_str(), outcome])
            .get()
    }

    /// Render the registry in the Prometheus text format
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}
