//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `rail_operations_total` - Operation deliveries processed
//! - `rail_duplicates_total` - Deliveries dropped by the idempotency record
//! - `rail_conflicts_total` - Transactions parked behind a conflict
//! - `rail_commits_total` / `rail_aborts_total` - Terminal outcomes
//! - `rail_*_batch_size` - Flush size per persistence pipeline

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Operation deliveries processed
    pub operations_total: IntCounter,

    /// Deliveries dropped as duplicates
    pub duplicates_total: IntCounter,

    /// Transactions that entered the graph blocked
    pub conflicts_total: IntCounter,

    /// Transactions fully committed on this node
    pub commits_total: IntCounter,

    /// Transactions fully aborted on this node
    pub aborts_total: IntCounter,

    /// Wallet persistence flush sizes
    pub wallet_batch_size: Histogram,

    /// Transaction persistence flush sizes
    pub tx_batch_size: Histogram,

    /// Chaining flush sizes
    pub chain_batch_size: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create a new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_total =
            IntCounter::new("rail_operations_total", "Operation deliveries processed")?;
        registry.register(Box::new(operations_total.clone()))?;

        let duplicates_total =
            IntCounter::new("rail_duplicates_total", "Deliveries dropped as duplicates")?;
        registry.register(Box::new(duplicates_total.clone()))?;

        let conflicts_total = IntCounter::new(
            "rail_conflicts_total",
            "Transactions that entered the graph blocked",
        )?;
        registry.register(Box::new(conflicts_total.clone()))?;

        let commits_total = IntCounter::new("rail_commits_total", "Transactions committed")?;
        registry.register(Box::new(commits_total.clone()))?;

        let aborts_total = IntCounter::new("rail_aborts_total", "Transactions aborted")?;
        registry.register(Box::new(aborts_total.clone()))?;

        let buckets = vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0];
        let wallet_batch_size = Histogram::with_opts(
            HistogramOpts::new("rail_wallet_batch_size", "Wallet persistence flush sizes")
                .buckets(buckets.clone()),
        )?;
        registry.register(Box::new(wallet_batch_size.clone()))?;

        let tx_batch_size = Histogram::with_opts(
            HistogramOpts::new("rail_tx_batch_size", "Transaction persistence flush sizes")
                .buckets(buckets.clone()),
        )?;
        registry.register(Box::new(tx_batch_size.clone()))?;

        let chain_batch_size = Histogram::with_opts(
            HistogramOpts::new("rail_chain_batch_size", "Chaining flush sizes").buckets(buckets),
        )?;
        registry.register(Box::new(chain_batch_size.clone()))?;

        Ok(Self {
            operations_total,
            duplicates_total,
            conflicts_total,
            commits_total,
            aborts_total,
            wallet_batch_size,
            tx_batch_size,
            chain_batch_size,
            registry,
        })
    }

    /// Get the metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
