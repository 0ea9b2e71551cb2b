//! Service configuration
//!
//! The recognized option surface of the transaction rail: feature flags
//! for the optional pipeline threads and protocol optimizations, the
//! engine count, and one batching policy per persistence pipeline.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Batching policy of one pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPolicy {
    /// Flush as soon as a partition holds at least this many items
    pub min_size: usize,

    /// Never flush more than this many items at once
    pub max_size: usize,

    /// Maximum time a queued item waits before a flush (microseconds)
    pub max_wait_us: u64,
}

impl BatchPolicy {
    /// Maximum wait as a [`Duration`]
    pub fn max_wait(&self) -> Duration {
        Duration::from_micros(self.max_wait_us)
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 8,
            max_wait_us: 1000,
        }
    }
}

/// Transaction service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Hand operations for same-shard wallets directly to the sibling
    /// engine's inbox instead of going through the store
    pub enable_cross_thread_communication: bool,

    /// Batch wallet balance puts on a dedicated pipeline
    pub enable_wallet_persistence_thread: bool,

    /// Batch transaction record puts on a dedicated pipeline
    pub enable_tx_persistence_thread: bool,

    /// Batch chain forward/commit/abort writes on a dedicated pipeline
    pub enable_chaining_thread: bool,

    /// Let a transaction run past pending siblings when the source
    /// wallet's virtual balance already covers its amount
    pub enable_virtual_balance: bool,

    /// Build visitation orders from source wallets only
    pub enable_source_only_conflicts: bool,

    /// Number of engine tasks (wallet partitions) per node
    pub num_threads: usize,

    /// Wallet persistence batching policy
    pub wallet_persistence: BatchPolicy,

    /// Chaining batching policy
    pub chaining: BatchPolicy,

    /// Transaction persistence batching policy
    pub tx_persistence: BatchPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enable_cross_thread_communication: false,
            enable_wallet_persistence_thread: false,
            enable_tx_persistence_thread: false,
            enable_chaining_thread: false,
            enable_virtual_balance: false,
            enable_source_only_conflicts: false,
            num_threads: 1,
            wallet_persistence: BatchPolicy::default(),
            chaining: BatchPolicy::default(),
            tx_persistence: BatchPolicy::default(),
        }
    }
}

impl ServiceConfig {
    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ServiceConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables.
    ///
    /// Flags read `MINTRAIL_<OPTION>` and treat any value other than
    /// `"0"` as enabled; numeric options must parse.
    pub fn from_env() -> crate::Result<Self> {
        let mut config = ServiceConfig::default();

        for (flag, target) in [
            (
                "MINTRAIL_ENABLE_CROSS_THREAD_COMMUNICATION",
                &mut config.enable_cross_thread_communication,
            ),
            (
                "MINTRAIL_ENABLE_WALLET_PERSISTENCE_THREAD",
                &mut config.enable_wallet_persistence_thread,
            ),
            (
                "MINTRAIL_ENABLE_TX_PERSISTENCE_THREAD",
                &mut config.enable_tx_persistence_thread,
            ),
            (
                "MINTRAIL_ENABLE_CHAINING_THREAD",
                &mut config.enable_chaining_thread,
            ),
            (
                "MINTRAIL_ENABLE_VIRTUAL_BALANCE",
                &mut config.enable_virtual_balance,
            ),
            (
                "MINTRAIL_ENABLE_SOURCE_ONLY_CONFLICTS",
                &mut config.enable_source_only_conflicts,
            ),
        ] {
            if let Ok(value) = std::env::var(flag) {
                *target = value != "0";
            }
        }

        if let Ok(value) = std::env::var("MINTRAIL_NUM_THREADS") {
            config.num_threads = value
                .parse()
                .map_err(|e| crate::Error::Config(format!("MINTRAIL_NUM_THREADS: {}", e)))?;
        }

        Ok(config)
    }
}
