//! MintRail transaction engine
//!
//! The per-shard core of the rail: a wallet-chaining atomic commitment
//! protocol without a central coordinator.
//!
//! # Architecture
//!
//! ```text
//! store trigger ──► TransactionService ──► engine inboxes (wallet % n)
//!                                             │
//!                              ┌──────────────┴──────────────┐
//!                              │  Engine (one task/partition) │
//!                              │  wallet cache · conflict     │
//!                              │  graph · transaction arena   │
//!                              └──┬───────────┬───────────┬──┘
//!                                 │           │           │
//!                          wallet puts   tx records   chain hops
//!                          (Batcher)     (Batcher)    (Batcher)
//! ```
//!
//! A transfer visits its wallets in canonical order: the forward pass
//! validates and reserves funds wallet by wallet, the terminal wallet
//! decides Commit or Abort, and the status flows back along the same
//! chain. Conflicting transactions are parked in a per-engine dependency
//! graph and reactivated the instant their blocker terminates.
//!
//! # Invariants
//!
//! - Value conservation for every committed transfer
//! - Committed balances never go negative
//! - Exactly one terminal status per transaction, observed identically
//!   at every visited wallet
//! - Conflicting transfers apply in graph release order

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod batcher;
pub mod cache;
pub mod client;
pub mod conflict;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod pipelines;

// Re-exports
pub use client::LedgerClient;
pub use dispatch::{ServiceHandle, TransactionService};
pub use error::{Error, Result};
pub use metrics::Metrics;
