//! MintRail wallet data model
//!
//! Shared types for the sharded digital-currency rail:
//!
//! - **Wallets**: integer-identified balance entries
//! - **Transfer requests**: value-conserving moves between wallet sets,
//!   carrying the canonical visitation order their chain protocol follows
//! - **Key layout**: where wallets, transaction records and operation
//!   deliveries live in the external sharded store
//! - **Configuration**: the recognized service option surface
//!
//! # Invariants
//!
//! - Value conservation: Σ(sources) == Σ(destinations) for every transfer,
//!   checked at submission
//! - Visitation orders contain distinct wallet ids in a deterministic,
//!   shard-canonical order

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod config;
pub mod error;
pub mod keys;
pub mod types;

// Re-exports
pub use config::{BatchPolicy, ServiceConfig};
pub use error::{Error, Result};
pub use types::{
    CoinValue, OperationKind, TransactionId, TransactionRecord, TransactionStatus,
    TransferRequest, WalletId,
};
