//! MintRail store bus
//!
//! The narrow interface between the transaction rail and the external
//! sharded object store it runs on top of. The store owns replication,
//! versioning and delivery of trigger keys; this crate only models what
//! the protocol consumes:
//!
//! - [`SharedStore`]: get/put/fire-and-forget writes plus the
//!   key-to-shard and shard-membership topology queries
//! - [`Topology`]: the responsibility rules derived from sorted shard
//!   membership (chain driving, persistence, engine partitioning)
//! - [`MemoryStore`]: an in-process store with a put-triggered delivery
//!   feed, standing in for the real store in tests and local runs

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod error;
pub mod memory;
pub mod store;
pub mod topology;
pub mod types;

// Re-exports
pub use error::{Error, Result};
pub use memory::{MemoryCluster, MemoryStore};
pub use store::SharedStore;
pub use topology::Topology;
pub use types::{NodeId, ShardIndex, StoreObject, VersionedBlob};
