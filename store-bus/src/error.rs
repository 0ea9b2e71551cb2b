//! Error types for the store bus

use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Store bus errors
#[derive(Error, Debug)]
pub enum Error {
    /// The backing store rejected or lost an operation
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// The node is not a member of any shard
    #[error("Topology error: {0}")]
    Topology(String),
}
