//! Error types for the transaction engine

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Transaction engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Data model error (validation, malformed keys)
    #[error(transparent)]
    Model(#[from] wallet_core::Error),

    /// External store error
    #[error(transparent)]
    Store(#[from] store_bus::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// A delivery could not be routed
    #[error("Bad delivery: {0}")]
    Delivery(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
