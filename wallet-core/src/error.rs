//! Error types for the wallet data model

use thiserror::Error;

/// Result type for wallet-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wallet data model errors
#[derive(Error, Debug)]
pub enum Error {
    /// Request rejected before entering the protocol
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Malformed store key
    #[error("Malformed key: {0}")]
    Key(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
