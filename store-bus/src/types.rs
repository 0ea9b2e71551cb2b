//! Store bus types

use bytes::Bytes;

/// Node identifier within the cluster
pub type NodeId = u32;

/// Shard index within the object pool's subgroup
pub type ShardIndex = u32;

/// A versioned value read from the store
#[derive(Debug, Clone)]
pub struct VersionedBlob {
    /// Store-assigned version, monotonically increasing per key
    pub version: u64,

    /// Opaque payload
    pub bytes: Bytes,
}

/// A keyed value written to the store
#[derive(Debug, Clone)]
pub struct StoreObject {
    /// Target key
    pub key: String,

    /// Opaque payload
    pub bytes: Bytes,
}

impl StoreObject {
    /// Create a new store object
    pub fn new(key: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            bytes: bytes.into(),
        }
    }
}
