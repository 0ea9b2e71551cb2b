//! The external sharded store interface

use crate::types::{NodeId, ShardIndex, StoreObject, VersionedBlob};
use crate::Result;
use async_trait::async_trait;

/// Client interface to the external sharded object store.
///
/// Durable storage, replication and the pub/sub trigger that delivers
/// operation keys to the service are all the store's responsibility.
/// Fire-and-forget writes are ordered per destination shard but carry no
/// acknowledgment; loss detection and retransmission stay inside the
/// store's messaging layer.
#[async_trait]
pub trait SharedStore: Send + Sync + 'static {
    /// This client's node id
    fn node_id(&self) -> NodeId;

    /// The shard this node is a member of
    fn my_shard(&self) -> ShardIndex;

    /// Map a key to the shard that owns it.
    ///
    /// The rail uses a single object-pool type and subgroup, so only the
    /// shard index of the store's (type, subgroup, shard) triple is
    /// exposed.
    fn key_to_shard(&self, key: &str) -> ShardIndex;

    /// Members of a shard, sorted by node id
    fn shard_members(&self, shard: ShardIndex) -> Vec<NodeId>;

    /// Read the current version of a key, if any
    async fn get(&self, key: &str) -> Result<Option<VersionedBlob>>;

    /// Synchronous acknowledged write; returns the assigned version
    async fn put(&self, object: StoreObject) -> Result<u64>;

    /// Fire-and-forget write
    async fn put_and_forget(&self, object: StoreObject);

    /// Fire-and-forget batch write.
    ///
    /// With `shard` set, every object is sent to that shard as one
    /// ordered batch; otherwise each object is routed by its own key.
    async fn put_objects_and_forget(&self, shard: Option<ShardIndex>, objects: Vec<StoreObject>);
}
