//! In-memory store backend
//!
//! A process-local stand-in for the external sharded store, used by
//! tests and local runs. One [`MemoryCluster`] holds the object map and
//! the shard layout; every node obtains a [`MemoryStore`] client bound
//! to its node id. Puts on operation-delivery keys are forwarded to the
//! delivery feeds of every subscriber on the key's shard, mirroring the
//! real store's trigger mechanism.

use crate::error::{Error, Result};
use crate::store::SharedStore;
use crate::types::{NodeId, ShardIndex, StoreObject, VersionedBlob};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

struct ClusterInner {
    /// Sorted member list per shard
    members_per_shard: Vec<Vec<NodeId>>,
    objects: DashMap<String, VersionedBlob>,
    next_version: AtomicU64,
    feeds: Mutex<Vec<(ShardIndex, mpsc::UnboundedSender<StoreObject>)>>,
}

impl ClusterInner {
    fn shard_of(&self, key: &str) -> ShardIndex {
        let num_shards = self.members_per_shard.len() as u64;
        match wallet_core::keys::wallet_of_key(key) {
            Some(wallet) => (wallet % num_shards) as ShardIndex,
            None => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % num_shards) as ShardIndex
            }
        }
    }

    fn apply(&self, object: &StoreObject) -> u64 {
        let version = self.next_version.fetch_add(1, Ordering::Relaxed) + 1;
        self.objects.insert(
            object.key.clone(),
            VersionedBlob {
                version,
                bytes: object.bytes.clone(),
            },
        );
        self.deliver(object);
        version
    }

    /// Forward trigger keys to the subscribed feeds of the key's shard
    fn deliver(&self, object: &StoreObject) {
        let is_trigger = wallet_core::keys::parse_delivery(&object.key).is_some()
            || object.key == wallet_core::keys::INIT_KEY;
        if !is_trigger {
            return;
        }

        let shard = self.shard_of(&object.key);
        let mut feeds = self.feeds.lock();
        feeds.retain(|(feed_shard, sender)| {
            if *feed_shard != shard {
                return true;
            }
            trace!(key = %object.key, shard, "delivering trigger");
            sender.send(object.clone()).is_ok()
        });
    }
}

/// Shared state of an in-memory cluster
#[derive(Clone)]
pub struct MemoryCluster {
    inner: Arc<ClusterInner>,
}

impl MemoryCluster {
    /// Create a cluster with the given shard layout
    pub fn new(members_per_shard: Vec<Vec<NodeId>>) -> Self {
        let members_per_shard = members_per_shard
            .into_iter()
            .map(|mut members| {
                members.sort_unstable();
                members
            })
            .collect();
        Self {
            inner: Arc::new(ClusterInner {
                members_per_shard,
                objects: DashMap::new(),
                next_version: AtomicU64::new(0),
                feeds: Mutex::new(Vec::new()),
            }),
        }
    }

    /// One shard, one node (node id 0)
    pub fn single_node() -> Self {
        Self::new(vec![vec![0]])
    }

    /// Store client bound to a member node
    pub fn client(&self, node_id: NodeId) -> Result<MemoryStore> {
        let shard_index = self
            .inner
            .members_per_shard
            .iter()
            .position(|members| members.contains(&node_id))
            .ok_or_else(|| Error::Topology(format!("node {} is in no shard", node_id)))?;
        Ok(MemoryStore {
            node_id,
            shard_index: shard_index as ShardIndex,
            inner: Arc::clone(&self.inner),
        })
    }
}

/// Store client of one node against a [`MemoryCluster`]
#[derive(Clone)]
pub struct MemoryStore {
    node_id: NodeId,
    shard_index: ShardIndex,
    inner: Arc<ClusterInner>,
}

impl MemoryStore {
    /// Subscribe to operation deliveries for this node's shard.
    ///
    /// Every put on a delivery key owned by the shard is forwarded to
    /// the returned receiver, in put order.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreObject> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.feeds.lock().push((self.shard_index, tx));
        rx
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn my_shard(&self) -> ShardIndex {
        self.shard_index
    }

    fn key_to_shard(&self, key: &str) -> ShardIndex {
        self.inner.shard_of(key)
    }

    fn shard_members(&self, shard: ShardIndex) -> Vec<NodeId> {
        self.inner
            .members_per_shard
            .get(shard as usize)
            .cloned()
            .unwrap_or_default()
    }

    async fn get(&self, key: &str) -> Result<Option<VersionedBlob>> {
        Ok(self.inner.objects.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, object: StoreObject) -> Result<u64> {
        Ok(self.inner.apply(&object))
    }

    async fn put_and_forget(&self, object: StoreObject) {
        self.inner.apply(&object);
    }

    async fn put_objects_and_forget(&self, _shard: Option<ShardIndex>, objects: Vec<StoreObject>) {
        // order within the batch is preserved per destination
        for object in objects {
            self.inner.apply(&object);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use wallet_core::keys;
    use wallet_core::OperationKind;

    #[tokio::test]
    async fn test_put_get_versions() {
        let store = MemoryCluster::single_node().client(0).unwrap();
        assert!(store.get("/wallet/1").await.unwrap().is_none());

        let v1 = store
            .put(StoreObject::new("/wallet/1", Bytes::from_static(b"a")))
            .await
            .unwrap();
        let v2 = store
            .put(StoreObject::new("/wallet/1", Bytes::from_static(b"b")))
            .await
            .unwrap();
        assert!(v2 > v1);

        let blob = store.get("/wallet/1").await.unwrap().unwrap();
        assert_eq!(blob.version, v2);
        assert_eq!(&blob.bytes[..], b"b");
    }

    #[tokio::test]
    async fn test_wallet_keys_group_by_wallet_id() {
        let cluster = MemoryCluster::new(vec![vec![0], vec![1]]);
        let store = cluster.client(0).unwrap();
        for wallet in 0..8u64 {
            let expected = (wallet % 2) as ShardIndex;
            assert_eq!(store.key_to_shard(&keys::wallet_key(wallet)), expected);
            assert_eq!(
                store.key_to_shard(&keys::delivery_key(OperationKind::Transfer, wallet)),
                expected
            );
        }
    }

    #[tokio::test]
    async fn test_deliveries_reach_only_owning_shard() {
        let cluster = MemoryCluster::new(vec![vec![0], vec![1]]);
        let store0 = cluster.client(0).unwrap();
        let store1 = cluster.client(1).unwrap();
        let mut feed0 = store0.subscribe();
        let mut feed1 = store1.subscribe();

        // wallet 3 is odd, owned by shard 1
        store0
            .put_and_forget(StoreObject::new(
                keys::delivery_key(OperationKind::Transfer, 3),
                Bytes::from_static(b"req"),
            ))
            .await;
        // wallet state puts never trigger
        store0
            .put_and_forget(StoreObject::new(
                keys::wallet_key(3),
                Bytes::from_static(b"bal"),
            ))
            .await;

        let delivered = feed1.recv().await.unwrap();
        assert_eq!(delivered.key, keys::delivery_key(OperationKind::Transfer, 3));
        assert!(feed0.try_recv().is_err());
        assert!(feed1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let cluster = MemoryCluster::single_node();
        let store = cluster.client(0).unwrap();
        let mut feed = store.subscribe();

        let objects = (0..4u64)
            .map(|i| {
                StoreObject::new(
                    keys::delivery_key(OperationKind::Forward, 2),
                    Bytes::from(i.to_le_bytes().to_vec()),
                )
            })
            .collect();
        store.put_objects_and_forget(Some(0), objects).await;

        for i in 0..4u64 {
            let delivered = feed.recv().await.unwrap();
            assert_eq!(&delivered.bytes[..], &i.to_le_bytes());
        }
    }

    #[test]
    fn test_unknown_node_rejected() {
        let cluster = MemoryCluster::single_node();
        assert!(cluster.client(9).is_err());
    }
}
