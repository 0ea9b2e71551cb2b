//! Shard-local responsibility rules
//!
//! Every member of a shard observes the same operation deliveries, so
//! per-wallet work must be assigned deterministically: the sorted member
//! list is indexed by the wallet (or another stable factor) to pick the
//! single node that drives a chain hop or persists a record. All other
//! members process the operation for their local state and stay silent.

use crate::store::SharedStore;
use crate::types::{NodeId, ShardIndex};
use wallet_core::WalletId;

/// Responsibility rules derived from this node's shard membership
#[derive(Debug, Clone)]
pub struct Topology {
    node_id: NodeId,
    shard_index: ShardIndex,
    members: Vec<NodeId>,
    num_engines: usize,
}

impl Topology {
    /// Build from the store's view of this node's shard
    pub fn from_store<S: SharedStore>(store: &S, num_engines: usize) -> crate::Result<Self> {
        let shard_index = store.my_shard();
        let mut members = store.shard_members(shard_index);
        members.sort_unstable();
        if members.is_empty() {
            return Err(crate::Error::Topology(format!(
                "shard {} has no members",
                shard_index
            )));
        }
        Ok(Self {
            node_id: store.node_id(),
            shard_index,
            members,
            num_engines: num_engines.max(1),
        })
    }

    /// This node's id
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The shard this node serves
    pub fn shard_index(&self) -> ShardIndex {
        self.shard_index
    }

    /// Engine partition owning a wallet on this node
    pub fn engine_for(&self, wallet: WalletId) -> usize {
        (wallet % self.num_engines as u64) as usize
    }

    /// Whether this node drives chain hops out of `wallet`
    pub fn is_chain_owner(&self, wallet: WalletId) -> bool {
        self.members[(wallet % self.members.len() as u64) as usize] == self.node_id
    }

    /// Whether this node persists records keyed by `factor`
    pub fn is_persistence_owner(&self, factor: u64) -> bool {
        self.members[(factor % self.members.len() as u64) as usize] == self.node_id
    }

    /// Whether this node is the lead (lowest-id) member of its shard
    pub fn is_lead(&self) -> bool {
        self.members[0] == self.node_id
    }
}
