//! Service wiring and delivery routing
//!
//! [`TransactionService`] owns the node-local runtime: it spawns the
//! optional persistence pipelines, then the engine tasks (inboxes are
//! created first so every engine can reach its siblings through the
//! shared router), and tears everything down in the reverse dependency
//! order: engines, then chaining, then wallet persistence, then
//! transaction persistence.
//!
//! [`ServiceHandle`] is the cheap, cloneable ingress: it parses delivery
//! keys coming out of the store's trigger feed and routes them to the
//! engine owning the wallet partition.

use crate::engine::{Engine, EngineMessage, EngineRouter};
use crate::metrics::Metrics;
use crate::pipelines::{
    ChainingSink, PipelineHandles, TransactionPersistenceSink, WalletPersistenceSink,
};
use crate::{batcher, Error, Result};
use std::sync::Arc;
use store_bus::{SharedStore, StoreObject, Topology};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};
use wallet_core::{keys, ServiceConfig, TransferRequest};

/// Join handles of the optional pipelines
#[derive(Default)]
struct PipelineJoins {
    chaining: Option<JoinHandle<()>>,
    wallet: Option<JoinHandle<()>>,
    tx: Option<JoinHandle<()>>,
}

/// Node-local transaction service
pub struct TransactionService<S: SharedStore> {
    handle: ServiceHandle<S>,
    engines: Vec<JoinHandle<()>>,
    pipeline_joins: PipelineJoins,
}

impl<S: SharedStore> TransactionService<S> {
    /// Spawn pipelines and engines for this node
    pub fn start(store: Arc<S>, config: ServiceConfig) -> Result<Self> {
        let config = Arc::new(config);
        let topology = Arc::new(Topology::from_store(store.as_ref(), config.num_threads)?);
        let metrics = Arc::new(Metrics::new()?);

        let mut pipelines = PipelineHandles::default();
        let mut pipeline_joins = PipelineJoins::default();

        if config.enable_tx_persistence_thread {
            let (handle, join) = batcher::spawn(
                "tx-persistence",
                config.tx_persistence.clone(),
                TransactionPersistenceSink::new(Arc::clone(&store), Arc::clone(&metrics)),
            );
            pipelines.tx = Some(handle);
            pipeline_joins.tx = Some(join);
        }
        if config.enable_wallet_persistence_thread {
            let (handle, join) = batcher::spawn(
                "wallet-persistence",
                config.wallet_persistence.clone(),
                WalletPersistenceSink::new(Arc::clone(&store), Arc::clone(&metrics)),
            );
            pipelines.wallet = Some(handle);
            pipeline_joins.wallet = Some(join);
        }
        if config.enable_chaining_thread {
            let (handle, join) = batcher::spawn(
                "chaining",
                config.chaining.clone(),
                ChainingSink::new(Arc::clone(&store), Arc::clone(&metrics)),
            );
            pipelines.chaining = Some(handle);
            pipeline_joins.chaining = Some(join);
        }

        // inboxes before engines, so the router can reach every sibling
        let mut senders = Vec::with_capacity(config.num_threads);
        let mut receivers = Vec::with_capacity(config.num_threads);
        for _ in 0..config.num_threads.max(1) {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            receivers.push(rx);
        }
        let router = Arc::new(EngineRouter::new(senders));

        let engines = receivers
            .into_iter()
            .enumerate()
            .map(|(id, inbox)| {
                let engine = Engine::new(
                    id,
                    Arc::clone(&config),
                    Arc::clone(&topology),
                    Arc::clone(&store),
                    Arc::clone(&router),
                    pipelines.clone(),
                    Arc::clone(&metrics),
                );
                tokio::spawn(engine.run(inbox))
            })
            .collect();

        info!(
            node = topology.node_id(),
            shard = topology.shard_index(),
            engines = config.num_threads,
            "transaction service started"
        );

        Ok(Self {
            handle: ServiceHandle {
                config,
                topology,
                store,
                router,
                metrics,
            },
            engines,
            pipeline_joins,
        })
    }

    /// Ingress handle for delivery routing
    pub fn handle(&self) -> ServiceHandle<S> {
        self.handle.clone()
    }

    /// Metrics of this node
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.handle.metrics)
    }

    /// Stop engines, then drain and join each pipeline
    pub async fn shutdown(mut self) {
        self.handle.router.shutdown_all();
        for engine in self.engines.drain(..) {
            let _ = engine.await;
        }
        // engines held the last pipeline senders; consumers now drain
        if let Some(join) = self.pipeline_joins.chaining.take() {
            let _ = join.await;
        }
        if let Some(join) = self.pipeline_joins.wallet.take() {
            let _ = join.await;
        }
        if let Some(join) = self.pipeline_joins.tx.take() {
            let _ = join.await;
        }
        info!("transaction service stopped");
    }
}

/// Cloneable ingress to a running [`TransactionService`]
pub struct ServiceHandle<S> {
    config: Arc<ServiceConfig>,
    topology: Arc<Topology>,
    store: Arc<S>,
    router: Arc<EngineRouter>,
    metrics: Arc<Metrics>,
}

impl<S> Clone for ServiceHandle<S> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            topology: Arc::clone(&self.topology),
            store: Arc::clone(&self.store),
            router: Arc::clone(&self.router),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<S: SharedStore> ServiceHandle<S> {
    /// Route one store delivery to its engine.
    ///
    /// `/init` publishes the effective configuration instead (lead shard
    /// member only).
    pub async fn handle_delivery(&self, key: &str, payload: &[u8]) -> Result<()> {
        if key == keys::INIT_KEY {
            return self.publish_config().await;
        }

        let (op, wallet) = keys::parse_delivery(key)
            .ok_or_else(|| Error::Delivery(format!("not an operation key: {}", key)))?;
        let request: TransferRequest = bincode::deserialize(payload)?;
        trace!(%op, wallet, tx = %request.id, "delivery");

        self.router.send(
            self.topology.engine_for(wallet),
            EngineMessage::Operation {
                op,
                wallet,
                request: Arc::new(request),
            },
        );
        Ok(())
    }

    /// Consume a store delivery feed until it closes
    pub fn serve(self, mut feed: mpsc::UnboundedReceiver<StoreObject>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(object) = feed.recv().await {
                if let Err(e) = self.handle_delivery(&object.key, &object.bytes).await {
                    warn!(key = %object.key, error = %e, "dropped delivery");
                }
            }
        })
    }

    /// Write the effective configuration to its well-known key
    async fn publish_config(&self) -> Result<()> {
        if !self.topology.is_lead() {
            return Ok(());
        }
        let bytes = bincode::serialize(self.config.as_ref())?;
        self.store
            .put_and_forget(StoreObject::new(keys::CONFIG_KEY, bytes))
            .await;
        info!("configuration published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use store_bus::MemoryCluster;
    use wallet_core::{CoinValue, TransactionId};

    async fn stored_balance<S: SharedStore>(store: &S, wallet: u64) -> Option<CoinValue> {
        let blob = store.get(&keys::wallet_key(wallet)).await.unwrap()?;
        Some(bincode::deserialize(&blob.bytes).unwrap())
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let store = Arc::new(MemoryCluster::single_node().client(0).unwrap());
        let mut config = ServiceConfig::default();
        config.num_threads = 2;
        config.enable_wallet_persistence_thread = true;
        config.enable_tx_persistence_thread = true;
        config.enable_chaining_thread = true;

        let service = TransactionService::start(store, config).unwrap();
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_delivery_routing_end_to_end() {
        let store = Arc::new(MemoryCluster::single_node().client(0).unwrap());
        let service = TransactionService::start(Arc::clone(&store), ServiceConfig::default()).unwrap();
        let handle = service.handle();

        let request = TransferRequest::mint(TransactionId::new(0, 1), 5, 100);
        let payload = bincode::serialize(&request).unwrap();
        handle
            .handle_delivery(&keys::delivery_key(wallet_core::OperationKind::Mint, 5), &payload)
            .await
            .unwrap();

        for _ in 0..100 {
            if stored_balance(store.as_ref(), 5).await == Some(100) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(stored_balance(store.as_ref(), 5).await, Some(100));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejects_non_delivery_keys() {
        let store = Arc::new(MemoryCluster::single_node().client(0).unwrap());
        let service = TransactionService::start(Arc::clone(&store), ServiceConfig::default()).unwrap();
        let handle = service.handle();

        let err = handle.handle_delivery("/wallet/5", b"junk").await;
        assert!(matches!(err, Err(Error::Delivery(_))));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_init_publishes_config_on_lead() {
        let store = Arc::new(MemoryCluster::single_node().client(0).unwrap());
        let mut config = ServiceConfig::default();
        config.enable_virtual_balance = true;
        let service = TransactionService::start(Arc::clone(&store), config).unwrap();

        service.handle().handle_delivery(keys::INIT_KEY, b"").await.unwrap();

        let blob = store.get(keys::CONFIG_KEY).await.unwrap().unwrap();
        let published: ServiceConfig = bincode::deserialize(&blob.bytes).unwrap();
        assert!(published.enable_virtual_balance);
        service.shutdown().await;
    }
}
