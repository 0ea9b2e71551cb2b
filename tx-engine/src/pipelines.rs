//! Persistence and chaining pipeline bindings
//!
//! Three [`BatchSink`] implementations bind the generic batcher to the
//! external store: wallet persistence (durable balance puts), transaction
//! persistence (durable request+status records) and chaining (forward /
//! commit / abort deliveries to the next shard). All three use
//! fire-and-forget batch writes; loss handling stays with the store.

use crate::batcher::{BatchSink, BatcherHandle};
use crate::metrics::Metrics;
use async_trait::async_trait;
use std::sync::Arc;
use store_bus::{ShardIndex, SharedStore, StoreObject};
use tracing::error;
use wallet_core::{
    keys, CoinValue, OperationKind, TransactionId, TransactionRecord, TransactionStatus,
    TransferRequest, WalletId,
};

/// A committed balance awaiting its durable put
#[derive(Debug)]
pub struct WalletWrite {
    /// Wallet to persist
    pub wallet_id: WalletId,
    /// Committed balance at enqueue time
    pub balance: CoinValue,
    /// Transaction that produced the balance
    pub txid: TransactionId,
}

/// A terminal transaction awaiting its durable record
#[derive(Debug)]
pub struct TransactionWrite {
    /// The original request
    pub request: Arc<TransferRequest>,
    /// Terminal status
    pub status: TransactionStatus,
}

/// A chain hop awaiting delivery to its target shard
#[derive(Debug)]
pub struct ChainWrite {
    /// Forward, Commit or Abort
    pub op: OperationKind,
    /// Target wallet of the hop
    pub wallet_id: WalletId,
    /// The request; commit/abort hops are reduced to status-only payloads
    pub request: Arc<TransferRequest>,
}

/// Producer handles of the optional pipelines
#[derive(Clone, Default)]
pub struct PipelineHandles {
    /// Wallet persistence, when enabled
    pub wallet: Option<BatcherHandle<WalletWrite>>,
    /// Transaction persistence, when enabled
    pub tx: Option<BatcherHandle<TransactionWrite>>,
    /// Chaining, when enabled
    pub chaining: Option<BatcherHandle<ChainWrite>>,
}

/// Durable balance puts
pub struct WalletPersistenceSink<S> {
    store: Arc<S>,
    metrics: Arc<Metrics>,
}

impl<S> WalletPersistenceSink<S> {
    /// Bind to a store client
    pub fn new(store: Arc<S>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }
}

#[async_trait]
impl<S: SharedStore> BatchSink<WalletWrite> for WalletPersistenceSink<S> {
    async fn flush(&mut self, _partition: ShardIndex, items: Vec<WalletWrite>) {
        let mut objects = Vec::with_capacity(items.len());
        for write in &items {
            match bincode::serialize(&write.balance) {
                Ok(bytes) => {
                    objects.push(StoreObject::new(keys::wallet_key(write.wallet_id), bytes));
                }
                Err(e) => {
                    error!(wallet = write.wallet_id, error = %e, "failed to encode balance");
                }
            }
        }
        self.metrics.wallet_batch_size.observe(objects.len() as f64);
        // each object routes by its own wallet key
        self.store.put_objects_and_forget(None, objects).await;
    }
}

/// Durable transaction records
pub struct TransactionPersistenceSink<S> {
    store: Arc<S>,
    metrics: Arc<Metrics>,
}

impl<S> TransactionPersistenceSink<S> {
    /// Bind to a store client
    pub fn new(store: Arc<S>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }
}

#[async_trait]
impl<S: SharedStore> BatchSink<TransactionWrite> for TransactionPersistenceSink<S> {
    async fn flush(&mut self, partition: ShardIndex, items: Vec<TransactionWrite>) {
        let mut objects = Vec::with_capacity(items.len());
        for write in &items {
            let record = TransactionRecord {
                request: (*write.request).clone(),
                status: write.status,
            };
            match bincode::serialize(&record) {
                Ok(bytes) => {
                    objects.push(StoreObject::new(keys::transaction_key(record.request.id), bytes));
                }
                Err(e) => {
                    error!(tx = %write.request.id, error = %e, "failed to encode record");
                }
            }
        }
        self.metrics.tx_batch_size.observe(objects.len() as f64);
        self.store.put_objects_and_forget(Some(partition), objects).await;
    }
}

/// Chain hop deliveries, batched per target shard
pub struct ChainingSink<S> {
    store: Arc<S>,
    metrics: Arc<Metrics>,
}

impl<S> ChainingSink<S> {
    /// Bind to a store client
    pub fn new(store: Arc<S>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }
}

#[async_trait]
impl<S: SharedStore> BatchSink<ChainWrite> for ChainingSink<S> {
    async fn flush(&mut self, partition: ShardIndex, items: Vec<ChainWrite>) {
        let mut objects = Vec::with_capacity(items.len());
        for write in &items {
            let payload = match write.op {
                OperationKind::Forward => bincode::serialize(write.request.as_ref()),
                _ => bincode::serialize(&TransferRequest::status_only(write.request.id)),
            };
            match payload {
                Ok(bytes) => {
                    objects.push(StoreObject::new(
                        keys::delivery_key(write.op, write.wallet_id),
                        bytes,
                    ));
                }
                Err(e) => {
                    error!(tx = %write.request.id, error = %e, "failed to encode chain hop");
                }
            }
        }
        self.metrics.chain_batch_size.observe(objects.len() as f64);
        self.store.put_objects_and_forget(Some(partition), objects).await;
    }
}
