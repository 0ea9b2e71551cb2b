//! Client-facing ledger operations
//!
//! Thin handle over the store: submissions are validated locally, given
//! a node-scoped transaction id, and written to the operation key of the
//! chain's first wallet; the store's trigger mechanism takes it from
//! there. Reads decode the durably persisted state: a status query
//! returns [`TransactionStatus::Unknown`] until the transaction record
//! has been observed, so callers can poll indefinitely.

use crate::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use store_bus::{SharedStore, StoreObject};
use tracing::trace;
use wallet_core::{
    keys, CoinValue, OperationKind, ServiceConfig, TransactionId, TransactionRecord,
    TransactionStatus, TransferRequest, WalletId,
};

/// Client handle to the rail
pub struct LedgerClient<S> {
    store: Arc<S>,
    config: ServiceConfig,
    node_id: u32,
    counter: AtomicU64,
}

impl<S: SharedStore> LedgerClient<S> {
    /// Create a client with an explicit configuration
    pub fn new(store: Arc<S>, config: ServiceConfig) -> Self {
        let node_id = store.node_id();
        Self {
            store,
            config,
            node_id,
            counter: AtomicU64::new(0),
        }
    }

    /// Create a client, reading the service configuration from its
    /// well-known key (service defaults when absent)
    pub async fn connect(store: Arc<S>) -> Result<Self> {
        let config = match store.get(keys::CONFIG_KEY).await? {
            Some(blob) => bincode::deserialize(&blob.bytes)?,
            None => ServiceConfig::default(),
        };
        Ok(Self::new(store, config))
    }

    fn next_id(&self) -> TransactionId {
        TransactionId::new(self.node_id, self.counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Create coins in a wallet
    pub async fn mint(&self, wallet: WalletId, value: CoinValue) -> Result<TransactionId> {
        let request = TransferRequest::mint(self.next_id(), wallet, value);
        self.submit(OperationKind::Mint, wallet, &request).await?;
        Ok(request.id)
    }

    /// Destroy coins in a wallet
    pub async fn redeem(&self, wallet: WalletId, value: CoinValue) -> Result<TransactionId> {
        let request = TransferRequest::redeem(self.next_id(), wallet, value);
        self.submit(OperationKind::Redeem, wallet, &request).await?;
        Ok(request.id)
    }

    /// Move value between wallet sets.
    ///
    /// Rejected synchronously when empty or when value is not conserved.
    pub async fn transfer(
        &self,
        sources: HashMap<WalletId, CoinValue>,
        destinations: HashMap<WalletId, CoinValue>,
    ) -> Result<TransactionId> {
        let request = TransferRequest::transfer(
            self.next_id(),
            sources,
            destinations,
            self.config.enable_source_only_conflicts,
            |wallet| {
                self.store
                    .key_to_shard(&keys::delivery_key(OperationKind::Transfer, wallet))
            },
        )?;
        let first = request.first_wallet().ok_or_else(|| {
            wallet_core::Error::Validation("transfer visits no wallet".to_string())
        })?;
        self.submit(OperationKind::Transfer, first, &request).await?;
        Ok(request.id)
    }

    /// Committed balance of a wallet (0 when never persisted)
    pub async fn get_wallet(&self, wallet: WalletId) -> Result<CoinValue> {
        Ok(match self.store.get(&keys::wallet_key(wallet)).await? {
            Some(blob) => bincode::deserialize(&blob.bytes)?,
            None => 0,
        })
    }

    /// Status of a transaction, `Unknown` until durably recorded
    pub async fn get_status(&self, txid: TransactionId) -> Result<TransactionStatus> {
        Ok(match self.store.get(&keys::transaction_key(txid)).await? {
            Some(blob) => {
                let record: TransactionRecord = bincode::deserialize(&blob.bytes)?;
                record.status
            }
            None => TransactionStatus::Unknown,
        })
    }

    async fn submit(
        &self,
        op: OperationKind,
        wallet: WalletId,
        request: &TransferRequest,
    ) -> Result<()> {
        trace!(%op, wallet, tx = %request.id, "submitting");
        let bytes = bincode::serialize(request)?;
        self.store
            .put_and_forget(StoreObject::new(keys::delivery_key(op, wallet), bytes))
            .await;
        Ok(())
    }
}
