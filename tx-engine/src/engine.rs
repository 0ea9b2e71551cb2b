//! Per-partition transaction engine
//!
//! One engine task owns one wallet partition: its wallet cache, conflict
//! graph and transaction arena are touched by no one else. Operations
//! arrive through the engine's inbox (from the dispatcher, from sibling
//! engines taking the same-process shortcut, and ultimately from the
//! store's delivery feed) and are processed to completion one at a
//! time.
//!
//! The chain passes are driven by an explicit work list instead of
//! recursion: releasing one transaction can make a whole chain of
//! waiters runnable, and dependency chains grow with load.

use crate::cache::WalletCache;
use crate::conflict::ConflictGraph;
use crate::metrics::Metrics;
use crate::pipelines::{ChainWrite, PipelineHandles, TransactionWrite, WalletWrite};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use store_bus::{SharedStore, StoreObject, Topology};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use wallet_core::{
    keys, OperationKind, ServiceConfig, TransactionId, TransactionRecord, TransactionStatus,
    TransferRequest, WalletId,
};

/// Message accepted by an engine's inbox
#[derive(Debug)]
pub enum EngineMessage {
    /// An operation delivery for a wallet of this engine's partition
    Operation {
        /// Operation kind
        op: OperationKind,
        /// Target wallet
        wallet: WalletId,
        /// The request (status-only for commit/abort deliveries)
        request: Arc<TransferRequest>,
    },
    /// Stop the engine after the current operation
    Shutdown,
}

/// Senders to every engine inbox of this node
pub struct EngineRouter {
    senders: Vec<mpsc::UnboundedSender<EngineMessage>>,
}

impl EngineRouter {
    /// Build a router over the engines' inbox senders
    pub fn new(senders: Vec<mpsc::UnboundedSender<EngineMessage>>) -> Self {
        Self { senders }
    }

    /// Number of engines
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// Whether the router is empty
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Send a message to one engine's inbox
    pub fn send(&self, engine: usize, message: EngineMessage) {
        match self.senders.get(engine) {
            Some(sender) => {
                if sender.send(message).is_err() {
                    warn!(engine, "engine inbox closed, dropping message");
                }
            }
            None => error!(engine, "no such engine partition"),
        }
    }

    /// Ask every engine to stop
    pub fn shutdown_all(&self) {
        for sender in &self.senders {
            let _ = sender.send(EngineMessage::Shutdown);
        }
    }
}

/// Arena entry: the request plus its locally observed status
struct TxEntry {
    request: Arc<TransferRequest>,
    status: TransactionStatus,
}

/// Work-list item of the chain passes
enum Task {
    Run {
        txid: TransactionId,
        wallet: WalletId,
    },
    Commit {
        txid: TransactionId,
        wallet: WalletId,
    },
    Abort {
        txid: TransactionId,
        wallet: WalletId,
        adjust_virtual: bool,
    },
}

/// A per-partition transaction engine
pub struct Engine<S: SharedStore> {
    id: usize,
    config: Arc<ServiceConfig>,
    topology: Arc<Topology>,
    store: Arc<S>,
    router: Arc<EngineRouter>,
    pipelines: PipelineHandles,
    metrics: Arc<Metrics>,
    cache: WalletCache,
    graph: ConflictGraph,
    /// Transactions alive on this engine, keyed by id
    arena: HashMap<TransactionId, TxEntry>,
    /// Processed (transaction, wallet, operation) tuples. Outlives the
    /// arena entry so redeliveries after completion stay no-ops.
    /// TODO: garbage-collect once the store exposes a delivery horizon.
    handled: HashSet<(TransactionId, WalletId, OperationKind)>,
    tasks: VecDeque<Task>,
}

impl<S: SharedStore> Engine<S> {
    /// Create an engine for partition `id`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        config: Arc<ServiceConfig>,
        topology: Arc<Topology>,
        store: Arc<S>,
        router: Arc<EngineRouter>,
        pipelines: PipelineHandles,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            id,
            config,
            topology,
            store,
            router,
            pipelines,
            metrics,
            cache: WalletCache::default(),
            graph: ConflictGraph::new(),
            arena: HashMap::new(),
            handled: HashSet::new(),
            tasks: VecDeque::new(),
        }
    }

    /// Inbox loop; runs until shutdown or inbox closure
    pub async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<EngineMessage>) {
        info!(engine = self.id, "transaction engine started");
        while let Some(message) = inbox.recv().await {
            match message {
                EngineMessage::Operation { op, wallet, request } => {
                    if let Err(e) = self.handle_operation(op, wallet, request).await {
                        error!(engine = self.id, error = %e, "operation failed");
                    }
                }
                EngineMessage::Shutdown => break,
            }
        }
        info!(engine = self.id, "transaction engine stopped");
    }

    /// Process one operation delivery
    pub(crate) async fn handle_operation(
        &mut self,
        op: OperationKind,
        wallet: WalletId,
        request: Arc<TransferRequest>,
    ) -> crate::Result<()> {
        let txid = request.id;
        self.metrics.operations_total.inc();

        // stale status deliveries for unknown transactions drop first
        if matches!(op, OperationKind::Commit | OperationKind::Abort)
            && !self.arena.contains_key(&txid)
        {
            trace!(engine = self.id, tx = %txid, %op, "status for unknown transaction");
            return Ok(());
        }

        // the transport may redeliver
        if !self.handled.insert((txid, wallet, op)) {
            trace!(engine = self.id, tx = %txid, wallet, %op, "duplicate delivery");
            self.metrics.duplicates_total.inc();
            return Ok(());
        }

        // arena admission on first sight of new work
        if op.is_new() || op == OperationKind::Forward {
            self.arena.entry(txid).or_insert_with(|| TxEntry {
                request: Arc::clone(&request),
                status: TransactionStatus::Pending,
            });
        }

        // commit/abort deliveries carry status-only payloads; always act
        // on the arena's request
        let request = Arc::clone(&self.arena[&txid].request);
        if !request.visitation.contains(&wallet) {
            debug!(engine = self.id, tx = %txid, wallet, %op, "misrouted operation");
            return Ok(());
        }

        self.cache.ensure_resident(self.store.as_ref(), wallet).await?;

        match op {
            OperationKind::Mint
            | OperationKind::Transfer
            | OperationKind::Redeem
            | OperationKind::Forward => {
                let fast_path = self.config.enable_virtual_balance;
                let cache = &self.cache;
                let blocked = self
                    .graph
                    .enqueue(&request, wallet, |w, amount| {
                        fast_path && cache.virtual_covers(w, amount)
                    });
                if blocked {
                    self.metrics.conflicts_total.inc();
                } else if !self.graph.is_blocked(txid) {
                    self.tasks.push_back(Task::Run { txid, wallet });
                }
            }
            OperationKind::Commit => {
                self.tasks.push_back(Task::Commit { txid, wallet });
            }
            OperationKind::Abort => {
                self.tasks.push_back(Task::Abort {
                    txid,
                    wallet,
                    adjust_virtual: true,
                });
            }
        }

        self.drain_tasks().await;
        Ok(())
    }

    async fn drain_tasks(&mut self) {
        while let Some(task) = self.tasks.pop_front() {
            match task {
                Task::Run { txid, wallet } => self.run_transaction(txid, wallet).await,
                Task::Commit { txid, wallet } => self.apply_commit(txid, wallet).await,
                Task::Abort {
                    txid,
                    wallet,
                    adjust_virtual,
                } => self.apply_abort(txid, wallet, adjust_virtual).await,
            }
        }
    }

    /// Forward pass at one wallet: validate, reserve, advance or commit
    async fn run_transaction(&mut self, txid: TransactionId, wallet: WalletId) {
        let Some(entry) = self.arena.get_mut(&txid) else {
            warn!(engine = self.id, tx = %txid, "run of unknown transaction");
            return;
        };
        entry.status = TransactionStatus::Running;
        let request = Arc::clone(&entry.request);

        // a transaction fails exactly when a source wallet lacks funds
        let valid = match request.source_amount(wallet) {
            Some(amount) => self.cache.committed(wallet).unwrap_or(0) >= amount,
            None => true,
        };
        if !valid {
            debug!(engine = self.id, tx = %txid, wallet, "insufficient funds");
            // nothing was reserved at this wallet
            self.tasks.push_back(Task::Abort {
                txid,
                wallet,
                adjust_virtual: false,
            });
            return;
        }

        if let Some(amount) = request.source_amount(wallet) {
            self.cache.reserve(wallet, amount);
        }

        if request.last_wallet() == Some(wallet) {
            self.tasks.push_back(Task::Commit { txid, wallet });
        } else {
            self.send_forward(&request, wallet).await;
        }
    }

    /// Backward pass, commit side: apply deltas and propagate
    async fn apply_commit(&mut self, txid: TransactionId, wallet: WalletId) {
        let Some(entry) = self.arena.get_mut(&txid) else {
            warn!(engine = self.id, tx = %txid, "commit of unknown transaction");
            return;
        };
        entry.status = TransactionStatus::Commit;
        let request = Arc::clone(&entry.request);

        if let Some(amount) = request.destination_amount(wallet) {
            self.cache.credit(wallet, amount);
        }
        if let Some(amount) = request.source_amount(wallet) {
            // the reservation was taken when the transaction ran
            self.cache.debit(wallet, amount);
        }
        self.persist_wallet(wallet, txid).await;

        if request.first_wallet() == Some(wallet) {
            self.persist_transaction(&request, TransactionStatus::Commit).await;
        } else {
            self.send_status_backward(&request, wallet, TransactionStatus::Commit)
                .await;
        }

        self.finish_wallet(&request, wallet, TransactionStatus::Commit);
    }

    /// Backward pass, abort side: undo the reservation and propagate
    async fn apply_abort(&mut self, txid: TransactionId, wallet: WalletId, adjust_virtual: bool) {
        let Some(entry) = self.arena.get_mut(&txid) else {
            warn!(engine = self.id, tx = %txid, "abort of unknown transaction");
            return;
        };
        entry.status = TransactionStatus::Abort;
        let request = Arc::clone(&entry.request);

        if adjust_virtual {
            if let Some(amount) = request.source_amount(wallet) {
                self.cache.restore(wallet, amount);
            }
        }

        if request.first_wallet() == Some(wallet) {
            self.persist_transaction(&request, TransactionStatus::Abort).await;
        } else {
            self.send_status_backward(&request, wallet, TransactionStatus::Abort)
                .await;
        }

        self.finish_wallet(&request, wallet, TransactionStatus::Abort);
    }

    /// Dequeue one wallet; on full resolution release the transaction
    /// and queue every newly unblocked waiter
    fn finish_wallet(
        &mut self,
        request: &Arc<TransferRequest>,
        wallet: WalletId,
        status: TransactionStatus,
    ) {
        let txid = request.id;
        if !self.graph.dequeue(request, wallet) {
            return;
        }

        match status {
            TransactionStatus::Commit => self.metrics.commits_total.inc(),
            TransactionStatus::Abort => self.metrics.aborts_total.inc(),
            _ => {}
        }
        trace!(engine = self.id, tx = %txid, %status, "transaction resolved");

        self.arena.remove(&txid);
        for waiter in self.graph.release(txid) {
            match self.graph.first_pending_wallet(waiter) {
                Some(start) => self.tasks.push_back(Task::Run {
                    txid: waiter,
                    wallet: start,
                }),
                None => warn!(engine = self.id, tx = %waiter, "released waiter has no pending wallet"),
            }
        }
    }

    /// Advance the chain to the wallet after `wallet`
    async fn send_forward(&mut self, request: &Arc<TransferRequest>, wallet: WalletId) {
        let Some(next) = request.next_wallet(wallet) else {
            warn!(engine = self.id, tx = %request.id, wallet, "no next wallet in chain");
            return;
        };
        self.dispatch_hop(OperationKind::Forward, wallet, next, request)
            .await;
    }

    /// Send the terminal status to the wallet before `wallet`
    async fn send_status_backward(
        &mut self,
        request: &Arc<TransferRequest>,
        wallet: WalletId,
        status: TransactionStatus,
    ) {
        let Some(prev) = request.prev_wallet(wallet) else {
            warn!(engine = self.id, tx = %request.id, wallet, "no previous wallet in chain");
            return;
        };
        let op = if status == TransactionStatus::Commit {
            OperationKind::Commit
        } else {
            OperationKind::Abort
        };
        self.dispatch_hop(op, wallet, prev, request).await;
    }

    /// Route one chain hop.
    ///
    /// Same-shard targets take the in-process shortcut to the sibling
    /// engine when enabled. Otherwise only the chain owner of the
    /// current wallet acts: through the chaining pipeline when enabled,
    /// or as an immediate store write. Every other member stays silent;
    /// it observes the same chain state through the store's delivery.
    async fn dispatch_hop(
        &mut self,
        op: OperationKind,
        from_wallet: WalletId,
        to_wallet: WalletId,
        request: &Arc<TransferRequest>,
    ) {
        let probe = keys::delivery_key(OperationKind::Transfer, to_wallet);
        let target_shard = self.store.key_to_shard(&probe);

        if self.config.enable_cross_thread_communication
            && target_shard == self.topology.shard_index()
        {
            trace!(engine = self.id, tx = %request.id, to_wallet, %op, "direct sibling handoff");
            self.router.send(
                self.topology.engine_for(to_wallet),
                EngineMessage::Operation {
                    op,
                    wallet: to_wallet,
                    request: Arc::clone(request),
                },
            );
            return;
        }

        if !self.topology.is_chain_owner(from_wallet) {
            return;
        }

        if let Some(chaining) = &self.pipelines.chaining {
            chaining.push(
                target_shard,
                ChainWrite {
                    op,
                    wallet_id: to_wallet,
                    request: Arc::clone(request),
                },
            );
            return;
        }

        let payload = match op {
            OperationKind::Forward => bincode::serialize(request.as_ref()),
            _ => bincode::serialize(&TransferRequest::status_only(request.id)),
        };
        match payload {
            Ok(bytes) => {
                self.store
                    .put_and_forget(StoreObject::new(keys::delivery_key(op, to_wallet), bytes))
                    .await;
            }
            Err(e) => error!(engine = self.id, tx = %request.id, error = %e, "failed to encode hop"),
        }
    }

    /// Persist a wallet's committed balance, when this node owns it
    async fn persist_wallet(&mut self, wallet: WalletId, txid: TransactionId) {
        if !self.topology.is_persistence_owner(wallet) {
            return;
        }
        let balance = self.cache.committed(wallet).unwrap_or(0);

        if let Some(pipeline) = &self.pipelines.wallet {
            pipeline.push(
                0,
                WalletWrite {
                    wallet_id: wallet,
                    balance,
                    txid,
                },
            );
            return;
        }

        match bincode::serialize(&balance) {
            Ok(bytes) => {
                self.store
                    .put_and_forget(StoreObject::new(keys::wallet_key(wallet), bytes))
                    .await;
            }
            Err(e) => error!(engine = self.id, wallet, error = %e, "failed to encode balance"),
        }
    }

    /// Persist the transaction record; runs at the chain's first wallet
    async fn persist_transaction(&mut self, request: &Arc<TransferRequest>, status: TransactionStatus) {
        if !self.topology.is_persistence_owner(request.id.as_u64()) {
            return;
        }
        let key = keys::transaction_key(request.id);
        let shard = self.store.key_to_shard(&key);

        if let Some(pipeline) = &self.pipelines.tx {
            pipeline.push(
                shard,
                TransactionWrite {
                    request: Arc::clone(request),
                    status,
                },
            );
            return;
        }

        let record = TransactionRecord {
            request: (**request).clone(),
            status,
        };
        match bincode::serialize(&record) {
            Ok(bytes) => self.store.put_and_forget(StoreObject::new(key, bytes)).await,
            Err(e) => error!(engine = self.id, tx = %request.id, error = %e, "failed to encode record"),
        }
    }
}
