//! Pending-transaction conflict graph
//!
//! Each engine tracks, per wallet, the pending transactions touching it,
//! and between transactions the "must wait for" edges that serialize
//! conflicting transfers. Edges only ever point from a later-enqueued
//! transaction to earlier ones, so the graph is a DAG and every
//! termination strictly shrinks it: no deadlock, no polling.
//!
//! A conflict is an overlap between the *sources* of an incoming
//! transaction and any wallet a pending transaction is registered under
//! (its sources and destinations). The asymmetry is deliberate: a
//! transaction overlapping an earlier one only as a destination is never
//! itself blocked, but still blocks later source-overlapping arrivals.

use std::collections::{HashMap, HashSet};
use tracing::{trace, warn};
use wallet_core::{CoinValue, TransactionId, TransferRequest, WalletId};

/// Conflict graph owned by a single engine
#[derive(Debug, Default)]
pub struct ConflictGraph {
    /// Transactions currently pending on this engine
    pending: HashSet<TransactionId>,

    /// Per transaction: visited wallets not yet terminally resolved here
    pending_wallets: HashMap<TransactionId, Vec<WalletId>>,

    /// Per transaction: transactions waiting on it
    forward: HashMap<TransactionId, Vec<TransactionId>>,

    /// Per transaction: transactions it waits on
    backward: HashMap<TransactionId, Vec<TransactionId>>,

    /// Per wallet: pending transactions registered against it
    wallet_index: HashMap<WalletId, HashSet<TransactionId>>,
}

impl ConflictGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transaction-wallet pair.
    ///
    /// Conflict detection runs once, when the transaction is first seen;
    /// later wallets of the same transaction only extend its pending
    /// list. `liquid(wallet, amount)` is the virtual-balance fast path:
    /// when it returns true for a contended source wallet, that wallet
    /// is not treated as a conflict. Returns whether the transaction
    /// entered the graph blocked.
    pub fn enqueue<F>(&mut self, request: &TransferRequest, wallet: WalletId, liquid: F) -> bool
    where
        F: Fn(WalletId, CoinValue) -> bool,
    {
        let txid = request.id;
        self.pending_wallets.entry(txid).or_default().push(wallet);

        if !self.pending.insert(txid) {
            return false;
        }

        // a pure credit cannot conflict
        if request.sources.is_empty() {
            return false;
        }

        let mut conflicted = false;
        let mut recorded: HashSet<TransactionId> = HashSet::new();
        for (&source, &amount) in &request.sources {
            let holders = match self.wallet_index.get(&source) {
                Some(holders) if !holders.is_empty() => holders,
                _ => continue,
            };
            if liquid(source, amount) {
                trace!(tx = %txid, wallet = source, "contended source covered by virtual balance");
                continue;
            }

            for &earlier in holders {
                if recorded.insert(earlier) {
                    self.forward.entry(earlier).or_default().push(txid);
                    self.backward.entry(txid).or_default().push(earlier);
                }
            }

            // one conflicting wallet is enough to block
            conflicted = true;
            break;
        }

        if conflicted {
            trace!(tx = %txid, waits_on = recorded.len(), "transaction blocked");
        }

        // register under every touched wallet so later arrivals see it
        for &touched in request.sources.keys().chain(request.destinations.keys()) {
            self.wallet_index.entry(touched).or_default().insert(txid);
        }

        conflicted
    }

    /// Whether a transaction still has unresolved backward conflicts
    pub fn is_blocked(&self, txid: TransactionId) -> bool {
        self.backward.get(&txid).is_some_and(|edges| !edges.is_empty())
    }

    /// Resolve a transaction-wallet pair.
    ///
    /// Returns true only when this was the transaction's last pending
    /// wallet; the transaction is then dropped from the per-wallet index.
    pub fn dequeue(&mut self, request: &TransferRequest, wallet: WalletId) -> bool {
        let txid = request.id;
        let Some(wallets) = self.pending_wallets.get_mut(&txid) else {
            warn!(tx = %txid, wallet, "dequeue of unknown transaction");
            return false;
        };
        match wallets.iter().position(|w| *w == wallet) {
            Some(pos) => {
                wallets.remove(pos);
            }
            None => warn!(tx = %txid, wallet, "dequeue of unqueued wallet"),
        }
        if !wallets.is_empty() {
            return false;
        }

        self.pending_wallets.remove(&txid);
        self.pending.remove(&txid);
        for &touched in request.sources.keys().chain(request.destinations.keys()) {
            let emptied = match self.wallet_index.get_mut(&touched) {
                Some(holders) => {
                    holders.remove(&txid);
                    holders.is_empty()
                }
                None => false,
            };
            if emptied {
                self.wallet_index.remove(&touched);
            }
        }
        true
    }

    /// Drop a fully resolved transaction from the edge sets.
    ///
    /// Every forward neighbour loses its backward edge; neighbours whose
    /// backward set empties are returned, ready to run.
    pub fn release(&mut self, txid: TransactionId) -> Vec<TransactionId> {
        self.backward.remove(&txid);

        let mut runnable = Vec::new();
        if let Some(waiters) = self.forward.remove(&txid) {
            for waiter in waiters {
                let emptied = match self.backward.get_mut(&waiter) {
                    Some(edges) => {
                        edges.retain(|t| *t != txid);
                        edges.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    self.backward.remove(&waiter);
                    runnable.push(waiter);
                }
            }
        }
        runnable
    }

    /// First wallet a transaction is still pending on
    pub fn first_pending_wallet(&self, txid: TransactionId) -> Option<WalletId> {
        self.pending_wallets
            .get(&txid)
            .and_then(|wallets| wallets.first().copied())
    }

    /// Number of pending transactions
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use wallet_core::TransactionId as Tx;

    fn transfer(id: u64, sources: &[(WalletId, CoinValue)], dests: &[(WalletId, CoinValue)]) -> TransferRequest {
        TransferRequest {
            id: Tx::from_u64(id),
            sources: sources.iter().copied().collect::<Map<_, _>>(),
            destinations: dests.iter().copied().collect::<Map<_, _>>(),
            visitation: sources
                .iter()
                .map(|(w, _)| *w)
                .chain(dests.iter().map(|(w, _)| *w))
                .collect(),
        }
    }

    fn no_fast_path(_: WalletId, _: CoinValue) -> bool {
        false
    }

    #[test]
    fn test_first_transaction_unblocked() {
        let mut graph = ConflictGraph::new();
        let t1 = transfer(1, &[(1, 10)], &[(2, 10)]);
        assert!(!graph.enqueue(&t1, 1, no_fast_path));
        assert!(!graph.is_blocked(t1.id));
    }

    #[test]
    fn test_shared_source_blocks_second() {
        let mut graph = ConflictGraph::new();
        let t1 = transfer(1, &[(1, 10)], &[(2, 10)]);
        let t2 = transfer(2, &[(1, 10)], &[(3, 10)]);
        graph.enqueue(&t1, 1, no_fast_path);
        assert!(graph.enqueue(&t2, 1, no_fast_path));
        assert!(graph.is_blocked(t2.id));
        assert!(!graph.is_blocked(t1.id));
    }

    #[test]
    fn test_destination_overlap_does_not_block_but_registers() {
        let mut graph = ConflictGraph::new();
        let t1 = transfer(1, &[(1, 10)], &[(2, 10)]);
        // t2 only touches wallet 2 as its destination: not blocked
        let t2 = transfer(2, &[(3, 5)], &[(2, 5)]);
        // t3 sources wallet 2, which both t1 and t2 are registered under
        let t3 = transfer(3, &[(2, 5)], &[(4, 5)]);

        graph.enqueue(&t1, 1, no_fast_path);
        assert!(!graph.enqueue(&t2, 3, no_fast_path));
        assert!(graph.enqueue(&t3, 2, no_fast_path));
        assert!(graph.is_blocked(t3.id));
    }

    #[test]
    fn test_pure_credit_never_conflicts() {
        let mut graph = ConflictGraph::new();
        let t1 = transfer(1, &[(1, 10)], &[(2, 10)]);
        let mint = transfer(2, &[], &[(1, 50)]);
        graph.enqueue(&t1, 1, no_fast_path);
        assert!(!graph.enqueue(&mint, 1, no_fast_path));
        assert!(!graph.is_blocked(mint.id));
    }

    #[test]
    fn test_release_unblocks_waiter() {
        let mut graph = ConflictGraph::new();
        let t1 = transfer(1, &[(1, 10)], &[(2, 10)]);
        let t2 = transfer(2, &[(1, 10)], &[(3, 10)]);
        graph.enqueue(&t1, 1, no_fast_path);
        graph.enqueue(&t1, 2, no_fast_path);
        graph.enqueue(&t2, 1, no_fast_path);

        assert!(!graph.dequeue(&t1, 1));
        assert!(graph.dequeue(&t1, 2));
        let runnable = graph.release(t1.id);
        assert_eq!(runnable, vec![t2.id]);
        assert!(!graph.is_blocked(t2.id));
        assert_eq!(graph.first_pending_wallet(t2.id), Some(1));
    }

    #[test]
    fn test_search_stops_at_first_conflicting_wallet() {
        let mut graph = ConflictGraph::new();
        let t1 = transfer(1, &[(1, 10)], &[(2, 10)]);
        let t2 = transfer(2, &[(3, 10)], &[(4, 10)]);
        // t3 sources both contended wallets, but edges are recorded for
        // the first conflicting wallet only
        let t3 = transfer(3, &[(1, 5), (3, 5)], &[(5, 10)]);

        graph.enqueue(&t1, 1, no_fast_path);
        graph.enqueue(&t2, 3, no_fast_path);
        graph.enqueue(&t3, 1, no_fast_path);
        assert!(graph.is_blocked(t3.id));

        // whichever single wallet produced the edges, releasing both
        // predecessors must free t3 exactly once
        let mut freed = Vec::new();
        graph.dequeue(&t1, 1);
        graph.dequeue(&t1, 2);
        freed.extend(graph.release(t1.id));
        graph.dequeue(&t2, 3);
        graph.dequeue(&t2, 4);
        freed.extend(graph.release(t2.id));
        assert_eq!(freed, vec![t3.id]);
        assert!(!graph.is_blocked(t3.id));
    }

    #[test]
    fn test_fast_path_skips_conflict() {
        let mut graph = ConflictGraph::new();
        let t1 = transfer(1, &[(1, 10)], &[(2, 10)]);
        let t2 = transfer(2, &[(1, 10)], &[(3, 10)]);
        graph.enqueue(&t1, 1, no_fast_path);
        // wallet 1 still has plenty of virtual balance
        assert!(!graph.enqueue(&t2, 1, |_, _| true));
        assert!(!graph.is_blocked(t2.id));
    }

    #[test]
    fn test_conflict_detection_runs_once_per_transaction() {
        let mut graph = ConflictGraph::new();
        let t1 = transfer(1, &[(1, 10)], &[(2, 10)]);
        graph.enqueue(&t1, 1, no_fast_path);
        // second wallet of the same transaction: no self-conflict
        assert!(!graph.enqueue(&t1, 2, no_fast_path));
        assert!(!graph.is_blocked(t1.id));
        assert_eq!(graph.pending_len(), 1);
    }

    #[test]
    fn test_dequeue_clears_wallet_index() {
        let mut graph = ConflictGraph::new();
        let t1 = transfer(1, &[(1, 10)], &[(2, 10)]);
        graph.enqueue(&t1, 1, no_fast_path);
        graph.enqueue(&t1, 2, no_fast_path);
        graph.dequeue(&t1, 1);
        graph.dequeue(&t1, 2);
        graph.release(t1.id);

        // a new source-overlapping transaction sees a clean index
        let t2 = transfer(2, &[(1, 10)], &[(3, 10)]);
        assert!(!graph.enqueue(&t2, 1, no_fast_path));
        assert!(!graph.is_blocked(t2.id));
    }
}
