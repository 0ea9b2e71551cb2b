//! Per-engine wallet cache
//!
//! Each engine caches the wallets of its partition for the process
//! lifetime (no eviction). A wallet enters the cache on first access,
//! populated from the store or zero. Two balances are tracked: the
//! committed balance, which moves only on commit, and the virtual
//! balance, which additionally carries the reservations of transactions
//! still in flight.

use store_bus::SharedStore;
use tracing::{error, trace};
use wallet_core::{keys, CoinValue, WalletId};

/// Cached state of one wallet
#[derive(Debug, Clone, Copy)]
pub struct WalletEntry {
    /// Balance as of the last applied commit
    pub committed: CoinValue,

    /// Committed balance adjusted by in-flight reservations
    pub virtual_balance: CoinValue,
}

/// Wallet cache owned by a single engine
#[derive(Debug, Default)]
pub struct WalletCache {
    entries: std::collections::HashMap<WalletId, WalletEntry>,
}

impl WalletCache {
    /// Fetch the wallet from the store on first access.
    ///
    /// Both balances initialize to the stored value, or zero when the
    /// wallet does not exist yet.
    pub async fn ensure_resident<S: SharedStore>(
        &mut self,
        store: &S,
        wallet: WalletId,
    ) -> crate::Result<()> {
        if self.entries.contains_key(&wallet) {
            return Ok(());
        }
        let committed: CoinValue = match store.get(&keys::wallet_key(wallet)).await? {
            Some(blob) => bincode::deserialize(&blob.bytes)?,
            None => 0,
        };
        trace!(wallet, committed, "wallet cached");
        self.entries.insert(
            wallet,
            WalletEntry {
                committed,
                virtual_balance: committed,
            },
        );
        Ok(())
    }

    /// Committed balance of a resident wallet
    pub fn committed(&self, wallet: WalletId) -> Option<CoinValue> {
        self.entries.get(&wallet).map(|e| e.committed)
    }

    /// Virtual balance of a resident wallet
    pub fn virtual_balance(&self, wallet: WalletId) -> Option<CoinValue> {
        self.entries.get(&wallet).map(|e| e.virtual_balance)
    }

    /// Whether a resident wallet's virtual balance covers `amount`.
    ///
    /// Non-resident wallets never qualify: the fast path only applies to
    /// wallets this engine already tracks.
    pub fn virtual_covers(&self, wallet: WalletId, amount: CoinValue) -> bool {
        self.entries
            .get(&wallet)
            .is_some_and(|e| e.virtual_balance >= amount)
    }

    /// Reserve funds: virtual balance drops by `amount`
    pub fn reserve(&mut self, wallet: WalletId, amount: CoinValue) {
        let Some(entry) = self.entries.get_mut(&wallet) else {
            error!(wallet, "reserve on non-resident wallet");
            return;
        };
        if amount > entry.virtual_balance {
            error!(
                wallet,
                amount, entry.virtual_balance, "reservation exceeds virtual balance"
            );
            entry.virtual_balance = 0;
        } else {
            entry.virtual_balance -= amount;
        }
    }

    /// Return a reservation: virtual balance rises by `amount`
    pub fn restore(&mut self, wallet: WalletId, amount: CoinValue) {
        let Some(entry) = self.entries.get_mut(&wallet) else {
            error!(wallet, "restore on non-resident wallet");
            return;
        };
        entry.virtual_balance = entry.virtual_balance.saturating_add(amount);
    }

    /// Apply a committed credit: both balances rise
    pub fn credit(&mut self, wallet: WalletId, amount: CoinValue) {
        let Some(entry) = self.entries.get_mut(&wallet) else {
            error!(wallet, "credit on non-resident wallet");
            return;
        };
        entry.committed = entry.committed.saturating_add(amount);
        entry.virtual_balance = entry.virtual_balance.saturating_add(amount);
    }

    /// Apply a committed debit.
    ///
    /// The virtual balance is untouched: the reservation was taken when
    /// the transaction ran. A debit exceeding the committed balance
    /// clamps to zero; conflict serialization makes that unreachable.
    pub fn debit(&mut self, wallet: WalletId, amount: CoinValue) {
        let Some(entry) = self.entries.get_mut(&wallet) else {
            error!(wallet, "debit on non-resident wallet");
            return;
        };
        if amount > entry.committed {
            error!(
                wallet,
                amount, entry.committed, "debit exceeds committed balance"
            );
            entry.committed = 0;
        } else {
            entry.committed -= amount;
        }
    }

    /// Number of resident wallets
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use store_bus::{MemoryCluster, StoreObject};

    #[tokio::test]
    async fn test_missing_wallet_defaults_to_zero() {
        let store = MemoryCluster::single_node().client(0).unwrap();
        let mut cache = WalletCache::default();
        cache.ensure_resident(&store, 7).await.unwrap();
        assert_eq!(cache.committed(7), Some(0));
        assert_eq!(cache.virtual_balance(7), Some(0));
    }

    #[tokio::test]
    async fn test_fetch_populates_both_balances() {
        let store = MemoryCluster::single_node().client(0).unwrap();
        store
            .put(StoreObject::new(
                keys::wallet_key(7),
                Bytes::from(bincode::serialize(&250u64).unwrap()),
            ))
            .await
            .unwrap();

        let mut cache = WalletCache::default();
        cache.ensure_resident(&store, 7).await.unwrap();
        assert_eq!(cache.committed(7), Some(250));
        assert_eq!(cache.virtual_balance(7), Some(250));
    }

    #[tokio::test]
    async fn test_reserve_and_commit_cycle() {
        let store = MemoryCluster::single_node().client(0).unwrap();
        let mut cache = WalletCache::default();
        cache.ensure_resident(&store, 1).await.unwrap();
        cache.credit(1, 100);

        cache.reserve(1, 30);
        assert_eq!(cache.committed(1), Some(100));
        assert_eq!(cache.virtual_balance(1), Some(70));

        cache.debit(1, 30);
        assert_eq!(cache.committed(1), Some(70));
        assert_eq!(cache.virtual_balance(1), Some(70));
    }

    #[tokio::test]
    async fn test_abort_restores_reservation() {
        let store = MemoryCluster::single_node().client(0).unwrap();
        let mut cache = WalletCache::default();
        cache.ensure_resident(&store, 1).await.unwrap();
        cache.credit(1, 50);

        cache.reserve(1, 20);
        assert_eq!(cache.virtual_balance(1), Some(30));
        cache.restore(1, 20);
        assert_eq!(cache.virtual_balance(1), Some(50));
        assert_eq!(cache.committed(1), Some(50));
    }

    #[tokio::test]
    async fn test_debit_clamps_at_zero() {
        let store = MemoryCluster::single_node().client(0).unwrap();
        let mut cache = WalletCache::default();
        cache.ensure_resident(&store, 1).await.unwrap();
        cache.credit(1, 10);
        cache.debit(1, 25);
        assert_eq!(cache.committed(1), Some(0));
    }

    #[test]
    fn test_fast_path_requires_residency() {
        let cache = WalletCache::default();
        assert!(!cache.virtual_covers(1, 0));
    }
}
