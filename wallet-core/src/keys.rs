//! Store key layout
//!
//! Wallet state lives at `/wallet/{id}`, durable transaction records at
//! `/tx/{id}`, operation deliveries at `/{kind}/{wallet_id}` and the
//! effective service configuration at a well-known key. Keys carrying a
//! trailing wallet id are grouped by that id when the store maps keys to
//! shards, so every operation touching a wallet lands on the wallet's
//! shard.

use crate::types::{OperationKind, TransactionId, WalletId};

/// Well-known key holding the effective service configuration
pub const CONFIG_KEY: &str = "/config";

/// Delivery key that asks the lead shard member to publish the
/// configuration object
pub const INIT_KEY: &str = "/init";

/// Key of a wallet's durable balance
pub fn wallet_key(wallet: WalletId) -> String {
    format!("/wallet/{}", wallet)
}

/// Key of a transaction's durable record
pub fn transaction_key(txid: TransactionId) -> String {
    format!("/tx/{}", txid)
}

/// Delivery key for an operation targeting a wallet
pub fn delivery_key(kind: OperationKind, wallet: WalletId) -> String {
    format!("/{}/{}", kind.as_str(), wallet)
}

/// Parse a delivery key into its operation kind and wallet id.
///
/// Returns `None` for keys that are not operation deliveries (wallet
/// state, transaction records, configuration).
pub fn parse_delivery(key: &str) -> Option<(OperationKind, WalletId)> {
    let mut parts = key.strip_prefix('/')?.splitn(2, '/');
    let kind = OperationKind::parse(parts.next()?)?;
    let wallet = parts.next()?.parse().ok()?;
    Some((kind, wallet))
}

/// Extract the wallet id a key is scoped to, for shard grouping.
///
/// Matches wallet-state keys and operation-delivery keys; transaction
/// and configuration keys have no wallet scope.
pub fn wallet_of_key(key: &str) -> Option<WalletId> {
    let mut parts = key.strip_prefix('/')?.splitn(2, '/');
    let head = parts.next()?;
    if head != "wallet" && OperationKind::parse(head).is_none() {
        return None;
    }
    parts.next()?.parse().ok()
}
