//! Core types for the transaction rail
//!
//! All wire and persisted types are serde-derived and serialized with
//! bincode. Wallet and coin values are plain unsigned integers; the
//! transaction id packs the originating node into its high bits so ids
//! are globally unique and totally ordered without coordination.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Wallet identifier
pub type WalletId = u64;

/// Coin amount (smallest indivisible unit)
pub type CoinValue = u64;

/// Globally unique transaction identifier.
///
/// High 16 bits: originating node id. Low 48 bits: per-node monotonic
/// counter. The packing makes ids totally ordered per node and disjoint
/// across nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    const COUNTER_BITS: u32 = 48;
    const COUNTER_MASK: u64 = (1 << Self::COUNTER_BITS) - 1;

    /// Compose an id from the originating node and its local counter
    pub fn new(node_id: u32, counter: u64) -> Self {
        Self(((node_id as u64) << Self::COUNTER_BITS) | (counter & Self::COUNTER_MASK))
    }

    /// Reconstruct from the raw packed value
    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw packed value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Originating node id
    pub fn node(&self) -> u32 {
        (self.0 >> Self::COUNTER_BITS) as u32
    }

    /// Per-node counter component
    pub fn counter(&self) -> u64 {
        self.0 & Self::COUNTER_MASK
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Registered, not yet running
    Pending = 1,
    /// Chain pass in progress
    Running = 2,
    /// Committed (terminal)
    Commit = 3,
    /// Aborted (terminal)
    Abort = 4,
    /// No durable record observed yet
    Unknown = 5,
}

impl TransactionStatus {
    /// Whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Commit | TransactionStatus::Abort)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Running => "running",
            TransactionStatus::Commit => "commit",
            TransactionStatus::Abort => "abort",
            TransactionStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Kind of an operation delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// New pure-credit transaction
    Mint,
    /// New wallet-to-wallet transaction
    Transfer,
    /// New pure-debit transaction
    Redeem,
    /// Chain hop to the next wallet
    Forward,
    /// Backward commit status
    Commit,
    /// Backward abort status
    Abort,
}

impl OperationKind {
    /// Whether this kind introduces a transaction (mint/transfer/redeem)
    pub fn is_new(&self) -> bool {
        matches!(
            self,
            OperationKind::Mint | OperationKind::Transfer | OperationKind::Redeem
        )
    }

    /// Key segment for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Mint => "mint",
            OperationKind::Transfer => "transfer",
            OperationKind::Redeem => "redeem",
            OperationKind::Forward => "forward",
            OperationKind::Commit => "commit",
            OperationKind::Abort => "abort",
        }
    }

    /// Parse a key segment
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mint" => Some(OperationKind::Mint),
            "transfer" => Some(OperationKind::Transfer),
            "redeem" => Some(OperationKind::Redeem),
            "forward" => Some(OperationKind::Forward),
            "commit" => Some(OperationKind::Commit),
            "abort" => Some(OperationKind::Abort),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable transfer request
///
/// The visitation order fixes the direction of the chain protocol: the
/// forward run pass walks it front to back, the backward status pass
/// walks it back to front. Backward status deliveries carry a
/// status-only request (id, empty maps) built with [`status_only`].
///
/// [`status_only`]: TransferRequest::status_only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Transaction id
    pub id: TransactionId,
    /// Debited wallets and amounts
    pub sources: HashMap<WalletId, CoinValue>,
    /// Credited wallets and amounts
    pub destinations: HashMap<WalletId, CoinValue>,
    /// Distinct wallets in chain order
    pub visitation: Vec<WalletId>,
}

impl TransferRequest {
    /// Pure credit: no sources, one destination
    pub fn mint(id: TransactionId, wallet: WalletId, value: CoinValue) -> Self {
        Self {
            id,
            sources: HashMap::new(),
            destinations: HashMap::from([(wallet, value)]),
            visitation: vec![wallet],
        }
    }

    /// Pure debit: one source, no destinations
    pub fn redeem(id: TransactionId, wallet: WalletId, value: CoinValue) -> Self {
        Self {
            id,
            sources: HashMap::from([(wallet, value)]),
            destinations: HashMap::new(),
            visitation: vec![wallet],
        }
    }

    /// Wallet-to-wallet transfer.
    ///
    /// Rejected here, before entering the protocol, when either side is
    /// empty or value is not conserved. The visitation order is sources
    /// then destinations (sources only under `source_only`), each group
    /// ordered by `(shard, wallet id)` so every node derives the same
    /// chain direction.
    pub fn transfer<F>(
        id: TransactionId,
        sources: HashMap<WalletId, CoinValue>,
        destinations: HashMap<WalletId, CoinValue>,
        source_only: bool,
        shard_of: F,
    ) -> Result<Self>
    where
        F: Fn(WalletId) -> u32,
    {
        if sources.is_empty() || destinations.is_empty() {
            return Err(Error::Validation("empty transfer".to_string()));
        }

        let debit: u128 = sources.values().map(|v| *v as u128).sum();
        let credit: u128 = destinations.values().map(|v| *v as u128).sum();
        if debit != credit {
            return Err(Error::Validation(format!(
                "value not conserved: sources {} != destinations {}",
                debit, credit
            )));
        }

        let mut visitation = ordered_wallets(&sources, &shard_of);
        if !source_only {
            for wallet in ordered_wallets(&destinations, &shard_of) {
                if !visitation.contains(&wallet) {
                    visitation.push(wallet);
                }
            }
        }

        Ok(Self {
            id,
            sources,
            destinations,
            visitation,
        })
    }

    /// Status-only request used as the payload of backward commit/abort
    /// deliveries
    pub fn status_only(id: TransactionId) -> Self {
        Self {
            id,
            sources: HashMap::new(),
            destinations: HashMap::new(),
            visitation: Vec::new(),
        }
    }

    /// Amount debited from `wallet`, if it is a source
    pub fn source_amount(&self, wallet: WalletId) -> Option<CoinValue> {
        self.sources.get(&wallet).copied()
    }

    /// Amount credited to `wallet`, if it is a destination
    pub fn destination_amount(&self, wallet: WalletId) -> Option<CoinValue> {
        self.destinations.get(&wallet).copied()
    }

    /// First wallet of the chain
    pub fn first_wallet(&self) -> Option<WalletId> {
        self.visitation.first().copied()
    }

    /// Last wallet of the chain
    pub fn last_wallet(&self) -> Option<WalletId> {
        self.visitation.last().copied()
    }

    /// Wallet after `wallet` in chain order
    pub fn next_wallet(&self, wallet: WalletId) -> Option<WalletId> {
        let pos = self.visitation.iter().position(|w| *w == wallet)?;
        self.visitation.get(pos + 1).copied()
    }

    /// Wallet before `wallet` in chain order
    pub fn prev_wallet(&self, wallet: WalletId) -> Option<WalletId> {
        let pos = self.visitation.iter().position(|w| *w == wallet)?;
        pos.checked_sub(1).map(|p| self.visitation[p])
    }
}

/// Canonical ordering within one group of a visitation order
fn ordered_wallets<F>(group: &HashMap<WalletId, CoinValue>, shard_of: &F) -> Vec<WalletId>
where
    F: Fn(WalletId) -> u32,
{
    let mut wallets: Vec<WalletId> = group.keys().copied().collect();
    wallets.sort_by_key(|w| (shard_of(*w), *w));
    wallets
}

/// Durable transaction record: the request plus its terminal status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// The original request
    pub request: TransferRequest,
    /// Final status (Commit or Abort)
    pub status: TransactionStatus,
}
