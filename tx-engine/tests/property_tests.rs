//! Property-based tests for protocol invariants
//!
//! Random single-source transfers over a small wallet set, driven
//! end-to-end through a node. Whatever interleaving the engines pick:
//! - every transaction reaches exactly one terminal status
//! - replaying the committed set explains every final balance exactly
//! - value is conserved: total supply equals total minted
//! - no committed balance ever dips below zero

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use store_bus::{MemoryCluster, MemoryStore};
use tx_engine::{LedgerClient, TransactionService};
use wallet_core::{ServiceConfig, TransactionStatus};

const WALLETS: u64 = 5;

#[derive(Debug, Clone)]
struct PlannedTransfer {
    source: u64,
    destination: u64,
    amount: u64,
}

fn transfer_strategy() -> impl Strategy<Value = PlannedTransfer> {
    (0..WALLETS, 1..WALLETS, 1u64..300).prop_map(|(source, offset, amount)| PlannedTransfer {
        source,
        destination: (source + offset) % WALLETS,
        amount,
    })
}

fn workload_strategy() -> impl Strategy<Value = (Vec<u64>, Vec<PlannedTransfer>, bool)> {
    (
        proptest::collection::vec(0u64..500, WALLETS as usize),
        proptest::collection::vec(transfer_strategy(), 1..10),
        any::<bool>(),
    )
}

async fn wait_terminal(
    client: &LedgerClient<MemoryStore>,
    txid: wallet_core::TransactionId,
) -> TransactionStatus {
    for _ in 0..600 {
        let status = client.get_status(txid).await.unwrap();
        if status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("transaction {} never reached a terminal status", txid);
}

async fn run_workload(
    initial: Vec<u64>,
    transfers: Vec<PlannedTransfer>,
    virtual_balance: bool,
) {
    let cluster = MemoryCluster::single_node();
    let store = Arc::new(cluster.client(0).unwrap());
    let feed = store.subscribe();

    let mut config = ServiceConfig::default();
    config.num_threads = 2;
    config.enable_virtual_balance = virtual_balance;
    let service = TransactionService::start(Arc::clone(&store), config.clone()).unwrap();
    service.handle().serve(feed);
    let client = LedgerClient::new(Arc::new(cluster.client(0).unwrap()), config);

    // seed balances and let the mints settle first
    let mut mints = Vec::new();
    for (wallet, &balance) in initial.iter().enumerate() {
        mints.push(client.mint(wallet as u64, balance).await.unwrap());
    }
    for mint in mints {
        assert_eq!(wait_terminal(&client, mint).await, TransactionStatus::Commit);
    }

    let mut submitted = Vec::new();
    for transfer in &transfers {
        let txid = client
            .transfer(
                HashMap::from([(transfer.source, transfer.amount)]),
                HashMap::from([(transfer.destination, transfer.amount)]),
            )
            .await
            .unwrap();
        submitted.push(txid);
    }

    // atomicity: exactly one terminal status each
    let mut statuses = Vec::new();
    for &txid in &submitted {
        statuses.push(wait_terminal(&client, txid).await);
    }

    // replaying the committed set must explain every balance
    let mut expected: Vec<i128> = initial.iter().map(|b| *b as i128).collect();
    for (transfer, status) in transfers.iter().zip(&statuses) {
        if *status == TransactionStatus::Commit {
            expected[transfer.source as usize] -= transfer.amount as i128;
            expected[transfer.destination as usize] += transfer.amount as i128;
        }
    }

    let mut observed_total: i128 = 0;
    for wallet in 0..WALLETS {
        // balances may land a moment after the status record
        let want = expected[wallet as usize];
        assert!(want >= 0, "committed balance of wallet {} went negative", wallet);
        let mut got = client.get_wallet(wallet).await.unwrap() as i128;
        for _ in 0..400 {
            if got == want {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            got = client.get_wallet(wallet).await.unwrap() as i128;
        }
        assert_eq!(got, want, "wallet {} diverged", wallet);
        observed_total += got;
    }

    // conservation: committed transfers move value, never create it
    let minted: i128 = initial.iter().map(|b| *b as i128).sum();
    assert_eq!(observed_total, minted);

    service.shutdown().await;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_conservation_and_atomicity((initial, transfers, virtual_balance) in workload_strategy()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(run_workload(initial, transfers, virtual_balance));
    }
}
