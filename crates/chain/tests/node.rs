//! End-to-end node behaviour: admission, mining, sync and restart.

use hermes_chain::{BlockchainService, Message, NodeConfig, ServiceError};
use hermes_consensus::{ConsensusError, ConsensusRule};
use hermes_core::{now_millis, Address, Block, Keypair, SignedTransaction, Transaction};
use hermes_storage::{NodeStore, StateStore};
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

fn funded(alice: &Keypair, batch_size: usize) -> NodeConfig {
    NodeConfig {
        batch_size,
        genesis_allocation: BTreeMap::from([(alice.address(), 1_000)]),
        ..NodeConfig::default()
    }
}

/// A transfer whose hash differs from every other one with a different `seq`.
fn transfer(from: &Keypair, to: Address, amount: i64, seq: u64) -> SignedTransaction {
    Transaction::with_timestamp(from.public_key.clone(), to, amount, now_millis() - seq).sign(from)
}

async fn wait_for_index(node: &BlockchainService, index: u64) {
    let mut tip = node.subscribe_tip();
    tokio::time::timeout(
        Duration::from_secs(30),
        tip.wait_for(|t| t.map_or(false, |(i, _)| i >= index)),
    )
    .await
    .expect("timed out waiting for block")
    .expect("tip channel closed");
}

fn mine_on(node: &BlockchainService, txs: Vec<SignedTransaction>) -> Block {
    let parent = node.latest_block().unwrap();
    let ledger = parent.ledger.replay(&txs).unwrap();
    Block::next(&parent, txs, ledger)
        .mine(|h| node.engine().accepts_hash(h), &AtomicBool::new(false))
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_batch_is_mined_into_block_one() {
    let alice = Keypair::generate();
    let bob = Keypair::generate().address();
    let node = BlockchainService::new(funded(&alice, 5)).await.unwrap();

    let genesis = node.latest_block().unwrap();
    assert_eq!(genesis.index, 0);
    assert!(genesis.previous_hash.is_none());
    assert!(genesis.transactions.is_empty());
    assert!(genesis.hash.to_hex().starts_with('0'));

    let first = transfer(&alice, bob, 10, 1);
    node.add_transaction(first.clone()).unwrap();
    assert!(node.mempool().contains(&first.hash));
    assert!(matches!(
        node.add_transaction(first.clone()),
        Err(ServiceError::DuplicateTransaction(_))
    ));

    let mut submitted = vec![first];
    for seq in 2..=5 {
        let tx = transfer(&alice, bob, 10, seq);
        node.add_transaction(tx.clone()).unwrap();
        submitted.push(tx);
    }

    wait_for_index(&node, 1).await;

    let block = node.block_at(1).unwrap();
    let mut included: Vec<_> = block.transactions.iter().map(|tx| tx.hash).collect();
    let mut expected: Vec<_> = submitted.iter().map(|tx| tx.hash).collect();
    included.sort();
    expected.sort();
    assert_eq!(included, expected);

    assert!(node.mempool().is_empty());
    assert_eq!(node.balance(&alice.address()), 950);
    assert_eq!(node.balance(&bob), 50);
    assert!(node.engine().validate_block(&block, Some(&genesis)).is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overdrawing_transactions_are_left_pending() {
    let alice = Keypair::generate();
    let bob = Keypair::generate().address();
    let node = BlockchainService::new(funded(&alice, 3)).await.unwrap();

    // Each one is affordable alone, together they overdraw.
    let txs = [
        transfer(&alice, bob, 600, 3),
        transfer(&alice, bob, 500, 2),
        transfer(&alice, bob, 300, 1),
    ];
    for tx in &txs {
        node.add_transaction(tx.clone()).unwrap();
    }

    wait_for_index(&node, 1).await;

    let block = node.block_at(1).unwrap();
    assert_eq!(block.tx_count(), 2);
    assert_eq!(node.balance(&alice.address()), 100);
    assert_eq!(node.mempool().len(), 1);
    assert!(node.mempool().contains(&txs[1].hash));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn longer_peer_chain_is_adopted() {
    let alice = Keypair::generate();
    let bob = Keypair::generate().address();
    let a = BlockchainService::new(funded(&alice, 100)).await.unwrap();
    let b = BlockchainService::new(funded(&alice, 100)).await.unwrap();

    for seq in 1..=2 {
        let block = mine_on(&b, vec![transfer(&alice, bob, 10, seq)]);
        b.add_block(block).unwrap();
    }

    // Equal-length exchange changes nothing.
    let tip = a.tip();
    let replies = a.handle_message(Message::ChainResponse {
        blocks: vec![(*b.block_at(0).unwrap()).clone()],
    });
    assert!(replies.is_empty());
    assert_eq!(a.tip(), tip);

    // Tip gossip leads to a chain request, the response replaces the chain.
    let (index, hash) = b.tip().unwrap();
    let request = a.handle_message(Message::TipResponse { index, hash });
    assert_eq!(request, vec![Message::RequestChain { from_index: 0 }]);

    let response = b.handle_message(request[0].clone());
    assert!(a.handle_message(response[0].clone()).is_empty());
    assert_eq!(a.tip(), b.tip());
    assert_eq!(a.balance(&bob), 20);

    // Later blocks arrive as a suffix and are spliced onto the local prefix.
    b.add_block(mine_on(&b, vec![transfer(&alice, bob, 10, 3)])).unwrap();
    a.handle_message(Message::MissingBlocks {
        blocks: b.blocks_from(3).iter().map(|blk| (**blk).clone()).collect(),
    });
    assert_eq!(a.tip(), b.tip());
    assert_eq!(a.balance(&bob), 30);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn block_from_a_longer_fork_requests_the_chain() {
    let alice = Keypair::generate();
    let bob = Keypair::generate().address();
    let a = BlockchainService::new(funded(&alice, 100)).await.unwrap();
    let b = BlockchainService::new(funded(&alice, 100)).await.unwrap();

    b.add_block(mine_on(&b, vec![transfer(&alice, bob, 10, 1)])).unwrap();
    let ahead = (*b.latest_block().unwrap()).clone();

    let replies = a.handle_message(Message::NewBlock { block: ahead.clone() });
    assert_eq!(replies, vec![Message::RequestChain { from_index: 0 }]);

    // The same block again after adopting the chain is a quiet duplicate.
    a.replace_chain(b.blocks().iter().map(|blk| (**blk).clone()).collect());
    assert!(a.handle_message(Message::NewBlock { block: ahead }).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_blocks_at_one_index_commit_once() {
    let alice = Keypair::generate();
    let node = BlockchainService::new(funded(&alice, 100)).await.unwrap();

    let left = mine_on(&node, vec![transfer(&alice, Address::from_bytes([1u8; 32]), 10, 1)]);
    let right = mine_on(&node, vec![transfer(&alice, Address::from_bytes([2u8; 32]), 10, 1)]);

    let handles: Vec<_> = [left, right]
        .into_iter()
        .map(|block| {
            let node = node.clone();
            tokio::task::spawn_blocking(move || node.add_block(block))
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(ServiceError::Consensus(
                ConsensusError::InvalidIndex { .. } | ConsensusError::InvalidPreviousHash { .. },
            )) => {}
            Err(e) => panic!("unexpected rejection: {e}"),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(node.chain().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(NodeStore::open(dir.path()).unwrap());
    let alice = Keypair::generate();
    let bob = Keypair::generate().address();

    let node = BlockchainService::builder(funded(&alice, 100))
        .store(store.clone())
        .build()
        .await
        .unwrap();
    node.add_block(mine_on(&node, vec![transfer(&alice, bob, 10, 2)]))
        .unwrap();
    let pending = transfer(&alice, bob, 5, 1);
    node.add_transaction(pending.clone()).unwrap();
    node.add_peer("http://127.0.0.1:9100").unwrap();
    node.flush().await.unwrap();
    let tip = node.tip();
    drop(node);

    let restarted = BlockchainService::builder(funded(&alice, 100))
        .store(store)
        .build()
        .await
        .unwrap();
    assert_eq!(restarted.tip(), tip);
    assert_eq!(restarted.balance(&bob), 10);
    assert!(restarted.mempool().contains(&pending.hash));
    assert_eq!(restarted.peers(), vec!["http://127.0.0.1:9100".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_stored_chain_falls_back_to_genesis() {
    let store = Arc::new(NodeStore::open_temporary().unwrap());
    let alice = Keypair::generate();
    let bob = Keypair::generate().address();

    let node = BlockchainService::builder(funded(&alice, 100))
        .store(store.clone())
        .build()
        .await
        .unwrap();
    node.add_block(mine_on(&node, vec![transfer(&alice, bob, 10, 1)]))
        .unwrap();
    node.flush().await.unwrap();

    // Tamper with the stored copy of block 1.
    let mut snapshot = store.load().unwrap().unwrap();
    snapshot.blocks[1].ledger.apply_delta(&bob, 1_000_000);
    store.save(&snapshot).unwrap();
    drop(node);

    let restarted = BlockchainService::builder(funded(&alice, 100))
        .store(store)
        .build()
        .await
        .unwrap();
    assert_eq!(restarted.chain().len(), 1);
    assert_eq!(restarted.balance(&bob), 0);
    assert_eq!(restarted.balance(&alice.address()), 1_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_stored_pool_entries_are_dropped() {
    let store = Arc::new(NodeStore::open_temporary().unwrap());
    let alice = Keypair::generate();
    let mallory = Keypair::generate();
    let bob = Keypair::generate().address();
    let config = NodeConfig {
        consensus: ConsensusRule::Naive,
        ..funded(&alice, 1)
    };

    let node = BlockchainService::builder(config.clone())
        .store(store.clone())
        .build()
        .await
        .unwrap();
    node.flush().await.unwrap();
    drop(node);

    // One honest pending transfer, one signed with someone else's key.
    let honest = transfer(&alice, bob, 10, 1);
    let unsigned = Transaction::with_timestamp(alice.public_key.clone(), bob, 20, now_millis() - 2);
    let forged = SignedTransaction::new(unsigned.clone(), mallory.sign_hash(&unsigned.hash));
    let mut snapshot = store.load().unwrap().unwrap();
    snapshot.pool.insert(honest.hash, honest.clone());
    snapshot.pool.insert(forged.hash, forged.clone());
    store.save(&snapshot).unwrap();

    let restarted = BlockchainService::builder(config)
        .store(store)
        .build()
        .await
        .unwrap();
    assert!(!restarted.mempool().contains(&forged.hash));

    wait_for_index(&restarted, 1).await;
    assert_eq!(restarted.block_at(1).unwrap().transactions, vec![honest]);
    assert!(restarted.mempool().is_empty());
}

#[test]
fn peer_block_cancels_stale_mining_job() {
    // One blocking thread, so a queued nonce search can be held back.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .max_blocking_threads(1)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let alice = Keypair::generate();
        let bob = Keypair::generate().address();
        let node = BlockchainService::new(funded(&alice, 1)).await.unwrap();
        let genesis = node.latest_block().unwrap();
        let peer_block = mine_on(&node, vec![transfer(&alice, bob, 10, 2)]);

        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        tokio::task::spawn_blocking(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        });
        started_rx.recv().unwrap();

        let pending = transfer(&alice, bob, 5, 1);
        node.add_transaction(pending.clone()).unwrap();
        let job = node.mining_job().expect("full batch starts a job");
        assert_eq!(job.tip(), genesis.hash);
        assert!(!job.is_cancelled());

        node.add_block(peer_block.clone()).unwrap();
        assert!(job.is_cancelled());

        release_tx.send(()).unwrap();
        wait_for_index(&node, 2).await;

        let next = node.block_at(2).unwrap();
        assert_eq!(node.block_at(1).unwrap().hash, peer_block.hash);
        assert_eq!(next.previous_hash, Some(peer_block.hash));
        assert_eq!(next.transactions, vec![pending]);
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replaced_chain_returns_orphaned_transactions_to_pool() {
    let alice = Keypair::generate();
    let bob = Keypair::generate().address();
    let a = BlockchainService::new(funded(&alice, 100)).await.unwrap();
    let b = BlockchainService::new(funded(&alice, 100)).await.unwrap();

    let orphan = transfer(&alice, bob, 10, 1);
    a.add_block(mine_on(&a, vec![orphan.clone()])).unwrap();
    assert!(!a.mempool().contains(&orphan.hash));

    for seq in 2..=3 {
        b.add_block(mine_on(&b, vec![transfer(&alice, bob, 20, seq)]))
            .unwrap();
    }

    assert!(a.replace_chain(b.blocks().iter().map(|blk| (**blk).clone()).collect()));
    assert_eq!(a.tip(), b.tip());
    assert!(a.mempool().contains(&orphan.hash));
    assert_eq!(a.balance(&alice.address()), 960);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn read_only_node_neither_mines_nor_writes() {
    let store = Arc::new(NodeStore::open_temporary().unwrap());
    let alice = Keypair::generate();
    let bob = Keypair::generate().address();

    let node = BlockchainService::builder(funded(&alice, 100))
        .store(store.clone())
        .build()
        .await
        .unwrap();
    for seq in 1..=2 {
        node.add_transaction(transfer(&alice, bob, 10, seq)).unwrap();
    }
    node.flush().await.unwrap();
    drop(node);

    // The stored pool now meets the batch size.
    let inspector = BlockchainService::builder(funded(&alice, 2))
        .store(store.clone())
        .read_only()
        .build()
        .await
        .unwrap();
    assert!(!inspector.is_mining());
    assert_eq!(inspector.mempool().len(), 2);

    inspector.add_peer("http://127.0.0.1:9100").unwrap();
    inspector.flush().await.unwrap();
    assert!(store.load().unwrap().unwrap().peers.is_empty());
}
