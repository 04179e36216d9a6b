//! Node orchestration.
//!
//! [`BlockchainService`] owns the chain, the mempool and the peer book and
//! is the only place they are mutated. Every state change that touches both
//! the chain and the pool runs under one commit lock:
//!
//! - transaction admission checks the chain, the ledger and the pool, then
//!   inserts
//! - block admission validates against the tip, purges the pool, then
//!   appends
//! - chain replacement swaps the chain and reconciles the pool
//!
//! Mining runs on the blocking pool and commits through
//! [`add_block`](BlockchainService::add_block) like any peer block.

use crate::chain::Chain;
use crate::config::NodeConfig;
use crate::error::{Result, ServiceError};
use crate::mempool::Mempool;
use crate::miner::{select_transactions, MiningJob};
use crate::network::{Broadcaster, Message, NoopBroadcaster, PeerBook, PeerConnector};
use hermes_consensus::{ChainView, ConsensusEngine, ConsensusError};
use hermes_core::{Address, Block, Hash, Ledger, SignedTransaction};
use hermes_storage::{NodeSnapshot, StateStore};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Index and hash of the chain tip.
pub type TipSummary = Option<(u64, Hash)>;

struct Inner {
    config: NodeConfig,
    engine: ConsensusEngine,
    chain: Chain,
    mempool: Mempool,
    peers: PeerBook,
    /// Serializes every mutation spanning chain and pool.
    commit: Mutex<()>,
    /// The running mining job, at most one.
    mining: Mutex<Option<MiningJob>>,
    tip: watch::Sender<TipSummary>,
    broadcaster: Arc<dyn Broadcaster>,
    store: Option<Arc<dyn StateStore>>,
    /// Never mines and never writes to the store.
    read_only: bool,
    /// Sequence number of the next snapshot.
    snapshot_seq: AtomicU64,
    /// Sequence number of the newest snapshot written to the store.
    saved_seq: Arc<Mutex<u64>>,
    runtime: Handle,
}

/// Configures and starts a [`BlockchainService`].
pub struct ServiceBuilder {
    config: NodeConfig,
    broadcaster: Arc<dyn Broadcaster>,
    store: Option<Arc<dyn StateStore>>,
    read_only: bool,
}

impl ServiceBuilder {
    pub fn broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Load state for inspection only: no mining jobs, no store writes.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Restore stored state or mine a fresh genesis block.
    ///
    /// Must run inside a tokio runtime; mining tasks are spawned on it.
    pub async fn build(self) -> Result<BlockchainService> {
        self.config.validate()?;
        let runtime = Handle::try_current().map_err(|_| ServiceError::RuntimeUnavailable)?;
        let engine = ConsensusEngine::new(self.config.consensus);

        let restored = match &self.store {
            Some(store) => restore(store.as_ref(), &engine),
            None => None,
        };

        let peers = PeerBook::new(self.config.node_address.clone());
        let (chain, mempool, fresh) = match restored {
            Some(snapshot) => {
                for peer in &snapshot.peers {
                    if let Err(e) = peers.add(peer) {
                        warn!(peer = %peer, error = %e, "dropping stored peer");
                    }
                }
                let chain = Chain::from_blocks(snapshot.blocks);
                let pending = snapshot.pool.into_values().filter(|tx| {
                    if let Err(e) = tx.validate() {
                        warn!(tx = %tx.hash, error = %e, "dropping invalid stored transaction");
                        return false;
                    }
                    !chain.contains_transaction(&tx.hash)
                });
                let mempool = Mempool::from_transactions(pending);
                (chain, mempool, false)
            }
            None => {
                let genesis = Block::genesis(self.config.genesis_ledger());
                let genesis = MiningJob::new(Hash::ZERO)
                    .run(engine.clone(), genesis)
                    .await
                    .ok_or(ServiceError::MiningAborted)?;
                info!(hash = %genesis.hash, nonce = genesis.nonce, "mined genesis block");
                (Chain::from_blocks([genesis]), Mempool::new(), true)
            }
        };

        let (tip, _) = watch::channel(chain.tip_summary());
        let service = BlockchainService {
            inner: Arc::new(Inner {
                config: self.config,
                engine,
                chain,
                mempool,
                peers,
                commit: Mutex::new(()),
                mining: Mutex::new(None),
                tip,
                broadcaster: self.broadcaster,
                store: self.store,
                read_only: self.read_only,
                snapshot_seq: AtomicU64::new(0),
                saved_seq: Arc::new(Mutex::new(0)),
                runtime,
            }),
        };

        info!(
            blocks = service.inner.chain.len(),
            pending = service.inner.mempool.len(),
            peers = service.inner.peers.len(),
            "blockchain service started"
        );

        if fresh {
            let _commit = service.inner.commit.lock();
            service.persist();
        }
        service.try_mine();
        Ok(service)
    }
}

/// Load a stored snapshot and keep it only if its chain validates.
fn restore(store: &dyn StateStore, engine: &ConsensusEngine) -> Option<NodeSnapshot> {
    match store.load() {
        Ok(Some(snapshot)) => match engine.validate_chain(&snapshot.blocks) {
            Ok(()) => {
                info!(blocks = snapshot.blocks.len(), "restored stored chain");
                Some(snapshot)
            }
            Err(e) => {
                warn!(error = %e, "stored chain is invalid, starting from genesis");
                None
            }
        },
        Ok(None) => {
            info!("no stored state, starting from genesis");
            None
        }
        Err(e) => {
            warn!(error = %e, "failed to load stored state, starting from genesis");
            None
        }
    }
}

/// Handle to a running node. Cheap to clone.
#[derive(Clone)]
pub struct BlockchainService {
    inner: Arc<Inner>,
}

impl BlockchainService {
    pub fn builder(config: NodeConfig) -> ServiceBuilder {
        ServiceBuilder {
            config,
            broadcaster: Arc::new(NoopBroadcaster),
            store: None,
            read_only: false,
        }
    }

    /// Start a node without peers or persistence.
    pub async fn new(config: NodeConfig) -> Result<Self> {
        Self::builder(config).build().await
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Validate a signed transaction and admit it into the pool.
    ///
    /// The sender must cover the amount from the committed ledger. Once
    /// admitted the transaction is broadcast and mining is attempted.
    pub fn add_transaction(&self, tx: SignedTransaction) -> Result<()> {
        tx.validate()?;

        {
            let _commit = self.inner.commit.lock();
            if self.inner.chain.contains_transaction(&tx.hash) {
                return Err(ServiceError::DuplicateTransaction(tx.hash));
            }
            let available = self.inner.chain.balance(tx.sender());
            if tx.amount() > available {
                return Err(ServiceError::InsufficientFunds {
                    address: *tx.sender(),
                    required: tx.amount(),
                    available,
                });
            }
            self.inner.mempool.add(tx.clone())?;
            self.persist();
        }

        info!(
            tx = %tx.hash,
            amount = tx.amount(),
            pending = self.inner.mempool.len(),
            "transaction admitted"
        );
        self.broadcast(Message::NewTransaction { transaction: tx });
        self.try_mine();
        Ok(())
    }

    // =========================================================================
    // Mining
    // =========================================================================

    /// Start a mining job if none is running and the pool holds a full batch.
    ///
    /// Returns whether a job was started.
    pub fn try_mine(&self) -> bool {
        if self.inner.read_only {
            return false;
        }
        let mut slot = self.inner.mining.lock();
        if slot.is_some() {
            return false;
        }

        let batch = self.inner.config.batch_size.max(1);
        if self.inner.mempool.len() < batch {
            return false;
        }
        let Some(parent) = self.inner.chain.tip() else {
            return false;
        };

        let candidates = self
            .inner
            .mempool
            .pending_by_timestamp()
            .into_iter()
            .filter(|tx| !self.inner.chain.contains_transaction(&tx.hash))
            .collect();
        let (selected, ledger) = select_transactions(&parent.ledger, candidates, batch);
        if selected.is_empty() {
            debug!("no affordable pending transactions to mine");
            return false;
        }

        let block = Block::next(&parent, selected, ledger);
        let job = MiningJob::new(parent.hash);
        *slot = Some(job.clone());
        drop(slot);

        info!(
            index = block.index,
            transactions = block.tx_count(),
            parent = %parent.hash,
            "mining started"
        );
        let service = self.clone();
        self.inner
            .runtime
            .spawn(async move { service.finish_mining(job, block).await });
        true
    }

    async fn finish_mining(&self, job: MiningJob, block: Block) {
        let index = block.index;
        match job.run(self.inner.engine.clone(), block).await {
            Some(block) => {
                info!(index, hash = %block.hash, nonce = block.nonce, "block mined");
                let transactions = block.transactions.clone();
                if let Err(e) = self.add_block(block) {
                    warn!(index, error = %e, "mined block was not accepted");
                    // Keep a bad pool entry from being selected again.
                    for tx in transactions.iter().filter(|tx| tx.validate().is_err()) {
                        self.inner.mempool.remove(&tx.hash);
                    }
                }
            }
            None => info!(index, "mining cancelled"),
        }

        {
            let mut slot = self.inner.mining.lock();
            if slot.as_ref().is_some_and(|current| current.same_job(&job)) {
                *slot = None;
            }
        }
        // Transactions may have arrived while this job was running.
        self.try_mine();
    }

    /// Whether a mining job is running.
    pub fn is_mining(&self) -> bool {
        self.inner.mining.lock().is_some()
    }

    /// Handle to the running mining job, if any.
    pub fn mining_job(&self) -> Option<MiningJob> {
        self.inner.mining.lock().clone()
    }

    // =========================================================================
    // Blocks
    // =========================================================================

    /// Validate a block against the tip and commit it.
    ///
    /// This is the single commit point for locally mined and peer blocks.
    pub fn add_block(&self, block: Block) -> Result<Arc<Block>> {
        let committed = {
            let _commit = self.inner.commit.lock();
            let chain = &self.inner.chain;
            let engine = &self.inner.engine;

            engine.check_not_duplicate(&block, chain)?;
            let parent = chain.tip();
            engine.validate_block(&block, parent.as_deref())?;
            if let Some(parent) = &parent {
                engine.validate_transactions(&block, parent, |h| chain.contains_transaction(h))?;
            }

            let included: Vec<Hash> = block.transactions.iter().map(|tx| tx.hash).collect();
            self.inner.mempool.remove_batch(&included);
            let committed = chain.append(block);
            self.tip_moved(&committed);
            self.persist();
            committed
        };

        info!(
            index = committed.index,
            hash = %committed.hash,
            transactions = committed.tx_count(),
            "block committed"
        );
        self.broadcast(Message::NewBlock {
            block: (*committed).clone(),
        });
        self.try_mine();
        Ok(committed)
    }

    /// Adopt `candidate` if it is valid and strictly longer than the chain.
    ///
    /// Pending transactions included by the new chain leave the pool;
    /// transactions only the old chain included return to it when the new
    /// ledger still covers them.
    pub fn replace_chain(&self, candidate: Vec<Block>) -> bool {
        let _commit = self.inner.commit.lock();
        let chain = &self.inner.chain;
        if !self.inner.engine.should_replace_chain(chain, &candidate) {
            return false;
        }

        let old = chain.blocks();
        chain.replace(candidate);

        let included: Vec<Hash> = chain
            .blocks()
            .iter()
            .flat_map(|b| b.transactions.iter().map(|tx| tx.hash))
            .collect();
        self.inner.mempool.remove_batch(&included);

        let mut restored = 0;
        for tx in old.iter().flat_map(|b| b.transactions.iter()) {
            if chain.contains_transaction(&tx.hash) || tx.amount() > chain.balance(tx.sender()) {
                continue;
            }
            if self.inner.mempool.add(tx.clone()).is_ok() {
                restored += 1;
            }
        }

        if let Some(tip) = chain.tip() {
            info!(
                blocks = chain.len(),
                tip = %tip.hash,
                restored,
                "replaced chain"
            );
            self.tip_moved(&tip);
        }
        self.persist();
        true
    }

    fn tip_moved(&self, tip: &Block) {
        self.inner.tip.send_replace(Some((tip.index, tip.hash)));
        if let Some(job) = self.inner.mining.lock().as_ref() {
            job.cancel_if_stale(&tip.hash);
        }
    }

    /// Watch the tip; the value changes on every commit or replacement.
    pub fn subscribe_tip(&self) -> watch::Receiver<TipSummary> {
        self.inner.tip.subscribe()
    }

    // =========================================================================
    // Network
    // =========================================================================

    /// Dispatch one inbound message and return the replies for its sender.
    pub fn handle_message(&self, message: Message) -> Vec<Message> {
        debug!(kind = message.kind(), "handling message");
        match message {
            Message::NewBlock { block } => self.receive_block(block),
            Message::NewTransaction { transaction } => {
                match self.add_transaction(transaction) {
                    Ok(()) => {}
                    Err(ServiceError::DuplicateTransaction(hash)) => {
                        debug!(tx = %hash, "already have transaction")
                    }
                    Err(e) => warn!(error = %e, "rejected peer transaction"),
                }
                Vec::new()
            }
            Message::RequestChain { from_index } => vec![Message::ChainResponse {
                blocks: self.inner.chain.to_vec_from(from_index),
            }],
            Message::ChainResponse { blocks }
            | Message::MissingBlocks { blocks }
            | Message::NewChain { blocks } => self.resolve_fork(blocks),
            Message::TipResponse { index, hash } => match self.inner.chain.tip_summary() {
                Some((local, _)) if local >= index => {
                    if local == index && self.inner.chain.block(&hash).is_none() {
                        debug!(index, peer_tip = %hash, "peer is on a competing tip of equal length");
                    }
                    Vec::new()
                }
                _ => vec![Message::RequestChain { from_index: 0 }],
            },
            Message::SyncTransactions { hashes } => self.sync_transactions(hashes),
        }
    }

    fn receive_block(&self, block: Block) -> Vec<Message> {
        let index = block.index;
        let hash = block.hash;
        match self.add_block(block) {
            Ok(_) => Vec::new(),
            Err(ServiceError::Consensus(ConsensusError::DuplicateBlock(_))) => {
                debug!(block = %hash, "already have block");
                Vec::new()
            }
            Err(ServiceError::Consensus(
                ConsensusError::InvalidIndex { .. } | ConsensusError::InvalidPreviousHash { .. },
            )) if self.is_behind(index) => {
                info!(index, block = %hash, "peer block is ahead of local tip, requesting chain");
                vec![Message::RequestChain { from_index: 0 }]
            }
            Err(e) => {
                warn!(index, block = %hash, error = %e, "rejected peer block");
                Vec::new()
            }
        }
    }

    fn is_behind(&self, index: u64) -> bool {
        self.inner
            .chain
            .tip_summary()
            .map_or(true, |(local, _)| index > local)
    }

    /// Try to adopt a chain or a suffix of one.
    ///
    /// A suffix starting above genesis is spliced onto the local prefix.
    fn resolve_fork(&self, blocks: Vec<Block>) -> Vec<Message> {
        let Some(start) = blocks.first().map(|b| b.index) else {
            return Vec::new();
        };

        let candidate = if start == 0 {
            blocks
        } else {
            let mut prefix = self.inner.chain.to_vec_from(0);
            if (prefix.len() as u64) < start {
                debug!(start, local = prefix.len(), "cannot splice suffix, requesting full chain");
                return vec![Message::RequestChain { from_index: 0 }];
            }
            prefix.truncate(start as usize);
            prefix.extend(blocks);
            prefix
        };

        self.replace_chain(candidate);
        Vec::new()
    }

    fn sync_transactions(&self, theirs: HashSet<Hash>) -> Vec<Message> {
        let ours = self.inner.mempool.hashes();
        let they_lack: HashSet<Hash> = ours.difference(&theirs).copied().collect();

        let mut offered: Vec<SignedTransaction> =
            self.inner.mempool.get(&they_lack).into_values().collect();
        offered.sort_by_key(|tx| (tx.timestamp(), tx.hash));
        let mut replies: Vec<Message> = offered
            .into_iter()
            .map(|transaction| Message::NewTransaction { transaction })
            .collect();

        let we_lack: Vec<Hash> = self
            .inner
            .mempool
            .missing(&theirs)
            .into_iter()
            .filter(|h| !self.inner.chain.contains_transaction(h))
            .collect();
        if !we_lack.is_empty() {
            replies.push(Message::SyncTransactions { hashes: ours });
        }
        replies
    }

    fn broadcast(&self, message: Message) {
        let kind = message.kind();
        if let Err(e) = self.inner.broadcaster.broadcast(message) {
            warn!(kind, error = %e, "broadcast failed");
        }
    }

    /// Register a peer address. Returns whether it was new.
    pub fn add_peer(&self, address: &str) -> Result<bool> {
        let added = self.inner.peers.add(address)?;
        if added {
            info!(peer = %address, "peer added");
            let _commit = self.inner.commit.lock();
            self.persist();
        }
        Ok(added)
    }

    /// Discover peers starting from the configured seeds.
    pub fn connect<C>(&self, connector: &C) -> Vec<String>
    where
        C: PeerConnector + ?Sized,
    {
        let discovered = self.inner.peers.connect(&self.inner.config.peers, connector);
        if !discovered.is_empty() {
            let _commit = self.inner.commit.lock();
            self.persist();
        }
        discovered
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Current chain, pool and peers.
    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            blocks: self.inner.chain.to_vec_from(0),
            pool: self.inner.mempool.snapshot(),
            peers: self.inner.peers.peers(),
        }
    }

    /// Queue a snapshot write. Callers hold the commit lock so sequence
    /// numbers follow commit order; stale writes are skipped.
    fn persist(&self) {
        if self.inner.read_only {
            return;
        }
        let Some(store) = self.inner.store.clone() else {
            return;
        };
        let seq = self.inner.snapshot_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = self.snapshot();
        let saved = Arc::clone(&self.inner.saved_seq);

        self.inner.runtime.spawn_blocking(move || {
            let mut last = saved.lock();
            if *last >= seq {
                debug!(seq, "newer snapshot already saved");
                return;
            }
            match store.save(&snapshot) {
                Ok(()) => *last = seq,
                Err(e) => warn!(seq, error = %e, "failed to persist node state"),
            }
        });
    }

    /// Write the current state and wait for it to reach the store.
    pub async fn flush(&self) -> Result<()> {
        if self.inner.read_only {
            return Ok(());
        }
        let Some(store) = self.inner.store.clone() else {
            return Ok(());
        };
        let (seq, snapshot) = {
            let _commit = self.inner.commit.lock();
            let seq = self.inner.snapshot_seq.fetch_add(1, Ordering::SeqCst) + 1;
            (seq, self.snapshot())
        };
        let saved = Arc::clone(&self.inner.saved_seq);

        self.inner
            .runtime
            .spawn_blocking(move || -> Result<()> {
                let mut last = saved.lock();
                if *last < seq {
                    store.save(&snapshot)?;
                    *last = seq;
                }
                Ok(())
            })
            .await
            .map_err(|_| ServiceError::RuntimeUnavailable)?
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn engine(&self) -> &ConsensusEngine {
        &self.inner.engine
    }

    pub fn chain(&self) -> &Chain {
        &self.inner.chain
    }

    pub fn mempool(&self) -> &Mempool {
        &self.inner.mempool
    }

    pub fn peers(&self) -> Vec<String> {
        self.inner.peers.peers().into_iter().collect()
    }

    /// All blocks ordered by index.
    pub fn blocks(&self) -> Vec<Arc<Block>> {
        self.inner.chain.blocks()
    }

    pub fn block_at(&self, index: u64) -> Option<Arc<Block>> {
        self.inner.chain.block_at(index)
    }

    pub fn block(&self, hash: &Hash) -> Option<Arc<Block>> {
        self.inner.chain.block(hash)
    }

    pub fn latest_block(&self) -> Option<Arc<Block>> {
        self.inner.chain.tip()
    }

    pub fn tip(&self) -> TipSummary {
        self.inner.chain.tip_summary()
    }

    pub fn blocks_from(&self, index: u64) -> Vec<Arc<Block>> {
        self.inner.chain.range_from(index)
    }

    pub fn pending_transactions(&self) -> Vec<SignedTransaction> {
        self.inner.mempool.pending_by_timestamp()
    }

    pub fn pending_from(&self, sender: &Address) -> Vec<SignedTransaction> {
        self.inner.mempool.get_by_sender(sender)
    }

    pub fn pending_to(&self, recipient: &Address) -> Vec<SignedTransaction> {
        self.inner.mempool.get_by_recipient(recipient)
    }

    pub fn balance(&self, address: &Address) -> i64 {
        self.inner.chain.balance(address)
    }

    /// Committed balances at the tip.
    pub fn ledger(&self) -> Ledger {
        self.inner.chain.ledger()
    }
}
