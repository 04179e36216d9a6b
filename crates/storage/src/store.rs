//! Node snapshot persistence.
//!
//! Layout:
//! - `block:hash:{hex}` → one record per block
//! - `chain:index` → block hashes ordered by index
//! - `pool:pending` → pending pool, hash → signed transaction
//! - `peers:known` → known peer addresses

use crate::db::{BatchOp, Result, Storage, StorageError};
use hermes_core::{Block, Hash, SignedTransaction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use tracing::{debug, warn};

const CHAIN_INDEX_KEY: &[u8] = b"chain:index";
const POOL_KEY: &[u8] = b"pool:pending";
const PEERS_KEY: &[u8] = b"peers:known";

/// Everything a node needs to resume: chain, pending pool and peers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Accepted blocks ordered by index.
    pub blocks: Vec<Block>,
    pub pool: BTreeMap<Hash, SignedTransaction>,
    pub peers: BTreeSet<String>,
}

/// Atomic save/load of a [`NodeSnapshot`].
pub trait StateStore: Send + Sync {
    /// Replace the stored snapshot.
    fn save(&self, snapshot: &NodeSnapshot) -> Result<()>;

    /// Load the stored snapshot, `None` when absent or undecodable.
    fn load(&self) -> Result<Option<NodeSnapshot>>;
}

/// sled-backed [`StateStore`].
pub struct NodeStore {
    storage: Storage,
}

impl NodeStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Open or create a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Storage::open(path)?))
    }

    /// In-memory store that disappears on drop.
    pub fn open_temporary() -> Result<Self> {
        Ok(Self::new(Storage::open_temporary()?))
    }

    fn read_snapshot(&self) -> Result<Option<NodeSnapshot>> {
        let index: Vec<Hash> = match self.storage.get(CHAIN_INDEX_KEY)? {
            Some(index) => index,
            None => return Ok(None),
        };

        let mut blocks = Vec::with_capacity(index.len());
        for hash in &index {
            let block: Block = self
                .storage
                .get(Storage::block_hash_key(hash))?
                .ok_or_else(|| StorageError::Corrupt(format!("missing block {}", hash)))?;
            if block.hash != *hash {
                return Err(StorageError::Corrupt(format!("block {} stored under {}", block.hash, hash)));
            }
            blocks.push(block);
        }

        let pool = self.storage.get(POOL_KEY)?.unwrap_or_default();
        let peers = self.storage.get(PEERS_KEY)?.unwrap_or_default();

        Ok(Some(NodeSnapshot {
            blocks,
            pool,
            peers,
        }))
    }
}

impl StateStore for NodeStore {
    fn save(&self, snapshot: &NodeSnapshot) -> Result<()> {
        let index: Vec<Hash> = snapshot.blocks.iter().map(|b| b.hash).collect();
        let current: HashSet<Vec<u8>> = index.iter().map(Storage::block_hash_key).collect();

        let mut ops = Vec::with_capacity(snapshot.blocks.len() + 3);
        // Blocks dropped by a chain replacement.
        for key in self.storage.keys_with_prefix(Storage::BLOCK_PREFIX)? {
            if !current.contains(&key) {
                ops.push(BatchOp::Remove { key });
            }
        }
        for block in &snapshot.blocks {
            ops.push(BatchOp::put(Storage::block_hash_key(&block.hash), block)?);
        }
        ops.push(BatchOp::put(CHAIN_INDEX_KEY, &index)?);
        ops.push(BatchOp::put(POOL_KEY, &snapshot.pool)?);
        ops.push(BatchOp::put(PEERS_KEY, &snapshot.peers)?);

        self.storage.batch(ops)?;
        self.storage.flush()?;

        debug!(
            blocks = snapshot.blocks.len(),
            pending = snapshot.pool.len(),
            peers = snapshot.peers.len(),
            "saved node snapshot"
        );
        Ok(())
    }

    fn load(&self) -> Result<Option<NodeSnapshot>> {
        match self.read_snapshot() {
            Err(StorageError::Database(e)) => Err(StorageError::Database(e)),
            Err(e) => {
                warn!(error = %e, "discarding unreadable snapshot");
                Ok(None)
            }
            ok => ok,
        }
    }
}
