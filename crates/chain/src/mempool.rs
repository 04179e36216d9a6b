//! Transaction mempool for pending transactions.
//!
//! The mempool stores admitted transactions until a block includes them.
//! It is shared between the admission path and the miner, so every method
//! takes `&self` and locks internally.

use hermes_core::{Address, Hash, SignedTransaction};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during mempool operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction {0} already in mempool")]
    DuplicateTransaction(Hash),
}

pub type Result<T> = std::result::Result<T, MempoolError>;

#[derive(Default)]
struct Inner {
    /// Transactions indexed by envelope hash.
    transactions: HashMap<Hash, SignedTransaction>,
    /// Transaction hashes grouped by sender, in admission order.
    by_sender: HashMap<Address, VecDeque<Hash>>,
}

impl Inner {
    fn remove(&mut self, hash: &Hash) -> Option<SignedTransaction> {
        let tx = self.transactions.remove(hash)?;
        let sender = *tx.sender();
        if let Some(queue) = self.by_sender.get_mut(&sender) {
            queue.retain(|h| h != hash);
            if queue.is_empty() {
                self.by_sender.remove(&sender);
            }
        }
        Some(tx)
    }
}

/// Concurrent pool of pending signed transactions.
#[derive(Default)]
pub struct Mempool {
    inner: RwLock<Inner>,
}

impl Mempool {
    /// Create an empty mempool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a pool from previously persisted transactions.
    pub fn from_transactions<I>(transactions: I) -> Self
    where
        I: IntoIterator<Item = SignedTransaction>,
    {
        let pool = Self::new();
        for tx in transactions {
            // Keys of a persisted map are unique.
            let _ = pool.add(tx);
        }
        pool
    }

    /// Get the number of transactions in the mempool.
    pub fn len(&self) -> usize {
        self.inner.read().transactions.len()
    }

    /// Check if the mempool is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().transactions.is_empty()
    }

    /// Check if a transaction is in the mempool.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.read().transactions.contains_key(hash)
    }

    /// Get a single transaction.
    pub fn transaction(&self, hash: &Hash) -> Option<SignedTransaction> {
        self.inner.read().transactions.get(hash).cloned()
    }

    /// Insert a transaction unless its hash is already present.
    pub fn add(&self, tx: SignedTransaction) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.transactions.contains_key(&tx.hash) {
            return Err(MempoolError::DuplicateTransaction(tx.hash));
        }

        inner
            .by_sender
            .entry(*tx.sender())
            .or_default()
            .push_back(tx.hash);
        inner.transactions.insert(tx.hash, tx);
        Ok(())
    }

    /// Remove a transaction. Absent hashes are ignored.
    pub fn remove(&self, hash: &Hash) -> Option<SignedTransaction> {
        let removed = self.inner.write().remove(hash);
        if removed.is_none() {
            debug!(tx = %hash, "transaction not in mempool, nothing to remove");
        }
        removed
    }

    /// Remove several transactions under one lock.
    pub fn remove_batch<'a, I>(&self, hashes: I) -> usize
    where
        I: IntoIterator<Item = &'a Hash>,
    {
        let mut inner = self.inner.write();
        let mut removed = 0;
        for hash in hashes {
            match inner.remove(hash) {
                Some(_) => removed += 1,
                None => debug!(tx = %hash, "transaction not in mempool, nothing to remove"),
            }
        }
        removed
    }

    /// The requested transactions that are present locally.
    pub fn get(&self, hashes: &HashSet<Hash>) -> HashMap<Hash, SignedTransaction> {
        let inner = self.inner.read();
        hashes
            .iter()
            .filter_map(|h| inner.transactions.get(h).map(|tx| (*h, tx.clone())))
            .collect()
    }

    /// The requested hashes that are not present locally.
    pub fn missing(&self, hashes: &HashSet<Hash>) -> HashSet<Hash> {
        let inner = self.inner.read();
        hashes
            .iter()
            .filter(|h| !inner.transactions.contains_key(h))
            .copied()
            .collect()
    }

    /// Hashes of every pending transaction.
    pub fn hashes(&self) -> HashSet<Hash> {
        self.inner.read().transactions.keys().copied().collect()
    }

    /// Pending transactions, oldest transaction timestamp first.
    ///
    /// Ties are ordered by hash so selection is deterministic.
    pub fn pending_by_timestamp(&self) -> Vec<SignedTransaction> {
        let mut txs: Vec<_> = self.inner.read().transactions.values().cloned().collect();
        txs.sort_by(|a, b| {
            a.timestamp()
                .cmp(&b.timestamp())
                .then_with(|| a.hash.cmp(&b.hash))
        });
        txs
    }

    /// Get transactions from a specific sender, in admission order.
    pub fn get_by_sender(&self, sender: &Address) -> Vec<SignedTransaction> {
        let inner = self.inner.read();
        inner
            .by_sender
            .get(sender)
            .map(|hashes| {
                hashes
                    .iter()
                    .filter_map(|h| inner.transactions.get(h).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get transactions paying a specific recipient.
    pub fn get_by_recipient(&self, recipient: &Address) -> Vec<SignedTransaction> {
        self.inner
            .read()
            .transactions
            .values()
            .filter(|tx| tx.recipient() == recipient)
            .cloned()
            .collect()
    }

    /// Copy of the whole pool, keyed by hash.
    pub fn snapshot(&self) -> BTreeMap<Hash, SignedTransaction> {
        self.inner
            .read()
            .transactions
            .iter()
            .map(|(h, tx)| (*h, tx.clone()))
            .collect()
    }

    /// Clear all transactions from the mempool.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.transactions.clear();
        inner.by_sender.clear();
    }

    /// Get mempool statistics.
    pub fn stats(&self) -> MempoolStats {
        let inner = self.inner.read();
        MempoolStats {
            total_transactions: inner.transactions.len(),
            unique_senders: inner.by_sender.len(),
        }
    }
}

/// Mempool statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MempoolStats {
    /// Total number of transactions.
    pub total_transactions: usize,
    /// Number of unique senders.
    pub unique_senders: usize,
}
