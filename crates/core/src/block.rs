//! Block structure, content hashing and nonce search.

use crate::hash::{now_millis, sha256_concat, Hash};
use crate::ledger::Ledger;
use crate::merkle::{merkle_root, merkle_root_hex};
use crate::transaction::SignedTransaction;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Structural defects a block can detect about itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("invalid block timestamp {0}")]
    InvalidTimestamp(u64),

    #[error("genesis block must not reference a previous block")]
    GenesisWithPreviousHash,

    #[error("block {0} has no previous hash")]
    MissingPreviousHash(u64),

    #[error("block {0} contains no transactions")]
    EmptyBlock(u64),

    #[error("merkle root does not match transactions")]
    MerkleRootMismatch,

    #[error("block hash mismatch (stored {stored}, computed {computed})")]
    HashMismatch { stored: Hash, computed: Hash },
}

pub type Result<T> = std::result::Result<T, BlockError>;

/// A sealed batch of transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Position in the chain, 0 for genesis.
    pub index: u64,
    /// Creation time in Unix milliseconds.
    pub timestamp: u64,
    /// Hash of the parent block, absent only for genesis.
    pub previous_hash: Option<Hash>,
    /// Ordered transactions.
    pub transactions: Vec<SignedTransaction>,
    /// Merkle root over the transaction hashes, absent when there are none.
    pub merkle_root: Option<Hash>,
    /// Proof-of-work nonce.
    pub nonce: u64,
    /// Content hash over index, timestamp, parent, merkle root and nonce.
    pub hash: Hash,
    /// Balances after applying this block.
    pub ledger: Ledger,
}

impl Block {
    /// Assemble a block and compute its hash.
    pub fn new(
        index: u64,
        timestamp: u64,
        previous_hash: Option<Hash>,
        transactions: Vec<SignedTransaction>,
        nonce: u64,
        ledger: Ledger,
    ) -> Self {
        let merkle_root = Self::transactions_root(&transactions);
        let hash = Self::calculate_hash(
            index,
            timestamp,
            previous_hash.as_ref(),
            merkle_root.as_ref(),
            nonce,
        );
        Self {
            index,
            timestamp,
            previous_hash,
            transactions,
            merkle_root,
            nonce,
            hash,
            ledger,
        }
    }

    /// Unsealed genesis block carrying the initial allocation.
    pub fn genesis(ledger: Ledger) -> Self {
        Self::new(0, now_millis(), None, Vec::new(), 0, ledger)
    }

    /// Unsealed successor of `parent`, stamped now.
    pub fn next(parent: &Block, transactions: Vec<SignedTransaction>, ledger: Ledger) -> Self {
        // Clock skew must not produce a child older than its parent.
        let timestamp = now_millis().max(parent.timestamp);
        Self::new(
            parent.index + 1,
            timestamp,
            Some(parent.hash),
            transactions,
            0,
            ledger,
        )
    }

    /// `sha256(index ∥ timestamp ∥ previous_hash ∥ merkle_root ∥ nonce)`.
    ///
    /// Absent hashes contribute the empty string.
    pub fn calculate_hash(
        index: u64,
        timestamp: u64,
        previous_hash: Option<&Hash>,
        merkle_root: Option<&Hash>,
        nonce: u64,
    ) -> Hash {
        let previous = previous_hash.map(Hash::to_hex).unwrap_or_default();
        sha256_concat(&[
            &index.to_string(),
            &timestamp.to_string(),
            &previous,
            &merkle_root_hex(merkle_root),
            &nonce.to_string(),
        ])
    }

    /// Merkle root over the given transactions' envelope hashes.
    pub fn transactions_root(transactions: &[SignedTransaction]) -> Option<Hash> {
        let hashes: Vec<Hash> = transactions.iter().map(|tx| tx.hash).collect();
        merkle_root(&hashes)
    }

    /// Hash this block would have with a different nonce.
    pub fn hash_with_nonce(&self, nonce: u64) -> Hash {
        Self::calculate_hash(
            self.index,
            self.timestamp,
            self.previous_hash.as_ref(),
            self.merkle_root.as_ref(),
            nonce,
        )
    }

    /// Recompute the hash from the stored fields.
    pub fn recompute_hash(&self) -> Hash {
        let root = Self::transactions_root(&self.transactions);
        Self::calculate_hash(
            self.index,
            self.timestamp,
            self.previous_hash.as_ref(),
            root.as_ref(),
            self.nonce,
        )
    }

    /// Search random nonces until `accept` approves the resulting hash.
    ///
    /// Runs unbounded; returns `None` only when `cancel` is raised.
    pub fn mine<F>(mut self, accept: F, cancel: &AtomicBool) -> Option<Block>
    where
        F: Fn(&Hash) -> bool,
    {
        loop {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            let nonce: u64 = rand::random();
            let hash = self.hash_with_nonce(nonce);
            if accept(&hash) {
                self.nonce = nonce;
                self.hash = hash;
                return Some(self);
            }
        }
    }

    /// Check whether this is the genesis block.
    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.previous_hash.is_none()
    }

    /// Get the number of transactions in this block.
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    /// Verify the merkle root matches the transactions.
    pub fn verify_merkle_root(&self) -> bool {
        Self::transactions_root(&self.transactions) == self.merkle_root
    }

    /// Self-contained structural checks against the current clock.
    pub fn validate_structure(&self) -> Result<()> {
        self.validate_structure_at(now_millis())
    }

    /// Self-contained structural checks against a given clock reading.
    pub fn validate_structure_at(&self, now: u64) -> Result<()> {
        if self.timestamp == 0 || self.timestamp > now {
            return Err(BlockError::InvalidTimestamp(self.timestamp));
        }

        match (self.index, &self.previous_hash) {
            (0, Some(_)) => return Err(BlockError::GenesisWithPreviousHash),
            (index, None) if index > 0 => return Err(BlockError::MissingPreviousHash(index)),
            _ => {}
        }

        if self.index > 0 && self.transactions.is_empty() {
            return Err(BlockError::EmptyBlock(self.index));
        }

        if !self.verify_merkle_root() {
            return Err(BlockError::MerkleRootMismatch);
        }

        let computed = self.recompute_hash();
        if computed != self.hash {
            return Err(BlockError::HashMismatch {
                stored: self.hash,
                computed,
            });
        }

        Ok(())
    }
}
