//! Consensus rejection reasons.

use hermes_core::{BlockError, Hash, LedgerError, TransactionError};
use thiserror::Error;

/// Why a block or chain was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("structural error: {0}")]
    Structural(#[from] BlockError),

    #[error("block index mismatch (expected {expected}, got {got})")]
    InvalidIndex { expected: u64, got: u64 },

    #[error("block previous hash mismatch (expected {expected}, got {got:?})")]
    InvalidPreviousHash { expected: Hash, got: Option<Hash> },

    #[error("block timestamp {block} is earlier than parent timestamp {parent}")]
    InvalidTimestamp { block: u64, parent: u64 },

    #[error("block does not meet the proof of work requirements: hash={hash} nonce={nonce}")]
    ProofOfWorkFailed { hash: Hash, nonce: u64 },

    #[error("block already exists: {0}")]
    DuplicateBlock(Hash),

    #[error("invalid transaction {hash}: {source}")]
    InvalidTransaction {
        hash: Hash,
        #[source]
        source: TransactionError,
    },

    #[error("transaction {0} appears more than once")]
    DuplicateTransaction(Hash),

    #[error("block transfers overdraw the ledger: {0}")]
    InsufficientFunds(#[from] LedgerError),

    #[error("ledger snapshot of block {0} does not match its transactions")]
    LedgerMismatch(u64),

    #[error("chain is empty")]
    EmptyChain,
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
