//! Core ledger primitives for hermes.
//!
//! This crate provides the value types shared by every other crate:
//! - SHA-256 hashing and Merkle aggregation
//! - Ed25519 keys, signatures and addresses
//! - The balance ledger carried by blocks
//! - Transactions and signed transactions
//! - Blocks

pub mod block;
pub mod crypto;
pub mod hash;
pub mod ledger;
pub mod merkle;
pub mod transaction;

// Re-export commonly used types at the crate root
pub use block::{Block, BlockError};
pub use crypto::{Address, CryptoError, Keypair, PublicKey, Signature};
pub use hash::{now_millis, sha256, Hash};
pub use ledger::{Ledger, LedgerError};
pub use merkle::merkle_root;
pub use transaction::{SignedTransaction, Transaction, TransactionError};
