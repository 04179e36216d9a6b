//! Transfer transactions and their signed envelopes.

use crate::crypto::{Address, Keypair, PublicKey, Signature};
use crate::hash::{now_millis, sha256_concat, Hash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during transaction validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction amount must be greater than 0 (got {0})")]
    NonPositiveAmount(i64),

    #[error("sender and recipient cannot be the same")]
    SelfTransfer,

    #[error("invalid transaction timestamp {0}")]
    InvalidTimestamp(u64),

    #[error("public key does not match the sender address")]
    PublicKeyMismatch,

    #[error("invalid transaction hash")]
    InvalidTransactionHash,

    #[error("invalid transaction signature")]
    InvalidSignature,

    #[error("invalid signed transaction hash")]
    InvalidSignedHash,
}

pub type Result<T> = std::result::Result<T, TransactionError>;

/// A value transfer between two addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender's address, `sha256(public_key)`.
    pub sender: Address,
    /// Sender's public key.
    pub public_key: PublicKey,
    /// Recipient's address.
    pub recipient: Address,
    /// Amount to transfer.
    pub amount: i64,
    /// Creation time in Unix milliseconds.
    pub timestamp: u64,
    /// Content hash over sender, recipient, amount and timestamp.
    pub hash: Hash,
}

impl Transaction {
    /// Create a transfer from the owner of `public_key`, stamped now.
    pub fn new(public_key: PublicKey, recipient: Address, amount: i64) -> Self {
        Self::with_timestamp(public_key, recipient, amount, now_millis())
    }

    /// Create a transfer with an explicit timestamp.
    pub fn with_timestamp(
        public_key: PublicKey,
        recipient: Address,
        amount: i64,
        timestamp: u64,
    ) -> Self {
        let sender = public_key.to_address();
        let hash = Self::calculate_hash(&sender, &recipient, amount, timestamp);
        Self {
            sender,
            public_key,
            recipient,
            amount,
            timestamp,
            hash,
        }
    }

    /// `sha256(sender ∥ recipient ∥ amount ∥ timestamp)` over the textual forms.
    pub fn calculate_hash(
        sender: &Address,
        recipient: &Address,
        amount: i64,
        timestamp: u64,
    ) -> Hash {
        sha256_concat(&[
            &sender.to_hex(),
            &recipient.to_hex(),
            &amount.to_string(),
            &timestamp.to_string(),
        ])
    }

    /// Whether the stored hash matches the recomputed one.
    pub fn has_valid_hash(&self) -> bool {
        Self::calculate_hash(&self.sender, &self.recipient, self.amount, self.timestamp)
            == self.hash
    }

    /// Whether the public key hashes to the sender address.
    pub fn has_valid_public_key(&self) -> bool {
        self.public_key.to_address() == self.sender
    }

    /// Structural validation against the current clock.
    pub fn validate(&self) -> Result<()> {
        self.validate_at(now_millis())
    }

    /// Structural validation against a given clock reading.
    pub fn validate_at(&self, now: u64) -> Result<()> {
        if self.amount <= 0 {
            return Err(TransactionError::NonPositiveAmount(self.amount));
        }
        if self.sender == self.recipient {
            return Err(TransactionError::SelfTransfer);
        }
        if self.timestamp == 0 || self.timestamp > now {
            return Err(TransactionError::InvalidTimestamp(self.timestamp));
        }
        if !self.has_valid_public_key() {
            return Err(TransactionError::PublicKeyMismatch);
        }
        if !self.has_valid_hash() {
            return Err(TransactionError::InvalidTransactionHash);
        }
        Ok(())
    }

    /// Sign the transaction hash with the sender's keypair.
    pub fn sign(self, keypair: &Keypair) -> SignedTransaction {
        let signature = keypair.sign_hash(&self.hash);
        SignedTransaction::new(self, signature)
    }
}

/// A transaction together with the sender's signature over its hash.
///
/// The envelope hash identifies the transaction in the pool and on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signature: Signature,
    /// `sha256(transaction.hash ∥ signature)`.
    pub hash: Hash,
}

impl SignedTransaction {
    /// Wrap a transaction with an existing signature.
    pub fn new(transaction: Transaction, signature: Signature) -> Self {
        let hash = Self::calculate_hash(&transaction.hash, &signature);
        Self {
            transaction,
            signature,
            hash,
        }
    }

    /// Envelope hash over the inner hash and the signature.
    pub fn calculate_hash(transaction_hash: &Hash, signature: &Signature) -> Hash {
        sha256_concat(&[&transaction_hash.to_hex(), &signature.to_hex()])
    }

    /// Verify the signature against the sender's public key.
    pub fn validate_signature(&self) -> Result<()> {
        let tx = &self.transaction;
        if tx.public_key.verify_hash(&tx.hash, &self.signature) {
            Ok(())
        } else {
            Err(TransactionError::InvalidSignature)
        }
    }

    /// Verify the envelope hash.
    pub fn validate_hash(&self) -> Result<()> {
        if Self::calculate_hash(&self.transaction.hash, &self.signature) == self.hash {
            Ok(())
        } else {
            Err(TransactionError::InvalidSignedHash)
        }
    }

    /// Structure, signature and both hashes.
    pub fn validate(&self) -> Result<()> {
        self.validate_at(now_millis())
    }

    /// Like [`validate`](Self::validate) with an explicit clock reading.
    pub fn validate_at(&self, now: u64) -> Result<()> {
        self.transaction.validate_at(now)?;
        self.validate_signature()?;
        self.validate_hash()
    }

    pub fn sender(&self) -> &Address {
        &self.transaction.sender
    }

    pub fn recipient(&self) -> &Address {
        &self.transaction.recipient
    }

    pub fn amount(&self) -> i64 {
        self.transaction.amount
    }

    pub fn timestamp(&self) -> u64 {
        self.transaction.timestamp
    }
}
