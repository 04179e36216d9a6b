//! Errors surfaced by the blockchain service.

use crate::config::ConfigError;
use crate::mempool::MempoolError;
use crate::network::NetworkError;
use hermes_consensus::ConsensusError;
use hermes_core::{Address, Hash, TransactionError};
use hermes_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),

    #[error("block rejected: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(#[from] TransactionError),

    #[error("transaction {0} is already pending or included")]
    DuplicateTransaction(Hash),

    #[error("insufficient funds: {address} has {available} but transfer requires {required}")]
    InsufficientFunds {
        address: Address,
        required: i64,
        available: i64,
    },

    #[error("invalid peer address: {0}")]
    InvalidPeerAddress(String),

    #[error("network error: {0}")]
    Network(NetworkError),

    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(#[from] StorageError),

    #[error("no tokio runtime available")]
    RuntimeUnavailable,

    #[error("mining was aborted")]
    MiningAborted,
}

impl From<MempoolError> for ServiceError {
    fn from(e: MempoolError) -> Self {
        match e {
            MempoolError::DuplicateTransaction(hash) => ServiceError::DuplicateTransaction(hash),
        }
    }
}

impl From<NetworkError> for ServiceError {
    fn from(e: NetworkError) -> Self {
        match e {
            NetworkError::InvalidPeerAddress(address) => ServiceError::InvalidPeerAddress(address),
            other => ServiceError::Network(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
