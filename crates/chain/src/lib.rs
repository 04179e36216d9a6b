//! Node orchestration for hermes.
//!
//! This crate ties the core types, consensus and storage into a running node:
//! - **Mempool**: pending signed transactions, safe for concurrent use
//! - **Chain**: accepted blocks, the tip and the balances it implies
//! - **Miner**: greedy block assembly and a cancellable nonce search
//! - **Network**: gossip messages, the broadcast seam and the peer book
//! - **Service**: admission, mining trigger, block commit and fork choice
//!
//! # Example
//!
//! ```rust,no_run
//! use hermes_chain::{BlockchainService, NodeConfig};
//! use hermes_core::{Keypair, Transaction};
//! use std::collections::BTreeMap;
//!
//! # async fn run() -> hermes_chain::Result<()> {
//! let alice = Keypair::generate();
//! let config = NodeConfig {
//!     genesis_allocation: BTreeMap::from([(alice.address(), 1_000)]),
//!     ..NodeConfig::default()
//! };
//! let node = BlockchainService::new(config).await?;
//!
//! let bob = Keypair::generate();
//! let tx = Transaction::new(alice.public_key.clone(), bob.address(), 10).sign(&alice);
//! node.add_transaction(tx)?;
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod config;
pub mod error;
pub mod mempool;
pub mod miner;
pub mod network;
pub mod service;

pub use chain::Chain;
pub use config::{ConfigError, NodeConfig, DEFAULT_BATCH_SIZE};
pub use error::{Result, ServiceError};
pub use mempool::{Mempool, MempoolError, MempoolStats};
pub use miner::{select_transactions, MiningJob};
pub use network::{
    validate_peer_address, Broadcaster, ChannelBroadcaster, Message, NetworkError,
    NoopBroadcaster, PeerBook, PeerConnector,
};
pub use service::{BlockchainService, ServiceBuilder, TipSummary};
