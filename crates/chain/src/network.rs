//! Gossip messages, the broadcast seam and the peer book.
//!
//! Transport lives outside this crate. It delivers inbound [`Message`]s to
//! the service, sends whatever the service hands a [`Broadcaster`], and
//! answers peer handshakes through a [`PeerConnector`].

use hermes_core::{Block, Hash, SignedTransaction};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("invalid peer address: {0}")]
    InvalidPeerAddress(String),

    #[error("broadcast channel closed")]
    ChannelClosed,

    #[error("peer {peer} unreachable: {reason}")]
    Unreachable { peer: String, reason: String },
}

pub type Result<T> = std::result::Result<T, NetworkError>;

/// Messages exchanged between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    NewBlock { block: Block },
    NewTransaction { transaction: SignedTransaction },
    /// Ask for every block from `from_index` up to the tip.
    RequestChain { from_index: u64 },
    ChainResponse { blocks: Vec<Block> },
    TipResponse { index: u64, hash: Hash },
    MissingBlocks { blocks: Vec<Block> },
    /// The sender's pending transaction hashes.
    SyncTransactions { hashes: HashSet<Hash> },
    NewChain { blocks: Vec<Block> },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::NewBlock { .. } => "new_block",
            Message::NewTransaction { .. } => "new_transaction",
            Message::RequestChain { .. } => "request_chain",
            Message::ChainResponse { .. } => "chain_response",
            Message::TipResponse { .. } => "tip_response",
            Message::MissingBlocks { .. } => "missing_blocks",
            Message::SyncTransactions { .. } => "sync_transactions",
            Message::NewChain { .. } => "new_chain",
        }
    }
}

/// Fire-and-forget delivery to every known peer.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, message: Message) -> Result<()>;
}

/// Drops every message. Used when a node runs without peers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBroadcaster;

impl Broadcaster for NoopBroadcaster {
    fn broadcast(&self, message: Message) -> Result<()> {
        debug!(kind = message.kind(), "no transport, dropping broadcast");
        Ok(())
    }
}

/// Hands messages to a transport task over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelBroadcaster {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn broadcast(&self, message: Message) -> Result<()> {
        self.tx.send(message).map_err(|_| NetworkError::ChannelClosed)
    }
}

/// Transport hook used while discovering peers.
pub trait PeerConnector: Send + Sync {
    /// Contact `peer` and return the peers it knows about.
    fn handshake(&self, peer: &str) -> Result<Vec<String>>;
}

/// Check that an address is an `http://` or `https://` URL with a host.
pub fn validate_peer_address(address: &str) -> Result<()> {
    let invalid = || NetworkError::InvalidPeerAddress(address.to_string());
    let url = Url::parse(address).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(invalid()),
    }
}

/// Known peer addresses.
#[derive(Default)]
pub struct PeerBook {
    own_address: Option<String>,
    peers: RwLock<BTreeSet<String>>,
}

impl PeerBook {
    pub fn new(own_address: Option<String>) -> Self {
        Self {
            own_address: own_address.map(|a| normalize(&a)),
            peers: RwLock::new(BTreeSet::new()),
        }
    }

    /// Register a peer. Returns whether it was new.
    ///
    /// The node's own address is accepted but never stored.
    pub fn add(&self, address: &str) -> Result<bool> {
        validate_peer_address(address)?;
        let address = normalize(address);
        if self.own_address.as_deref() == Some(address.as_str()) {
            return Ok(false);
        }
        Ok(self.peers.write().insert(address))
    }

    pub fn contains(&self, address: &str) -> bool {
        self.peers.read().contains(&normalize(address))
    }

    pub fn peers(&self) -> BTreeSet<String> {
        self.peers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Walk `seeds` breadth-first, registering every reachable peer.
    ///
    /// Returns the newly discovered addresses in discovery order.
    pub fn connect<C>(&self, seeds: &[String], connector: &C) -> Vec<String>
    where
        C: PeerConnector + ?Sized,
    {
        let mut queue: VecDeque<String> = seeds.iter().cloned().collect();
        let mut visited = HashSet::new();
        let mut discovered = Vec::new();

        while let Some(peer) = queue.pop_front() {
            let peer = normalize(&peer);
            if !visited.insert(peer.clone()) {
                continue;
            }
            if validate_peer_address(&peer).is_err() {
                warn!(peer = %peer, "skipping invalid peer address");
                continue;
            }
            if self.own_address.as_deref() == Some(peer.as_str()) {
                continue;
            }

            let known = match connector.handshake(&peer) {
                Ok(known) => known,
                Err(e) => {
                    warn!(peer = %peer, error = %e, "peer handshake failed");
                    continue;
                }
            };
            if let Ok(true) = self.add(&peer) {
                discovered.push(peer.clone());
            }
            queue.extend(known);
        }

        info!(discovered = discovered.len(), known = self.len(), "peer discovery finished");
        discovered
    }
}

fn normalize(address: &str) -> String {
    address.trim().trim_end_matches('/').to_string()
}
