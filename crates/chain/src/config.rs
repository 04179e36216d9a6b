//! Node configuration.

use hermes_consensus::ConsensusRule;
use hermes_core::{Address, Ledger};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Pool size that triggers mining, and the most transactions per block.
pub const DEFAULT_BATCH_SIZE: usize = 5;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("batch size must be at least 1")]
    ZeroBatchSize,

    #[error("negative genesis balance {amount} for {address}")]
    NegativeAllocation { address: Address, amount: i64 },
}

/// Everything a node needs to start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Mining starts once the pool holds this many transactions.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub consensus: ConsensusRule,
    /// Initial balances carried by the genesis block.
    #[serde(default)]
    pub genesis_allocation: BTreeMap<Address, i64>,
    /// Seed peers contacted at startup.
    #[serde(default)]
    pub peers: Vec<String>,
    /// This node's public address, never stored as a peer.
    #[serde(default)]
    pub node_address: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            consensus: ConsensusRule::default(),
            genesis_allocation: BTreeMap::new(),
            peers: Vec::new(),
            node_address: None,
        }
    }
}

impl NodeConfig {
    /// Reject settings no node can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if let Some((address, amount)) = self.genesis_allocation.iter().find(|(_, a)| **a < 0) {
            return Err(ConfigError::NegativeAllocation {
                address: *address,
                amount: *amount,
            });
        }
        Ok(())
    }

    /// Ledger the genesis block starts from.
    pub fn genesis_ledger(&self) -> Ledger {
        Ledger::from_allocation(self.genesis_allocation.iter().map(|(a, b)| (*a, *b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.consensus, ConsensusRule::default());
        assert!(config.genesis_ledger().is_empty());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: NodeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, NodeConfig::default());
    }

    #[test]
    fn test_allocation_from_json() {
        let address = Address::from_bytes([1u8; 32]);
        let json = format!(
            r#"{{"batch_size": 2, "genesis_allocation": {{"{}": 500}}, "consensus": {{"rule": "naive"}}}}"#,
            address
        );
        let config: NodeConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.batch_size, 2);
        assert_eq!(config.consensus, ConsensusRule::Naive);
        assert_eq!(config.genesis_ledger().balance(&address), 500);
    }

    #[test]
    fn test_validate() {
        assert_eq!(NodeConfig::default().validate(), Ok(()));

        let empty_batch = NodeConfig {
            batch_size: 0,
            ..NodeConfig::default()
        };
        assert_eq!(empty_batch.validate(), Err(ConfigError::ZeroBatchSize));

        let address = Address::from_bytes([2u8; 32]);
        let json = format!(r#"{{"genesis_allocation": {{"{}": -5}}}}"#, address);
        let negative: NodeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(
            negative.validate(),
            Err(ConfigError::NegativeAllocation { address, amount: -5 })
        );
    }
}
