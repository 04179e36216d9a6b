//! Block acceptance rules.
//!
//! A rule is a flat enum so the whole set can be audited in one `match`:
//! - `Naive` checks index, parent link and timestamp order only.
//! - `ProofOfWork` adds a hash target on top of the naive checks.

use crate::error::{ConsensusError, Result};
use hermes_core::{Block, Hash};
use serde::{Deserialize, Serialize};

/// The difficulty predicate a sealed block hash must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    /// The hex rendering starts with at least `zeros` `'0'` characters.
    LeadingZeros { zeros: usize },
    /// The hash, read as a big-endian integer, is strictly below `max`.
    Threshold { max: Hash },
}

impl Target {
    /// Whether `hash` meets this target.
    pub fn is_met_by(&self, hash: &Hash) -> bool {
        match self {
            Target::LeadingZeros { zeros } => hash.leading_hex_zeros() >= *zeros,
            Target::Threshold { max } => hash.as_bytes() < max.as_bytes(),
        }
    }
}

impl Default for Target {
    fn default() -> Self {
        Target::LeadingZeros { zeros: 1 }
    }
}

/// Consensus rule selected at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ConsensusRule {
    Naive,
    ProofOfWork { target: Target },
}

impl Default for ConsensusRule {
    fn default() -> Self {
        ConsensusRule::ProofOfWork {
            target: Target::default(),
        }
    }
}

impl ConsensusRule {
    /// Validate `block` as the successor of `previous` (or as genesis).
    pub fn validate(&self, block: &Block, previous: Option<&Block>) -> Result<()> {
        match self {
            ConsensusRule::Naive => validate_link(block, previous),
            ConsensusRule::ProofOfWork { target } => {
                validate_link(block, previous)?;
                if !target.is_met_by(&block.hash) {
                    return Err(ConsensusError::ProofOfWorkFailed {
                        hash: block.hash,
                        nonce: block.nonce,
                    });
                }
                Ok(())
            }
        }
    }

    /// Whether a hash would pass this rule's sealing requirement.
    pub fn accepts_hash(&self, hash: &Hash) -> bool {
        match self {
            ConsensusRule::Naive => true,
            ConsensusRule::ProofOfWork { target } => target.is_met_by(hash),
        }
    }
}

/// Index, parent-hash and timestamp ordering.
fn validate_link(block: &Block, previous: Option<&Block>) -> Result<()> {
    match previous {
        Some(parent) => {
            if block.index != parent.index + 1 {
                return Err(ConsensusError::InvalidIndex {
                    expected: parent.index + 1,
                    got: block.index,
                });
            }
            if block.previous_hash != Some(parent.hash) {
                return Err(ConsensusError::InvalidPreviousHash {
                    expected: parent.hash,
                    got: block.previous_hash,
                });
            }
            if block.timestamp < parent.timestamp {
                return Err(ConsensusError::InvalidTimestamp {
                    block: block.timestamp,
                    parent: parent.timestamp,
                });
            }
        }
        None => {
            if block.index != 0 {
                return Err(ConsensusError::InvalidIndex {
                    expected: 0,
                    got: block.index,
                });
            }
        }
    }
    Ok(())
}
