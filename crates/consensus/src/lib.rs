//! Consensus for hermes.
//!
//! - [`ConsensusRule`] decides whether a block may follow its parent
//! - [`ConsensusEngine`] adds structural, transaction and ledger checks
//!   on top of the rule and picks between competing chains
//!
//! # Example
//!
//! ```rust
//! use hermes_consensus::{ConsensusEngine, ConsensusRule, Target};
//! use hermes_core::{Block, Ledger};
//! use std::sync::atomic::AtomicBool;
//!
//! let engine = ConsensusEngine::new(ConsensusRule::ProofOfWork {
//!     target: Target::LeadingZeros { zeros: 1 },
//! });
//!
//! let genesis = Block::genesis(Ledger::new())
//!     .mine(|h| engine.accepts_hash(h), &AtomicBool::new(false))
//!     .unwrap();
//!
//! engine.validate_block(&genesis, None).unwrap();
//! ```

pub mod engine;
pub mod error;
pub mod rule;

pub use engine::{ChainView, ConsensusEngine};
pub use error::{ConsensusError, Result};
pub use rule::{ConsensusRule, Target};
