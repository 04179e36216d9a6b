//! Block admission and fork choice.

use crate::error::{ConsensusError, Result};
use crate::rule::ConsensusRule;
use hermes_core::{Block, Hash};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Read access to an accepted chain, as far as consensus needs it.
pub trait ChainView {
    /// Number of blocks, genesis included.
    fn len(&self) -> usize;

    /// Whether a block with this hash is part of the chain.
    fn contains_block(&self, hash: &Hash) -> bool;

    /// Whether a transaction with this envelope hash is already included.
    fn contains_transaction(&self, hash: &Hash) -> bool;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChainView for [Block] {
    fn len(&self) -> usize {
        <[Block]>::len(self)
    }

    fn contains_block(&self, hash: &Hash) -> bool {
        self.iter().any(|b| b.hash == *hash)
    }

    fn contains_transaction(&self, hash: &Hash) -> bool {
        self.iter()
            .flat_map(|b| b.transactions.iter())
            .any(|tx| tx.hash == *hash)
    }
}

/// Validates candidate blocks and decides chain replacement.
#[derive(Debug, Clone, Default)]
pub struct ConsensusEngine {
    rule: ConsensusRule,
}

impl ConsensusEngine {
    pub fn new(rule: ConsensusRule) -> Self {
        Self { rule }
    }

    pub fn rule(&self) -> &ConsensusRule {
        &self.rule
    }

    /// Apply the active rule to `block` as the successor of `previous`.
    pub fn validate(&self, block: &Block, previous: Option<&Block>) -> Result<()> {
        self.rule.validate(block, previous)
    }

    /// Structural self-checks followed by the active rule.
    pub fn validate_block(&self, block: &Block, previous: Option<&Block>) -> Result<()> {
        block.validate_structure()?;
        self.validate(block, previous)
    }

    /// Whether a freshly computed hash would seal a block under this rule.
    pub fn accepts_hash(&self, hash: &Hash) -> bool {
        self.rule.accepts_hash(hash)
    }

    /// Reject a block already present in `chain`.
    pub fn check_not_duplicate<C>(&self, block: &Block, chain: &C) -> Result<()>
    where
        C: ChainView + ?Sized,
    {
        if chain.contains_block(&block.hash) {
            return Err(ConsensusError::DuplicateBlock(block.hash));
        }
        Ok(())
    }

    /// Validate the transactions of a non-genesis block against its parent.
    ///
    /// Every transaction must be individually valid and new, and the block's
    /// ledger must equal the parent's ledger with the transfers replayed.
    pub fn validate_transactions<F>(&self, block: &Block, parent: &Block, included: F) -> Result<()>
    where
        F: Fn(&Hash) -> bool,
    {
        let mut seen = HashSet::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            if !seen.insert(tx.hash) || included(&tx.hash) {
                return Err(ConsensusError::DuplicateTransaction(tx.hash));
            }
            tx.validate()
                .map_err(|source| ConsensusError::InvalidTransaction {
                    hash: tx.hash,
                    source,
                })?;
        }

        let replayed = parent.ledger.replay(&block.transactions)?;
        if replayed != block.ledger {
            return Err(ConsensusError::LedgerMismatch(block.index));
        }
        Ok(())
    }

    /// Validate an index-ordered chain from genesis to tip.
    pub fn validate_chain(&self, blocks: &[Block]) -> Result<()> {
        if blocks.is_empty() {
            return Err(ConsensusError::EmptyChain);
        }

        let mut included = HashSet::new();
        let mut previous: Option<&Block> = None;
        for block in blocks {
            self.validate_block(block, previous)?;
            if let Some(parent) = previous {
                self.validate_transactions(block, parent, |h| included.contains(h))?;
            }
            included.extend(block.transactions.iter().map(|tx| tx.hash));
            previous = Some(block);
        }

        debug!(blocks = blocks.len(), "validated chain");
        Ok(())
    }

    /// Whether `candidate` should replace `current`.
    ///
    /// The candidate must validate block by block and be strictly longer.
    pub fn should_replace_chain<C>(&self, current: &C, candidate: &[Block]) -> bool
    where
        C: ChainView + ?Sized,
    {
        if let Err(e) = self.validate_chain(candidate) {
            warn!(error = %e, "rejecting invalid candidate chain");
            return false;
        }

        let replace = candidate.len() > current.len();
        info!(
            current = current.len(),
            candidate = candidate.len(),
            replace,
            "evaluated candidate chain"
        );
        replace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Target;
    use hermes_core::{Address, Keypair, Ledger, SignedTransaction, Transaction};
    use std::sync::atomic::AtomicBool;

    fn engine() -> ConsensusEngine {
        ConsensusEngine::default()
    }

    fn mine(engine: &ConsensusEngine, block: Block) -> Block {
        block
            .mine(|h| engine.accepts_hash(h), &AtomicBool::new(false))
            .unwrap()
    }

    fn pay(from: &Keypair, amount: i64) -> SignedTransaction {
        Transaction::new(from.public_key.clone(), Address::from_bytes([7u8; 32]), amount)
            .sign(from)
    }

    /// A valid chain of `len` blocks funded by `keypair`.
    fn build_chain(engine: &ConsensusEngine, keypair: &Keypair, len: usize) -> Vec<Block> {
        let genesis = mine(
            engine,
            Block::genesis(Ledger::from_allocation([(keypair.address(), 1_000)])),
        );
        let mut chain = vec![genesis];
        while chain.len() < len {
            let parent = chain.last().unwrap();
            // Distinct amounts keep transaction hashes unique within a chain.
            let txs = vec![pay(keypair, 10 + chain.len() as i64)];
            let ledger = parent.ledger.replay(&txs).unwrap();
            let block = mine(engine, Block::next(parent, txs, ledger));
            chain.push(block);
        }
        chain
    }

    #[test]
    fn test_mined_block_passes_validation() {
        let engine = engine();
        let keypair = Keypair::generate();
        let chain = build_chain(&engine, &keypair, 2);

        assert!(engine.validate_block(&chain[0], None).is_ok());
        assert!(engine.validate_block(&chain[1], Some(&chain[0])).is_ok());
    }

    #[test]
    fn test_duplicate_block_detected() {
        let engine = engine();
        let chain = build_chain(&engine, &Keypair::generate(), 2);
        assert!(matches!(
            engine.check_not_duplicate(&chain[1], chain.as_slice()),
            Err(ConsensusError::DuplicateBlock(_))
        ));
    }

    #[test]
    fn test_forged_ledger_rejected() {
        let engine = engine();
        let keypair = Keypair::generate();
        let chain = build_chain(&engine, &keypair, 1);

        let txs = vec![pay(&keypair, 10)];
        let mut forged = chain[0].ledger.replay(&txs).unwrap();
        forged.apply_delta(&keypair.address(), 1_000_000);
        let block = mine(&engine, Block::next(&chain[0], txs, forged));

        assert_eq!(
            engine.validate_transactions(&block, &chain[0], |_| false),
            Err(ConsensusError::LedgerMismatch(1))
        );
    }

    #[test]
    fn test_overdraw_rejected() {
        let engine = engine();
        let keypair = Keypair::generate();
        let chain = build_chain(&engine, &keypair, 1);

        let block = mine(
            &engine,
            Block::next(&chain[0], vec![pay(&keypair, 5_000)], Ledger::new()),
        );
        assert!(matches!(
            engine.validate_transactions(&block, &chain[0], |_| false),
            Err(ConsensusError::InsufficientFunds(_))
        ));
    }

    #[test]
    fn test_replayed_transaction_rejected() {
        let engine = engine();
        let keypair = Keypair::generate();
        let chain = build_chain(&engine, &keypair, 2);
        let replayed = chain[1].transactions.clone();
        let ledger = chain[1].ledger.replay(&replayed).unwrap();
        let block = mine(&engine, Block::next(&chain[1], replayed, ledger));

        let mut candidate = chain.clone();
        candidate.push(block);
        assert!(matches!(
            engine.validate_chain(&candidate),
            Err(ConsensusError::DuplicateTransaction(_))
        ));
    }

    #[test]
    fn test_longer_valid_chain_replaces() {
        let engine = engine();
        let keypair = Keypair::generate();
        let current = build_chain(&engine, &keypair, 2);
        let candidate = build_chain(&engine, &keypair, 3);

        assert!(engine.should_replace_chain(current.as_slice(), &candidate));
    }

    #[test]
    fn test_equal_or_shorter_chain_kept() {
        let engine = engine();
        let keypair = Keypair::generate();
        let current = build_chain(&engine, &keypair, 3);

        let equal = build_chain(&engine, &keypair, 3);
        let shorter = build_chain(&engine, &keypair, 2);
        assert!(!engine.should_replace_chain(current.as_slice(), &equal));
        assert!(!engine.should_replace_chain(current.as_slice(), &shorter));
    }

    #[test]
    fn test_invalid_longer_chain_kept() {
        let engine = engine();
        let keypair = Keypair::generate();
        let current = build_chain(&engine, &keypair, 2);

        let mut candidate = build_chain(&engine, &keypair, 4);
        candidate[2].timestamp += 1;
        assert!(!engine.should_replace_chain(current.as_slice(), &candidate));

        assert!(!engine.should_replace_chain(current.as_slice(), &[]));
    }

    #[test]
    fn test_unsealed_chain_rejected_under_pow() {
        let strict = ConsensusEngine::new(ConsensusRule::ProofOfWork {
            target: Target::LeadingZeros { zeros: 64 },
        });
        let chain = build_chain(&ConsensusEngine::new(ConsensusRule::Naive), &Keypair::generate(), 1);
        assert!(matches!(
            strict.validate_chain(&chain),
            Err(ConsensusError::ProofOfWorkFailed { .. })
        ));
    }
}
