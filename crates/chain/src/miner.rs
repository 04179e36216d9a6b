//! Block assembly and the background nonce search.

use hermes_consensus::ConsensusEngine;
use hermes_core::{Block, Hash, Ledger, SignedTransaction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Greedily pick up to `limit` transactions that the ledger can cover.
///
/// Candidates are simulated in order against a clone of `ledger`; a
/// transaction that would overdraw its sender is skipped, not rejected.
/// Returns the selection and the ledger after applying it.
pub fn select_transactions(
    ledger: &Ledger,
    candidates: Vec<SignedTransaction>,
    limit: usize,
) -> (Vec<SignedTransaction>, Ledger) {
    let mut working = ledger.clone();
    let mut selected = Vec::with_capacity(limit);

    for tx in candidates {
        if selected.len() >= limit {
            break;
        }
        match working.apply(&tx) {
            Ok(()) => selected.push(tx),
            Err(e) => warn!(tx = %tx.hash, error = %e, "skipping transaction for this block"),
        }
    }

    (selected, working)
}

/// A running nonce search bound to the tip it extends.
#[derive(Debug, Clone)]
pub struct MiningJob {
    tip: Hash,
    cancel: Arc<AtomicBool>,
}

impl MiningJob {
    pub fn new(tip: Hash) -> Self {
        Self {
            tip,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Hash of the block being extended.
    pub fn tip(&self) -> Hash {
        self.tip
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Whether both handles refer to the same job.
    pub fn same_job(&self, other: &MiningJob) -> bool {
        Arc::ptr_eq(&self.cancel, &other.cancel)
    }

    /// Cancel the job if the chain has moved away from its tip.
    pub fn cancel_if_stale(&self, new_tip: &Hash) {
        if self.tip != *new_tip && !self.is_cancelled() {
            debug!(tip = %self.tip, new_tip = %new_tip, "cancelling stale mining job");
            self.cancel();
        }
    }

    /// Search nonces for `block` on the blocking pool.
    ///
    /// Resolves to `None` when the job is cancelled.
    pub async fn run(&self, engine: ConsensusEngine, block: Block) -> Option<Block> {
        let cancel = Arc::clone(&self.cancel);
        let search = tokio::task::spawn_blocking(move || {
            block.mine(|h| engine.accepts_hash(h), &cancel)
        });
        match search.await {
            Ok(mined) => mined,
            Err(e) => {
                warn!(error = %e, "mining task failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_core::{Address, Keypair, Transaction};

    fn pay(from: &Keypair, amount: i64, timestamp: u64) -> SignedTransaction {
        Transaction::with_timestamp(from.public_key.clone(), Address::from_bytes([8u8; 32]), amount, timestamp)
            .sign(from)
    }

    #[test]
    fn test_select_skips_overdraw() {
        let alice = Keypair::generate();
        let ledger = Ledger::from_allocation([(alice.address(), 25)]);
        let candidates = vec![pay(&alice, 10, 1), pay(&alice, 20, 2), pay(&alice, 15, 3)];

        let (selected, after) = select_transactions(&ledger, candidates.clone(), 5);
        assert_eq!(selected, vec![candidates[0].clone(), candidates[2].clone()]);
        assert_eq!(after.balance(&alice.address()), 0);
        // The committed ledger is untouched.
        assert_eq!(ledger.balance(&alice.address()), 25);
    }

    #[test]
    fn test_select_stops_at_limit() {
        let alice = Keypair::generate();
        let ledger = Ledger::from_allocation([(alice.address(), 100)]);
        let candidates: Vec<_> = (1..=7).map(|t| pay(&alice, 1, t)).collect();

        let (selected, _) = select_transactions(&ledger, candidates, 5);
        assert_eq!(selected.len(), 5);
    }

    #[test]
    fn test_cancel_if_stale() {
        let job = MiningJob::new(Hash([1u8; 32]));
        job.cancel_if_stale(&Hash([1u8; 32]));
        assert!(!job.is_cancelled());
        job.cancel_if_stale(&Hash([2u8; 32]));
        assert!(job.is_cancelled());

        let copy = job.clone();
        assert!(copy.same_job(&job));
        assert!(!MiningJob::new(Hash::ZERO).same_job(&job));
    }

    #[tokio::test]
    async fn test_run_produces_accepted_block() {
        let engine = ConsensusEngine::default();
        let genesis = Block::genesis(Ledger::new());
        let job = MiningJob::new(Hash::ZERO);

        let mined = job.run(engine.clone(), genesis).await.unwrap();
        assert!(engine.validate_block(&mined, None).is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_run_returns_none() {
        let job = MiningJob::new(Hash::ZERO);
        job.cancel();
        let engine = ConsensusEngine::new(hermes_consensus::ConsensusRule::ProofOfWork {
            target: hermes_consensus::Target::LeadingZeros { zeros: 64 },
        });
        assert!(job.run(engine, Block::genesis(Ledger::new())).await.is_none());
    }
}
