//! Accepted blocks and the tip.
//!
//! `Chain` stores blocks but does not validate them; callers run the
//! consensus engine first and hold the service's commit lock across
//! validation and [`Chain::append`].

use hermes_consensus::ChainView;
use hermes_core::{Address, Block, Hash, Ledger};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    /// Blocks indexed by hash.
    blocks: HashMap<Hash, Arc<Block>>,
    /// Block hashes ordered by index; the last one is the tip.
    order: Vec<Hash>,
    /// Envelope hashes of every included transaction.
    transactions: HashSet<Hash>,
}

impl Inner {
    fn push(&mut self, block: Block) -> Arc<Block> {
        let block = Arc::new(block);
        self.transactions
            .extend(block.transactions.iter().map(|tx| tx.hash));
        self.order.push(block.hash);
        self.blocks.insert(block.hash, Arc::clone(&block));
        block
    }

    fn tip(&self) -> Option<&Arc<Block>> {
        self.order.last().and_then(|h| self.blocks.get(h))
    }
}

/// Concurrent map of accepted blocks with a cached tip.
#[derive(Default)]
pub struct Chain {
    inner: RwLock<Inner>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a chain from index-ordered, already validated blocks.
    pub fn from_blocks<I>(blocks: I) -> Self
    where
        I: IntoIterator<Item = Block>,
    {
        let chain = Self::new();
        {
            let mut inner = chain.inner.write();
            for block in blocks {
                inner.push(block);
            }
        }
        chain
    }

    /// Append a validated successor of the current tip.
    pub fn append(&self, block: Block) -> Arc<Block> {
        let mut inner = self.inner.write();
        debug_assert_eq!(block.index as usize, inner.order.len());
        inner.push(block)
    }

    /// Swap the whole chain for validated, index-ordered blocks.
    pub fn replace(&self, blocks: Vec<Block>) {
        let mut fresh = Inner::default();
        for block in blocks {
            fresh.push(block);
        }
        *self.inner.write() = fresh;
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().order.is_empty()
    }

    /// The highest-index block.
    pub fn tip(&self) -> Option<Arc<Block>> {
        self.inner.read().tip().cloned()
    }

    /// Index and hash of the tip.
    pub fn tip_summary(&self) -> Option<(u64, Hash)> {
        self.inner.read().tip().map(|b| (b.index, b.hash))
    }

    pub fn block(&self, hash: &Hash) -> Option<Arc<Block>> {
        self.inner.read().blocks.get(hash).cloned()
    }

    pub fn block_at(&self, index: u64) -> Option<Arc<Block>> {
        let inner = self.inner.read();
        let hash = inner.order.get(usize::try_from(index).ok()?)?;
        inner.blocks.get(hash).cloned()
    }

    /// All blocks ordered by index.
    pub fn blocks(&self) -> Vec<Arc<Block>> {
        self.range_from(0)
    }

    /// Blocks from `index` up to the tip.
    pub fn range_from(&self, index: u64) -> Vec<Arc<Block>> {
        let inner = self.inner.read();
        let start = usize::try_from(index).unwrap_or(usize::MAX);
        inner
            .order
            .iter()
            .skip(start)
            .filter_map(|h| inner.blocks.get(h).cloned())
            .collect()
    }

    /// Owned copies of the blocks from `index`, for the wire and for storage.
    pub fn to_vec_from(&self, index: u64) -> Vec<Block> {
        self.range_from(index)
            .into_iter()
            .map(|b| (*b).clone())
            .collect()
    }

    /// Balances implied by the tip.
    pub fn ledger(&self) -> Ledger {
        self.inner
            .read()
            .tip()
            .map(|b| b.ledger.clone())
            .unwrap_or_default()
    }

    pub fn balance(&self, address: &Address) -> i64 {
        self.inner
            .read()
            .tip()
            .map(|b| b.ledger.balance(address))
            .unwrap_or(0)
    }
}

impl ChainView for Chain {
    fn len(&self) -> usize {
        Chain::len(self)
    }

    fn contains_block(&self, hash: &Hash) -> bool {
        self.inner.read().blocks.contains_key(hash)
    }

    fn contains_transaction(&self, hash: &Hash) -> bool {
        self.inner.read().transactions.contains(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_core::{Keypair, Transaction};

    fn sample(len: usize) -> (Keypair, Vec<Block>) {
        let keypair = Keypair::generate();
        let mut blocks = vec![Block::genesis(Ledger::from_allocation([(keypair.address(), 100)]))];
        while blocks.len() < len {
            let parent = blocks.last().unwrap();
            let amount = blocks.len() as i64;
            let tx = Transaction::new(keypair.public_key.clone(), Address::from_bytes([5u8; 32]), amount)
                .sign(&keypair);
            let ledger = parent.ledger.replay([&tx]).unwrap();
            let block = Block::next(parent, vec![tx], ledger);
            blocks.push(block);
        }
        (keypair, blocks)
    }

    #[test]
    fn test_empty_chain() {
        let chain = Chain::new();
        assert!(chain.is_empty());
        assert!(chain.tip().is_none());
        assert_eq!(chain.tip_summary(), None);
        assert_eq!(chain.balance(&Address::ZERO), 0);
    }

    #[test]
    fn test_append_moves_tip() {
        let (keypair, blocks) = sample(3);
        let chain = Chain::new();
        for block in blocks.clone() {
            chain.append(block);
        }

        assert_eq!(chain.len(), 3);
        assert_eq!(chain.tip_summary(), Some((2, blocks[2].hash)));
        assert_eq!(chain.balance(&keypair.address()), 97);
        assert_eq!(chain.block_at(1).unwrap().hash, blocks[1].hash);
        assert_eq!(chain.block(&blocks[0].hash).unwrap().index, 0);
        assert!(chain.block_at(3).is_none());
    }

    #[test]
    fn test_transaction_index() {
        let (_, blocks) = sample(2);
        let included = blocks[1].transactions[0].hash;
        let chain = Chain::from_blocks(blocks);

        assert!(chain.contains_transaction(&included));
        assert!(!chain.contains_transaction(&Hash::ZERO));
    }

    #[test]
    fn test_range_from() {
        let (_, blocks) = sample(4);
        let chain = Chain::from_blocks(blocks);

        let indices: Vec<u64> = chain.range_from(2).iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![2, 3]);
        assert!(chain.range_from(10).is_empty());
        assert_eq!(chain.blocks().len(), 4);
        assert_eq!(chain.to_vec_from(3)[0].index, 3);
    }

    #[test]
    fn test_replace_rebuilds_indexes() {
        let (_, old) = sample(3);
        let (_, new) = sample(2);
        let dropped_tx = old[2].transactions[0].hash;
        let chain = Chain::from_blocks(old.clone());

        chain.replace(new.clone());
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.tip_summary(), Some((1, new[1].hash)));
        assert!(!chain.contains_block(&old[2].hash));
        assert!(!chain.contains_transaction(&dropped_tx));
    }
}
