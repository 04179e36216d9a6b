//! Merkle root aggregation over transaction hashes.

use crate::hash::{sha256, sha256_concat, Hash};

/// Combine two sibling hashes into their parent.
///
/// The parent is `sha256(sha256(left ∥ right))`, where both hashes are
/// concatenated in their hex rendering and the inner digest is re-hashed in
/// its hex rendering as well. Every historical block hash depends on this.
fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let inner = sha256_concat(&[&left.to_hex(), &right.to_hex()]);
    sha256(inner.to_hex().as_bytes())
}

/// Compute the merkle root of a list of hashes.
///
/// Returns `None` for an empty list, which stands for the empty root.
/// Otherwise levels are paired (the last hash is duplicated on odd levels)
/// until a single hash remains; a single leaf still goes through one round.
pub fn merkle_root(hashes: &[Hash]) -> Option<Hash> {
    if hashes.is_empty() {
        return None;
    }

    let mut current_level: Vec<Hash> = hashes.to_vec();

    loop {
        let mut next_level = Vec::with_capacity(current_level.len().div_ceil(2));

        for chunk in current_level.chunks(2) {
            let combined = if chunk.len() == 2 {
                hash_pair(&chunk[0], &chunk[1])
            } else {
                hash_pair(&chunk[0], &chunk[0])
            };
            next_level.push(combined);
        }

        current_level = next_level;
        if current_level.len() == 1 {
            return Some(current_level[0]);
        }
    }
}

/// Hex rendering of a merkle root, the empty string for no transactions.
pub fn merkle_root_hex(root: Option<&Hash>) -> String {
    root.map(Hash::to_hex).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_hashes(n: usize) -> Vec<Hash> {
        (0..n).map(|i| sha256(&[i as u8])).collect()
    }

    fn double(input: String) -> Hash {
        sha256(sha256(input.as_bytes()).to_hex().as_bytes())
    }

    #[test]
    fn test_merkle_root_empty() {
        assert_eq!(merkle_root(&[]), None);
        assert_eq!(merkle_root_hex(None), "");
    }

    #[test]
    fn test_merkle_root_single_is_paired_with_itself() {
        let hashes = make_hashes(1);
        let h = hashes[0].to_hex();
        assert_eq!(merkle_root(&hashes), Some(double(format!("{h}{h}"))));
    }

    #[test]
    fn test_merkle_root_two() {
        let hashes = make_hashes(2);
        let expected = double(format!("{}{}", hashes[0], hashes[1]));
        assert_eq!(merkle_root(&hashes), Some(expected));
    }

    #[test]
    fn test_merkle_root_three_duplicates_last() {
        let hashes = make_hashes(3);
        let left = double(format!("{}{}", hashes[0], hashes[1]));
        let right = double(format!("{}{}", hashes[2], hashes[2]));
        let expected = double(format!("{left}{right}"));
        assert_eq!(merkle_root(&hashes), Some(expected));
    }

    #[test]
    fn test_merkle_root_deterministic() {
        let hashes = make_hashes(10);
        assert_eq!(merkle_root(&hashes), merkle_root(&hashes));
    }

    #[test]
    fn test_merkle_root_order_matters() {
        let hashes = make_hashes(2);
        let swapped = vec![hashes[1], hashes[0]];
        assert_ne!(merkle_root(&hashes), merkle_root(&swapped));
    }
}
