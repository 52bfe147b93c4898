//! Full binary Merkle tree over 32-byte leaves.
//!
//! The leaf layer is padded to the next power of two with the zero sentinel
//! so every internal node has exactly two children. The root of a single
//! leaf is that leaf itself.

use crate::error::MerkleError;
use crate::hash::SecureHash;

/// Layered Merkle tree; `layers[0]` is the padded leaf layer, the last layer
/// holds the root.
pub struct MerkleTree {
    layers: Vec<Vec<SecureHash>>,
}

impl MerkleTree {
    /// Build a tree over the given leaf hashes.
    ///
    /// Fails on an empty leaf list; there is no meaningful root for zero
    /// leaves and callers must treat the case explicitly.
    pub fn build(leaves: &[SecureHash]) -> Result<MerkleTree, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyLeaves);
        }

        let mut current: Vec<SecureHash> = leaves.to_vec();
        current.resize(leaves.len().next_power_of_two(), SecureHash::ZERO);

        let mut layers = vec![current.clone()];
        while current.len() > 1 {
            let next: Vec<SecureHash> = current
                .chunks_exact(2)
                .map(|pair| SecureHash::combine(&pair[0], &pair[1]))
                .collect();
            layers.push(next.clone());
            current = next;
        }

        Ok(MerkleTree { layers })
    }

    pub fn root(&self) -> SecureHash {
        // layers is never empty: build() rejects zero leaves
        self.layers[self.layers.len() - 1][0]
    }

    pub fn depth(&self) -> usize {
        self.layers.len() - 1
    }

    /// Number of leaves after padding.
    pub fn leaf_count(&self) -> usize {
        self.layers[0].len()
    }

    /// The padded leaf layer.
    pub fn leaves(&self) -> &[SecureHash] {
        &self.layers[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<SecureHash> {
        (0..n)
            .map(|i| SecureHash::hash(&(i as u64).to_le_bytes()))
            .collect()
    }

    #[test]
    fn test_empty_is_error() {
        assert!(matches!(
            MerkleTree::build(&[]),
            Err(MerkleError::EmptyLeaves)
        ));
    }

    #[test]
    fn test_single_leaf_root_is_leaf() {
        let l = leaves(1);
        let tree = MerkleTree::build(&l).unwrap();
        assert_eq!(tree.root(), l[0]);
        assert_eq!(tree.depth(), 0);
    }

    #[test]
    fn test_two_leaves() {
        let l = leaves(2);
        let tree = MerkleTree::build(&l).unwrap();
        assert_eq!(tree.root(), SecureHash::combine(&l[0], &l[1]));
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn test_odd_count_padded_with_zero() {
        let l = leaves(3);
        let tree = MerkleTree::build(&l).unwrap();
        assert_eq!(tree.leaf_count(), 4);
        assert_eq!(tree.leaves()[3], SecureHash::ZERO);

        let left = SecureHash::combine(&l[0], &l[1]);
        let right = SecureHash::combine(&l[2], &SecureHash::ZERO);
        assert_eq!(tree.root(), SecureHash::combine(&left, &right));
    }

    #[test]
    fn test_padding_distinguishes_counts() {
        // Three leaves and the same three plus an explicit zero leaf pad to
        // the same layer, so the roots match; a fourth distinct leaf does not.
        let mut l3 = leaves(3);
        let t3 = MerkleTree::build(&l3).unwrap();

        l3.push(SecureHash::ZERO);
        let t4 = MerkleTree::build(&l3).unwrap();
        assert_eq!(t3.root(), t4.root());

        let l4 = leaves(4);
        let t4b = MerkleTree::build(&l4).unwrap();
        assert_ne!(t3.root(), t4b.root());
    }

    #[test]
    fn test_depth_grows_logarithmically() {
        for (n, d) in [(1usize, 0usize), (2, 1), (3, 2), (4, 2), (5, 3), (8, 3), (9, 4)] {
            let tree = MerkleTree::build(&leaves(n)).unwrap();
            assert_eq!(tree.depth(), d, "depth for {} leaves", n);
        }
    }
}
