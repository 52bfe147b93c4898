//! Partial Merkle trees: the minimal subtree authenticating a chosen set of
//! leaves against a known root.
//!
//! Subtrees containing no revealed leaf collapse to a single sibling hash.
//! The wire encoding is the pre-order traversal of the structure with one
//! tag byte per node and the 32-byte hash embedded at each leaf position.

use crate::hash::SecureHash;
use crate::tree::MerkleTree;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use thiserror::Error;

const TAG_NODE: u8 = 0;
const TAG_INCLUDED: u8 = 1;
const TAG_SIBLING: u8 = 2;

/// Decoding a partial tree never recurses deeper than this; a well-formed
/// proof over 2^64 leaves is already impossible.
const MAX_DECODE_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartialProofError {
    #[error("proof bytes truncated")]
    Truncated,
    #[error("unknown node tag {0}")]
    BadTag(u8),
    #[error("trailing bytes after proof")]
    TrailingBytes,
    #[error("proof nesting exceeds maximum depth")]
    TooDeep,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum PartialNode {
    /// A revealed leaf; the verifier recomputes this hash from disclosed
    /// component bytes and nonce.
    IncludedLeaf(SecureHash),
    /// Sibling hash summarizing a subtree with no revealed leaves.
    Sibling(SecureHash),
    Node {
        left: Box<PartialNode>,
        right: Box<PartialNode>,
    },
}

impl PartialNode {
    fn hash(&self) -> SecureHash {
        match self {
            PartialNode::IncludedLeaf(h) | PartialNode::Sibling(h) => *h,
            PartialNode::Node { left, right } => SecureHash::combine(&left.hash(), &right.hash()),
        }
    }

    fn collect_included(&self, out: &mut Vec<SecureHash>) {
        match self {
            PartialNode::IncludedLeaf(h) => out.push(*h),
            PartialNode::Sibling(_) => {}
            PartialNode::Node { left, right } => {
                left.collect_included(out);
                right.collect_included(out);
            }
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            PartialNode::Node { left, right } => {
                out.push(TAG_NODE);
                left.encode(out);
                right.encode(out);
            }
            PartialNode::IncludedLeaf(h) => {
                out.push(TAG_INCLUDED);
                out.extend_from_slice(&h.0);
            }
            PartialNode::Sibling(h) => {
                out.push(TAG_SIBLING);
                out.extend_from_slice(&h.0);
            }
        }
    }

    fn decode(bytes: &[u8], offset: &mut usize, depth: usize) -> Result<PartialNode, PartialProofError> {
        if depth > MAX_DECODE_DEPTH {
            return Err(PartialProofError::TooDeep);
        }
        let tag = *bytes.get(*offset).ok_or(PartialProofError::Truncated)?;
        *offset += 1;
        match tag {
            TAG_NODE => {
                let left = PartialNode::decode(bytes, offset, depth + 1)?;
                let right = PartialNode::decode(bytes, offset, depth + 1)?;
                Ok(PartialNode::Node {
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            TAG_INCLUDED | TAG_SIBLING => {
                let end = *offset + 32;
                let slice = bytes.get(*offset..end).ok_or(PartialProofError::Truncated)?;
                *offset = end;
                let mut arr = [0u8; 32];
                arr.copy_from_slice(slice);
                let h = SecureHash(arr);
                Ok(if tag == TAG_INCLUDED {
                    PartialNode::IncludedLeaf(h)
                } else {
                    PartialNode::Sibling(h)
                })
            }
            other => Err(PartialProofError::BadTag(other)),
        }
    }
}

/// Minimal subtree containing a set of revealed leaves plus the sibling
/// hashes along their paths to the root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartialMerkleTree {
    root: PartialNode,
}

impl PartialMerkleTree {
    /// Carve the partial tree for `included` leaf hashes out of a full tree.
    ///
    /// Leaves not present in the tree are silently ignored; an `included`
    /// set disjoint from the tree yields a proof with no revealed leaves.
    pub fn build(tree: &MerkleTree, included: &BTreeSet<SecureHash>) -> PartialMerkleTree {
        fn walk(leaves: &[SecureHash], included: &BTreeSet<SecureHash>) -> (PartialNode, bool) {
            if leaves.len() == 1 {
                let h = leaves[0];
                return if included.contains(&h) {
                    (PartialNode::IncludedLeaf(h), true)
                } else {
                    (PartialNode::Sibling(h), false)
                };
            }
            let mid = leaves.len() / 2;
            let (left, left_in) = walk(&leaves[..mid], included);
            let (right, right_in) = walk(&leaves[mid..], included);
            if left_in || right_in {
                (
                    PartialNode::Node {
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    true,
                )
            } else {
                let collapsed = SecureHash::combine(&left.hash(), &right.hash());
                (PartialNode::Sibling(collapsed), false)
            }
        }

        let (root, _) = walk(tree.leaves(), included);
        PartialMerkleTree { root }
    }

    /// Recompute the root committed to by this proof.
    pub fn root(&self) -> SecureHash {
        self.root.hash()
    }

    /// The revealed leaf hashes in leaf order.
    pub fn included_leaves(&self) -> Vec<SecureHash> {
        let mut out = Vec::new();
        self.root.collect_included(&mut out);
        out
    }

    /// Check this proof against an expected root and the expected revealed
    /// leaves in order.
    pub fn verify(&self, expected_root: &SecureHash, expected_leaves: &[SecureHash]) -> bool {
        self.root() == *expected_root && self.included_leaves() == expected_leaves
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.root.encode(&mut out);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<PartialMerkleTree, PartialProofError> {
        let mut offset = 0;
        let root = PartialNode::decode(bytes, &mut offset, 0)?;
        if offset != bytes.len() {
            return Err(PartialProofError::TrailingBytes);
        }
        Ok(PartialMerkleTree { root })
    }
}

impl Serialize for PartialMerkleTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.encode())
    }
}

impl<'de> Deserialize<'de> for PartialMerkleTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        PartialMerkleTree::decode(&bytes).map_err(D::Error::custom)
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

    fn included(l: &[SecureHash], idx: &[usize]) -> BTreeSet<SecureHash> {
        idx.iter().map(|&i| l[i]).collect()
    }

    #[test]
    fn test_single_included_leaf() {
        let l = leaves(8);
        let tree = MerkleTree::build(&l).unwrap();
        let pmt = PartialMerkleTree::build(&tree, &included(&l, &[3]));

        assert_eq!(pmt.root(), tree.root());
        assert_eq!(pmt.included_leaves(), vec![l[3]]);
        assert!(pmt.verify(&tree.root(), &[l[3]]));
    }

    #[test]
    fn test_multiple_included_in_leaf_order() {
        let l = leaves(8);
        let tree = MerkleTree::build(&l).unwrap();
        // Insertion order into the set does not matter; traversal order does.
        let pmt = PartialMerkleTree::build(&tree, &included(&l, &[6, 0, 3]));

        assert_eq!(pmt.included_leaves(), vec![l[0], l[3], l[6]]);
        assert!(pmt.verify(&tree.root(), &[l[0], l[3], l[6]]));
    }

    #[test]
    fn test_all_leaves_included() {
        let l = leaves(4);
        let tree = MerkleTree::build(&l).unwrap();
        let pmt = PartialMerkleTree::build(&tree, &l.iter().copied().collect());
        assert!(pmt.verify(&tree.root(), &l));
    }

    #[test]
    fn test_none_included_collapses_to_root() {
        let l = leaves(8);
        let tree = MerkleTree::build(&l).unwrap();
        let pmt = PartialMerkleTree::build(&tree, &BTreeSet::new());

        assert_eq!(pmt.root(), tree.root());
        assert!(pmt.included_leaves().is_empty());
        // Fully collapsed: one sibling node, 33 encoded bytes
        assert_eq!(pmt.encode().len(), 33);
    }

    #[test]
    fn test_wrong_root_rejected() {
        let l = leaves(8);
        let tree = MerkleTree::build(&l).unwrap();
        let pmt = PartialMerkleTree::build(&tree, &included(&l, &[1]));
        assert!(!pmt.verify(&SecureHash::hash(b"other"), &[l[1]]));
    }

    #[test]
    fn test_wrong_leaves_rejected() {
        let l = leaves(8);
        let tree = MerkleTree::build(&l).unwrap();
        let pmt = PartialMerkleTree::build(&tree, &included(&l, &[1]));
        assert!(!pmt.verify(&tree.root(), &[l[2]]));
        assert!(!pmt.verify(&tree.root(), &[]));
    }

    #[test]
    fn test_padded_tree_proof() {
        // 5 leaves pad to 8; proofs over the padded shape still verify.
        let l = leaves(5);
        let tree = MerkleTree::build(&l).unwrap();
        let pmt = PartialMerkleTree::build(&tree, &included(&l, &[4]));
        assert!(pmt.verify(&tree.root(), &[l[4]]));
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let l = leaves(8);
        let tree = MerkleTree::build(&l).unwrap();
        let pmt = PartialMerkleTree::build(&tree, &included(&l, &[0, 5, 7]));

        let decoded = PartialMerkleTree::decode(&pmt.encode()).unwrap();
        assert_eq!(decoded, pmt);
        assert_eq!(decoded.root(), tree.root());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            PartialMerkleTree::decode(&[]),
            Err(PartialProofError::Truncated)
        ));
        assert!(matches!(
            PartialMerkleTree::decode(&[9]),
            Err(PartialProofError::BadTag(9))
        ));
        let mut valid = {
            let l = leaves(2);
            let tree = MerkleTree::build(&l).unwrap();
            PartialMerkleTree::build(&tree, &included(&l, &[0])).encode()
        };
        valid.push(0xaa);
        assert!(matches!(
            PartialMerkleTree::decode(&valid),
            Err(PartialProofError::TrailingBytes)
        ));
    }

    #[test]
    fn test_decode_depth_limit() {
        // A long chain of left-nested nodes must be rejected, not overflow.
        let mut bytes = vec![TAG_NODE; MAX_DECODE_DEPTH + 2];
        bytes.push(TAG_SIBLING);
        bytes.extend_from_slice(&[0u8; 32]);
        assert!(matches!(
            PartialMerkleTree::decode(&bytes),
            Err(PartialProofError::TooDeep)
        ));
    }

    #[test]
    fn test_forged_leaf_changes_root() {
        let l = leaves(4);
        let tree = MerkleTree::build(&l).unwrap();
        let pmt = PartialMerkleTree::build(&tree, &included(&l, &[2]));

        // Tamper with the included leaf inside the encoding.
        let mut bytes = pmt.encode();
        let pos = bytes
            .iter()
            .position(|&b| b == TAG_INCLUDED)
            .expect("included tag present");
        bytes[pos + 1] ^= 0xff;
        let forged = PartialMerkleTree::decode(&bytes).unwrap();
        assert_ne!(forged.root(), tree.root());
    }
}
