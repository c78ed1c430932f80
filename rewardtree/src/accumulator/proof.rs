//! Inclusion proofs.
//!
//! A [Proof] is the ordered list of sibling hashes from the leaf level up to (but not
//! including) the root. Checking it needs nothing but the leaf, the proof and the root the
//! proof was issued against, so recipients can verify against any root anchored in the past.
//! # Example
//! ```
//! use rewardtree::accumulator::leaf::{Address, Leaf, LeafEncoding};
//! use rewardtree::accumulator::tree::MerkleAccumulator;
//!
//! let leaves = (0..4)
//!     .map(|i| Leaf::new(Address::new([i as u8 + 1; 32]), 10 * i, i, i))
//!     .collect();
//! let acc = MerkleAccumulator::from_leaves(leaves, LeafEncoding::WithIndex);
//! let leaf = *acc.get_leaf(2).unwrap();
//! let proof = acc.proof(2);
//! assert!(proof.verify(&leaf, &acc.root(), LeafEncoding::WithIndex));
//! ```
#[cfg(feature = "with-serde")]
use serde::Deserialize;
#[cfg(feature = "with-serde")]
use serde::Serialize;

use super::leaf::Leaf;
use super::leaf::LeafEncoding;
use super::node_hash::NodeHash;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "with-serde", derive(Serialize, Deserialize))]
pub struct Proof {
    /// Sibling hashes, leaf level first.
    pub hashes: Vec<NodeHash>,
}

impl Proof {
    pub fn new(hashes: Vec<NodeHash>) -> Self {
        Proof { hashes }
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Folds the proof upwards starting at `leaf_hash`, which sits at position `index`.
    pub fn calculate_root(&self, leaf_hash: NodeHash, index: u64) -> NodeHash {
        let mut computed = leaf_hash;
        let mut position = index;
        for sibling in self.hashes.iter() {
            computed = if position % 2 == 0 {
                NodeHash::parent_hash(&computed, sibling)
            } else {
                NodeHash::parent_hash(sibling, &computed)
            };
            position >>= 1;
        }
        computed
    }

    /// Checks that `leaf` is committed to by `root`.
    pub fn verify(&self, leaf: &Leaf, root: &NodeHash, encoding: LeafEncoding) -> bool {
        self.calculate_root(leaf.hash(encoding), leaf.index) == *root
    }
}

impl From<Vec<NodeHash>> for Proof {
    fn from(hashes: Vec<NodeHash>) -> Self {
        Proof { hashes }
    }
}

/// Stateless check of `proof` for `leaf` against `root`.
pub fn verify(leaf: &Leaf, proof: &[NodeHash], root: &NodeHash, encoding: LeafEncoding) -> bool {
    Proof::new(proof.to_vec()).verify(leaf, root, encoding)
}
