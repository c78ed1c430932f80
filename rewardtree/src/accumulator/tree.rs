//! A full binary Merkle tree over a campaign's reward leaves.
//!
//! [MerkleAccumulator] keeps every leaf and every level of hashes in memory. Level 0 holds the
//! leaf hashes, each following level is half as long, and the last level holds only the
//! root. The leaf count is kept at a power of two by padding with placeholder leaves, so
//! levels always pair up evenly. Amount changes touch a single path per leaf, and a batch
//! of changes rehashes each affected node exactly once.
//!
//! Nothing in here is fallible: indexes outside the tree are ignored and reported through
//! the return value. Only [MerkleAccumulator::deserialize] can fail, and it does so on any
//! input that would not rebuild to the tree it was taken from.
//! # Example
//! ```
//! use rewardtree::accumulator::leaf::{Address, Leaf, LeafEncoding};
//! use rewardtree::accumulator::tree::MerkleAccumulator;
//!
//! let launcher = Leaf::new(Address::new([7; 32]), 1_000, 42, 0);
//! let mut acc = MerkleAccumulator::from_leaves(vec![launcher], LeafEncoding::WithIndex);
//! acc.expand(32);
//! assert_eq!(acc.len(), 32);
//!
//! let before = acc.root();
//! assert!(acc.update_leaf(0, 900));
//! assert_ne!(acc.root(), before);
//! ```
use std::collections::BTreeSet;
use std::io::Error;
use std::io::ErrorKind;

use log::debug;
use log::warn;
use rand::rngs::StdRng;
use rand::SeedableRng;
#[cfg(feature = "with-serde")]
use serde::Deserialize;
#[cfg(feature = "with-serde")]
use serde::Serialize;

use super::leaf::Address;
use super::leaf::Leaf;
use super::leaf::LeafEncoding;
use super::leaf::LEAF_BYTES;
use super::node_hash::NodeHash;
use super::proof::Proof;
use super::util::padded_size;
use super::util::tree_height;

/// A change to a single leaf, applied through [MerkleAccumulator::apply].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafUpdate {
    pub index: u64,
    pub amount: u64,
    /// New owner and nonce. Only honoured when the slot is still a placeholder.
    pub occupant: Option<(Address, u64)>,
}

impl LeafUpdate {
    /// Overwrite the claimable amount of an existing slot.
    pub fn amount(index: u64, amount: u64) -> Self {
        LeafUpdate {
            index,
            amount,
            occupant: None,
        }
    }

    /// Hand the placeholder at `index` to `address`.
    pub fn assign(index: u64, address: Address, amount: u64, nonce: u64) -> Self {
        LeafUpdate {
            index,
            amount,
            occupant: Some((address, nonce)),
        }
    }
}

/// The persisted form of an accumulator: its leaves and the encoding they are hashed with.
/// Hash levels are never stored, they are rebuilt on load.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "with-serde", derive(Serialize, Deserialize))]
pub struct LeafSet {
    pub encoding: LeafEncoding,
    pub leaves: Vec<Leaf>,
}

#[derive(Debug, Clone)]
pub struct MerkleAccumulator {
    leaves: Vec<Leaf>,
    /// `layers[0]` are the leaf hashes, the last layer is `[root]`.
    layers: Vec<Vec<NodeHash>>,
    encoding: LeafEncoding,
    /// Source of placeholder nonces.
    rng: StdRng,
}

impl Default for MerkleAccumulator {
    fn default() -> Self {
        MerkleAccumulator::new(LeafEncoding::default())
    }
}

impl MerkleAccumulator {
    /// An accumulator without leaves. Its root is [NodeHash::zero].
    pub fn new(encoding: LeafEncoding) -> Self {
        MerkleAccumulator {
            leaves: Vec::new(),
            layers: Vec::new(),
            encoding,
            rng: StdRng::from_entropy(),
        }
    }

    /// Draws placeholder nonces from a seeded generator, making padding reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Builds a tree over `leaves`. See [MerkleAccumulator::build].
    pub fn from_leaves(leaves: Vec<Leaf>, encoding: LeafEncoding) -> Self {
        let mut acc = MerkleAccumulator::new(encoding);
        acc.build(leaves);
        acc
    }

    /// Replaces the whole leaf set and rebuilds every level.
    ///
    /// Leaves are placed in the order given and their `index` is set to that position. The
    /// set is padded with placeholders up to the next power of two.
    pub fn build(&mut self, leaves: Vec<Leaf>) {
        self.leaves = leaves;
        for (position, leaf) in self.leaves.iter_mut().enumerate() {
            if leaf.index != position as u64 {
                warn!(
                    "leaf {} supplied with index {}, reindexing",
                    position, leaf.index
                );
                leaf.index = position as u64;
            }
        }
        self.rebuild();
    }

    pub fn encoding(&self) -> LeafEncoding {
        self.encoding
    }

    /// Number of leaves, placeholders included. Always zero or a power of two.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Number of levels, leaf level and root level included.
    pub fn height(&self) -> usize {
        self.layers.len()
    }

    /// The root of the tree, or [NodeHash::zero] if there are no leaves.
    pub fn root(&self) -> NodeHash {
        self.layers
            .last()
            .and_then(|top| top.first())
            .copied()
            .unwrap_or_else(NodeHash::zero)
    }

    pub fn get_leaf(&self, index: u64) -> Option<&Leaf> {
        self.leaves.get(usize::try_from(index).ok()?)
    }

    /// Level 0 hash of the leaf at `index`.
    pub fn leaf_hash(&self, index: u64) -> Option<NodeHash> {
        let index = usize::try_from(index).ok()?;
        self.layers.first()?.get(index).copied()
    }

    /// The first real leaf owned by `address`. Placeholders are never returned.
    pub fn leaf_by_address(&self, address: &Address) -> Option<&Leaf> {
        if address.is_sentinel() {
            return None;
        }
        self.leaves.iter().find(|leaf| leaf.address == *address)
    }

    pub fn leaves(&self) -> &[Leaf] {
        &self.leaves
    }

    /// `(index, amount)` of every real leaf with something left to claim, in index order.
    /// This is the reward array the ledger program stores next to the root.
    pub fn participants_update(&self) -> Vec<(u64, u64)> {
        self.leaves
            .iter()
            .filter(|leaf| !leaf.is_placeholder() && leaf.amount > 0)
            .map(|leaf| (leaf.index, leaf.amount))
            .collect()
    }

    /// Sibling hashes needed to recompute the root from the leaf at `index`, leaf level
    /// first. Empty if `index` is out of range.
    pub fn proof(&self, index: u64) -> Proof {
        let Some(mut position) = self.position(index) else {
            return Proof::default();
        };
        let mut hashes = Vec::with_capacity(self.height().saturating_sub(1));
        for layer in self.layers.iter().take(self.height().saturating_sub(1)) {
            let sibling = position ^ 1;
            if let Some(hash) = layer.get(sibling) {
                hashes.push(*hash);
            }
            position >>= 1;
        }
        Proof::new(hashes)
    }

    /// Checks `proof` for `leaf` against `root` using this accumulator's leaf encoding. Does
    /// not look at the current tree, so proofs for older roots can be checked as well.
    pub fn verify(&self, leaf: &Leaf, proof: &Proof, root: &NodeHash) -> bool {
        proof.verify(leaf, root, self.encoding)
    }

    /// Sets the amount of the leaf at `index` and rehashes its path to the root. Returns
    /// false, leaving the tree untouched, if `index` is out of range.
    pub fn update_leaf(&mut self, index: u64, amount: u64) -> bool {
        let Some(position) = self.position(index) else {
            return false;
        };
        self.leaves[position].amount = amount;
        self.layers[0][position] = self.leaves[position].hash(self.encoding);

        let mut child = position;
        for level in 0..self.height() - 1 {
            let parent = child / 2;
            self.layers[level + 1][parent] = self.parent_of(level, parent);
            child = parent;
        }
        true
    }

    /// Sets the amount of several leaves at once. See [MerkleAccumulator::apply].
    pub fn batch_update(&mut self, updates: &[(u64, u64)]) -> usize {
        let updates: Vec<LeafUpdate> = updates
            .iter()
            .map(|&(index, amount)| LeafUpdate::amount(index, amount))
            .collect();
        self.apply(&updates)
    }

    /// Converts the placeholder at `index` into a leaf owned by `address`. Returns false if
    /// the index is out of range or the slot is already taken.
    pub fn assign(&mut self, index: u64, address: Address, amount: u64, nonce: u64) -> bool {
        let taken = self
            .get_leaf(index)
            .map_or(true, |leaf| !leaf.is_placeholder());
        if taken {
            return false;
        }
        self.apply(&[LeafUpdate::assign(index, address, amount, nonce)]) > 0
    }

    /// Applies every update to its leaf, then walks up one level at a time recomputing the
    /// set of parents of whatever changed below. A node with two changed children is
    /// hashed once, so the whole batch costs at most one hash per touched node.
    ///
    /// Updates outside the tree, and occupant changes on slots that are not placeholders,
    /// are skipped. Returns how many nodes were rehashed, leaves included; zero means the
    /// tree was not touched.
    pub fn apply(&mut self, updates: &[LeafUpdate]) -> usize {
        let mut dirty = BTreeSet::new();
        for update in updates {
            let Some(position) = self.position(update.index) else {
                warn!("ignoring update for leaf {} out of range", update.index);
                continue;
            };
            let leaf = &mut self.leaves[position];
            if let Some((address, nonce)) = update.occupant {
                if !leaf.is_placeholder() {
                    warn!("leaf {} is already assigned to {}", update.index, leaf.address);
                    continue;
                }
                leaf.address = address;
                leaf.nonce = nonce;
            }
            leaf.amount = update.amount;
            dirty.insert(position);
        }
        if dirty.is_empty() {
            return 0;
        }

        for &position in dirty.iter() {
            self.layers[0][position] = self.leaves[position].hash(self.encoding);
        }
        let mut rehashed = dirty.len();

        for level in 0..self.height() - 1 {
            let parents: BTreeSet<usize> = dirty.iter().map(|child| child / 2).collect();
            for &parent in parents.iter() {
                self.layers[level + 1][parent] = self.parent_of(level, parent);
            }
            rehashed += parents.len();
            dirty = parents;
        }
        rehashed
    }

    /// Appends `leaf` at the next free index, whatever index it carries, and rebuilds the
    /// tree. Returns the index it landed on.
    pub fn add_leaf(&mut self, mut leaf: Leaf) -> u64 {
        let index = self.leaves.len() as u64;
        leaf.index = index;
        self.leaves.push(leaf);
        self.rebuild();
        index
    }

    /// Grows the tree to hold at least `new_size` leaves, rounded up to a power of two, by
    /// appending placeholders. Existing leaves keep their index. Returns false if the tree
    /// is already big enough, or if no power of two that large fits in a `usize`.
    pub fn expand(&mut self, new_size: usize) -> bool {
        let Some(target) = padded_size(new_size) else {
            warn!("cannot expand accumulator to {new_size} leaves");
            return false;
        };
        if target <= self.leaves.len() {
            return false;
        }
        debug!("expanding accumulator from {} to {} leaves", self.len(), target);
        self.pad_to(target);
        self.rebuild();
        true
    }

    /// Snapshot of the leaves, the only state that needs to be persisted.
    pub fn to_leaf_set(&self) -> LeafSet {
        LeafSet {
            encoding: self.encoding,
            leaves: self.leaves.clone(),
        }
    }

    /// Rebuilds an accumulator from a snapshot, rejecting sets that are not exactly what
    /// [MerkleAccumulator::to_leaf_set] produces.
    pub fn from_leaf_set(set: LeafSet) -> std::io::Result<Self> {
        validate_leaves(&set.leaves)?;
        let mut acc = MerkleAccumulator::new(set.encoding);
        acc.leaves = set.leaves;
        acc.rebuild();
        Ok(acc)
    }

    /// Writes the leaf encoding tag, the leaf count and every leaf.
    pub fn serialize<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: std::io::Write,
    {
        writer.write_all(&[self.encoding.tag()])?;
        writer.write_all(&(self.leaves.len() as u64).to_le_bytes())?;
        for leaf in self.leaves.iter() {
            leaf.write(writer)?;
        }
        Ok(())
    }

    /// Reads what [MerkleAccumulator::serialize] wrote and rebuilds every level.
    pub fn deserialize<R>(reader: &mut R) -> std::io::Result<Self>
    where
        R: std::io::Read,
    {
        let mut tag = [0];
        reader.read_exact(&mut tag)?;
        let encoding = LeafEncoding::from_tag(tag[0])
            .ok_or_else(|| Error::new(ErrorKind::InvalidData, "unknown leaf encoding tag"))?;

        let mut count = [0; 8];
        reader.read_exact(&mut count)?;
        let count = u64::from_le_bytes(count);
        let count = usize::try_from(count)
            .map_err(|_| Error::new(ErrorKind::InvalidData, "leaf count too large"))?;

        // Don't trust the count for the allocation, a corrupt header would ask for anything.
        let mut leaves = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            leaves.push(Leaf::read(reader)?);
        }
        let mut trailing = [0];
        if reader.read(&mut trailing)? != 0 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "trailing bytes after leaf set",
            ));
        }
        Self::from_leaf_set(LeafSet { encoding, leaves })
    }

    /// Serialized size in bytes of an accumulator holding `leaves` leaves.
    pub fn serialized_size(leaves: usize) -> usize {
        1 + 8 + leaves * LEAF_BYTES
    }

    fn position(&self, index: u64) -> Option<usize> {
        let position = usize::try_from(index).ok()?;
        (position < self.leaves.len() && !self.layers.is_empty()).then_some(position)
    }

    /// Hash of node `parent` on level `level + 1`, from its children on `level`. A missing
    /// right child is replaced by the left one.
    fn parent_of(&self, level: usize, parent: usize) -> NodeHash {
        let layer = &self.layers[level];
        let left = &layer[parent * 2];
        let right = layer.get(parent * 2 + 1).unwrap_or(left);
        NodeHash::parent_hash(left, right)
    }

    fn pad_to(&mut self, size: usize) {
        while self.leaves.len() < size {
            let index = self.leaves.len() as u64;
            self.leaves.push(Leaf::placeholder(index, &mut self.rng));
        }
    }

    fn rebuild(&mut self) {
        self.layers.clear();
        if self.leaves.is_empty() {
            return;
        }
        if let Some(size) = padded_size(self.leaves.len()) {
            self.pad_to(size);
        }
        self.layers.reserve(tree_height(self.leaves.len()));

        let mut current: Vec<NodeHash> = self
            .leaves
            .iter()
            .map(|leaf| leaf.hash(self.encoding))
            .collect();
        while current.len() > 1 {
            let next = current
                .chunks(2)
                .map(|pair| NodeHash::parent_hash(&pair[0], pair.get(1).unwrap_or(&pair[0])))
                .collect();
            self.layers.push(current);
            current = next;
        }
        self.layers.push(current);
        debug!(
            "rebuilt accumulator with {} leaves, root {}",
            self.leaves.len(),
            self.root()
        );
    }
}

fn validate_leaves(leaves: &[Leaf]) -> std::io::Result<()> {
    if !leaves.is_empty() && !leaves.len().is_power_of_two() {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("leaf count {} is not a power of two", leaves.len()),
        ));
    }
    for (position, leaf) in leaves.iter().enumerate() {
        if leaf.index != position as u64 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("leaf at position {} has index {}", position, leaf.index),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use rand::Rng;

    use super::*;

    const LAUNCHER: Address = Address::new([0xA1; 32]);

    /// Leaf 0 is the launcher with 1000, the rest are placeholders with nonce `100 + i`.
    fn campaign_leaves() -> Vec<Leaf> {
        let mut leaves = vec![Leaf::new(LAUNCHER, 1000, 7, 0)];
        for i in 1..32 {
            leaves.push(Leaf::new(Address::SENTINEL, 0, 100 + i, i));
        }
        leaves
    }

    fn campaign() -> MerkleAccumulator {
        MerkleAccumulator::from_leaves(campaign_leaves(), LeafEncoding::WithIndex)
    }

    /// Root computed straight from the leaves, without any incremental state.
    fn naive_root(leaves: &[Leaf], encoding: LeafEncoding) -> NodeHash {
        let mut level: Vec<NodeHash> = leaves.iter().map(|l| l.hash(encoding)).collect();
        while level.len() > 1 {
            level = level
                .chunks(2)
                .map(|p| NodeHash::parent_hash(&p[0], p.get(1).unwrap_or(&p[0])))
                .collect();
        }
        level[0]
    }

    #[test]
    fn test_empty_accumulator() {
        let mut acc = MerkleAccumulator::default();
        assert!(acc.is_empty());
        assert_eq!(acc.root(), NodeHash::zero());
        assert_eq!(acc.height(), 0);
        assert!(acc.proof(0).is_empty());
        assert!(!acc.update_leaf(0, 1));
        assert_eq!(acc.batch_update(&[(0, 1)]), 0);
        assert_eq!(acc.root(), NodeHash::zero());
    }

    #[test]
    fn test_single_leaf_root_is_leaf_hash() {
        let leaf = Leaf::new(LAUNCHER, 5, 1, 0);
        let acc = MerkleAccumulator::from_leaves(vec![leaf], LeafEncoding::WithIndex);
        assert_eq!(acc.len(), 1);
        assert_eq!(acc.height(), 1);
        assert_eq!(acc.root(), leaf.hash(LeafEncoding::WithIndex));
        assert!(acc.proof(0).is_empty());
    }

    #[test]
    fn test_build_pads_to_power_of_two() {
        let leaves = (0..5)
            .map(|i| Leaf::new(Address::new([i as u8 + 1; 32]), i, i, i))
            .collect();
        let mut acc = MerkleAccumulator::new(LeafEncoding::WithIndex).with_seed(3);
        acc.build(leaves);
        assert_eq!(acc.len(), 8);
        assert_eq!(acc.height(), 4);
        for (position, leaf) in acc.leaves().iter().enumerate() {
            assert_eq!(leaf.index, position as u64);
        }
        assert!(acc.leaves()[5..].iter().all(|l| l.is_placeholder() && l.amount == 0));
        assert_eq!(acc.root(), naive_root(acc.leaves(), LeafEncoding::WithIndex));
    }

    #[test]
    fn test_build_reindexes_leaves() {
        let leaves = vec![
            Leaf::new(LAUNCHER, 1, 1, 9),
            Leaf::new(Address::new([2; 32]), 2, 2, 9),
        ];
        let acc = MerkleAccumulator::from_leaves(leaves, LeafEncoding::WithIndex);
        assert_eq!(acc.get_leaf(0).unwrap().index, 0);
        assert_eq!(acc.get_leaf(1).unwrap().index, 1);
    }

    #[test]
    fn test_campaign_scenario() {
        let mut acc = campaign();
        assert_eq!(acc.len(), 32);
        assert_eq!(acc.height(), 6);
        let root = acc.root();
        assert_eq!(root, campaign().root());
        assert_eq!(root, naive_root(&campaign_leaves(), LeafEncoding::WithIndex));

        let proof_5 = acc.proof(5);
        assert_eq!(proof_5.len(), 5);

        assert!(acc.update_leaf(0, 900));
        let after_update = acc.root();
        assert_ne!(after_update, root);
        // leaves 0 and 5 meet at level 3, so only the sibling covering leaves 0..4 moved
        let proof_5_after = acc.proof(5);
        assert_eq!(proof_5_after.hashes[..2], proof_5.hashes[..2]);
        assert_ne!(proof_5_after.hashes[2], proof_5.hashes[2]);
        assert_eq!(proof_5_after.hashes[3..], proof_5.hashes[3..]);
        assert!(proof_5_after.verify(acc.get_leaf(5).unwrap(), &after_update, acc.encoding()));

        let before_batch: Vec<NodeHash> = (0..32).map(|i| acc.leaf_hash(i).unwrap()).collect();
        let rehashed = acc.batch_update(&[(1, 50), (2, 50)]);
        // two leaves, their two parents, then a single shared path to the root
        assert_eq!(rehashed, 2 + 2 + 1 + 1 + 1 + 1);
        for i in 0..32u64 {
            let now = acc.leaf_hash(i).unwrap();
            if i == 1 || i == 2 {
                assert_ne!(now, before_batch[i as usize]);
            } else {
                assert_eq!(now, before_batch[i as usize]);
            }
        }
        let mut expected = campaign_leaves();
        expected[0].amount = 900;
        expected[1].amount = 50;
        expected[2].amount = 50;
        assert_eq!(acc.root(), naive_root(&expected, LeafEncoding::WithIndex));
    }

    #[test]
    fn test_proof_for_every_leaf_verifies() {
        let acc = campaign();
        let root = acc.root();
        for leaf in acc.leaves() {
            let proof = acc.proof(leaf.index);
            assert_eq!(proof.len(), 5);
            assert!(acc.verify(leaf, &proof, &root));
        }
    }

    #[test]
    fn test_proof_out_of_range() {
        let acc = campaign();
        assert!(acc.proof(32).is_empty());
        assert!(acc.proof(u64::MAX).is_empty());
        assert!(acc.get_leaf(32).is_none());
        assert!(acc.leaf_hash(32).is_none());
    }

    #[test]
    fn test_single_bit_flips_fail_verification() {
        let acc = campaign();
        let root = acc.root();
        let leaf = *acc.get_leaf(0).unwrap();
        let proof = acc.proof(0);
        assert!(acc.verify(&leaf, &proof, &root));

        for bit in 0..64 {
            let mut amount = leaf;
            amount.amount ^= 1 << bit;
            assert!(!acc.verify(&amount, &proof, &root));

            let mut nonce = leaf;
            nonce.nonce ^= 1 << bit;
            assert!(!acc.verify(&nonce, &proof, &root));
        }
        for bit in 0..256 {
            let mut bytes = *leaf.address.as_bytes();
            bytes[bit / 8] ^= 1 << (bit % 8);
            let mut address = leaf;
            address.address = Address::new(bytes);
            assert!(!acc.verify(&address, &proof, &root));
        }
    }

    #[test]
    fn test_proof_against_past_root() {
        let mut acc = campaign();
        let old_root = acc.root();
        let old_leaf = *acc.get_leaf(3).unwrap();
        let old_proof = acc.proof(3);
        acc.update_leaf(3, 77);
        assert!(acc.verify(&old_leaf, &old_proof, &old_root));
        assert!(!acc.verify(&old_leaf, &old_proof, &acc.root()));
    }

    #[test]
    fn test_update_out_of_range_is_noop() {
        let mut acc = campaign();
        let root = acc.root();
        assert!(!acc.update_leaf(32, 1));
        assert!(!acc.update_leaf(u64::MAX, 1));
        assert_eq!(acc.root(), root);
        assert_eq!(acc.batch_update(&[(40, 1), (99, 2)]), 0);
        assert_eq!(acc.batch_update(&[]), 0);
        assert_eq!(acc.root(), root);
    }

    #[test]
    fn test_update_leaf_only_touches_its_path() {
        let mut acc = campaign();
        let before: Vec<NodeHash> = (0..32).map(|i| acc.leaf_hash(i).unwrap()).collect();
        acc.update_leaf(17, 123);
        for i in 0..32u64 {
            let now = acc.leaf_hash(i).unwrap();
            assert_eq!(now == before[i as usize], i != 17);
        }
        let mut expected = campaign_leaves();
        expected[17].amount = 123;
        assert_eq!(acc.root(), naive_root(&expected, LeafEncoding::WithIndex));
    }

    #[test]
    fn test_batch_matches_sequential_updates() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..20 {
            let updates: Vec<(u64, u64)> = (0..rng.gen_range(1..40))
                .map(|_| (rng.gen_range(0..36), rng.gen_range(0..10_000)))
                .collect();
            let mut sequential = campaign();
            for &(index, amount) in updates.iter() {
                sequential.update_leaf(index, amount);
            }
            let mut batched = campaign();
            batched.batch_update(&updates);
            assert_eq!(sequential.root(), batched.root());
            assert_eq!(sequential.leaves(), batched.leaves());
        }
    }

    #[test]
    fn test_batch_rehashes_each_node_once() {
        let mut acc = campaign();
        let all: Vec<(u64, u64)> = (0..32).map(|i| (i, i * 2)).collect();
        // 32 + 16 + 8 + 4 + 2 + 1, every node exactly once
        assert_eq!(acc.batch_update(&all), 63);
        // duplicates collapse onto the same leaf, last write wins
        assert_eq!(acc.batch_update(&[(4, 1), (4, 2)]), 6);
        assert_eq!(acc.get_leaf(4).unwrap().amount, 2);
    }

    #[test]
    fn test_assign_placeholder() {
        let mut acc = campaign();
        let alice = Address::new([0xB2; 32]);
        assert!(acc.assign(1, alice, 300, 55));
        let leaf = *acc.get_leaf(1).unwrap();
        assert_eq!(leaf, Leaf::new(alice, 300, 55, 1));
        assert_eq!(acc.leaf_by_address(&alice), Some(&leaf));
        assert!(acc.verify(&leaf, &acc.proof(1), &acc.root()));

        // taken slots and out of range slots are refused
        let root = acc.root();
        assert!(!acc.assign(1, Address::new([0xC3; 32]), 1, 1));
        assert!(!acc.assign(0, Address::new([0xC3; 32]), 1, 1));
        assert!(!acc.assign(64, Address::new([0xC3; 32]), 1, 1));
        assert_eq!(acc.root(), root);
    }

    #[test]
    fn test_apply_mixed_batch() {
        let mut acc = campaign();
        let bob = Address::new([0xB0; 32]);
        let applied = acc.apply(&[
            LeafUpdate::amount(0, 10),
            LeafUpdate::assign(1, bob, 20, 9),
            LeafUpdate::assign(0, bob, 20, 9),
            LeafUpdate::amount(100, 1),
        ]);
        assert!(applied > 0);
        assert_eq!(acc.get_leaf(0).unwrap().address, LAUNCHER);
        assert_eq!(acc.get_leaf(0).unwrap().amount, 10);
        assert_eq!(acc.get_leaf(1).unwrap().address, bob);
        assert_eq!(acc.root(), naive_root(acc.leaves(), LeafEncoding::WithIndex));
    }

    #[test]
    fn test_leaf_by_address_ignores_placeholders() {
        let acc = campaign();
        assert_eq!(acc.leaf_by_address(&LAUNCHER).unwrap().index, 0);
        assert!(acc.leaf_by_address(&Address::SENTINEL).is_none());
        assert!(acc.leaf_by_address(&Address::new([0xEE; 32])).is_none());
    }

    #[test]
    fn test_participants_update() {
        let mut acc = campaign();
        acc.assign(1, Address::new([0xB2; 32]), 300, 1);
        acc.assign(2, Address::new([0xB3; 32]), 0, 2);
        acc.update_leaf(5, 999); // placeholder amounts are not participants
        assert_eq!(acc.participants_update(), vec![(0, 1000), (1, 300)]);
    }

    #[test]
    fn test_add_leaf_appends_and_rebuilds() {
        let mut acc = campaign().with_seed(5);
        let carol = Address::new([0xCC; 32]);
        let index = acc.add_leaf(Leaf::new(carol, 40, 4, 3));
        assert_eq!(index, 32);
        assert_eq!(acc.len(), 64);
        assert_eq!(acc.height(), 7);
        let leaf = *acc.get_leaf(32).unwrap();
        assert_eq!(leaf.address, carol);
        assert_eq!(leaf.index, 32);
        assert!(acc.leaves()[33..].iter().all(Leaf::is_placeholder));
        assert!(acc.verify(&leaf, &acc.proof(32), &acc.root()));
        assert_eq!(acc.root(), naive_root(acc.leaves(), LeafEncoding::WithIndex));
    }

    #[test]
    fn test_expand_rounds_up_and_keeps_proofs_valid() {
        let mut acc = campaign().with_seed(9);
        let original: Vec<Leaf> = acc.leaves().to_vec();
        assert!(!acc.expand(32));
        assert!(!acc.expand(10));

        assert!(acc.expand(132));
        assert_eq!(acc.len(), 256);
        assert_eq!(acc.height(), 9);
        assert_eq!(&acc.leaves()[..32], original.as_slice());
        let root = acc.root();
        for leaf in original.iter() {
            assert!(acc.verify(leaf, &acc.proof(leaf.index), &root));
        }
        assert!(acc.leaves()[32..].iter().all(Leaf::is_placeholder));
    }

    #[test]
    fn test_expand_empty() {
        let mut acc = MerkleAccumulator::default();
        assert!(!acc.expand(0));
        assert!(acc.expand(3));
        assert_eq!(acc.len(), 4);
        assert_ne!(acc.root(), NodeHash::zero());
    }

    #[test]
    fn test_expand_beyond_usize_is_ignored() {
        let mut acc = campaign();
        let root = acc.root();
        assert!(!acc.expand(usize::MAX));
        assert_eq!(acc.len(), 32);
        assert_eq!(acc.root(), root);
    }

    #[test]
    fn test_seeded_padding_is_reproducible() {
        let leaves = vec![Leaf::new(LAUNCHER, 1, 1, 0)];
        let mut a = MerkleAccumulator::new(LeafEncoding::WithIndex).with_seed(1);
        let mut b = MerkleAccumulator::new(LeafEncoding::WithIndex).with_seed(1);
        a.build(leaves.clone());
        b.build(leaves);
        a.expand(32);
        b.expand(32);
        assert_eq!(a.root(), b.root());
    }

    #[test]
    fn test_encodings_give_different_roots() {
        let with = MerkleAccumulator::from_leaves(campaign_leaves(), LeafEncoding::WithIndex);
        let without =
            MerkleAccumulator::from_leaves(campaign_leaves(), LeafEncoding::WithoutIndex);
        assert_ne!(with.root(), without.root());
        let leaf = *without.get_leaf(0).unwrap();
        assert!(without.verify(&leaf, &without.proof(0), &without.root()));
        assert!(!with.verify(&leaf, &without.proof(0), &without.root()));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut acc = campaign();
        acc.batch_update(&[(0, 1), (9, 2)]);
        let mut buf = Vec::new();
        acc.serialize(&mut buf).unwrap();
        assert_eq!(buf.len(), MerkleAccumulator::serialized_size(32));

        let restored = MerkleAccumulator::deserialize(&mut buf.as_slice()).unwrap();
        assert_eq!(restored.root(), acc.root());
        assert_eq!(restored.leaves(), acc.leaves());
        assert_eq!(restored.encoding(), acc.encoding());

        let empty = MerkleAccumulator::new(LeafEncoding::WithoutIndex);
        let mut buf = Vec::new();
        empty.serialize(&mut buf).unwrap();
        let restored = MerkleAccumulator::deserialize(&mut buf.as_slice()).unwrap();
        assert!(restored.is_empty());
        assert_eq!(restored.encoding(), LeafEncoding::WithoutIndex);
    }

    #[test]
    fn test_deserialize_rejects_malformed_input() {
        let acc = campaign();
        let mut good = Vec::new();
        acc.serialize(&mut good).unwrap();

        // truncated
        let short = &good[..good.len() - 1];
        assert!(MerkleAccumulator::deserialize(&mut &short[..]).is_err());

        // trailing garbage
        let mut long = good.clone();
        long.push(0);
        assert!(MerkleAccumulator::deserialize(&mut long.as_slice()).is_err());

        // unknown encoding
        let mut tag = good.clone();
        tag[0] = 9;
        assert!(MerkleAccumulator::deserialize(&mut tag.as_slice()).is_err());

        // index of the first leaf no longer matches its position
        let mut index = good.clone();
        let first_index = 1 + 8 + 32 + 8 + 8;
        index[first_index] = 1;
        let err = MerkleAccumulator::deserialize(&mut index.as_slice()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);

        // leaf count not a power of two
        let three = LeafSet {
            encoding: LeafEncoding::WithIndex,
            leaves: campaign_leaves()[..3].to_vec(),
        };
        assert!(MerkleAccumulator::from_leaf_set(three).is_err());
    }

    #[test]
    fn test_leaf_set_roundtrip() {
        let mut acc = campaign();
        acc.assign(4, Address::new([4; 32]), 44, 4);
        let restored = MerkleAccumulator::from_leaf_set(acc.to_leaf_set()).unwrap();
        assert_eq!(restored.root(), acc.root());
    }

    #[cfg(feature = "with-serde")]
    #[test]
    fn test_leaf_set_json() {
        let acc = campaign();
        let json = serde_json::to_string(&acc.to_leaf_set()).unwrap();
        assert!(json.contains("\"encoding\":\"with-index\""));
        assert!(json.contains(&LAUNCHER.to_string()));
        let set: LeafSet = serde_json::from_str(&json).unwrap();
        assert_eq!(MerkleAccumulator::from_leaf_set(set).unwrap().root(), acc.root());

        let bad = json.replace(&LAUNCHER.to_string(), "not-base58!");
        assert!(serde_json::from_str::<LeafSet>(&bad).is_err());
    }

    #[test]
    fn test_odd_level_duplicates_last_node() {
        let mut acc = campaign();
        // Shape the tree by hand into an odd leaf count, only reachable from inside.
        acc.leaves.truncate(3);
        acc.rebuild_without_padding();
        let hashes: Vec<NodeHash> = acc.leaves.iter().map(|l| l.hash(acc.encoding)).collect();
        let left = NodeHash::parent_hash(&hashes[0], &hashes[1]);
        let right = NodeHash::parent_hash(&hashes[2], &hashes[2]);
        assert_eq!(acc.root(), NodeHash::parent_hash(&left, &right));

        // the missing sibling is left out of the proof, not substituted
        assert_eq!(acc.proof(2).hashes, vec![left]);

        assert!(acc.update_leaf(2, 5));
        let updated = acc.leaves[2].hash(acc.encoding);
        let right = NodeHash::parent_hash(&updated, &updated);
        assert_eq!(acc.root(), NodeHash::parent_hash(&left, &right));
    }

    impl MerkleAccumulator {
        fn rebuild_without_padding(&mut self) {
            self.layers.clear();
            let mut current: Vec<NodeHash> =
                self.leaves.iter().map(|l| l.hash(self.encoding)).collect();
            while current.len() > 1 {
                let next = current
                    .chunks(2)
                    .map(|p| NodeHash::parent_hash(&p[0], p.get(1).unwrap_or(&p[0])))
                    .collect();
                self.layers.push(current);
                current = next;
            }
            self.layers.push(current);
        }
    }
}
