//! Off-chain mirror of a campaign's reward Merkle tree.
//!
//! Roots computed here are anchored on the ledger, which recomputes them from the same leaf
//! encoding and checks recipients' proofs on its own. Both sides have to hash identically,
//! see [accumulator::leaf::LeafEncoding].
pub mod accumulator;

pub use accumulator::leaf::Address;
pub use accumulator::leaf::Leaf;
pub use accumulator::leaf::LeafEncoding;
pub use accumulator::node_hash::NodeHash;
pub use accumulator::proof::Proof;
pub use accumulator::tree::LeafSet;
pub use accumulator::tree::LeafUpdate;
pub use accumulator::tree::MerkleAccumulator;
