//! The reward accumulator: leaves, hashes, the tree itself and its inclusion proofs.
pub mod leaf;
pub mod node_hash;
pub mod proof;
pub mod tree;
pub mod util;
