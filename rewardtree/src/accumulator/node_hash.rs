//! [NodeHash] is the type for every hash stored in the reward accumulator. It's just a
//! wrapper around [[u8; 32]] with hex formatting and the node combining function.
//! # Examples
//! Building from a str
//! ```
//! use std::str::FromStr;
//!
//! use rewardtree::accumulator::node_hash::NodeHash;
//! let hash =
//!     NodeHash::from_str("0000000000000000000000000000000000000000000000000000000000000000")
//!         .unwrap();
//! assert_eq!(hash, NodeHash::zero());
//! ```
//!
//! Computing a parent hash (i.e a hash of two nodes concatenated)
//! ```
//! use std::str::FromStr;
//!
//! use rewardtree::accumulator::node_hash::NodeHash;
//! let left = NodeHash::new([0; 32]);
//! let right = NodeHash::new([1; 32]);
//! let parent = NodeHash::parent_hash(&left, &right);
//! let expected_parent =
//!     NodeHash::from_str("5c85955f709283ecce2b74f1b1552918819f390911816e7bb466805a38ab87f3")
//!         .unwrap();
//! assert_eq!(parent, expected_parent);
//! ```
use std::fmt::Debug;
use std::fmt::Display;
use std::ops::Deref;
use std::str::FromStr;

#[cfg(feature = "with-serde")]
use serde::Deserialize;
#[cfg(feature = "with-serde")]
use serde::Deserializer;
#[cfg(feature = "with-serde")]
use serde::Serialize;
#[cfg(feature = "with-serde")]
use serde::Serializer;
use sha2::Digest;
use sha2::Sha256;

/// NodeHash is a wrapper around a 32 byte array that represents a hash of a node in the tree.
/// Leaf hashes, inner nodes and roots all share this type.
/// # Example
/// ```
/// use rewardtree::accumulator::node_hash::NodeHash;
/// let hash = NodeHash::new([0; 32]);
/// assert_eq!(
///     hash.to_string().as_str(),
///     "0000000000000000000000000000000000000000000000000000000000000000"
/// );
/// ```
#[derive(Eq, PartialEq, Copy, Clone, Hash, PartialOrd, Ord, Default)]
pub struct NodeHash([u8; 32]);

impl Deref for NodeHash {
    type Target = [u8; 32];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl Display for NodeHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        write!(f, "{}", hex::encode(self.0))
    }
}
impl Debug for NodeHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        write!(f, "{}", hex::encode(self.0))
    }
}
impl From<[u8; 32]> for NodeHash {
    fn from(hash: [u8; 32]) -> Self {
        NodeHash(hash)
    }
}
impl From<&[u8; 32]> for NodeHash {
    fn from(hash: &[u8; 32]) -> Self {
        NodeHash(*hash)
    }
}
impl From<NodeHash> for [u8; 32] {
    fn from(hash: NodeHash) -> Self {
        hash.0
    }
}
impl TryFrom<&str> for NodeHash {
    type Error = hex::FromHexError;
    fn try_from(hash: &str) -> Result<Self, Self::Error> {
        let mut inner = [0; 32];
        hex::decode_to_slice(hash, &mut inner)?;
        Ok(NodeHash(inner))
    }
}
impl FromStr for NodeHash {
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeHash::try_from(s)
    }
    type Err = hex::FromHexError;
}

// JSON carries hashes as hex strings rather than arrays of integers.
#[cfg(feature = "with-serde")]
impl Serialize for NodeHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
#[cfg(feature = "with-serde")]
impl<'de> Deserialize<'de> for NodeHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NodeHash::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl NodeHash {
    /// Creates a new NodeHash from a 32 byte array.
    pub const fn new(inner: [u8; 32]) -> Self {
        NodeHash(inner)
    }
    /// The all-zero hash. This is the root of an accumulator without leaves.
    /// # Example
    /// ```
    /// use rewardtree::accumulator::node_hash::NodeHash;
    /// assert!(NodeHash::zero().is_zero());
    /// ```
    pub const fn zero() -> Self {
        NodeHash([0; 32])
    }
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 32]
    }
    /// Hashes an arbitrary list of byte slices, concatenated in order.
    pub fn hashv(vals: &[&[u8]]) -> NodeHash {
        let mut hasher = Sha256::new();
        for val in vals {
            hasher.update(val);
        }
        NodeHash(hasher.finalize().into())
    }
    /// parent_hash return the merkle parent of the two passed in nodes.
    /// # Example
    /// ```
    /// use std::str::FromStr;
    ///
    /// use rewardtree::accumulator::node_hash::NodeHash;
    /// let left = NodeHash::new([0; 32]);
    /// let right = NodeHash::new([1; 32]);
    /// let parent = NodeHash::parent_hash(&left, &right);
    /// let expected_parent = NodeHash::from_str(
    ///     "5c85955f709283ecce2b74f1b1552918819f390911816e7bb466805a38ab87f3",
    /// )
    /// .unwrap();
    /// assert_eq!(parent, expected_parent);
    /// ```
    pub fn parent_hash(left: &NodeHash, right: &NodeHash) -> NodeHash {
        NodeHash::hashv(&[left.as_slice(), right.as_slice()])
    }
}
