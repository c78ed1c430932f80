//! Allocation slots stored at the bottom of the accumulator.
//!
//! A [Leaf] is one slot of the campaign's reward array: who may claim ([Address]), how much
//! ([Leaf::amount]), a per-leaf randomizer ([Leaf::nonce]) and its position ([Leaf::index]).
//! Unassigned slots carry [Address::SENTINEL]; there is no separate placeholder type.
use std::fmt::Debug;
use std::fmt::Display;
use std::str::FromStr;

use rand::Rng;
#[cfg(feature = "with-serde")]
use serde::Deserialize;
#[cfg(feature = "with-serde")]
use serde::Deserializer;
#[cfg(feature = "with-serde")]
use serde::Serialize;
#[cfg(feature = "with-serde")]
use serde::Serializer;

use thiserror::Error;

use super::node_hash::NodeHash;

/// A 32 byte public key, printed in base58 like any Solana account.
/// # Example
/// ```
/// use rewardtree::accumulator::leaf::Address;
/// assert_eq!(
///     Address::SENTINEL.to_string().as_str(),
///     "11111111111111111111111111111111"
/// );
/// ```
#[derive(Eq, PartialEq, Copy, Clone, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 32]);

impl Address {
    /// The reserved all-zero address of placeholder leaves.
    pub const SENTINEL: Address = Address([0; 32]);

    pub const fn new(inner: [u8; 32]) -> Self {
        Address(inner)
    }
    pub fn is_sentinel(&self) -> bool {
        *self == Self::SENTINEL
    }
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Address {
    fn from(inner: [u8; 32]) -> Self {
        Address(inner)
    }
}
impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}
impl Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

/// Why a string could not be read as an [Address].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseAddressError {
    #[error("invalid base58 address: {0}")]
    Base58(bs58::decode::Error),
    #[error("address must be 32 bytes, got {0}")]
    InvalidLength(usize),
}

impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(ParseAddressError::Base58)?;
        let inner: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ParseAddressError::InvalidLength(bytes.len()))?;
        Ok(Address(inner))
    }
}

#[cfg(feature = "with-serde")]
impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
#[cfg(feature = "with-serde")]
impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Byte layout fed to the hash function for a leaf. This has to match whatever the ledger
/// program recomputes when it checks a claim, otherwise roots diverge.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "with-serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "with-serde", serde(rename_all = "kebab-case"))]
pub enum LeafEncoding {
    /// `address ∥ amount_le ∥ index_le ∥ nonce_le`
    #[default]
    WithIndex,
    /// `address ∥ amount_le ∥ nonce_le`
    WithoutIndex,
}

impl LeafEncoding {
    pub(super) fn tag(self) -> u8 {
        match self {
            LeafEncoding::WithIndex => 0,
            LeafEncoding::WithoutIndex => 1,
        }
    }

    pub(super) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(LeafEncoding::WithIndex),
            1 => Some(LeafEncoding::WithoutIndex),
            _ => None,
        }
    }
}

impl Display for LeafEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeafEncoding::WithIndex => write!(f, "with-index"),
            LeafEncoding::WithoutIndex => write!(f, "without-index"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown leaf encoding: {0}")]
pub struct ParseEncodingError(String);

impl FromStr for LeafEncoding {
    type Err = ParseEncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "with-index" => Ok(LeafEncoding::WithIndex),
            "without-index" => Ok(LeafEncoding::WithoutIndex),
            other => Err(ParseEncodingError(other.to_string())),
        }
    }
}

/// One allocation slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "with-serde", derive(Serialize, Deserialize))]
pub struct Leaf {
    pub address: Address,
    pub amount: u64,
    pub nonce: u64,
    pub index: u64,
}

/// Size of a leaf in the binary format: address, amount, nonce, index.
pub(super) const LEAF_BYTES: usize = 32 + 8 + 8 + 8;

impl Leaf {
    pub fn new(address: Address, amount: u64, nonce: u64, index: u64) -> Self {
        Leaf {
            address,
            amount,
            nonce,
            index,
        }
    }

    /// An unassigned slot at `index` with a fresh nonce drawn from `rng`.
    pub fn placeholder<R: Rng + ?Sized>(index: u64, rng: &mut R) -> Self {
        Leaf {
            address: Address::SENTINEL,
            amount: 0,
            nonce: rng.gen(),
            index,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.address.is_sentinel()
    }

    /// Hash committed to level 0 of the tree for this leaf.
    /// # Example
    /// ```
    /// use rewardtree::accumulator::leaf::{Address, Leaf, LeafEncoding};
    /// let leaf = Leaf::new(Address::new([1; 32]), 1000, 7, 0);
    /// assert_ne!(
    ///     leaf.hash(LeafEncoding::WithIndex),
    ///     leaf.hash(LeafEncoding::WithoutIndex)
    /// );
    /// ```
    pub fn hash(&self, encoding: LeafEncoding) -> NodeHash {
        let amount = self.amount.to_le_bytes();
        let nonce = self.nonce.to_le_bytes();
        match encoding {
            LeafEncoding::WithIndex => {
                let index = self.index.to_le_bytes();
                NodeHash::hashv(&[self.address.as_bytes(), &amount, &index, &nonce])
            }
            LeafEncoding::WithoutIndex => {
                NodeHash::hashv(&[self.address.as_bytes(), &amount, &nonce])
            }
        }
    }

    /// write to buffer
    pub(super) fn write<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: std::io::Write,
    {
        writer.write_all(self.address.as_bytes())?;
        writer.write_all(&self.amount.to_le_bytes())?;
        writer.write_all(&self.nonce.to_le_bytes())?;
        writer.write_all(&self.index.to_le_bytes())
    }

    /// Read from buffer
    pub(super) fn read<R>(reader: &mut R) -> std::io::Result<Self>
    where
        R: std::io::Read,
    {
        let mut address = [0; 32];
        let mut word = [0; 8];
        reader.read_exact(&mut address)?;
        reader.read_exact(&mut word)?;
        let amount = u64::from_le_bytes(word);
        reader.read_exact(&mut word)?;
        let nonce = u64::from_le_bytes(word);
        reader.read_exact(&mut word)?;
        let index = u64::from_le_bytes(word);
        Ok(Leaf::new(Address(address), amount, nonce, index))
    }
}
