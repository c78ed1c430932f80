//! One campaign: its accumulator, its participants and the log of distributions.
//!
//! Everything in here is synchronous and works on plain data. Serializing access to a
//! campaign is the job of [crate::state_machine].
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use rewardtree::{
    Address, Leaf, LeafEncoding, LeafSet, LeafUpdate, MerkleAccumulator, NodeHash, Proof,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Deterministic campaign identifier, derived from the launcher and the mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(Address);

impl CampaignId {
    pub fn derive(launcher: &Address, mint: &Address) -> Self {
        let hash = NodeHash::hashv(&[b"campaign", launcher.as_bytes(), mint.as_bytes()]);
        CampaignId(Address::new(*hash))
    }
}

impl Display for CampaignId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CampaignId {
    type Err = rewardtree::accumulator::leaf::ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(CampaignId(Address::from_str(s)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub address: Address,
    pub amount: u64,
    pub nonce: u64,
    pub index: u64,
    pub claimed: bool,
    /// Sum of every amount zeroed by [Campaign::mark_claimed].
    #[serde(default)]
    pub claimed_amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub participant: Address,
    pub amount: u64,
    pub timestamp: DateTime<Utc>,
}

/// Everything a recipient needs to claim: the leaf, its proof and the root it proves into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimTicket {
    pub campaign: CampaignId,
    pub leaf: Leaf,
    pub proof: Proof,
    pub root: NodeHash,
    pub encoding: LeafEncoding,
}

impl ClaimTicket {
    pub fn verify(&self) -> bool {
        self.proof.verify(&self.leaf, &self.root, self.encoding)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributeOutcome {
    pub root: NodeHash,
    pub tree_size: usize,
    /// Size before the batch, differs from `tree_size` when leaves had to be appended.
    pub previous_size: usize,
    pub new_participants: usize,
    pub updated_participants: usize,
    /// `(index, amount)` reward array to publish with the root.
    pub participants: Vec<(u64, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    pub root: NodeHash,
    pub tree_size: usize,
    pub needs_extension: bool,
    pub participants: Vec<(u64, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignStats {
    pub campaign: CampaignId,
    pub launcher: Address,
    pub mint: Address,
    pub fund: u64,
    pub total_participants: usize,
    pub claimed_count: usize,
    pub unclaimed_count: usize,
    pub total_distributed: u128,
    pub total_claimed: u128,
    pub total_unclaimed: u128,
    pub tree_size: usize,
    pub merkle_root: NodeHash,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignSummary {
    pub campaign: CampaignId,
    pub launcher: Address,
    pub mint: Address,
    pub fund: u64,
    pub participants: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted form of a campaign. The accumulator is stored as its leaves only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSnapshot {
    pub id: CampaignId,
    pub launcher: Address,
    pub mint: Address,
    pub fund: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub participants: Vec<Participant>,
    pub distributions: Vec<Distribution>,
    pub tree: LeafSet,
}

#[derive(Debug, Clone)]
pub struct Campaign {
    pub id: CampaignId,
    pub launcher: Address,
    pub mint: Address,
    pub fund: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    tree: MerkleAccumulator,
    participants: HashMap<Address, Participant>,
    distributions: Vec<Distribution>,
}

impl Campaign {
    /// A fresh campaign: the launcher holds the whole fund at index 0 and the remaining
    /// `initial_capacity - 1` slots are placeholders.
    pub fn launch(launcher: Address, mint: Address, fund: u64, config: &Config) -> Result<Self> {
        if fund == 0 {
            bail!("invalid fund: must be greater than zero");
        }
        if launcher.is_sentinel() {
            bail!("invalid launcher: the all-zero address is reserved");
        }
        let nonce = rand::random();
        let mut tree = MerkleAccumulator::new(config.leaf_encoding);
        tree.build(vec![Leaf::new(launcher, fund, nonce, 0)]);
        tree.expand(config.initial_capacity);

        let mut participants = HashMap::new();
        participants.insert(
            launcher,
            Participant {
                address: launcher,
                amount: fund,
                nonce,
                index: 0,
                claimed: false,
                claimed_amount: 0,
            },
        );
        let now = Utc::now();
        Ok(Campaign {
            id: CampaignId::derive(&launcher, &mint),
            launcher,
            mint,
            fund,
            created_at: now,
            updated_at: now,
            tree,
            participants,
            distributions: Vec::new(),
        })
    }

    pub fn root(&self) -> NodeHash {
        self.tree.root()
    }

    pub fn tree_size(&self) -> usize {
        self.tree.len()
    }

    pub fn encoding(&self) -> LeafEncoding {
        self.tree.encoding()
    }

    pub fn participant(&self, address: &Address) -> Option<&Participant> {
        self.participants.get(address)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn participants_update(&self) -> Vec<(u64, u64)> {
        self.tree.participants_update()
    }

    pub fn distributions(&self) -> &[Distribution] {
        &self.distributions
    }

    /// Credits `amount` to each address. Known participants accrue on top of what they
    /// have; unknown ones take the next free slot, growing the tree when it is full. The
    /// whole list is checked before anything is changed.
    pub fn distribute(&mut self, distributions: &[(Address, u64)]) -> Result<DistributeOutcome> {
        if distributions.is_empty() {
            bail!("no distributions provided");
        }

        // Resolve the list against the current participants first so that an overflow
        // anywhere leaves the campaign untouched.
        let mut pending: HashMap<Address, u64> = HashMap::new();
        let mut newcomers: Vec<Address> = Vec::new();
        for &(address, amount) in distributions {
            if address.is_sentinel() {
                bail!("cannot distribute to the reserved all-zero address");
            }
            let current = match pending.get(&address) {
                Some(&amount) => amount,
                None => match self.participants.get(&address) {
                    Some(participant) => participant.amount,
                    None => {
                        newcomers.push(address);
                        0
                    }
                },
            };
            let total = current
                .checked_add(amount)
                .ok_or_else(|| anyhow!("reward overflow for {address}"))?;
            pending.insert(address, total);
        }

        let previous_size = self.tree.len();
        let mut updates = Vec::with_capacity(pending.len());
        let mut next_index = self.participants.len() as u64;
        for address in newcomers.iter() {
            let amount = pending[address];
            let nonce = rand::random();
            let index = next_index;
            next_index += 1;
            if self.tree.get_leaf(index).is_some_and(Leaf::is_placeholder) {
                updates.push(LeafUpdate::assign(index, *address, amount, nonce));
            } else {
                // out of slots, appending rebuilds the tree with fresh padding
                let landed = self.tree.add_leaf(Leaf::new(*address, amount, nonce, index));
                debug!("appended {address} at {landed}, tree now {}", self.tree.len());
            }
            self.participants.insert(
                *address,
                Participant {
                    address: *address,
                    amount,
                    nonce,
                    index,
                    claimed: false,
                    claimed_amount: 0,
                },
            );
        }

        let mut updated = 0;
        for (address, participant) in self.participants.iter_mut() {
            let Some(&amount) = pending.get(address) else {
                continue;
            };
            if newcomers.contains(address) {
                continue;
            }
            participant.amount = amount;
            updates.push(LeafUpdate::amount(participant.index, amount));
            updated += 1;
        }
        self.tree.apply(&updates);

        let now = Utc::now();
        for &(participant, amount) in distributions {
            self.distributions.push(Distribution {
                participant,
                amount,
                timestamp: now,
            });
        }
        self.updated_at = now;

        Ok(DistributeOutcome {
            root: self.tree.root(),
            tree_size: self.tree.len(),
            previous_size,
            new_participants: newcomers.len(),
            updated_participants: updated,
            participants: self.tree.participants_update(),
        })
    }

    /// Adds `new_participants` with their initial amounts and sets absolute amounts for
    /// `update_existing`. When the tree is too small it is expanded by at least
    /// `expansion_buffer` slots first. Claimed and unknown participants are skipped in
    /// `update_existing`.
    pub fn update_tree(
        &mut self,
        new_participants: &[(Address, u64)],
        update_existing: &[(Address, u64)],
        expansion_buffer: usize,
    ) -> Result<UpdateOutcome> {
        let mut seen = Vec::with_capacity(new_participants.len());
        for (address, _) in new_participants {
            if address.is_sentinel() {
                bail!("cannot add the reserved all-zero address");
            }
            if self.participants.contains_key(address) || seen.contains(address) {
                bail!("{address} is already a participant");
            }
            seen.push(*address);
        }

        let current = self.tree.len();
        let required = self.participants.len() + new_participants.len();
        let needs_extension = required > current;
        if needs_extension {
            let target = required.max(current + expansion_buffer);
            self.tree.expand(target);
            debug!("campaign {} expanded from {current} to {}", self.id, self.tree.len());
        }

        let mut updates = Vec::new();
        for &(address, amount) in new_participants {
            let index = self.participants.len() as u64;
            let nonce = rand::random();
            updates.push(LeafUpdate::assign(index, address, amount, nonce));
            self.participants.insert(
                address,
                Participant {
                    address,
                    amount,
                    nonce,
                    index,
                    claimed: false,
                    claimed_amount: 0,
                },
            );
        }
        for &(address, amount) in update_existing {
            match self.participants.get_mut(&address) {
                Some(participant) if !participant.claimed => {
                    participant.amount = amount;
                    updates.push(LeafUpdate::amount(participant.index, amount));
                }
                Some(_) => warn!("{address} already claimed, not updating"),
                None => warn!("{address} is not a participant of {}", self.id),
            }
        }
        self.tree.apply(&updates);
        self.updated_at = Utc::now();

        Ok(UpdateOutcome {
            root: self.tree.root(),
            tree_size: self.tree.len(),
            needs_extension,
            participants: self.tree.participants_update(),
        })
    }

    /// Proof material for `address` against the current root.
    pub fn claim_ticket(&self, address: &Address) -> Option<ClaimTicket> {
        let participant = self.participants.get(address)?;
        let leaf = *self.tree.get_leaf(participant.index)?;
        Some(ClaimTicket {
            campaign: self.id,
            leaf,
            proof: self.tree.proof(participant.index),
            root: self.tree.root(),
            encoding: self.tree.encoding(),
        })
    }

    /// Records that `address` claimed its reward and zeroes its leaf. The leaf itself
    /// stays in place.
    pub fn mark_claimed(&mut self, address: &Address) -> bool {
        let Some(participant) = self.participants.get_mut(address) else {
            return false;
        };
        participant.claimed = true;
        participant.claimed_amount = participant.claimed_amount.saturating_add(participant.amount);
        participant.amount = 0;
        let index = participant.index;
        self.tree.update_leaf(index, 0);
        self.updated_at = Utc::now();
        true
    }

    pub fn stats(&self) -> CampaignStats {
        let claimed_count = self.participants.values().filter(|p| p.claimed).count();
        let total_claimed: u128 = self
            .participants
            .values()
            .map(|p| p.claimed_amount as u128)
            .sum();
        let total_unclaimed: u128 = self.participants.values().map(|p| p.amount as u128).sum();
        CampaignStats {
            campaign: self.id,
            launcher: self.launcher,
            mint: self.mint,
            fund: self.fund,
            total_participants: self.participants.len(),
            claimed_count,
            unclaimed_count: self.participants.len() - claimed_count,
            total_distributed: total_claimed + total_unclaimed,
            total_claimed,
            total_unclaimed,
            tree_size: self.tree.len(),
            merkle_root: self.tree.root(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn summary(&self) -> CampaignSummary {
        CampaignSummary {
            campaign: self.id,
            launcher: self.launcher,
            mint: self.mint,
            fund: self.fund,
            participants: self.participants.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn to_snapshot(&self) -> CampaignSnapshot {
        let mut participants: Vec<Participant> = self.participants.values().cloned().collect();
        participants.sort_by_key(|p| p.index);
        CampaignSnapshot {
            id: self.id,
            launcher: self.launcher,
            mint: self.mint,
            fund: self.fund,
            created_at: self.created_at,
            updated_at: self.updated_at,
            participants,
            distributions: self.distributions.clone(),
            tree: self.tree.to_leaf_set(),
        }
    }

    /// Rebuilds a campaign, refusing snapshots whose participants and leaves disagree.
    pub fn from_snapshot(snapshot: CampaignSnapshot) -> Result<Self> {
        let tree = MerkleAccumulator::from_leaf_set(snapshot.tree)
            .with_context(|| format!("invalid leaf set in snapshot {}", snapshot.id))?;
        if snapshot.id != CampaignId::derive(&snapshot.launcher, &snapshot.mint) {
            bail!("snapshot id {} does not match launcher and mint", snapshot.id);
        }

        let mut participants = HashMap::with_capacity(snapshot.participants.len());
        for participant in snapshot.participants {
            let leaf = tree.get_leaf(participant.index).ok_or_else(|| {
                anyhow!(
                    "participant {} points at missing leaf {}",
                    participant.address,
                    participant.index
                )
            })?;
            if leaf.address != participant.address
                || leaf.nonce != participant.nonce
                || leaf.amount != participant.amount
            {
                bail!(
                    "participant {} does not match leaf {}",
                    participant.address,
                    participant.index
                );
            }
            if participants
                .insert(participant.address, participant)
                .is_some()
            {
                bail!("duplicate participant {}", leaf.address);
            }
        }
        let mut indexes: Vec<u64> = participants.values().map(|p| p.index).collect();
        indexes.sort_unstable();
        if indexes.iter().enumerate().any(|(i, &index)| index != i as u64) {
            bail!("participant indexes of {} are not contiguous", snapshot.id);
        }

        Ok(Campaign {
            id: snapshot.id,
            launcher: snapshot.launcher,
            mint: snapshot.mint,
            fund: snapshot.fund,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            tree,
            participants,
            distributions: snapshot.distributions,
        })
    }
}
