//! Boundary with the ledger program that anchors campaign roots and settles claims.
//!
//! The service only ever talks to the ledger through [Ledger]. The ledger is the
//! authoritative verifier: it stores the anchored root next to the reward array and checks
//! claim proofs itself, so everything pushed here must come from a fully applied batch.
use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use log::{info, warn};
use rewardtree::{Leaf, LeafEncoding, NodeHash, Proof};
use serde::Serialize;

use crate::campaign::CampaignId;

/// Instructions the service sends to the ledger program.
pub trait Ledger: Send + Sync {
    /// Freeze claims while a batch of reward changes is applied.
    fn lock(&self, campaign: &CampaignId) -> Result<()>;
    /// Publish a new root and reward array, releasing the lock.
    fn update_root(
        &self,
        campaign: &CampaignId,
        root: NodeHash,
        participants: &[(u64, u64)],
    ) -> Result<()>;
    /// Grow the on-chain reward array to `size` slots.
    fn extend(&self, campaign: &CampaignId, size: u64) -> Result<()>;
}

/// Runs `op` until it succeeds, giving up after `retries` extra attempts.
pub fn with_retries<T>(what: &str, retries: u32, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!("{what} failed (attempt {attempt}/{retries}): {e:#}");
            }
            Err(e) => {
                return Err(e.context(format!("{what} failed after {} attempts", attempt + 1)))
            }
        }
    }
}

/// A ledger that only logs what it would have sent. Used by the command line tool, which
/// has no transport to a real ledger.
#[derive(Debug, Default)]
pub struct LogLedger;

impl Ledger for LogLedger {
    fn lock(&self, campaign: &CampaignId) -> Result<()> {
        info!("ledger: lock {campaign}");
        Ok(())
    }

    fn update_root(
        &self,
        campaign: &CampaignId,
        root: NodeHash,
        participants: &[(u64, u64)],
    ) -> Result<()> {
        info!(
            "ledger: update {campaign} root {root} with {} participants",
            participants.len()
        );
        Ok(())
    }

    fn extend(&self, campaign: &CampaignId, size: u64) -> Result<()> {
        info!("ledger: extend {campaign} to {size} slots");
        Ok(())
    }
}

/// What the ledger holds for one campaign.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerAccount {
    pub root: NodeHash,
    pub rewards: Vec<u64>,
    pub locked: bool,
    pub size: u64,
    /// Every root anchored so far, oldest first.
    pub history: Vec<NodeHash>,
    /// Root updates that arrived without a prior lock.
    pub unlocked_updates: usize,
}

/// In-memory ledger that keeps every anchored root. It can be told to fail a number of
/// calls to exercise retries.
#[derive(Debug, Default)]
pub struct RecordingLedger {
    accounts: Mutex<HashMap<CampaignId, LedgerAccount>>,
    failures: Mutex<u32>,
}

impl RecordingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls fail.
    pub fn fail_next(&self, n: u32) {
        *self.failures.lock().unwrap_or_else(|e| e.into_inner()) = n;
    }

    pub fn account(&self, campaign: &CampaignId) -> Option<LedgerAccount> {
        self.accounts().get(campaign).cloned()
    }

    /// Last anchored root, if any.
    pub fn root(&self, campaign: &CampaignId) -> Option<NodeHash> {
        self.account(campaign)
            .and_then(|account| account.history.last().copied())
    }

    /// Checks a claim the way the ledger program does: the leaf must prove into the
    /// anchored root, the slot must exist and the claimed amount must be non-zero.
    pub fn verify_claim(
        &self,
        campaign: &CampaignId,
        leaf: &Leaf,
        proof: &Proof,
        encoding: LeafEncoding,
    ) -> Result<()> {
        let account = self
            .account(campaign)
            .ok_or_else(|| anyhow!("campaign {campaign} has no ledger account"))?;
        if account.locked {
            bail!("campaign {campaign} is locked");
        }
        if leaf.amount == 0 {
            bail!("invalid amount");
        }
        if leaf.index >= account.size {
            bail!("invalid user index {}", leaf.index);
        }
        if !proof.verify(leaf, &account.root, encoding) {
            bail!("invalid proof");
        }
        Ok(())
    }

    fn accounts(&self) -> std::sync::MutexGuard<'_, HashMap<CampaignId, LedgerAccount>> {
        self.accounts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn maybe_fail(&self, what: &str) -> Result<()> {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        if *failures > 0 {
            *failures -= 1;
            bail!("{what}: ledger unavailable");
        }
        Ok(())
    }
}

impl Ledger for RecordingLedger {
    fn lock(&self, campaign: &CampaignId) -> Result<()> {
        self.maybe_fail("lock")?;
        self.accounts().entry(*campaign).or_default().locked = true;
        Ok(())
    }

    fn update_root(
        &self,
        campaign: &CampaignId,
        root: NodeHash,
        participants: &[(u64, u64)],
    ) -> Result<()> {
        self.maybe_fail("update")?;
        let mut accounts = self.accounts();
        let account = accounts.entry(*campaign).or_default();
        if !account.locked {
            account.unlocked_updates += 1;
        }
        if let Some(&(index, _)) = participants.iter().find(|(i, _)| *i >= account.size) {
            bail!("participant index {index} beyond {} slots", account.size);
        }
        for &(index, amount) in participants {
            account.rewards[index as usize] = amount;
        }
        account.root = root;
        account.history.push(root);
        account.locked = false;
        Ok(())
    }

    fn extend(&self, campaign: &CampaignId, size: u64) -> Result<()> {
        self.maybe_fail("extend")?;
        let mut accounts = self.accounts();
        let account = accounts.entry(*campaign).or_default();
        if size > account.size {
            account.size = size;
            account.rewards.resize(size as usize, 0);
        }
        Ok(())
    }
}
