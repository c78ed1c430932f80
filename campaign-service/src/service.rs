//! Registry of running campaigns.
//!
//! [CampaignService] maps campaign ids to actor handles and routes every call to the right
//! actor. Campaigns never share state, so calls for different campaigns run in parallel.
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use anyhow::{anyhow, bail, Context, Result};
use log::info;
use rewardtree::Address;
use tokio::sync::{Mutex, RwLock};

use crate::campaign::{
    Campaign, CampaignId, CampaignStats, CampaignSummary, ClaimTicket, DistributeOutcome,
    Distribution, UpdateOutcome,
};
use crate::config::Config;
use crate::ledger::Ledger;
use crate::snapshot;
use crate::state_machine::{CampaignHandle, Status};

pub struct CampaignService {
    config: Config,
    ledger: Arc<dyn Ledger>,
    campaigns: RwLock<HashMap<CampaignId, CampaignHandle>>,
    /// Ids whose first root is still being anchored.
    launching: StdMutex<HashSet<CampaignId>>,
    /// Serializes dumps and restores.
    fs_lock: Mutex<()>,
}

impl CampaignService {
    pub fn new(config: Config, ledger: Arc<dyn Ledger>) -> Self {
        CampaignService {
            config,
            ledger,
            campaigns: RwLock::new(HashMap::new()),
            launching: StdMutex::new(HashSet::new()),
            fs_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Launches a campaign and anchors its first root. Fails if `launcher` already runs a
    /// campaign for `mint`.
    pub async fn initialize_campaign(
        &self,
        launcher: Address,
        mint: Address,
        fund: u64,
    ) -> Result<CampaignId> {
        let id = CampaignId::derive(&launcher, &mint);
        let _reservation = self.reserve(id).await?;

        // the registry stays open while the ledger anchors the first root
        let campaign = Campaign::launch(launcher, mint, fund, &self.config)?;
        let handle = CampaignHandle::spawn(campaign, self.ledger.clone(), &self.config);
        if let Err(e) = handle.anchor().await {
            handle.cancel();
            return Err(e.context(format!("failed to anchor campaign {id}")));
        }
        let mut campaigns = self.campaigns.write().await;
        if campaigns.contains_key(&id) {
            // a restore brought the same campaign back in the meantime
            handle.cancel();
            bail!("campaign {id} already exists");
        }
        campaigns.insert(id, handle);
        info!("campaign {id} launched by {launcher} for mint {mint} with fund {fund}");
        Ok(id)
    }

    /// Claims `id` for a launch in progress. The claim is released when the returned
    /// guard drops, after the campaign has been registered or the launch has failed.
    async fn reserve(&self, id: CampaignId) -> Result<Reservation<'_>> {
        let campaigns = self.campaigns.read().await;
        let mut launching = self.launching.lock().unwrap_or_else(PoisonError::into_inner);
        if campaigns.contains_key(&id) || !launching.insert(id) {
            bail!("campaign {id} already exists");
        }
        Ok(Reservation {
            launching: &self.launching,
            id,
        })
    }

    pub async fn campaign(&self, id: &CampaignId) -> Result<CampaignHandle> {
        self.campaigns
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("campaign {id} not found"))
    }

    pub async fn distribute_rewards(
        &self,
        id: &CampaignId,
        distributions: Vec<(Address, u64)>,
    ) -> Result<DistributeOutcome> {
        self.campaign(id).await?.distribute(distributions).await
    }

    pub async fn update_merkle_tree(
        &self,
        id: &CampaignId,
        new_participants: Vec<(Address, u64)>,
        update_existing: Vec<(Address, u64)>,
    ) -> Result<UpdateOutcome> {
        self.campaign(id)
            .await?
            .update_tree(new_participants, update_existing)
            .await
    }

    /// `None` when either the campaign or the participant is unknown.
    pub async fn merkle_proof(
        &self,
        id: &CampaignId,
        address: Address,
    ) -> Result<Option<ClaimTicket>> {
        let Some(handle) = self.campaigns.read().await.get(id).cloned() else {
            return Ok(None);
        };
        handle.claim_ticket(address).await
    }

    pub async fn mark_claimed(&self, id: &CampaignId, address: Address) -> Result<bool> {
        self.campaign(id).await?.mark_claimed(address).await
    }

    pub async fn campaign_stats(&self, id: &CampaignId) -> Result<CampaignStats> {
        self.campaign(id).await?.stats().await
    }

    pub async fn distributions(&self, id: &CampaignId) -> Result<Vec<Distribution>> {
        self.campaign(id).await?.distributions().await
    }

    pub async fn status(&self, id: &CampaignId) -> Result<Status> {
        Ok(self.campaign(id).await?.status().await)
    }

    /// Every campaign, oldest first.
    pub async fn all_campaigns(&self) -> Result<Vec<CampaignSummary>> {
        let mut summaries = Vec::new();
        for handle in self.handles().await {
            summaries.push(handle.summary().await?);
        }
        summaries.sort_by_key(|s| (s.created_at, s.campaign));
        Ok(summaries)
    }

    /// Writes one snapshot per campaign into `dir`. Returns how many were written.
    pub async fn dump(&self, dir: impl Into<PathBuf>) -> Result<usize> {
        let _guard = self.fs_lock.lock().await;
        let mut snapshots = Vec::new();
        for handle in self.handles().await {
            snapshots.push(handle.snapshot().await?);
        }
        let count = snapshots.len();
        let dir = dir.into();
        snapshot::perform_dump(dir.clone(), snapshots)
            .await
            .with_context(|| format!("dump to {} failed", dir.display()))?;
        info!("dumped {count} campaigns to {}", dir.display());
        Ok(count)
    }

    /// Replaces every running campaign with the ones stored in `dir`. Nothing is replaced
    /// if any snapshot fails to load. Restored roots are not re-anchored.
    pub async fn restore(&self, dir: impl Into<PathBuf>) -> Result<usize> {
        let _guard = self.fs_lock.lock().await;
        let dir = dir.into();
        let restored = snapshot::perform_restore(dir.clone())
            .await
            .with_context(|| format!("restore from {} failed", dir.display()))?;

        let mut campaigns = self.campaigns.write().await;
        for handle in campaigns.values() {
            handle.stop().await;
        }
        campaigns.clear();
        for campaign in restored {
            let id = campaign.id;
            let handle = CampaignHandle::spawn(campaign, self.ledger.clone(), &self.config);
            campaigns.insert(id, handle);
        }
        info!("restored {} campaigns from {}", campaigns.len(), dir.display());
        Ok(campaigns.len())
    }

    /// Stops every actor after the commands already queued.
    pub async fn shutdown(&self) {
        let mut campaigns = self.campaigns.write().await;
        for handle in campaigns.values() {
            handle.stop().await;
        }
        campaigns.clear();
    }

    async fn handles(&self) -> Vec<CampaignHandle> {
        self.campaigns.read().await.values().cloned().collect()
    }
}

struct Reservation<'a> {
    launching: &'a StdMutex<HashSet<CampaignId>>,
    id: CampaignId,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.launching
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}
