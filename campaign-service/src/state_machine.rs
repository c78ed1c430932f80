//! One actor task per campaign.
//!
//! The task owns the [Campaign] and is the only code that touches its accumulator. Every
//! mutation runs the whole "lock on ledger, apply, anchor root" sequence before the next
//! command is received, so nobody can read a root or a proof for a half applied batch.
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info};
use rewardtree::{Address, NodeHash};
use serde::Serialize;
use tokio::select;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task;
use tokio_util::sync::CancellationToken;

use crate::campaign::{
    Campaign, CampaignId, CampaignSnapshot, CampaignStats, CampaignSummary, ClaimTicket,
    DistributeOutcome, Distribution, UpdateOutcome,
};
use crate::config::Config;
use crate::ledger::{with_retries, Ledger};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Commands accepted by a campaign actor.
#[derive(Debug)]
pub enum Command {
    Distribute {
        distributions: Vec<(Address, u64)>,
        reply: Reply<DistributeOutcome>,
    },
    UpdateTree {
        new_participants: Vec<(Address, u64)>,
        update_existing: Vec<(Address, u64)>,
        reply: Reply<UpdateOutcome>,
    },
    MarkClaimed {
        address: Address,
        reply: Reply<bool>,
    },
    /// Republish the current root, extending the ledger account to the tree size.
    Anchor { reply: Reply<()> },
    Proof {
        address: Address,
        reply: Reply<Option<ClaimTicket>>,
    },
    Root { reply: Reply<NodeHash> },
    Stats { reply: Reply<CampaignStats> },
    Summary { reply: Reply<CampaignSummary> },
    Distributions { reply: Reply<Vec<Distribution>> },
    Snapshot { reply: Reply<CampaignSnapshot> },
    Stop,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum CampaignState {
    Idle,
    Applying,
    Anchoring,
    Stopped,
    Error { msg: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub campaign: CampaignId,
    pub state: CampaignState,
    pub uptime_secs: u64,
}

/// Cloneable handle to a running campaign actor.
#[derive(Debug, Clone)]
pub struct CampaignHandle {
    id: CampaignId,
    state: Arc<RwLock<CampaignState>>,
    start: std::time::Instant,
    tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl CampaignHandle {
    /// Moves `campaign` into a new actor task. Must be called from within a tokio runtime.
    pub fn spawn(campaign: Campaign, ledger: Arc<dyn Ledger>, config: &Config) -> Self {
        let (tx, mut rx) = mpsc::channel::<Command>(config.command_buffer.max(1));
        let state = Arc::new(RwLock::new(CampaignState::Idle));
        let cancel = CancellationToken::new();
        let id = campaign.id;

        let mut actor = Actor {
            campaign,
            ledger,
            retries: config.anchor_retries,
            expansion_buffer: config.expansion_buffer,
            state: state.clone(),
        };
        let token = cancel.clone();
        task::spawn(async move {
            loop {
                let cmd = select! {
                    _ = token.cancelled() => break,
                    cmd = rx.recv() => cmd,
                };
                match cmd {
                    Some(Command::Stop) | None => break,
                    Some(cmd) => actor.handle(cmd).await,
                }
            }
            *actor.state.write().await = CampaignState::Stopped;
            debug!("campaign {} actor stopped", actor.campaign.id);
        });

        CampaignHandle {
            id,
            state,
            start: std::time::Instant::now(),
            tx,
            cancel,
        }
    }

    pub fn id(&self) -> CampaignId {
        self.id
    }

    pub async fn status(&self) -> Status {
        Status {
            campaign: self.id,
            state: self.state.read().await.clone(),
            uptime_secs: self.start.elapsed().as_secs(),
        }
    }

    pub async fn distribute(
        &self,
        distributions: Vec<(Address, u64)>,
    ) -> Result<DistributeOutcome> {
        self.request(|reply| Command::Distribute {
            distributions,
            reply,
        })
        .await
    }

    pub async fn update_tree(
        &self,
        new_participants: Vec<(Address, u64)>,
        update_existing: Vec<(Address, u64)>,
    ) -> Result<UpdateOutcome> {
        self.request(|reply| Command::UpdateTree {
            new_participants,
            update_existing,
            reply,
        })
        .await
    }

    pub async fn mark_claimed(&self, address: Address) -> Result<bool> {
        self.request(|reply| Command::MarkClaimed { address, reply })
            .await
    }

    pub async fn anchor(&self) -> Result<()> {
        self.request(|reply| Command::Anchor { reply }).await
    }

    pub async fn claim_ticket(&self, address: Address) -> Result<Option<ClaimTicket>> {
        self.request(|reply| Command::Proof { address, reply }).await
    }

    pub async fn root(&self) -> Result<NodeHash> {
        self.request(|reply| Command::Root { reply }).await
    }

    pub async fn stats(&self) -> Result<CampaignStats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    pub async fn summary(&self) -> Result<CampaignSummary> {
        self.request(|reply| Command::Summary { reply }).await
    }

    pub async fn distributions(&self) -> Result<Vec<Distribution>> {
        self.request(|reply| Command::Distributions { reply }).await
    }

    pub async fn snapshot(&self) -> Result<CampaignSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Asks the actor to finish once the commands queued before this one are done.
    pub async fn stop(&self) {
        let _ = self.tx.send(Command::Stop).await;
    }

    /// Stops the actor right away, dropping queued commands.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| anyhow!("campaign {} is not running", self.id))?;
        rx.await
            .map_err(|_| anyhow!("campaign {} stopped before replying", self.id))?
    }
}

struct Actor {
    campaign: Campaign,
    ledger: Arc<dyn Ledger>,
    retries: u32,
    expansion_buffer: usize,
    state: Arc<RwLock<CampaignState>>,
}

impl Actor {
    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Distribute {
                distributions,
                reply,
            } => {
                let res = self
                    .mutate(|campaign| campaign.distribute(&distributions))
                    .await;
                if let Ok(outcome) = &res {
                    info!(
                        "campaign {}: distributed to {} participants ({} new), root {}",
                        self.campaign.id,
                        outcome.new_participants + outcome.updated_participants,
                        outcome.new_participants,
                        outcome.root
                    );
                }
                let _ = reply.send(res);
            }
            Command::UpdateTree {
                new_participants,
                update_existing,
                reply,
            } => {
                let buffer = self.expansion_buffer;
                let res = self
                    .mutate(|campaign| {
                        campaign.update_tree(&new_participants, &update_existing, buffer)
                    })
                    .await;
                let _ = reply.send(res);
            }
            Command::MarkClaimed { address, reply } => {
                if self.campaign.participant(&address).is_none() {
                    let _ = reply.send(Ok(false));
                    return;
                }
                let res = self
                    .mutate(|campaign| Ok(campaign.mark_claimed(&address)))
                    .await;
                let _ = reply.send(res);
            }
            Command::Anchor { reply } => {
                let res = self.mutate(|_| Ok(())).await;
                let _ = reply.send(res);
            }
            Command::Proof { address, reply } => {
                let _ = reply.send(Ok(self.campaign.claim_ticket(&address)));
            }
            Command::Root { reply } => {
                let _ = reply.send(Ok(self.campaign.root()));
            }
            Command::Stats { reply } => {
                let _ = reply.send(Ok(self.campaign.stats()));
            }
            Command::Summary { reply } => {
                let _ = reply.send(Ok(self.campaign.summary()));
            }
            Command::Distributions { reply } => {
                let _ = reply.send(Ok(self.campaign.distributions().to_vec()));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(Ok(self.campaign.to_snapshot()));
            }
            // handled by the loop
            Command::Stop => {}
        }
    }

    /// Locks the campaign on the ledger, applies `op` to a staged copy and anchors the
    /// result. The live campaign is only replaced once the ledger accepted the new root, so
    /// a failed step leaves it exactly as it was.
    async fn mutate<T>(&mut self, op: impl FnOnce(&mut Campaign) -> Result<T>) -> Result<T> {
        let res = self.try_mutate(op).await;
        let state = match &res {
            Ok(_) => CampaignState::Idle,
            Err(e) => {
                error!("campaign {}: {e:#}", self.campaign.id);
                CampaignState::Error {
                    msg: format!("{e:#}"),
                }
            }
        };
        self.set_state(state).await;
        res
    }

    async fn try_mutate<T>(&mut self, op: impl FnOnce(&mut Campaign) -> Result<T>) -> Result<T> {
        self.set_state(CampaignState::Anchoring).await;
        self.ledger_call("lock", |ledger, id| ledger.lock(id)).await?;

        self.set_state(CampaignState::Applying).await;
        let mut staged = self.campaign.clone();
        let value = match op(&mut staged) {
            Ok(value) => value,
            Err(e) => {
                // nothing changed, republishing the current root releases the lock
                self.set_state(CampaignState::Anchoring).await;
                self.publish(&self.campaign).await?;
                return Err(e);
            }
        };

        self.set_state(CampaignState::Anchoring).await;
        self.publish(&staged).await?;
        self.campaign = staged;
        Ok(value)
    }

    /// Extends the ledger account to the campaign's tree size and anchors its root.
    async fn publish(&self, campaign: &Campaign) -> Result<()> {
        let size = campaign.tree_size() as u64;
        self.ledger_call("extend", move |ledger, id| ledger.extend(id, size))
            .await?;
        let root = campaign.root();
        let participants = campaign.participants_update();
        self.ledger_call("update root", move |ledger, id| {
            ledger.update_root(id, root, &participants)
        })
        .await
    }

    async fn ledger_call<T, F>(&self, what: &'static str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&dyn Ledger, &CampaignId) -> Result<T> + Send + 'static,
    {
        let ledger = self.ledger.clone();
        let id = self.campaign.id;
        let retries = self.retries;
        task::spawn_blocking(move || {
            with_retries(&format!("{what} {id}"), retries, || op(ledger.as_ref(), &id))
        })
        .await
        .context("ledger task failed")?
    }

    async fn set_state(&self, state: CampaignState) {
        *self.state.write().await = state;
    }
}
