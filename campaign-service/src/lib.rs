//! Off-chain side of reward campaigns.
//!
//! Each campaign owns a [rewardtree::MerkleAccumulator] behind its own actor task
//! ([state_machine]). The [service::CampaignService] registry routes calls to those actors,
//! anchors every new root through a [ledger::Ledger] and dumps/restores campaigns as JSON
//! snapshots.
pub mod campaign;
pub mod config;
pub mod ledger;
pub mod service;
pub mod snapshot;
pub mod state_machine;

pub use campaign::CampaignId;
pub use config::Config;
pub use service::CampaignService;
