//! Service settings. Every field can be given as a flag or through the environment.
use std::path::PathBuf;

use clap::Args;
use rewardtree::LeafEncoding;

#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Leaves allocated when a campaign is launched (launcher plus placeholders)
    #[arg(long, env = "CAMPAIGN_INITIAL_CAPACITY", default_value_t = 32)]
    pub initial_capacity: usize,

    /// Extra slots reserved whenever the tree has to grow for new participants
    #[arg(long, env = "CAMPAIGN_EXPANSION_BUFFER", default_value_t = 100)]
    pub expansion_buffer: usize,

    /// Leaf hash layout shared with the ledger program: with-index or without-index
    #[arg(long, env = "CAMPAIGN_LEAF_ENCODING", default_value_t = LeafEncoding::WithIndex)]
    pub leaf_encoding: LeafEncoding,

    /// Directory holding one JSON snapshot per campaign
    #[arg(long, env = "CAMPAIGN_SNAPSHOT_DIR", default_value = "snapshots")]
    pub snapshot_dir: PathBuf,

    /// Pending commands queued per campaign before senders wait
    #[arg(long, env = "CAMPAIGN_COMMAND_BUFFER", default_value_t = 8)]
    pub command_buffer: usize,

    /// Extra attempts when the ledger rejects a lock, extend or root update
    #[arg(long, env = "CAMPAIGN_ANCHOR_RETRIES", default_value_t = 3)]
    pub anchor_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            initial_capacity: 32,
            expansion_buffer: 100,
            leaf_encoding: LeafEncoding::WithIndex,
            snapshot_dir: PathBuf::from("snapshots"),
            command_buffer: 8,
            anchor_retries: 3,
        }
    }
}
