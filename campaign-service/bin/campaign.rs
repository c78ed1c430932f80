//! Command line driver for campaigns kept in a snapshot directory.
//!
//! Every invocation restores the directory, runs one operation and, for operations that
//! change a campaign, dumps it back. Ledger instructions are only logged.
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use campaign_service::campaign::ClaimTicket;
use campaign_service::ledger::LogLedger;
use campaign_service::{CampaignId, CampaignService, Config};
use clap::{Parser, Subcommand};
use log::info;
use rewardtree::Address;
use serde::Serialize;

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    #[command(flatten)]
    config: Config,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Start a campaign, the launcher holds the whole fund at index 0
    Launch {
        #[arg(long)]
        launcher: Address,
        #[arg(long)]
        mint: Address,
        #[arg(long)]
        fund: u64,
    },
    /// Credit rewards, given as ADDRESS=AMOUNT
    Distribute {
        #[arg(long)]
        campaign: CampaignId,
        #[arg(long = "to", value_parser = parse_allocation, required = true)]
        to: Vec<(Address, u64)>,
    },
    /// Add participants and overwrite amounts of existing ones
    Update {
        #[arg(long)]
        campaign: CampaignId,
        #[arg(long = "add", value_parser = parse_allocation)]
        add: Vec<(Address, u64)>,
        #[arg(long = "set", value_parser = parse_allocation)]
        set: Vec<(Address, u64)>,
    },
    /// Print the claim ticket (leaf, proof, root) of a participant
    Proof {
        #[arg(long)]
        campaign: CampaignId,
        #[arg(long)]
        address: Address,
    },
    /// Check a claim ticket written by `proof`
    Verify {
        /// JSON file holding the ticket
        ticket: PathBuf,
    },
    /// Record a settled claim, zeroing the participant's leaf
    Claim {
        #[arg(long)]
        campaign: CampaignId,
        #[arg(long)]
        address: Address,
    },
    /// Print totals for one campaign, or a summary of all of them
    Stats {
        #[arg(long)]
        campaign: Option<CampaignId>,
    },
}

fn parse_allocation(s: &str) -> Result<(Address, u64), String> {
    let (address, amount) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ADDRESS=AMOUNT, got {s}"))?;
    let address = address.parse::<Address>().map_err(|e| e.to_string())?;
    let amount = amount.parse::<u64>().map_err(|e| e.to_string())?;
    Ok((address, amount))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if let Cmd::Verify { ticket } = &args.command {
        let raw = std::fs::read_to_string(ticket)
            .with_context(|| format!("failed to read {}", ticket.display()))?;
        let ticket: ClaimTicket = serde_json::from_str(&raw).context("malformed claim ticket")?;
        if !ticket.verify() {
            bail!("proof does not match root {}", ticket.root);
        }
        println!("valid: {} may claim {}", ticket.leaf.address, ticket.leaf.amount);
        return Ok(());
    }

    let dir = args.config.snapshot_dir.clone();
    let service = CampaignService::new(args.config, Arc::new(LogLedger));
    if dir.is_dir() {
        service.restore(&dir).await?;
    }

    let changed = match args.command {
        Cmd::Launch {
            launcher,
            mint,
            fund,
        } => {
            let id = service.initialize_campaign(launcher, mint, fund).await?;
            println!("{id}");
            true
        }
        Cmd::Distribute { campaign, to } => {
            print_json(&service.distribute_rewards(&campaign, to).await?)?;
            true
        }
        Cmd::Update { campaign, add, set } => {
            print_json(&service.update_merkle_tree(&campaign, add, set).await?)?;
            true
        }
        Cmd::Proof { campaign, address } => {
            match service.merkle_proof(&campaign, address).await? {
                Some(ticket) => print_json(&ticket)?,
                None => bail!("{address} has no allocation in campaign {campaign}"),
            }
            false
        }
        Cmd::Claim { campaign, address } => {
            if !service.mark_claimed(&campaign, address).await? {
                bail!("{address} is not a participant of campaign {campaign}");
            }
            true
        }
        Cmd::Stats { campaign: Some(id) } => {
            print_json(&service.campaign_stats(&id).await?)?;
            false
        }
        Cmd::Stats { campaign: None } => {
            print_json(&service.all_campaigns().await?)?;
            false
        }
        Cmd::Verify { .. } => false,
    };

    if changed {
        let count = service.dump(&dir).await?;
        info!("saved {count} campaigns to {}", dir.display());
    }
    service.shutdown().await;
    Ok(())
}
