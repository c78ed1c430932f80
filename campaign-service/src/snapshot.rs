//! Dump and restore of campaign snapshots, one `<campaign id>.json` per campaign.
//!
//! File work happens on a blocking thread. Restores are all or nothing: every file in the
//! directory has to parse and rebuild before any campaign is handed back.
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::debug;

use crate::campaign::{Campaign, CampaignSnapshot};

const EXTENSION: &str = "json";

pub fn dump_sync(dir: &Path, snapshots: &[CampaignSnapshot]) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    for snapshot in snapshots {
        let path = dir.join(format!("{}.{EXTENSION}", snapshot.id));
        // temp file, then rename
        let tmp = path.with_extension("json.tmp");
        let mut out = BufWriter::new(
            File::create(&tmp).with_context(|| format!("failed to create {}", tmp.display()))?,
        );
        serde_json::to_writer_pretty(&mut out, snapshot)
            .with_context(|| format!("failed to serialize campaign {}", snapshot.id))?;
        out.flush()?;
        drop(out);
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to move snapshot into {}", path.display()))?;
        debug!("dumped campaign {} to {}", snapshot.id, path.display());
    }
    Ok(())
}

pub fn restore_sync(dir: &Path) -> Result<Vec<Campaign>> {
    if !dir.is_dir() {
        bail!("snapshot directory {} does not exist", dir.display());
    }
    let mut paths = Vec::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut campaigns = Vec::with_capacity(paths.len());
    for path in paths {
        let file =
            File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
        let snapshot: CampaignSnapshot = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("malformed snapshot {}", path.display()))?;
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if stem != snapshot.id.to_string() {
            bail!("{} holds campaign {}", path.display(), snapshot.id);
        }
        let campaign = Campaign::from_snapshot(snapshot)
            .with_context(|| format!("inconsistent snapshot {}", path.display()))?;
        campaigns.push(campaign);
    }
    Ok(campaigns)
}

pub async fn perform_dump(dir: PathBuf, snapshots: Vec<CampaignSnapshot>) -> Result<()> {
    tokio::task::spawn_blocking(move || dump_sync(&dir, &snapshots))
        .await
        .context("dump task failed")?
}

pub async fn perform_restore(dir: PathBuf) -> Result<Vec<Campaign>> {
    tokio::task::spawn_blocking(move || restore_sync(&dir))
        .await
        .context("restore task failed")?
}
