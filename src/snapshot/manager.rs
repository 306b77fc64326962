//! Snapshot storage.
//!
//! Writes violation evidence JPEGs into a stable, human-browsable layout:
//! `violations/{owner}/{channel}/{YYYY-MM-DD}/{track}_{type}_{epoch}[_resolved].jpg`.
//! Files land via a temp-file rename so a partially written image is never
//! visible at its final path. A background service prunes date partitions
//! older than the retention window.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use log::{error, info, warn};
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SnapshotConfig;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Onset,
    Resolution,
}

#[derive(Debug, Clone)]
pub struct SnapshotManager {
    root: PathBuf,
}

impl SnapshotManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &SnapshotConfig) -> Self {
        Self::new(config.root.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write one snapshot and return its path for persistence.
    pub async fn write(
        &self,
        owner_id: Uuid,
        channel_id: Uuid,
        track_id: u32,
        violation_type: &str,
        at: DateTime<Utc>,
        kind: SnapshotKind,
        jpeg: &[u8],
    ) -> Result<String, Error> {
        let dir = self
            .root
            .join(owner_id.to_string())
            .join(channel_id.to_string())
            .join(at.format("%Y-%m-%d").to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Snapshot(format!("create {}: {}", dir.display(), e)))?;

        let suffix = match kind {
            SnapshotKind::Onset => "",
            SnapshotKind::Resolution => "_resolved",
        };
        let name = format!(
            "{}_{}_{}{}.jpg",
            track_id,
            violation_type,
            at.timestamp(),
            suffix
        );
        let path = dir.join(&name);
        let tmp = dir.join(format!(".{}.tmp", name));

        tokio::fs::write(&tmp, jpeg)
            .await
            .map_err(|e| Error::Snapshot(format!("write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Snapshot(format!("rename {}: {}", path.display(), e)))?;

        Ok(path.to_string_lossy().into_owned())
    }
}

/// Retention sweeper for the snapshot store. One instance per process.
pub struct SnapshotCleanupService {
    config: SnapshotConfig,
    cancel: CancellationToken,
}

impl SnapshotCleanupService {
    pub fn new(config: SnapshotConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    /// Start the sweep loop in the background.
    pub fn start(self: Arc<Self>) {
        if !self.config.cleanup_enabled {
            info!("snapshot cleanup is disabled");
            return;
        }

        info!(
            "starting snapshot cleanup: retention {} days, sweep every {}s",
            self.config.retention_days, self.config.cleanup_interval_secs
        );

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(self.config.cleanup_interval_secs));
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                match self.run_cleanup(Utc::now()).await {
                    Ok(removed) if removed > 0 => {
                        info!("snapshot cleanup removed {} expired date partitions", removed)
                    }
                    Ok(_) => {}
                    Err(e) => error!("snapshot cleanup failed: {}", e),
                }
            }
        });
    }

    /// One sweep: remove date partitions older than the retention window.
    /// Returns the number of removed partitions.
    pub async fn run_cleanup(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = (now - chrono::Duration::days(self.config.retention_days)).date_naive();
        let root = self.config.root.clone();
        let removed = tokio::task::spawn_blocking(move || sweep_expired(&root, cutoff)).await??;
        Ok(removed)
    }
}

fn sweep_expired(root: &Path, cutoff: NaiveDate) -> Result<u64> {
    let mut removed = 0u64;
    if !root.exists() {
        return Ok(0);
    }

    // root/{owner}/{channel}/{date}
    for owner in read_subdirs(root)? {
        for channel in read_subdirs(&owner)? {
            for partition in read_subdirs(&channel)? {
                let Some(name) = partition.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let Ok(date) = NaiveDate::parse_from_str(name, "%Y-%m-%d") else {
                    // Not a date partition; leave it alone.
                    continue;
                };
                if date < cutoff {
                    match std::fs::remove_dir_all(&partition) {
                        Ok(()) => removed += 1,
                        Err(e) => warn!("failed to remove {}: {}", partition.display(), e),
                    }
                }
            }
        }
    }
    Ok(removed)
}

fn read_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}
