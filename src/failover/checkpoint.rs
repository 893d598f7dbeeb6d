//! Shift checkpoints.
//!
//! The orchestrator records the last applied step of every shift that is
//! in effect, so a restarted process can tell a completed failover from
//! one interrupted mid-sequence.

use crate::config::FailoverPairConfig;
use crate::core::{now, RegionId, Result, Timestamp};
use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Progress of one primary's traffic shift.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftCheckpoint {
    pub primary: RegionId,
    pub secondary: RegionId,
    /// Step list the shift was started with
    pub steps: Vec<u8>,
    pub last_applied_percent: u8,
    pub updated_at: Timestamp,
}

impl ShiftCheckpoint {
    /// Create a checkpoint for `pair` at `percent`.
    pub fn new(pair: &FailoverPairConfig, steps: &[u8], percent: u8) -> Self {
        Self {
            primary: pair.primary.clone(),
            secondary: pair.secondary.clone(),
            steps: steps.to_vec(),
            last_applied_percent: percent,
            updated_at: now(),
        }
    }

    /// Check if the final step was applied.
    pub fn is_complete(&self) -> bool {
        self.last_applied_percent >= 100
    }

    /// Steps not yet applied.
    pub fn remaining_steps(&self) -> Vec<u8> {
        self.steps
            .iter()
            .copied()
            .filter(|p| *p > self.last_applied_percent)
            .collect()
    }
}

/// Exclusive claim on one primary's shift, released when dropped.
#[derive(Debug)]
pub struct ShiftLease {
    primary: RegionId,
    /// Locked file backing a lease shared between processes
    file: Option<File>,
}

impl ShiftLease {
    /// Lease with nothing behind it, for stores private to one process.
    pub fn local(primary: &str) -> Self {
        Self {
            primary: primary.to_string(),
            file: None,
        }
    }

    fn locked(primary: &str, file: File) -> Self {
        Self {
            primary: primary.to_string(),
            file: Some(file),
        }
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }
}

impl Drop for ShiftLease {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                debug!(region = %self.primary, error = %e, "Lease unlock failed, released on close");
            }
        }
    }
}

/// Storage for shift checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Claim the shift of `primary`. `Ok(None)` means another holder has
    /// it. The claim lasts until the returned lease is dropped.
    ///
    /// Stores private to one process have no other holder to exclude.
    async fn try_lease(&self, primary: &str) -> Result<Option<ShiftLease>> {
        Ok(Some(ShiftLease::local(primary)))
    }

    /// Insert or replace the checkpoint of a primary.
    async fn save(&self, checkpoint: &ShiftCheckpoint) -> Result<()>;

    /// Drop the checkpoint of a primary. Missing entries are not an error.
    async fn remove(&self, primary: &str) -> Result<()>;

    /// All stored checkpoints, ordered by primary.
    async fn load_all(&self) -> Result<Vec<ShiftCheckpoint>>;

    /// Store name for logs.
    fn name(&self) -> &str;
}

/// Process-local checkpoint store.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    entries: RwLock<BTreeMap<RegionId, ShiftCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &ShiftCheckpoint) -> Result<()> {
        self.entries
            .write()
            .insert(checkpoint.primary.clone(), checkpoint.clone());
        Ok(())
    }

    async fn remove(&self, primary: &str) -> Result<()> {
        self.entries.write().remove(primary);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<ShiftCheckpoint>> {
        Ok(self.entries.read().values().cloned().collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// One JSON file per primary in a directory.
///
/// Leases are advisory locks on a `.lock` file next to the checkpoint, so
/// every process sharing the directory sees them and a crashed holder
/// releases its lease with the process.
pub struct JsonFileCheckpointStore {
    dir: PathBuf,
}

impl JsonFileCheckpointStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, primary: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(primary)))
    }

    fn lock_path_for(&self, primary: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", file_stem(primary)))
    }
}

/// Escape a region id into a file stem. ASCII letters, digits and `-` are
/// kept; every other byte, `_` included, becomes `_xx`, so distinct ids
/// never share a file.
fn file_stem(primary: &str) -> String {
    let mut stem = String::with_capacity(primary.len());
    for byte in primary.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("_{:02x}", byte));
        }
    }
    stem
}

#[async_trait]
impl CheckpointStore for JsonFileCheckpointStore {
    async fn try_lease(&self, primary: &str) -> Result<Option<ShiftLease>> {
        let path = self.lock_path_for(primary);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        if let Err(e) = file.try_lock_exclusive() {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                debug!(region = %primary, path = %path.display(), "Shift lease held elsewhere");
                return Ok(None);
            }
            return Err(e.into());
        }

        // Owner details for operators inspecting the directory.
        file.set_len(0)?;
        let owner = serde_json::json!({
            "primary": primary,
            "pid": std::process::id(),
            "acquired_at": now(),
        });
        writeln!(file, "{}", owner)?;
        debug!(region = %primary, path = %path.display(), "Shift lease acquired");
        Ok(Some(ShiftLease::locked(primary, file)))
    }

    async fn save(&self, checkpoint: &ShiftCheckpoint) -> Result<()> {
        let path = self.path_for(&checkpoint.primary);
        let staging = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::write(&staging, body).await?;
        tokio::fs::rename(&staging, &path).await?;
        debug!(path = %path.display(), percent = checkpoint.last_applied_percent, "Checkpoint saved");
        Ok(())
    }

    async fn remove(&self, primary: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(primary)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_all(&self) -> Result<Vec<ShiftCheckpoint>> {
        let mut checkpoints = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = tokio::fs::read(&path).await?;
            checkpoints.push(serde_json::from_slice::<ShiftCheckpoint>(&raw)?);
        }
        checkpoints.sort_by(|a, b| a.primary.cmp(&b.primary));
        Ok(checkpoints)
    }

    fn name(&self) -> &str {
        "json_file"
    }
}
