//! Player profile persistence.
//!
//! The profile store is an external collaborator: the room reads a profile
//! at join and persists aggregated stats on a debounced schedule. Writes
//! are fire-and-forget from the tick loop's perspective; a failed write is
//! logged, kept dirty, and retried on the next flush.

use anyhow::Context;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::game::state::Faction;

/// Flush cadence for the debounced writer
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Deletion batch size for the wipe command
pub const WIPE_BATCH_SIZE: usize = 100;

/// Aggregated long-term stats for one player
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub faction: Option<Faction>,
    #[serde(rename = "totalCrypto", default)]
    pub total_crypto: i64,
    #[serde(default)]
    pub crypto: i64,
    #[serde(rename = "r", default)]
    pub rank: u32,
    #[serde(default)]
    pub kills: u32,
    #[serde(default)]
    pub deaths: u32,
    #[serde(default)]
    pub badges: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// External profile storage contract
pub trait ProfileStore: Send + Sync {
    fn load(&self, uid: &str) -> anyhow::Result<Option<PlayerProfile>>;
    fn save(&self, profile: &PlayerProfile) -> anyhow::Result<()>;
    fn list_uids(&self) -> anyhow::Result<Vec<String>>;
    fn delete(&self, uid: &str) -> anyhow::Result<()>;
}

/// Directory-of-JSON-files implementation
pub struct JsonProfileStore {
    dir: PathBuf,
}

impl JsonProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating profile dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, uid: &str) -> PathBuf {
        // Keep the filename safe regardless of what the auth layer hands us
        let safe: String = uid
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

impl ProfileStore for JsonProfileStore {
    fn load(&self, uid: &str) -> anyhow::Result<Option<PlayerProfile>> {
        let path = self.path_for(uid);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)
            .with_context(|| format!("reading profile {}", path.display()))?;
        let profile = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing profile {}", path.display()))?;
        Ok(Some(profile))
    }

    fn save(&self, profile: &PlayerProfile) -> anyhow::Result<()> {
        let path = self.path_for(&profile.uid);
        let bytes = serde_json::to_vec_pretty(profile)?;
        std::fs::write(&path, bytes)
            .with_context(|| format!("writing profile {}", path.display()))
    }

    fn list_uids(&self) -> anyhow::Result<Vec<String>> {
        let mut uids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(uid) = name.strip_suffix(".json") {
                uids.push(uid.to_string());
            }
        }
        uids.sort();
        Ok(uids)
    }

    fn delete(&self, uid: &str) -> anyhow::Result<()> {
        let path = self.path_for(uid);
        std::fs::remove_file(&path)
            .with_context(|| format!("deleting profile {}", path.display()))
    }
}

/// Debounced dirty-set writer between the room and the store
pub struct ProfileWriter {
    store: Arc<dyn ProfileStore>,
    dirty: Mutex<HashMap<String, PlayerProfile>>,
}

impl ProfileWriter {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self {
            store,
            dirty: Mutex::new(HashMap::new()),
        }
    }

    /// Queue a profile for the next flush; the newest snapshot wins
    pub fn mark_dirty(&self, profile: PlayerProfile) {
        if profile.uid.is_empty() {
            return;
        }
        self.dirty.lock().insert(profile.uid.clone(), profile);
    }

    pub fn pending(&self) -> usize {
        self.dirty.lock().len()
    }

    /// Write everything dirty. Failures are kept for the next flush
    /// (transient-I/O policy: log and keep serving).
    pub fn flush(&self) -> usize {
        let snapshot: Vec<PlayerProfile> = {
            let mut dirty = self.dirty.lock();
            dirty.drain().map(|(_, p)| p).collect()
        };
        let mut written = 0;
        for profile in snapshot {
            match self.store.save(&profile) {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!("profile write failed for {}: {}, will retry", profile.uid, e);
                    self.dirty.lock().entry(profile.uid.clone()).or_insert(profile);
                }
            }
        }
        if written > 0 {
            debug!("flushed {} profiles", written);
        }
        written
    }

    /// Background flush task; completion is never awaited by the tick loop
    pub fn spawn_flusher(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.flush();
            }
        });
    }
}

/// Summary printed by the wipe command
#[derive(Debug, Default)]
pub struct WipeSummary {
    pub deleted: usize,
    pub batches: usize,
}

/// Wipe all external profile storage in batches. Stops on the first
/// failure; callers exit non-zero in that case.
pub fn wipe_profiles(store: &dyn ProfileStore, batch_size: usize) -> anyhow::Result<WipeSummary> {
    let uids = store.list_uids().context("listing profiles")?;
    let mut summary = WipeSummary::default();

    for batch in uids.chunks(batch_size.max(1)) {
        for uid in batch {
            store
                .delete(uid)
                .with_context(|| format!("wipe failed at profile {}", uid))?;
            summary.deleted += 1;
        }
        summary.batches += 1;
        info!("wiped batch {} ({} profiles so far)", summary.batches, summary.deleted);
    }
    Ok(summary)
}
