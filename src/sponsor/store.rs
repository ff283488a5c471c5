//! Sponsor slot stores: moons, billboards, and cluster-bound sponsors.
//!
//! One manifest file on disk holds all three. Mutations come from the admin
//! REST surface, guarded by the store's own lock (the only world-adjacent
//! state mutated outside the tick loop). Every successful mutation bakes
//! uploaded patterns to on-disk PNGs first, persists the manifest, then
//! fires the reload hook so clients are never handed a URL that does not
//! exist yet.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::game::state::ClusterId;
use crate::net::protocol::{SponsorWire, SponsorsWire};
use crate::sponsor::pixel::{self, PixelError};

/// Moon slots (one sponsor per moon)
pub const MOON_SLOTS: usize = 3;
/// Billboard slots around the planet
pub const BILLBOARD_SLOTS: usize = 18;

/// A sponsor as stored in the manifest. `pattern_image` is the raw upload
/// (base64); `pattern_url` is the baked file the clients use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sponsor {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagline: Option<String>,
    #[serde(rename = "linkUrl", default, skip_serializing_if = "Option::is_none")]
    pub link_url: Option<String>,
    #[serde(rename = "patternImage", default, skip_serializing_if = "Option::is_none")]
    pub pattern_image: Option<String>,
    #[serde(rename = "patternUrl", default, skip_serializing_if = "Option::is_none")]
    pub pattern_url: Option<String>,
}

impl Sponsor {
    fn to_wire(&self) -> SponsorWire {
        SponsorWire {
            name: self.name.clone(),
            tagline: self.tagline.clone(),
            link_url: self.link_url.clone(),
            pattern_url: self.pattern_url.clone(),
        }
    }

    /// List responses default to the stripped form: URL only, no base64
    fn stripped(&self) -> Sponsor {
        Sponsor {
            pattern_image: None,
            ..self.clone()
        }
    }
}

/// Which fixed-slot store a request addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Moon,
    Billboard,
}

impl SlotKind {
    pub fn capacity(self) -> usize {
        match self {
            SlotKind::Moon => MOON_SLOTS,
            SlotKind::Billboard => BILLBOARD_SLOTS,
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            SlotKind::Moon => "moon",
            SlotKind::Billboard => "billboard",
        }
    }
}

/// The on-disk manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SponsorManifest {
    moons: Vec<Option<Sponsor>>,
    billboards: Vec<Option<Sponsor>>,
    clusters: HashMap<String, Sponsor>,
}

impl Default for SponsorManifest {
    fn default() -> Self {
        Self {
            moons: vec![None; MOON_SLOTS],
            billboards: vec![None; BILLBOARD_SLOTS],
            clusters: HashMap::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SponsorError {
    #[error("slot index {0} out of range")]
    SlotOutOfRange(usize),
    #[error("slot {0} is already empty")]
    EmptySlot(usize),
    #[error("cluster {0} has no sponsor")]
    EmptyCluster(ClusterId),
    #[error("validation failed")]
    Invalid(Vec<String>),
    #[error("pattern bake failed: {0}")]
    Pattern(#[from] PixelError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

type ReloadHook = Box<dyn Fn(SponsorsWire) + Send + Sync>;

pub struct SponsorStore {
    inner: Mutex<SponsorManifest>,
    path: PathBuf,
    textures_dir: PathBuf,
    reload_hook: Mutex<Option<ReloadHook>>,
}

impl SponsorStore {
    /// Load the manifest, or start empty when the file does not exist
    pub fn load_or_default(
        path: impl Into<PathBuf>,
        textures_dir: impl Into<PathBuf>,
    ) -> Result<Self, SponsorError> {
        let path = path.into();
        let manifest = if path.exists() {
            let bytes = std::fs::read(&path)?;
            let mut manifest: SponsorManifest = serde_json::from_slice(&bytes)?;
            manifest.moons.resize(MOON_SLOTS, None);
            manifest.billboards.resize(BILLBOARD_SLOTS, None);
            info!("loaded sponsor manifest from {}", path.display());
            manifest
        } else {
            SponsorManifest::default()
        };

        Ok(Self {
            inner: Mutex::new(manifest),
            path,
            textures_dir: textures_dir.into(),
            reload_hook: Mutex::new(None),
        })
    }

    /// Wire the live-reload callback (the room's sponsors-reloaded
    /// rebroadcast)
    pub fn set_reload_hook(&self, hook: ReloadHook) {
        *self.reload_hook.lock() = Some(hook);
    }

    /// Sponsor ids per cluster, for stamping the world at startup
    pub fn cluster_sponsor_ids(&self) -> hashbrown::HashMap<ClusterId, String> {
        self.inner
            .lock()
            .clusters
            .iter()
            .filter_map(|(key, sponsor)| {
                key.parse::<ClusterId>()
                    .ok()
                    .map(|id| (id, sponsor.id.clone()))
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Fixed-slot stores
    // ------------------------------------------------------------------

    pub fn get_all(&self, kind: SlotKind, full: bool) -> Vec<Option<Sponsor>> {
        let manifest = self.inner.lock();
        let slots = match kind {
            SlotKind::Moon => &manifest.moons,
            SlotKind::Billboard => &manifest.billboards,
        };
        slots
            .iter()
            .map(|s| s.as_ref().map(|s| if full { s.clone() } else { s.stripped() }))
            .collect()
    }

    pub fn get(&self, kind: SlotKind, index: usize, full: bool) -> Result<Sponsor, SponsorError> {
        if index >= kind.capacity() {
            return Err(SponsorError::SlotOutOfRange(index));
        }
        let manifest = self.inner.lock();
        let slots = match kind {
            SlotKind::Moon => &manifest.moons,
            SlotKind::Billboard => &manifest.billboards,
        };
        slots[index]
            .as_ref()
            .map(|s| if full { s.clone() } else { s.stripped() })
            .ok_or(SponsorError::EmptySlot(index))
    }

    pub fn assign(
        &self,
        kind: SlotKind,
        index: usize,
        mut sponsor: Sponsor,
    ) -> Result<(), SponsorError> {
        let mut errors = validate(&sponsor);
        if index >= kind.capacity() {
            errors.push(format!(
                "slot index {} out of range (max {})",
                index,
                kind.capacity() - 1
            ));
        }
        if !errors.is_empty() {
            return Err(SponsorError::Invalid(errors));
        }

        // Bake before anything becomes visible
        if let Some(image) = &sponsor.pattern_image {
            let file = format!("{}{}.png", kind.prefix(), index);
            pixel::bake_pattern(image, &self.textures_dir.join(&file))?;
            sponsor.pattern_url = Some(format!("/sponsor-textures/{}", file));
        }

        {
            let mut manifest = self.inner.lock();
            let slots = match kind {
                SlotKind::Moon => &mut manifest.moons,
                SlotKind::Billboard => &mut manifest.billboards,
            };
            slots[index] = Some(sponsor);
            self.persist(&manifest)?;
        }
        self.fire_reload();
        Ok(())
    }

    pub fn clear(&self, kind: SlotKind, index: usize) -> Result<(), SponsorError> {
        if index >= kind.capacity() {
            return Err(SponsorError::SlotOutOfRange(index));
        }
        {
            let mut manifest = self.inner.lock();
            let slots = match kind {
                SlotKind::Moon => &mut manifest.moons,
                SlotKind::Billboard => &mut manifest.billboards,
            };
            if slots[index].take().is_none() {
                return Err(SponsorError::EmptySlot(index));
            }
            self.persist(&manifest)?;
        }
        self.fire_reload();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cluster-bound store (same contract, keyed by cluster id)
    // ------------------------------------------------------------------

    pub fn cluster_all(&self, full: bool) -> HashMap<String, Sponsor> {
        self.inner
            .lock()
            .clusters
            .iter()
            .map(|(k, s)| (k.clone(), if full { s.clone() } else { s.stripped() }))
            .collect()
    }

    pub fn cluster_get(&self, cluster: ClusterId, full: bool) -> Result<Sponsor, SponsorError> {
        self.inner
            .lock()
            .clusters
            .get(&cluster.to_string())
            .map(|s| if full { s.clone() } else { s.stripped() })
            .ok_or(SponsorError::EmptyCluster(cluster))
    }

    pub fn cluster_assign(
        &self,
        cluster: ClusterId,
        mut sponsor: Sponsor,
    ) -> Result<(), SponsorError> {
        let errors = validate(&sponsor);
        if !errors.is_empty() {
            return Err(SponsorError::Invalid(errors));
        }
        if let Some(image) = &sponsor.pattern_image {
            let file = format!("cluster{}.png", cluster);
            pixel::bake_pattern(image, &self.textures_dir.join(&file))?;
            sponsor.pattern_url = Some(format!("/sponsor-textures/{}", file));
        }
        {
            let mut manifest = self.inner.lock();
            manifest.clusters.insert(cluster.to_string(), sponsor);
            self.persist(&manifest)?;
        }
        self.fire_reload();
        Ok(())
    }

    pub fn cluster_clear(&self, cluster: ClusterId) -> Result<(), SponsorError> {
        {
            let mut manifest = self.inner.lock();
            if manifest.clusters.remove(&cluster.to_string()).is_none() {
                return Err(SponsorError::EmptyCluster(cluster));
            }
            self.persist(&manifest)?;
        }
        self.fire_reload();
        Ok(())
    }

    // ------------------------------------------------------------------

    /// The roster clients see: URLs only
    pub fn wire(&self) -> SponsorsWire {
        let manifest = self.inner.lock();
        let slot_map = |slots: &[Option<Sponsor>]| {
            slots
                .iter()
                .enumerate()
                .filter_map(|(i, s)| s.as_ref().map(|s| (i.to_string(), s.to_wire())))
                .collect()
        };
        SponsorsWire {
            moons: slot_map(&manifest.moons),
            billboards: slot_map(&manifest.billboards),
            clusters: manifest
                .clusters
                .iter()
                .map(|(k, s)| (k.clone(), s.to_wire()))
                .collect(),
        }
    }

    fn persist(&self, manifest: &SponsorManifest) -> Result<(), SponsorError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(manifest)?)?;
        Ok(())
    }

    fn fire_reload(&self) {
        let wire = self.wire();
        if let Some(hook) = self.reload_hook.lock().as_ref() {
            hook(wire);
        } else {
            warn!("sponsor mutation before the reload hook was wired");
        }
    }
}

fn validate(sponsor: &Sponsor) -> Vec<String> {
    let mut errors = Vec::new();
    if sponsor.id.trim().is_empty() {
        errors.push("id is required".to_string());
    }
    if !sponsor
        .id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        errors.push("id may only contain letters, digits, dashes".to_string());
    }
    if sponsor.name.trim().is_empty() {
        errors.push("name is required".to_string());
    }
    if sponsor.name.len() > 64 {
        errors.push("name too long (max 64)".to_string());
    }
    if let Some(url) = &sponsor.link_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push("linkUrl must be http(s)".to_string());
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn temp_store(tag: &str) -> SponsorStore {
        static N: AtomicUsize = AtomicUsize::new(0);
        let base = std::env::temp_dir().join(format!(
            "adlands-sponsors-{}-{}-{}",
            tag,
            std::process::id(),
            N.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = std::fs::remove_dir_all(&base);
        std::fs::create_dir_all(&base).unwrap();
        SponsorStore::load_or_default(base.join("sponsors.json"), base.join("textures")).unwrap()
    }

    fn sponsor(id: &str) -> Sponsor {
        Sponsor {
            id: id.into(),
            name: format!("{} Corp", id),
            tagline: Some("buy things".into()),
            link_url: Some("https://example.com".into()),
            pattern_image: None,
            pattern_url: None,
        }
    }

    #[test]
    fn test_assign_and_get() {
        let store = temp_store("assign");
        store.assign(SlotKind::Moon, 1, sponsor("acme")).unwrap();
        let got = store.get(SlotKind::Moon, 1, false).unwrap();
        assert_eq!(got.id, "acme");
        assert!(store.get(SlotKind::Moon, 0, false).is_err());
    }

    #[test]
    fn test_out_of_range_rejected_with_errors() {
        let store = temp_store("range");
        match store.assign(SlotKind::Moon, MOON_SLOTS, sponsor("acme")) {
            Err(SponsorError::Invalid(errors)) => {
                assert!(errors.iter().any(|e| e.contains("out of range")));
            }
            other => panic!("expected validation error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_validation_lists_all_problems() {
        let store = temp_store("validate");
        let bad = Sponsor {
            id: "".into(),
            name: "".into(),
            link_url: Some("ftp://nope".into()),
            ..Default::default()
        };
        match store.assign(SlotKind::Billboard, 0, bad) {
            Err(SponsorError::Invalid(errors)) => {
                assert!(errors.len() >= 3, "got {:?}", errors);
            }
            other => panic!("expected validation error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_clear_empty_slot_is_error() {
        let store = temp_store("clear");
        assert!(matches!(
            store.clear(SlotKind::Billboard, 4),
            Err(SponsorError::EmptySlot(4))
        ));
        store.assign(SlotKind::Billboard, 4, sponsor("x")).unwrap();
        store.clear(SlotKind::Billboard, 4).unwrap();
        assert!(matches!(
            store.clear(SlotKind::Billboard, 4),
            Err(SponsorError::EmptySlot(4))
        ));
    }

    #[test]
    fn test_persistence_roundtrip() {
        let store = temp_store("persist");
        let path = store.path.clone();
        let textures = store.textures_dir.clone();
        store.assign(SlotKind::Moon, 0, sponsor("durable")).unwrap();
        store.cluster_assign(7, sponsor("landlord")).unwrap();
        drop(store);

        let reloaded = SponsorStore::load_or_default(path, textures).unwrap();
        assert_eq!(reloaded.get(SlotKind::Moon, 0, true).unwrap().id, "durable");
        assert_eq!(reloaded.cluster_get(7, true).unwrap().id, "landlord");
    }

    #[test]
    fn test_admin_json_roundtrip_equality() {
        // Saving then re-loading a sponsor returns equal JSON (full form)
        let store = temp_store("json-eq");
        let s = sponsor("roundtrip");
        store.assign(SlotKind::Billboard, 3, s.clone()).unwrap();
        let got = store.get(SlotKind::Billboard, 3, true).unwrap();
        assert_eq!(
            serde_json::to_value(&s).unwrap(),
            serde_json::to_value(&got).unwrap()
        );
    }

    #[test]
    fn test_pattern_bake_on_assign() {
        let store = temp_store("bake");
        let mut s = sponsor("patterned");
        s.pattern_image = Some(crate::sponsor::pixel::tests::test_pattern_base64(40, 40));

        let reloads = Arc::new(AtomicUsize::new(0));
        let seen_url = Arc::new(parking_lot::Mutex::new(None::<String>));
        {
            let reloads = reloads.clone();
            let seen_url = seen_url.clone();
            store.set_reload_hook(Box::new(move |wire| {
                reloads.fetch_add(1, Ordering::SeqCst);
                if let Some(s) = wire.billboards.get("3") {
                    *seen_url.lock() = s.pattern_url.clone();
                }
            }));
        }

        store.assign(SlotKind::Billboard, 3, s).unwrap();

        assert_eq!(reloads.load(Ordering::SeqCst), 1);
        let url = seen_url.lock().clone().expect("patternUrl in reload");
        assert_eq!(url, "/sponsor-textures/billboard3.png");
        // The baked file exists before the hook fired; verify on disk
        assert!(store.textures_dir.join("billboard3.png").exists());

        // List responses strip the upload unless full=1
        let listed = store.get_all(SlotKind::Billboard, false);
        let entry = listed[3].as_ref().unwrap();
        assert!(entry.pattern_image.is_none());
        assert_eq!(entry.pattern_url.as_deref(), Some("/sponsor-textures/billboard3.png"));
        let full = store.get_all(SlotKind::Billboard, true);
        assert!(full[3].as_ref().unwrap().pattern_image.is_some());
    }

    #[test]
    fn test_cluster_store_same_contract() {
        let store = temp_store("cluster");
        assert!(matches!(
            store.cluster_clear(12),
            Err(SponsorError::EmptyCluster(12))
        ));
        store.cluster_assign(12, sponsor("tenant")).unwrap();
        assert_eq!(store.cluster_get(12, false).unwrap().id, "tenant");
        let ids = store.cluster_sponsor_ids();
        assert_eq!(ids.get(&12).map(String::as_str), Some("tenant"));
        store.cluster_clear(12).unwrap();
    }
}
