//! Resolution preferences and candidate ranking
//!
//! A constraints preferrer remembers, per device, which resolution the user
//! prefers, keeps that preference valid as capabilities change and ranks the
//! stream configurations the session should try.

pub mod photo;
pub mod video;

pub use photo::PhotoConstraintsPreferrer;
pub use video::VideoConstraintsPreferrer;

use crate::errors::NotFoundError;
use crate::preferences::PreferenceStore;
use crate::types::{CapabilitySnapshot, CaptureCandidate, DeviceId, Resolution};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub trait ConstraintsPreferrer: Send + Sync {
    /// Preferred resolution of a device
    fn preferred_resolution(&self, device_id: &str) -> Result<Resolution, NotFoundError>;

    /// Take in a new capability snapshot set, repair invalidated preferences
    /// and persist the whole preference map once
    fn on_capabilities_updated(&self, snapshots: &[CapabilitySnapshot]);

    /// User override. Ignored unless the device currently reports `resolution`.
    fn set_preferred_resolution(&self, device_id: &str, resolution: Resolution);

    /// Ranked `(capture resolution, preview constraints)` pairs, most preferred first
    fn sorted_candidates(
        &self,
        device_id: &str,
        preview_resolutions: &[Resolution],
    ) -> Vec<CaptureCandidate>;
}

/// Persisted preference of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceRecord {
    pub preferred_resolution: Resolution,
    /// Last chosen constant fps, keyed by `WxH`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub preferred_const_fps: BTreeMap<String, u32>,
}

impl PreferenceRecord {
    fn new(preferred_resolution: Resolution) -> Self {
        Self {
            preferred_resolution,
            preferred_const_fps: BTreeMap::new(),
        }
    }
}

/// First resolution of maximal area
pub(crate) fn max_area(resolutions: &[Resolution]) -> Option<Resolution> {
    resolutions.iter().fold(None, |best: Option<Resolution>, r| match best {
        Some(b) if b.area() >= r.area() => Some(b),
        _ => Some(*r),
    })
}

/// Preference map shared by both preferrers, persisted under one key
pub(crate) struct PreferenceBook {
    key: &'static str,
    store: Arc<dyn PreferenceStore>,
    records: BTreeMap<DeviceId, PreferenceRecord>,
    known: HashMap<DeviceId, CapabilitySnapshot>,
}

impl PreferenceBook {
    pub(crate) fn load(store: Arc<dyn PreferenceStore>, key: &'static str) -> Self {
        let records = match store.get(key) {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                log::warn!("Discarding unreadable preferences under {}: {}", key, e);
                BTreeMap::new()
            }),
            None => BTreeMap::new(),
        };

        Self {
            key,
            store,
            records,
            known: HashMap::new(),
        }
    }

    pub(crate) fn record(&self, device_id: &str) -> Option<&PreferenceRecord> {
        self.records.get(device_id)
    }

    pub(crate) fn record_mut(&mut self, device_id: &str) -> Option<&mut PreferenceRecord> {
        self.records.get_mut(device_id)
    }

    pub(crate) fn known(&self, device_id: &str) -> Option<&CapabilitySnapshot> {
        self.known.get(device_id)
    }

    pub(crate) fn preferred(&self, device_id: &str) -> Result<Resolution, NotFoundError> {
        self.records
            .get(device_id)
            .map(|r| r.preferred_resolution)
            .ok_or_else(|| NotFoundError {
                device_id: device_id.to_string(),
            })
    }

    pub(crate) fn update(
        &mut self,
        snapshots: &[CapabilitySnapshot],
        resolutions_of: fn(&CapabilitySnapshot) -> Vec<Resolution>,
    ) {
        // Records outlive unplugged devices, their snapshots do not
        self.known = snapshots
            .iter()
            .map(|s| (s.device_id.clone(), s.clone()))
            .collect();

        for snapshot in snapshots {
            let id = snapshot.device_id.clone();

            let resolutions = resolutions_of(snapshot);
            let Some(largest) = max_area(&resolutions) else {
                continue;
            };

            let record = self
                .records
                .entry(id.clone())
                .or_insert_with(|| PreferenceRecord::new(largest));
            if !resolutions.contains(&record.preferred_resolution) {
                log::info!(
                    "Preferred resolution {} no longer offered by {}, using {}",
                    record.preferred_resolution,
                    id,
                    largest
                );
                record.preferred_resolution = largest;
            }
            record.preferred_const_fps.retain(|key, _| {
                key.parse::<Resolution>()
                    .map(|r| resolutions.contains(&r))
                    .unwrap_or(false)
            });
        }

        self.persist();
    }

    /// Apply a user override if the device offers the resolution
    pub(crate) fn set_preferred(
        &mut self,
        device_id: &str,
        resolution: Resolution,
        resolutions_of: fn(&CapabilitySnapshot) -> Vec<Resolution>,
    ) -> bool {
        let offered = self
            .known
            .get(device_id)
            .map(|s| resolutions_of(s).contains(&resolution))
            .unwrap_or(false);
        if !offered {
            log::debug!(
                "Ignoring preferred resolution {} for {}: not offered",
                resolution,
                device_id
            );
            return false;
        }

        self.records
            .entry(device_id.to_string())
            .and_modify(|r| r.preferred_resolution = resolution)
            .or_insert_with(|| PreferenceRecord::new(resolution));
        self.persist();
        true
    }

    /// Write the full map. Failures are logged; the in-memory map stays authoritative.
    pub(crate) fn persist(&self) {
        let value = match serde_json::to_value(&self.records) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Failed to serialize preferences under {}: {}", self.key, e);
                return;
            }
        };
        if let Err(e) = self.store.set(self.key, value) {
            log::warn!("Failed to persist preferences under {}: {}", self.key, e);
        }
    }
}
