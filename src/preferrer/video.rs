use super::{ConstraintsPreferrer, PreferenceBook};
use crate::config::PreviewConfig;
use crate::errors::NotFoundError;
use crate::preferences::PreferenceStore;
use crate::types::{
    compare_by_preference, CapabilitySnapshot, CaptureCandidate, ConstraintSet, FrameRate,
    Resolution, CONST_FPS_OPTIONS,
};
use std::sync::{Arc, PoisonError, RwLock};

/// Preference key holding the video resolution and fps map
pub const VIDEO_PREFERENCE_KEY: &str = "deviceVideoResolution";

fn video_resolutions(snapshot: &CapabilitySnapshot) -> Vec<Resolution> {
    snapshot.video_resolution_list()
}

/// Ranks recording configurations.
///
/// Video reuses the capture stream as preview, so every candidate carries a
/// single constraint set built from its own resolution.
pub struct VideoConstraintsPreferrer {
    book: RwLock<PreferenceBook>,
    preview: PreviewConfig,
}

impl VideoConstraintsPreferrer {
    pub fn new(store: Arc<dyn PreferenceStore>, preview: PreviewConfig) -> Self {
        Self {
            book: RwLock::new(PreferenceBook::load(store, VIDEO_PREFERENCE_KEY)),
            preview,
        }
    }

    /// Constant frame rates the device can record at `resolution`
    pub fn supported_const_fps(&self, device_id: &str, resolution: &Resolution) -> Vec<u32> {
        let book = self.book.read().unwrap_or_else(PoisonError::into_inner);
        book.known(device_id)
            .map(|s| s.const_fps_at(resolution))
            .unwrap_or_default()
    }

    /// Last constant fps the user chose for `resolution`
    pub fn preferred_const_fps(&self, device_id: &str, resolution: &Resolution) -> Option<u32> {
        let book = self.book.read().unwrap_or_else(PoisonError::into_inner);
        book.record(device_id)
            .and_then(|r| r.preferred_const_fps.get(&resolution.to_string()).copied())
    }

    /// Remember the user's constant fps for a resolution.
    ///
    /// Ignored unless the device supports that constant rate there.
    pub fn set_preferred_const_fps(&self, device_id: &str, resolution: Resolution, fps: u32) {
        let mut book = self.book.write().unwrap_or_else(PoisonError::into_inner);
        let supported = book
            .known(device_id)
            .map(|s| s.const_fps_at(&resolution).contains(&fps))
            .unwrap_or(false);
        if !supported {
            log::debug!(
                "Ignoring constant fps {} at {} for {}: not supported",
                fps,
                resolution,
                device_id
            );
            return;
        }

        if let Some(record) = book.record_mut(device_id) {
            record
                .preferred_const_fps
                .insert(resolution.to_string(), fps);
            book.persist();
        }
    }

    pub fn known_resolutions(&self, device_id: &str) -> Vec<Resolution> {
        let book = self.book.read().unwrap_or_else(PoisonError::into_inner);
        book.known(device_id).map(video_resolutions).unwrap_or_default()
    }

    /// Preferred rate first, remaining supported rates in ascending order
    fn ordered_fps(&self, supported: Vec<u32>, preferred: Option<u32>) -> Vec<u32> {
        let first = preferred.unwrap_or(self.preview.default_const_fps);
        let mut ordered = supported;
        ordered.sort_unstable();
        if let Some(pos) = ordered.iter().position(|fps| *fps == first) {
            let fps = ordered.remove(pos);
            ordered.insert(0, fps);
        }
        ordered
    }
}

impl ConstraintsPreferrer for VideoConstraintsPreferrer {
    fn preferred_resolution(&self, device_id: &str) -> Result<Resolution, NotFoundError> {
        let book = self.book.read().unwrap_or_else(PoisonError::into_inner);
        book.preferred(device_id)
    }

    fn on_capabilities_updated(&self, snapshots: &[CapabilitySnapshot]) {
        let mut book = self.book.write().unwrap_or_else(PoisonError::into_inner);
        book.update(snapshots, video_resolutions);
    }

    fn set_preferred_resolution(&self, device_id: &str, resolution: Resolution) {
        let mut book = self.book.write().unwrap_or_else(PoisonError::into_inner);
        book.set_preferred(device_id, resolution, video_resolutions);
    }

    fn sorted_candidates(
        &self,
        device_id: &str,
        _preview_resolutions: &[Resolution],
    ) -> Vec<CaptureCandidate> {
        let book = self.book.read().unwrap_or_else(PoisonError::into_inner);
        let (Some(snapshot), Some(record)) = (book.known(device_id), book.record(device_id))
        else {
            return Vec::new();
        };
        let preferred = record.preferred_resolution;

        let mut resolutions = snapshot.video_resolution_list();
        resolutions.sort_by(|a, b| compare_by_preference(&preferred, a, b));

        let variable = FrameRate::Variable {
            min: self.preview.min_fps,
            ideal: self.preview.ideal_fps,
        };

        let mut candidates = Vec::new();
        for r in resolutions {
            // Constant rates are only offered when every option is recordable
            let supported = snapshot.const_fps_at(&r);
            let frame_rates: Vec<FrameRate> = if supported.len() < CONST_FPS_OPTIONS.len() {
                vec![variable]
            } else {
                let last_chosen = record.preferred_const_fps.get(&r.to_string()).copied();
                self.ordered_fps(supported, last_chosen)
                    .into_iter()
                    .map(FrameRate::Exact)
                    .collect()
            };

            for frame_rate in frame_rates {
                candidates.push(CaptureCandidate {
                    capture_resolution: Some(r),
                    preview_candidates: vec![ConstraintSet::new(device_id, r, frame_rate)],
                });
            }
        }
        candidates
    }
}
