use super::{ConstraintsPreferrer, PreferenceBook};
use crate::config::PreviewConfig;
use crate::errors::NotFoundError;
use crate::preferences::PreferenceStore;
use crate::types::{
    compare_by_preference, CapabilitySnapshot, CaptureCandidate, ConstraintSet, FrameRate,
    Resolution,
};
use std::sync::{Arc, PoisonError, RwLock};

/// Preference key holding the photo resolution map
pub const PHOTO_PREFERENCE_KEY: &str = "devicePhotoResolution";

fn photo_resolutions(snapshot: &CapabilitySnapshot) -> Vec<Resolution> {
    snapshot.photo_resolutions().to_vec()
}

/// Ranks still-capture configurations.
///
/// Photo capture and preview are separate streams, so photo and preview
/// resolutions are paired by aspect ratio before ranking.
pub struct PhotoConstraintsPreferrer {
    book: RwLock<PreferenceBook>,
    preview: PreviewConfig,
}

impl PhotoConstraintsPreferrer {
    pub fn new(store: Arc<dyn PreferenceStore>, preview: PreviewConfig) -> Self {
        Self {
            book: RwLock::new(PreferenceBook::load(store, PHOTO_PREFERENCE_KEY)),
            preview,
        }
    }

    /// Photo resolutions last reported for a device
    pub fn known_resolutions(&self, device_id: &str) -> Vec<Resolution> {
        let book = self.book.read().unwrap_or_else(PoisonError::into_inner);
        book.known(device_id).map(photo_resolutions).unwrap_or_default()
    }
}

impl ConstraintsPreferrer for PhotoConstraintsPreferrer {
    fn preferred_resolution(&self, device_id: &str) -> Result<Resolution, NotFoundError> {
        let book = self.book.read().unwrap_or_else(PoisonError::into_inner);
        book.preferred(device_id)
    }

    fn on_capabilities_updated(&self, snapshots: &[CapabilitySnapshot]) {
        let mut book = self.book.write().unwrap_or_else(PoisonError::into_inner);
        book.update(snapshots, photo_resolutions);
    }

    fn set_preferred_resolution(&self, device_id: &str, resolution: Resolution) {
        let mut book = self.book.write().unwrap_or_else(PoisonError::into_inner);
        book.set_preferred(device_id, resolution, photo_resolutions);
    }

    fn sorted_candidates(
        &self,
        device_id: &str,
        preview_resolutions: &[Resolution],
    ) -> Vec<CaptureCandidate> {
        let book = self.book.read().unwrap_or_else(PoisonError::into_inner);
        let (Some(snapshot), Ok(preferred)) = (book.known(device_id), book.preferred(device_id))
        else {
            return Vec::new();
        };

        // Aspect ratio buckets in order of first appearance
        let mut buckets: Vec<(i64, Vec<Resolution>)> = Vec::new();
        for r in snapshot.photo_resolutions() {
            let key = r.aspect_ratio_key();
            match buckets.iter_mut().find(|(k, _)| *k == key) {
                Some((_, photos)) => photos.push(*r),
                None => buckets.push((key, vec![*r])),
            }
        }

        let mut ranked: Vec<(Resolution, Vec<Resolution>)> = buckets
            .into_iter()
            .filter_map(|(key, photos)| {
                let mut previews: Vec<Resolution> = preview_resolutions
                    .iter()
                    .filter(|p| p.aspect_ratio_key() == key)
                    .copied()
                    .collect();
                if previews.is_empty() {
                    return None;
                }
                previews.sort_by(|a, b| b.width.cmp(&a.width));

                let capture = if photos.contains(&preferred) {
                    preferred
                } else {
                    photos.iter().copied().fold(photos[0], |best, r| {
                        if r.width > best.width {
                            r
                        } else {
                            best
                        }
                    })
                };
                Some((capture, previews))
            })
            .collect();

        ranked.sort_by(|(a, _), (b, _)| compare_by_preference(&preferred, a, b));

        let frame_rate = FrameRate::Variable {
            min: self.preview.min_fps,
            ideal: self.preview.ideal_fps,
        };
        ranked
            .into_iter()
            .map(|(capture, previews)| CaptureCandidate {
                capture_resolution: Some(capture),
                preview_candidates: previews
                    .into_iter()
                    .map(|p| ConstraintSet::new(device_id, p, frame_rate))
                    .collect(),
            })
            .collect()
    }
}
