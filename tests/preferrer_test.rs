//! Constraints preferrer integration tests
//!
//! Ranking fixtures for both preferrers, preference repair and persistence
//! through the JSON preference file.

use crabcapture::preferrer::photo::PHOTO_PREFERENCE_KEY;
use crabcapture::preferrer::video::VIDEO_PREFERENCE_KEY;
use crabcapture::types::compare_by_preference;
use crabcapture::{
    CapabilitySnapshot, ConstraintsPreferrer, Facing, FpsRange, FrameRate,
    JsonFilePreferenceStore, MemoryPreferenceStore, PhotoConstraintsPreferrer, PreferenceStore,
    Resolution, VideoConstraintsPreferrer,
};
use crabcapture::config::PreviewConfig;
use std::sync::Arc;
use tempfile::tempdir;

fn r(width: u32, height: u32) -> Resolution {
    Resolution::new(width, height)
}

fn photo_camera(photos: Vec<Resolution>, previews: Vec<Resolution>) -> CapabilitySnapshot {
    CapabilitySnapshot::new(
        "cam0",
        Facing::Environment,
        photos,
        previews.into_iter().map(|p| (p, 30)),
        vec![],
    )
}

fn video_camera(videos: Vec<(Resolution, u32)>) -> CapabilitySnapshot {
    CapabilitySnapshot::new(
        "cam0",
        Facing::Environment,
        vec![],
        videos,
        vec![FpsRange::new(30, 30), FpsRange::new(60, 60)],
    )
}

fn capture_order(candidates: &[crabcapture::CaptureCandidate]) -> Vec<Resolution> {
    candidates
        .iter()
        .filter_map(|c| c.capture_resolution)
        .collect()
}

#[test]
fn test_aspect_ratio_tie_break_fixture() {
    let preferred = r(1920, 1080);
    let mut list = vec![r(1920, 1080), r(1280, 720), r(1600, 900)];
    list.sort_by(|a, b| compare_by_preference(&preferred, a, b));
    assert_eq!(list, vec![r(1920, 1080), r(1280, 720), r(1600, 900)]);
}

#[test]
fn test_video_ranking_puts_other_ratios_last_by_area() {
    let store = Arc::new(MemoryPreferenceStore::new());
    let video = VideoConstraintsPreferrer::new(store, PreviewConfig::default());
    video.on_capabilities_updated(&[CapabilitySnapshot::new(
        "cam0",
        Facing::Environment,
        vec![],
        vec![
            (r(640, 480), 30),
            (r(1920, 1080), 30),
            (r(1440, 1080), 30),
            (r(1280, 720), 30),
        ],
        vec![],
    )]);

    assert_eq!(video.preferred_resolution("cam0").unwrap(), r(1920, 1080));
    let candidates = video.sorted_candidates("cam0", &[]);
    assert_eq!(
        capture_order(&candidates),
        vec![r(1920, 1080), r(1280, 720), r(1440, 1080), r(640, 480)]
    );
    assert!(candidates.iter().all(|c| {
        c.preview_candidates.len() == 1
            && c.preview_candidates[0].frame_rate == FrameRate::Variable { min: 20, ideal: 30 }
    }));
}

#[test]
fn test_video_low_fps_resolutions_are_dropped() {
    let video = VideoConstraintsPreferrer::new(
        Arc::new(MemoryPreferenceStore::new()),
        PreviewConfig::default(),
    );
    video.on_capabilities_updated(&[video_camera(vec![(r(3840, 2160), 15), (r(1920, 1080), 30)])]);

    assert_eq!(video.preferred_resolution("cam0").unwrap(), r(1920, 1080));
    assert_eq!(video.known_resolutions("cam0"), vec![r(1920, 1080)]);
}

#[test]
fn test_photo_bucketing_fixture() {
    let photo = PhotoConstraintsPreferrer::new(
        Arc::new(MemoryPreferenceStore::new()),
        PreviewConfig::default(),
    );
    photo.on_capabilities_updated(&[photo_camera(
        vec![r(4000, 3000), r(1920, 1080)],
        vec![r(640, 480), r(1280, 720)],
    )]);
    assert_eq!(photo.preferred_resolution("cam0").unwrap(), r(4000, 3000));

    let previews = [r(640, 480), r(1280, 720)];
    let candidates = photo.sorted_candidates("cam0", &previews);
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].capture_resolution, Some(r(4000, 3000)));
    assert_eq!(candidates[0].preview_candidates.len(), 1);
    assert_eq!(candidates[0].preview_candidates[0].resolution, Some(r(640, 480)));
    assert_eq!(candidates[1].capture_resolution, Some(r(1920, 1080)));
    assert_eq!(candidates[1].preview_candidates[0].resolution, Some(r(1280, 720)));

    photo.set_preferred_resolution("cam0", r(1920, 1080));
    let candidates = photo.sorted_candidates("cam0", &previews);
    assert_eq!(
        capture_order(&candidates),
        vec![r(1920, 1080), r(4000, 3000)]
    );
}

#[test]
fn test_photo_bucket_without_preview_is_skipped() {
    let photo = PhotoConstraintsPreferrer::new(
        Arc::new(MemoryPreferenceStore::new()),
        PreviewConfig::default(),
    );
    photo.on_capabilities_updated(&[photo_camera(
        vec![r(4000, 3000), r(1920, 1080)],
        vec![r(1280, 720)],
    )]);

    let candidates = photo.sorted_candidates("cam0", &[r(1280, 720)]);
    assert_eq!(capture_order(&candidates), vec![r(1920, 1080)]);
}

#[test]
fn test_preference_repair_falls_back_to_max_area() {
    let photo = PhotoConstraintsPreferrer::new(
        Arc::new(MemoryPreferenceStore::new()),
        PreviewConfig::default(),
    );
    photo.on_capabilities_updated(&[photo_camera(
        vec![r(4000, 3000), r(1920, 1080), r(1280, 720)],
        vec![],
    )]);
    photo.set_preferred_resolution("cam0", r(1280, 720));
    assert_eq!(photo.preferred_resolution("cam0").unwrap(), r(1280, 720));

    photo.on_capabilities_updated(&[photo_camera(vec![r(1920, 1080), r(2560, 1440)], vec![])]);
    assert_eq!(photo.preferred_resolution("cam0").unwrap(), r(2560, 1440));
}

#[test]
fn test_unknown_resolution_override_is_ignored() {
    let photo = PhotoConstraintsPreferrer::new(
        Arc::new(MemoryPreferenceStore::new()),
        PreviewConfig::default(),
    );
    photo.on_capabilities_updated(&[photo_camera(vec![r(1920, 1080)], vec![])]);
    photo.set_preferred_resolution("cam0", r(800, 600));
    photo.set_preferred_resolution("ghost", r(1920, 1080));

    assert_eq!(photo.preferred_resolution("cam0").unwrap(), r(1920, 1080));
    assert!(photo.preferred_resolution("ghost").is_err());
}

#[test]
fn test_every_mutation_persists_full_map() {
    let store = Arc::new(MemoryPreferenceStore::new());
    let video = VideoConstraintsPreferrer::new(store.clone(), PreviewConfig::default());

    let mut second = video_camera(vec![(r(640, 480), 30)]);
    second.device_id = "cam1".to_string();
    video.on_capabilities_updated(&[video_camera(vec![(r(1280, 720), 60)]), second]);

    let saved = store.get(VIDEO_PREFERENCE_KEY).unwrap();
    assert!(saved.get("cam0").is_some());
    assert!(saved.get("cam1").is_some());

    video.set_preferred_const_fps("cam0", r(1280, 720), 60);
    let saved = store.get(VIDEO_PREFERENCE_KEY).unwrap();
    assert_eq!(saved["cam0"]["preferred_const_fps"]["1280x720"], 60);
    assert!(store.get(PHOTO_PREFERENCE_KEY).is_none());
}

#[test]
fn test_persistence_round_trip_through_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("prefs.json");

    {
        let store = Arc::new(JsonFilePreferenceStore::open(&path).unwrap());
        let photo = PhotoConstraintsPreferrer::new(store.clone(), PreviewConfig::default());
        let video = VideoConstraintsPreferrer::new(store, PreviewConfig::default());
        let snapshot = CapabilitySnapshot::new(
            "cam0",
            Facing::User,
            vec![r(4000, 3000), r(1920, 1080)],
            vec![(r(1920, 1080), 60), (r(1280, 720), 60)],
            vec![FpsRange::new(60, 60)],
        );
        photo.on_capabilities_updated(&[snapshot.clone()]);
        video.on_capabilities_updated(&[snapshot]);

        photo.set_preferred_resolution("cam0", r(1920, 1080));
        video.set_preferred_resolution("cam0", r(1280, 720));
        video.set_preferred_const_fps("cam0", r(1280, 720), 60);
    }

    let store = Arc::new(JsonFilePreferenceStore::open(&path).unwrap());
    let photo = PhotoConstraintsPreferrer::new(store.clone(), PreviewConfig::default());
    let video = VideoConstraintsPreferrer::new(store, PreviewConfig::default());

    assert_eq!(photo.preferred_resolution("cam0").unwrap(), r(1920, 1080));
    assert_eq!(video.preferred_resolution("cam0").unwrap(), r(1280, 720));
    assert_eq!(video.preferred_const_fps("cam0", &r(1280, 720)), Some(60));
}

#[test]
fn test_const_fps_preference_dropped_with_resolution() {
    let video = VideoConstraintsPreferrer::new(
        Arc::new(MemoryPreferenceStore::new()),
        PreviewConfig::default(),
    );
    video.on_capabilities_updated(&[video_camera(vec![(r(1920, 1080), 60), (r(1280, 720), 60)])]);
    video.set_preferred_const_fps("cam0", r(1280, 720), 60);
    assert_eq!(video.preferred_const_fps("cam0", &r(1280, 720)), Some(60));

    video.on_capabilities_updated(&[video_camera(vec![(r(1920, 1080), 60)])]);
    assert_eq!(video.preferred_const_fps("cam0", &r(1280, 720)), None);
}

#[test]
fn test_unplugged_device_offers_no_candidates() {
    let video = VideoConstraintsPreferrer::new(
        Arc::new(MemoryPreferenceStore::new()),
        PreviewConfig::default(),
    );
    let mut second = video_camera(vec![(r(640, 480), 60)]);
    second.device_id = "cam1".to_string();
    video.on_capabilities_updated(&[video_camera(vec![(r(1280, 720), 60)]), second.clone()]);
    assert!(!video.sorted_candidates("cam1", &[]).is_empty());

    video.on_capabilities_updated(&[video_camera(vec![(r(1280, 720), 60)])]);
    assert!(video.sorted_candidates("cam1", &[]).is_empty());
    assert!(video.known_resolutions("cam1").is_empty());
    video.set_preferred_const_fps("cam1", r(640, 480), 60);
    assert_eq!(video.preferred_const_fps("cam1", &r(640, 480)), None);

    // the stored preference survives and applies again once the device returns
    assert_eq!(video.preferred_resolution("cam1").unwrap(), r(640, 480));
    video.on_capabilities_updated(&[second]);
    assert_eq!(video.known_resolutions("cam1"), vec![r(640, 480)]);
}
