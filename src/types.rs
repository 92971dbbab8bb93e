//! Core data types for capture negotiation
//!
//! Resolutions, frame-rate ranges, per-device capability snapshots and the
//! constraint sets handed to the capability provider when opening a stream.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Device identifier as reported by the capability provider
pub type DeviceId = String;

/// Video resolutions below this capture rate are not offered for recording
pub const MIN_VIDEO_CAPTURE_FPS: u32 = 24;

/// Constant frame rates offered for video recording
pub const CONST_FPS_OPTIONS: [u32; 2] = [30, 60];

/// A frame size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Width over height rounded to 4 decimal places
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        (f64::from(self.width) / f64::from(self.height) * 10_000.0).round() / 10_000.0
    }

    /// Integer key of the 4-decimal aspect ratio, used for bucketing
    pub(crate) fn aspect_ratio_key(&self) -> i64 {
        if self.height == 0 {
            return 0;
        }
        (f64::from(self.width) / f64::from(self.height) * 10_000.0).round() as i64
    }

    /// Exact aspect ratio equality by cross multiplication
    pub fn aspect_ratio_equals(&self, other: &Resolution) -> bool {
        self.cross(other) == other.cross(self)
    }

    fn cross(&self, other: &Resolution) -> u64 {
        u64::from(self.width) * u64::from(other.height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once('x')
            .ok_or_else(|| format!("Invalid resolution: {}", s))?;
        let width = w
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("Invalid resolution width: {}", s))?;
        let height = h
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("Invalid resolution height: {}", s))?;
        Ok(Self::new(width, height))
    }
}

/// A supported capture frame-rate range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FpsRange {
    pub min: u32,
    pub max: u32,
}

impl FpsRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn is_constant(&self) -> bool {
        self.min == self.max
    }
}

/// Camera orientation classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Facing {
    User,
    Environment,
    External,
    Unknown,
    #[default]
    NotSet,
}

impl Facing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Facing::User => "user",
            Facing::Environment => "environment",
            Facing::External => "external",
            Facing::Unknown => "unknown",
            Facing::NotSet => "not-set",
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Facing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Facing::User),
            "environment" => Ok(Facing::Environment),
            "external" => Ok(Facing::External),
            "unknown" => Ok(Facing::Unknown),
            "not-set" => Ok(Facing::NotSet),
            other => Err(format!("Unknown facing: {}", other)),
        }
    }
}

/// A video resolution together with its maximal capture rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoResolution {
    pub resolution: Resolution,
    pub max_fps: u32,
}

/// Immutable capability record of one device from one enumeration cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub device_id: DeviceId,
    pub facing: Facing,
    photo_resolutions: Vec<Resolution>,
    video_resolutions: Vec<VideoResolution>,
    const_fps_ranges: Vec<FpsRange>,
    supports_portrait: bool,
    extended: bool,
}

impl CapabilitySnapshot {
    /// Build a snapshot from raw query results.
    ///
    /// Duplicates are dropped keeping the first occurrence, video resolutions
    /// whose max fps is below [`MIN_VIDEO_CAPTURE_FPS`] are discarded and only
    /// constant ranges are kept out of `fps_ranges`.
    pub fn new(
        device_id: impl Into<DeviceId>,
        facing: Facing,
        photo_resolutions: impl IntoIterator<Item = Resolution>,
        video_resolutions: impl IntoIterator<Item = (Resolution, u32)>,
        fps_ranges: impl IntoIterator<Item = FpsRange>,
    ) -> Self {
        let mut photos: Vec<Resolution> = Vec::new();
        for r in photo_resolutions {
            if !photos.contains(&r) {
                photos.push(r);
            }
        }

        let mut videos: Vec<VideoResolution> = Vec::new();
        for (resolution, max_fps) in video_resolutions {
            if max_fps < MIN_VIDEO_CAPTURE_FPS {
                continue;
            }
            match videos.iter_mut().find(|v| v.resolution == resolution) {
                Some(existing) => existing.max_fps = existing.max_fps.max(max_fps),
                None => videos.push(VideoResolution {
                    resolution,
                    max_fps,
                }),
            }
        }

        let mut ranges: Vec<FpsRange> = Vec::new();
        for range in fps_ranges {
            if range.is_constant() && !ranges.contains(&range) {
                ranges.push(range);
            }
        }

        Self {
            device_id: device_id.into(),
            facing,
            photo_resolutions: photos,
            video_resolutions: videos,
            const_fps_ranges: ranges,
            supports_portrait: false,
            extended: true,
        }
    }

    /// Snapshot for a device without the extended capability interface
    pub fn basic(device_id: impl Into<DeviceId>, facing: Facing) -> Self {
        Self {
            device_id: device_id.into(),
            facing,
            photo_resolutions: Vec::new(),
            video_resolutions: Vec::new(),
            const_fps_ranges: Vec::new(),
            supports_portrait: false,
            extended: false,
        }
    }

    pub fn with_portrait(mut self, supported: bool) -> Self {
        self.supports_portrait = supported;
        self
    }

    pub fn photo_resolutions(&self) -> &[Resolution] {
        &self.photo_resolutions
    }

    pub fn video_resolutions(&self) -> &[VideoResolution] {
        &self.video_resolutions
    }

    /// Video resolutions without their rates, in provider order
    pub fn video_resolution_list(&self) -> Vec<Resolution> {
        self.video_resolutions.iter().map(|v| v.resolution).collect()
    }

    pub fn max_fps(&self, resolution: &Resolution) -> Option<u32> {
        self.video_resolutions
            .iter()
            .find(|v| v.resolution == *resolution)
            .map(|v| v.max_fps)
    }

    pub fn const_fps_ranges(&self) -> &[FpsRange] {
        &self.const_fps_ranges
    }

    /// Constant frame rates from [`CONST_FPS_OPTIONS`] recordable at `resolution`
    pub fn const_fps_at(&self, resolution: &Resolution) -> Vec<u32> {
        let Some(max_fps) = self.max_fps(resolution) else {
            return Vec::new();
        };
        CONST_FPS_OPTIONS
            .iter()
            .copied()
            .filter(|fps| *fps <= max_fps)
            .filter(|fps| self.const_fps_ranges.iter().any(|r| r.min == *fps && r.max == *fps))
            .collect()
    }

    pub fn supports_portrait(&self) -> bool {
        self.supports_portrait
    }

    /// Whether the device exposed its extended capability interface
    pub fn is_extended(&self) -> bool {
        self.extended
    }
}

/// Device hot-plug event derived by diffing two enumeration cycles
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected(DeviceId),
    Disconnected(DeviceId),
}

/// One published enumeration cycle
#[derive(Debug, Clone, Default)]
pub struct SnapshotSet {
    pub generation: u64,
    pub devices: Vec<CapabilitySnapshot>,
    pub changes: Vec<DeviceEvent>,
}

impl SnapshotSet {
    pub fn get(&self, device_id: &str) -> Option<&CapabilitySnapshot> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.iter().map(|d| d.device_id.clone()).collect()
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.get(device_id).is_some()
    }
}

/// Frame-rate part of a constraint set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameRate {
    Exact(u32),
    Variable { min: u32, ideal: u32 },
}

/// What the opened stream will be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureIntent {
    Preview,
    StillCapture,
    VideoRecord,
    Portrait,
}

/// Declarative stream parameters passed to `open_stream`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintSet {
    pub device_id: DeviceId,
    /// `None` lets the provider pick its default size
    pub resolution: Option<Resolution>,
    pub frame_rate: FrameRate,
    pub intent: CaptureIntent,
}

impl ConstraintSet {
    pub fn new(device_id: impl Into<DeviceId>, resolution: Resolution, frame_rate: FrameRate) -> Self {
        Self {
            device_id: device_id.into(),
            resolution: Some(resolution),
            frame_rate,
            intent: CaptureIntent::Preview,
        }
    }

    /// Constraints for a device in basic mode
    pub fn basic(device_id: impl Into<DeviceId>, frame_rate: FrameRate) -> Self {
        Self {
            device_id: device_id.into(),
            resolution: None,
            frame_rate,
            intent: CaptureIntent::Preview,
        }
    }

    pub fn with_intent(mut self, intent: CaptureIntent) -> Self {
        self.intent = intent;
        self
    }
}

/// One entry of a ranked candidate list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureCandidate {
    pub capture_resolution: Option<Resolution>,
    pub preview_candidates: Vec<ConstraintSet>,
}

/// Ordering used by both preferrers: exact preferred match first, then
/// resolutions sharing the preferred aspect ratio (kept in input order),
/// then the rest by descending area.
pub fn compare_by_preference(preferred: &Resolution, a: &Resolution, b: &Resolution) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    if a == preferred {
        return Ordering::Less;
    }
    if b == preferred {
        return Ordering::Greater;
    }
    match (a.aspect_ratio_equals(preferred), b.aspect_ratio_equals(preferred)) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => b.area().cmp(&a.area()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspect_ratio() {
        assert_eq!(Resolution::new(1920, 1080).aspect_ratio(), 1.7778);
        assert_eq!(Resolution::new(640, 480).aspect_ratio(), 1.3333);
        assert!(Resolution::new(1280, 720).aspect_ratio_equals(&Resolution::new(1920, 1080)));
        assert!(!Resolution::new(640, 480).aspect_ratio_equals(&Resolution::new(1920, 1080)));
    }

    #[test]
    fn test_resolution_parse() {
        let r: Resolution = "1280x720".parse().unwrap();
        assert_eq!(r, Resolution::new(1280, 720));
        assert_eq!(r.to_string(), "1280x720");
        assert!("1280".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_snapshot_filters_slow_video() {
        let snapshot = CapabilitySnapshot::new(
            "cam0",
            Facing::User,
            vec![Resolution::new(640, 480), Resolution::new(640, 480)],
            vec![
                (Resolution::new(1920, 1080), 30),
                (Resolution::new(3840, 2160), 15),
            ],
            vec![FpsRange::new(15, 30), FpsRange::new(30, 30)],
        );

        assert_eq!(snapshot.photo_resolutions().len(), 1);
        assert_eq!(snapshot.video_resolution_list(), vec![Resolution::new(1920, 1080)]);
        assert_eq!(snapshot.const_fps_ranges(), &[FpsRange::new(30, 30)]);
        assert!(snapshot.is_extended());
    }

    #[test]
    fn test_const_fps_respects_max_fps() {
        let snapshot = CapabilitySnapshot::new(
            "cam0",
            Facing::Environment,
            vec![],
            vec![
                (Resolution::new(1920, 1080), 30),
                (Resolution::new(1280, 720), 60),
            ],
            vec![FpsRange::new(30, 30), FpsRange::new(60, 60)],
        );

        assert_eq!(snapshot.const_fps_at(&Resolution::new(1920, 1080)), vec![30]);
        assert_eq!(snapshot.const_fps_at(&Resolution::new(1280, 720)), vec![30, 60]);
        assert!(snapshot.const_fps_at(&Resolution::new(640, 480)).is_empty());
    }

    #[test]
    fn test_facing_round_trip() {
        for facing in [
            Facing::User,
            Facing::Environment,
            Facing::External,
            Facing::Unknown,
            Facing::NotSet,
        ] {
            assert_eq!(facing.as_str().parse::<Facing>().unwrap(), facing);
        }
        assert_eq!(serde_json::to_string(&Facing::NotSet).unwrap(), "\"not-set\"");
    }

    #[test]
    fn test_comparator_prefers_exact_then_aspect() {
        let p = Resolution::new(1920, 1080);
        let mut list = vec![
            Resolution::new(640, 480),
            Resolution::new(1280, 720),
            Resolution::new(1920, 1080),
            Resolution::new(1600, 1200),
        ];
        list.sort_by(|a, b| compare_by_preference(&p, a, b));
        assert_eq!(
            list,
            vec![
                Resolution::new(1920, 1080),
                Resolution::new(1280, 720),
                Resolution::new(1600, 1200),
                Resolution::new(640, 480),
            ]
        );
    }
}
