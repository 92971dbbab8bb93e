//! Capture modes and their fixed configuration table

use crate::types::{CapabilitySnapshot, CaptureIntent};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which constraints preferrer ranks candidates for a mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferrerKind {
    Photo,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Photo,
    Video,
    Square,
    Portrait,
}

impl CaptureMode {
    pub const ALL: [CaptureMode; 4] = [
        CaptureMode::Photo,
        CaptureMode::Video,
        CaptureMode::Square,
        CaptureMode::Portrait,
    ];

    /// Mode tried next when this one cannot be configured
    pub fn fallback(self) -> CaptureMode {
        match self {
            CaptureMode::Video => CaptureMode::Photo,
            CaptureMode::Photo => CaptureMode::Square,
            CaptureMode::Square => CaptureMode::Portrait,
            CaptureMode::Portrait => CaptureMode::Video,
        }
    }

    pub fn preferrer(self) -> PreferrerKind {
        match self {
            CaptureMode::Video => PreferrerKind::Video,
            CaptureMode::Photo | CaptureMode::Square | CaptureMode::Portrait => {
                PreferrerKind::Photo
            }
        }
    }

    pub fn capture_intent(self) -> CaptureIntent {
        match self {
            CaptureMode::Photo | CaptureMode::Square => CaptureIntent::StillCapture,
            CaptureMode::Video => CaptureIntent::VideoRecord,
            CaptureMode::Portrait => CaptureIntent::Portrait,
        }
    }

    /// This mode followed by its fallbacks, each mode visited once
    pub fn fallback_chain(self) -> Vec<CaptureMode> {
        let mut chain = vec![self];
        let mut next = self.fallback();
        while next != self {
            chain.push(next);
            next = next.fallback();
        }
        chain
    }

    /// Whether a device can be configured in this mode at all
    pub fn is_supported_by(self, snapshot: &CapabilitySnapshot) -> bool {
        if !snapshot.is_extended() {
            return self != CaptureMode::Portrait;
        }
        match self {
            CaptureMode::Video => !snapshot.video_resolutions().is_empty(),
            CaptureMode::Photo | CaptureMode::Square => !snapshot.photo_resolutions().is_empty(),
            CaptureMode::Portrait => {
                snapshot.supports_portrait() && !snapshot.photo_resolutions().is_empty()
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMode::Photo => "photo",
            CaptureMode::Video => "video",
            CaptureMode::Square => "square",
            CaptureMode::Portrait => "portrait",
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CaptureMode::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("Unknown capture mode: {}", s))
    }
}
