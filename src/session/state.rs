use crate::mode::CaptureMode;
use crate::types::{ConstraintSet, DeviceId, Resolution};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Configuring,
    Streaming,
    Suspended,
}

/// Why the session is not streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuspendReason {
    /// Explicit `suspend()`
    Requested,
    /// Host application moved to the background
    Backgrounded,
    /// Host reported the screen as locked
    Locked,
    /// No candidate on any device could be opened; a retry is scheduled
    Exhausted,
}

impl SuspendReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuspendReason::Requested => "requested",
            SuspendReason::Backgrounded => "backgrounded",
            SuspendReason::Locked => "locked",
            SuspendReason::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives the outcome of session configuration
pub trait SessionObserver: Send + Sync {
    fn on_configured(&self, device_id: &str, mode: CaptureMode, resolution: Option<Resolution>);

    fn on_suspended(&self, reason: SuspendReason);

    fn on_stream_lost(&self);
}

/// Description of a successfully configured stream
#[derive(Debug, Clone, PartialEq)]
pub struct ConfiguredStream {
    pub device_id: DeviceId,
    pub mode: CaptureMode,
    /// Capture resolution, `None` in basic mode
    pub resolution: Option<Resolution>,
    pub constraints: ConstraintSet,
    pub stream_id: Uuid,
    pub configured_at: DateTime<Utc>,
}

/// External conditions that forbid touching the hardware
#[derive(Debug, Default)]
pub(crate) struct SuspendSignals {
    requested: AtomicBool,
    backgrounded: AtomicBool,
    locked: AtomicBool,
}

impl SuspendSignals {
    pub(crate) fn set(&self, reason: SuspendReason, active: bool) {
        let flag = match reason {
            SuspendReason::Requested => &self.requested,
            SuspendReason::Backgrounded => &self.backgrounded,
            SuspendReason::Locked => &self.locked,
            SuspendReason::Exhausted => return,
        };
        flag.store(active, Ordering::SeqCst);
    }

    /// First raised signal, if any
    pub(crate) fn reason(&self) -> Option<SuspendReason> {
        if self.requested.load(Ordering::SeqCst) {
            Some(SuspendReason::Requested)
        } else if self.locked.load(Ordering::SeqCst) {
            Some(SuspendReason::Locked)
        } else if self.backgrounded.load(Ordering::SeqCst) {
            Some(SuspendReason::Backgrounded)
        } else {
            None
        }
    }
}
