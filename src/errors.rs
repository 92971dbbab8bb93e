use crate::session::SuspendReason;
use thiserror::Error;

/// Device enumeration or capability refresh failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnumerationError {
    #[error("No capture devices found")]
    NoDevices,
    #[error("Device enumeration failed: {0}")]
    EnumerateFailed(String),
    #[error("Capability query aborted for {device_id}: {reason}")]
    QueryAborted { device_id: String, reason: String },
}

/// Preference requested for a device the preferrer has never seen
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("No preference recorded for device: {device_id}")]
pub struct NotFoundError {
    pub device_id: String,
}

/// Device lacks the extended capability interface; use basic mode
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Extended capabilities unsupported by device: {device_id}")]
pub struct UnsupportedCapabilityError {
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error(transparent)]
    Unsupported(#[from] UnsupportedCapabilityError),
    #[error("Capability query aborted: {0}")]
    Aborted(String),
}

/// Opening a stream for one candidate failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpenError {
    #[error("Device gone: {0}")]
    DeviceGone(String),
    #[error("Unsupported constraint: {0}")]
    UnsupportedConstraint(String),
    #[error("Transient stream error: {0}")]
    Transient(String),
}

/// Outcome of a configure attempt that did not produce a stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Session suspended: {0}")]
    Suspended(SuspendReason),
    #[error("No candidate could be configured on any device")]
    Exhausted,
    #[error("Configure attempt superseded")]
    Superseded,
    #[error("Session stopped")]
    Stopped,
    #[error("No active stream")]
    NotStreaming,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreferenceError {
    #[error("Preference IO error: {0}")]
    Io(String),
    #[error("Preference serialization error: {0}")]
    Serialize(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(String),
    #[error("Failed to parse config file: {0}")]
    Parse(String),
    #[error("Failed to serialize config: {0}")]
    Serialize(String),
    #[error("Failed to write config file: {0}")]
    Write(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Any error surfaced by the crate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Enumeration(#[from] EnumerationError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Preference(#[from] PreferenceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_display_messages() {
        let err = EnumerationError::QueryAborted {
            device_id: "cam0".to_string(),
            reason: "busy".to_string(),
        };
        assert_eq!(err.to_string(), "Capability query aborted for cam0: busy");

        let err = NotFoundError {
            device_id: "cam9".to_string(),
        };
        assert!(err.to_string().contains("cam9"));

        assert_eq!(
            SessionError::Suspended(SuspendReason::Locked).to_string(),
            "Session suspended: locked"
        );
    }

    #[test]
    fn test_aggregate_conversion() {
        let err: CaptureError = OpenError::Transient("timeout".to_string()).into();
        assert!(matches!(err, CaptureError::Open(OpenError::Transient(_))));
        assert_eq!(err.to_string(), "Transient stream error: timeout");
    }

    #[test]
    fn test_unsupported_capability_is_transparent() {
        let err: CapabilityError = UnsupportedCapabilityError {
            device_id: "legacy".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Extended capabilities unsupported by device: legacy"
        );
        assert!(err.source().is_none());
    }
}
