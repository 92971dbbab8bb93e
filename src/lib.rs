//! CrabCapture: capture-device negotiation and stream lifecycle engine
//!
//! This crate decides which camera to open, at which resolution and frame
//! rate, and keeps that choice alive while devices come and go.
//!
//! # Features
//! - Device registry with coalesced refreshes and exclusive snapshot views
//! - Persistent per-device resolution and constant-fps preferences
//! - Deterministic candidate ranking for photo and video capture
//! - Capture session state machine with suspend/resume and fixed-delay retry
//! - Optional native provider on top of `nokhwa` (feature `native`)
//!
//! # Usage
//! ```rust,ignore
//! use crabcapture::{CaptureEngine, CrabCaptureConfig, MemoryPreferenceStore};
//! use crabcapture::testing::{FakeProvider, RecordingObserver};
//! use std::sync::Arc;
//!
//! let engine = CaptureEngine::new(
//!     Arc::new(FakeProvider::new()),
//!     Arc::new(MemoryPreferenceStore::new()),
//!     Arc::new(RecordingObserver::new()),
//!     CrabCaptureConfig::default(),
//! )
//! .await?;
//! let stream = engine.session().start().await?;
//! ```
pub mod config;
pub mod engine;
pub mod errors;
pub mod mode;
pub mod platform;
pub mod preferences;
pub mod preferrer;
pub mod registry;
pub mod session;
pub mod types;

// Testing utilities - scriptable provider and observer for offline testing
pub mod testing;

// Re-exports for convenience
pub use config::CrabCaptureConfig;
pub use engine::CaptureEngine;
pub use errors::{
    CapabilityError, CaptureError, EnumerationError, NotFoundError, OpenError, SessionError,
    UnsupportedCapabilityError,
};
pub use mode::CaptureMode;
pub use platform::{MediaCapabilityProvider, MediaStream};
pub use preferences::{JsonFilePreferenceStore, MemoryPreferenceStore, PreferenceStore};
pub use preferrer::{ConstraintsPreferrer, PhotoConstraintsPreferrer, VideoConstraintsPreferrer};
pub use registry::{DeviceRegistry, ExclusiveView};
pub use session::{CaptureSession, ConfiguredStream, SessionObserver, SessionState, SuspendReason};
pub use types::{
    CapabilitySnapshot, CaptureCandidate, ConstraintSet, DeviceId, Facing, FpsRange, FrameRate,
    Resolution, SnapshotSet,
};

#[cfg(feature = "native")]
pub use platform::NativeProvider;

/// Initialize logging for the capture engine
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabcapture=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        native: cfg!(feature = "native"),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Built with the native camera provider
    pub native: bool,
}
