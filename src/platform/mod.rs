//! Capability provider seam
//!
//! The engine never touches hardware directly. Everything it needs from the
//! platform goes through [`MediaCapabilityProvider`]: listing devices,
//! querying their capabilities and opening streams.

use crate::errors::{CapabilityError, EnumerationError, OpenError};
use crate::types::{CapabilitySnapshot, ConstraintSet, DeviceId};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

#[cfg(feature = "native")]
pub mod native;

#[cfg(feature = "native")]
pub use native::NativeProvider;

#[async_trait]
pub trait MediaCapabilityProvider: Send + Sync {
    /// List the ids of all currently attached devices
    async fn enumerate_devices(&self) -> Result<Vec<DeviceId>, EnumerationError>;

    /// Query the capability set of one device.
    ///
    /// Devices without the extended capability interface answer with
    /// [`CapabilityError::Unsupported`]; callers fall back to basic mode.
    async fn query_capabilities(
        &self,
        device_id: &DeviceId,
    ) -> Result<CapabilitySnapshot, CapabilityError>;

    /// Open a live stream satisfying `constraints`
    async fn open_stream(
        &self,
        constraints: &ConstraintSet,
    ) -> Result<Arc<dyn MediaStream>, OpenError>;
}

/// A live hardware stream, exclusively owned by the capture session
#[async_trait]
pub trait MediaStream: Send + Sync {
    fn id(&self) -> Uuid;

    fn device_id(&self) -> &str;

    fn constraints(&self) -> &ConstraintSet;

    /// Release the hardware. Stopping twice is a no-op.
    async fn stop(&self);
}
