//! Capability provider backed by nokhwa
//!
//! nokhwa cameras are not `Send` on every platform, so each opened stream
//! lives on its own thread which owns the camera until the stream is stopped.

use super::{MediaCapabilityProvider, MediaStream};
use crate::errors::{CapabilityError, EnumerationError, OpenError, UnsupportedCapabilityError};
use crate::types::{
    CapabilitySnapshot, ConstraintSet, DeviceId, Facing, FpsRange, FrameRate, Resolution,
};
use async_trait::async_trait;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{ApiBackend, CameraFormat, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::{Camera, NokhwaError};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Provider talking to the platform camera stack through nokhwa
#[derive(Debug, Clone)]
pub struct NativeProvider {
    backend: ApiBackend,
}

impl NativeProvider {
    pub fn new() -> Self {
        Self {
            backend: ApiBackend::Auto,
        }
    }

    pub fn with_backend(backend: ApiBackend) -> Self {
        Self { backend }
    }
}

impl Default for NativeProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn camera_index(device_id: &str) -> CameraIndex {
    match device_id.parse::<u32>() {
        Ok(index) => CameraIndex::Index(index),
        Err(_) => CameraIndex::String(device_id.to_string()),
    }
}

fn query_formats(device_id: &str) -> Result<Vec<CameraFormat>, NokhwaError> {
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::None);
    let mut camera = Camera::new(camera_index(device_id), requested)?;
    camera.compatible_camera_formats()
}

/// Pick the device format that satisfies a constraint set
fn select_format(formats: &[CameraFormat], constraints: &ConstraintSet) -> Option<CameraFormat> {
    let mut matching = formats.iter().filter(|f| match constraints.resolution {
        Some(r) => f.resolution().width() == r.width && f.resolution().height() == r.height,
        None => true,
    });

    match constraints.frame_rate {
        FrameRate::Exact(fps) => matching.find(|f| f.frame_rate() == fps).copied(),
        FrameRate::Variable { min, ideal } => matching
            .filter(|f| f.frame_rate() >= min)
            .min_by_key(|f| {
                let distance = f.frame_rate().abs_diff(ideal);
                let area = u64::from(f.resolution().width()) * u64::from(f.resolution().height());
                // Prefer the ideal rate, then the largest frame when no size was requested
                (distance, u64::MAX - area)
            })
            .copied(),
    }
}

#[async_trait]
impl MediaCapabilityProvider for NativeProvider {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceId>, EnumerationError> {
        let backend = self.backend;
        let cameras = tokio::task::spawn_blocking(move || nokhwa::query(backend))
            .await
            .map_err(|e| EnumerationError::EnumerateFailed(format!("Task join error: {}", e)))?
            .map_err(|e| {
                EnumerationError::EnumerateFailed(format!("Failed to query cameras: {}", e))
            })?;

        Ok(cameras
            .into_iter()
            .map(|info| info.index().to_string())
            .collect())
    }

    async fn query_capabilities(
        &self,
        device_id: &DeviceId,
    ) -> Result<CapabilitySnapshot, CapabilityError> {
        let id = device_id.clone();
        let formats = tokio::task::spawn_blocking(move || query_formats(&id))
            .await
            .map_err(|e| CapabilityError::Aborted(format!("Task join error: {}", e)))?;

        let formats = match formats {
            Ok(formats) => formats,
            Err(NokhwaError::NotImplementedError(_))
            | Err(NokhwaError::UnsupportedOperationError(_)) => {
                return Err(UnsupportedCapabilityError {
                    device_id: device_id.clone(),
                }
                .into())
            }
            Err(e) => return Err(CapabilityError::Aborted(e.to_string())),
        };

        let resolution_of =
            |f: &CameraFormat| Resolution::new(f.resolution().width(), f.resolution().height());

        Ok(CapabilitySnapshot::new(
            device_id.clone(),
            Facing::Unknown,
            formats.iter().map(resolution_of),
            formats.iter().map(|f| (resolution_of(f), f.frame_rate())),
            formats
                .iter()
                .map(|f| FpsRange::new(f.frame_rate(), f.frame_rate())),
        ))
    }

    async fn open_stream(
        &self,
        constraints: &ConstraintSet,
    ) -> Result<Arc<dyn MediaStream>, OpenError> {
        let known = self
            .enumerate_devices()
            .await
            .map_err(|e| OpenError::Transient(e.to_string()))?;
        if !known.contains(&constraints.device_id) {
            return Err(OpenError::DeviceGone(constraints.device_id.clone()));
        }

        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), OpenError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let request = constraints.clone();

        let worker = std::thread::spawn(move || {
            let formats = match query_formats(&request.device_id) {
                Ok(formats) => formats,
                Err(e) => {
                    let _ = ready_tx.send(Err(OpenError::Transient(e.to_string())));
                    return;
                }
            };
            let Some(format) = select_format(&formats, &request) else {
                let _ = ready_tx.send(Err(OpenError::UnsupportedConstraint(format!(
                    "{:?} @ {:?}",
                    request.resolution, request.frame_rate
                ))));
                return;
            };

            let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Exact(format));
            let mut camera = match Camera::new(camera_index(&request.device_id), requested) {
                Ok(camera) => camera,
                Err(e) => {
                    let _ = ready_tx.send(Err(OpenError::Transient(e.to_string())));
                    return;
                }
            };
            if let Err(e) = camera.open_stream() {
                let _ = ready_tx.send(Err(OpenError::Transient(e.to_string())));
                return;
            }
            if ready_tx.send(Ok(())).is_err() {
                let _ = camera.stop_stream();
                return;
            }

            // Hold the camera until stop is requested or the handle is dropped
            let _ = stop_rx.recv();
            if let Err(e) = camera.stop_stream() {
                log::warn!("Failed to stop stream on {}: {}", request.device_id, e);
            }
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(Arc::new(NativeStream {
                id: Uuid::new_v4(),
                constraints: constraints.clone(),
                stop_tx: Mutex::new(Some(stop_tx)),
                worker: Mutex::new(Some(worker)),
            })),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(OpenError::Transient(
                "Camera thread exited before opening".to_string(),
            )),
        }
    }
}

struct NativeStream {
    id: Uuid,
    constraints: ConstraintSet,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl MediaStream for NativeStream {
    fn id(&self) -> Uuid {
        self.id
    }

    fn device_id(&self) -> &str {
        &self.constraints.device_id
    }

    fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    async fn stop(&self) {
        let sender = self
            .stop_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            let _ = tokio::task::spawn_blocking(move || worker.join()).await;
        }
    }
}

impl Drop for NativeStream {
    fn drop(&mut self) {
        if let Ok(mut sender) = self.stop_tx.lock() {
            if let Some(sender) = sender.take() {
                let _ = sender.send(());
            }
        }
    }
}
