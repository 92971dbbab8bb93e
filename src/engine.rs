//! Engine wiring
//!
//! Builds the registry, both preferrers and the session from one config so
//! applications get a ready session with a single call.

use crate::config::CrabCaptureConfig;
use crate::errors::CaptureError;
use crate::platform::MediaCapabilityProvider;
use crate::preferences::{JsonFilePreferenceStore, PreferenceStore};
use crate::preferrer::{PhotoConstraintsPreferrer, VideoConstraintsPreferrer};
use crate::registry::DeviceRegistry;
use crate::session::{CaptureSession, SessionObserver};
use std::path::Path;
use std::sync::Arc;

pub struct CaptureEngine {
    config: CrabCaptureConfig,
    registry: DeviceRegistry,
    photo: Arc<PhotoConstraintsPreferrer>,
    video: Arc<VideoConstraintsPreferrer>,
    session: CaptureSession,
}

impl CaptureEngine {
    /// Validate `config`, run the initial device refresh and start polling
    /// for device changes when enabled
    pub async fn new(
        provider: Arc<dyn MediaCapabilityProvider>,
        store: Arc<dyn PreferenceStore>,
        observer: Arc<dyn SessionObserver>,
        config: CrabCaptureConfig,
    ) -> Result<Self, CaptureError> {
        config.validate()?;

        let registry = DeviceRegistry::new(provider).await;
        let photo = Arc::new(PhotoConstraintsPreferrer::new(
            store.clone(),
            config.preview.clone(),
        ));
        let video = Arc::new(VideoConstraintsPreferrer::new(
            store,
            config.preview.clone(),
        ));
        let session = CaptureSession::new(
            registry.clone(),
            photo.clone(),
            video.clone(),
            observer,
            config.session.clone(),
            config.preview.clone(),
        );

        if config.registry.monitor_devices {
            registry.start_monitoring(config.registry.poll_interval());
        }

        log::info!(
            "Capture engine ready ({} mode, retry delay {:?})",
            config.session.initial_mode,
            config.session.retry_delay()
        );

        Ok(Self {
            config,
            registry,
            photo,
            video,
            session,
        })
    }

    /// Load the config at `path` and persist preferences in the JSON file it names
    pub async fn from_config_file<P: AsRef<Path>>(
        provider: Arc<dyn MediaCapabilityProvider>,
        observer: Arc<dyn SessionObserver>,
        path: P,
    ) -> Result<Self, CaptureError> {
        let config = CrabCaptureConfig::load_from_file(path)?;
        let store = Arc::new(JsonFilePreferenceStore::open(&config.preferences.path)?);
        Self::new(provider, store, observer, config).await
    }

    pub fn config(&self) -> &CrabCaptureConfig {
        &self.config
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn photo_preferrer(&self) -> &Arc<PhotoConstraintsPreferrer> {
        &self.photo
    }

    pub fn video_preferrer(&self) -> &Arc<VideoConstraintsPreferrer> {
        &self.video
    }

    /// Stop the session and device polling
    pub async fn shutdown(&self) {
        self.session.stop().await;
        self.registry.stop_monitoring();
        log::info!("Capture engine shut down");
    }
}
