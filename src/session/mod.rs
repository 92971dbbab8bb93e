//! Capture session state machine
//!
//! A session walks devices, modes and ranked candidates until one stream
//! opens. Only one configure attempt runs at a time: `start()` joins it,
//! `reconfigure()` and `switch_device()` supersede it. When nothing opens
//! the session suspends and schedules a single retry after a fixed delay.

mod state;

pub use state::{ConfiguredStream, SessionObserver, SessionState, SuspendReason};

use crate::config::{PreviewConfig, SessionConfig};
use crate::errors::SessionError;
use crate::mode::{CaptureMode, PreferrerKind};
use crate::platform::{MediaCapabilityProvider, MediaStream};
use crate::preferrer::ConstraintsPreferrer;
use crate::registry::{DeviceRegistry, ExclusiveView};
use crate::types::{
    CapabilitySnapshot, CaptureCandidate, ConstraintSet, DeviceEvent, DeviceId, FrameRate,
    Resolution, SnapshotSet,
};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use state::SuspendSignals;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type Attempt = Shared<BoxFuture<'static, Result<ConfiguredStream, SessionError>>>;

struct ActiveStream {
    info: ConfiguredStream,
    stream: Arc<dyn MediaStream>,
    /// Capabilities of the device when the stream was committed
    snapshot: CapabilitySnapshot,
}

/// A stream opened by an attempt, not yet committed
struct Opened {
    mode: CaptureMode,
    resolution: Option<Resolution>,
    constraints: ConstraintSet,
    snapshot: CapabilitySnapshot,
    stream: Arc<dyn MediaStream>,
}

struct SessionCore {
    state: SessionState,
    suspend_reason: Option<SuspendReason>,
    requested_mode: CaptureMode,
    /// Device chosen through `switch_device`, tried first
    chosen_device: Option<DeviceId>,
    /// Device of the last committed stream
    last_device: Option<DeviceId>,
    active: Option<ActiveStream>,
    attempt_id: u64,
    attempt_cancel: Option<CancellationToken>,
    inflight: Option<Attempt>,
    retry: Option<JoinHandle<()>>,
    retry_seq: u64,
    capture_cancel: Option<CancellationToken>,
}

struct SessionInner {
    registry: DeviceRegistry,
    provider: Arc<dyn MediaCapabilityProvider>,
    photo: Arc<dyn ConstraintsPreferrer>,
    video: Arc<dyn ConstraintsPreferrer>,
    observer: Arc<dyn SessionObserver>,
    config: SessionConfig,
    preview: PreviewConfig,
    signals: SuspendSignals,
    core: Mutex<SessionCore>,
    /// Held for the whole hardware-probing part of an attempt
    hardware: tokio::sync::Mutex<()>,
    /// Held while a capture operation runs on the active stream
    capture_gate: tokio::sync::Mutex<()>,
}

/// Owner of the active hardware stream
#[derive(Clone)]
pub struct CaptureSession {
    inner: Arc<SessionInner>,
}

enum Commit {
    Streaming(ConfiguredStream),
    Discard(SessionError),
    Suspend(SuspendReason),
}

impl CaptureSession {
    pub fn new(
        registry: DeviceRegistry,
        photo: Arc<dyn ConstraintsPreferrer>,
        video: Arc<dyn ConstraintsPreferrer>,
        observer: Arc<dyn SessionObserver>,
        config: SessionConfig,
        preview: PreviewConfig,
    ) -> Self {
        let inner = Arc::new(SessionInner {
            provider: registry.provider(),
            registry: registry.clone(),
            photo,
            video,
            observer,
            signals: SuspendSignals::default(),
            core: Mutex::new(SessionCore {
                state: SessionState::Idle,
                suspend_reason: None,
                requested_mode: config.initial_mode,
                chosen_device: None,
                last_device: None,
                active: None,
                attempt_id: 0,
                attempt_cancel: None,
                inflight: None,
                retry: None,
                retry_seq: 0,
                capture_cancel: None,
            }),
            config,
            preview,
            hardware: tokio::sync::Mutex::new(()),
            capture_gate: tokio::sync::Mutex::new(()),
        });

        if let Some(set) = registry.snapshots() {
            inner.photo.on_capabilities_updated(&set.devices);
            inner.video.on_capabilities_updated(&set.devices);
        }

        let weak = Arc::downgrade(&inner);
        registry.on_device_change(move |set| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.photo.on_capabilities_updated(&set.devices);
            inner.video.on_capabilities_updated(&set.devices);
            inner.handle_device_change(set);
        });

        Self { inner }
    }

    /// Configure a stream for the requested mode.
    ///
    /// Joins the attempt already in flight, if any.
    pub async fn start(&self) -> Result<ConfiguredStream, SessionError> {
        self.inner.begin_attempt(false).await
    }

    /// Switch to another mode, superseding any attempt in flight
    pub async fn reconfigure(&self, mode: CaptureMode) -> Result<ConfiguredStream, SessionError> {
        {
            let mut core = self.inner.lock_core();
            log::info!("Reconfiguring session: {} -> {}", core.requested_mode, mode);
            core.requested_mode = mode;
        }
        self.inner.begin_attempt(true).await
    }

    /// Try `device_id` first from now on, superseding any attempt in flight
    pub async fn switch_device(
        &self,
        device_id: impl Into<DeviceId>,
    ) -> Result<ConfiguredStream, SessionError> {
        {
            let mut core = self.inner.lock_core();
            let device_id = device_id.into();
            log::info!("Switching session to device {}", device_id);
            core.chosen_device = Some(device_id);
        }
        self.inner.begin_attempt(true).await
    }

    /// Release the stream and go idle. Cancels the pending retry and any
    /// attempt in flight.
    pub async fn stop(&self) {
        {
            let mut core = self.inner.lock_core();
            core.attempt_id += 1;
            if let Some(token) = core.attempt_cancel.take() {
                token.cancel();
            }
            core.inflight = None;
            cancel_retry(&mut core);
            core.state = SessionState::Idle;
            core.suspend_reason = None;
        }
        self.inner.release_stream().await;
        log::info!("Capture session stopped");
    }

    pub async fn suspend(&self) {
        self.inner.set_signal(SuspendReason::Requested, true).await;
    }

    pub async fn resume(&self) {
        self.inner.set_signal(SuspendReason::Requested, false).await;
    }

    pub async fn set_backgrounded(&self, backgrounded: bool) {
        self.inner
            .set_signal(SuspendReason::Backgrounded, backgrounded)
            .await;
    }

    pub async fn set_screen_locked(&self, locked: bool) {
        self.inner.set_signal(SuspendReason::Locked, locked).await;
    }

    /// True while any external suspend signal is raised
    pub fn is_suspended(&self) -> bool {
        self.inner.signals.reason().is_some()
    }

    /// Report that the platform ended `stream_id` on its own.
    ///
    /// Ignored unless it is the active stream; otherwise the observer is told
    /// and the session reconfigures.
    pub async fn notify_stream_lost(
        &self,
        stream_id: Uuid,
    ) -> Result<ConfiguredStream, SessionError> {
        let lost = {
            let core = self.inner.lock_core();
            core.state == SessionState::Streaming
                && core
                    .active
                    .as_ref()
                    .map(|a| a.info.stream_id == stream_id)
                    .unwrap_or(false)
        };
        if !lost {
            return Err(SessionError::NotStreaming);
        }

        log::warn!("Stream {} lost, reconfiguring", stream_id);
        self.inner.observer.on_stream_lost();
        self.inner.begin_attempt(false).await
    }

    /// Run a capture operation against the active stream.
    ///
    /// The token is cancelled when the stream is about to be released; the
    /// release waits for `f` to finish either way.
    pub async fn run_capture<F, Fut, T>(&self, f: F) -> Result<T, SessionError>
    where
        F: FnOnce(Arc<dyn MediaStream>, CancellationToken) -> Fut,
        Fut: Future<Output = T>,
    {
        let _busy = self.inner.capture_gate.lock().await;

        let (stream, token) = {
            let mut core = self.inner.lock_core();
            let stream = match (&core.state, &core.active) {
                (SessionState::Streaming, Some(active)) => active.stream.clone(),
                _ => return Err(SessionError::NotStreaming),
            };
            let token = CancellationToken::new();
            core.capture_cancel = Some(token.clone());
            (stream, token)
        };

        let output = f(stream, token).await;
        self.inner.lock_core().capture_cancel = None;
        Ok(output)
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock_core().state
    }

    pub fn suspend_reason(&self) -> Option<SuspendReason> {
        self.inner.lock_core().suspend_reason
    }

    pub fn requested_mode(&self) -> CaptureMode {
        self.inner.lock_core().requested_mode
    }

    /// The committed stream, if streaming
    pub fn active(&self) -> Option<ConfiguredStream> {
        self.inner
            .lock_core()
            .active
            .as_ref()
            .map(|a| a.info.clone())
    }

    /// True while a retry timer is pending
    pub fn retry_pending(&self) -> bool {
        self.inner.lock_core().retry.is_some()
    }
}

fn cancel_retry(core: &mut SessionCore) {
    if let Some(retry) = core.retry.take() {
        log::debug!("Cancelling pending retry");
        retry.abort();
    }
}

impl SessionInner {
    fn lock_core(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a configure attempt, or join the one in flight unless
    /// `supersede` is set
    fn begin_attempt(self: &Arc<Self>, supersede: bool) -> Attempt {
        let mut core = self.lock_core();
        if !supersede && core.state == SessionState::Configuring {
            if let Some(attempt) = core.inflight.clone() {
                log::debug!("Joining configure attempt {}", core.attempt_id);
                return attempt;
            }
        }

        if let Some(token) = core.attempt_cancel.take() {
            log::debug!("Superseding configure attempt {}", core.attempt_id);
            token.cancel();
        }
        cancel_retry(&mut core);

        core.attempt_id += 1;
        let id = core.attempt_id;
        let token = CancellationToken::new();
        core.attempt_cancel = Some(token.clone());
        core.state = SessionState::Configuring;
        core.suspend_reason = None;
        log::info!(
            "Session configuring ({} mode, attempt {})",
            core.requested_mode,
            id
        );

        let inner = self.clone();
        let handle = tokio::spawn(async move { inner.run_attempt(id, token).await });
        let attempt = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("Configure attempt {} panicked or was aborted: {}", id, e);
                    Err(SessionError::Superseded)
                }
            }
        }
        .boxed()
        .shared();

        core.inflight = Some(attempt.clone());
        attempt
    }

    async fn run_attempt(
        self: Arc<Self>,
        id: u64,
        token: CancellationToken,
    ) -> Result<ConfiguredStream, SessionError> {
        let _hardware = self.hardware.lock().await;
        if token.is_cancelled() {
            return Err(self.superseded());
        }

        self.release_stream().await;

        let view = match self.registry.lock_exclusive().await {
            Ok(view) => view,
            Err(e) => {
                log::warn!("No device snapshot available: {}", e);
                return self.finish_exhausted(id);
            }
        };

        if let Some(reason) = self.signals.reason() {
            drop(view);
            return self.finish_suspended(id, reason);
        }

        let (requested, order) = {
            let core = self.lock_core();
            (core.requested_mode, self.device_order(&core, &view))
        };

        for device_id in order {
            let Some(snapshot) = view.get(&device_id).cloned() else {
                continue;
            };

            for mode in requested.fallback_chain() {
                if !mode.is_supported_by(&snapshot) {
                    continue;
                }

                for CaptureCandidate {
                    capture_resolution,
                    preview_candidates,
                } in self.candidates(&snapshot, mode)
                {
                    for constraints in preview_candidates {
                        if token.is_cancelled() {
                            return Err(self.superseded());
                        }
                        if let Some(reason) = self.signals.reason() {
                            drop(view);
                            return self.finish_suspended(id, reason);
                        }

                        let constraints = constraints.with_intent(mode.capture_intent());
                        match self.provider.open_stream(&constraints).await {
                            Ok(stream) => {
                                drop(view);
                                let opened = Opened {
                                    mode,
                                    resolution: capture_resolution,
                                    constraints,
                                    snapshot,
                                    stream,
                                };
                                return self.commit(id, &token, opened).await;
                            }
                            Err(e) => {
                                log::debug!(
                                    "Open failed on {} ({} mode, {:?}): {}",
                                    device_id,
                                    mode,
                                    constraints.resolution,
                                    e
                                );
                            }
                        }
                    }
                }
            }
        }

        drop(view);
        if token.is_cancelled() {
            return Err(self.superseded());
        }
        self.finish_exhausted(id)
    }

    /// Chosen or last device first, then devices facing the default
    /// direction, then the rest in enumeration order
    fn device_order(&self, core: &SessionCore, view: &ExclusiveView) -> Vec<DeviceId> {
        let mut order: Vec<DeviceId> = Vec::new();

        let first = core.chosen_device.as_ref().or(core.last_device.as_ref());
        if let Some(id) = first {
            if view.get(id).is_some() {
                order.push(id.clone());
            }
        }

        for snapshot in view.devices() {
            if snapshot.facing == self.config.default_facing && !order.contains(&snapshot.device_id)
            {
                order.push(snapshot.device_id.clone());
            }
        }
        for snapshot in view.devices() {
            if !order.contains(&snapshot.device_id) {
                order.push(snapshot.device_id.clone());
            }
        }
        order
    }

    fn candidates(&self, snapshot: &CapabilitySnapshot, mode: CaptureMode) -> Vec<CaptureCandidate> {
        if !snapshot.is_extended() {
            let frame_rate = FrameRate::Variable {
                min: self.preview.min_fps,
                ideal: self.preview.ideal_fps,
            };
            return vec![CaptureCandidate {
                capture_resolution: None,
                preview_candidates: vec![ConstraintSet::basic(
                    snapshot.device_id.clone(),
                    frame_rate,
                )],
            }];
        }

        let previews: Vec<Resolution> = snapshot.video_resolution_list();
        match mode.preferrer() {
            PreferrerKind::Photo => self.photo.sorted_candidates(&snapshot.device_id, &previews),
            PreferrerKind::Video => self.video.sorted_candidates(&snapshot.device_id, &previews),
        }
    }

    async fn commit(
        self: &Arc<Self>,
        id: u64,
        token: &CancellationToken,
        opened: Opened,
    ) -> Result<ConfiguredStream, SessionError> {
        let Opened {
            mode,
            resolution,
            constraints,
            snapshot,
            stream,
        } = opened;
        let info = ConfiguredStream {
            device_id: constraints.device_id.clone(),
            mode,
            resolution,
            constraints,
            stream_id: stream.id(),
            configured_at: Utc::now(),
        };

        let decision = {
            let mut core = self.lock_core();
            if core.attempt_id != id || token.is_cancelled() {
                Commit::Discard(superseded_error(&core))
            } else if let Some(reason) = self.signals.reason() {
                Commit::Suspend(reason)
            } else {
                core.state = SessionState::Streaming;
                core.suspend_reason = None;
                core.inflight = None;
                core.attempt_cancel = None;
                core.chosen_device = None;
                core.last_device = Some(info.device_id.clone());
                core.active = Some(ActiveStream {
                    info: info.clone(),
                    stream: stream.clone(),
                    snapshot,
                });
                Commit::Streaming(info)
            }
        };

        match decision {
            Commit::Streaming(info) => {
                log::info!(
                    "Session streaming on {} ({} mode, {})",
                    info.device_id,
                    info.mode,
                    info.resolution
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "basic".to_string())
                );
                self.observer
                    .on_configured(&info.device_id, info.mode, info.resolution);
                Ok(info)
            }
            Commit::Discard(e) => {
                log::debug!("Discarding stream opened by stale attempt {}", id);
                stream.stop().await;
                Err(e)
            }
            Commit::Suspend(reason) => {
                stream.stop().await;
                self.finish_suspended(id, reason)
            }
        }
    }

    fn finish_suspended(
        self: &Arc<Self>,
        id: u64,
        reason: SuspendReason,
    ) -> Result<ConfiguredStream, SessionError> {
        {
            let mut core = self.lock_core();
            if core.attempt_id != id {
                return Err(superseded_error(&core));
            }
            core.state = SessionState::Suspended;
            core.suspend_reason = Some(reason);
            core.inflight = None;
            core.attempt_cancel = None;
        }

        log::info!("Session suspended: {}", reason);
        self.observer.on_suspended(reason);
        Err(SessionError::Suspended(reason))
    }

    fn finish_exhausted(self: &Arc<Self>, id: u64) -> Result<ConfiguredStream, SessionError> {
        {
            let mut core = self.lock_core();
            if core.attempt_id != id {
                return Err(superseded_error(&core));
            }
            core.state = SessionState::Suspended;
            core.suspend_reason = Some(SuspendReason::Exhausted);
            core.inflight = None;
            core.attempt_cancel = None;
            self.schedule_retry(&mut core);
        }

        log::warn!("No candidate could be opened on any device, session suspended");
        self.observer.on_suspended(SuspendReason::Exhausted);
        Err(SessionError::Exhausted)
    }

    /// Replace the pending retry with a new one after the fixed delay
    fn schedule_retry(self: &Arc<Self>, core: &mut SessionCore) {
        cancel_retry(core);
        core.retry_seq += 1;
        let seq = core.retry_seq;
        let delay = self.config.retry_delay();
        log::debug!("Retrying configuration in {:?}", delay);

        let weak = Arc::downgrade(self);
        core.retry = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let Some(inner) = weak.upgrade() else {
                return;
            };
            let due = {
                let mut core = inner.lock_core();
                if core.retry_seq != seq {
                    return;
                }
                core.retry = None;
                core.state == SessionState::Suspended
                    && core.suspend_reason == Some(SuspendReason::Exhausted)
            };
            if due {
                let _ = inner.begin_attempt(false).await;
            }
        }));
    }

    fn superseded(&self) -> SessionError {
        superseded_error(&self.lock_core())
    }

    /// Stop the active stream, after cancelling and awaiting any capture
    async fn release_stream(&self) {
        let (active, capture) = {
            let mut core = self.lock_core();
            (core.active.take(), core.capture_cancel.clone())
        };

        if let Some(token) = capture {
            log::debug!("Cancelling in-flight capture before releasing the stream");
            token.cancel();
        }
        let _capture = self.capture_gate.lock().await;

        if let Some(active) = active {
            log::debug!(
                "Stopping stream {} on {}",
                active.info.stream_id,
                active.info.device_id
            );
            active.stream.stop().await;
        }
    }

    async fn set_signal(self: &Arc<Self>, signal: SuspendReason, raised: bool) {
        self.signals.set(signal, raised);

        match self.signals.reason() {
            Some(reason) => {
                let release = {
                    let mut core = self.lock_core();
                    match core.state {
                        SessionState::Streaming => {
                            core.state = SessionState::Suspended;
                            core.suspend_reason = Some(reason);
                            true
                        }
                        SessionState::Suspended => {
                            cancel_retry(&mut core);
                            core.suspend_reason = Some(reason);
                            false
                        }
                        SessionState::Idle | SessionState::Configuring => false,
                    }
                };
                if release {
                    self.release_stream().await;
                    log::info!("Session suspended: {}", reason);
                    self.observer.on_suspended(reason);
                }
            }
            None => {
                let resume = {
                    let core = self.lock_core();
                    core.state == SessionState::Suspended
                        && core.suspend_reason != Some(SuspendReason::Exhausted)
                };
                if resume {
                    log::info!("Suspend signals cleared, resuming session");
                    let _ = self.begin_attempt(false).await;
                }
            }
        }
    }

    fn handle_device_change(self: &Arc<Self>, set: &SnapshotSet) {
        let (restart, lost) = {
            let core = self.lock_core();
            match core.state {
                SessionState::Streaming => match core.active.as_ref() {
                    Some(active) => match set.get(&active.info.device_id) {
                        None => (true, true),
                        Some(current) if *current != active.snapshot => {
                            log::info!(
                                "Capabilities of {} changed, reconfiguring",
                                active.info.device_id
                            );
                            (true, false)
                        }
                        Some(_) => (false, false),
                    },
                    None => (false, false),
                },
                SessionState::Suspended => {
                    let connected = set
                        .changes
                        .iter()
                        .any(|c| matches!(c, DeviceEvent::Connected(_)));
                    (
                        connected && core.suspend_reason == Some(SuspendReason::Exhausted),
                        false,
                    )
                }
                SessionState::Idle | SessionState::Configuring => (false, false),
            }
        };

        if lost {
            log::warn!("Active device disappeared, reconfiguring");
            self.observer.on_stream_lost();
        }
        if restart {
            drop(self.begin_attempt(false));
        }
    }
}

fn superseded_error(core: &SessionCore) -> SessionError {
    if core.state == SessionState::Idle {
        SessionError::Stopped
    } else {
        SessionError::Superseded
    }
}
