//! In-memory capability provider
//!
//! Devices, delays and open outcomes are scripted by the test. The provider
//! also counts calls and tracks how many capability queries run at once, which
//! lets tests check that refreshes never overlap an exclusive view.

use crate::errors::{CapabilityError, EnumerationError, OpenError, UnsupportedCapabilityError};
use crate::platform::{MediaCapabilityProvider, MediaStream};
use crate::types::{CapabilitySnapshot, ConstraintSet, DeviceId};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

type OpenFilter = Arc<dyn Fn(&ConstraintSet) -> Result<(), OpenError> + Send + Sync>;

enum OpenPolicy {
    AcceptAll,
    FailAll,
    Filter(OpenFilter),
}

struct FakeDevice {
    id: DeviceId,
    /// `None` for devices without the extended capability interface
    snapshot: Option<CapabilitySnapshot>,
}

struct FakeState {
    devices: Vec<FakeDevice>,
    enumerate_delay: Duration,
    query_delay: Duration,
    open_delay: Duration,
    abort_queries: bool,
    enumerate_error: Option<EnumerationError>,
    open_policy: OpenPolicy,
    open_attempts: Vec<ConstraintSet>,
    enumerate_calls: usize,
    query_calls: usize,
}

pub struct FakeProvider {
    state: Mutex<FakeState>,
    active_queries: AtomicUsize,
    max_active_queries: AtomicUsize,
    live_streams: Arc<AtomicUsize>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                devices: Vec::new(),
                enumerate_delay: Duration::ZERO,
                query_delay: Duration::ZERO,
                open_delay: Duration::ZERO,
                abort_queries: false,
                enumerate_error: None,
                open_policy: OpenPolicy::AcceptAll,
                open_attempts: Vec::new(),
                enumerate_calls: 0,
                query_calls: 0,
            }),
            active_queries: AtomicUsize::new(0),
            max_active_queries: AtomicUsize::new(0),
            live_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_devices(devices: Vec<CapabilitySnapshot>) -> Self {
        let provider = Self::new();
        for device in devices {
            provider.add_device(device);
        }
        provider
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a device, replacing one with the same id
    pub fn add_device(&self, snapshot: CapabilitySnapshot) {
        let mut state = self.state();
        let id = snapshot.device_id.clone();
        let device = FakeDevice {
            id: id.clone(),
            snapshot: Some(snapshot),
        };
        match state.devices.iter_mut().find(|d| d.id == id) {
            Some(existing) => *existing = device,
            None => state.devices.push(device),
        }
    }

    /// Attach a device whose capability query reports it as unsupported
    pub fn add_basic_device(&self, id: &str) {
        let mut state = self.state();
        state.devices.retain(|d| d.id != id);
        state.devices.push(FakeDevice {
            id: id.to_string(),
            snapshot: None,
        });
    }

    pub fn remove_device(&self, id: &str) {
        self.state().devices.retain(|d| d.id != id);
    }

    pub fn set_enumerate_delay(&self, delay: Duration) {
        self.state().enumerate_delay = delay;
    }

    pub fn set_query_delay(&self, delay: Duration) {
        self.state().query_delay = delay;
    }

    pub fn set_open_delay(&self, delay: Duration) {
        self.state().open_delay = delay;
    }

    /// Make every capability query fail with an abort
    pub fn abort_queries(&self, abort: bool) {
        self.state().abort_queries = abort;
    }

    pub fn fail_enumeration(&self, error: Option<EnumerationError>) {
        self.state().enumerate_error = error;
    }

    pub fn fail_all_opens(&self) {
        self.state().open_policy = OpenPolicy::FailAll;
    }

    pub fn accept_all_opens(&self) {
        self.state().open_policy = OpenPolicy::AcceptAll;
    }

    /// Decide each open with `filter`
    pub fn set_open_filter<F>(&self, filter: F)
    where
        F: Fn(&ConstraintSet) -> Result<(), OpenError> + Send + Sync + 'static,
    {
        self.state().open_policy = OpenPolicy::Filter(Arc::new(filter));
    }

    /// Every constraint set passed to `open_stream`, in call order
    pub fn open_attempts(&self) -> Vec<ConstraintSet> {
        self.state().open_attempts.clone()
    }

    pub fn clear_open_attempts(&self) {
        self.state().open_attempts.clear();
    }

    pub fn enumerate_calls(&self) -> usize {
        self.state().enumerate_calls
    }

    pub fn query_calls(&self) -> usize {
        self.state().query_calls
    }

    /// Capability queries currently running
    pub fn active_queries(&self) -> usize {
        self.active_queries.load(Ordering::SeqCst)
    }

    /// Highest number of capability queries that ever ran at once
    pub fn max_active_queries(&self) -> usize {
        self.max_active_queries.load(Ordering::SeqCst)
    }

    /// Streams opened and not yet stopped
    pub fn live_streams(&self) -> usize {
        self.live_streams.load(Ordering::SeqCst)
    }
}

struct QueryGuard<'a>(&'a AtomicUsize);

impl Drop for QueryGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaCapabilityProvider for FakeProvider {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceId>, EnumerationError> {
        let delay = {
            let mut state = self.state();
            state.enumerate_calls += 1;
            state.enumerate_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let state = self.state();
        if let Some(error) = &state.enumerate_error {
            return Err(error.clone());
        }
        Ok(state.devices.iter().map(|d| d.id.clone()).collect())
    }

    async fn query_capabilities(
        &self,
        device_id: &DeviceId,
    ) -> Result<CapabilitySnapshot, CapabilityError> {
        let active = self.active_queries.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_queries.fetch_max(active, Ordering::SeqCst);
        let _guard = QueryGuard(&self.active_queries);

        let delay = {
            let mut state = self.state();
            state.query_calls += 1;
            state.query_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let state = self.state();
        if state.abort_queries {
            return Err(CapabilityError::Aborted(format!(
                "query for {} aborted",
                device_id
            )));
        }
        match state.devices.iter().find(|d| &d.id == device_id) {
            Some(FakeDevice {
                snapshot: Some(snapshot),
                ..
            }) => Ok(snapshot.clone()),
            Some(FakeDevice { snapshot: None, .. }) => Err(UnsupportedCapabilityError {
                device_id: device_id.clone(),
            }
            .into()),
            None => Err(CapabilityError::Aborted(format!(
                "device {} disappeared",
                device_id
            ))),
        }
    }

    async fn open_stream(
        &self,
        constraints: &ConstraintSet,
    ) -> Result<Arc<dyn MediaStream>, OpenError> {
        let delay = {
            let mut state = self.state();
            state.open_attempts.push(constraints.clone());
            state.open_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let filter = {
            let state = self.state();
            if !state.devices.iter().any(|d| d.id == constraints.device_id) {
                return Err(OpenError::DeviceGone(constraints.device_id.clone()));
            }
            match &state.open_policy {
                OpenPolicy::AcceptAll => None,
                OpenPolicy::FailAll => {
                    return Err(OpenError::Transient("camera busy".to_string()));
                }
                OpenPolicy::Filter(filter) => Some(filter.clone()),
            }
        };
        if let Some(filter) = filter {
            filter(constraints)?;
        }

        self.live_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeStream {
            id: Uuid::new_v4(),
            constraints: constraints.clone(),
            stopped: AtomicBool::new(false),
            live: self.live_streams.clone(),
        }))
    }
}

/// Stream handed out by [`FakeProvider`]
pub struct FakeStream {
    id: Uuid,
    constraints: ConstraintSet,
    stopped: AtomicBool,
    live: Arc<AtomicUsize>,
}

impl FakeStream {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaStream for FakeStream {
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
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
