//! Device registry and hot-plug monitoring
//!
//! The registry owns the published set of capability snapshots. Refreshes
//! and exclusive views share one FIFO gate:
//!
//! - at most one refresh runs at a time,
//! - refresh requests arriving while one is running collapse into a single
//!   follow-up refresh,
//! - an exclusive view first drains requested refreshes, then holds the gate
//!   so no refresh starts until the view is dropped.

use crate::errors::{CapabilityError, EnumerationError};
use crate::platform::MediaCapabilityProvider;
use crate::types::{CapabilitySnapshot, DeviceEvent, DeviceId, Facing, SnapshotSet};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;

/// Callback fired after every successful refresh, in publication order
pub type DeviceChangeListener = Arc<dyn Fn(&SnapshotSet) + Send + Sync>;

struct RefreshTickets {
    requested: u64,
    completed: u64,
    last_outcome: Result<(), EnumerationError>,
}

struct RegistryInner {
    provider: Arc<dyn MediaCapabilityProvider>,
    gate: Arc<tokio::sync::Mutex<()>>,
    published: RwLock<Option<Arc<SnapshotSet>>>,
    tickets: Mutex<RefreshTickets>,
    listeners: Mutex<Vec<DeviceChangeListener>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

/// Owner of the device capability snapshots
#[derive(Clone)]
pub struct DeviceRegistry {
    inner: Arc<RegistryInner>,
}

/// Consistent read access to the snapshots while refreshes are held back
pub struct ExclusiveView {
    snapshots: Arc<SnapshotSet>,
    _gate: OwnedMutexGuard<()>,
}

impl ExclusiveView {
    pub fn snapshots(&self) -> &SnapshotSet {
        &self.snapshots
    }

    pub fn devices(&self) -> &[CapabilitySnapshot] {
        &self.snapshots.devices
    }

    pub fn get(&self, device_id: &str) -> Option<&CapabilitySnapshot> {
        self.snapshots.get(device_id)
    }

    pub fn generation(&self) -> u64 {
        self.snapshots.generation
    }
}

impl DeviceRegistry {
    /// Create a registry and run the initial enumeration.
    ///
    /// A failed initial enumeration is logged; the registry simply has no
    /// published snapshots until a later refresh succeeds.
    pub async fn new(provider: Arc<dyn MediaCapabilityProvider>) -> Self {
        let registry = Self {
            inner: Arc::new(RegistryInner {
                provider,
                gate: Arc::new(tokio::sync::Mutex::new(())),
                published: RwLock::new(None),
                tickets: Mutex::new(RefreshTickets {
                    requested: 0,
                    completed: 0,
                    last_outcome: Ok(()),
                }),
                listeners: Mutex::new(Vec::new()),
                monitor: Mutex::new(None),
            }),
        };

        if let Err(e) = registry.refresh().await {
            log::warn!("Initial device enumeration failed: {}", e);
        }
        registry
    }

    /// Re-enumerate devices and publish a new snapshot set.
    ///
    /// When a refresh is already running the call waits for it and then
    /// shares the outcome of one follow-up refresh with every other caller
    /// that queued up meanwhile.
    pub async fn refresh(&self) -> Result<(), EnumerationError> {
        let ticket = {
            let mut tickets = self.inner.lock_tickets();
            tickets.requested += 1;
            tickets.requested
        };

        let _gate = self.inner.gate.lock().await;

        let covers = {
            let tickets = self.inner.lock_tickets();
            if tickets.completed >= ticket {
                return tickets.last_outcome.clone();
            }
            tickets.requested
        };

        let outcome = self.inner.run_refresh().await;
        self.inner.complete(covers, outcome.clone());
        outcome
    }

    /// Request a refresh without waiting for it
    pub fn notify_device_change(&self) {
        let registry = self.clone();
        tokio::spawn(async move {
            let _ = registry.refresh().await;
        });
    }

    /// Hold back refreshes and read a consistent snapshot set.
    ///
    /// Any refresh requested before the call completes first. Fails with
    /// [`EnumerationError::NoDevices`] when nothing was ever published.
    pub async fn lock_exclusive(&self) -> Result<ExclusiveView, EnumerationError> {
        let gate = self.inner.gate.clone().lock_owned().await;

        let pending = {
            let tickets = self.inner.lock_tickets();
            (tickets.requested > tickets.completed).then_some(tickets.requested)
        };
        if let Some(covers) = pending {
            let outcome = self.inner.run_refresh().await;
            self.inner.complete(covers, outcome);
        }

        let snapshots = self.snapshots().ok_or(EnumerationError::NoDevices)?;
        Ok(ExclusiveView {
            snapshots,
            _gate: gate,
        })
    }

    /// Run `f` against an exclusive view
    pub async fn with_exclusive_view<T, F>(&self, f: F) -> Result<T, EnumerationError>
    where
        F: FnOnce(&ExclusiveView) -> T,
    {
        let view = self.lock_exclusive().await?;
        Ok(f(&view))
    }

    /// Register a listener for published snapshot sets
    pub fn on_device_change<F>(&self, listener: F)
    where
        F: Fn(&SnapshotSet) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Latest published snapshot set
    pub fn snapshots(&self) -> Option<Arc<SnapshotSet>> {
        self.inner.published()
    }

    pub fn snapshot(&self, device_id: &str) -> Option<CapabilitySnapshot> {
        self.snapshots()
            .and_then(|set| set.get(device_id).cloned())
    }

    pub fn provider(&self) -> Arc<dyn MediaCapabilityProvider> {
        self.inner.provider.clone()
    }

    /// Poll the provider for device changes, refreshing when the set of
    /// device ids differs from the published one
    pub fn start_monitoring(&self, interval: Duration) {
        let mut monitor = self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if monitor.is_some() {
            return;
        }

        log::info!("Starting device monitoring via polling every {:?}", interval);

        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        *monitor = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let registry = DeviceRegistry { inner };

                let ids = match registry.inner.provider.enumerate_devices().await {
                    Ok(ids) => ids,
                    Err(e) => {
                        log::debug!("Device poll failed: {}", e);
                        continue;
                    }
                };

                let current: HashSet<DeviceId> = ids.into_iter().collect();
                let published: HashSet<DeviceId> = registry
                    .snapshots()
                    .map(|set| set.device_ids().into_iter().collect())
                    .unwrap_or_default();

                if current != published {
                    log::debug!("Device set changed, refreshing");
                    if let Err(e) = registry.refresh().await {
                        log::warn!("Refresh after device change failed: {}", e);
                    }
                }
            }
        }));
    }

    /// Stop polling for device changes
    pub fn stop_monitoring(&self) {
        let handle = self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            log::info!("Stopping device monitoring");
            handle.abort();
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl RegistryInner {
    fn lock_tickets(&self) -> std::sync::MutexGuard<'_, RefreshTickets> {
        self.tickets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn published(&self) -> Option<Arc<SnapshotSet>> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn complete(&self, covers: u64, outcome: Result<(), EnumerationError>) {
        let mut tickets = self.lock_tickets();
        tickets.completed = tickets.completed.max(covers);
        tickets.last_outcome = outcome;
    }

    /// One enumeration cycle. Must be called with the gate held.
    async fn run_refresh(&self) -> Result<(), EnumerationError> {
        match self.enumerate().await {
            Ok(devices) => {
                self.publish(devices);
                Ok(())
            }
            Err(e) => {
                log::warn!("Device refresh failed, keeping previous snapshots: {}", e);
                Err(e)
            }
        }
    }

    async fn enumerate(&self) -> Result<Vec<CapabilitySnapshot>, EnumerationError> {
        let ids = self.provider.enumerate_devices().await?;
        if ids.is_empty() {
            return Err(EnumerationError::NoDevices);
        }

        let mut devices = Vec::with_capacity(ids.len());
        for id in ids {
            match self.provider.query_capabilities(&id).await {
                Ok(snapshot) => devices.push(snapshot),
                Err(CapabilityError::Unsupported(e)) => {
                    log::info!("{}, falling back to basic mode", e);
                    devices.push(CapabilitySnapshot::basic(id, Facing::NotSet));
                }
                Err(CapabilityError::Aborted(reason)) => {
                    return Err(EnumerationError::QueryAborted {
                        device_id: id,
                        reason,
                    });
                }
            }
        }
        Ok(devices)
    }

    fn publish(&self, devices: Vec<CapabilitySnapshot>) {
        let previous = self.published();
        let old_ids: Vec<DeviceId> = previous
            .as_ref()
            .map(|set| set.device_ids())
            .unwrap_or_default();
        let new_ids: Vec<DeviceId> = devices.iter().map(|d| d.device_id.clone()).collect();

        let mut changes = Vec::new();
        for old_id in &old_ids {
            if !new_ids.contains(old_id) {
                log::info!("Device disconnected: {}", old_id);
                changes.push(DeviceEvent::Disconnected(old_id.clone()));
            }
        }
        for new_id in &new_ids {
            if !old_ids.contains(new_id) {
                log::info!("Device connected: {}", new_id);
                changes.push(DeviceEvent::Connected(new_id.clone()));
            }
        }

        let set = Arc::new(SnapshotSet {
            generation: previous.map(|p| p.generation + 1).unwrap_or(1),
            devices,
            changes,
        });
        *self
            .published
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(set.clone());

        log::debug!(
            "Published snapshot generation {} with {} device(s)",
            set.generation,
            set.devices.len()
        );

        let listeners: Vec<DeviceChangeListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(&set);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProvider;
    use crate::types::Resolution;

    fn camera(id: &str) -> CapabilitySnapshot {
        CapabilitySnapshot::new(
            id,
            Facing::User,
            vec![Resolution::new(1280, 960)],
            vec![(Resolution::new(1280, 720), 30)],
            vec![],
        )
    }

    #[tokio::test]
    async fn test_initial_refresh_publishes() {
        let provider = Arc::new(FakeProvider::with_devices(vec![camera("a"), camera("b")]));
        let registry = DeviceRegistry::new(provider.clone()).await;

        let set = registry.snapshots().unwrap();
        assert_eq!(set.generation, 1);
        assert_eq!(set.device_ids(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            set.changes,
            vec![
                DeviceEvent::Connected("a".to_string()),
                DeviceEvent::Connected("b".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_enumeration_keeps_previous() {
        let provider = Arc::new(FakeProvider::with_devices(vec![camera("a")]));
        let registry = DeviceRegistry::new(provider.clone()).await;

        provider.remove_device("a");
        assert_eq!(registry.refresh().await, Err(EnumerationError::NoDevices));
        let set = registry.snapshots().unwrap();
        assert_eq!(set.generation, 1);
        assert!(set.contains("a"));
    }

    #[tokio::test]
    async fn test_aborted_query_keeps_previous() {
        let provider = Arc::new(FakeProvider::with_devices(vec![camera("a")]));
        let registry = DeviceRegistry::new(provider.clone()).await;

        provider.add_device(camera("b"));
        provider.abort_queries(true);
        assert!(matches!(
            registry.refresh().await,
            Err(EnumerationError::QueryAborted { .. })
        ));
        assert!(!registry.snapshots().unwrap().contains("b"));

        provider.abort_queries(false);
        registry.refresh().await.unwrap();
        let set = registry.snapshots().unwrap();
        assert!(set.contains("b"));
        assert_eq!(set.changes, vec![DeviceEvent::Connected("b".to_string())]);
    }

    #[tokio::test]
    async fn test_unsupported_device_gets_basic_snapshot() {
        let provider = Arc::new(FakeProvider::new());
        provider.add_basic_device("legacy");
        let registry = DeviceRegistry::new(provider.clone()).await;

        let snapshot = registry.snapshot("legacy").unwrap();
        assert!(!snapshot.is_extended());
        assert!(snapshot.photo_resolutions().is_empty());
    }

    #[tokio::test]
    async fn test_exclusive_view_without_snapshots_fails() {
        let provider = Arc::new(FakeProvider::new());
        let registry = DeviceRegistry::new(provider).await;
        assert!(matches!(
            registry.with_exclusive_view(|view| view.generation()).await,
            Err(EnumerationError::NoDevices)
        ));
    }

    #[tokio::test]
    async fn test_monitoring_detects_new_device() {
        let provider = Arc::new(FakeProvider::with_devices(vec![camera("a")]));
        let registry = DeviceRegistry::new(provider.clone()).await;

        registry.start_monitoring(Duration::from_millis(10));
        assert!(registry.is_monitoring());
        provider.add_device(camera("b"));

        let mut found = false;
        for _ in 0..100 {
            if registry.snapshots().unwrap().contains("b") {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        registry.stop_monitoring();
        assert!(found);
        assert!(!registry.is_monitoring());
    }
}
