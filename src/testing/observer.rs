use crate::mode::CaptureMode;
use crate::session::{SessionObserver, SuspendReason};
use crate::types::{DeviceId, Resolution};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

/// One observer callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Configured {
        device_id: DeviceId,
        mode: CaptureMode,
        resolution: Option<Resolution>,
    },
    Suspended(SuspendReason),
    StreamLost,
}

/// Session observer that keeps every callback, in order
pub struct RecordingObserver {
    events: Mutex<Vec<SessionEvent>>,
    tx: mpsc::UnboundedSender<SessionEvent>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl Default for RecordingObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingObserver {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            events: Mutex::new(Vec::new()),
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    fn record(&self, event: SessionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        let _ = self.tx.send(event);
    }

    /// All events so far
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Next event not yet consumed through this method
    pub async fn next_event(&self, timeout: Duration) -> Option<SessionEvent> {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    /// Consume events until one matches `predicate`
    pub async fn wait_for<F>(&self, predicate: F, timeout: Duration) -> Option<SessionEvent>
    where
        F: Fn(&SessionEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut rx = self.rx.lock().await;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(event)) if predicate(&event) => return Some(event),
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => return None,
            }
        }
    }
}

impl SessionObserver for RecordingObserver {
    fn on_configured(&self, device_id: &str, mode: CaptureMode, resolution: Option<Resolution>) {
        self.record(SessionEvent::Configured {
            device_id: device_id.to_string(),
            mode,
            resolution,
        });
    }

    fn on_suspended(&self, reason: SuspendReason) {
        self.record(SessionEvent::Suspended(reason));
    }

    fn on_stream_lost(&self) {
        self.record(SessionEvent::StreamLost);
    }
}
