//! Testing utilities for CrabCapture
//!
//! A scriptable capability provider and a recording session observer, so the
//! registry, preferrers and session can be exercised without hardware.

pub mod fake_provider;
pub mod observer;

pub use fake_provider::{FakeProvider, FakeStream};
pub use observer::{RecordingObserver, SessionEvent};
