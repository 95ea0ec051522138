//! Shared test utilities for fpwatch integration tests.
//!
//! This module provides:
//! - `FakeBackend`, a scripted `ProcessBackend` with failure injection
//! - `RecordingReporter`, which captures every presentation call
//! - Config helpers with short intervals for paused-clock tests

pub mod fake_backend;
pub mod reporter;

pub use fake_backend::FakeBackend;
pub use reporter::{ReporterCall, RecordingReporter};

use fpwatch::MonitorConfig;

/// Config with intervals small enough for tests.
#[allow(dead_code)]
pub fn fast_config() -> MonitorConfig {
    MonitorConfig {
        poll_interval_ms: 100,
        max_backoff_ms: 400,
        transient_failure_threshold: 2,
        cancel_confirm_attempts: 3,
        cancel_confirm_interval_ms: 50,
        ..MonitorConfig::default()
    }
}
