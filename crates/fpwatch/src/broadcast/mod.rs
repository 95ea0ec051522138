//! Broadcasting of monitor events for real-time streaming.
//!
//! The broadcaster implements [`ProgressReporter`](crate::monitor::ProgressReporter),
//! so it can be handed to a session directly and consumed by any transport.

pub mod progress;

pub use progress::{MonitorEvent, MonitorEventType, ProgressBroadcaster};
