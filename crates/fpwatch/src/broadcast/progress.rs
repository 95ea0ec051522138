//! Monitor progress broadcaster for real-time UI streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::monitor::reporter::{clamp_percent, IndicatorKind, ProgressReporter};
use crate::progress::state::TerminalKind;

/// Type of monitor event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorEventType {
    /// A progress bar moved.
    Indicator,
    /// The current step label changed.
    Step,
    /// The monitored operation finished.
    Terminal,
}

/// A presentation update, serializable for SSE or IPC transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorEvent {
    pub event_type: MonitorEventType,
    /// Target bar, for indicator events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indicator: Option<IndicatorKind>,
    /// Percentage (0-100), for indicator events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    /// Outcome, for terminal events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<TerminalKind>,
    /// Status text, step label or terminal message.
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl MonitorEvent {
    pub fn indicator(kind: IndicatorKind, percent: f64, status_text: &str) -> Self {
        Self {
            event_type: MonitorEventType::Indicator,
            indicator: Some(kind),
            percent: Some(clamp_percent(percent)),
            terminal: None,
            message: status_text.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn step(text: &str) -> Self {
        Self {
            event_type: MonitorEventType::Step,
            indicator: None,
            percent: None,
            terminal: None,
            message: text.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn terminal(kind: TerminalKind, message: &str) -> Self {
        Self {
            event_type: MonitorEventType::Terminal,
            indicator: None,
            percent: None,
            terminal: Some(kind),
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Broadcasts monitor events to any number of subscribers.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    sender: Arc<broadcast::Sender<MonitorEvent>>,
}

impl ProgressBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: MonitorEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ProgressReporter for ProgressBroadcaster {
    fn update_progress_indicator(&self, kind: IndicatorKind, percent: f64, status_text: &str) {
        self.send(MonitorEvent::indicator(kind, percent, status_text));
    }

    fn update_current_step(&self, text: &str) {
        self.send(MonitorEvent::step(text));
    }

    fn on_terminal(&self, kind: TerminalKind, message: &str) {
        self.send(MonitorEvent::terminal(kind, message));
    }
}
