use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::progress::state::{
    default_step_durations_secs, StepTimeEstimate, DEFAULT_ESTIMATE_CAP_PERCENT,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound for the retry delay after failed fetches.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Consecutive failed fetches before the user is told about them.
    #[serde(default = "default_transient_failure_threshold")]
    pub transient_failure_threshold: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_estimate_cap_percent")]
    pub estimate_cap_percent: f64,
    /// One entry per pipeline step, in registry order.
    #[serde(default = "default_step_durations_secs")]
    pub expected_step_durations_secs: Vec<u64>,
    #[serde(default = "default_cancel_confirm_attempts")]
    pub cancel_confirm_attempts: u32,
    #[serde(default = "default_cancel_confirm_interval_ms")]
    pub cancel_confirm_interval_ms: u64,
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_base_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1500
}

fn default_max_backoff_ms() -> u64 {
    15_000
}

fn default_transient_failure_threshold() -> u32 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_estimate_cap_percent() -> f64 {
    DEFAULT_ESTIMATE_CAP_PERCENT
}

fn default_cancel_confirm_attempts() -> u32 {
    5
}

fn default_cancel_confirm_interval_ms() -> u64 {
    1000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            base_url: default_base_url(),
            poll_interval_ms: default_poll_interval_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            transient_failure_threshold: default_transient_failure_threshold(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            estimate_cap_percent: default_estimate_cap_percent(),
            expected_step_durations_secs: default_step_durations_secs(),
            cancel_confirm_attempts: default_cancel_confirm_attempts(),
            cancel_confirm_interval_ms: default_cancel_confirm_interval_ms(),
            log_format: LogFormat::default(),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn cancel_confirm_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_confirm_interval_ms)
    }

    /// Time-based fallback settings for the state machine.
    pub fn step_time_estimate(&self) -> StepTimeEstimate {
        StepTimeEstimate::new(
            self.expected_step_durations_secs
                .iter()
                .copied()
                .map(Duration::from_secs)
                .collect(),
            self.estimate_cap_percent,
        )
    }
}
