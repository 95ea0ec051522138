//! Progress state machine for one monitored pipeline operation.
//!
//! Lifecycle: `Idle -> Running -> {Completed, Failed, Cancelled}`.
//!
//! A terminal state reached locally (a completion line in the logs, or an
//! optimistic cancel) is provisional until the backend reports its own
//! terminal status. The backend status always wins; once it has been applied
//! the state is confirmed and nothing changes it until the next `start`.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::process::ProcessStatus;
use crate::progress::signal::{Phase, ProgressSignal, RunMode};
use crate::steps::StepRegistry;

/// Default cap for time-based estimates. An estimate never reports a step as done.
pub const DEFAULT_ESTIMATE_CAP_PERCENT: f64 = 95.0;

/// Lifecycle of a monitored operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Completed | LifecycleState::Failed | LifecycleState::Cancelled
        )
    }

    pub fn terminal_kind(&self) -> Option<TerminalKind> {
        match self {
            LifecycleState::Completed => Some(TerminalKind::Completed),
            LifecycleState::Failed => Some(TerminalKind::Failed),
            LifecycleState::Cancelled => Some(TerminalKind::Cancelled),
            LifecycleState::Idle | LifecycleState::Running => None,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Idle => write!(f, "Idle"),
            LifecycleState::Running => write!(f, "Running"),
            LifecycleState::Completed => write!(f, "Completed"),
            LifecycleState::Failed => write!(f, "Failed"),
            LifecycleState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Final outcome handed to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalKind {
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for TerminalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalKind::Completed => write!(f, "completed"),
            TerminalKind::Failed => write!(f, "failed"),
            TerminalKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Expected step durations behind the time-based fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct StepTimeEstimate {
    expected: Vec<Duration>,
    cap_percent: f64,
}

impl StepTimeEstimate {
    pub fn new(expected: Vec<Duration>, cap_percent: f64) -> Self {
        Self {
            expected,
            cap_percent: cap_percent.clamp(0.0, 100.0),
        }
    }

    /// Estimated progress of a step that has been running for `elapsed`.
    pub fn estimate(&self, step_index: usize, elapsed: Duration) -> f64 {
        let expected = self
            .expected
            .get(step_index)
            .or_else(|| self.expected.last())
            .copied()
            .unwrap_or(Duration::ZERO);
        if expected.is_zero() {
            return self.cap_percent;
        }
        let percent = elapsed.as_secs_f64() / expected.as_secs_f64() * 100.0;
        percent.min(self.cap_percent)
    }

    pub fn cap_percent(&self) -> f64 {
        self.cap_percent
    }
}

impl Default for StepTimeEstimate {
    fn default() -> Self {
        Self::new(
            default_step_durations_secs()
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
            DEFAULT_ESTIMATE_CAP_PERCENT,
        )
    }
}

/// Rough wall-clock expectations, in seconds, for each pipeline step.
pub fn default_step_durations_secs() -> Vec<u64> {
    vec![60, 120, 90, 180, 45, 30, 20]
}

/// Overall progress for a position in the pipeline.
///
/// Every step weighs 1/N. In `Both` mode Phase1 spans [0, 50] and Phase2
/// spans [50, 100]; single-phase runs span [0, 100].
pub fn weighted_overall(
    mode: RunMode,
    phase: Phase,
    step_index: usize,
    step_progress: f64,
    step_count: usize,
) -> f64 {
    if step_count == 0 {
        return 0.0;
    }
    let n = step_count as f64;
    let step_progress = step_progress.clamp(0.0, 100.0);

    let (offset, span) = match (mode, phase) {
        (RunMode::Both, Phase::Phase2) => (50.0, 50.0),
        (RunMode::Both, _) => (0.0, 50.0),
        _ => (0.0, 100.0),
    };

    let base = (step_index as f64 / n) * span;
    let contribution = (step_progress / 100.0) * (span / n);
    (offset + base + contribution).min(offset + span).clamp(0.0, 100.0)
}

/// Progress state of one session. Only [`ProgressStateMachine`] mutates it.
#[derive(Debug, Clone)]
pub struct ProgressState {
    pub session_id: String,
    pub command_id: Option<String>,
    pub mode: RunMode,
    pub active_phase: Phase,
    pub current_step_index: usize,
    pub current_step_progress: f64,
    pub overall_progress: f64,
    pub step_start_time: Instant,
    pub session_start_time: Instant,
    pub started_at: DateTime<Utc>,
    pub is_cancelled: bool,
    /// True once the backend has reported the terminal status.
    pub terminal_confirmed: bool,
    pub lifecycle: LifecycleState,
    pub status_text: String,
    pub current_step_text: String,
    /// Last line classified as an error, used as a failure hint.
    pub last_error_line: Option<String>,
    pub terminal_message: Option<String>,
}

impl ProgressState {
    fn idle(now: Instant) -> Self {
        Self {
            session_id: String::new(),
            command_id: None,
            mode: RunMode::Both,
            active_phase: Phase::Unknown,
            current_step_index: 0,
            current_step_progress: 0.0,
            overall_progress: 0.0,
            step_start_time: now,
            session_start_time: now,
            started_at: Utc::now(),
            is_cancelled: false,
            terminal_confirmed: false,
            lifecycle: LifecycleState::Idle,
            status_text: "Idle".to_string(),
            current_step_text: String::new(),
            last_error_line: None,
            terminal_message: None,
        }
    }

    /// Cancel requested locally, backend has not confirmed yet.
    pub fn is_cancelling(&self) -> bool {
        self.lifecycle == LifecycleState::Cancelled && !self.terminal_confirmed
    }

    pub fn elapsed(&self) -> Duration {
        self.session_start_time.elapsed()
    }
}

/// Owns and mutates the progress state of one monitored operation.
#[derive(Debug)]
pub struct ProgressStateMachine {
    registry: StepRegistry,
    estimate: StepTimeEstimate,
    state: ProgressState,
}

impl ProgressStateMachine {
    pub fn new(registry: StepRegistry, estimate: StepTimeEstimate) -> Self {
        Self {
            registry,
            estimate,
            state: ProgressState::idle(Instant::now()),
        }
    }

    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    pub fn snapshot(&self) -> ProgressState {
        self.state.clone()
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Phase hint for the classifier.
    pub fn active_phase(&self) -> Phase {
        self.state.active_phase
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.state.lifecycle
    }

    /// Starts a new monitored operation, discarding any previous state.
    pub fn start(&mut self, mode: RunMode, command_id: &str) {
        self.start_at(mode, command_id, Instant::now());
    }

    pub fn start_at(&mut self, mode: RunMode, command_id: &str, now: Instant) {
        let mut state = ProgressState::idle(now);
        state.session_id = Uuid::new_v4().to_string();
        state.command_id = Some(command_id.to_string());
        state.mode = mode;
        state.active_phase = mode.initial_phase();
        state.lifecycle = LifecycleState::Running;
        state.status_text = "Starting...".to_string();
        state.current_step_text = self.registry.label_for(0);
        self.state = state;
    }

    /// Back to `Idle`.
    pub fn reset(&mut self) {
        self.state = ProgressState::idle(Instant::now());
    }

    /// Consumes one signal. Returns true if the signal was applied.
    pub fn consume(&mut self, signal: &ProgressSignal) -> bool {
        self.consume_at(signal, Instant::now())
    }

    pub fn consume_at(&mut self, signal: &ProgressSignal, now: Instant) -> bool {
        if self.state.lifecycle != LifecycleState::Running {
            return false;
        }

        if signal.error {
            self.state.status_text = "Error".to_string();
            self.state.last_error_line = Some(signal.step_text.clone());
            return true;
        }

        if self.state.mode == RunMode::Both {
            match (signal.phase, self.state.active_phase) {
                (Phase::Phase2, Phase::Phase1) => self.enter_phase2(now),
                // Late output from the first run
                (Phase::Phase1, Phase::Phase2) => return false,
                _ => {}
            }
        }

        if signal.completed {
            self.complete_active_phase(now);
            return true;
        }

        if let Some(index) = signal.step_index {
            if index >= self.registry.len() || index < self.state.current_step_index {
                return false;
            }
            if index > self.state.current_step_index {
                self.state.current_step_index = index;
                self.state.current_step_progress = 0.0;
                self.state.step_start_time = now;
            }
            self.state.current_step_text = signal.step_text.clone();
        }

        let effective = if signal.step_progress_percent > 0.0 {
            signal.step_progress_percent
        } else {
            self.estimate_current_step(now)
        };
        self.state.current_step_progress = self
            .state
            .current_step_progress
            .max(effective)
            .clamp(0.0, 100.0);
        self.state.status_text = "Running".to_string();
        self.recompute_overall();
        true
    }

    /// Recomputes overall progress from the current step position.
    ///
    /// Never lowers the value while running.
    pub fn recompute_overall(&mut self) -> f64 {
        if self.state.lifecycle == LifecycleState::Running {
            let computed = weighted_overall(
                self.state.mode,
                self.state.active_phase,
                self.state.current_step_index,
                self.state.current_step_progress,
                self.registry.len(),
            );
            self.state.overall_progress = self.state.overall_progress.max(computed).clamp(0.0, 100.0);
        }
        self.state.overall_progress
    }

    /// Optimistic local cancel. Returns false if there was nothing to cancel.
    pub fn cancel(&mut self) -> bool {
        if self.state.lifecycle != LifecycleState::Running {
            return false;
        }
        self.state.is_cancelled = true;
        self.state.terminal_confirmed = false;
        self.state.lifecycle = LifecycleState::Cancelled;
        self.state.status_text = "Cancelling...".to_string();
        true
    }

    /// Applies the backend's reported status.
    ///
    /// Returns the terminal outcome when this call confirmed one, `None` when
    /// the status was not terminal or the state was already confirmed.
    pub fn apply_external_status(
        &mut self,
        status: ProcessStatus,
        message: Option<String>,
    ) -> Option<TerminalKind> {
        let lifecycle = self.state.lifecycle;
        if lifecycle == LifecycleState::Idle || self.state.terminal_confirmed {
            return None;
        }

        let kind = match status {
            ProcessStatus::Starting | ProcessStatus::Running => return None,
            ProcessStatus::Completed => TerminalKind::Completed,
            ProcessStatus::Failed => TerminalKind::Failed,
            ProcessStatus::Cancelled => TerminalKind::Cancelled,
            // Gone from the backend: finished before we looked
            ProcessStatus::NotFound => match lifecycle {
                LifecycleState::Failed => TerminalKind::Failed,
                LifecycleState::Cancelled => TerminalKind::Cancelled,
                _ => TerminalKind::Completed,
            },
        };

        match kind {
            TerminalKind::Completed => {
                self.state.lifecycle = LifecycleState::Completed;
                self.state.overall_progress = 100.0;
                self.state.current_step_progress = 100.0;
                self.state.status_text = "Completed".to_string();
                self.state.terminal_message = Some(message.unwrap_or_else(|| {
                    if status == ProcessStatus::NotFound {
                        "Process already finished".to_string()
                    } else {
                        "Process completed successfully".to_string()
                    }
                }));
            }
            TerminalKind::Failed => {
                self.state.lifecycle = LifecycleState::Failed;
                self.state.status_text = "Failed".to_string();
                let fallback = self
                    .state
                    .last_error_line
                    .clone()
                    .unwrap_or_else(|| "Process failed".to_string());
                self.state.terminal_message = Some(message.unwrap_or(fallback));
            }
            TerminalKind::Cancelled => {
                self.state.lifecycle = LifecycleState::Cancelled;
                self.state.is_cancelled = true;
                self.state.status_text = "Cancelled".to_string();
                self.state.terminal_message =
                    Some(message.unwrap_or_else(|| "Process cancelled".to_string()));
            }
        }
        self.state.terminal_confirmed = true;
        Some(kind)
    }

    fn enter_phase2(&mut self, now: Instant) {
        self.state.active_phase = Phase::Phase2;
        self.state.current_step_index = 0;
        self.state.current_step_progress = 0.0;
        self.state.step_start_time = now;
        self.state.current_step_text = self.registry.label_for(0);
        self.recompute_overall();
    }

    fn complete_active_phase(&mut self, now: Instant) {
        let last = self.registry.last_index().unwrap_or(0);
        self.state.current_step_index = last;
        self.state.current_step_progress = 100.0;
        self.recompute_overall();

        if self.state.mode == RunMode::Both && self.state.active_phase == Phase::Phase1 {
            self.enter_phase2(now);
            self.state.status_text = "Phase 1 complete".to_string();
            return;
        }

        self.state.overall_progress = 100.0;
        self.state.lifecycle = LifecycleState::Completed;
        self.state.status_text = "Completed".to_string();
        self.state.current_step_text = "Completed".to_string();
    }

    fn estimate_current_step(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.state.step_start_time);
        self.estimate
            .estimate(self.state.current_step_index, elapsed)
    }
}

impl Default for ProgressStateMachine {
    fn default() -> Self {
        Self::new(StepRegistry::pipeline(), StepTimeEstimate::default())
    }
}
