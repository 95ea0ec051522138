use serde::{Deserialize, Serialize};

use crate::progress::state::{ProgressState, TerminalKind};

/// Which progress bar an update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    Overall,
    Step,
}

/// Presentation layer fed by the monitor.
pub trait ProgressReporter: Send + Sync {
    fn update_progress_indicator(&self, kind: IndicatorKind, percent: f64, status_text: &str);
    fn update_current_step(&self, text: &str);
    fn on_terminal(&self, kind: TerminalKind, message: &str);
}

/// No-op reporter for unit tests and headless runs.
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn update_progress_indicator(&self, _kind: IndicatorKind, _percent: f64, _status_text: &str) {}
    fn update_current_step(&self, _text: &str) {}
    fn on_terminal(&self, _kind: TerminalKind, _message: &str) {}
}

/// Clamps a percentage into [0, 100]; NaN renders as 0.
pub fn clamp_percent(percent: f64) -> f64 {
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}

/// Pushes both indicators and the step label for the current state.
pub fn render_progress(reporter: &dyn ProgressReporter, state: &ProgressState) {
    let phase_status = format!("{} - {}", state.active_phase, state.status_text);
    reporter.update_progress_indicator(
        IndicatorKind::Overall,
        clamp_percent(state.overall_progress),
        &phase_status,
    );
    reporter.update_progress_indicator(
        IndicatorKind::Step,
        clamp_percent(state.current_step_progress),
        &state.current_step_text,
    );
    reporter.update_current_step(&state.current_step_text);
}

/// Final render: indicators once more, then the terminal callback.
pub fn render_terminal(reporter: &dyn ProgressReporter, state: &ProgressState, kind: TerminalKind) {
    reporter.update_progress_indicator(
        IndicatorKind::Overall,
        clamp_percent(state.overall_progress),
        &state.status_text,
    );
    let message = state
        .terminal_message
        .clone()
        .unwrap_or_else(|| state.status_text.clone());
    reporter.on_terminal(kind, &message);
}
