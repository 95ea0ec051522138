#![allow(dead_code)]

use std::sync::Mutex;

use fpwatch::{IndicatorKind, ProgressReporter, TerminalKind};

/// One call made on the reporter.
#[derive(Debug, Clone, PartialEq)]
pub enum ReporterCall {
    Indicator(IndicatorKind, f64, String),
    Step(String),
    Terminal(TerminalKind, String),
}

/// Reporter that records every call for later assertions.
#[derive(Default)]
pub struct RecordingReporter {
    calls: Mutex<Vec<ReporterCall>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ReporterCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Percentages sent to the overall bar, in order.
    pub fn overall_values(&self) -> Vec<f64> {
        self.indicator_values(IndicatorKind::Overall)
    }

    pub fn indicator_values(&self, kind: IndicatorKind) -> Vec<f64> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                ReporterCall::Indicator(k, percent, _) if *k == kind => Some(*percent),
                _ => None,
            })
            .collect()
    }

    pub fn status_texts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                ReporterCall::Indicator(_, _, text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn terminals(&self) -> Vec<(TerminalKind, String)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                ReporterCall::Terminal(kind, message) => Some((*kind, message.clone())),
                _ => None,
            })
            .collect()
    }
}

impl ProgressReporter for RecordingReporter {
    fn update_progress_indicator(&self, kind: IndicatorKind, percent: f64, status_text: &str) {
        self.calls.lock().unwrap().push(ReporterCall::Indicator(
            kind,
            percent,
            status_text.to_string(),
        ));
    }

    fn update_current_step(&self, text: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(ReporterCall::Step(text.to_string()));
    }

    fn on_terminal(&self, kind: TerminalKind, message: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(ReporterCall::Terminal(kind, message.to_string()));
    }
}
