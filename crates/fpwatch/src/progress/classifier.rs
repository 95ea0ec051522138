//! Heuristic log line classification.
//!
//! The backend emits free-form text only. This module turns one line into a
//! [`ProgressSignal`] without side effects, so the same line always yields the
//! same signal.
//!
//! Recognized progress patterns, in priority order:
//! - `Building FAISS index: 45%|████▌ | 23/50` (bar-style, percentage used as is)
//! - `Ingesting 3 of 10` or `Ingesting 3/10` (ratio, rounded)
//! - `Running queries 80%` (standalone percentage)

use regex::Regex;
use std::sync::LazyLock;

use crate::progress::signal::{Phase, ProgressSignal};
use crate::steps::StepRegistry;

// Pre-compiled regexes for parsing pipeline log output
static RE_PHASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)phase[_ ]?([12])").unwrap());
static RE_BAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,3}(?:\.\d+)?)%\s*\|[^|\d]*\|?\s*(\d+)\s*/\s*(\d+)").unwrap()
});
static RE_RATIO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*(?:of|/)\s*(\d+)").unwrap());
static RE_PERCENTAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3}(?:\.\d+)?)\s*%").unwrap());

/// Fallback step inference, consulted only when no registry step matched.
const STEP_INFERENCE: &[(&str, usize)] = &[
    ("ingest", 0),
    ("transform", 1),
    ("generating", 1),
    ("index", 2),
    ("faiss", 2),
    ("embedding", 2),
    ("query", 3),
    ("analyz", 4),
    ("failure", 5),
    ("capturing", 5),
    ("report", 6),
];

const COMPLETION_KEYWORDS: &[&str] = &["completed", "finished", "experiment run:", "report generated"];

const ERROR_KEYWORDS: &[&str] = &["error", "failed", "exception", "traceback"];

/// Maximum length kept from a raw line used as display text.
const MAX_LINE_TEXT: usize = 200;

/// Numeric progress pulled out of a line.
#[derive(Debug, Clone, PartialEq)]
struct NumericProgress {
    percent: f64,
    /// `current/total` as shown to the user, when the line had one.
    display: Option<String>,
}

/// Classifies log lines against a step registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogLineClassifier {
    registry: StepRegistry,
}

impl LogLineClassifier {
    pub fn new(registry: StepRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Classifies one line. `hint` is the phase assumed when the line carries
    /// no phase marker.
    pub fn classify(&self, line: &str, hint: Phase) -> Option<ProgressSignal> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let line_lower = line.to_lowercase();

        let phase = detect_phase(line).unwrap_or(hint);
        let numeric = extract_numeric(line);

        let step_index = self
            .registry
            .find_in(&line_lower)
            .map(|step| step.index)
            .or_else(|| {
                numeric
                    .as_ref()
                    .and_then(|_| self.infer_step(&line_lower))
            });

        // A step reporting partial progress stays a progress line even when
        // its text mentions completed or failed items
        let in_flight = step_index.is_some()
            && numeric.as_ref().is_some_and(|n| n.percent < 100.0);

        if !in_flight && COMPLETION_KEYWORDS.iter().any(|k| line_lower.contains(k)) {
            return Some(ProgressSignal::completion(
                phase,
                self.registry.last_index(),
                "Completed",
            ));
        }

        if !in_flight && ERROR_KEYWORDS.iter().any(|k| line_lower.contains(k)) {
            return Some(ProgressSignal::error(phase, truncate(line)));
        }

        if step_index.is_none() && numeric.is_none() {
            return None;
        }

        let percent = numeric.as_ref().map(|n| n.percent).unwrap_or(0.0);
        let display = numeric.and_then(|n| n.display);
        let text = match (step_index, display) {
            (Some(index), Some(display)) => {
                format!("{} ({})", self.registry.label_for(index), display)
            }
            (Some(index), None) => self.registry.label_for(index),
            (None, _) => truncate(line),
        };

        Some(ProgressSignal::progress(phase, step_index, text, percent))
    }

    fn infer_step(&self, line_lower: &str) -> Option<usize> {
        STEP_INFERENCE
            .iter()
            .find(|(keyword, _)| line_lower.contains(keyword))
            .map(|(_, index)| *index)
            .filter(|index| *index < self.registry.len())
    }
}

/// Classifies a line against the default pipeline registry.
pub fn classify_line(line: &str, hint: Phase) -> Option<ProgressSignal> {
    LogLineClassifier::default().classify(line, hint)
}

fn detect_phase(line: &str) -> Option<Phase> {
    let caps = RE_PHASE.captures(line)?;
    match caps.get(1)?.as_str() {
        "1" => Some(Phase::Phase1),
        "2" => Some(Phase::Phase2),
        _ => None,
    }
}

fn extract_numeric(line: &str) -> Option<NumericProgress> {
    if let Some(caps) = RE_BAR.captures(line) {
        if let (Some(pct), Some(current), Some(total)) = (caps.get(1), caps.get(2), caps.get(3)) {
            if let Ok(percent) = pct.as_str().parse::<f64>() {
                return Some(NumericProgress {
                    percent: percent.clamp(0.0, 100.0),
                    display: Some(format!("{}/{}", current.as_str(), total.as_str())),
                });
            }
        }
    }

    for caps in RE_RATIO.captures_iter(line) {
        let (Some(current), Some(total)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let (Ok(current), Ok(total)) = (current.as_str().parse::<u64>(), total.as_str().parse::<u64>())
        else {
            continue;
        };
        // Dates and version strings look like ratios but overflow the total
        if total == 0 || current > total {
            continue;
        }
        let percent = (current as f64 / total as f64 * 100.0).round();
        return Some(NumericProgress {
            percent,
            display: Some(format!("{}/{}", current, total)),
        });
    }

    let caps = RE_PERCENTAGE.captures(line)?;
    let percent = caps.get(1)?.as_str().parse::<f64>().ok()?;
    Some(NumericProgress {
        percent: percent.clamp(0.0, 100.0),
        display: None,
    })
}

fn truncate(line: &str) -> String {
    if line.chars().count() > MAX_LINE_TEXT {
        let cut: String = line.chars().take(MAX_LINE_TEXT).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}
