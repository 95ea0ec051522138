use serde::{Deserialize, Serialize};

/// Top-level pipeline run a log line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Phase1,
    Phase2,
    Unknown,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Phase1 => write!(f, "Phase 1"),
            Phase::Phase2 => write!(f, "Phase 2"),
            Phase::Unknown => write!(f, "Unknown phase"),
        }
    }
}

/// Which phases a monitored operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Phase1,
    Phase2,
    Both,
}

impl RunMode {
    /// Phase the operation begins in.
    pub fn initial_phase(&self) -> Phase {
        match self {
            RunMode::Phase2 => Phase::Phase2,
            RunMode::Phase1 | RunMode::Both => Phase::Phase1,
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "phase1" | "phase_1" => Ok(RunMode::Phase1),
            "phase2" | "phase_2" => Ok(RunMode::Phase2),
            "both" => Ok(RunMode::Both),
            other => Err(format!("Unknown run mode '{}'", other)),
        }
    }
}

/// Structured inference drawn from one raw log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSignal {
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    pub step_text: String,
    /// Progress within the step (0-100). Zero means "no numeric signal".
    pub step_progress_percent: f64,
    pub completed: bool,
    pub error: bool,
}

impl ProgressSignal {
    /// A step/progress signal.
    pub fn progress(
        phase: Phase,
        step_index: Option<usize>,
        step_text: impl Into<String>,
        percent: f64,
    ) -> Self {
        Self {
            phase,
            step_index,
            step_text: step_text.into(),
            step_progress_percent: percent.clamp(0.0, 100.0),
            completed: false,
            error: false,
        }
    }

    /// A completion signal for the last step of the phase.
    pub fn completion(phase: Phase, last_step: Option<usize>, text: impl Into<String>) -> Self {
        Self {
            phase,
            step_index: last_step,
            step_text: text.into(),
            step_progress_percent: 100.0,
            completed: true,
            error: false,
        }
    }

    /// An error signal. Carries no step fields.
    pub fn error(phase: Phase, text: impl Into<String>) -> Self {
        Self {
            phase,
            step_index: None,
            step_text: text.into(),
            step_progress_percent: 0.0,
            completed: false,
            error: true,
        }
    }
}
