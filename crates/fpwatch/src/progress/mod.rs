//! Progress inference from free-form pipeline logs.
//!
//! - [`classifier`] turns a single log line into a [`ProgressSignal`]
//! - [`state`] folds signals into weighted overall/step percentages

pub mod classifier;
pub mod signal;
pub mod state;

pub use classifier::{classify_line, LogLineClassifier};
pub use signal::{Phase, ProgressSignal, RunMode};
pub use state::{
    weighted_overall, LifecycleState, ProgressState, ProgressStateMachine, StepTimeEstimate,
    TerminalKind,
};
