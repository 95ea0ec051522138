//! Polling, cancellation and presentation around the progress state machine.

pub mod cancel;
pub mod poller;
pub mod reporter;
pub mod session;

use std::sync::{Arc, Mutex, MutexGuard};

use crate::progress::state::ProgressStateMachine;

pub use cancel::{CancelOutcome, CancellationController};
pub use poller::{PollOutcome, PollerHandle, PollerSettings, ProcessPoller};
pub use reporter::{
    clamp_percent, render_progress, render_terminal, IndicatorKind, NoopReporter,
    ProgressReporter,
};
pub use session::ProgressSession;

/// State machine shared between a session, its poller and cancellation.
pub type SharedStateMachine = Arc<Mutex<ProgressStateMachine>>;

/// Locks the state machine, recovering it if a holder panicked.
pub(crate) fn lock_machine(machine: &Mutex<ProgressStateMachine>) -> MutexGuard<'_, ProgressStateMachine> {
    machine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
