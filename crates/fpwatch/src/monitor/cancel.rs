//! User-initiated cancellation.
//!
//! The local state flips to cancelled immediately and polling stops, then the
//! backend is asked to cancel and its status is re-read until it confirms a
//! terminal state. Whatever the backend finally reports wins: a process that
//! completed or failed before the cancel landed is shown as such. If the quick
//! confirmation window runs out, a status watch keeps going at the poll
//! cadence until the backend answers.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

use super::poller::{PollOutcome, PollerHandle, PollerSettings};
use super::reporter::{render_progress, render_terminal, ProgressReporter};
use super::{lock_machine, SharedStateMachine};
use crate::config::MonitorConfig;
use crate::error::WatchError;
use crate::process::{ProcessBackend, ProcessStatus};
use crate::progress::state::TerminalKind;

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The backend reported a terminal status. Not necessarily `Cancelled`.
    Confirmed(TerminalKind),
    /// The backend has not reported a terminal status yet; the state stays
    /// provisionally cancelled until it does.
    Unconfirmed,
    /// Nothing was running, or a cancel was already in flight.
    NotRunning,
}

#[derive(Clone)]
pub struct CancellationController {
    backend: Arc<dyn ProcessBackend>,
    machine: SharedStateMachine,
    reporter: Arc<dyn ProgressReporter>,
    confirm_attempts: u32,
    confirm_interval: Duration,
}

impl CancellationController {
    pub fn new(
        backend: Arc<dyn ProcessBackend>,
        machine: SharedStateMachine,
        reporter: Arc<dyn ProgressReporter>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            backend,
            machine,
            reporter,
            confirm_attempts: config.cancel_confirm_attempts.max(1),
            confirm_interval: config.cancel_confirm_interval(),
        }
    }

    /// Cancels the running operation.
    ///
    /// Returns an error only when the cancel request failed and the backend
    /// has not confirmed a terminal state afterwards.
    pub async fn cancel(
        &self,
        command_id: &str,
        poller: Option<&PollerHandle>,
    ) -> Result<CancelOutcome, WatchError> {
        let snapshot = {
            let mut machine = lock_machine(&self.machine);
            if !machine.cancel() {
                debug!("Cancel ignored, {} is {:?}", command_id, machine.lifecycle());
                return Ok(CancelOutcome::NotRunning);
            }
            machine.snapshot()
        };
        let session_id = snapshot.session_id.clone();

        if let Some(poller) = poller {
            poller.stop();
        }
        render_progress(self.reporter.as_ref(), &snapshot);

        info!("Requesting cancellation of {}", command_id);
        let request = self.backend.cancel(command_id).await;
        if let Err(e) = &request {
            warn!("Cancel request for {} failed: {}", command_id, e);
        }

        let outcome = self.reconcile(command_id, &session_id).await;
        match (request, outcome) {
            (Err(e), CancelOutcome::Unconfirmed) => Err(e.into()),
            (_, outcome) => Ok(outcome),
        }
    }

    /// Re-reads the backend status until it reports a terminal state.
    async fn reconcile(&self, command_id: &str, session_id: &str) -> CancelOutcome {
        for attempt in 1..=self.confirm_attempts {
            match self.backend.fetch_status(command_id).await {
                Ok(status) if status.is_terminal() || status == ProcessStatus::NotFound => {
                    return match self.confirm(status, session_id) {
                        Some(kind) => CancelOutcome::Confirmed(kind),
                        None => CancelOutcome::NotRunning,
                    };
                }
                Ok(status) => {
                    debug!(
                        "Cancel of {} not confirmed yet ({}), attempt {}/{}",
                        command_id, status, attempt, self.confirm_attempts
                    );
                }
                Err(e) => {
                    warn!(
                        "Status check for {} failed, attempt {}/{}: {}",
                        command_id, attempt, self.confirm_attempts, e
                    );
                }
            }

            if attempt < self.confirm_attempts {
                tokio::time::sleep(self.confirm_interval).await;
            }
        }

        warn!(
            "Backend has not confirmed cancellation of {} after {} checks",
            command_id, self.confirm_attempts
        );
        self.reporter
            .update_current_step("Waiting for the backend to confirm cancellation");
        CancelOutcome::Unconfirmed
    }

    /// Keeps reading the status until the backend reports a terminal state.
    ///
    /// Used once [`cancel`](Self::cancel) returned without a confirmation.
    pub fn spawn_confirmation_watch(
        &self,
        command_id: &str,
        settings: PollerSettings,
    ) -> PollerHandle {
        let token = CancellationToken::new();
        let session_id = lock_machine(&self.machine).state().session_id.clone();
        let span = info_span!("cancel_watch", command_id = %command_id);

        let controller = self.clone();
        let watch_token = token.clone();
        let command_id = command_id.to_string();
        let join = tokio::spawn(
            async move {
                controller
                    .watch(&command_id, &session_id, settings, watch_token)
                    .await
            }
            .instrument(span),
        );
        PollerHandle::new(token, join)
    }

    async fn watch(
        &self,
        command_id: &str,
        session_id: &str,
        settings: PollerSettings,
        token: CancellationToken,
    ) -> PollOutcome {
        let mut failures = 0;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return PollOutcome::Stopped,
                _ = tokio::time::sleep(settings.backoff_delay(failures)) => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = token.cancelled() => return PollOutcome::Stopped,
                status = self.backend.fetch_status(command_id) => status,
            };

            match fetched {
                Ok(status) if status.is_terminal() || status == ProcessStatus::NotFound => {
                    return match (status, self.confirm(status, session_id)) {
                        (_, None) => PollOutcome::Stopped,
                        (ProcessStatus::NotFound, Some(_)) => PollOutcome::NotFound,
                        (_, Some(kind)) => PollOutcome::Finished(kind),
                    };
                }
                Ok(status) => {
                    failures = 0;
                    debug!("Cancel of {} still pending ({})", command_id, status);
                }
                Err(e) => {
                    failures += 1;
                    warn!("Status check for {} failed ({}x): {}", command_id, failures, e);
                }
            }
        }
    }

    /// Applies the authoritative status. `None` if the session was replaced.
    fn confirm(&self, status: ProcessStatus, session_id: &str) -> Option<TerminalKind> {
        let (applied, snapshot) = {
            let mut machine = lock_machine(&self.machine);
            if machine.state().session_id != session_id {
                debug!("Session {} was replaced, ignoring {}", session_id, status);
                return None;
            }
            let applied = machine.apply_external_status(status, None);
            (applied, machine.snapshot())
        };

        match applied {
            Some(kind) => {
                info!("Backend confirmed {:?} after cancel", kind);
                render_terminal(self.reporter.as_ref(), &snapshot, kind);
                Some(kind)
            }
            // The poller confirmed first and already rendered
            None => Some(
                snapshot
                    .lifecycle
                    .terminal_kind()
                    .unwrap_or(TerminalKind::Cancelled),
            ),
        }
    }
}
