//! Cooperative polling of one backend process.
//!
//! Each tick fetches the status and the cumulative log, classifies only the
//! entries not seen yet, and feeds the resulting signals to the shared state
//! machine. The next tick is scheduled only after the current fetch resolves,
//! so a slow backend slows polling down instead of stacking requests.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

use super::reporter::{render_progress, render_terminal, ProgressReporter};
use super::{lock_machine, SharedStateMachine};
use crate::config::MonitorConfig;
use crate::error::BackendError;
use crate::process::{LogEntry, LogType, ProcessBackend, ProcessRecord, ProcessStatus};
use crate::progress::classifier::LogLineClassifier;
use crate::progress::state::{ProgressStateMachine, TerminalKind};

/// Why a poller stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The backend reported a terminal status.
    Finished(TerminalKind),
    /// The backend no longer knows the process.
    NotFound,
    /// Stopped through its cancellation token.
    Stopped,
}

/// Timing knobs for the polling loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollerSettings {
    pub interval: Duration,
    pub max_backoff: Duration,
    /// Consecutive fetch failures tolerated before the user is told.
    pub transient_failure_threshold: u32,
}

impl PollerSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_backoff: config.max_backoff(),
            transient_failure_threshold: config.transient_failure_threshold,
        }
    }

    /// Delay before the next tick after `failures` consecutive failed fetches.
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return self.interval;
        }
        let factor = 1u32 << failures.min(16);
        self.interval.saturating_mul(factor).min(self.max_backoff)
    }
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

/// Failure details gathered from typed log entries.
#[derive(Debug, Default, Clone)]
struct FailureContext {
    error_entry: Option<String>,
    exit_code: Option<i32>,
}

impl FailureContext {
    fn observe(&mut self, entry: &LogEntry) {
        match entry.log_type {
            LogType::Error if self.error_entry.is_none() => {
                let message = entry.message.trim();
                if !message.is_empty() {
                    self.error_entry = Some(message.to_string());
                }
            }
            LogType::ExitCode => {
                if let Some(code) = entry.exit_code() {
                    self.exit_code = Some(code);
                }
            }
            _ => {}
        }
    }

    fn message(&self) -> Option<String> {
        self.error_entry
            .clone()
            .or_else(|| self.exit_code.map(|code| format!("Process exited with code {}", code)))
    }
}

/// Handle to a spawned poller.
pub struct PollerHandle {
    token: CancellationToken,
    join: JoinHandle<PollOutcome>,
}

impl PollerHandle {
    pub(crate) fn new(token: CancellationToken, join: JoinHandle<PollOutcome>) -> Self {
        Self { token, join }
    }

    /// Signals the poller to stop. Safe to call repeatedly.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Waits for the poller to exit.
    pub async fn join(self) -> PollOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Poller task ended abnormally: {}", e);
                PollOutcome::Stopped
            }
        }
    }
}

/// Polls one backend process and drives the shared state machine.
///
/// The poller only touches the machine while it still holds the session it
/// was created for; once the session is restarted it exits without applying
/// anything.
pub struct ProcessPoller {
    command_id: String,
    session_id: String,
    backend: Arc<dyn ProcessBackend>,
    machine: SharedStateMachine,
    reporter: Arc<dyn ProgressReporter>,
    classifier: LogLineClassifier,
    settings: PollerSettings,
    token: CancellationToken,
    seen: usize,
    consecutive_failures: u32,
    failure: FailureContext,
}

impl ProcessPoller {
    pub fn new(
        command_id: &str,
        backend: Arc<dyn ProcessBackend>,
        machine: SharedStateMachine,
        reporter: Arc<dyn ProgressReporter>,
        settings: PollerSettings,
    ) -> Self {
        let (registry, session_id) = {
            let machine = lock_machine(&machine);
            (*machine.registry(), machine.state().session_id.clone())
        };
        Self {
            command_id: command_id.to_string(),
            session_id,
            backend,
            machine,
            reporter,
            classifier: LogLineClassifier::new(registry),
            settings,
            token: CancellationToken::new(),
            seen: 0,
            consecutive_failures: 0,
            failure: FailureContext::default(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Number of log entries consumed so far.
    pub fn seen(&self) -> usize {
        self.seen
    }

    /// Runs the loop on the tokio runtime.
    pub fn spawn(self) -> PollerHandle {
        let token = self.token.clone();
        let span = info_span!("poller", command_id = %self.command_id);
        let join = tokio::spawn(self.run().instrument(span));
        PollerHandle::new(token, join)
    }

    pub async fn run(mut self) -> PollOutcome {
        info!("Monitoring process {}", self.command_id);

        loop {
            let fetched = tokio::select! {
                biased;
                _ = self.token.cancelled() => return self.stopped(),
                record = self.backend.fetch_record(&self.command_id) => record,
            };

            let delay = match fetched {
                Ok(record) => {
                    self.consecutive_failures = 0;
                    if let Some(outcome) = self.handle_record(&record) {
                        info!("Stopped monitoring {}: {:?}", self.command_id, outcome);
                        return outcome;
                    }
                    self.settings.interval
                }
                Err(e) => self.handle_fetch_error(&e),
            };

            tokio::select! {
                biased;
                _ = self.token.cancelled() => return self.stopped(),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Processes one fetched record. Returns the outcome when polling must stop.
    pub fn handle_record(&mut self, record: &ProcessRecord) -> Option<PollOutcome> {
        if record.logs.len() < self.seen {
            warn!(
                "Log for {} shrank from {} to {} entries, re-reading",
                self.command_id,
                self.seen,
                record.logs.len()
            );
            self.seen = 0;
        }

        let Some(consumed) = self.process_logs(&record.logs[self.seen..]) else {
            return Some(self.superseded());
        };
        self.seen = record.logs.len();

        if consumed > 0 {
            let snapshot = {
                let mut machine = lock_machine(&self.machine);
                if !self.owns(&machine) {
                    return Some(self.superseded());
                }
                machine.recompute_overall();
                machine.snapshot()
            };
            render_progress(self.reporter.as_ref(), &snapshot);
        }

        match record.status {
            ProcessStatus::Completed | ProcessStatus::Failed | ProcessStatus::Cancelled => {
                match self.apply_terminal(record.status) {
                    Some(kind) => Some(PollOutcome::Finished(kind)),
                    None => Some(self.superseded()),
                }
            }
            ProcessStatus::NotFound => {
                debug!("Process {} not found, treating as finished", self.command_id);
                match self.apply_terminal(ProcessStatus::NotFound) {
                    Some(_) => Some(PollOutcome::NotFound),
                    None => Some(self.superseded()),
                }
            }
            ProcessStatus::Starting | ProcessStatus::Running => None,
        }
    }

    /// True while the machine still runs the session this poller was made for.
    fn owns(&self, machine: &ProgressStateMachine) -> bool {
        machine.state().session_id == self.session_id
    }

    /// Consumes new entries. `None` if the session was replaced meanwhile.
    fn process_logs(&mut self, entries: &[LogEntry]) -> Option<usize> {
        let mut consumed = 0;
        let mut machine = lock_machine(&self.machine);
        if !self.owns(&machine) {
            return None;
        }

        for entry in entries {
            self.failure.observe(entry);
            if entry.log_type == LogType::ExitCode {
                continue;
            }
            let Some(signal) = self.classifier.classify(&entry.message, machine.active_phase())
            else {
                continue;
            };
            debug!("Signal from {:?}: {:?}", entry.log_type, signal);
            if machine.consume(&signal) {
                consumed += 1;
            }
        }

        Some(consumed)
    }

    /// Applies a terminal status. `None` if the session was replaced meanwhile.
    fn apply_terminal(&mut self, status: ProcessStatus) -> Option<TerminalKind> {
        let message = match status {
            ProcessStatus::Failed => self.failure.message(),
            _ => None,
        };

        let (applied, snapshot) = {
            let mut machine = lock_machine(&self.machine);
            if !self.owns(&machine) {
                return None;
            }
            let applied = machine.apply_external_status(status, message);
            (applied, machine.snapshot())
        };

        match applied {
            Some(kind) => {
                render_terminal(self.reporter.as_ref(), &snapshot, kind);
                Some(kind)
            }
            // Already confirmed elsewhere, e.g. by the cancellation controller
            None => Some(
                snapshot
                    .lifecycle
                    .terminal_kind()
                    .unwrap_or(TerminalKind::Completed),
            ),
        }
    }

    fn handle_fetch_error(&mut self, error: &BackendError) -> Duration {
        self.consecutive_failures += 1;
        let delay = self.settings.backoff_delay(self.consecutive_failures);

        if error.is_transient() {
            debug!(
                "Fetch for {} failed ({}x), retrying in {:?}: {}",
                self.command_id, self.consecutive_failures, delay, error
            );
        } else {
            warn!(
                "Fetch for {} failed ({}x), retrying in {:?}: {}",
                self.command_id, self.consecutive_failures, delay, error
            );
        }

        if self.consecutive_failures >= self.settings.transient_failure_threshold {
            warn!(
                "Lost contact with backend for {} after {} attempts",
                self.command_id, self.consecutive_failures
            );
            let overall = {
                let machine = lock_machine(&self.machine);
                self.owns(&machine).then(|| machine.state().overall_progress)
            };
            if let Some(overall) = overall {
                self.reporter.update_progress_indicator(
                    super::reporter::IndicatorKind::Overall,
                    super::reporter::clamp_percent(overall),
                    "Connection problems, retrying...",
                );
            }
        }

        delay
    }

    fn superseded(&self) -> PollOutcome {
        debug!(
            "Session {} was replaced, dropping output of {}",
            self.session_id, self.command_id
        );
        PollOutcome::Stopped
    }

    fn stopped(&self) -> PollOutcome {
        debug!("Poller for {} stopped", self.command_id);
        PollOutcome::Stopped
    }
}
