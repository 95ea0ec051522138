//! Session orchestration: one state machine, at most one live poller.

use std::sync::{Arc, Mutex};

use log::{debug, info};
use tracing::{info_span, Instrument};

use super::cancel::{CancelOutcome, CancellationController};
use super::poller::{PollOutcome, PollerHandle, PollerSettings, ProcessPoller};
use super::reporter::{render_progress, ProgressReporter};
use super::{lock_machine, SharedStateMachine};
use crate::config::MonitorConfig;
use crate::error::{Result, WatchError};
use crate::process::{HttpProcessClient, ProcessBackend};
use crate::progress::signal::RunMode;
use crate::progress::state::{ProgressState, ProgressStateMachine};
use crate::steps::StepRegistry;

/// Monitors backend operations for one presentation surface.
///
/// Starting a new operation stops the previous poller and waits for it to
/// exit, so stale output never reaches the fresh state.
pub struct ProgressSession {
    backend: Arc<dyn ProcessBackend>,
    reporter: Arc<dyn ProgressReporter>,
    machine: SharedStateMachine,
    config: MonitorConfig,
    poller: Option<PollerHandle>,
}

impl ProgressSession {
    pub fn new(
        backend: Arc<dyn ProcessBackend>,
        reporter: Arc<dyn ProgressReporter>,
        config: MonitorConfig,
    ) -> Self {
        let machine =
            ProgressStateMachine::new(StepRegistry::pipeline(), config.step_time_estimate());
        Self {
            backend,
            reporter,
            machine: Arc::new(Mutex::new(machine)),
            config,
            poller: None,
        }
    }

    /// Session talking to the HTTP backend named in `config`.
    pub fn connect(config: MonitorConfig, reporter: Arc<dyn ProgressReporter>) -> Result<Self> {
        let client = HttpProcessClient::from_config(&config)?;
        Ok(Self::new(Arc::new(client), reporter, config))
    }

    /// Begins monitoring `command_id`. Must be called inside a tokio runtime.
    pub async fn start_monitoring(&mut self, command_id: &str, mode: RunMode) {
        if let Some(previous) = self.poller.take() {
            previous.stop();
            let outcome = previous.join().await;
            debug!("Previous poller exited: {:?}", outcome);
        }

        let snapshot = {
            let mut machine = lock_machine(&self.machine);
            machine.start(mode, command_id);
            machine.snapshot()
        };
        info!(
            "Session {} monitoring {} in mode {:?}",
            snapshot.session_id, command_id, mode
        );
        render_progress(self.reporter.as_ref(), &snapshot);

        let poller = ProcessPoller::new(
            command_id,
            self.backend.clone(),
            self.machine.clone(),
            self.reporter.clone(),
            PollerSettings::from_config(&self.config),
        );
        self.poller = Some(poller.spawn());
    }

    /// Requests cancellation of the current operation.
    pub async fn cancel(&mut self) -> Result<CancelOutcome> {
        let command_id = self
            .command_id()
            .ok_or(WatchError::NoActiveOperation)?;

        let controller = CancellationController::new(
            self.backend.clone(),
            self.machine.clone(),
            self.reporter.clone(),
            &self.config,
        );
        let span = info_span!("cancel", command_id = %command_id);
        let result = controller
            .cancel(&command_id, self.poller.as_ref())
            .instrument(span)
            .await;

        // Still provisional: keep watching until the backend answers
        if matches!(result, Ok(CancelOutcome::Unconfirmed) | Err(WatchError::Backend(_))) {
            let watch = controller
                .spawn_confirmation_watch(&command_id, PollerSettings::from_config(&self.config));
            self.poller = Some(watch);
        }
        result
    }

    /// Stops the active poller, if any. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(poller) = &self.poller {
            if !poller.is_stopped() {
                debug!("Stopping poller");
            }
            poller.stop();
        }
    }

    /// Waits for the current poller, or the cancel confirmation watch, to exit.
    pub async fn wait(&mut self) -> Option<PollOutcome> {
        match self.poller.take() {
            Some(poller) => Some(poller.join().await),
            None => None,
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller
            .as_ref()
            .map(|p| !p.is_stopped() && !p.is_finished())
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> ProgressState {
        lock_machine(&self.machine).snapshot()
    }

    pub fn session_id(&self) -> String {
        lock_machine(&self.machine).state().session_id.clone()
    }

    pub fn command_id(&self) -> Option<String> {
        lock_machine(&self.machine).state().command_id.clone()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }
}

impl Drop for ProgressSession {
    fn drop(&mut self) {
        self.stop();
    }
}
