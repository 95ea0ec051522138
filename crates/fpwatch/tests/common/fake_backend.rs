//! Scripted in-memory backend.
//!
//! Each call to `fetch_record` pops the next scripted tick; once the script
//! runs out the last successful record is repeated. Logs are cumulative, like
//! the real backend.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use fpwatch::process::ProcessRecord;
use fpwatch::{BackendError, LogEntry, ProcessBackend, ProcessStatus};

enum Tick {
    Record(ProcessStatus, Vec<LogEntry>),
    Fail(u16),
}

#[derive(Default)]
struct Script {
    ticks: VecDeque<Tick>,
    /// Cumulative log used when appending lines.
    log: Vec<LogEntry>,
    last: Option<(ProcessStatus, Vec<LogEntry>)>,
    statuses: VecDeque<ProcessStatus>,
    cancel_error: Option<u16>,
    /// Per-command records served after a delay, bypassing the ticks.
    slow: HashMap<String, (Duration, ProcessStatus, Vec<LogEntry>)>,
}

#[derive(Default)]
pub struct FakeBackend {
    script: Mutex<Script>,
    fetches: Mutex<Vec<String>>,
    cancels: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends stdout lines to the log and scripts one tick with `status`.
    pub fn tick(&self, status: ProcessStatus, lines: &[&str]) -> &Self {
        let entries = lines.iter().map(|line| LogEntry::stdout(*line)).collect();
        self.tick_entries(status, entries)
    }

    /// Appends typed entries to the log and scripts one tick with `status`.
    pub fn tick_entries(&self, status: ProcessStatus, entries: Vec<LogEntry>) -> &Self {
        let mut script = self.script.lock().unwrap();
        script.log.extend(entries);
        let log = script.log.clone();
        script.ticks.push_back(Tick::Record(status, log));
        self
    }

    /// Scripts one tick that fails with an HTTP status.
    pub fn fail(&self, http_status: u16) -> &Self {
        self.script
            .lock()
            .unwrap()
            .ticks
            .push_back(Tick::Fail(http_status));
        self
    }

    /// Statuses returned by `fetch_status`, used by cancel reconciliation.
    pub fn status_sequence(&self, statuses: &[ProcessStatus]) -> &Self {
        self.script
            .lock()
            .unwrap()
            .statuses
            .extend(statuses.iter().copied());
        self
    }

    /// Makes `cancel` fail with an HTTP status.
    pub fn fail_cancel(&self, http_status: u16) -> &Self {
        self.script.lock().unwrap().cancel_error = Some(http_status);
        self
    }

    /// Every fetch for `command_id` waits `delay`, then returns this record.
    pub fn slow_record(
        &self,
        command_id: &str,
        delay: Duration,
        status: ProcessStatus,
        entries: Vec<LogEntry>,
    ) -> &Self {
        self.script
            .lock()
            .unwrap()
            .slow
            .insert(command_id.to_string(), (delay, status, entries));
        self
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn fetch_count_for(&self, command_id: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == command_id)
            .count()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }
}

fn status_error(command_id: &str, action: &str, status: u16) -> BackendError {
    BackendError::Status {
        url: format!("http://fake/process/{}/{}", command_id, action),
        status,
        body: "injected".to_string(),
    }
}

#[async_trait]
impl ProcessBackend for FakeBackend {
    async fn fetch_status(&self, _command_id: &str) -> Result<ProcessStatus, BackendError> {
        let mut script = self.script.lock().unwrap();
        if let Some(status) = script.statuses.pop_front() {
            return Ok(status);
        }
        Ok(script
            .last
            .as_ref()
            .map(|(status, _)| *status)
            .unwrap_or(ProcessStatus::Running))
    }

    async fn fetch_logs(&self, _command_id: &str) -> Result<Vec<LogEntry>, BackendError> {
        let script = self.script.lock().unwrap();
        Ok(script
            .last
            .as_ref()
            .map(|(_, logs)| logs.clone())
            .unwrap_or_default())
    }

    async fn cancel(&self, command_id: &str) -> Result<(), BackendError> {
        self.cancels.lock().unwrap().push(command_id.to_string());
        match self.script.lock().unwrap().cancel_error {
            Some(status) => Err(status_error(command_id, "cancel", status)),
            None => Ok(()),
        }
    }

    async fn fetch_record(&self, command_id: &str) -> Result<ProcessRecord, BackendError> {
        self.fetches.lock().unwrap().push(command_id.to_string());

        let slow = self.script.lock().unwrap().slow.get(command_id).cloned();
        if let Some((delay, status, logs)) = slow {
            tokio::time::sleep(delay).await;
            return Ok(ProcessRecord {
                command_id: command_id.to_string(),
                status,
                logs,
            });
        }

        let mut script = self.script.lock().unwrap();
        let (status, logs) = match script.ticks.pop_front() {
            Some(Tick::Record(status, logs)) => {
                script.last = Some((status, logs.clone()));
                (status, logs)
            }
            Some(Tick::Fail(http_status)) => {
                return Err(status_error(command_id, "status", http_status));
            }
            None => script
                .last
                .clone()
                .unwrap_or((ProcessStatus::Running, Vec::new())),
        };

        Ok(ProcessRecord {
            command_id: command_id.to_string(),
            status,
            logs,
        })
    }
}
