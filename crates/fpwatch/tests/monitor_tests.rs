//! End-to-end monitoring tests against a scripted backend.
//!
//! All async tests run on a paused clock, so poll intervals and backoff
//! delays elapse instantly once the runtime is idle.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{fast_config, FakeBackend, RecordingReporter, ReporterCall};
use fpwatch::monitor::{PollerSettings, ProcessPoller, SharedStateMachine};
use fpwatch::process::ProcessRecord;
use fpwatch::{
    CancelOutcome, IndicatorKind, LifecycleState, LogEntry, LogType, MonitorConfig, Phase,
    PollOutcome, ProcessStatus, ProgressSession, ProgressStateMachine, RunMode, StepRegistry,
    TerminalKind, WatchError,
};

const FAISS_LINE: &str = "Step 3: Building FAISS index: 45%|████▌ | 23/50";

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 0.01,
        "expected {:.2}, got {:.2}",
        expected,
        actual
    );
}

fn session(backend: &Arc<FakeBackend>, reporter: &Arc<RecordingReporter>) -> ProgressSession {
    ProgressSession::new(backend.clone(), reporter.clone(), fast_config())
}

#[tokio::test(start_paused = true)]
async fn test_bar_progress_then_traceback_failure() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .tick(
            ProcessStatus::Running,
            &[FAISS_LINE, "Traceback (most recent call last)"],
        )
        .tick(ProcessStatus::Failed, &[]);
    let reporter = Arc::new(RecordingReporter::new());

    let mut session = session(&backend, &reporter);
    session.start_monitoring("run-1", RunMode::Both).await;
    let outcome = session.wait().await;

    assert_eq!(outcome, Some(PollOutcome::Finished(TerminalKind::Failed)));

    let state = session.snapshot();
    assert_eq!(state.lifecycle, LifecycleState::Failed);
    assert!(state.terminal_confirmed);
    assert_eq!(state.current_step_index, 2);
    assert_close(state.current_step_progress, 45.0);
    // Frozen at the last running value
    assert_close(state.overall_progress, 17.5);

    let overall = reporter.overall_values();
    assert_eq!(overall.len(), 3);
    assert_close(overall[0], 0.0);
    assert_close(overall[1], 17.5);
    assert_close(overall[2], 17.5);

    assert_eq!(
        reporter.terminals(),
        vec![(
            TerminalKind::Failed,
            "Traceback (most recent call last)".to_string()
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn test_phase_transition_in_both_mode() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .tick(ProcessStatus::Running, &["Phase 1 completed"])
        .tick(ProcessStatus::Running, &["phase2 Step 1: Ingesting 3 of 10"])
        .tick(ProcessStatus::Completed, &[]);
    let reporter = Arc::new(RecordingReporter::new());

    let mut session = session(&backend, &reporter);
    session.start_monitoring("run-both", RunMode::Both).await;
    let outcome = session.wait().await;

    assert_eq!(outcome, Some(PollOutcome::Finished(TerminalKind::Completed)));

    let overall = reporter.overall_values();
    assert_eq!(overall.len(), 4);
    assert_close(overall[0], 0.0);
    assert_close(overall[1], 50.0);
    assert_close(overall[2], 52.14);
    assert_close(overall[3], 100.0);

    assert!(reporter
        .status_texts()
        .iter()
        .any(|text| text.starts_with("Phase 2")));
    assert_eq!(
        reporter.terminals(),
        vec![(
            TerminalKind::Completed,
            "Process completed successfully".to_string()
        )]
    );

    let state = session.snapshot();
    assert_eq!(state.active_phase, Phase::Phase2);
    assert_close(state.overall_progress, 100.0);
}

#[tokio::test(start_paused = true)]
async fn test_single_phase_uses_full_range() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .tick(ProcessStatus::Running, &[FAISS_LINE])
        .tick(ProcessStatus::Completed, &["Report generated"]);
    let reporter = Arc::new(RecordingReporter::new());

    let mut session = session(&backend, &reporter);
    session.start_monitoring("run-p1", RunMode::Phase1).await;
    session.wait().await;

    let overall = reporter.overall_values();
    assert_close(overall[1], 35.0);
    assert_close(*overall.last().unwrap(), 100.0);
    assert_eq!(reporter.terminals().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unrecognized_lines_leave_state_untouched() {
    let backend = Arc::new(FakeBackend::new());
    backend.tick(
        ProcessStatus::Running,
        &[
            "Initializing environment",
            "Using device: cpu",
            "Seed set",
            "Warming up workers",
            "Config resolved",
        ],
    );
    let reporter = Arc::new(RecordingReporter::new());

    let mut session = session(&backend, &reporter);
    session.start_monitoring("run-quiet", RunMode::Both).await;
    let before = session.snapshot();
    tokio::time::sleep(Duration::from_millis(350)).await;

    assert!(backend.fetch_count_for("run-quiet") >= 3);
    // Only the initial render from start_monitoring
    assert_eq!(reporter.call_count(), 3);

    let after = session.snapshot();
    assert_eq!(after.lifecycle, LifecycleState::Running);
    assert_eq!(after.current_step_index, before.current_step_index);
    assert_eq!(after.overall_progress, before.overall_progress);
    assert_eq!(after.status_text, before.status_text);

    session.stop();
    assert_eq!(session.wait().await, Some(PollOutcome::Stopped));
}

#[tokio::test(start_paused = true)]
async fn test_failure_message_prefers_error_entries() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .tick_entries(
            ProcessStatus::Running,
            vec![
                LogEntry::stdout(FAISS_LINE),
                LogEntry::stderr("RuntimeError: shape mismatch"),
                LogEntry::new(LogType::Error, "CUDA out of memory"),
            ],
        )
        .tick_entries(
            ProcessStatus::Failed,
            vec![LogEntry::new(LogType::ExitCode, "1")],
        );
    let reporter = Arc::new(RecordingReporter::new());

    let mut session = session(&backend, &reporter);
    session.start_monitoring("run-oom", RunMode::Both).await;
    session.wait().await;

    assert_eq!(
        reporter.terminals(),
        vec![(TerminalKind::Failed, "CUDA out of memory".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failure_message_from_exit_code() {
    let backend = Arc::new(FakeBackend::new());
    backend.tick_entries(
        ProcessStatus::Failed,
        vec![LogEntry::new(LogType::ExitCode, "137")],
    );
    let reporter = Arc::new(RecordingReporter::new());

    let mut session = session(&backend, &reporter);
    session.start_monitoring("run-killed", RunMode::Phase2).await;
    session.wait().await;

    assert_eq!(
        reporter.terminals(),
        vec![(
            TerminalKind::Failed,
            "Process exited with code 137".to_string()
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn test_not_found_treated_as_finished() {
    let backend = Arc::new(FakeBackend::new());
    backend.tick(ProcessStatus::NotFound, &[]);
    let reporter = Arc::new(RecordingReporter::new());

    let mut session = session(&backend, &reporter);
    session.start_monitoring("run-gone", RunMode::Both).await;
    let outcome = session.wait().await;

    assert_eq!(outcome, Some(PollOutcome::NotFound));
    let state = session.snapshot();
    assert_eq!(state.lifecycle, LifecycleState::Completed);
    assert_close(state.overall_progress, 100.0);
    assert_eq!(
        reporter.terminals(),
        vec![(
            TerminalKind::Completed,
            "Process already finished".to_string()
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_back_off_and_recover() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .fail(503)
        .fail(503)
        .fail(502)
        .tick(ProcessStatus::Completed, &["Report generated"]);
    let reporter = Arc::new(RecordingReporter::new());

    let mut session = session(&backend, &reporter);
    session.start_monitoring("run-flaky", RunMode::Phase1).await;
    let outcome = session.wait().await;

    assert_eq!(outcome, Some(PollOutcome::Finished(TerminalKind::Completed)));
    assert_eq!(backend.fetch_count_for("run-flaky"), 4);

    // Threshold is 2: the second and third failures are surfaced
    let warnings = reporter
        .status_texts()
        .into_iter()
        .filter(|text| text == "Connection problems, retrying...")
        .count();
    assert_eq!(warnings, 2);
    assert_eq!(reporter.terminals().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_are_capped() {
    let backend = Arc::new(FakeBackend::new());
    for _ in 0..6 {
        backend.fail(500);
    }
    let reporter = Arc::new(RecordingReporter::new());

    let mut session = session(&backend, &reporter);
    let started = tokio::time::Instant::now();
    session.start_monitoring("run-down", RunMode::Both).await;

    // 200 + 400 + 400 + 400 + 400 ms after five failures
    tokio::time::sleep(Duration::from_millis(1750)).await;
    assert_eq!(backend.fetch_count_for("run-down"), 5);
    assert!(started.elapsed() >= Duration::from_millis(1750));

    session.stop();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_confirmed_by_backend() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .tick(ProcessStatus::Running, &[FAISS_LINE])
        .status_sequence(&[ProcessStatus::Running, ProcessStatus::Cancelled]);
    let reporter = Arc::new(RecordingReporter::new());

    let mut session = session(&backend, &reporter);
    session.start_monitoring("run-cancel", RunMode::Both).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    let outcome = session.cancel().await.unwrap();
    assert_eq!(outcome, CancelOutcome::Confirmed(TerminalKind::Cancelled));
    assert_eq!(backend.cancels(), vec!["run-cancel".to_string()]);

    let state = session.snapshot();
    assert_eq!(state.lifecycle, LifecycleState::Cancelled);
    assert!(state.is_cancelled);
    assert!(state.terminal_confirmed);
    assert_close(state.overall_progress, 17.5);

    // Stopping again is harmless
    session.stop();
    session.stop();
    assert!(!session.is_polling());
    assert_eq!(session.wait().await, Some(PollOutcome::Stopped));

    let fetches = backend.fetch_count_for("run-cancel");
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(backend.fetch_count_for("run-cancel"), fetches);

    assert_eq!(
        reporter.terminals(),
        vec![(TerminalKind::Cancelled, "Process cancelled".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_loses_race_to_completion() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .tick(ProcessStatus::Running, &[FAISS_LINE])
        .status_sequence(&[ProcessStatus::Completed]);
    let reporter = Arc::new(RecordingReporter::new());

    let mut session = session(&backend, &reporter);
    session.start_monitoring("run-race", RunMode::Both).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let outcome = session.cancel().await.unwrap();
    assert_eq!(outcome, CancelOutcome::Confirmed(TerminalKind::Completed));

    let state = session.snapshot();
    assert_eq!(state.lifecycle, LifecycleState::Completed);
    assert_close(state.overall_progress, 100.0);
    assert_eq!(reporter.terminals().len(), 1);
    assert_eq!(reporter.terminals()[0].0, TerminalKind::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_unconfirmed_when_request_fails() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .tick(ProcessStatus::Running, &[])
        .fail_cancel(500);
    let reporter = Arc::new(RecordingReporter::new());

    let mut session = session(&backend, &reporter);
    session.start_monitoring("run-stuck", RunMode::Both).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = session.cancel().await;
    assert!(matches!(result, Err(WatchError::Backend(_))));

    // Provisional: no terminal callback, keep watching the status
    let state = session.snapshot();
    assert!(state.is_cancelling());
    assert!(!state.terminal_confirmed);
    assert!(reporter.terminals().is_empty());
    assert!(session.is_polling());

    session.stop();
    assert_eq!(session.wait().await, Some(PollOutcome::Stopped));
    assert!(reporter.terminals().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_confirmed_after_confirmation_window() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .tick(ProcessStatus::Running, &[FAISS_LINE])
        .status_sequence(&[
            ProcessStatus::Running,
            ProcessStatus::Running,
            ProcessStatus::Running,
            ProcessStatus::Failed,
        ]);
    let reporter = Arc::new(RecordingReporter::new());

    let mut session = session(&backend, &reporter);
    session.start_monitoring("run-slow-cancel", RunMode::Both).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(session.cancel().await.unwrap(), CancelOutcome::Unconfirmed);
    assert!(session.snapshot().is_cancelling());
    assert!(reporter.terminals().is_empty());
    assert!(reporter.calls().iter().any(|call| matches!(
        call,
        ReporterCall::Step(text) if text == "Waiting for the backend to confirm cancellation"
    )));

    assert_eq!(
        session.wait().await,
        Some(PollOutcome::Finished(TerminalKind::Failed))
    );

    let state = session.snapshot();
    assert_eq!(state.lifecycle, LifecycleState::Failed);
    assert!(state.terminal_confirmed);
    assert_eq!(
        reporter.terminals(),
        vec![(TerminalKind::Failed, "Process failed".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_second_cancel_is_noop() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .tick(ProcessStatus::Running, &[])
        .status_sequence(&[ProcessStatus::Cancelled]);
    let reporter = Arc::new(RecordingReporter::new());

    let mut session = session(&backend, &reporter);
    session.start_monitoring("run-twice", RunMode::Both).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        session.cancel().await.unwrap(),
        CancelOutcome::Confirmed(TerminalKind::Cancelled)
    );
    assert_eq!(session.cancel().await.unwrap(), CancelOutcome::NotRunning);
    assert_eq!(backend.cancels().len(), 1);
    assert_eq!(reporter.terminals().len(), 1);
}

#[tokio::test]
async fn test_cancel_without_operation() {
    let backend = Arc::new(FakeBackend::new());
    let reporter = Arc::new(RecordingReporter::new());
    let mut session = session(&backend, &reporter);

    assert!(matches!(
        session.cancel().await,
        Err(WatchError::NoActiveOperation)
    ));
    assert!(backend.cancels().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_restart_stops_previous_poller() {
    let backend = Arc::new(FakeBackend::new());
    backend.tick(ProcessStatus::Running, &[]);
    let reporter = Arc::new(RecordingReporter::new());

    let mut session = session(&backend, &reporter);
    session.start_monitoring("run-old", RunMode::Both).await;
    tokio::time::sleep(Duration::from_millis(250)).await;
    let old_session_id = session.session_id();

    session.start_monitoring("run-new", RunMode::Phase2).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let old_fetches = backend.fetch_count_for("run-old");
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(backend.fetch_count_for("run-old"), old_fetches);
    assert!(backend.fetch_count_for("run-new") >= 5);
    assert_ne!(session.session_id(), old_session_id);
    assert_eq!(session.command_id().as_deref(), Some("run-new"));
    assert_eq!(session.snapshot().active_phase, Phase::Phase2);

    session.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_ignores_slow_fetch_of_previous_run() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .slow_record(
            "run-old",
            Duration::from_millis(300),
            ProcessStatus::Failed,
            vec![LogEntry::new(LogType::Error, "old run blew up")],
        )
        .tick(ProcessStatus::Running, &[]);
    let reporter = Arc::new(RecordingReporter::new());

    let mut session = session(&backend, &reporter);
    session.start_monitoring("run-old", RunMode::Both).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.fetch_count_for("run-old"), 1);

    session.start_monitoring("run-new", RunMode::Both).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let state = session.snapshot();
    assert_eq!(state.command_id.as_deref(), Some("run-new"));
    assert_eq!(state.lifecycle, LifecycleState::Running);
    assert!(!state.terminal_confirmed);
    assert!(reporter.terminals().is_empty());
    assert!(session.is_polling());

    session.stop();
    assert_eq!(session.wait().await, Some(PollOutcome::Stopped));
}

#[test]
fn test_shrinking_log_is_reread() {
    let config = MonitorConfig::default();
    let machine: SharedStateMachine = Arc::new(Mutex::new(ProgressStateMachine::new(
        StepRegistry::pipeline(),
        config.step_time_estimate(),
    )));
    machine.lock().unwrap().start(RunMode::Phase1, "run-log");

    let reporter = Arc::new(RecordingReporter::new());
    let mut poller = ProcessPoller::new(
        "run-log",
        Arc::new(FakeBackend::new()),
        machine.clone(),
        reporter.clone(),
        PollerSettings::from_config(&config),
    );

    let record = |logs: Vec<LogEntry>| ProcessRecord {
        command_id: "run-log".to_string(),
        status: ProcessStatus::Running,
        logs,
    };

    let first = record(vec![
        LogEntry::stdout("Step 1: Ingesting 3 of 10"),
        LogEntry::stdout("Step 1: Ingesting 5 of 10"),
    ]);
    assert_eq!(poller.handle_record(&first), None);
    assert_eq!(poller.seen(), 2);
    assert_close(machine.lock().unwrap().state().current_step_progress, 50.0);

    // Same log again: nothing new, no render
    let renders = reporter.call_count();
    assert_eq!(poller.handle_record(&first), None);
    assert_eq!(reporter.call_count(), renders);

    let restarted = record(vec![LogEntry::stdout("Step 2: Generating transforms 1/4")]);
    assert_eq!(poller.handle_record(&restarted), None);
    assert_eq!(poller.seen(), 1);
    assert_eq!(machine.lock().unwrap().state().current_step_index, 1);
    assert!(reporter
        .indicator_values(IndicatorKind::Step)
        .iter()
        .any(|percent| (*percent - 25.0).abs() < 0.01));
}

#[test]
fn test_poller_leaves_restarted_session_alone() {
    let config = MonitorConfig::default();
    let machine: SharedStateMachine = Arc::new(Mutex::new(ProgressStateMachine::new(
        StepRegistry::pipeline(),
        config.step_time_estimate(),
    )));
    machine.lock().unwrap().start(RunMode::Both, "run-old");

    let reporter = Arc::new(RecordingReporter::new());
    let mut poller = ProcessPoller::new(
        "run-old",
        Arc::new(FakeBackend::new()),
        machine.clone(),
        reporter.clone(),
        PollerSettings::from_config(&config),
    );

    machine.lock().unwrap().start(RunMode::Both, "run-new");

    let late = ProcessRecord {
        command_id: "run-old".to_string(),
        status: ProcessStatus::Failed,
        logs: vec![
            LogEntry::stdout(FAISS_LINE),
            LogEntry::new(LogType::Error, "old run failed"),
        ],
    };
    assert_eq!(poller.handle_record(&late), Some(PollOutcome::Stopped));

    let guard = machine.lock().unwrap();
    let state = guard.state();
    assert_eq!(state.command_id.as_deref(), Some("run-new"));
    assert_eq!(state.lifecycle, LifecycleState::Running);
    assert_eq!(state.current_step_index, 0);
    assert!(!state.terminal_confirmed);
    assert_eq!(reporter.call_count(), 0);
}
