pub mod broadcast;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod process;
pub mod progress;
pub mod steps;

pub use broadcast::{MonitorEvent, MonitorEventType, ProgressBroadcaster};
pub use config::{load_config, LogFormat, MonitorConfig};
pub use error::{BackendError, ConfigError, Result, WatchError};
pub use logging::init_logging;
pub use monitor::{
    CancelOutcome, IndicatorKind, NoopReporter, PollOutcome, ProgressReporter, ProgressSession,
};
pub use process::{HttpProcessClient, LogEntry, LogType, ProcessBackend, ProcessStatus};
pub use progress::{
    classify_line, LifecycleState, LogLineClassifier, Phase, ProgressSignal, ProgressState,
    ProgressStateMachine, RunMode, TerminalKind,
};
pub use steps::{PipelineStep, StepRegistry};
