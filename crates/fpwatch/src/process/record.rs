use serde::{Deserialize, Deserializer, Serialize};

/// Backend-reported status of a pipeline process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Cancelled,
    NotFound,
}

impl ProcessStatus {
    /// Completed, failed or cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Completed | ProcessStatus::Failed | ProcessStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Starting => write!(f, "starting"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Completed => write!(f, "completed"),
            ProcessStatus::Failed => write!(f, "failed"),
            ProcessStatus::Cancelled => write!(f, "cancelled"),
            ProcessStatus::NotFound => write!(f, "not_found"),
        }
    }
}

/// Stream a log entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    Stdout,
    Stderr,
    Status,
    ExitCode,
    Error,
    #[serde(other)]
    Other,
}

/// One entry of the cumulative process log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub log_type: LogType,
    #[serde(deserialize_with = "string_or_number")]
    pub message: String,
}

impl LogEntry {
    pub fn new(log_type: LogType, message: impl Into<String>) -> Self {
        Self {
            log_type,
            message: message.into(),
        }
    }

    pub fn stdout(message: impl Into<String>) -> Self {
        Self::new(LogType::Stdout, message)
    }

    pub fn stderr(message: impl Into<String>) -> Self {
        Self::new(LogType::Stderr, message)
    }

    /// Exit code carried by an `exit_code` entry.
    pub fn exit_code(&self) -> Option<i32> {
        if self.log_type != LogType::ExitCode {
            return None;
        }
        self.message
            .split(|c: char| !(c.is_ascii_digit() || c == '-'))
            .find_map(|token| token.parse().ok())
    }
}

/// Snapshot of a backend process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub command_id: String,
    pub status: ProcessStatus,
    pub logs: Vec<LogEntry>,
}

/// Body of `GET /process/{id}/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub status: ProcessStatus,
}

/// Body of `GET /process/{id}/logs`.
#[derive(Debug, Clone, Deserialize)]
pub struct LogsResponse {
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

// Some backends send exit codes as bare JSON numbers
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
    })
}
