use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("No monitored operation is active")]
    NoActiveOperation,

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to create HTTP client: {0}")]
    ClientBuild(String),

    #[error("Request to '{url}' failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to '{url}' returned {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("Failed to decode response from '{url}': {message}")]
    Decode { url: String, message: String },
}

impl BackendError {
    /// Network failures, timeouts, throttling and 5xx responses are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Request { .. } => true,
            BackendError::Status { status, .. } => *status >= 500 || *status == 429,
            BackendError::ClientBuild(_) | BackendError::Decode { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
