//! REST access to the pipeline backend.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;

use super::record::{LogEntry, LogsResponse, ProcessRecord, ProcessStatus, StatusResponse};
use crate::config::MonitorConfig;
use crate::error::BackendError;

/// Maximum length kept from an error response body.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// The backend collaborator that runs pipeline processes.
#[async_trait]
pub trait ProcessBackend: Send + Sync {
    /// `GET /process/{id}/status`
    async fn fetch_status(&self, command_id: &str) -> Result<ProcessStatus, BackendError>;

    /// `GET /process/{id}/logs`, cumulative.
    async fn fetch_logs(&self, command_id: &str) -> Result<Vec<LogEntry>, BackendError>;

    /// `POST /process/{id}/cancel`
    async fn cancel(&self, command_id: &str) -> Result<(), BackendError>;

    /// Status, then logs, so the log is never older than the status.
    async fn fetch_record(&self, command_id: &str) -> Result<ProcessRecord, BackendError> {
        let status = self.fetch_status(command_id).await?;
        let logs = self.fetch_logs(command_id).await?;
        Ok(ProcessRecord {
            command_id: command_id.to_string(),
            status,
            logs,
        })
    }
}

/// [`ProcessBackend`] over HTTP.
pub struct HttpProcessClient {
    client: Client,
    base_url: Url,
}

impl HttpProcessClient {
    pub fn new(
        base_url: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BackendError::ClientBuild(format!("Invalid base URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::ClientBuild(format!(
                "Base URL '{}' cannot carry a path",
                base_url
            )));
        }

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| BackendError::ClientBuild(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &MonitorConfig) -> Result<Self, BackendError> {
        Self::new(
            &config.base_url,
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `{base}/process/{id}/{action}` with the id percent-encoded.
    pub fn endpoint(&self, command_id: &str, action: &str) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::ClientBuild(format!("Invalid base URL '{}'", self.base_url)))?
            .pop_if_empty()
            .extend(["process", command_id, action]);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, BackendError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| BackendError::Request {
                url: url.to_string(),
                source: e,
            })?;

        let response = check_status(&url, response).await?;
        response.json().await.map_err(|e| BackendError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl ProcessBackend for HttpProcessClient {
    async fn fetch_status(&self, command_id: &str) -> Result<ProcessStatus, BackendError> {
        let url = self.endpoint(command_id, "status")?;
        match self.get_json::<StatusResponse>(url).await {
            Ok(body) => Ok(body.status),
            // A 404 means the backend no longer knows the process
            Err(BackendError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(ProcessStatus::NotFound)
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_logs(&self, command_id: &str) -> Result<Vec<LogEntry>, BackendError> {
        let url = self.endpoint(command_id, "logs")?;
        match self.get_json::<LogsResponse>(url).await {
            Ok(body) => Ok(body.logs),
            Err(BackendError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn cancel(&self, command_id: &str) -> Result<(), BackendError> {
        let url = self.endpoint(command_id, "cancel")?;
        debug!("POST {}", url);
        let response = self
            .client
            .post(url.clone())
            .send()
            .await
            .map_err(|e| BackendError::Request {
                url: url.to_string(),
                source: e,
            })?;
        check_status(&url, response).await?;
        Ok(())
    }
}

async fn check_status(
    url: &Url,
    response: reqwest::Response,
) -> Result<reqwest::Response, BackendError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body: sanitize_error_body(&body),
    })
}

fn sanitize_error_body(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() > MAX_ERROR_BODY_LENGTH {
        let cut: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated)", cut)
    } else {
        body.to_string()
    }
}
