//! Backend process records and the REST client that fetches them.

pub mod client;
pub mod record;

pub use client::{HttpProcessClient, ProcessBackend};
pub use record::{LogEntry, LogType, LogsResponse, ProcessRecord, ProcessStatus, StatusResponse};
