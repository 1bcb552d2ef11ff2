//! Access to the monitor-io device's CSV exports.
//!
//! Lists the device's file directory and downloads individual files over
//! HTTP, with a bounded-concurrency fetcher on top.

mod fetch;
mod http;
mod listing;
#[cfg(test)]
pub mod stub;

pub use fetch::*;
pub use http::*;
pub use listing::*;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// The directory listing could not be obtained. Fatal to a refresh.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ListingError {
    #[error("cannot reach monitor-io device at {url}: {reason}")]
    Unreachable { url: String, reason: String },
    #[error("listing {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("HTTP {status} listing {url}")]
    Http { url: String, status: u16 },
    #[error("{0} did not return a file listing")]
    NotAListing(String),
}

/// A single file could not be downloaded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("{filename}: timed out after {timeout:?}")]
    Timeout { filename: String, timeout: Duration },
    #[error("{filename}: HTTP {status}")]
    Http { filename: String, status: u16 },
    #[error("{filename}: network error: {reason}")]
    Network { filename: String, reason: String },
}

impl FetchError {
    /// Timeouts and connection-level failures are worth one more attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Timeout { .. } | FetchError::Network { .. })
    }
}

/// Outcome class of one download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchStatus {
    Ok,
    Timeout,
    HttpError,
    NetworkError,
}

/// One listed file and what downloading it produced.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub filename: String,
    pub result: Result<Vec<u8>, FetchError>,
    pub attempts: u32,
}

impl RawFile {
    pub fn status(&self) -> FetchStatus {
        match &self.result {
            Ok(_) => FetchStatus::Ok,
            Err(FetchError::Timeout { .. }) => FetchStatus::Timeout,
            Err(FetchError::Http { .. }) => FetchStatus::HttpError,
            Err(FetchError::Network { .. }) => FetchStatus::NetworkError,
        }
    }
}

/// Where CSV exports come from.
#[async_trait]
pub trait CsvSource: Send + Sync {
    /// Names of the files linked from the device's directory listing.
    async fn list(&self) -> Result<Vec<String>, ListingError>;

    /// Download one file, in a single attempt.
    async fn fetch(&self, filename: &str) -> Result<Vec<u8>, FetchError>;
}
