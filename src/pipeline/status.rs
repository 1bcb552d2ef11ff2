//! Refresh status reported to the dashboard.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::source::FetchStatus;

/// Stage of the refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefreshState {
    Idle,
    Fetching,
    Parsing,
    Ready,
    Failed,
}

/// What happened to one listed file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileReport {
    pub filename: String,
    pub fetch: FetchStatus,
    pub rows_accepted: usize,
    pub rows_rejected: usize,
    pub targets_skipped: usize,
    /// Why the file contributed nothing, if it didn't
    pub error: Option<String>,
}

/// Totals for one completed refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshStats {
    pub files_listed: usize,
    pub files_fetched: usize,
    pub files_failed: usize,
    pub rows_accepted: usize,
    pub rows_rejected: usize,
    pub targets_skipped: usize,
    pub duplicates_replaced: usize,
    pub measurements: usize,
    pub dns_failures: usize,
    pub download_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshStatus {
    pub state: RefreshState,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
    /// 0..=100
    pub progress: u8,
    pub message: String,
    /// Per-file problems of the last completed refresh
    pub warnings: Vec<String>,
    pub stats: Option<RefreshStats>,
    pub files: Vec<FileReport>,
}

impl Default for RefreshStatus {
    fn default() -> Self {
        Self {
            state: RefreshState::Idle,
            last_error: None,
            last_success: None,
            progress: 0,
            message: "Waiting for first refresh".to_string(),
            warnings: Vec::new(),
            stats: None,
            files: Vec::new(),
        }
    }
}

impl RefreshStatus {
    /// The published data is older than the last attempt.
    pub fn is_stale(&self) -> bool {
        self.state == RefreshState::Failed && self.last_success.is_some()
    }
}
