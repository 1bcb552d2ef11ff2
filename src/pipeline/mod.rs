//! Refresh cycle and the published snapshot.
//!
//! A refresh lists the device, downloads every candidate file, parses and
//! reshapes them, and swaps the result in as a single immutable
//! [`Snapshot`]. Readers always see a complete snapshot; a failed refresh
//! leaves the previous one in place.

mod snapshot;
mod status;

pub use snapshot::*;
pub use status::*;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::DashboardConfig;
use crate::ingest::{parse_file, reshape, DnsFailureEvent, Metric, ParsedFile};
use crate::query::{get_dns_failures, get_series, summarize, SeriesSet, Summary, TimeRange, TimeWindow};
use crate::source::{fetch_all, list_candidates, CsvSource, FetchPolicy, ListingError, RawFile};

/// A refresh that produced nothing publishable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefreshError {
    #[error(transparent)]
    Listing(#[from] ListingError),
    #[error("no CSV files found on the device")]
    NoFiles,
    #[error("no usable rows in {files} listed files")]
    NoUsableRows { files: usize },
    #[error("superseded by a newer refresh")]
    Superseded,
}

/// Inputs to every refresh.
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    pub excluded_files: BTreeSet<String>,
    pub excluded_targets: BTreeSet<String>,
    pub fetch: FetchPolicy,
}

impl From<&DashboardConfig> for PipelineSettings {
    fn from(cfg: &DashboardConfig) -> Self {
        Self {
            excluded_files: cfg.excluded_files.clone(),
            excluded_targets: cfg.excluded_targets.clone(),
            fetch: FetchPolicy {
                concurrency: cfg.concurrent_downloads,
                retry_delay: cfg.retry_delay,
            },
        }
    }
}

/// DNS failure events inside a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DnsFailures {
    pub window: TimeWindow,
    pub events: Vec<DnsFailureEvent>,
}

pub struct Pipeline {
    source: Arc<dyn CsvSource>,
    settings: PipelineSettings,
    snapshot: ArcSwap<Snapshot>,
    status: RwLock<RefreshStatus>,
    generation: AtomicU64,
}

impl Pipeline {
    pub fn new(source: Arc<dyn CsvSource>, settings: PipelineSettings) -> Self {
        Self {
            source,
            settings,
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            status: RwLock::new(RefreshStatus::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    pub async fn status(&self) -> RefreshStatus {
        self.status.read().await.clone()
    }

    /// Run one refresh cycle and publish its result.
    ///
    /// Starting a refresh supersedes any refresh still in flight: the older
    /// one finishes its I/O but its result is discarded.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>, RefreshError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!("Pipeline: Starting refresh #{}", generation);

        self.update(generation, |s| {
            s.state = RefreshState::Fetching;
            s.progress = 0;
            s.message = "Listing files".to_string();
        })
        .await;

        let names = match list_candidates(self.source.as_ref(), &self.settings.excluded_files).await {
            Ok(names) if names.is_empty() => return Err(self.fail(generation, RefreshError::NoFiles).await),
            Ok(names) => names,
            Err(e) => return Err(self.fail(generation, e.into()).await),
        };

        self.update(generation, |s| {
            s.progress = 10;
            s.message = format!("Found {} CSV files, downloading", names.len());
        })
        .await;

        let started = Instant::now();
        let raw = fetch_all(self.source.as_ref(), &names, &self.settings.fetch).await;
        let download_ms = started.elapsed().as_millis() as u64;

        if !self.is_current(generation) {
            tracing::info!("Pipeline: Discarding superseded refresh #{}", generation);
            return Err(RefreshError::Superseded);
        }

        self.update(generation, |s| {
            s.state = RefreshState::Parsing;
            s.progress = 60;
            s.message = format!("Processing {} files", raw.len());
        })
        .await;

        let (parsed, reports) = self.parse_all(&raw);
        let reshaped = reshape(&parsed);

        let stats = RefreshStats {
            files_listed: names.len(),
            files_fetched: raw.iter().filter(|f| f.result.is_ok()).count(),
            // Downloaded but unparseable files count as failed too
            files_failed: reports.iter().filter(|r| r.error.is_some()).count(),
            rows_accepted: parsed.iter().map(|p| p.rows_accepted).sum(),
            rows_rejected: parsed.iter().map(|p| p.rejections.len()).sum(),
            targets_skipped: parsed.iter().map(|p| p.skipped_targets.len()).sum(),
            duplicates_replaced: reshaped.duplicates_replaced,
            measurements: reshaped.table.len(),
            dns_failures: reshaped.dns_failures.len(),
            download_ms,
        };
        if reshaped.table.is_empty() && reshaped.dns_failures.is_empty() {
            return Err(self.fail(generation, RefreshError::NoUsableRows { files: names.len() }).await);
        }

        let snapshot = Arc::new(Snapshot::new(reshaped, stats.clone()));
        let warnings: Vec<String> = reports.iter().filter_map(warning_for).collect();
        let message = if warnings.is_empty() {
            format!("Loaded {} measurements from {} files", stats.measurements, stats.files_fetched)
        } else {
            format!(
                "Loaded {} measurements from {} files ({} warnings)",
                stats.measurements,
                stats.files_fetched,
                warnings.len()
            )
        };

        // The snapshot and last_success change together under the status lock.
        let mut status = self.status.write().await;
        if !self.is_current(generation) {
            tracing::info!("Pipeline: Discarding superseded refresh #{}", generation);
            return Err(RefreshError::Superseded);
        }
        self.snapshot.store(snapshot.clone());
        status.state = RefreshState::Ready;
        status.progress = 100;
        status.message = message.clone();
        status.last_error = None;
        status.last_success = snapshot.refreshed_at;
        status.warnings = warnings;
        status.stats = Some(stats);
        status.files = reports;
        drop(status);

        tracing::info!("Pipeline: {}", message);
        Ok(snapshot)
    }

    fn parse_all(&self, raw: &[RawFile]) -> (Vec<ParsedFile>, Vec<FileReport>) {
        let mut parsed = Vec::with_capacity(raw.len());
        let mut reports = Vec::with_capacity(raw.len());

        for file in raw {
            let mut report = FileReport {
                filename: file.filename.clone(),
                fetch: file.status(),
                rows_accepted: 0,
                rows_rejected: 0,
                targets_skipped: 0,
                error: None,
            };

            match &file.result {
                Ok(bytes) => match parse_file(&file.filename, bytes, &self.settings.excluded_targets) {
                    Ok(p) => {
                        report.rows_accepted = p.rows_accepted;
                        report.rows_rejected = p.rejections.len();
                        report.targets_skipped = p.skipped_targets.len();
                        parsed.push(p);
                    }
                    Err(e) => {
                        tracing::warn!("Pipeline: Skipping {}", e);
                        report.error = Some(e.to_string());
                    }
                },
                Err(e) => report.error = Some(e.to_string()),
            }

            reports.push(report);
        }

        (parsed, reports)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn update<F>(&self, generation: u64, f: F)
    where
        F: FnOnce(&mut RefreshStatus),
    {
        let mut status = self.status.write().await;
        if self.is_current(generation) {
            f(&mut status);
        }
    }

    async fn fail(&self, generation: u64, err: RefreshError) -> RefreshError {
        if self.is_current(generation) {
            tracing::error!("Pipeline: Refresh #{} failed: {}", generation, err);
        }
        let message = err.to_string();
        self.update(generation, |s| {
            s.state = RefreshState::Failed;
            s.progress = 100;
            s.last_success = self.snapshot.load().refreshed_at;
            s.message = if s.is_stale() {
                "Refresh failed, showing last good data".to_string()
            } else {
                "Refresh failed".to_string()
            };
            s.last_error = Some(message);
        })
        .await;
        err
    }

    /// Chart series for `metric` over `range`, downsampled to `budget`.
    pub fn series(&self, range: TimeRange, metric: Metric, budget: usize) -> SeriesSet {
        let snapshot = self.snapshot();
        let window = range.resolve(snapshot.latest());
        get_series(&snapshot.table, window, metric, budget)
    }

    /// Per-target statistics over `range`.
    pub fn summary(&self, range: TimeRange) -> Summary {
        let snapshot = self.snapshot();
        let window = range.resolve(snapshot.latest());
        summarize(&snapshot.table, &snapshot.dns_failures, window)
    }

    pub fn dns_failures(&self, range: TimeRange) -> DnsFailures {
        let snapshot = self.snapshot();
        let window = range.resolve(snapshot.latest());
        DnsFailures {
            window,
            events: get_dns_failures(&snapshot.dns_failures, window).to_vec(),
        }
    }

    pub fn targets(&self) -> Vec<Arc<str>> {
        self.snapshot().targets()
    }

    /// Refresh every `interval` in the background. The first tick fires one
    /// interval from now.
    pub fn start_auto_refresh(self: &Arc<Self>, interval: Duration) {
        let pipeline = self.clone();

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Err(e) = pipeline.refresh().await {
                    tracing::debug!("Pipeline: Scheduled refresh ended: {}", e);
                }
            }
        });

        tracing::info!("Pipeline: Refreshing every {:?}", interval);
    }
}

fn warning_for(report: &FileReport) -> Option<String> {
    match (&report.error, report.rows_rejected) {
        (Some(err), _) => Some(err.clone()),
        (None, 0) => None,
        (None, n) => Some(format!("{}: {} rows rejected", report.filename, n)),
    }
}
