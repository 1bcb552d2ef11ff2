//! Read-only queries over a published table.
//!
//! Everything here is pure: identical inputs give identical outputs.

mod downsample;
mod summary;
mod window;

pub use downsample::*;
pub use summary::*;
pub use window::*;

use std::sync::Arc;

use serde::Serialize;

use crate::ingest::{DnsFailureEvent, Metric, TidyTable};

/// One target's chart series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetSeries {
    pub target: Arc<str>,
    /// Measurements inside the window before downsampling
    pub raw_count: usize,
    pub points: Vec<SeriesPoint>,
}

/// Chart data for one metric across all targets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSet {
    pub window: TimeWindow,
    pub metric: Metric,
    pub label: &'static str,
    pub unit: &'static str,
    pub series: Vec<TargetSeries>,
}

/// Filter every series of `metric` to the window and downsample each to
/// at most `budget` points.
pub fn get_series(table: &TidyTable, window: TimeWindow, metric: Metric, budget: usize) -> SeriesSet {
    let series = table
        .series_for_metric(metric)
        .filter_map(|(target, rows)| {
            let rows = window.slice(rows, |r| r.timestamp);
            if rows.is_empty() {
                return None;
            }
            let raw: Vec<SeriesPoint> = rows.iter().map(SeriesPoint::from).collect();
            Some(TargetSeries {
                target: target.clone(),
                raw_count: raw.len(),
                points: downsample(&raw, budget),
            })
        })
        .collect();

    SeriesSet {
        window,
        metric,
        label: metric.label(),
        unit: metric.unit(),
        series,
    }
}

/// DNS failure events inside the window, oldest first.
pub fn get_dns_failures(events: &[DnsFailureEvent], window: TimeWindow) -> &[DnsFailureEvent] {
    window.slice(events, |e| e.timestamp)
}
