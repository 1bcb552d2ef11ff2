//! Per-target summary statistics.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::TimeWindow;
use crate::ingest::{DnsFailureEvent, MeasurementRow, Metric, TidyTable};

/// Mean packet loss above which a target is flagged.
pub const PACKET_LOSS_THRESHOLD: f64 = 0.01;

/// Statistics of one filtered series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricStats {
    pub latest: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

impl MetricStats {
    /// Summarize time-ordered rows; `None` when empty.
    pub fn from_rows(rows: &[MeasurementRow]) -> Option<Self> {
        let last = rows.last()?;
        let (min, max, sum) = rows.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, 0.0),
            |(min, max, sum), r| (min.min(r.value), max.max(r.value), sum + r.value),
        );
        Some(Self {
            latest: last.value,
            min,
            max,
            mean: sum / rows.len() as f64,
            count: rows.len(),
        })
    }
}

/// Read-only summary of one target within a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetSummary {
    pub target: Arc<str>,
    /// Newest measurement inside the window
    pub last_seen: Option<DateTime<Utc>>,
    pub dns_failures: usize,
    pub metrics: BTreeMap<Metric, MetricStats>,
    pub has_packet_loss: bool,
}

/// Summaries for every target known to the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub window: TimeWindow,
    pub targets: Vec<TargetSummary>,
}

/// Build per-target summaries for the window.
pub fn summarize(table: &TidyTable, dns_failures: &[DnsFailureEvent], window: TimeWindow) -> Summary {
    let mut by_target: BTreeMap<Arc<str>, TargetSummary> = BTreeMap::new();

    for target in table.targets() {
        by_target.insert(
            target.clone(),
            TargetSummary {
                target,
                last_seen: None,
                dns_failures: 0,
                metrics: BTreeMap::new(),
                has_packet_loss: false,
            },
        );
    }

    for event in window.slice(dns_failures, |e| e.timestamp) {
        by_target
            .entry(event.target.clone())
            .or_insert_with(|| TargetSummary {
                target: event.target.clone(),
                last_seen: None,
                dns_failures: 0,
                metrics: BTreeMap::new(),
                has_packet_loss: false,
            })
            .dns_failures += 1;
    }

    for summary in by_target.values_mut() {
        for metric in Metric::ALL {
            let rows = window.slice(table.series(&summary.target, metric), |r| r.timestamp);
            if let Some(stats) = MetricStats::from_rows(rows) {
                let newest = rows.last().map(|r| r.timestamp);
                summary.last_seen = summary.last_seen.max(newest);
                summary.metrics.insert(metric, stats);
            }
        }
        summary.has_packet_loss = summary
            .metrics
            .get(&Metric::PacketLoss)
            .is_some_and(|s| s.mean > PACKET_LOSS_THRESHOLD);
    }

    Summary {
        window,
        targets: by_target.into_values().collect(),
    }
}
