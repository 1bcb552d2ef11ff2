//! The immutable dataset served to readers.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::RefreshStats;
use crate::ingest::{DnsFailureEvent, Reshaped, TidyTable};

/// One complete refresh result. Never mutated after publication.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub table: TidyTable,
    pub dns_failures: Vec<DnsFailureEvent>,
    pub stats: RefreshStats,
    /// `None` for the empty placeholder published before the first refresh
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn new(reshaped: Reshaped, stats: RefreshStats) -> Self {
        Self {
            table: reshaped.table,
            dns_failures: reshaped.dns_failures,
            stats,
            refreshed_at: Some(Utc::now()),
        }
    }

    /// Newest timestamp across measurements and DNS events; relative time
    /// ranges are anchored here.
    pub fn latest(&self) -> Option<DateTime<Utc>> {
        let dns = self.dns_failures.last().map(|e| e.timestamp);
        self.table.max_timestamp().max(dns)
    }

    pub fn targets(&self) -> Vec<Arc<str>> {
        let mut targets = self.table.targets();
        targets.extend(self.dns_failures.iter().map(|e| e.target.clone()));
        targets.sort();
        targets.dedup();
        targets
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty() && self.dns_failures.is_empty()
    }
}
