//! Envelope-preserving downsampling.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ingest::MeasurementRow;

/// One rendered point: a single measurement, or a summary of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    /// Timestamp of the first measurement in the bucket
    pub timestamp: DateTime<Utc>,
    pub min: f64,
    pub max: f64,
    /// Mean of the bucket's measurements
    pub value: f64,
    /// Number of raw measurements summarized
    pub count: usize,
}

impl SeriesPoint {
    pub fn raw(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            timestamp,
            min: value,
            max: value,
            value,
            count: 1,
        }
    }
}

impl From<&MeasurementRow> for SeriesPoint {
    fn from(row: &MeasurementRow) -> Self {
        SeriesPoint::raw(row.timestamp, row.value)
    }
}

/// Reduce a time-ordered series to at most `budget` points.
///
/// At or below the budget the series is returned unchanged. Above it, the
/// series' time span is split into `budget` equal-width buckets; every
/// non-empty bucket becomes one point carrying the bucket's true min and max
/// and its count-weighted mean.
///
/// The bucket count is always `budget`, not `ceil(len / budget)` points per
/// bucket, so the output never exceeds `budget` and evenly spaced input
/// fills it exactly.
pub fn downsample(points: &[SeriesPoint], budget: usize) -> Vec<SeriesPoint> {
    let budget = budget.max(1);
    let (first, last) = match (points.first(), points.last()) {
        (Some(f), Some(l)) if points.len() > budget => (f.timestamp, l.timestamp),
        _ => return points.to_vec(),
    };

    let origin = first.timestamp_millis();
    // One past the span so the last point lands in the last bucket.
    let width = (last.timestamp_millis() - origin) as i128 + 1;
    let buckets = budget as i128;

    let mut out: Vec<SeriesPoint> = Vec::with_capacity(budget);
    let mut current: Option<(i128, SeriesPoint, f64)> = None;

    for p in points {
        let offset = (p.timestamp.timestamp_millis() - origin) as i128;
        let idx = offset * buckets / width;

        match current.as_mut() {
            Some((bucket, acc, sum)) if *bucket == idx => {
                acc.min = acc.min.min(p.min);
                acc.max = acc.max.max(p.max);
                acc.count += p.count;
                *sum += p.value * p.count as f64;
            }
            _ => {
                if let Some((_, acc, sum)) = current.take() {
                    out.push(finish(acc, sum));
                }
                current = Some((idx, *p, p.value * p.count as f64));
            }
        }
    }

    if let Some((_, acc, sum)) = current {
        out.push(finish(acc, sum));
    }

    out
}

fn finish(mut acc: SeriesPoint, sum: f64) -> SeriesPoint {
    if acc.count > 0 {
        acc.value = sum / acc.count as f64;
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[f64]) -> Vec<SeriesPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| SeriesPoint::raw(DateTime::from_timestamp(i as i64 * 60, 0).unwrap(), *v))
            .collect()
    }

    /// Index of the output bucket that covers `t`.
    fn covering(out: &[SeriesPoint], t: DateTime<Utc>) -> usize {
        out.partition_point(|b| b.timestamp <= t) - 1
    }

    #[test]
    fn test_below_budget_is_identity() {
        let s = series(&[1.0, 5.0, 3.0]);
        assert_eq!(downsample(&s, 3), s);
        assert_eq!(downsample(&s, 1000), s);
        assert!(downsample(&[], 10).is_empty());
    }

    #[test]
    fn test_idempotent_once_below_budget() {
        let values: Vec<f64> = (0..500).map(|i| (i % 17) as f64).collect();
        let s = series(&values);
        let once = downsample(&s, 1000);
        assert_eq!(downsample(&once, 1000), once);

        let big: Vec<f64> = (0..5000).map(|i| (i % 31) as f64).collect();
        let reduced = downsample(&series(&big), 200);
        assert!(reduced.len() <= 200);
        assert_eq!(downsample(&reduced, 200), reduced);
    }

    #[test]
    fn test_ten_thousand_points_keep_envelope() {
        let values: Vec<f64> = (0..10_000)
            .map(|i| if i % 977 == 0 { 900.0 } else { 20.0 + (i % 13) as f64 })
            .collect();
        let raw = series(&values);
        let out = downsample(&raw, 1_000);

        assert!(out.len() <= 1_000);
        assert_eq!(out.iter().map(|b| b.count).sum::<usize>(), raw.len());

        let mut true_min = vec![f64::INFINITY; out.len()];
        let mut true_max = vec![f64::NEG_INFINITY; out.len()];
        for p in &raw {
            let b = covering(&out, p.timestamp);
            assert!(out[b].max >= p.value);
            assert!(out[b].min <= p.value);
            true_min[b] = true_min[b].min(p.value);
            true_max[b] = true_max[b].max(p.value);
        }
        for (i, b) in out.iter().enumerate() {
            assert_eq!(b.min, true_min[i]);
            assert_eq!(b.max, true_max[i]);
        }
        // Spikes survive
        assert_eq!(out.iter().filter(|b| b.max == 900.0).count(), 11);
    }

    #[test]
    fn test_bucket_count_is_the_budget() {
        // Grouping by ceil(len / budget) points would yield 501 and 834 here.
        for len in [1_001, 2_500] {
            let values: Vec<f64> = (0..len).map(|i| i as f64).collect();
            let out = downsample(&series(&values), 1_000);
            assert_eq!(out.len(), 1_000);
            assert_eq!(out.iter().map(|b| b.count).sum::<usize>(), len);
        }

        // Gaps leave buckets empty, never create extra ones.
        let mut gappy = series(&[1.0; 600]);
        gappy.extend(series(&[2.0; 600]).into_iter().map(|mut p| {
            p.timestamp += chrono::Duration::days(30);
            p
        }));
        assert!(downsample(&gappy, 100).len() <= 100);
    }

    #[test]
    fn test_deterministic() {
        let values: Vec<f64> = (0..3000).map(|i| ((i * 7919) % 101) as f64).collect();
        let raw = series(&values);
        assert_eq!(downsample(&raw, 250), downsample(&raw, 250));
    }

    #[test]
    fn test_mean_is_count_weighted() {
        let s = series(&[1.0, 2.0, 3.0, 4.0]);
        let out = downsample(&s, 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, 2.5);
        assert_eq!(out[0].min, 1.0);
        assert_eq!(out[0].max, 4.0);
        assert_eq!(out[0].count, 4);
        assert_eq!(out[0].timestamp, s[0].timestamp);
    }
}
