//! Bounded-concurrency download of listed files.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;

use super::{CsvSource, FetchError, RawFile};

/// How downloads are scheduled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchPolicy {
    /// Maximum downloads in flight
    pub concurrency: usize,
    /// Base pause before the single retry of a transient failure
    pub retry_delay: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            concurrency: 5,
            retry_delay: Duration::from_millis(250),
        }
    }
}

/// Download every file, at most `policy.concurrency` at a time.
///
/// Returns exactly one entry per input filename, in input order. A failure
/// is recorded on its own entry and never stops the other downloads.
pub async fn fetch_all(source: &dyn CsvSource, filenames: &[String], policy: &FetchPolicy) -> Vec<RawFile> {
    let semaphore = Arc::new(Semaphore::new(policy.concurrency.max(1)));

    let downloads = filenames.iter().map(|name| {
        let semaphore = semaphore.clone();
        async move {
            let _permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    return RawFile {
                        filename: name.clone(),
                        result: Err(FetchError::Network {
                            filename: name.clone(),
                            reason: "download pool closed".to_string(),
                        }),
                        attempts: 0,
                    }
                }
            };
            fetch_with_retry(source, name, policy).await
        }
    });

    let files = futures::future::join_all(downloads).await;

    let failed = files.iter().filter(|f| f.result.is_err()).count();
    tracing::info!("Fetcher: downloaded {}/{} files", files.len() - failed, files.len());

    files
}

async fn fetch_with_retry(source: &dyn CsvSource, filename: &str, policy: &FetchPolicy) -> RawFile {
    let mut attempts = 1;
    let mut result = source.fetch(filename).await;

    if let Err(e) = &result {
        if e.is_transient() {
            let delay = jittered(policy.retry_delay);
            tracing::warn!("Fetcher: {}, retrying in {:?}", e, delay);
            tokio::time::sleep(delay).await;
            attempts += 1;
            result = source.fetch(filename).await;
        }
    }

    if let Err(e) = &result {
        tracing::warn!("Fetcher: giving up on {}", e);
    }

    RawFile {
        filename: filename.to_string(),
        result,
        attempts,
    }
}

/// Add up to 50% random jitter so retries from one batch spread out.
fn jittered(base: Duration) -> Duration {
    let max_jitter = base.as_millis() as u64 / 2;
    if max_jitter == 0 {
        return base;
    }
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::stub::StubSource;
    use crate::source::{list_candidates, FetchStatus};
    use std::collections::BTreeSet;

    fn policy(concurrency: usize) -> FetchPolicy {
        FetchPolicy {
            concurrency,
            retry_delay: Duration::ZERO,
        }
    }

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{:02}.csv", i)).collect()
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let mut source = StubSource::new().with_delay(Duration::from_millis(20));
        for name in names(12) {
            source = source.with_file(&name, "timestamp\n");
        }

        let files = fetch_all(&source, &names(12), &policy(3)).await;
        assert_eq!(files.len(), 12);
        assert!(source.peak_in_flight() <= 3);
        assert!(source.peak_in_flight() >= 2);
    }

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let source = StubSource::new()
            .with_file("b.csv", "b")
            .with_file("a.csv", "a")
            .with_delay(Duration::from_millis(5));
        let order = vec!["b.csv".to_string(), "a.csv".to_string()];

        let files = fetch_all(&source, &order, &policy(2)).await;
        let got: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(got, vec!["b.csv", "a.csv"]);
        assert_eq!(files[0].result.as_deref(), Ok(&b"b"[..]));
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let timeout = FetchError::Timeout {
            filename: "a.csv".into(),
            timeout: Duration::from_secs(10),
        };
        let source = StubSource::new()
            .with_responses("a.csv", vec![Err(timeout.clone()), Ok(b"ok".to_vec())])
            .with_responses("b.csv", vec![Err(timeout)]);

        let files = fetch_all(&source, &["a.csv".into(), "b.csv".into()], &policy(2)).await;

        assert_eq!(files[0].status(), FetchStatus::Ok);
        assert_eq!(files[0].attempts, 2);
        assert_eq!(files[1].status(), FetchStatus::Timeout);
        assert_eq!(files[1].attempts, 2);
        assert_eq!(source.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_http_error_not_retried() {
        let source = StubSource::new().with_responses(
            "a.csv",
            vec![Err(FetchError::Http {
                filename: "a.csv".into(),
                status: 500,
            })],
        );

        let files = fetch_all(&source, &["a.csv".into()], &policy(1)).await;
        assert_eq!(files[0].status(), FetchStatus::HttpError);
        assert_eq!(files[0].attempts, 1);
        assert_eq!(source.calls(), vec!["a.csv"]);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_others() {
        let source = StubSource::new()
            .with_file("a.csv", "a")
            .with_responses(
                "b.csv",
                vec![Err(FetchError::Network {
                    filename: "b.csv".into(),
                    reason: "connection reset".into(),
                })],
            )
            .with_file("c.csv", "c");

        let files = fetch_all(&source, &["a.csv".into(), "b.csv".into(), "c.csv".into()], &policy(1)).await;
        let statuses: Vec<FetchStatus> = files.iter().map(RawFile::status).collect();
        assert_eq!(
            statuses,
            vec![FetchStatus::Ok, FetchStatus::NetworkError, FetchStatus::Ok]
        );
    }

    #[tokio::test]
    async fn test_excluded_file_never_fetched() {
        let source = StubSource::new()
            .with_file("a.csv", "a")
            .with_file("b.csv", "b")
            .with_file("excluded.csv", "x");
        let excluded: BTreeSet<String> = ["excluded.csv".to_string()].into();

        let listed = list_candidates(&source, &excluded).await.unwrap();
        let files = fetch_all(&source, &listed, &policy(5)).await;

        assert_eq!(files.len(), 2);
        let mut calls = source.calls();
        calls.sort();
        assert_eq!(calls, vec!["a.csv", "b.csv"]);
    }

    #[test]
    fn test_jitter_bounds() {
        assert_eq!(jittered(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            let d = jittered(Duration::from_millis(400));
            assert!(d >= Duration::from_millis(400));
            assert!(d <= Duration::from_millis(600));
        }
    }
}
