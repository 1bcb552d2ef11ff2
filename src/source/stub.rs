//! Scripted in-memory source for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{CsvSource, FetchError, ListingError};

type Response = Result<Vec<u8>, FetchError>;

/// Serves a fixed listing and scripted per-file responses, recording every
/// fetch and the peak number of fetches in flight.
#[derive(Default)]
pub struct StubSource {
    listing: Mutex<Option<Result<Vec<String>, ListingError>>>,
    order: Mutex<Vec<String>>,
    files: Mutex<HashMap<String, VecDeque<Response>>>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl StubSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_file(self, name: &str, body: &str) -> Self {
        self.set_file(name, body);
        self
    }

    /// Responses are served in order; the last one repeats.
    pub fn with_responses(self, name: &str, responses: Vec<Response>) -> Self {
        self.register(name);
        self.files.lock().unwrap().insert(name.to_string(), responses.into());
        self
    }

    pub fn with_listing(self, names: Vec<&str>) -> Self {
        *self.listing.lock().unwrap() = Some(Ok(names.into_iter().map(String::from).collect()));
        self
    }

    pub fn with_listing_error(self, err: ListingError) -> Self {
        self.set_listing_error(Some(err));
        self
    }

    pub fn set_file(&self, name: &str, body: &str) {
        self.register(name);
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), VecDeque::from([Ok(body.as_bytes().to_vec())]));
    }

    pub fn set_listing_error(&self, err: Option<ListingError>) {
        *self.listing.lock().unwrap() = err.map(Err);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn register(&self, name: &str) {
        let mut order = self.order.lock().unwrap();
        if !order.iter().any(|n| n == name) {
            order.push(name.to_string());
        }
    }
}

#[async_trait]
impl CsvSource for StubSource {
    async fn list(&self) -> Result<Vec<String>, ListingError> {
        match self.listing.lock().unwrap().clone() {
            Some(listing) => listing,
            None => Ok(self.order.lock().unwrap().clone()),
        }
    }

    async fn fetch(&self, filename: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(filename.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let response = {
            let mut files = self.files.lock().unwrap();
            match files.get_mut(filename) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response.unwrap_or_else(|| {
            Err(FetchError::Http {
                filename: filename.to_string(),
                status: 404,
            })
        })
    }
}
