//! HTTP access to the monitor-io device.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Url};

use super::{extract_links, CsvSource, FetchError, ListingError};

/// Reads the device's directory listing and files over plain HTTP.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    base: Url,
    timeout: Duration,
}

impl HttpSource {
    /// Create a source rooted at `base`, which must end in `/`.
    pub fn new(base: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base,
            timeout,
        })
    }
}

#[async_trait]
impl CsvSource for HttpSource {
    async fn list(&self) -> Result<Vec<String>, ListingError> {
        let url = self.base.to_string();

        let response = self.client.get(self.base.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                ListingError::Timeout {
                    url: url.clone(),
                    timeout: self.timeout,
                }
            } else {
                ListingError::Unreachable {
                    url: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ListingError::Http {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ListingError::Timeout {
                    url: url.clone(),
                    timeout: self.timeout,
                }
            } else {
                ListingError::Unreachable {
                    url: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        extract_links(&body, &self.base).ok_or(ListingError::NotAListing(url))
    }

    async fn fetch(&self, filename: &str) -> Result<Vec<u8>, FetchError> {
        // Push as a path segment so decoded names are re-encoded exactly once
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::Network {
                filename: filename.to_string(),
                reason: format!("{} cannot hold a file path", self.base),
            })?
            .pop_if_empty()
            .push(filename);

        let transport = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout {
                    filename: filename.to_string(),
                    timeout: self.timeout,
                }
            } else {
                FetchError::Network {
                    filename: filename.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let response = self.client.get(url).send().await.map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                filename: filename.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.is_empty()
            && !content_type.contains("text/csv")
            && !content_type.contains("text/plain")
            && !content_type.contains("application/octet-stream")
        {
            tracing::debug!("Fetcher: unexpected content type for {}: {}", filename, content_type);
        }

        // Read the full body inside the same timeout budget
        let body = response.bytes().await.map_err(transport)?;
        Ok(body.to_vec())
    }
}
