//! Configuration module for the monitor-io dashboard.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::collections::BTreeSet;
use std::env;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{var} is not a valid value: {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("{0} must be positive")]
    NotPositive(&'static str),
    #[error("invalid monitor-io URL {0:?}: expected http(s)://host/")]
    BadUrl(String),
}

/// Dashboard configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Base URL of the monitor-io device's file listing (always ends in `/`)
    pub monitor_io_url: Url,
    /// Per-request timeout (default: 10s)
    pub request_timeout: Duration,
    /// Maximum number of CSV downloads in flight (default: 5)
    pub concurrent_downloads: usize,
    /// Pause before the single retry of a transient fetch failure (default: 250ms)
    pub retry_delay: Duration,
    /// Listed filenames skipped before fetching
    pub excluded_files: BTreeSet<String>,
    /// Target names dropped during row validation
    pub excluded_targets: BTreeSet<String>,
    /// Bind host for the web server (default: "0.0.0.0")
    pub app_host: String,
    /// Bind port for the web server (default: 8000)
    pub app_port: u16,
    /// Default tracing level (default: "info")
    pub log_level: String,
    /// Time between automatic refreshes; `None` refreshes on start and on demand only
    pub refresh_interval: Option<Duration>,
    /// Default per-series point budget for chart queries (default: 2000)
    pub point_budget: usize,
}

const DEFAULT_URL: &str = "http://192.168.0.246/";
const DEFAULT_EXCLUDED_FILES: &str = "Latest_NetMonitor_Results.log,NetMonitor_Event_Summary.csv";

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            monitor_io_url: Url::parse(DEFAULT_URL).expect("default URL is valid"),
            request_timeout: Duration::from_secs(10),
            concurrent_downloads: 5,
            retry_delay: Duration::from_millis(250),
            excluded_files: split_list(DEFAULT_EXCLUDED_FILES),
            excluded_targets: BTreeSet::new(),
            app_host: "0.0.0.0".to_string(),
            app_port: 8000,
            log_level: "info".to_string(),
            refresh_interval: None,
            point_budget: 2000,
        }
    }
}

impl DashboardConfig {
    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `MONITOR_IO_URL`: device base URL (default: "http://192.168.0.246/")
    /// - `REQUEST_TIMEOUT`: seconds per request (default: 10)
    /// - `CONCURRENT_DOWNLOADS`: fetch concurrency (default: 5)
    /// - `RETRY_DELAY_MS`: pause before the retry (default: 250)
    /// - `EXCLUDED_FILES`: comma separated filenames
    /// - `EXCLUDED_TARGETS`: comma separated target names
    /// - `APP_HOST` / `APP_PORT`: web server bind address (default: 0.0.0.0:8000)
    /// - `LOG_LEVEL`: default log level (default: "info")
    /// - `REFRESH_INTERVAL`: seconds between refreshes, 0 disables (default: 0)
    /// - `POINT_BUDGET`: points per chart series (default: 2000)
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(url) = lookup("MONITOR_IO_URL") {
            cfg.monitor_io_url = parse_base_url(&url)?;
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "REQUEST_TIMEOUT")? {
            if secs == 0 {
                return Err(ConfigError::NotPositive("REQUEST_TIMEOUT"));
            }
            cfg.request_timeout = Duration::from_secs(secs);
        }

        if let Some(n) = parse_var::<usize>(&lookup, "CONCURRENT_DOWNLOADS")? {
            if n == 0 {
                return Err(ConfigError::NotPositive("CONCURRENT_DOWNLOADS"));
            }
            cfg.concurrent_downloads = n;
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "RETRY_DELAY_MS")? {
            cfg.retry_delay = Duration::from_millis(ms);
        }

        if let Some(files) = lookup("EXCLUDED_FILES") {
            cfg.excluded_files = split_list(&files);
        }

        if let Some(targets) = lookup("EXCLUDED_TARGETS") {
            cfg.excluded_targets = split_list(&targets);
        }

        if let Some(host) = lookup("APP_HOST") {
            cfg.app_host = host;
        }

        if let Some(port) = parse_var::<u16>(&lookup, "APP_PORT")? {
            if port == 0 {
                return Err(ConfigError::NotPositive("APP_PORT"));
            }
            cfg.app_port = port;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            cfg.log_level = level.to_lowercase();
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "REFRESH_INTERVAL")? {
            cfg.refresh_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(budget) = parse_var::<usize>(&lookup, "POINT_BUDGET")? {
            if budget == 0 {
                return Err(ConfigError::NotPositive("POINT_BUDGET"));
            }
            cfg.point_budget = budget;
        }

        Ok(cfg)
    }
}

/// Validate a device base URL and make sure it ends in a slash so that
/// filenames join underneath it.
pub fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw.trim()).map_err(|_| ConfigError::BadUrl(raw.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigError::BadUrl(raw.to_string()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(None),
    }
}

fn split_list(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
