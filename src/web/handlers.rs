//! HTTP request handlers.

use super::AppState;
use crate::ingest::Metric;
use crate::query::TimeRange;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json},
};
use rust_embed::RustEmbed;
use serde::Deserialize;

/// Upper bound on a client-requested point budget.
pub const MAX_POINT_BUDGET: usize = 20_000;

// ============================================================================
// Templates (simple string replacement)
// ============================================================================

const DASHBOARD_TEMPLATE: &str = include_str!("templates/dashboard.html");
const LAYOUT_TEMPLATE: &str = include_str!("templates/layout.html");

const RANGE_CHOICES: [(TimeRange, &str); 4] = [
    (TimeRange::LAST_24H, "Last 24 hours"),
    (TimeRange::LAST_48H, "Last 48 hours"),
    (TimeRange::LAST_7D, "Last 7 days"),
    (TimeRange::All, "All data"),
];

#[derive(RustEmbed)]
#[folder = "static/"]
struct Assets;

// ============================================================================
// Dashboard
// ============================================================================

pub async fn handle_dashboard(State(state): State<AppState>) -> impl IntoResponse {
    let metric_options: String = Metric::ALL
        .iter()
        .map(|m| {
            let selected = if *m == Metric::AvgPing { " selected" } else { "" };
            format!("<option value=\"{}\"{}>{}</option>", m.as_str(), selected, m.label())
        })
        .collect::<Vec<_>>()
        .join("\n");

    let range_options: String = RANGE_CHOICES
        .iter()
        .map(|(range, label)| {
            let selected = if *range == TimeRange::default() { " selected" } else { "" };
            format!("<option value=\"{}\"{}>{}</option>", range, selected, label)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let content = DASHBOARD_TEMPLATE
        .replace("{{metric_options}}", &metric_options)
        .replace("{{range_options}}", &range_options)
        .replace("{{point_budget}}", &state.config.point_budget.to_string())
        .replace("{{device_url}}", state.config.monitor_io_url.as_str());

    let page = LAYOUT_TEMPLATE
        .replace("{{title}}", "Network Performance Dashboard")
        .replace("{{content}}", &content);

    Html(page)
}

// ============================================================================
// API: Queries
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SeriesQuery {
    #[serde(default)]
    pub range: Option<TimeRange>,
    #[serde(default)]
    pub metric: Option<Metric>,
    #[serde(default)]
    pub budget: Option<usize>,
}

pub async fn handle_get_series(
    State(state): State<AppState>,
    Query(query): Query<SeriesQuery>,
) -> impl IntoResponse {
    let budget = query
        .budget
        .unwrap_or(state.config.point_budget)
        .clamp(1, MAX_POINT_BUDGET);

    Json(state.pipeline.series(
        query.range.unwrap_or_default(),
        query.metric.unwrap_or(Metric::AvgPing),
        budget,
    ))
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    #[serde(default)]
    pub range: Option<TimeRange>,
}

pub async fn handle_get_summary(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> impl IntoResponse {
    Json(state.pipeline.summary(query.range.unwrap_or_default()))
}

pub async fn handle_get_dns_failures(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> impl IntoResponse {
    Json(state.pipeline.dns_failures(query.range.unwrap_or_default()))
}

pub async fn handle_get_targets(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.pipeline.targets())
}

// ============================================================================
// API: Refresh
// ============================================================================

pub async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.pipeline.status().await)
}

/// Start a refresh in the background; any refresh already running is
/// superseded.
pub async fn handle_refresh(State(state): State<AppState>) -> impl IntoResponse {
    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        if let Err(e) = pipeline.refresh().await {
            tracing::debug!("Web: Manual refresh ended: {}", e);
        }
    });

    (StatusCode::ACCEPTED, Json(state.pipeline.status().await))
}

// ============================================================================
// Static Assets
// ============================================================================

pub async fn handle_static(Path(path): Path<String>) -> impl IntoResponse {
    match Assets::get(&path) {
        Some(file) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                file.data.into_owned(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

pub async fn handle_favicon() -> impl IntoResponse {
    let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 100 100">
        <rect x="5" y="5" width="90" height="90" rx="18" fill="#2f6fb3"/>
        <path d="M18 62 L34 62 L42 38 L52 74 L60 50 L82 50" stroke="white" stroke-width="7" fill="none" stroke-linejoin="round"/>
    </svg>"##;

    ([(header::CONTENT_TYPE, "image/svg+xml")], svg)
}
