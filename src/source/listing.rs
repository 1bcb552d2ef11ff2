//! Directory listing: which CSV files the device offers.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use percent_encoding::percent_decode_str;
use regex::Regex;
use reqwest::Url;

use super::{CsvSource, ListingError};

fn href_regex() -> &'static Regex {
    static HREF_RE: OnceLock<Regex> = OnceLock::new();
    HREF_RE.get_or_init(|| Regex::new(r#"(?i)<a\s[^>]*?href\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).unwrap())
}

/// Extract the names of files linked directly under `base` from an HTML
/// directory page, in page order.
///
/// Names are percent-decoded, so `My%20Export.csv` is listed as
/// `My Export.csv`. Returns `None` when the body does not look like HTML at
/// all. Links that point elsewhere (parent directories, other hosts,
/// subdirectories) are dropped.
pub fn extract_links(body: &str, base: &Url) -> Option<Vec<String>> {
    let lower = body.to_ascii_lowercase();
    if !lower.contains("<a") && !lower.contains("<html") {
        return None;
    }

    let names = href_regex()
        .captures_iter(body)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .filter_map(|href| {
            let mut url = base.join(href.as_str().trim()).ok()?;
            url.set_query(None);
            url.set_fragment(None);
            let name = url.as_str().strip_prefix(base.as_str())?;
            if name.is_empty() || name.contains('/') {
                return None;
            }
            let decoded = percent_decode_str(name).decode_utf8().ok()?;
            if decoded.contains('/') {
                return None;
            }
            Some(decoded.into_owned())
        })
        .collect();

    Some(names)
}

fn is_csv(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".csv")
}

/// List the CSV files to fetch: `.csv` names from the source, minus
/// exclusions, sorted and deduplicated.
pub async fn list_candidates(
    source: &dyn CsvSource,
    excluded: &BTreeSet<String>,
) -> Result<Vec<String>, ListingError> {
    let listed = source.list().await?;
    let total = listed.len();

    let mut skipped = 0;
    let mut names: Vec<String> = listed
        .into_iter()
        .filter(|name| is_csv(name))
        .filter(|name| {
            let keep = !excluded.contains(name);
            if !keep {
                skipped += 1;
            }
            keep
        })
        .collect();
    names.sort();
    names.dedup();

    tracing::info!(
        "Lister: {} CSV files to fetch ({} links, {} excluded)",
        names.len(),
        total,
        skipped
    );

    Ok(names)
}
