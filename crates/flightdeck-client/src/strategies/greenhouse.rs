use std::sync::LazyLock;

use flightdeck_core::error::{AppError, ExtractionKind};
use flightdeck_core::posting::RawJob;
use flightdeck_core::traits::{Extracted, Fetcher, ListingPage};
use regex::Regex;
use serde_json::Value;
use url::Url;

use super::json::{parse_body, text_at};
use super::{html_to_text, page_url, pilot_only};

const STRATEGY: &str = "greenhouse";

static EMBED_BOARD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"greenhouse\.io/(?:embed/job_board(?:/js)?\?for=|)([A-Za-z0-9_-]+)")
        .expect("valid greenhouse regex")
});

/// Board token from a hosted board URL, or from an embed on a custom page.
fn board_token(url: &Url, body: &str) -> Option<String> {
    let host = url.host_str().unwrap_or_default();
    if host.ends_with("greenhouse.io") {
        if let Some((_, token)) = url.query_pairs().find(|(k, _)| k == "for") {
            return Some(token.into_owned());
        }
        let first = url.path_segments()?.find(|s| !s.is_empty())?;
        if first != "embed" {
            return Some(first.to_string());
        }
    }
    EMBED_BOARD
        .captures_iter(body)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .find(|t| *t != "embed")
        .map(str::to_string)
}

fn posting(item: &Value) -> Option<RawJob> {
    let mut job = RawJob::new(text_at(item, "title")?, text_at(item, "absolute_url")?);
    if let Some(location) = text_at(item, "location.name") {
        job = job.with_location(location);
    }
    // `content` is entity-escaped HTML.
    if let Some(content) = text_at(item, "content") {
        job = job.with_description(html_to_text(&html_to_text(&content)));
    }
    if let Some(updated) = text_at(item, "updated_at") {
        job = job.with_date_posted(updated);
    }
    Some(job)
}

pub(super) async fn extract<F: Fetcher>(fetcher: &F, page: &ListingPage) -> Result<Extracted, AppError> {
    let base = page_url(page)?;
    let token = board_token(&base, &page.body).ok_or_else(|| {
        AppError::extraction(
            ExtractionKind::Parse,
            format!("no Greenhouse board token in {}", page.url),
        )
    })?;

    let api = format!("https://boards-api.greenhouse.io/v1/boards/{token}/jobs?content=true");
    let body = fetcher.fetch(&api).await?;
    let value = parse_body(&body, "Greenhouse jobs")?;
    let records: Vec<RawJob> = value
        .get("jobs")
        .and_then(Value::as_array)
        .map(|jobs| jobs.iter().filter_map(posting).collect())
        .unwrap_or_default();

    tracing::debug!(board = %token, records = records.len(), "Greenhouse board fetched");
    Ok(Extracted::complete(STRATEGY, pilot_only(records)))
}
