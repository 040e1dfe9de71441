use std::sync::LazyLock;

use chrono::DateTime;
use flightdeck_core::error::{AppError, ExtractionKind};
use flightdeck_core::posting::RawJob;
use flightdeck_core::traits::{Extracted, Fetcher, ListingPage};
use regex::Regex;
use serde_json::Value;
use url::Url;

use super::json::{parse_body, text_at};
use super::{page_url, pilot_only};

const STRATEGY: &str = "lever";

static LEVER_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"jobs\.lever\.co/([A-Za-z0-9_-]+)").expect("valid lever regex")
});

fn company(url: &Url, body: &str) -> Option<String> {
    if url.host_str() == Some("jobs.lever.co") {
        return url
            .path_segments()?
            .find(|s| !s.is_empty())
            .map(str::to_string);
    }
    LEVER_LINK
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn posting(item: &Value) -> Option<RawJob> {
    let url = text_at(item, "hostedUrl").or_else(|| text_at(item, "applyUrl"))?;
    let mut job = RawJob::new(text_at(item, "text")?, url);
    if let Some(location) = text_at(item, "categories.location") {
        job = job.with_location(location);
    }
    if let Some(description) = text_at(item, "descriptionPlain") {
        job = job.with_description(description);
    }
    job.contract_type = text_at(item, "categories.commitment");
    if let Some(date) = item
        .get("createdAt")
        .and_then(Value::as_i64)
        .and_then(DateTime::from_timestamp_millis)
    {
        job = job.with_date_posted(date.format("%Y-%m-%d").to_string());
    }
    Some(job)
}

pub(super) async fn extract<F: Fetcher>(fetcher: &F, page: &ListingPage) -> Result<Extracted, AppError> {
    let base = page_url(page)?;
    let company = company(&base, &page.body).ok_or_else(|| {
        AppError::extraction(
            ExtractionKind::Parse,
            format!("no Lever company in {}", page.url),
        )
    })?;

    let api = format!("https://api.lever.co/v0/postings/{company}?mode=json");
    let value = parse_body(&fetcher.fetch(&api).await?, "Lever postings")?;
    let items = value.as_array().ok_or_else(|| {
        AppError::extraction(ExtractionKind::Parse, "Lever postings is not an array")
    })?;
    let records: Vec<RawJob> = items.iter().filter_map(posting).collect();

    tracing::debug!(company = %company, records = records.len(), "Lever postings fetched");
    Ok(Extracted::complete(STRATEGY, pilot_only(records)))
}
