//! Workday career sites.
//!
//! The listing page is a JavaScript shell. Postings come from embedded
//! state when present, otherwise from the site's `wday/cxs` jobs API,
//! paged by offset. Job-title links in the shell are the last resort.

use std::sync::LazyLock;

use flightdeck_core::error::AppError;
use flightdeck_core::posting::RawJob;
use flightdeck_core::traits::{Extracted, Fetcher, ListingPage};
use regex::Regex;
use scraper::Html;
use serde_json::{Value, json};
use url::Url;

use super::json::{embedded_json, find_array, text_at};
use super::{element_text, page_url, paged_result, pilot_only, resolve_href, selector};

const STRATEGY: &str = "workday";
const PAGE_SIZE: usize = 20;
const SEARCH_TEXT: &str = "pilot";
const TITLE_LINKS: &str = "a[data-automation-id='jobTitle'], li[class*='css'] a[href*='/job/']";

static LOCALE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2}(-[A-Za-z]{2})?$").expect("valid locale regex"));

/// The tenant and site a Workday URL points at.
#[derive(Debug, PartialEq, Eq)]
struct WorkdaySite {
    api_url: String,
    /// Prefix that a posting's `externalPath` is appended to.
    job_base: String,
}

fn site(url: &Url) -> Option<WorkdaySite> {
    let host = url.host_str()?;
    if !(host.ends_with(".myworkdayjobs.com") || host.ends_with(".myworkdaysite.com")) {
        return None;
    }
    let origin = format!("{}://{host}", url.scheme());
    let segments: Vec<&str> = url
        .path_segments()?
        .filter(|s| !s.is_empty() && !LOCALE.is_match(s))
        .collect();

    let (tenant, site, job_base) = match segments.as_slice() {
        ["recruiting", tenant, site, ..] => (
            tenant.to_string(),
            site.to_string(),
            format!("{origin}/recruiting/{tenant}/{site}"),
        ),
        [site, ..] => {
            let tenant = host.split('.').next()?.to_string();
            (tenant, site.to_string(), format!("{origin}/{site}"))
        }
        [] => return None,
    };

    Some(WorkdaySite {
        api_url: format!("{origin}/wday/cxs/{tenant}/{site}/jobs"),
        job_base,
    })
}

fn posting(item: &Value, job_base: &str) -> Option<RawJob> {
    let title = text_at(item, "title")?;
    let path = text_at(item, "externalPath")?;
    let mut job = RawJob::new(title, format!("{job_base}{path}"));
    if let Some(location) = text_at(item, "locationsText") {
        job = job.with_location(location);
    }
    if let Some(posted) = text_at(item, "postedOn") {
        job = job.with_date_posted(posted);
    }
    Some(job)
}

fn embedded_postings(page: &ListingPage, job_base: &str) -> Result<Vec<RawJob>, AppError> {
    Ok(embedded_json(&page.body)?
        .iter()
        .filter_map(|v| find_array(v, "jobPostings"))
        .flatten()
        .filter_map(|item| posting(item, job_base))
        .collect())
}

fn title_links(page: &ListingPage, base: &Url) -> Result<Vec<RawJob>, AppError> {
    let links = selector(TITLE_LINKS)?;
    let doc = Html::parse_document(&page.body);
    Ok(doc
        .select(&links)
        .filter_map(|a| {
            let url = resolve_href(base, a.value().attr("href")?)?;
            Some(RawJob::new(element_text(a), url))
        })
        .collect())
}

pub(super) async fn extract<F: Fetcher>(
    fetcher: &F,
    page: &ListingPage,
    max_pages: usize,
) -> Result<Extracted, AppError> {
    let base = page_url(page)?;
    let Some(site) = site(&base) else {
        tracing::debug!(url = %page.url, "Not a Workday host, scanning title links");
        return Ok(Extracted::complete(STRATEGY, pilot_only(title_links(page, &base)?)));
    };

    let embedded = embedded_postings(page, &site.job_base)?;
    if !embedded.is_empty() {
        return Ok(Extracted::complete(STRATEGY, pilot_only(embedded)));
    }

    let mut records = Vec::new();
    let mut failure = None;
    let mut fetched_any = false;
    let mut total: Option<usize> = None;
    let mut offset = 0;

    for _ in 0..max_pages {
        let body = json!({
            "appliedFacets": {},
            "limit": PAGE_SIZE,
            "offset": offset,
            "searchText": SEARCH_TEXT,
        });
        let response = match fetcher.post_json(&site.api_url, &body).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(api = %site.api_url, offset, error = %e, "Workday page failed");
                failure = Some(e);
                break;
            }
        };
        fetched_any = true;

        // Only the first page carries a meaningful total.
        if total.is_none() {
            total = response
                .get("total")
                .and_then(Value::as_u64)
                .and_then(|t| usize::try_from(t).ok())
                .filter(|t| *t > 0);
        }
        let items = response
            .get("jobPostings")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        records.extend(items.iter().filter_map(|item| posting(item, &site.job_base)));

        offset += items.len();
        if items.len() < PAGE_SIZE || total.is_some_and(|t| offset >= t) {
            break;
        }
    }

    if !fetched_any {
        let links = title_links(page, &base)?;
        if !links.is_empty() {
            return Ok(Extracted::complete(STRATEGY, pilot_only(links)));
        }
    }

    paged_result(STRATEGY, records, failure, fetched_any)
}
