use flightdeck_core::error::{AppError, ExtractionKind};
use flightdeck_core::posting::RawJob;
use flightdeck_core::traits::{Extracted, Fetcher, ListingPage};
use serde_json::Value;
use url::Url;

use super::json::{parse_body, text_at};
use super::{page_url, paged_result};

const STRATEGY: &str = "smartrecruiters";
const PAGE_SIZE: usize = 100;

fn company(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    if !host.ends_with("smartrecruiters.com") {
        return None;
    }
    url.path_segments()?
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn posting(item: &Value, company: &str) -> Option<RawJob> {
    let id = text_at(item, "id")?;
    let mut job = RawJob::new(
        text_at(item, "name")?,
        format!("https://jobs.smartrecruiters.com/{company}/{id}"),
    );
    let location: Vec<String> = ["location.city", "location.country"]
        .iter()
        .filter_map(|p| text_at(item, p))
        .collect();
    if !location.is_empty() {
        job = job.with_location(location.join(", "));
    }
    if let Some(released) = text_at(item, "releasedDate") {
        job = job.with_date_posted(released);
    }
    Some(job)
}

pub(super) async fn extract<F: Fetcher>(
    fetcher: &F,
    page: &ListingPage,
    max_pages: usize,
) -> Result<Extracted, AppError> {
    let base = page_url(page)?;
    let company = company(&base).ok_or_else(|| {
        AppError::extraction(
            ExtractionKind::Parse,
            format!("no SmartRecruiters company in {}", page.url),
        )
    })?;

    let mut records = Vec::new();
    let mut failure = None;
    let mut fetched_any = false;
    let mut offset = 0;

    for _ in 0..max_pages {
        let api = format!(
            "https://api.smartrecruiters.com/v1/companies/{company}/postings?limit={PAGE_SIZE}&offset={offset}"
        );
        let value = match fetcher.fetch(&api).await {
            Ok(body) => parse_body(&body, "SmartRecruiters postings"),
            Err(e) => Err(e),
        };
        let value = match value {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(company = %company, offset, error = %e, "SmartRecruiters page failed");
                failure = Some(e);
                break;
            }
        };
        fetched_any = true;

        let items = value
            .get("content")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        records.extend(items.iter().filter_map(|item| posting(item, &company)));
        offset += items.len();

        let total = value
            .get("totalFound")
            .and_then(Value::as_u64)
            .and_then(|t| usize::try_from(t).ok())
            .unwrap_or(0);
        if items.is_empty() || offset >= total {
            break;
        }
    }

    paged_result(STRATEGY, records, failure, fetched_any)
}
