//! Fallback for custom career pages.
//!
//! When an AI extractor is configured and its circuit is closed, its
//! validated records win. Otherwise, or when it finds nothing, two
//! structural heuristics run over the page: job-like cards, then a scan of
//! every link whose text reads as a pilot posting.

use std::collections::HashSet;

use flightdeck_core::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use flightdeck_core::error::AppError;
use flightdeck_core::normalize::is_pilot_related;
use flightdeck_core::posting::RawJob;
use flightdeck_core::traits::{ContentExtractor, Extracted, ListingPage};
use scraper::{ElementRef, Html};
use url::Url;

use super::{element_text, page_url, pilot_only, resolve_href, selector};

const AI_STRATEGY: &str = "custom_ai";
const HEURISTIC_STRATEGY: &str = "custom_fallback";

const MIN_TITLE_CHARS: usize = 5;
const MAX_TITLE_CHARS: usize = 200;

const CARDS: &str = "div[class*='job'], article[class*='job'], li[class*='job'], \
    div[class*='vacancy'], div[class*='position'], div[class*='opening'], \
    tr[class*='job'], div[data-job]";
const CARD_TITLE: &str = "h2, h3, h4, a[class*='title'], span[class*='title']";
const CARD_LOCATION: &str = "[class*='location'], [class*='city']";

const SOCIAL_HOSTS: &[&str] = &[
    "linkedin.com",
    "facebook.com",
    "twitter.com",
    "x.com",
    "instagram.com",
    "youtube.com",
];

/// Link texts that point at a listing rather than a posting.
const LISTING_TEXTS: &[&str] = &[
    "pilot careers",
    "pilot jobs",
    "pilot vacancies",
    "pilots",
    "pilot recruitment",
    "become a pilot",
    "cadet programme",
    "cadet program",
];

pub(super) async fn extract<X: ContentExtractor>(
    ai: Option<&X>,
    breaker: &CircuitBreaker,
    page: &ListingPage,
) -> Result<Extracted, AppError> {
    let base = page_url(page)?;

    if let Some(ai) = ai {
        match breaker.call(|| ai.extract_jobs(&page.url, &page.body)).await {
            Ok(fields) => {
                let records = pilot_only(
                    fields
                        .iter()
                        .map(RawJob::from_fields)
                        .filter_map(|job| absolutize(job, &base))
                        .collect(),
                );
                if !records.is_empty() {
                    return Ok(Extracted::complete(AI_STRATEGY, records));
                }
                tracing::debug!(url = %page.url, "AI found no postings, trying heuristics");
            }
            Err(CircuitBreakerError::Open { retry_after, .. }) => {
                tracing::debug!(
                    url = %page.url,
                    retry_after_secs = retry_after.as_secs(),
                    "AI circuit open, using heuristics"
                );
            }
            Err(CircuitBreakerError::Inner(e)) => {
                tracing::warn!(url = %page.url, error = %e, "AI extraction failed, using heuristics");
            }
        }
    }

    let records = scan(page, &base)?;
    Ok(Extracted::complete(HEURISTIC_STRATEGY, pilot_only(records)))
}

fn absolutize(mut job: RawJob, base: &Url) -> Option<RawJob> {
    let url = resolve_href(base, job.application_url.as_deref()?)?;
    job.application_url = Some(url);
    Some(job)
}

fn scan(page: &ListingPage, base: &Url) -> Result<Vec<RawJob>, AppError> {
    let doc = Html::parse_document(&page.body);
    let mut records = cards(&doc, base)?;
    records.extend(links(&doc, base)?);
    Ok(records)
}

fn cards(doc: &Html, base: &Url) -> Result<Vec<RawJob>, AppError> {
    let cards = selector(CARDS)?;
    let title_sel = selector(CARD_TITLE)?;
    let link_sel = selector("a[href]")?;
    let location_sel = selector(CARD_LOCATION)?;

    Ok(doc
        .select(&cards)
        .filter_map(|card| {
            let title = element_text(card.select(&title_sel).next()?);
            if !plausible_title(&title) {
                return None;
            }
            let href = card.select(&link_sel).next()?.value().attr("href")?;
            let url = resolve_href(base, href)?;
            let mut job = RawJob::new(title, url);
            if let Some(location) = card.select(&location_sel).next() {
                job = job.with_location(element_text(location));
            }
            Some(job)
        })
        .collect())
}

fn links(doc: &Html, base: &Url) -> Result<Vec<RawJob>, AppError> {
    let anchors = selector("a[href]")?;
    let page_url = base.as_str().trim_end_matches('/');
    let mut seen = HashSet::new();

    Ok(doc
        .select(&anchors)
        .filter(|a| !in_page_chrome(*a))
        .filter_map(|a| {
            let text = element_text(a);
            let url = resolve_href(base, a.value().attr("href")?)?;
            if !plausible_title(&text)
                || is_listing_text(&text)
                || is_social(&url)
                || url.trim_end_matches('/') == page_url
                || !seen.insert(url.clone())
            {
                return None;
            }
            Some(RawJob::new(text, url))
        })
        .collect())
}

fn plausible_title(text: &str) -> bool {
    let chars = text.chars().count();
    (MIN_TITLE_CHARS..=MAX_TITLE_CHARS).contains(&chars) && is_pilot_related(text)
}

fn is_listing_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    LISTING_TEXTS.iter().any(|t| lower == *t)
}

fn is_social(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .is_some_and(|host| {
            SOCIAL_HOSTS
                .iter()
                .any(|s| host == *s || host.ends_with(&format!(".{s}")))
        })
}

fn in_page_chrome(el: ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| matches!(a.value().name(), "nav" | "header" | "footer"))
}
