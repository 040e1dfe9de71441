//! Per-ATS extraction strategies.
//!
//! [`AtsStrategies`] is the dispatch table behind the engine's
//! [`StrategySet`] seam. HTML vendors are scraped with selector tables,
//! vendors with public JSON APIs are queried directly, and everything else
//! goes through the generic fallback.
//!
//! `scraper::Html` is not `Send`, so every strategy parses synchronously
//! into owned records and drops the document before its next await.

mod generic;
mod greenhouse;
mod json;
mod lever;
mod selectors;
mod smartrecruiters;
mod workday;

use flightdeck_core::ats::AtsType;
use flightdeck_core::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use flightdeck_core::error::{AppError, ExtractionKind};
use flightdeck_core::posting::RawJob;
use flightdeck_core::traits::{ContentExtractor, Extracted, Fetcher, ListingPage, StrategySet};
use flightdeck_core::util::collapse_whitespace;
use scraper::{ElementRef, Selector};
use url::Url;

/// Default cap on API pages fetched per source.
pub const DEFAULT_MAX_PAGES: usize = 10;

/// The production strategy table.
///
/// `ai` is optional; without it the fallback uses link and card heuristics
/// only.
#[derive(Clone)]
pub struct AtsStrategies<F, X> {
    fetcher: F,
    ai: Option<X>,
    breaker: CircuitBreaker,
    max_pages: usize,
}

impl<F: Fetcher, X: ContentExtractor> AtsStrategies<F, X> {
    pub fn new(fetcher: F, ai: Option<X>) -> Self {
        Self {
            fetcher,
            ai,
            breaker: CircuitBreaker::new("ai-extractor", CircuitBreakerConfig::default()),
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = CircuitBreaker::new("ai-extractor", config);
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn has_ai(&self) -> bool {
        self.ai.is_some()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

impl<F: Fetcher, X: ContentExtractor> StrategySet for AtsStrategies<F, X> {
    async fn extract(&self, ats_type: AtsType, page: &ListingPage) -> Result<Extracted, AppError> {
        match ats_type {
            AtsType::Workday => workday::extract(&self.fetcher, page, self.max_pages).await,
            AtsType::Greenhouse => greenhouse::extract(&self.fetcher, page).await,
            AtsType::Lever => lever::extract(&self.fetcher, page).await,
            AtsType::SmartRecruiters => {
                smartrecruiters::extract(&self.fetcher, page, self.max_pages).await
            }
            AtsType::Taleo
            | AtsType::SuccessFactors
            | AtsType::Brassring
            | AtsType::Icims
            | AtsType::Avature => selectors::extract(ats_type, page),
            AtsType::CustomFallback | AtsType::Unknown => {
                generic::extract(self.ai.as_ref(), &self.breaker, page).await
            }
        }
    }
}

pub(crate) fn selector(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css)
        .map_err(|e| AppError::extraction(ExtractionKind::Parse, format!("bad selector {css}: {e:?}")))
}

pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

/// Resolve an href against the page URL. Fragments, scripts, mail and
/// phone links, and non-http schemes are dropped.
pub(crate) fn resolve_href(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
    {
        return None;
    }
    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

pub(crate) fn page_url(page: &ListingPage) -> Result<Url, AppError> {
    Url::parse(&page.url).map_err(|e| {
        AppError::extraction(ExtractionKind::Parse, format!("invalid page URL {}: {e}", page.url))
    })
}

/// Strip markup from an HTML fragment.
pub(crate) fn html_to_text(fragment: &str) -> String {
    let doc = scraper::Html::parse_fragment(fragment);
    collapse_whitespace(&doc.root_element().text().collect::<String>())
}

/// Keep pilot postings, deduplicated by application URL in first-seen order.
pub(crate) fn pilot_only(records: Vec<RawJob>) -> Vec<RawJob> {
    let mut seen = std::collections::HashSet::new();
    records
        .into_iter()
        .filter(|r| {
            r.title
                .as_deref()
                .is_some_and(flightdeck_core::normalize::is_pilot_related)
        })
        .filter(|r| match &r.application_url {
            Some(url) => seen.insert(url.clone()),
            None => false,
        })
        .collect()
}

/// Wrap records gathered from several requests, marking the result partial
/// when some requests failed after at least one succeeded.
pub(crate) fn paged_result(
    strategy: &'static str,
    records: Vec<RawJob>,
    failure: Option<AppError>,
    fetched_any: bool,
) -> Result<Extracted, AppError> {
    match failure {
        None => Ok(Extracted::complete(strategy, pilot_only(records))),
        Some(e) if !fetched_any => Err(e),
        Some(e) => Ok(Extracted::partial(
            strategy,
            pilot_only(records),
            format!("later pages failed: {e}"),
        )),
    }
}
