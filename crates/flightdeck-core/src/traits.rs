use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};

use crate::ats::AtsType;
use crate::error::AppError;
use crate::posting::{JobPosting, NormalizedJob, PostingFilter, RawJob, UpsertCounts};
use crate::run::{NewRunRecord, RunRecord};
use crate::source::{NewSource, RegistryStats, Source, SourceFilter, SourcePatch, Tier};

/// Fetches remote content.
pub trait Fetcher: Send + Sync + Clone {
    /// GET a URL and return the body as text.
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;

    /// POST a JSON body and return the JSON response.
    fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> impl Future<Output = Result<serde_json::Value, AppError>> + Send {
        let url = url.to_string();
        let _ = body;
        async move {
            Err(AppError::HttpError(format!(
                "POST not supported by this fetcher: {url}"
            )))
        }
    }
}

/// Converts raw HTML into clean Markdown text.
pub trait Cleaner: Send + Sync + Clone {
    fn clean(&self, html: &str) -> Result<String, AppError>;
}

/// Pluggable heuristic that pulls job-like field maps out of arbitrary page content.
pub trait ContentExtractor: Send + Sync + Clone {
    fn extract_jobs(
        &self,
        page_url: &str,
        content: &str,
    ) -> impl Future<Output = Result<Vec<serde_json::Map<String, serde_json::Value>>, AppError>> + Send;
}

/// A fetched job-listing page.
#[derive(Debug, Clone)]
pub struct ListingPage {
    pub url: String,
    pub body: String,
}

/// One-pass sequence of raw records produced by a strategy.
///
/// Consumed by value; once iterated it cannot be restarted.
pub struct RawJobs {
    inner: Box<dyn Iterator<Item = RawJob> + Send>,
}

impl RawJobs {
    pub fn new<I>(records: I) -> Self
    where
        I: IntoIterator<Item = RawJob>,
        I::IntoIter: Send + 'static,
    {
        Self {
            inner: Box::new(records.into_iter()),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl From<Vec<RawJob>> for RawJobs {
    fn from(records: Vec<RawJob>) -> Self {
        Self::new(records)
    }
}

impl Iterator for RawJobs {
    type Item = RawJob;

    fn next(&mut self) -> Option<RawJob> {
        self.inner.next()
    }
}

impl fmt::Debug for RawJobs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawJobs").finish_non_exhaustive()
    }
}

/// What a strategy produced for one listing.
#[derive(Debug)]
pub struct Extracted {
    /// Name of the strategy that ran, recorded on the run log.
    pub strategy: &'static str,
    pub records: RawJobs,
    /// Set when some sub-requests or pages failed but others parsed.
    pub partial: Option<String>,
}

impl Extracted {
    pub fn complete(strategy: &'static str, records: impl Into<RawJobs>) -> Self {
        Self {
            strategy,
            records: records.into(),
            partial: None,
        }
    }

    pub fn partial(strategy: &'static str, records: impl Into<RawJobs>, detail: impl Into<String>) -> Self {
        Self {
            strategy,
            records: records.into(),
            partial: Some(detail.into()),
        }
    }
}

/// The per-ATS strategy table. Implementations dispatch on `ats_type`.
pub trait StrategySet: Send + Sync + Clone {
    fn extract(
        &self,
        ats_type: AtsType,
        page: &ListingPage,
    ) -> impl Future<Output = Result<Extracted, AppError>> + Send;
}

/// Durable catalog of scrape targets.
pub trait SourceRegistry: Send + Sync + Clone {
    /// Sources eligible for a batch at `now`: active and past their
    /// interval, plus error sources when `include_errors` is set.
    fn list_due_sources(
        &self,
        tier: Option<Tier>,
        include_errors: bool,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Source>, AppError>> + Send;

    fn list_sources(
        &self,
        filter: SourceFilter,
    ) -> impl Future<Output = Result<Vec<Source>, AppError>> + Send;

    fn get_source(&self, name: &str)
    -> impl Future<Output = Result<Option<Source>, AppError>> + Send;

    /// Insert a source, or refresh the descriptive fields of an existing
    /// one with the same name. Schedule and health state are kept.
    fn upsert_source(
        &self,
        source: NewSource,
    ) -> impl Future<Output = Result<Source, AppError>> + Send;

    fn update_source(
        &self,
        name: &str,
        patch: &SourcePatch,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn stats(&self, now: DateTime<Utc>)
    -> impl Future<Output = Result<RegistryStats, AppError>> + Send;
}

/// Posting store and run log.
pub trait JobStore: Send + Sync + Clone {
    /// Upsert keyed on application URL. Re-activates and re-stamps
    /// `date_scraped` on existing rows.
    fn upsert_jobs(
        &self,
        jobs: &[NormalizedJob],
    ) -> impl Future<Output = Result<UpsertCounts, AppError>> + Send;

    fn append_run_log(
        &self,
        record: &NewRunRecord,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Run history of a source, newest first.
    fn recent_runs(
        &self,
        source_name: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<RunRecord>, AppError>> + Send;

    fn list_active_postings(
        &self,
        filter: &PostingFilter,
    ) -> impl Future<Output = Result<Vec<JobPosting>, AppError>> + Send;

    /// Mark a posting inactive. Returns false when no active posting has that URL.
    fn deactivate_posting(
        &self,
        application_url: &str,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// A no-op JobStore for dry runs.
#[derive(Debug, Clone)]
pub struct NullJobStore;

impl JobStore for NullJobStore {
    async fn upsert_jobs(&self, jobs: &[NormalizedJob]) -> Result<UpsertCounts, AppError> {
        Ok(UpsertCounts {
            inserted: u32::try_from(jobs.len()).unwrap_or(u32::MAX),
            updated: 0,
        })
    }

    async fn append_run_log(&self, _record: &NewRunRecord) -> Result<(), AppError> {
        Ok(())
    }

    async fn recent_runs(
        &self,
        _source_name: &str,
        _limit: usize,
    ) -> Result<Vec<RunRecord>, AppError> {
        Ok(vec![])
    }

    async fn list_active_postings(
        &self,
        _filter: &PostingFilter,
    ) -> Result<Vec<JobPosting>, AppError> {
        Ok(vec![])
    }

    async fn deactivate_posting(&self, _application_url: &str) -> Result<bool, AppError> {
        Ok(false)
    }
}
