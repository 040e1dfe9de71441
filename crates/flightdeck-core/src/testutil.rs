//! Test utilities: in-memory and mock implementations of the core traits.
//!
//! All mocks use `Arc<Mutex<_>>` for interior mutability so clones share
//! state and tests can assert on what was recorded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::ats::AtsType;
use crate::error::{AppError, ExtractionKind};
use crate::posting::{JobPosting, NormalizedJob, PostingFilter, RawJob, UpsertCounts};
use crate::run::{NewRunRecord, RunRecord};
use crate::scheduler::{SchedulerEvent, SchedulerReporter, is_eligible};
use crate::source::{
    NewSource, RegistryStats, Source, SourceFilter, SourcePatch, SourceStatus, Tier,
};
use crate::traits::{Extracted, Fetcher, JobStore, ListingPage, SourceRegistry, StrategySet};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Canned reply for one URL.
#[derive(Debug, Clone)]
pub enum Reply {
    Body(String),
    Json(serde_json::Value),
    /// Fails with `HttpError("HTTP {code} for {url}")`.
    Status(u16),
    /// Answers with the body after a delay.
    Slow(Duration, String),
}

/// Mock fetcher with per-URL routes, a queue of one-shot errors and a
/// fallback body. Tracks calls and peak concurrency.
#[derive(Clone)]
pub struct MockFetcher {
    fallback: Arc<String>,
    errors: Arc<Mutex<Vec<AppError>>>,
    routes: Arc<Mutex<HashMap<String, Reply>>>,
    pub calls: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockFetcher {
    pub fn new(body: &str) -> Self {
        Self {
            fallback: Arc::new(body.to_string()),
            errors: Arc::new(Mutex::new(Vec::new())),
            routes: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The first request fails with `error`, later ones get the fallback body.
    pub fn with_error(error: AppError) -> Self {
        let fetcher = Self::new("<html><body>default</body></html>");
        fetcher.errors.lock().unwrap().push(error);
        fetcher
    }

    pub fn route(self, url: &str, reply: Reply) -> Self {
        self.routes.lock().unwrap().insert(url.to_string(), reply);
        self
    }

    /// A URL that never answers within any reasonable timeout.
    pub fn hang(self, url: &str) -> Self {
        self.route(url, Reply::Slow(Duration::from_secs(3600), String::new()))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn respond(&self, url: &str) -> Result<String, AppError> {
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(error) = self.errors.lock().unwrap().pop() {
            return Err(error);
        }
        let reply = self.routes.lock().unwrap().get(url).cloned();

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let result = match reply {
            None => Ok(self.fallback.to_string()),
            Some(Reply::Body(body)) => Ok(body),
            Some(Reply::Json(value)) => Ok(value.to_string()),
            Some(Reply::Status(code)) => Err(AppError::HttpError(format!("HTTP {code} for {url}"))),
            Some(Reply::Slow(delay, body)) => {
                tokio::time::sleep(delay).await;
                Ok(body)
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.respond(url).await
    }

    async fn post_json(
        &self,
        url: &str,
        _body: &serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        let text = self.respond(url).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

// ---------------------------------------------------------------------------
// MockStrategies
// ---------------------------------------------------------------------------

/// What a mocked strategy returns.
#[derive(Debug, Clone)]
pub enum StrategyReply {
    Records(Vec<RawJob>),
    Partial(Vec<RawJob>, String),
    Fail(ExtractionKind, String),
}

/// Strategy table answering per listing URL, then per ATS type, else with
/// zero records. Records which type each call was dispatched to.
#[derive(Clone, Default)]
pub struct MockStrategies {
    by_type: Arc<Mutex<HashMap<AtsType, StrategyReply>>>,
    by_page: Arc<Mutex<HashMap<String, StrategyReply>>>,
    pub calls: Arc<Mutex<Vec<(AtsType, String)>>>,
}

impl MockStrategies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_type(self, ats_type: AtsType, reply: StrategyReply) -> Self {
        self.by_type.lock().unwrap().insert(ats_type, reply);
        self
    }

    pub fn for_page(self, url: &str, reply: StrategyReply) -> Self {
        self.by_page.lock().unwrap().insert(url.to_string(), reply);
        self
    }

    pub fn dispatched(&self) -> Vec<AtsType> {
        self.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }
}

impl StrategySet for MockStrategies {
    async fn extract(&self, ats_type: AtsType, page: &ListingPage) -> Result<Extracted, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((ats_type, page.url.clone()));
        let reply = self
            .by_page
            .lock()
            .unwrap()
            .get(&page.url)
            .cloned()
            .or_else(|| self.by_type.lock().unwrap().get(&ats_type).cloned());
        match reply {
            None => Ok(Extracted::complete("mock", Vec::new())),
            Some(StrategyReply::Records(records)) => Ok(Extracted::complete("mock", records)),
            Some(StrategyReply::Partial(records, detail)) => {
                Ok(Extracted::partial("mock", records, detail))
            }
            Some(StrategyReply::Fail(kind, message)) => Err(AppError::extraction(kind, message)),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryRegistry
// ---------------------------------------------------------------------------

/// In-memory source registry with the same selection rules as the database.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    sources: Arc<Mutex<Vec<Source>>>,
    pub patches: Arc<Mutex<Vec<(String, SourcePatch)>>>,
}

impl MemoryRegistry {
    pub fn new(sources: Vec<Source>) -> Self {
        Self {
            sources: Arc::new(Mutex::new(sources)),
            patches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn get(&self, name: &str) -> Source {
        self.sources
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .unwrap_or_else(|| panic!("no source named {name}"))
    }

    pub fn patch_count(&self) -> usize {
        self.patches.lock().unwrap().len()
    }
}

impl SourceRegistry for MemoryRegistry {
    async fn list_due_sources(
        &self,
        tier: Option<Tier>,
        include_errors: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<Source>, AppError> {
        Ok(self
            .sources
            .lock()
            .unwrap()
            .iter()
            .filter(|s| tier.is_none_or(|t| t == s.tier))
            .filter(|s| is_eligible(s, include_errors, now))
            .cloned()
            .collect())
    }

    async fn list_sources(&self, filter: SourceFilter) -> Result<Vec<Source>, AppError> {
        Ok(self
            .sources
            .lock()
            .unwrap()
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect())
    }

    async fn get_source(&self, name: &str) -> Result<Option<Source>, AppError> {
        Ok(self
            .sources
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.name == name)
            .cloned())
    }

    async fn upsert_source(&self, source: NewSource) -> Result<Source, AppError> {
        let now = Utc::now();
        let mut sources = self.sources.lock().unwrap();
        if let Some(existing) = sources.iter_mut().find(|s| s.name == source.name) {
            existing.url = source.url.clone();
            existing.region = source.region.or(existing.region);
            existing.country = source.country.clone().or(existing.country.take());
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        let created = source.into_source(now);
        sources.push(created.clone());
        Ok(created)
    }

    async fn update_source(&self, name: &str, patch: &SourcePatch) -> Result<(), AppError> {
        let mut sources = self.sources.lock().unwrap();
        let source = sources
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| AppError::NotFound(format!("source {name}")))?;
        patch.apply_to(source);
        source.updated_at = Utc::now();
        self.patches
            .lock()
            .unwrap()
            .push((name.to_string(), patch.clone()));
        Ok(())
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<RegistryStats, AppError> {
        let sources = self.sources.lock().unwrap();
        let mut stats = RegistryStats::default();
        for source in sources.iter() {
            stats.total += 1;
            *stats.by_tier.entry(source.tier.as_u8()).or_default() += 1;
            *stats
                .by_status
                .entry(source.status.as_str().to_string())
                .or_default() += 1;
            if is_eligible(source, false, now) {
                stats.due += 1;
            }
        }
        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// MemoryJobStore
// ---------------------------------------------------------------------------

/// In-memory posting store and run log.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    postings: Arc<Mutex<Vec<JobPosting>>>,
    runs: Arc<Mutex<Vec<RunRecord>>>,
    upsert_failures: Arc<Mutex<u32>>,
    log_failures: Arc<Mutex<u32>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` upserts fail with a database error.
    pub fn failing_upserts(self, n: u32) -> Self {
        *self.upsert_failures.lock().unwrap() = n;
        self
    }

    /// The next `n` run-log appends fail with a database error.
    pub fn failing_logs(self, n: u32) -> Self {
        *self.log_failures.lock().unwrap() = n;
        self
    }

    pub fn postings(&self) -> Vec<JobPosting> {
        self.postings.lock().unwrap().clone()
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.runs.lock().unwrap().clone()
    }

    fn take_failure(counter: &Mutex<u32>) -> bool {
        let mut remaining = counter.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }
}

impl JobStore for MemoryJobStore {
    async fn upsert_jobs(&self, jobs: &[NormalizedJob]) -> Result<UpsertCounts, AppError> {
        if Self::take_failure(&self.upsert_failures) {
            return Err(AppError::DatabaseError("connection reset".into()));
        }
        let now = Utc::now();
        let mut postings = self.postings.lock().unwrap();
        let mut counts = UpsertCounts::default();
        for job in jobs {
            match postings
                .iter_mut()
                .find(|p| p.job.application_url == job.application_url)
            {
                Some(existing) => {
                    existing.job = job.clone();
                    existing.is_active = true;
                    existing.date_scraped = now;
                    counts.updated += 1;
                }
                None => {
                    postings.push(JobPosting {
                        id: Uuid::new_v4(),
                        job: job.clone(),
                        is_active: true,
                        date_scraped: now,
                        created_at: now,
                    });
                    counts.inserted += 1;
                }
            }
        }
        Ok(counts)
    }

    async fn append_run_log(&self, record: &NewRunRecord) -> Result<(), AppError> {
        if Self::take_failure(&self.log_failures) {
            return Err(AppError::DatabaseError("connection reset".into()));
        }
        self.runs.lock().unwrap().push(RunRecord {
            id: Uuid::new_v4(),
            run: record.clone(),
        });
        Ok(())
    }

    async fn recent_runs(&self, source_name: &str, limit: usize) -> Result<Vec<RunRecord>, AppError> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|r| r.run.source_name == source_name)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_active_postings(&self, filter: &PostingFilter) -> Result<Vec<JobPosting>, AppError> {
        let limit = if filter.limit == 0 { usize::MAX } else { filter.limit };
        Ok(self
            .postings
            .lock()
            .unwrap()
            .iter()
            .filter(|p| filter.matches(p))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn deactivate_posting(&self, application_url: &str) -> Result<bool, AppError> {
        let mut postings = self.postings.lock().unwrap();
        match postings
            .iter_mut()
            .find(|p| p.is_active && p.job.application_url == application_url)
        {
            Some(posting) => {
                posting.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter that records a short label per scheduler event.
#[derive(Clone, Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl SchedulerReporter for MockReporter {
    fn report(&self, event: SchedulerEvent<'_>) {
        let label = match event {
            SchedulerEvent::BatchStarted { planned, .. } => format!("batch_started:{planned}"),
            SchedulerEvent::SourceDispatched { name, .. } => format!("dispatched:{name}"),
            SchedulerEvent::SourceFinished { outcome } => {
                format!("finished:{}:{}", outcome.source_name, outcome.status)
            }
            SchedulerEvent::SourceErrored { name, .. } => format!("errored:{name}"),
            SchedulerEvent::RegistryWriteFailed { name, .. } => format!("write_failed:{name}"),
            SchedulerEvent::BatchFinished { report } => {
                format!("batch_finished:{}", report.outcomes.len())
            }
            SchedulerEvent::BatchFailed { .. } => "batch_failed".to_string(),
            SchedulerEvent::Pausing { .. } => "pausing".to_string(),
            SchedulerEvent::Stopped { batches } => format!("stopped:{batches}"),
        };
        self.events.lock().unwrap().push(label);
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// An active, never-checked source with the given tier.
pub fn make_source(name: &str, url: &str, tier: Tier) -> Source {
    NewSource::new(name, url)
        .with_tier(tier)
        .into_source(Utc::now())
}

/// A source previously classified with `ats_type` (not pinned).
pub fn make_classified_source(name: &str, url: &str, tier: Tier, ats_type: AtsType) -> Source {
    let mut source = make_source(name, url, tier);
    source.ats_type = Some(ats_type);
    source.ats_confidence = Some(crate::ats::Confidence::High);
    source
}

pub fn make_error_source(name: &str, url: &str, failures: u32) -> Source {
    let mut source = make_source(name, url, Tier::One);
    source.status = SourceStatus::Error;
    source.consecutive_failures = failures;
    source.last_checked_at = Some(Utc::now());
    source
}

pub fn pilot_job(title: &str, url: &str) -> RawJob {
    RawJob::new(title, url).with_location("Dubai, UAE")
}
