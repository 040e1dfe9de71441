use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::ats::{AtsType, Classification, ClassifierPolicy, classify, needs_reclassification};
use crate::error::{AppError, ExtractionKind};
use crate::normalize::{Normalizer, SourceContext};
use crate::posting::NormalizedJob;
use crate::run::{RunCounts, RunOutcome, RunStatus};
use crate::source::Source;
use crate::traits::{Fetcher, JobStore, ListingPage, NullJobStore, StrategySet};
use crate::util::compute_hash;

/// Per-source pipeline: fetch → classify → extract → normalize → persist → log.
///
/// Generic over all external dependencies via traits. `process_source`
/// never returns an error; every failure becomes a [`RunOutcome`] and
/// every attempt leaves a run record.
#[derive(Clone)]
pub struct Engine<F, S, J>
where
    F: Fetcher,
    S: StrategySet,
    J: JobStore,
{
    fetcher: F,
    strategies: S,
    store: J,
    normalizer: Normalizer,
    classifier: ClassifierPolicy,
    source_timeout: Duration,
    persist_retry_pause: Duration,
}

/// What the timed part of the pipeline produced.
struct Visit {
    status: RunStatus,
    ats_type: AtsType,
    strategy: Option<String>,
    classification: Option<Classification>,
    counts: RunCounts,
    error_kind: Option<ExtractionKind>,
    error: Option<String>,
    content_hash: Option<String>,
}

impl Visit {
    fn new(ats_type: AtsType) -> Self {
        Self {
            status: RunStatus::Success,
            ats_type,
            strategy: None,
            classification: None,
            counts: RunCounts::default(),
            error_kind: None,
            error: None,
            content_hash: None,
        }
    }

    fn fail(mut self, error: &AppError) -> Self {
        let kind = error.extraction_kind();
        self.status = match kind {
            ExtractionKind::Timeout => RunStatus::Timeout,
            _ => RunStatus::Failed,
        };
        self.error_kind = Some(kind);
        self.error = Some(error.to_string());
        self
    }
}

impl<F, S, J> Engine<F, S, J>
where
    F: Fetcher,
    S: StrategySet,
    J: JobStore,
{
    pub fn new(fetcher: F, strategies: S, store: J, normalizer: Normalizer) -> Self {
        Self {
            fetcher,
            strategies,
            store,
            normalizer,
            classifier: ClassifierPolicy::default(),
            source_timeout: Duration::from_secs(180),
            persist_retry_pause: Duration::from_secs(2),
        }
    }

    pub fn with_classifier_policy(mut self, policy: ClassifierPolicy) -> Self {
        self.classifier = policy;
        self
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn with_persist_retry_pause(mut self, pause: Duration) -> Self {
        self.persist_retry_pause = pause;
        self
    }

    /// Same pipeline, writing nowhere.
    pub fn dry_run(self) -> Engine<F, S, NullJobStore> {
        Engine {
            fetcher: self.fetcher,
            strategies: self.strategies,
            store: NullJobStore,
            normalizer: self.normalizer,
            classifier: self.classifier,
            source_timeout: self.source_timeout,
            persist_retry_pause: self.persist_retry_pause,
        }
    }

    pub fn store(&self) -> &J {
        &self.store
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Process one source end to end and log the run.
    pub async fn process_source(&self, source: &Source) -> RunOutcome {
        let started_at = Utc::now();
        let clock = Instant::now();
        let cached = source.ats_type.unwrap_or(AtsType::Unknown);

        tracing::info!(source = %source.name, url = %source.url, ats = %cached, "Processing source");

        let visit = match tokio::time::timeout(self.source_timeout, self.visit(source, cached)).await {
            Ok(visit) => visit,
            Err(_) => {
                let secs = self.source_timeout.as_secs();
                tracing::warn!(source = %source.name, timeout_secs = secs, "Source timed out");
                Visit::new(cached).fail(&AppError::Timeout(secs))
            }
        };

        let outcome = RunOutcome {
            source_id: source.id,
            source_name: source.name.clone(),
            status: visit.status,
            ats_type: visit.ats_type,
            strategy: visit.strategy,
            classification: visit.classification,
            empty: visit.status.is_healthy() && visit.counts.found == 0,
            counts: visit.counts,
            error_kind: visit.error_kind,
            error: visit.error,
            content_hash: visit.content_hash,
            started_at,
            completed_at: Utc::now(),
            duration: clock.elapsed(),
        };

        let record = outcome.to_record();
        if let Err(e) = self
            .with_retry("append_run_log", || self.store.append_run_log(&record))
            .await
        {
            tracing::error!(source = %source.name, error = %e, "Run record lost");
        }

        match outcome.status {
            RunStatus::Success | RunStatus::Partial => tracing::info!(
                source = %outcome.source_name,
                status = %outcome.status,
                ats = %outcome.ats_type,
                found = outcome.counts.found,
                new = outcome.counts.new,
                updated = outcome.counts.updated,
                rejected = outcome.counts.rejected,
                duration_ms = %outcome.duration.as_millis(),
                "Source processed"
            ),
            RunStatus::Failed | RunStatus::Timeout => tracing::warn!(
                source = %outcome.source_name,
                status = %outcome.status,
                ats = %outcome.ats_type,
                error = outcome.error.as_deref().unwrap_or_default(),
                "Source failed"
            ),
        }

        outcome
    }

    async fn visit(&self, source: &Source, cached: AtsType) -> Visit {
        let mut visit = Visit::new(cached);

        let body = match self.fetcher.fetch(&source.url).await {
            Ok(body) => body,
            Err(e) => return visit.fail(&e),
        };
        tracing::debug!(source = %source.name, bytes = body.len(), "Fetched listing page");
        visit.content_hash = Some(compute_hash(&body));

        if let Some(reason) = needs_reclassification(source, &self.classifier) {
            let classification = classify(&source.url, Some(&body));
            if classification.ats_type != cached {
                tracing::info!(
                    source = %source.name,
                    ?reason,
                    from = %cached,
                    to = %classification.ats_type,
                    confidence = %classification.confidence,
                    "Reclassified source"
                );
            }
            visit.ats_type = classification.ats_type;
            visit.classification = Some(classification);
        }

        let page = ListingPage {
            url: source.url.clone(),
            body,
        };
        let extracted = match self.strategies.extract(visit.ats_type, &page).await {
            Ok(extracted) => extracted,
            Err(e) if e.extraction_kind() == ExtractionKind::Empty => {
                tracing::info!(source = %source.name, reason = %e, "No records on listing");
                return visit;
            }
            Err(e) => return visit.fail(&e),
        };
        visit.strategy = Some(extracted.strategy.to_string());

        let ctx = SourceContext::for_source(source, visit.ats_type);
        let (jobs, rejected) = self.normalize_all(extracted.records, &ctx);
        visit.counts.found = u32::try_from(jobs.len()).unwrap_or(u32::MAX);
        visit.counts.rejected = rejected;

        if let Some(detail) = extracted.partial {
            visit.status = RunStatus::Partial;
            visit.error_kind = Some(ExtractionKind::Parse);
            visit.error = Some(detail);
        }

        if !jobs.is_empty() {
            match self
                .with_retry("upsert_jobs", || self.store.upsert_jobs(&jobs))
                .await
            {
                Ok(counts) => {
                    visit.counts.new = counts.inserted;
                    visit.counts.updated = counts.updated;
                }
                // A store hiccup is not the site's fault.
                Err(e) => {
                    visit.status = RunStatus::Partial;
                    visit.error = Some(format!("persistence failed: {e}"));
                }
            }
        }

        visit
    }

    /// Normalize a one-pass record stream, dropping rejects and
    /// duplicate application URLs within the run.
    fn normalize_all(
        &self,
        records: impl IntoIterator<Item = crate::posting::RawJob>,
        ctx: &SourceContext<'_>,
    ) -> (Vec<NormalizedJob>, u32) {
        let mut seen = HashSet::new();
        let mut jobs = Vec::new();
        let mut rejected = 0u32;
        for raw in records {
            match self.normalizer.normalize(raw, ctx) {
                Ok(job) if seen.insert(job.application_url.clone()) => jobs.push(job),
                Ok(job) => {
                    tracing::debug!(url = %job.application_url, "Duplicate record dropped");
                    rejected += 1;
                }
                Err(reason) => {
                    tracing::debug!(source = %ctx.source_name, %reason, "Record rejected");
                    rejected += 1;
                }
            }
        }
        (jobs, rejected)
    }

    /// Retry a persistence call once after a short pause.
    async fn with_retry<T, Fut>(&self, op: &str, call: impl Fn() -> Fut) -> Result<T, AppError>
    where
        Fut: Future<Output = Result<T, AppError>>,
    {
        match call().await {
            Ok(value) => Ok(value),
            Err(first) => {
                tracing::warn!(op, error = %first, "Persistence call failed, retrying once");
                tokio::time::sleep(self.persist_retry_pause).await;
                call().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ats::Confidence;
    use crate::normalize::NormalizationPolicy;
    use crate::posting::RawJob;
    use crate::source::{NewSource, Tier};
    use crate::testutil::*;

    const URL: &str = "https://careers.example-air.com/jobs";

    fn engine(
        fetcher: MockFetcher,
        strategies: MockStrategies,
        store: MemoryJobStore,
    ) -> Engine<MockFetcher, MockStrategies, MemoryJobStore> {
        Engine::new(
            fetcher,
            strategies,
            store,
            Normalizer::new(NormalizationPolicy::default()),
        )
        .with_persist_retry_pause(Duration::from_millis(1))
    }

    fn two_jobs() -> StrategyReply {
        StrategyReply::Records(vec![
            pilot_job("A320 Captain", "https://careers.example-air.com/jobs/1"),
            pilot_job("B777 First Officer", "https://careers.example-air.com/jobs/2"),
        ])
    }

    #[tokio::test]
    async fn happy_path_persists_and_logs() {
        let store = MemoryJobStore::new();
        let source = make_classified_source("Example Air", URL, Tier::One, AtsType::Taleo);
        let engine = engine(
            MockFetcher::new("<html>jobs</html>"),
            MockStrategies::new().for_type(AtsType::Taleo, two_jobs()),
            store.clone(),
        );

        let outcome = engine.process_source(&source).await;

        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.ats_type, AtsType::Taleo);
        assert_eq!(outcome.strategy.as_deref(), Some("mock"));
        assert_eq!(outcome.counts.found, 2);
        assert_eq!(outcome.counts.new, 2);
        assert!(!outcome.empty);
        assert!(outcome.classification.is_none());
        assert_eq!(outcome.content_hash.as_deref().map(str::len), Some(64));
        assert_eq!(store.postings().len(), 2);
        assert_eq!(store.runs().len(), 1);
        assert_eq!(store.runs()[0].run.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn second_identical_run_only_updates() {
        let store = MemoryJobStore::new();
        let source = make_classified_source("Example Air", URL, Tier::One, AtsType::Taleo);
        let engine = engine(
            MockFetcher::new("<html>jobs</html>"),
            MockStrategies::new().for_type(AtsType::Taleo, two_jobs()),
            store.clone(),
        );

        engine.process_source(&source).await;
        let second = engine.process_source(&source).await;

        assert_eq!(second.counts.new, 0);
        assert_eq!(second.counts.updated, 2);
        assert_eq!(store.postings().len(), 2);
        assert_eq!(store.runs().len(), 2);
    }

    #[tokio::test]
    async fn duplicates_and_junk_are_rejected_not_errors() {
        let store = MemoryJobStore::new();
        let source = make_classified_source("Example Air", URL, Tier::One, AtsType::Taleo);
        let records = vec![
            pilot_job("A320 Captain", "https://careers.example-air.com/jobs/1"),
            pilot_job("A320 Captain", "https://careers.example-air.com/jobs/1#apply"),
            pilot_job("Pilot FAQ", "https://careers.example-air.com/faq"),
            RawJob::new("", "https://careers.example-air.com/jobs/3"),
        ];
        let engine = engine(
            MockFetcher::new("<html>jobs</html>"),
            MockStrategies::new().for_type(AtsType::Taleo, StrategyReply::Records(records)),
            store.clone(),
        );

        let outcome = engine.process_source(&source).await;

        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.counts.found, 1);
        assert_eq!(outcome.counts.rejected, 3);
        assert_eq!(store.postings().len(), 1);
    }

    #[tokio::test]
    async fn fetch_error_becomes_failed_run() {
        let store = MemoryJobStore::new();
        let source = make_source("Example Air", URL, Tier::Two);
        let strategies = MockStrategies::new();
        let engine = engine(
            MockFetcher::with_error(AppError::NetworkError("connection refused".into())),
            strategies.clone(),
            store.clone(),
        );

        let outcome = engine.process_source(&source).await;

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.error_kind, Some(ExtractionKind::Network));
        assert!(outcome.error.unwrap().contains("connection refused"));
        assert!(strategies.dispatched().is_empty());
        assert_eq!(store.runs().len(), 1);
        assert_eq!(store.runs()[0].run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn hung_fetch_times_out_and_is_logged() {
        let store = MemoryJobStore::new();
        let source = make_source("Slow Air", URL, Tier::One);
        let engine = engine(MockFetcher::new("").hang(URL), MockStrategies::new(), store.clone())
            .with_source_timeout(Duration::from_millis(50));

        let outcome = engine.process_source(&source).await;

        assert_eq!(outcome.status, RunStatus::Timeout);
        assert_eq!(outcome.error_kind, Some(ExtractionKind::Timeout));
        assert_eq!(store.runs().len(), 1);
        assert_eq!(store.runs()[0].run.status, RunStatus::Timeout);
    }

    #[tokio::test]
    async fn parse_failure_is_failed_and_empty_is_success() {
        let source = make_classified_source("Example Air", URL, Tier::One, AtsType::Lever);

        let broken = engine(
            MockFetcher::new("{}"),
            MockStrategies::new().for_type(
                AtsType::Lever,
                StrategyReply::Fail(ExtractionKind::Parse, "unexpected payload".into()),
            ),
            MemoryJobStore::new(),
        );
        let outcome = broken.process_source(&source).await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.error_kind, Some(ExtractionKind::Parse));

        let empty = engine(
            MockFetcher::new("{}"),
            MockStrategies::new().for_type(
                AtsType::Lever,
                StrategyReply::Fail(ExtractionKind::Empty, "no postings".into()),
            ),
            MemoryJobStore::new(),
        );
        let outcome = empty.process_source(&source).await;
        assert_eq!(outcome.status, RunStatus::Success);
        assert!(outcome.empty);
        assert_eq!(outcome.counts.found, 0);
    }

    #[tokio::test]
    async fn partial_extraction_keeps_records() {
        let store = MemoryJobStore::new();
        let source = make_classified_source("Example Air", URL, Tier::One, AtsType::Workday);
        let engine = engine(
            MockFetcher::new("<html></html>"),
            MockStrategies::new().for_type(
                AtsType::Workday,
                StrategyReply::Partial(
                    vec![pilot_job("Cadet Pilot", "https://careers.example-air.com/jobs/9")],
                    "page 2: HTTP 500".into(),
                ),
            ),
            store.clone(),
        );

        let outcome = engine.process_source(&source).await;

        assert_eq!(outcome.status, RunStatus::Partial);
        assert_eq!(outcome.counts.new, 1);
        assert_eq!(outcome.error.as_deref(), Some("page 2: HTTP 500"));
        assert_eq!(store.postings().len(), 1);
    }

    #[tokio::test]
    async fn persistence_is_retried_once() {
        let store = MemoryJobStore::new().failing_upserts(1).failing_logs(1);
        let source = make_classified_source("Example Air", URL, Tier::One, AtsType::Taleo);
        let engine = engine(
            MockFetcher::new("<html></html>"),
            MockStrategies::new().for_type(AtsType::Taleo, two_jobs()),
            store.clone(),
        );

        let outcome = engine.process_source(&source).await;

        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.counts.new, 2);
        assert_eq!(store.runs().len(), 1);
    }

    #[tokio::test]
    async fn persistent_store_failure_is_partial_not_failed() {
        let store = MemoryJobStore::new().failing_upserts(2);
        let source = make_classified_source("Example Air", URL, Tier::One, AtsType::Taleo);
        let engine = engine(
            MockFetcher::new("<html></html>"),
            MockStrategies::new().for_type(AtsType::Taleo, two_jobs()),
            store.clone(),
        );

        let outcome = engine.process_source(&source).await;

        assert_eq!(outcome.status, RunStatus::Partial);
        assert!(outcome.status.is_healthy());
        assert!(outcome.error.unwrap().starts_with("persistence failed"));
        assert!(store.postings().is_empty());
        assert_eq!(store.runs().len(), 1);
    }

    #[tokio::test]
    async fn unknown_source_is_reclassified_from_url() {
        let url = "https://acme.wd3.myworkdayjobs.com/en-US/Pilots";
        let mut source = make_source("Acme Air", url, Tier::One);
        source.ats_type = Some(AtsType::Unknown);
        source.ats_confidence = Some(Confidence::Low);
        let strategies = MockStrategies::new().for_type(
            AtsType::Workday,
            StrategyReply::Records(vec![pilot_job("Captain A330", "https://acme.example/jobs/1")]),
        );
        let engine = engine(
            MockFetcher::new("<html></html>"),
            strategies.clone(),
            MemoryJobStore::new(),
        );

        let outcome = engine.process_source(&source).await;

        assert_eq!(strategies.dispatched(), vec![AtsType::Workday]);
        assert_eq!(outcome.ats_type, AtsType::Workday);
        let classification = outcome.classification.unwrap();
        assert_eq!(classification.confidence, Confidence::High);
        assert_eq!(outcome.counts.found, 1);
    }

    #[tokio::test]
    async fn pinned_type_is_never_reclassified() {
        let source = NewSource::new("Pinned", "https://jobs.lever.co/pinned")
            .with_tier(Tier::One)
            .with_ats_type(AtsType::CustomFallback)
            .into_source(Utc::now());
        let strategies = MockStrategies::new();
        let engine = engine(
            MockFetcher::new("<html></html>"),
            strategies.clone(),
            MemoryJobStore::new(),
        );

        let outcome = engine.process_source(&source).await;

        assert_eq!(strategies.dispatched(), vec![AtsType::CustomFallback]);
        assert!(outcome.classification.is_none());
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let store = MemoryJobStore::new();
        let source = make_classified_source("Example Air", URL, Tier::One, AtsType::Taleo);
        let engine = engine(
            MockFetcher::new("<html></html>"),
            MockStrategies::new().for_type(AtsType::Taleo, two_jobs()),
            store.clone(),
        )
        .dry_run();

        let outcome = engine.process_source(&source).await;

        assert_eq!(outcome.counts.new, 2);
        assert!(store.postings().is_empty());
        assert!(store.runs().is_empty());
    }
}
