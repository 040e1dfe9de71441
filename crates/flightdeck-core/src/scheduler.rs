//! Smart queue: picks due sources, runs them through the [`Engine`] with a
//! concurrency bound and dispatch pacing, and writes each source's schedule
//! and health transition back to the registry.
//!
//! The batch is the unit of work. `run_forever` only repeats it with a
//! pause in between.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::error::AppError;
use crate::run::{RunOutcome, RunStatus};
use crate::source::{RegistryStats, Source, SourcePatch, SourceStatus, Tier};
use crate::traits::{Fetcher, JobStore, SourceRegistry, StrategySet};

/// Error sources with this many failures are no longer retried automatically.
pub const ERROR_RETRY_LIMIT: u32 = 10;

const MAX_CONCURRENCY: usize = 9;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Sources in flight at once, 1..=9.
    pub concurrency: usize,
    /// Minimum gap between two dispatches.
    pub dispatch_delay: Duration,
    pub source_timeout: Duration,
    /// Pause after a batch that processed something.
    pub batch_pause: Duration,
    /// Pause after a batch that found nothing due.
    pub idle_pause: Duration,
    pub batch_size: Option<usize>,
    pub failure_threshold: u32,
    pub tier: Option<Tier>,
    pub retry_errors: bool,
    pub dry_run: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            dispatch_delay: Duration::from_secs(10),
            source_timeout: Duration::from_secs(180),
            batch_pause: Duration::from_secs(60),
            idle_pause: Duration::from_secs(300),
            batch_size: None,
            failure_threshold: 5,
            tier: None,
            retry_errors: false,
            dry_run: false,
        }
    }
}

impl SchedulerConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, MAX_CONCURRENCY);
        self
    }

    pub fn with_dispatch_delay(mut self, delay: Duration) -> Self {
        self.dispatch_delay = delay;
        self
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn with_pauses(mut self, batch_pause: Duration, idle_pause: Duration) -> Self {
        self.batch_pause = batch_pause;
        self.idle_pause = idle_pause;
        self
    }

    pub fn with_batch_size(mut self, size: Option<usize>) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_tier(mut self, tier: Option<Tier>) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_retry_errors(mut self, retry_errors: bool) -> Self {
        self.retry_errors = retry_errors;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Active and past its revisit interval.
pub fn is_due(source: &Source, now: DateTime<Utc>) -> bool {
    source.status == SourceStatus::Active
        && source
            .last_checked_at
            .is_none_or(|checked| now - checked >= source.frequency())
}

/// Due, or (in retry-errors mode) an error source still under the give-up cap.
pub fn is_eligible(source: &Source, include_errors: bool, now: DateTime<Utc>) -> bool {
    is_due(source, now)
        || (include_errors
            && source.status == SourceStatus::Error
            && source.consecutive_failures < ERROR_RETRY_LIMIT)
}

/// Select and order one batch: tier ascending, then longest overdue first
/// (never-checked sources lead).
pub fn plan_batch(sources: Vec<Source>, config: &SchedulerConfig, now: DateTime<Utc>) -> Vec<Source> {
    let mut batch: Vec<Source> = sources
        .into_iter()
        .filter(|s| config.tier.is_none_or(|t| t == s.tier))
        .filter(|s| is_eligible(s, config.retry_errors, now))
        .collect();
    batch.sort_by_key(|s| (s.tier.as_u8(), s.next_due_at()));
    if let Some(size) = config.batch_size {
        batch.truncate(size);
    }
    batch
}

/// Registry update produced by one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub patch: SourcePatch,
    /// The run pushed the source over the failure threshold.
    pub became_error: bool,
}

/// Schedule and health transition for `source` after `outcome`.
pub fn apply_outcome(
    source: &Source,
    outcome: &RunOutcome,
    failure_threshold: u32,
    now: DateTime<Utc>,
) -> Transition {
    let mut patch = SourcePatch {
        last_checked_at: Some(now),
        last_error: Some(outcome.error.clone()),
        ..SourcePatch::default()
    };
    if let Some(classification) = outcome.classification {
        patch.ats_type = Some(classification.ats_type);
        patch.ats_confidence = Some(classification.confidence);
    }

    if outcome.status.is_healthy() {
        patch.consecutive_failures = Some(0);
        patch.last_success_at = Some(now);
        if source.status == SourceStatus::Error {
            patch.status = Some(SourceStatus::Active);
        }
        patch.consecutive_empty_runs = Some(if outcome.empty {
            source.consecutive_empty_runs.saturating_add(1)
        } else {
            0
        });
        patch.jobs_found_last_run = Some(outcome.counts.found);
        patch.total_jobs_found =
            Some(source.total_jobs_found + u64::from(outcome.counts.new));
        return Transition {
            patch,
            became_error: false,
        };
    }

    let failures = source.consecutive_failures.saturating_add(1);
    patch.consecutive_failures = Some(failures);
    // Only active sources are flagged; manual states are left alone.
    let became_error = failures >= failure_threshold && source.status == SourceStatus::Active;
    if became_error {
        patch.status = Some(SourceStatus::Error);
    }
    Transition {
        patch,
        became_error,
    }
}

/// One source's result within a batch.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub outcome: RunOutcome,
    pub patch: SourcePatch,
    pub became_error: bool,
}

/// Explicit result of one batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<SourceReport>,
    pub succeeded: u32,
    pub partial: u32,
    pub failed: u32,
    pub timed_out: u32,
    pub jobs_found: u32,
    pub jobs_new: u32,
    pub jobs_updated: u32,
    pub dry_run: bool,
    pub duration_ms: u64,
}

impl BatchReport {
    fn new(outcomes: Vec<SourceReport>, dry_run: bool, duration: Duration) -> Self {
        let mut report = BatchReport {
            dry_run,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            ..BatchReport::default()
        };
        for source in &outcomes {
            let outcome = &source.outcome;
            match outcome.status {
                RunStatus::Success => report.succeeded += 1,
                RunStatus::Partial => report.partial += 1,
                RunStatus::Failed => report.failed += 1,
                RunStatus::Timeout => report.timed_out += 1,
            }
            report.jobs_found += outcome.counts.found;
            report.jobs_new += outcome.counts.new;
            report.jobs_updated += outcome.counts.updated;
        }
        report.outcomes = outcomes;
        report
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Names of sources this batch flagged as `error`.
    pub fn newly_errored(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|r| r.became_error)
            .map(|r| r.outcome.source_name.as_str())
    }
}

/// Events emitted by the scheduler for monitoring/logging.
#[derive(Debug, Clone)]
pub enum SchedulerEvent<'a> {
    BatchStarted {
        due: usize,
        planned: usize,
        dry_run: bool,
    },
    SourceDispatched {
        name: &'a str,
        tier: Tier,
    },
    SourceFinished {
        outcome: &'a RunOutcome,
    },
    SourceErrored {
        name: &'a str,
        failures: u32,
    },
    RegistryWriteFailed {
        name: &'a str,
        error: &'a AppError,
    },
    BatchFinished {
        report: &'a BatchReport,
    },
    BatchFailed {
        error: &'a AppError,
    },
    Pausing {
        pause: Duration,
    },
    Stopped {
        batches: u64,
    },
}

/// Trait for receiving scheduler events (decoupled logging).
pub trait SchedulerReporter: Send + Sync {
    fn report(&self, event: SchedulerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSchedulerReporter;

impl SchedulerReporter for TracingSchedulerReporter {
    fn report(&self, event: SchedulerEvent<'_>) {
        match event {
            SchedulerEvent::BatchStarted {
                due,
                planned,
                dry_run,
            } => {
                tracing::info!(due, planned, dry_run, "Batch started");
            }
            SchedulerEvent::SourceDispatched { name, tier } => {
                tracing::debug!(source = %name, %tier, "Dispatching source");
            }
            SchedulerEvent::SourceFinished { outcome } => {
                tracing::debug!(source = %outcome.source_name, status = %outcome.status, "Source finished");
            }
            SchedulerEvent::SourceErrored { name, failures } => {
                tracing::warn!(source = %name, failures, "Source flagged as error");
            }
            SchedulerEvent::RegistryWriteFailed { name, error } => {
                tracing::error!(source = %name, %error, "Failed to update source");
            }
            SchedulerEvent::BatchFinished { report } => {
                tracing::info!(
                    sources = report.outcomes.len(),
                    succeeded = report.succeeded,
                    partial = report.partial,
                    failed = report.failed,
                    timed_out = report.timed_out,
                    jobs_new = report.jobs_new,
                    jobs_updated = report.jobs_updated,
                    duration_ms = report.duration_ms,
                    "Batch finished"
                );
            }
            SchedulerEvent::BatchFailed { error } => {
                tracing::error!(%error, "Batch could not start");
            }
            SchedulerEvent::Pausing { pause } => {
                tracing::debug!(pause_secs = pause.as_secs(), "Pausing");
            }
            SchedulerEvent::Stopped { batches } => {
                tracing::info!(batches, "Scheduler stopped");
            }
        }
    }
}

/// Batch scheduler over a source registry and an engine.
pub struct SmartQueue<R, F, S, J>
where
    R: SourceRegistry,
    F: Fetcher,
    S: StrategySet,
    J: JobStore,
{
    registry: R,
    engine: Engine<F, S, J>,
    config: SchedulerConfig,
}

impl<R, F, S, J> SmartQueue<R, F, S, J>
where
    R: SourceRegistry,
    F: Fetcher,
    S: StrategySet,
    J: JobStore,
{
    pub fn new(registry: R, engine: Engine<F, S, J>, config: SchedulerConfig) -> Self {
        let engine = engine.with_source_timeout(config.source_timeout);
        Self {
            registry,
            engine,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> Result<RegistryStats, AppError> {
        self.registry.stats(now).await
    }

    /// Run one batch over every eligible source.
    pub async fn run_batch<SR: SchedulerReporter>(
        &self,
        reporter: &SR,
    ) -> Result<BatchReport, AppError> {
        self.run_batch_with(&self.config, reporter).await
    }

    async fn run_batch_with<SR: SchedulerReporter>(
        &self,
        config: &SchedulerConfig,
        reporter: &SR,
    ) -> Result<BatchReport, AppError> {
        let started = Instant::now();
        let now = Utc::now();
        let due = self
            .registry
            .list_due_sources(config.tier, config.retry_errors, now)
            .await?;
        let due_count = due.len();
        let mut pending: VecDeque<Source> = plan_batch(due, config, now).into();

        reporter.report(SchedulerEvent::BatchStarted {
            due: due_count,
            planned: pending.len(),
            dry_run: config.dry_run,
        });

        let limit = config.concurrency.clamp(1, MAX_CONCURRENCY);
        let mut in_flight = FuturesUnordered::new();
        let mut reports = Vec::with_capacity(pending.len());
        let mut next_dispatch = Instant::now();

        loop {
            if in_flight.len() < limit && Instant::now() >= next_dispatch {
                if let Some(source) = pending.pop_front() {
                    reporter.report(SchedulerEvent::SourceDispatched {
                        name: &source.name,
                        tier: source.tier,
                    });
                    in_flight.push(self.run_one(source, reporter));
                    next_dispatch = Instant::now() + config.dispatch_delay;
                    continue;
                }
            }
            if in_flight.is_empty() && pending.is_empty() {
                break;
            }

            let can_dispatch = in_flight.len() < limit && !pending.is_empty();
            tokio::select! {
                Some(report) = in_flight.next(), if !in_flight.is_empty() => reports.push(report),
                () = tokio::time::sleep_until(next_dispatch), if can_dispatch => {}
            }
        }

        let report = BatchReport::new(reports, config.dry_run, started.elapsed());
        reporter.report(SchedulerEvent::BatchFinished { report: &report });
        Ok(report)
    }

    /// Process one named source outside the due schedule.
    pub async fn run_source<SR: SchedulerReporter>(
        &self,
        name: &str,
        reporter: &SR,
    ) -> Result<SourceReport, AppError> {
        let source = self
            .registry
            .get_source(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("source '{name}'")))?;
        Ok(self.run_one(source, reporter).await)
    }

    /// Repeat batches until `cancel` fires. Cancellation is honoured
    /// between batches and during pauses. Retry-errors mode only applies
    /// to the first batch.
    pub async fn run_forever<SR: SchedulerReporter>(
        &self,
        cancel: CancellationToken,
        reporter: &SR,
    ) -> Result<(), AppError> {
        let mut config = self.config.clone();
        let mut batches = 0u64;
        while !cancel.is_cancelled() {
            let result = self.run_batch_with(&config, reporter).await;
            config.retry_errors = false;
            let pause = match result {
                Ok(report) => {
                    batches += 1;
                    if report.is_empty() {
                        self.config.idle_pause
                    } else {
                        self.config.batch_pause
                    }
                }
                Err(error) => {
                    reporter.report(SchedulerEvent::BatchFailed { error: &error });
                    self.config.idle_pause
                }
            };

            reporter.report(SchedulerEvent::Pausing { pause });
            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                () = cancel.cancelled() => break,
            }
        }

        reporter.report(SchedulerEvent::Stopped { batches });
        Ok(())
    }

    async fn run_one<SR: SchedulerReporter>(&self, source: Source, reporter: &SR) -> SourceReport {
        let outcome = self.engine.process_source(&source).await;
        reporter.report(SchedulerEvent::SourceFinished { outcome: &outcome });

        let transition = apply_outcome(&source, &outcome, self.config.failure_threshold, Utc::now());
        if transition.became_error {
            reporter.report(SchedulerEvent::SourceErrored {
                name: &source.name,
                failures: transition
                    .patch
                    .consecutive_failures
                    .unwrap_or(source.consecutive_failures),
            });
        }

        if !self.config.dry_run {
            if let Err(error) = self
                .registry
                .update_source(&source.name, &transition.patch)
                .await
            {
                reporter.report(SchedulerEvent::RegistryWriteFailed {
                    name: &source.name,
                    error: &error,
                });
            }
        }

        SourceReport {
            outcome,
            patch: transition.patch,
            became_error: transition.became_error,
        }
    }
}
