use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use flightdeck_core::posting::JobPosting;
use flightdeck_core::run::RunRecord;
use flightdeck_core::scheduler::SourceReport;
use flightdeck_core::source::{RegistryStats, Source};

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListSourcesQuery {
    /// active, inactive, error or pending_review
    pub status: Option<String>,
    /// 1, 2 or 3
    pub tier: Option<u8>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SourceResponse {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub ats_type: Option<String>,
    pub ats_confidence: Option<String>,
    pub ats_override: bool,
    pub tier: u8,
    pub frequency_hours: u32,
    pub status: String,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub next_due_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub consecutive_empty_runs: u32,
    pub last_error: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub iata_code: Option<String>,
    pub icao_code: Option<String>,
    pub jobs_found_last_run: u32,
    pub total_jobs_found: u64,
}

impl From<Source> for SourceResponse {
    fn from(source: Source) -> Self {
        Self {
            next_due_at: source.next_due_at(),
            id: source.id,
            ats_type: source.ats_type.map(|a| a.to_string()),
            ats_confidence: source.ats_confidence.map(|c| c.to_string()),
            ats_override: source.ats_override,
            tier: source.tier.as_u8(),
            frequency_hours: source.frequency_hours,
            status: source.status.to_string(),
            last_checked_at: source.last_checked_at,
            last_success_at: source.last_success_at,
            consecutive_failures: source.consecutive_failures,
            consecutive_empty_runs: source.consecutive_empty_runs,
            last_error: source.last_error,
            region: source.region.map(|r| r.to_string()),
            country: source.country,
            iata_code: source.iata_code,
            icao_code: source.icao_code,
            jobs_found_last_run: source.jobs_found_last_run,
            total_jobs_found: source.total_jobs_found,
            name: source.name,
            url: source.url,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SourceListResponse {
    pub sources: Vec<SourceResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StatsResponse {
    pub total: u64,
    pub due: u64,
    /// Source counts keyed by tier number.
    pub by_tier: std::collections::BTreeMap<String, u64>,
    pub by_status: std::collections::BTreeMap<String, u64>,
    pub batch_running: bool,
}

impl StatsResponse {
    pub fn new(stats: RegistryStats, batch_running: bool) -> Self {
        Self {
            total: stats.total,
            due: stats.due,
            by_tier: stats
                .by_tier
                .into_iter()
                .map(|(tier, count)| (tier.to_string(), count))
                .collect(),
            by_status: stats.by_status,
            batch_running,
        }
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListRunsQuery {
    /// Maximum records (default 20, max 200)
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RunResponse {
    pub id: Uuid,
    pub source_name: String,
    pub ats_type: String,
    pub strategy: Option<String>,
    pub status: String,
    pub jobs_found: u32,
    pub jobs_new: u32,
    pub jobs_updated: u32,
    pub duration_ms: u64,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl From<RunRecord> for RunResponse {
    fn from(record: RunRecord) -> Self {
        let run = record.run;
        Self {
            id: record.id,
            source_name: run.source_name,
            ats_type: run.ats_type.to_string(),
            strategy: run.strategy,
            status: run.status.to_string(),
            jobs_found: run.jobs_found,
            jobs_new: run.jobs_new,
            jobs_updated: run.jobs_updated,
            duration_ms: run.duration_ms,
            error_kind: run.error_kind.map(|k| k.to_string()),
            error_message: run.error_message,
            started_at: run.started_at,
            completed_at: run.completed_at,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RunListResponse {
    pub runs: Vec<RunResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Scrape & batches
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct ScrapeQuery {
    /// Run the pipeline without writing postings, run logs or source state
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ScrapeResponse {
    pub source_name: String,
    pub status: String,
    pub ats_type: String,
    pub strategy: Option<String>,
    pub jobs_found: u32,
    pub jobs_new: u32,
    pub jobs_updated: u32,
    pub jobs_rejected: u32,
    pub error: Option<String>,
    pub duration_ms: u64,
    /// The run pushed the source into error state.
    pub became_error: bool,
    pub dry_run: bool,
}

impl ScrapeResponse {
    pub fn new(report: SourceReport, dry_run: bool) -> Self {
        let outcome = report.outcome;
        Self {
            source_name: outcome.source_name,
            status: outcome.status.to_string(),
            ats_type: outcome.ats_type.to_string(),
            strategy: outcome.strategy,
            jobs_found: outcome.counts.found,
            jobs_new: outcome.counts.new,
            jobs_updated: outcome.counts.updated,
            jobs_rejected: outcome.counts.rejected,
            error: outcome.error,
            duration_ms: u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
            became_error: report.became_error,
            dry_run,
        }
    }
}

#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct BatchQuery {
    #[serde(default)]
    pub dry_run: bool,
    /// Only process sources of this tier
    pub tier: Option<u8>,
    /// Also retry sources in error state
    #[serde(default)]
    pub retry_errors: bool,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BatchAcceptedResponse {
    pub status: &'static str,
    pub dry_run: bool,
    pub tier: Option<u8>,
    pub retry_errors: bool,
}

// ---------------------------------------------------------------------------
// Postings
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListPostingsQuery {
    pub region: Option<String>,
    pub position: Option<String>,
    pub entry_level: Option<bool>,
    pub source: Option<String>,
    /// Maximum records (default 50, max 500)
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PostingResponse {
    pub id: Uuid,
    pub title: String,
    pub company: String,
    pub source_name: String,
    pub location: Option<String>,
    pub region: String,
    pub position: String,
    pub aircraft_type: Option<String>,
    pub contract_type: Option<String>,
    pub min_total_hours: Option<u32>,
    pub min_pic_hours: Option<u32>,
    pub min_type_hours: Option<u32>,
    pub license_required: Option<String>,
    pub type_rating_required: bool,
    pub type_rating_provided: bool,
    pub is_entry_level: bool,
    pub visa_sponsorship: bool,
    pub date_posted: Option<NaiveDate>,
    pub date_scraped: DateTime<Utc>,
    pub application_url: String,
}

impl From<JobPosting> for PostingResponse {
    fn from(posting: JobPosting) -> Self {
        let job = posting.job;
        Self {
            id: posting.id,
            title: job.title,
            company: job.company,
            source_name: job.source_name,
            location: job.location,
            region: job.region.to_string(),
            position: job.position.to_string(),
            aircraft_type: job.aircraft_type,
            contract_type: job.contract_type,
            min_total_hours: job.min_total_hours,
            min_pic_hours: job.min_pic_hours,
            min_type_hours: job.min_type_hours,
            license_required: job.license_required,
            type_rating_required: job.type_rating_required,
            type_rating_provided: job.type_rating_provided,
            is_entry_level: job.is_entry_level,
            visa_sponsorship: job.visa_sponsorship,
            date_posted: job.date_posted,
            date_scraped: posting.date_scraped,
            application_url: job.application_url,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PostingListResponse {
    pub postings: Vec<PostingResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
