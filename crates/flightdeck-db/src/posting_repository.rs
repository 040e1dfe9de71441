use chrono::{DateTime, NaiveDate, Utc};
use flightdeck_core::ats::AtsType;
use flightdeck_core::error::{AppError, ExtractionKind};
use flightdeck_core::posting::{
    JobPosting, NormalizedJob, PositionCategory, PostingFilter, UpsertCounts,
};
use flightdeck_core::run::{NewRunRecord, RunRecord, RunStatus};
use flightdeck_core::source::Region;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use crate::convert::{from_i32, from_i64, parse_label, parse_optional, to_i32, to_i64};

const POSTING_COLUMNS: &str = r#"
    id, application_url, source_name, title, company, location, region, position,
    aircraft_type, contract_type, min_total_hours, min_pic_hours, min_type_hours,
    license_required, type_rating_required, type_rating_provided, is_entry_level,
    visa_sponsorship, description, date_posted, ats_type, is_active, date_scraped, created_at
"#;

const RUN_COLUMNS: &str = r#"
    id, source_id, source_name, ats_type, strategy, status, jobs_found, jobs_new,
    jobs_updated, duration_ms, error_kind, error_message, content_hash, started_at, completed_at
"#;

/// PostgreSQL-backed posting store and run log.
#[derive(Clone)]
pub struct PostingRepository {
    pool: Pool<Postgres>,
}

impl PostingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert a batch in one transaction, keyed on application URL.
    /// Existing rows are refreshed, re-activated and re-stamped.
    pub async fn upsert(&self, jobs: &[NormalizedJob]) -> Result<UpsertCounts, AppError> {
        let mut counts = UpsertCounts::default();
        if jobs.is_empty() {
            return Ok(counts);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        for job in jobs {
            // xmax is zero only on freshly inserted tuples.
            let (inserted,): (bool,) = sqlx::query_as(
                r#"
                INSERT INTO postings (
                    application_url, source_name, title, company, location, region, position,
                    aircraft_type, contract_type, min_total_hours, min_pic_hours, min_type_hours,
                    license_required, type_rating_required, type_rating_provided, is_entry_level,
                    visa_sponsorship, description, date_posted, ats_type
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                        $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
                ON CONFLICT (application_url) DO UPDATE SET
                    source_name = EXCLUDED.source_name,
                    title = EXCLUDED.title,
                    company = EXCLUDED.company,
                    location = EXCLUDED.location,
                    region = EXCLUDED.region,
                    position = EXCLUDED.position,
                    aircraft_type = EXCLUDED.aircraft_type,
                    contract_type = EXCLUDED.contract_type,
                    min_total_hours = EXCLUDED.min_total_hours,
                    min_pic_hours = EXCLUDED.min_pic_hours,
                    min_type_hours = EXCLUDED.min_type_hours,
                    license_required = EXCLUDED.license_required,
                    type_rating_required = EXCLUDED.type_rating_required,
                    type_rating_provided = EXCLUDED.type_rating_provided,
                    is_entry_level = EXCLUDED.is_entry_level,
                    visa_sponsorship = EXCLUDED.visa_sponsorship,
                    description = EXCLUDED.description,
                    date_posted = EXCLUDED.date_posted,
                    ats_type = EXCLUDED.ats_type,
                    is_active = TRUE,
                    date_scraped = NOW()
                RETURNING (xmax = 0)
                "#,
            )
            .bind(&job.application_url)
            .bind(&job.source_name)
            .bind(&job.title)
            .bind(&job.company)
            .bind(&job.location)
            .bind(job.region.as_str())
            .bind(job.position.as_str())
            .bind(&job.aircraft_type)
            .bind(&job.contract_type)
            .bind(job.min_total_hours.map(to_i32))
            .bind(job.min_pic_hours.map(to_i32))
            .bind(job.min_type_hours.map(to_i32))
            .bind(&job.license_required)
            .bind(job.type_rating_required)
            .bind(job.type_rating_provided)
            .bind(job.is_entry_level)
            .bind(job.visa_sponsorship)
            .bind(&job.description)
            .bind(job.date_posted)
            .bind(job.ats_type.map(|a| a.as_str()))
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

            if inserted {
                counts.inserted += 1;
            } else {
                counts.updated += 1;
            }
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(
            inserted = counts.inserted,
            updated = counts.updated,
            "Postings upserted"
        );
        Ok(counts)
    }

    pub async fn append_run(&self, record: &NewRunRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO scrape_runs (
                source_id, source_name, ats_type, strategy, status, jobs_found, jobs_new,
                jobs_updated, duration_ms, error_kind, error_message, content_hash,
                started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(record.source_id)
        .bind(&record.source_name)
        .bind(record.ats_type.as_str())
        .bind(&record.strategy)
        .bind(record.status.as_str())
        .bind(to_i32(record.jobs_found))
        .bind(to_i32(record.jobs_new))
        .bind(to_i32(record.jobs_updated))
        .bind(to_i64(record.duration_ms))
        .bind(record.error_kind.map(|k| k.as_str()))
        .bind(&record.error_message)
        .bind(&record.content_hash)
        .bind(record.started_at)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// Run history for a source, newest first.
    pub async fn recent(&self, source_name: &str, limit: usize) -> Result<Vec<RunRecord>, AppError> {
        let sql = format!(
            r#"
            SELECT {RUN_COLUMNS}
            FROM scrape_runs
            WHERE source_name = $1
            ORDER BY started_at DESC
            LIMIT $2
            "#
        );
        let rows = sqlx::query_as::<_, RunRow>(&sql)
            .bind(source_name)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(RunRecord::try_from).collect()
    }

    /// Active postings, most recently scraped first. A zero limit means
    /// no limit.
    pub async fn list_active(&self, filter: &PostingFilter) -> Result<Vec<JobPosting>, AppError> {
        let sql = format!(
            r#"
            SELECT {POSTING_COLUMNS}
            FROM postings
            WHERE is_active
              AND ($1::VARCHAR IS NULL OR region = $1)
              AND ($2::VARCHAR IS NULL OR position = $2)
              AND ($3::BOOLEAN IS NULL OR is_entry_level = $3)
              AND ($4::VARCHAR IS NULL OR source_name = $4)
            ORDER BY date_scraped DESC, title
            LIMIT $5
            "#
        );
        let limit = (filter.limit > 0).then(|| i64::try_from(filter.limit).unwrap_or(i64::MAX));
        let rows = sqlx::query_as::<_, PostingRow>(&sql)
            .bind(filter.region.map(|r| r.as_str()))
            .bind(filter.position.map(|p| p.as_str()))
            .bind(filter.entry_level)
            .bind(filter.source_name.as_deref())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(JobPosting::try_from).collect()
    }

    pub async fn deactivate(&self, application_url: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE postings SET is_active = FALSE WHERE application_url = $1 AND is_active",
        )
        .bind(application_url)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct PostingRow {
    id: Uuid,
    application_url: String,
    source_name: String,
    title: String,
    company: String,
    location: Option<String>,
    region: String,
    position: String,
    aircraft_type: Option<String>,
    contract_type: Option<String>,
    min_total_hours: Option<i32>,
    min_pic_hours: Option<i32>,
    min_type_hours: Option<i32>,
    license_required: Option<String>,
    type_rating_required: bool,
    type_rating_provided: bool,
    is_entry_level: bool,
    visa_sponsorship: bool,
    description: Option<String>,
    date_posted: Option<NaiveDate>,
    ats_type: Option<String>,
    is_active: bool,
    date_scraped: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PostingRow> for JobPosting {
    type Error = AppError;

    fn try_from(row: PostingRow) -> Result<Self, AppError> {
        let job = NormalizedJob {
            region: parse_label::<Region>("region", &row.region)?,
            position: parse_label::<PositionCategory>("position", &row.position)?,
            ats_type: parse_optional::<AtsType>("ats_type", row.ats_type.as_deref())?,
            application_url: row.application_url,
            source_name: row.source_name,
            title: row.title,
            company: row.company,
            location: row.location,
            aircraft_type: row.aircraft_type,
            contract_type: row.contract_type,
            min_total_hours: row.min_total_hours.map(from_i32),
            min_pic_hours: row.min_pic_hours.map(from_i32),
            min_type_hours: row.min_type_hours.map(from_i32),
            license_required: row.license_required,
            type_rating_required: row.type_rating_required,
            type_rating_provided: row.type_rating_provided,
            is_entry_level: row.is_entry_level,
            visa_sponsorship: row.visa_sponsorship,
            description: row.description,
            date_posted: row.date_posted,
        };

        Ok(JobPosting {
            id: row.id,
            job,
            is_active: row.is_active,
            date_scraped: row.date_scraped,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    source_id: Uuid,
    source_name: String,
    ats_type: String,
    strategy: Option<String>,
    status: String,
    jobs_found: i32,
    jobs_new: i32,
    jobs_updated: i32,
    duration_ms: i64,
    error_kind: Option<String>,
    error_message: Option<String>,
    content_hash: Option<String>,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
}

impl TryFrom<RunRow> for RunRecord {
    type Error = AppError;

    fn try_from(row: RunRow) -> Result<Self, AppError> {
        Ok(RunRecord {
            id: row.id,
            run: NewRunRecord {
                source_id: row.source_id,
                source_name: row.source_name,
                ats_type: parse_label::<AtsType>("ats_type", &row.ats_type)?,
                strategy: row.strategy,
                status: parse_label::<RunStatus>("status", &row.status)?,
                jobs_found: from_i32(row.jobs_found),
                jobs_new: from_i32(row.jobs_new),
                jobs_updated: from_i32(row.jobs_updated),
                duration_ms: from_i64(row.duration_ms),
                error_kind: parse_optional::<ExtractionKind>(
                    "error_kind",
                    row.error_kind.as_deref(),
                )?,
                error_message: row.error_message,
                content_hash: row.content_hash,
                started_at: row.started_at,
                completed_at: row.completed_at,
            },
        })
    }
}

// -- Trait implementation --

impl flightdeck_core::traits::JobStore for PostingRepository {
    async fn upsert_jobs(&self, jobs: &[NormalizedJob]) -> Result<UpsertCounts, AppError> {
        self.upsert(jobs).await
    }

    async fn append_run_log(&self, record: &NewRunRecord) -> Result<(), AppError> {
        self.append_run(record).await
    }

    async fn recent_runs(
        &self,
        source_name: &str,
        limit: usize,
    ) -> Result<Vec<RunRecord>, AppError> {
        self.recent(source_name, limit).await
    }

    async fn list_active_postings(
        &self,
        filter: &PostingFilter,
    ) -> Result<Vec<JobPosting>, AppError> {
        self.list_active(filter).await
    }

    async fn deactivate_posting(&self, application_url: &str) -> Result<bool, AppError> {
        self.deactivate(application_url).await
    }
}
