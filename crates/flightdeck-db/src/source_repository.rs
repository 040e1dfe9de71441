use chrono::{DateTime, Utc};
use flightdeck_core::ats::{AtsType, Confidence};
use flightdeck_core::error::AppError;
use flightdeck_core::scheduler::ERROR_RETRY_LIMIT;
use flightdeck_core::source::{
    NewSource, Region, RegistryStats, Source, SourceFilter, SourcePatch, SourceStatus, Tier,
};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use crate::convert::{from_i32, from_i64, parse_label, parse_optional, to_i32, to_i64};

const SOURCE_COLUMNS: &str = r#"
    id, name, url, ats_type, ats_confidence, ats_override, tier, frequency_hours,
    last_checked_at, last_success_at, status, consecutive_failures, consecutive_empty_runs,
    last_error, region, country, iata_code, icao_code, discovered_via,
    jobs_found_last_run, total_jobs_found, created_at, updated_at
"#;

/// PostgreSQL-backed source registry.
#[derive(Clone)]
pub struct SourceRepository {
    pool: Pool<Postgres>,
}

impl SourceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Eligible sources ordered by tier, then most overdue first
    /// (never-checked sources lead).
    pub async fn list_due(
        &self,
        tier: Option<Tier>,
        include_errors: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<Source>, AppError> {
        let sql = format!(
            r#"
            SELECT {SOURCE_COLUMNS}
            FROM sources
            WHERE ($1::SMALLINT IS NULL OR tier = $1)
              AND (
                (status = 'active'
                  AND (last_checked_at IS NULL
                       OR last_checked_at + make_interval(hours => frequency_hours) <= $2))
                OR ($3 AND status = 'error' AND consecutive_failures < $4)
              )
            ORDER BY tier,
                     last_checked_at + make_interval(hours => frequency_hours) ASC NULLS FIRST,
                     name
            "#
        );
        let rows = sqlx::query_as::<_, SourceRow>(&sql)
            .bind(tier.map(|t| i16::from(t.as_u8())))
            .bind(now)
            .bind(include_errors)
            .bind(to_i32(ERROR_RETRY_LIMIT))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(Source::try_from).collect()
    }

    pub async fn list(&self, filter: SourceFilter) -> Result<Vec<Source>, AppError> {
        let sql = format!(
            r#"
            SELECT {SOURCE_COLUMNS}
            FROM sources
            WHERE ($1::VARCHAR IS NULL OR status = $1)
              AND ($2::SMALLINT IS NULL OR tier = $2)
            ORDER BY tier, name
            "#
        );
        let rows = sqlx::query_as::<_, SourceRow>(&sql)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.tier.map(|t| i16::from(t.as_u8())))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(Source::try_from).collect()
    }

    pub async fn get(&self, name: &str) -> Result<Option<Source>, AppError> {
        let sql = format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE name = $1");
        let row = sqlx::query_as::<_, SourceRow>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(Source::try_from).transpose()
    }

    /// Insert by name, or refresh the descriptive fields of an existing row.
    /// Schedule, health and classification state are left alone.
    pub async fn upsert(&self, source: NewSource) -> Result<Source, AppError> {
        let s = source.into_source(Utc::now());
        let sql = format!(
            r#"
            INSERT INTO sources (
                id, name, url, ats_type, ats_confidence, ats_override, tier, frequency_hours,
                status, region, country, iata_code, icao_code, discovered_via, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15)
            ON CONFLICT (name) DO UPDATE SET
                url = EXCLUDED.url,
                region = COALESCE(EXCLUDED.region, sources.region),
                country = COALESCE(EXCLUDED.country, sources.country),
                iata_code = COALESCE(EXCLUDED.iata_code, sources.iata_code),
                icao_code = COALESCE(EXCLUDED.icao_code, sources.icao_code),
                discovered_via = COALESCE(sources.discovered_via, EXCLUDED.discovered_via),
                updated_at = EXCLUDED.updated_at
            RETURNING {SOURCE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, SourceRow>(&sql)
            .bind(s.id)
            .bind(&s.name)
            .bind(&s.url)
            .bind(s.ats_type.map(|a| a.as_str()))
            .bind(s.ats_confidence.map(|c| c.as_str()))
            .bind(s.ats_override)
            .bind(i16::from(s.tier.as_u8()))
            .bind(to_i32(s.frequency_hours))
            .bind(s.status.as_str())
            .bind(s.region.map(|r| r.as_str()))
            .bind(&s.country)
            .bind(&s.iata_code)
            .bind(&s.icao_code)
            .bind(&s.discovered_via)
            .bind(s.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Source::try_from(row)
    }

    /// Apply a partial update. Unset patch fields keep their column value.
    pub async fn update(&self, name: &str, patch: &SourcePatch) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE sources SET
                ats_type = COALESCE($2, ats_type),
                ats_confidence = COALESCE($3, ats_confidence),
                ats_override = COALESCE($4, ats_override),
                tier = COALESCE($5, tier),
                frequency_hours = COALESCE($6, frequency_hours),
                status = COALESCE($7, status),
                consecutive_failures = COALESCE($8, consecutive_failures),
                consecutive_empty_runs = COALESCE($9, consecutive_empty_runs),
                last_checked_at = COALESCE($10, last_checked_at),
                last_success_at = COALESCE($11, last_success_at),
                last_error = CASE WHEN $12 THEN $13 ELSE last_error END,
                jobs_found_last_run = COALESCE($14, jobs_found_last_run),
                total_jobs_found = COALESCE($15, total_jobs_found),
                updated_at = NOW()
            WHERE name = $1
            "#,
        )
        .bind(name)
        .bind(patch.ats_type.map(|a| a.as_str()))
        .bind(patch.ats_confidence.map(|c| c.as_str()))
        .bind(patch.ats_override)
        .bind(patch.tier.map(|t| i16::from(t.as_u8())))
        .bind(patch.frequency_hours.map(to_i32))
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.consecutive_failures.map(to_i32))
        .bind(patch.consecutive_empty_runs.map(to_i32))
        .bind(patch.last_checked_at)
        .bind(patch.last_success_at)
        .bind(patch.last_error.is_some())
        .bind(patch.last_error.clone().flatten())
        .bind(patch.jobs_found_last_run.map(to_i32))
        .bind(patch.total_jobs_found.map(to_i64))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("source {name}")));
        }
        Ok(())
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> Result<RegistryStats, AppError> {
        let rows: Vec<(i16, String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT tier, status, COUNT(*),
                   COUNT(*) FILTER (
                       WHERE status = 'active'
                         AND (last_checked_at IS NULL
                              OR last_checked_at + make_interval(hours => frequency_hours) <= $1)
                   )
            FROM sources
            GROUP BY tier, status
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let mut stats = RegistryStats::default();
        for (tier, status, count, due) in rows {
            let count = from_i64(count);
            stats.total += count;
            *stats
                .by_tier
                .entry(u8::try_from(tier).unwrap_or_default())
                .or_default() += count;
            *stats.by_status.entry(status).or_default() += count;
            stats.due += from_i64(due);
        }
        Ok(stats)
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: Uuid,
    name: String,
    url: String,
    ats_type: Option<String>,
    ats_confidence: Option<String>,
    ats_override: bool,
    tier: i16,
    frequency_hours: i32,
    last_checked_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    status: String,
    consecutive_failures: i32,
    consecutive_empty_runs: i32,
    last_error: Option<String>,
    region: Option<String>,
    country: Option<String>,
    iata_code: Option<String>,
    icao_code: Option<String>,
    discovered_via: Option<String>,
    jobs_found_last_run: i32,
    total_jobs_found: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SourceRow> for Source {
    type Error = AppError;

    fn try_from(row: SourceRow) -> Result<Self, AppError> {
        let tier = u8::try_from(row.tier)
            .map_err(|_| AppError::DatabaseError(format!("bad tier value in database: {}", row.tier)))
            .and_then(|t| Tier::try_from(t).map_err(AppError::DatabaseError))?;

        Ok(Source {
            id: row.id,
            ats_type: parse_optional::<AtsType>("ats_type", row.ats_type.as_deref())?,
            ats_confidence: parse_optional::<Confidence>(
                "ats_confidence",
                row.ats_confidence.as_deref(),
            )?,
            ats_override: row.ats_override,
            tier,
            frequency_hours: from_i32(row.frequency_hours).max(1),
            last_checked_at: row.last_checked_at,
            last_success_at: row.last_success_at,
            status: parse_label::<SourceStatus>("status", &row.status)?,
            consecutive_failures: from_i32(row.consecutive_failures),
            consecutive_empty_runs: from_i32(row.consecutive_empty_runs),
            last_error: row.last_error,
            region: parse_optional::<Region>("region", row.region.as_deref())?,
            country: row.country,
            iata_code: row.iata_code,
            icao_code: row.icao_code,
            discovered_via: row.discovered_via,
            jobs_found_last_run: from_i32(row.jobs_found_last_run),
            total_jobs_found: from_i64(row.total_jobs_found),
            created_at: row.created_at,
            updated_at: row.updated_at,
            name: row.name,
            url: row.url,
        })
    }
}

// -- Trait implementation --

impl flightdeck_core::traits::SourceRegistry for SourceRepository {
    async fn list_due_sources(
        &self,
        tier: Option<Tier>,
        include_errors: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<Source>, AppError> {
        self.list_due(tier, include_errors, now).await
    }

    async fn list_sources(&self, filter: SourceFilter) -> Result<Vec<Source>, AppError> {
        self.list(filter).await
    }

    async fn get_source(&self, name: &str) -> Result<Option<Source>, AppError> {
        self.get(name).await
    }

    async fn upsert_source(&self, source: NewSource) -> Result<Source, AppError> {
        self.upsert(source).await
    }

    async fn update_source(&self, name: &str, patch: &SourcePatch) -> Result<(), AppError> {
        self.update(name, patch).await
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<RegistryStats, AppError> {
        SourceRepository::stats(self, now).await
    }
}
