use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use chrono::Utc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use flightdeck_core::posting::{PositionCategory, PostingFilter};
use flightdeck_core::scheduler::{
    BatchReport, SchedulerConfig, SourceReport, TracingSchedulerReporter,
};
use flightdeck_core::source::{Region, SourceFilter, SourceStatus};
use flightdeck_core::traits::{Fetcher, JobStore, StrategySet};
use flightdeck_core::{AppError, Engine, SmartQueue, Tier};
use flightdeck_db::SourceRepository;

use crate::auth::require_admin_token;
use crate::dto::{
    BatchAcceptedResponse, BatchQuery, ErrorResponse, HealthResponse, ListPostingsQuery,
    ListRunsQuery, ListSourcesQuery, PostingListResponse, PostingResponse, RunListResponse,
    RunResponse, ScrapeQuery, ScrapeResponse, SourceListResponse, SourceResponse, StatsResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

const DEFAULT_RUN_LIMIT: usize = 20;
const MAX_RUN_LIMIT: usize = 200;
const DEFAULT_POSTING_LIMIT: usize = 50;
const MAX_POSTING_LIMIT: usize = 500;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let admin = Router::new()
        .route("/v1/sources/{name}/scrape", post(scrape_source))
        .route("/v1/batches", post(start_batch))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_token,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .route("/v1/stats", get(stats))
        .route("/v1/sources", get(list_sources))
        .route("/v1/sources/{name}", get(get_source))
        .route("/v1/sources/{name}/runs", get(list_runs))
        .route("/v1/postings", get(list_postings))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(admin).with_state(state)
}

fn parse_tier(tier: Option<u8>) -> Result<Option<Tier>, ApiError> {
    tier.map(Tier::try_from)
        .transpose()
        .map_err(ApiError::bad_request)
}

fn parse_param<T>(value: Option<&str>) -> Result<Option<T>, ApiError>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .map(str::parse::<T>)
        .transpose()
        .map_err(ApiError::bad_request)
}

fn not_found(message: String) -> axum::response::Response {
    let body = ErrorResponse {
        error: "not_found".to_string(),
        message,
    };
    (StatusCode::NOT_FOUND, axum::Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/stats",
    responses(
        (status = 200, description = "Registry counts", body = StatsResponse),
    ),
    tag = "sources"
)]
pub async fn stats(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let stats = state.db.source_repo().stats(Utc::now()).await?;
    Ok(axum::Json(StatsResponse::new(stats, state.batch_running())))
}

#[utoipa::path(
    get,
    path = "/v1/sources",
    params(ListSourcesQuery),
    responses(
        (status = 200, description = "List of sources", body = SourceListResponse),
        (status = 400, description = "Bad filter", body = ErrorResponse),
    ),
    tag = "sources"
)]
pub async fn list_sources(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListSourcesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = SourceFilter {
        status: parse_param::<SourceStatus>(query.status.as_deref())?,
        tier: parse_tier(query.tier)?,
    };

    let sources = state.db.source_repo().list(filter).await?;
    let total = sources.len();

    Ok(axum::Json(SourceListResponse {
        sources: sources.into_iter().map(SourceResponse::from).collect(),
        total,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/sources/{name}",
    params(
        ("name" = String, Path, description = "Source name")
    ),
    responses(
        (status = 200, description = "Source details", body = SourceResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
    ),
    tag = "sources"
)]
pub async fn get_source(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.db.source_repo().get(&name).await? {
        Some(source) => Ok(axum::Json(SourceResponse::from(source)).into_response()),
        None => Ok(not_found(format!("Source not found: {name}"))),
    }
}

#[utoipa::path(
    get,
    path = "/v1/sources/{name}/runs",
    params(
        ("name" = String, Path, description = "Source name"),
        ListRunsQuery,
    ),
    responses(
        (status = 200, description = "Run history, newest first", body = RunListResponse),
    ),
    tag = "sources"
)]
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<ListRunsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_RUN_LIMIT).min(MAX_RUN_LIMIT);
    let runs = state.db.posting_repo().recent(&name, limit).await?;
    let total = runs.len();

    Ok(axum::Json(RunListResponse {
        runs: runs.into_iter().map(RunResponse::from).collect(),
        total,
    }))
}

// ---------------------------------------------------------------------------
// Scraping
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/sources/{name}/scrape",
    params(
        ("name" = String, Path, description = "Source name"),
        ScrapeQuery,
    ),
    responses(
        (status = 200, description = "Run outcome", body = ScrapeResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Write endpoints disabled"),
    ),
    security(("bearer" = [])),
    tag = "scraping"
)]
pub async fn scrape_source(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<ScrapeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let config = state.scheduler.clone().with_dry_run(query.dry_run);
    let registry = state.db.source_repo();

    let report = if query.dry_run {
        run_source(&name, registry, state.engine.clone().dry_run(), config).await?
    } else {
        run_source(&name, registry, state.engine.clone(), config).await?
    };

    Ok(axum::Json(ScrapeResponse::new(report, query.dry_run)))
}

#[utoipa::path(
    post,
    path = "/v1/batches",
    params(BatchQuery),
    responses(
        (status = 202, description = "Batch started in the background", body = BatchAcceptedResponse),
        (status = 400, description = "Bad tier", body = ErrorResponse),
        (status = 409, description = "A batch is already running", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Write endpoints disabled"),
    ),
    security(("bearer" = [])),
    tag = "scraping"
)]
pub async fn start_batch(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BatchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let tier = parse_tier(query.tier)?;

    if !state.try_start_batch() {
        let body = ErrorResponse {
            error: "conflict".to_string(),
            message: "A batch is already running".to_string(),
        };
        return Ok((StatusCode::CONFLICT, axum::Json(body)).into_response());
    }

    let config = state
        .scheduler
        .clone()
        .with_tier(tier)
        .with_retry_errors(query.retry_errors)
        .with_dry_run(query.dry_run);

    let slot = BatchSlot(state.clone());
    tokio::spawn(async move {
        let state = &slot.0;
        let registry = state.db.source_repo();
        let result = if config.dry_run {
            run_batch(registry, state.engine.clone().dry_run(), config).await
        } else {
            run_batch(registry, state.engine.clone(), config).await
        };
        match result {
            Ok(report) => {
                for name in report.newly_errored() {
                    tracing::warn!(source = %name, "Source is now in error state");
                }
            }
            Err(error) => tracing::error!(%error, "Batch failed"),
        }
        drop(slot);
    });

    let response = BatchAcceptedResponse {
        status: "started",
        dry_run: query.dry_run,
        tier: query.tier,
        retry_errors: query.retry_errors,
    };
    Ok((StatusCode::ACCEPTED, axum::Json(response)).into_response())
}

/// Releases the batch slot when the background task ends, even on panic.
struct BatchSlot(Arc<AppState>);

impl Drop for BatchSlot {
    fn drop(&mut self) {
        self.0.finish_batch();
    }
}

async fn run_source<F, S, J>(
    name: &str,
    registry: SourceRepository,
    engine: Engine<F, S, J>,
    config: SchedulerConfig,
) -> Result<SourceReport, AppError>
where
    F: Fetcher,
    S: StrategySet,
    J: JobStore,
{
    SmartQueue::new(registry, engine, config)
        .run_source(name, &TracingSchedulerReporter)
        .await
}

async fn run_batch<F, S, J>(
    registry: SourceRepository,
    engine: Engine<F, S, J>,
    config: SchedulerConfig,
) -> Result<BatchReport, AppError>
where
    F: Fetcher,
    S: StrategySet,
    J: JobStore,
{
    SmartQueue::new(registry, engine, config)
        .run_batch(&TracingSchedulerReporter)
        .await
}

// ---------------------------------------------------------------------------
// Postings
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/postings",
    params(ListPostingsQuery),
    responses(
        (status = 200, description = "Active postings, most recently scraped first", body = PostingListResponse),
        (status = 400, description = "Bad filter", body = ErrorResponse),
    ),
    tag = "postings"
)]
pub async fn list_postings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListPostingsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = PostingFilter {
        region: parse_param::<Region>(query.region.as_deref())?,
        position: parse_param::<PositionCategory>(query.position.as_deref())?,
        entry_level: query.entry_level,
        source_name: query.source,
        limit: query
            .limit
            .unwrap_or(DEFAULT_POSTING_LIMIT)
            .clamp(1, MAX_POSTING_LIMIT),
    };

    let postings = state.db.posting_repo().list_active(&filter).await?;
    let total = postings.len();

    Ok(axum::Json(PostingListResponse {
        postings: postings.into_iter().map(PostingResponse::from).collect(),
        total,
    }))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_ok = state.db.health_check().await.is_ok();

    let response = HealthResponse {
        status: if db_ok { "healthy" } else { "unhealthy" },
        database: if db_ok { "ok" } else { "error" },
    };
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, axum::Json(response))
}
