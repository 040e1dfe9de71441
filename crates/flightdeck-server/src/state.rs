use std::sync::atomic::{AtomicBool, Ordering};

use flightdeck_client::{AtsStrategies, OpenAiContentExtractor, ReqwestFetcher};
use flightdeck_core::scheduler::SchedulerConfig;
use flightdeck_core::throttle::ThrottledFetcher;
use flightdeck_core::{AppError, Engine, NormalizationPolicy, Normalizer};
use flightdeck_db::{Database, PostingRepository};

use crate::config::ServerConfig;

pub type HttpFetcher = ThrottledFetcher<ReqwestFetcher>;
pub type ServerEngine =
    Engine<HttpFetcher, AtsStrategies<HttpFetcher, OpenAiContentExtractor>, PostingRepository>;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub db: Database,
    /// Admin token for write endpoints (None = write endpoints disabled).
    pub admin_token: Option<String>,
    pub engine: ServerEngine,
    pub scheduler: SchedulerConfig,
    batch_running: AtomicBool,
}

impl AppState {
    pub fn new(
        db: Database,
        admin_token: Option<String>,
        engine: ServerEngine,
        scheduler: SchedulerConfig,
    ) -> Self {
        Self {
            db,
            admin_token,
            engine,
            scheduler,
            batch_running: AtomicBool::new(false),
        }
    }

    /// Build the engine and state from server configuration.
    pub fn from_config(
        db: Database,
        config: &ServerConfig,
        fetcher: ReqwestFetcher,
    ) -> Result<Self, AppError> {
        let fetcher = ThrottledFetcher::new(fetcher, config.throttle.clone());

        let ai = match config.ai_api_key.as_deref() {
            Some(key) => Some(
                OpenAiContentExtractor::new(key, &config.ai_model)?
                    .with_base_url(&config.ai_base_url)?,
            ),
            None => None,
        };
        tracing::info!(ai_enabled = ai.is_some(), "Extraction pipeline configured");

        let policy = match &config.policy {
            Some(path) => NormalizationPolicy::from_file(path)?,
            None => NormalizationPolicy::default(),
        };

        let engine = Engine::new(
            fetcher.clone(),
            AtsStrategies::new(fetcher, ai),
            db.posting_repo(),
            Normalizer::new(policy),
        );

        Ok(Self::new(
            db,
            config.admin_token.clone(),
            engine,
            config.scheduler.clone(),
        ))
    }

    /// Claim the single batch slot. Returns false when a batch is already running.
    pub fn try_start_batch(&self) -> bool {
        self.batch_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish_batch(&self) {
        self.batch_running.store(false, Ordering::Release);
    }

    pub fn batch_running(&self) -> bool {
        self.batch_running.load(Ordering::Acquire)
    }
}
