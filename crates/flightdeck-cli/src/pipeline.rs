use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use flightdeck_client::{AtsStrategies, OpenAiContentExtractor, ReqwestFetcher};
use flightdeck_core::throttle::{ThrottleConfig, ThrottledFetcher};
use flightdeck_core::traits::{Fetcher, JobStore};
use flightdeck_core::{AppError, Engine, NormalizationPolicy, Normalizer};

pub type HttpFetcher = ThrottledFetcher<ReqwestFetcher>;
pub type Strategies = AtsStrategies<HttpFetcher, OpenAiContentExtractor>;

/// Options shared by every command that runs the scraping pipeline.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Normalization policy JSON file (built-in defaults when omitted)
    #[arg(long, global = true, env = "FLIGHTDECK_POLICY")]
    pub policy: Option<PathBuf>,

    /// API key of the OpenAI-compatible provider; AI extraction is off without it
    #[arg(long, global = true, env = "FLIGHTDECK_AI_API_KEY", hide_env_values = true)]
    pub ai_api_key: Option<String>,

    #[arg(
        long,
        global = true,
        env = "FLIGHTDECK_AI_MODEL",
        default_value = "gpt-4o-mini"
    )]
    pub ai_model: String,

    #[arg(
        long,
        global = true,
        env = "FLIGHTDECK_AI_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    pub ai_base_url: String,

    /// Minimum gap between two requests to the same host, in milliseconds
    #[arg(long, global = true, env = "FLIGHTDECK_THROTTLE_MS", default_value_t = 1000)]
    pub throttle_ms: u64,

    /// Random extra wait added to the gap, in milliseconds
    #[arg(long, global = true, env = "FLIGHTDECK_JITTER_MS", default_value_t = 500)]
    pub jitter_ms: u64,

    /// HTTP timeout per request, in seconds
    #[arg(long, global = true, env = "FLIGHTDECK_HTTP_TIMEOUT", default_value_t = 30)]
    pub http_timeout: u64,

    /// Allow fetching local and private addresses
    #[arg(long, global = true, default_value_t = false)]
    pub allow_private_urls: bool,

    /// Render listing pages in headless Chrome
    #[cfg(feature = "browser")]
    #[arg(long, global = true, env = "FLIGHTDECK_BROWSER", default_value_t = false)]
    pub browser: bool,
}

impl PipelineArgs {
    pub fn normalization_policy(&self) -> Result<NormalizationPolicy> {
        match &self.policy {
            Some(path) => {
                let policy = NormalizationPolicy::from_file(path)?;
                tracing::info!(path = %path.display(), "Loaded normalization policy");
                Ok(policy)
            }
            None => Ok(NormalizationPolicy::default()),
        }
    }

    pub fn ai_extractor(&self) -> Result<Option<OpenAiContentExtractor>> {
        let Some(key) = self.ai_api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
            tracing::info!("AI extraction disabled: FLIGHTDECK_AI_API_KEY not set");
            return Ok(None);
        };
        let extractor = OpenAiContentExtractor::new(key, &self.ai_model)?
            .with_base_url(&self.ai_base_url)?;
        tracing::info!(model = %extractor.model(), "AI extraction enabled");
        Ok(Some(extractor))
    }

    pub fn throttle(&self) -> ThrottleConfig {
        ThrottleConfig::new(Duration::from_millis(self.throttle_ms))
            .with_jitter(Duration::from_millis(self.jitter_ms))
    }

    pub fn http_fetcher(&self) -> Result<HttpFetcher> {
        let mut fetcher = ReqwestFetcher::with_timeout(Duration::from_secs(self.http_timeout))
            .context("Failed to create HTTP client")?;
        if self.allow_private_urls {
            fetcher = fetcher.allow_private_urls();
        }
        Ok(ThrottledFetcher::new(fetcher, self.throttle()))
    }

    /// Build the per-source engine over `store`.
    pub async fn engine<J: JobStore>(
        &self,
        store: J,
    ) -> Result<Engine<ListingFetcher, Strategies, J>> {
        let http = self.http_fetcher()?;
        let strategies = AtsStrategies::new(http.clone(), self.ai_extractor()?);
        let listing = self.listing_fetcher(http).await?;
        let normalizer = Normalizer::new(self.normalization_policy()?);
        Ok(Engine::new(listing, strategies, store, normalizer))
    }

    #[cfg(feature = "browser")]
    async fn listing_fetcher(&self, http: HttpFetcher) -> Result<ListingFetcher> {
        if !self.browser {
            return Ok(ListingFetcher::Http(http));
        }
        let browser = flightdeck_client::BrowserFetcher::new()
            .await
            .context("Failed to launch headless browser")?;
        tracing::info!("Rendering listing pages in headless Chrome");
        Ok(ListingFetcher::Browser(ThrottledFetcher::new(
            browser,
            self.throttle(),
        )))
    }

    #[cfg(not(feature = "browser"))]
    async fn listing_fetcher(&self, http: HttpFetcher) -> Result<ListingFetcher> {
        Ok(ListingFetcher::Http(http))
    }
}

/// Fetcher for listing pages. Strategy sub-requests always go over HTTP.
#[derive(Clone)]
pub enum ListingFetcher {
    Http(HttpFetcher),
    #[cfg(feature = "browser")]
    Browser(ThrottledFetcher<flightdeck_client::BrowserFetcher>),
}

impl Fetcher for ListingFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        match self {
            ListingFetcher::Http(fetcher) => fetcher.fetch(url).await,
            #[cfg(feature = "browser")]
            ListingFetcher::Browser(fetcher) => fetcher.fetch(url).await,
        }
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        match self {
            ListingFetcher::Http(fetcher) => fetcher.post_json(url, body).await,
            #[cfg(feature = "browser")]
            ListingFetcher::Browser(fetcher) => fetcher.post_json(url, body).await,
        }
    }
}
