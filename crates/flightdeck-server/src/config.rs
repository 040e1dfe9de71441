use std::path::PathBuf;
use std::time::Duration;

use flightdeck_core::AppError;
use flightdeck_core::scheduler::SchedulerConfig;
use flightdeck_core::throttle::ThrottleConfig;

/// Server settings read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Bearer token for write routes. Write routes answer 403 without one.
    pub admin_token: Option<String>,
    pub policy: Option<PathBuf>,
    pub ai_api_key: Option<String>,
    pub ai_model: String,
    pub ai_base_url: String,
    pub throttle: ThrottleConfig,
    pub scheduler: SchedulerConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = parse_or(non_empty("FLIGHTDECK_SERVER_PORT"), "FLIGHTDECK_SERVER_PORT", 3000)?;
        let throttle_ms = parse_or(non_empty("FLIGHTDECK_THROTTLE_MS"), "FLIGHTDECK_THROTTLE_MS", 1000)?;
        let jitter_ms = parse_or(non_empty("FLIGHTDECK_JITTER_MS"), "FLIGHTDECK_JITTER_MS", 500)?;
        let concurrency = parse_or(non_empty("FLIGHTDECK_CONCURRENCY"), "FLIGHTDECK_CONCURRENCY", 3)?;
        let delay_secs = parse_or(non_empty("FLIGHTDECK_DELAY_SECS"), "FLIGHTDECK_DELAY_SECS", 10)?;
        let timeout_secs =
            parse_or(non_empty("FLIGHTDECK_TIMEOUT_SECS"), "FLIGHTDECK_TIMEOUT_SECS", 180)?;
        let failure_threshold = parse_or(
            non_empty("FLIGHTDECK_FAILURE_THRESHOLD"),
            "FLIGHTDECK_FAILURE_THRESHOLD",
            5,
        )?;
        let batch_size = non_empty("FLIGHTDECK_BATCH_SIZE")
            .map(|v| parse_value::<usize>(&v, "FLIGHTDECK_BATCH_SIZE"))
            .transpose()?;

        Ok(Self {
            port,
            admin_token: non_empty("FLIGHTDECK_ADMIN_TOKEN"),
            policy: non_empty("FLIGHTDECK_POLICY").map(PathBuf::from),
            ai_api_key: non_empty("FLIGHTDECK_AI_API_KEY"),
            ai_model: non_empty("FLIGHTDECK_AI_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
            ai_base_url: non_empty("FLIGHTDECK_AI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".into()),
            throttle: ThrottleConfig::new(Duration::from_millis(throttle_ms))
                .with_jitter(Duration::from_millis(jitter_ms)),
            scheduler: SchedulerConfig::default()
                .with_concurrency(concurrency)
                .with_dispatch_delay(Duration::from_secs(delay_secs))
                .with_source_timeout(Duration::from_secs(timeout_secs))
                .with_failure_threshold(failure_threshold)
                .with_batch_size(batch_size),
        })
    }
}

fn parse_value<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::ConfigError(format!("Invalid {key} '{raw}'")))
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T, AppError> {
    raw.map_or(Ok(default), |v| parse_value(&v, key))
}
