//! Per-host request spacing shared by every source in a batch.
//!
//! Several sources often live on the same vendor host (one Workday or
//! Greenhouse API serves many airlines), so spacing is tracked per host and
//! enforced across concurrent tasks: each request reserves the next free
//! slot for its host under the lock, then sleeps outside it.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use flightdeck_core::throttle::{ThrottleConfig, ThrottledFetcher};
//! # use flightdeck_core::traits::Fetcher;
//! # #[derive(Clone)] struct Http;
//! # impl Fetcher for Http {
//! #     async fn fetch(&self, _: &str) -> Result<String, flightdeck_core::AppError> { todo!() }
//! # }
//!
//! let fetcher = ThrottledFetcher::new(
//!     Http,
//!     ThrottleConfig::new(Duration::from_secs(2)).with_jitter(Duration::from_millis(500)),
//! );
//! ```

use std::collections::HashMap;
use std::hash::{BuildHasher, Hasher, RandomState};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::error::AppError;
use crate::traits::Fetcher;

/// Spacing between consecutive requests to one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleConfig {
    pub delay: Duration,
    /// Upper bound of the random extra wait added to `delay`.
    pub jitter: Duration,
}

impl ThrottleConfig {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    fn spacing(&self) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return self.delay;
        }
        self.delay + Duration::from_millis(random_u64() % jitter_ms)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            jitter: Duration::from_millis(500),
        }
    }
}

fn random_u64() -> u64 {
    RandomState::new().build_hasher().finish()
}

/// Host key used for spacing: `host[:port]`, lowercased.
pub fn host_key(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let host = url.host_str()?.to_lowercase();
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    })
}

/// A [`Fetcher`] that spaces requests per host.
#[derive(Clone)]
pub struct ThrottledFetcher<F> {
    inner: F,
    config: ThrottleConfig,
    /// Earliest instant the next request to each host may start.
    next_slot: Arc<Mutex<HashMap<String, Instant>>>,
}

impl<F: Fetcher> ThrottledFetcher<F> {
    pub fn new(inner: F, config: ThrottleConfig) -> Self {
        Self {
            inner,
            config,
            next_slot: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reserve a slot for `host` and wait for it.
    async fn acquire(&self, host: String) {
        let now = Instant::now();
        let start = {
            let mut slots = self.next_slot.lock().await;
            let start = slots.get(&host).copied().filter(|s| *s > now).unwrap_or(now);
            slots.insert(host.clone(), start + self.config.spacing());
            start
        };
        if start > now {
            tracing::debug!(
                host = %host,
                wait_ms = %(start - now).as_millis(),
                "Spacing request"
            );
            tokio::time::sleep_until(start).await;
        }
    }
}

impl<F: Fetcher> Fetcher for ThrottledFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        if let Some(host) = host_key(url) {
            self.acquire(host).await;
        }
        self.inner.fetch(url).await
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        if let Some(host) = host_key(url) {
            self.acquire(host).await;
        }
        self.inner.post_json(url, body).await
    }
}
