use std::time::Duration;

use flightdeck_core::error::AppError;
use reqwest::{Client, StatusCode};

use crate::fetcher::{DEFAULT_USER_AGENT, validate_url};

/// What a posting URL answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Alive,
    /// The posting is gone (404 or 410).
    Dead(u16),
    /// Anything that does not prove the posting is gone.
    Unknown(String),
}

impl LinkStatus {
    pub fn is_dead(&self) -> bool {
        matches!(self, LinkStatus::Dead(_))
    }
}

/// Map a final HTTP status to a link verdict.
pub fn classify_status(status: StatusCode) -> LinkStatus {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => LinkStatus::Dead(status.as_u16()),
        s if s.is_success() || s.is_redirection() => LinkStatus::Alive,
        s => LinkStatus::Unknown(format!("HTTP {}", s.as_u16())),
    }
}

/// Checks whether stored application URLs still resolve.
///
/// Tries HEAD first and falls back to GET for servers that refuse HEAD.
/// Network failures are reported as [`LinkStatus::Unknown`], never as dead,
/// so a flaky host cannot deactivate postings.
#[derive(Clone)]
pub struct LinkChecker {
    client: Client,
    ssrf_protection: bool,
}

impl LinkChecker {
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;
        Ok(Self {
            client,
            ssrf_protection: true,
        })
    }

    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    pub async fn check(&self, url: &str) -> LinkStatus {
        if self.ssrf_protection {
            if let Err(e) = validate_url(url).await {
                return LinkStatus::Unknown(e.to_string());
            }
        }

        let status = match self.client.head(url).send().await {
            Ok(r) if !needs_get(r.status()) => r.status(),
            Ok(_) => match self.client.get(url).send().await {
                Ok(r) => r.status(),
                Err(e) => return LinkStatus::Unknown(e.to_string()),
            },
            Err(e) => return LinkStatus::Unknown(e.to_string()),
        };

        let verdict = classify_status(status);
        tracing::debug!(url = %url, status = status.as_u16(), verdict = ?verdict, "Link checked");
        verdict
    }
}

fn needs_get(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED | StatusCode::FORBIDDEN
    )
}
