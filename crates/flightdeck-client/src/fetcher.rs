use std::net::IpAddr;
use std::time::Duration;

use flightdeck_core::error::AppError;
use flightdeck_core::traits::Fetcher;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use url::Url;

/// Many airline career portals reject obvious bot agents outright.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36 flightdeck/0.1";

/// HTTP fetcher for career pages and ATS JSON APIs.
///
/// Requests to private or reserved addresses are refused unless
/// [`allow_private_urls`](Self::allow_private_urls) is set, since source URLs
/// can be registered through the admin API.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout_secs: u64,
    ssrf_protection: bool,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_options(Duration::from_secs(30), DEFAULT_USER_AGENT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        Self::with_options(timeout, DEFAULT_USER_AGENT)
    }

    pub fn with_options(timeout: Duration, user_agent: &str) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
            ssrf_protection: true,
        })
    }

    /// Allow local and private targets. Intended for the CLI and tests.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<Response, AppError> {
        if self.ssrf_protection {
            validate_url(url).await?;
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout_secs))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::RateLimitExceeded);
        }
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }
        Ok(response)
    }
}

pub(crate) fn map_reqwest_error(e: reqwest::Error, timeout_secs: u64) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(timeout_secs)
    } else if e.is_connect() {
        AppError::NetworkError(format!("Connection failed: {e}"))
    } else {
        AppError::HttpError(e.to_string())
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        let response = self.send(url, self.client.get(url)).await?;
        response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        let request = self
            .client
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body);
        let response = self.send(url, request).await?;
        let text = response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Reject non-http(s) URLs and hosts that resolve to private or reserved
/// addresses.
pub(crate) async fn validate_url(url: &str) -> Result<(), AppError> {
    let parsed = Url::parse(url).map_err(|e| AppError::HttpError(format!("Invalid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::HttpError(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::HttpError("URL has no host".to_string()))?;

    // IPv6 literals come back bracketed from host_str.
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Err(AppError::HttpError(format!(
                "SSRF blocked: {host} is a private/reserved address"
            )));
        }
        return Ok(());
    }

    let port = parsed.port_or_known_default().unwrap_or(80);
    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| AppError::NetworkError(format!("DNS resolution failed for {host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(AppError::NetworkError(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }

    if let Some(blocked) = addrs.iter().find(|a| is_private_ip(a.ip())) {
        return Err(AppError::HttpError(format!(
            "SSRF blocked: {host} resolves to private/reserved IP {}",
            blocked.ip()
        )));
    }

    Ok(())
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                // 100.64.0.0/10 carrier-grade NAT
                || (a == 100 && (b & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xFFC0) == 0xFE80
                || (first & 0xFE00) == 0xFC00
                || v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}
