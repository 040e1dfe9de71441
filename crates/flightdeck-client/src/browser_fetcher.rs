use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig};
use flightdeck_core::error::AppError;
use flightdeck_core::traits::Fetcher;
use futures::StreamExt;

const CHROME_CANDIDATES: &[&str] = &[
    "/snap/chromium/current/usr/lib/chromium-browser/chrome",
    "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/google-chrome",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
];

/// Listing-page fetcher that renders JavaScript in headless Chromium.
///
/// Career portals built as single-page apps (Workday shells, SuccessFactors
/// and Avature searches, many custom sites) return an empty body to a plain
/// GET. One browser process is shared by all clones; each fetch opens a
/// tab, waits for the body plus a short settle period for client-side
/// rendering, and closes the tab.
///
/// Only meant for listing pages. ATS JSON APIs are queried with
/// [`ReqwestFetcher`](crate::ReqwestFetcher).
#[derive(Clone)]
pub struct BrowserFetcher {
    browser: Arc<Browser>,
    timeout: Duration,
    settle: Duration,
}

impl BrowserFetcher {
    pub async fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(45)).await
    }

    pub async fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();
        if let Some(bin) = find_chrome_binary() {
            tracing::info!(binary = %bin.display(), "Using Chrome binary");
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::ConfigError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::ConfigError(format!("Failed to launch browser: {e}")))?;

        // The DevTools connection only makes progress while this is polled.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!(error = %e, "Browser handler stopped");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            timeout,
            settle: Duration::from_millis(1500),
        })
    }

    /// Extra wait after the body appears, for client-rendered job lists.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

/// `CHROME_BIN` wins; otherwise the first well-known install that exists.
/// Snap's `/snap/bin/chromium` wrapper drops headless flags, so the real
/// binary inside the snap is preferred.
fn find_chrome_binary() -> Option<PathBuf> {
    std::env::var("CHROME_BIN")
        .ok()
        .map(PathBuf::from)
        .filter(|p| p.exists())
        .or_else(|| {
            CHROME_CANDIDATES
                .iter()
                .map(PathBuf::from)
                .find(|p| p.exists())
        })
}

impl Fetcher for BrowserFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        let render = async {
            let page = self
                .browser
                .new_page(url)
                .await
                .map_err(|e| AppError::NetworkError(format!("Failed to open {url}: {e}")))?;

            page.find_element("body")
                .await
                .map_err(|e| AppError::HttpError(format!("Page did not render body: {e}")))?;
            tokio::time::sleep(self.settle).await;

            let html = page
                .content()
                .await
                .map_err(|e| AppError::HttpError(format!("Failed to read page content: {e}")))?;
            if let Err(e) = page.close().await {
                tracing::debug!(url = %url, error = %e, "Failed to close tab");
            }
            Ok::<_, AppError>(html)
        };

        tokio::time::timeout(self.timeout, render)
            .await
            .map_err(|_| AppError::Timeout(self.timeout.as_secs()))?
    }
}
