use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use flightdeck_core::error::AppError;
use flightdeck_core::traits::{ContentExtractor, Fetcher};
use serde_json::{Map, Value};

/// Fetcher serving canned GET bodies by URL and queued POST replies.
///
/// Unknown URLs answer HTTP 404. Each POST to a URL pops the next queued
/// reply; an exhausted queue also answers 404.
#[derive(Clone, Default)]
pub struct RouteFetcher {
    pages: Arc<HashMap<String, Result<String, u16>>>,
    posts: Arc<Mutex<HashMap<String, VecDeque<Result<Value, u16>>>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl RouteFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, body: &str) -> Self {
        Arc::make_mut(&mut self.pages).insert(url.to_string(), Ok(body.to_string()));
        self
    }

    pub fn status(mut self, url: &str, code: u16) -> Self {
        Arc::make_mut(&mut self.pages).insert(url.to_string(), Err(code));
        self
    }

    pub fn post(self, url: &str, reply: Result<Value, u16>) -> Self {
        self.posts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Every request made so far, as `GET url` or `POST url body`.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn status_error(code: u16, url: &str) -> AppError {
    AppError::HttpError(format!("HTTP {code} for {url}"))
}

impl Fetcher for RouteFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.requests.lock().unwrap().push(format!("GET {url}"));
        match self.pages.get(url) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err(code)) => Err(status_error(*code, url)),
            None => Err(status_error(404, url)),
        }
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, AppError> {
        self.requests.lock().unwrap().push(format!("POST {url} {body}"));
        let reply = self
            .posts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|q| q.pop_front());
        match reply {
            Some(Ok(value)) => Ok(value),
            Some(Err(code)) => Err(status_error(code, url)),
            None => Err(status_error(404, url)),
        }
    }
}

/// Content extractor returning canned field maps or a canned error.
#[derive(Clone)]
pub struct MockContentExtractor {
    reply: Arc<dyn Fn() -> Result<Vec<Map<String, Value>>, AppError> + Send + Sync>,
    calls: Arc<Mutex<u32>>,
}

impl MockContentExtractor {
    pub fn returning(jobs: Vec<Value>) -> Self {
        let maps: Vec<Map<String, Value>> = jobs
            .into_iter()
            .filter_map(|j| j.as_object().cloned())
            .collect();
        Self {
            reply: Arc::new(move || Ok(maps.clone())),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: Arc::new(|| Err(AppError::NetworkError("AI endpoint down".into()))),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

impl ContentExtractor for MockContentExtractor {
    async fn extract_jobs(
        &self,
        _page_url: &str,
        _content: &str,
    ) -> Result<Vec<Map<String, Value>>, AppError> {
        *self.calls.lock().unwrap() += 1;
        (self.reply)()
    }
}
