use std::sync::{Arc, LazyLock};
use std::time::Duration;

use flightdeck_core::error::AppError;
use flightdeck_core::traits::{Cleaner, ContentExtractor};
use flightdeck_core::util::truncate_chars;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::cleaner::HtmdCleaner;
use crate::fetcher::map_reqwest_error;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_INPUT_CHARS: usize = 12_000;

const SYSTEM_PROMPT: &str = "You extract pilot job postings from airline and operator career pages. \
Return only postings for flight crew positions (captain, first officer, second officer, cadet, \
instructor, flight engineer). Ignore navigation links, cabin crew, engineering and ground roles. \
Use null for anything the page does not state. Resolve relative links against the page URL.";

/// Shape every AI response must satisfy before its records are used.
pub static JOBS_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    let nullable = |t: &str| json!({ "type": [t, "null"] });
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["jobs"],
        "properties": {
            "jobs": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": [
                        "job_title", "application_url", "location", "position_type",
                        "min_hours", "min_pic_hours", "aircraft", "type_rating_required",
                        "type_rating_provided", "visa_sponsored", "contract_type",
                        "description_summary"
                    ],
                    "properties": {
                        "job_title": { "type": "string" },
                        "application_url": nullable("string"),
                        "location": nullable("string"),
                        "position_type": nullable("string"),
                        "min_hours": nullable("integer"),
                        "min_pic_hours": nullable("integer"),
                        "aircraft": { "type": "array", "items": { "type": "string" } },
                        "type_rating_required": nullable("boolean"),
                        "type_rating_provided": nullable("boolean"),
                        "visa_sponsored": nullable("boolean"),
                        "contract_type": nullable("string"),
                        "description_summary": nullable("string")
                    }
                }
            }
        }
    })
});

/// [`ContentExtractor`] backed by an OpenAI-compatible chat completions API.
///
/// The page is cleaned to Markdown, truncated, and sent with a strict JSON
/// schema response format. Responses are validated against [`JOBS_SCHEMA`]
/// again locally, since not every compatible provider enforces it.
#[derive(Clone)]
pub struct OpenAiContentExtractor {
    client: Client,
    cleaner: HtmdCleaner,
    validator: Arc<jsonschema::Validator>,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
    max_input_chars: usize,
}

impl OpenAiContentExtractor {
    pub fn new(api_key: &str, model: &str) -> Result<Self, AppError> {
        Self::build(api_key, model, DEFAULT_BASE_URL, DEFAULT_TIMEOUT)
    }

    pub fn with_base_url(self, base_url: &str) -> Result<Self, AppError> {
        Self::build(&self.api_key, &self.model, base_url, self.timeout())
            .map(|e| e.with_max_input_chars(self.max_input_chars))
    }

    pub fn with_timeout(self, timeout: Duration) -> Result<Self, AppError> {
        Self::build(&self.api_key, &self.model, &self.base_url, timeout)
            .map(|e| e.with_max_input_chars(self.max_input_chars))
    }

    pub fn with_max_input_chars(mut self, max: usize) -> Self {
        self.max_input_chars = max.max(1);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn build(
        api_key: &str,
        model: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        if api_key.trim().is_empty() {
            return Err(AppError::ConfigError("AI API key is empty".into()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;
        let validator = jsonschema::validator_for(&JOBS_SCHEMA)
            .map_err(|e| AppError::ConfigError(format!("invalid jobs schema: {e}")))?;

        Ok(Self {
            client,
            cleaner: HtmdCleaner::new(),
            validator: Arc::new(validator),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout_secs: timeout.as_secs(),
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        })
    }

    fn request(&self, page_url: &str, markdown: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            temperature: 0.0,
            messages: vec![
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user",
                    content: format!("Page URL: {page_url}\n\n{markdown}"),
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaWrapper {
                    name: "pilot_jobs",
                    strict: true,
                    schema: JOBS_SCHEMA.clone(),
                },
            },
        }
    }

    /// Check a parsed response against the schema and return its job maps.
    pub fn validate(&self, value: &Value) -> Result<Vec<Map<String, Value>>, AppError> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(value)
            .map(|e| e.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(AppError::SchemaValidationError(errors.join("; ")));
        }

        Ok(value
            .get("jobs")
            .and_then(Value::as_array)
            .map(|jobs| {
                jobs.iter()
                    .filter_map(|j| j.as_object().cloned())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<Message>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaWrapper,
}

#[derive(Serialize)]
struct JsonSchemaWrapper {
    name: &'static str,
    strict: bool,
    schema: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl ContentExtractor for OpenAiContentExtractor {
    async fn extract_jobs(
        &self,
        page_url: &str,
        content: &str,
    ) -> Result<Vec<Map<String, Value>>, AppError> {
        let markdown = self.cleaner.clean(content)?;
        let markdown = truncate_chars(markdown.trim(), self.max_input_chars);
        if markdown.is_empty() {
            return Ok(vec![]);
        }

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request(page_url, &markdown))
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            if status_code == 429 {
                return Err(AppError::RateLimitExceeded);
            }
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status_code}: {body}"));
            return Err(AppError::LlmError {
                message,
                status_code,
                retryable: status_code >= 500,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to parse AI response: {e}")))?;

        let raw = chat
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| AppError::LlmError {
                message: "Empty response from AI".into(),
                status_code: 200,
                retryable: false,
            })?;

        let value: Value = serde_json::from_str(raw).map_err(|e| {
            AppError::SchemaValidationError(format!(
                "AI returned invalid JSON: {e}. Raw: {}",
                truncate_chars(raw, 200)
            ))
        })?;

        let jobs = self.validate(&value)?;
        tracing::debug!(page = %page_url, model = %self.model, jobs = jobs.len(), "AI extraction finished");
        Ok(jobs)
    }
}
