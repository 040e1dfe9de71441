use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a strategy could not produce records for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionKind {
    Network,
    Timeout,
    Parse,
    Empty,
}

impl ExtractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Parse => "parse",
            Self::Empty => "empty",
        }
    }
}

impl fmt::Display for ExtractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "network" => Ok(Self::Network),
            "timeout" => Ok(Self::Timeout),
            "parse" => Ok(Self::Parse),
            "empty" => Ok(Self::Empty),
            _ => Err(format!("Unknown extraction kind: {s}")),
        }
    }
}

/// Application-wide error types for flightdeck.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (fetching a page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// A strategy failed to turn a listing into records.
    #[error("Extraction failed ({kind}): {message}")]
    Extraction {
        kind: ExtractionKind,
        message: String,
    },

    /// LLM API call failed.
    #[error("LLM error (HTTP {status_code}): {message}")]
    LlmError {
        message: String,
        status_code: u16,
        retryable: bool,
    },

    /// HTML-to-Markdown conversion failed.
    #[error("Cleaner error: {0}")]
    CleanerError(String),

    /// Extracted JSON does not match the expected schema.
    #[error("Schema validation error: {0}")]
    SchemaValidationError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Missing or invalid configuration. Only fatal at startup.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A named record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    pub fn extraction(kind: ExtractionKind, message: impl Into<String>) -> Self {
        Self::Extraction {
            kind,
            message: message.into(),
        }
    }

    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::LlmError { retryable, .. } => *retryable,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            AppError::Extraction { kind, .. } => {
                matches!(kind, ExtractionKind::Network | ExtractionKind::Timeout)
            }
            _ => false,
        }
    }

    /// Returns true if this error should trip the circuit breaker.
    pub fn should_trip_circuit(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::LlmError {
                status_code,
                retryable,
                ..
            } => {
                // Trip on rate limits (429) and server errors (5xx)
                *status_code == 429 || *status_code >= 500 || *retryable
            }
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("connection")
            }
            _ => false,
        }
    }

    /// Classify any error raised while visiting a source into the
    /// extraction failure kind recorded on its run.
    pub fn extraction_kind(&self) -> ExtractionKind {
        match self {
            AppError::Extraction { kind, .. } => *kind,
            AppError::Timeout(_) => ExtractionKind::Timeout,
            AppError::HttpError(_) | AppError::NetworkError(_) | AppError::RateLimitExceeded => {
                ExtractionKind::Network
            }
            _ => ExtractionKind::Parse,
        }
    }
}
