use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ats::{AtsType, Classification};
use crate::error::ExtractionKind;
use crate::util::truncate_chars;

/// Longest error detail kept on a run record.
pub const MAX_ERROR_LEN: usize = 500;

/// Outcome status of one visit to a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
    Timeout,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::Timeout => "timeout",
        }
    }

    /// Whether the run counts as healthy for the source's failure counter.
    pub fn is_healthy(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Partial)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(RunStatus::Success),
            "partial" => Ok(RunStatus::Partial),
            "failed" => Ok(RunStatus::Failed),
            "timeout" => Ok(RunStatus::Timeout),
            _ => Err(format!("Unknown run status: {s}")),
        }
    }
}

/// Aggregate record counts of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Distinct records accepted by the normalizer.
    pub found: u32,
    pub new: u32,
    pub updated: u32,
    /// Records dropped as junk, duplicates or missing a title/URL.
    pub rejected: u32,
}

/// What happened when a source was processed. Always produced, never an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub source_id: Uuid,
    pub source_name: String,
    pub status: RunStatus,
    pub ats_type: AtsType,
    pub strategy: Option<String>,
    /// Set when the source was classified again during this run.
    pub classification: Option<Classification>,
    pub counts: RunCounts,
    pub error_kind: Option<ExtractionKind>,
    pub error: Option<String>,
    /// True when extraction returned no records at all.
    pub empty: bool,
    pub content_hash: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl RunOutcome {
    pub fn to_record(&self) -> NewRunRecord {
        NewRunRecord {
            source_id: self.source_id,
            source_name: self.source_name.clone(),
            ats_type: self.ats_type,
            strategy: self.strategy.clone(),
            status: self.status,
            jobs_found: self.counts.found,
            jobs_new: self.counts.new,
            jobs_updated: self.counts.updated,
            duration_ms: u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX),
            error_kind: self.error_kind,
            error_message: self
                .error
                .as_deref()
                .map(|e| truncate_chars(e, MAX_ERROR_LEN)),
            content_hash: self.content_hash.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Append-only audit record of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRunRecord {
    pub source_id: Uuid,
    pub source_name: String,
    pub ats_type: AtsType,
    pub strategy: Option<String>,
    pub status: RunStatus,
    pub jobs_found: u32,
    pub jobs_new: u32,
    pub jobs_updated: u32,
    pub duration_ms: u64,
    pub error_kind: Option<ExtractionKind>,
    pub error_message: Option<String>,
    pub content_hash: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// A stored run record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub run: NewRunRecord,
}
