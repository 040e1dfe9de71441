use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ats::AtsType;
use crate::source::Region;

/// Position category of a pilot posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionCategory {
    Captain,
    FirstOfficer,
    Cadet,
    Instructor,
    Other,
}

impl PositionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionCategory::Captain => "captain",
            PositionCategory::FirstOfficer => "first_officer",
            PositionCategory::Cadet => "cadet",
            PositionCategory::Instructor => "instructor",
            PositionCategory::Other => "other",
        }
    }
}

impl fmt::Display for PositionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PositionCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace(['-', ' ', '/'], "_");
        match key.as_str() {
            "captain" | "commander" => Ok(PositionCategory::Captain),
            "first_officer" | "f_o" | "fo" | "co_pilot" | "second_officer" => {
                Ok(PositionCategory::FirstOfficer)
            }
            "cadet" | "trainee" => Ok(PositionCategory::Cadet),
            "instructor" | "examiner" => Ok(PositionCategory::Instructor),
            "other" => Ok(PositionCategory::Other),
            _ => Err(format!("Unknown position category: {s}")),
        }
    }
}

/// One job record as a strategy found it. Every field is optional; the
/// normalizer decides what is usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawJob {
    pub title: Option<String>,
    pub application_url: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub date_posted: Option<String>,
    pub position: Option<String>,
    pub aircraft: Option<String>,
    pub min_total_hours: Option<u32>,
    pub min_pic_hours: Option<u32>,
    pub min_type_hours: Option<u32>,
    pub license: Option<String>,
    pub contract_type: Option<String>,
    pub type_rating_required: Option<bool>,
    pub type_rating_provided: Option<bool>,
    pub visa_sponsorship: Option<bool>,
    pub region: Option<String>,
}

impl RawJob {
    pub fn new(title: impl Into<String>, application_url: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            application_url: Some(application_url.into()),
            ..Self::default()
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = non_blank(location.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = non_blank(description.into());
        self
    }

    pub fn with_date_posted(mut self, date: impl Into<String>) -> Self {
        self.date_posted = non_blank(date.into());
        self
    }

    /// Build a record from a loosely-typed field map, as returned by a
    /// content-extraction heuristic. Unknown keys are ignored and values
    /// of the wrong shape are treated as missing.
    pub fn from_fields(fields: &serde_json::Map<String, serde_json::Value>) -> Self {
        let text = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| fields.get(*k))
                .find_map(value_as_text)
        };
        let hours = |keys: &[&str]| keys.iter().filter_map(|k| fields.get(*k)).find_map(value_as_hours);
        let flag = |keys: &[&str]| keys.iter().filter_map(|k| fields.get(*k)).find_map(|v| v.as_bool());

        let aircraft = match fields.get("aircraft") {
            Some(serde_json::Value::Array(items)) => {
                let names: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
                if names.is_empty() {
                    None
                } else {
                    Some(names.join(", "))
                }
            }
            Some(other) => value_as_text(other),
            None => text(&["aircraft_type"]),
        };

        Self {
            title: text(&["title", "job_title"]),
            application_url: text(&["application_url", "url", "link"]),
            company: text(&["company"]),
            location: text(&["location"]),
            description: text(&["description", "description_summary"]),
            date_posted: text(&["date_posted", "posted_on"]),
            position: text(&["position", "position_type"]),
            aircraft,
            min_total_hours: hours(&["min_total_hours", "min_hours"]),
            min_pic_hours: hours(&["min_pic_hours"]),
            min_type_hours: hours(&["min_type_hours"]),
            license: text(&["license", "license_required"]),
            contract_type: text(&["contract_type"]),
            type_rating_required: flag(&["type_rating_required"]),
            type_rating_provided: flag(&["type_rating_provided"]),
            visa_sponsorship: flag(&["visa_sponsorship", "visa_sponsored"]),
            region: text(&["region"]),
        }
    }
}

fn non_blank(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn value_as_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => non_blank(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// Zero means "not stated" in most upstream payloads.
fn value_as_hours(value: &serde_json::Value) -> Option<u32> {
    let hours = match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }?;
    u32::try_from(hours).ok().filter(|h| *h > 0)
}

/// A posting in canonical form, ready for upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedJob {
    pub application_url: String,
    pub source_name: String,
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub region: Region,
    pub position: PositionCategory,
    pub aircraft_type: Option<String>,
    pub contract_type: Option<String>,
    pub min_total_hours: Option<u32>,
    pub min_pic_hours: Option<u32>,
    pub min_type_hours: Option<u32>,
    pub license_required: Option<String>,
    pub type_rating_required: bool,
    pub type_rating_provided: bool,
    pub is_entry_level: bool,
    pub visa_sponsorship: bool,
    pub description: Option<String>,
    pub date_posted: Option<NaiveDate>,
    pub ats_type: Option<AtsType>,
}

/// A stored posting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPosting {
    pub id: Uuid,
    #[serde(flatten)]
    pub job: NormalizedJob,
    pub is_active: bool,
    pub date_scraped: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Filter for listing active postings.
#[derive(Debug, Clone, Default)]
pub struct PostingFilter {
    pub region: Option<Region>,
    pub position: Option<PositionCategory>,
    pub entry_level: Option<bool>,
    pub source_name: Option<String>,
    pub limit: usize,
}

impl PostingFilter {
    pub fn matches(&self, posting: &JobPosting) -> bool {
        posting.is_active
            && self.region.is_none_or(|r| r == posting.job.region)
            && self.position.is_none_or(|p| p == posting.job.position)
            && self.entry_level.is_none_or(|e| e == posting.job.is_entry_level)
            && self
                .source_name
                .as_deref()
                .is_none_or(|n| n == posting.job.source_name)
    }
}

/// Result of an upsert batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertCounts {
    pub inserted: u32,
    pub updated: u32,
}

impl UpsertCounts {
    pub fn total(&self) -> u32 {
        self.inserted + self.updated
    }
}

impl AddAssign for UpsertCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.updated += rhs.updated;
    }
}
