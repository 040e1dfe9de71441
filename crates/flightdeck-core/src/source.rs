use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ats::{AtsType, Confidence};

/// Priority bucket controlling how often a source is revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Tier {
    One,
    Two,
    Three,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::One, Tier::Two, Tier::Three];

    pub fn as_u8(&self) -> u8 {
        match self {
            Tier::One => 1,
            Tier::Two => 2,
            Tier::Three => 3,
        }
    }

    /// Revisit interval used when a source carries no explicit override.
    pub fn default_frequency_hours(&self) -> u32 {
        match self {
            Tier::One => 3,
            Tier::Two => 12,
            Tier::Three => 24,
        }
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Tier::One),
            2 => Ok(Tier::Two),
            3 => Ok(Tier::Three),
            _ => Err(format!("Unknown tier: {value} (expected 1, 2 or 3)")),
        }
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier.as_u8()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u8 = s
            .trim()
            .parse()
            .map_err(|_| format!("Unknown tier: {s}"))?;
        Tier::try_from(value)
    }
}

/// Health status of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Active,
    Inactive,
    Error,
    PendingReview,
}

impl SourceStatus {
    pub const ALL: [SourceStatus; 4] = [
        SourceStatus::Active,
        SourceStatus::Inactive,
        SourceStatus::Error,
        SourceStatus::PendingReview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Active => "active",
            SourceStatus::Inactive => "inactive",
            SourceStatus::Error => "error",
            SourceStatus::PendingReview => "pending_review",
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SourceStatus::Active),
            "inactive" => Ok(SourceStatus::Inactive),
            "error" => Ok(SourceStatus::Error),
            "pending_review" | "pending-review" => Ok(SourceStatus::PendingReview),
            _ => Err(format!("Unknown source status: {s}")),
        }
    }
}

/// Fixed region enumeration shared by sources and postings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    MiddleEast,
    Europe,
    Asia,
    Oceania,
    NorthAmerica,
    SouthAmerica,
    Africa,
    Global,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::MiddleEast => "middle_east",
            Region::Europe => "europe",
            Region::Asia => "asia",
            Region::Oceania => "oceania",
            Region::NorthAmerica => "north_america",
            Region::SouthAmerica => "south_america",
            Region::Africa => "africa",
            Region::Global => "global",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace([' ', '-'], "_");
        match key.as_str() {
            "middle_east" | "me" => Ok(Region::MiddleEast),
            "europe" | "eu" => Ok(Region::Europe),
            "asia" | "apac" => Ok(Region::Asia),
            "oceania" => Ok(Region::Oceania),
            "north_america" | "na" => Ok(Region::NorthAmerica),
            "south_america" | "latam" => Ok(Region::SouthAmerica),
            "africa" => Ok(Region::Africa),
            "global" | "worldwide" => Ok(Region::Global),
            _ => Err(format!("Unknown region: {s}")),
        }
    }
}

/// One configured career-site target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub ats_type: Option<AtsType>,
    pub ats_confidence: Option<Confidence>,
    /// Set when an operator pinned `ats_type`; the classifier never touches it.
    pub ats_override: bool,
    pub tier: Tier,
    pub frequency_hours: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub status: SourceStatus,
    pub consecutive_failures: u32,
    pub consecutive_empty_runs: u32,
    pub last_error: Option<String>,
    pub region: Option<Region>,
    pub country: Option<String>,
    pub iata_code: Option<String>,
    pub icao_code: Option<String>,
    pub discovered_via: Option<String>,
    pub jobs_found_last_run: u32,
    pub total_jobs_found: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    pub fn frequency(&self) -> TimeDelta {
        TimeDelta::hours(i64::from(self.frequency_hours))
    }

    /// When the source next becomes due, or `None` if it was never checked.
    pub fn next_due_at(&self) -> Option<DateTime<Utc>> {
        self.last_checked_at.map(|checked| checked + self.frequency())
    }
}

/// A candidate source, as produced by discovery, CSV import or the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSource {
    pub name: String,
    pub url: String,
    pub tier: Tier,
    pub frequency_hours: Option<u32>,
    pub ats_type: Option<AtsType>,
    pub region: Option<Region>,
    pub country: Option<String>,
    pub iata_code: Option<String>,
    pub icao_code: Option<String>,
    pub discovered_via: Option<String>,
    pub status: SourceStatus,
}

impl NewSource {
    /// New sources land in tier 3 until an operator promotes them.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            tier: Tier::Three,
            frequency_hours: None,
            ats_type: None,
            region: None,
            country: None,
            iata_code: None,
            icao_code: None,
            discovered_via: None,
            status: SourceStatus::Active,
        }
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_frequency_hours(mut self, hours: u32) -> Self {
        self.frequency_hours = Some(hours);
        self
    }

    /// Pin the ATS type. Pinned types are treated as a manual override.
    pub fn with_ats_type(mut self, ats_type: AtsType) -> Self {
        self.ats_type = Some(ats_type);
        self
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_codes(mut self, iata: Option<String>, icao: Option<String>) -> Self {
        self.iata_code = iata;
        self.icao_code = icao;
        self
    }

    pub fn with_discovered_via(mut self, via: impl Into<String>) -> Self {
        self.discovered_via = Some(via.into());
        self
    }

    pub fn with_status(mut self, status: SourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn effective_frequency_hours(&self) -> u32 {
        self.frequency_hours
            .unwrap_or_else(|| self.tier.default_frequency_hours())
    }

    /// Materialise the candidate as a registry row.
    pub fn into_source(self, now: DateTime<Utc>) -> Source {
        let frequency_hours = self.effective_frequency_hours();
        let ats_override = self.ats_type.is_some();
        Source {
            id: Uuid::new_v4(),
            name: self.name,
            url: self.url,
            ats_type: self.ats_type,
            ats_confidence: self.ats_type.map(|_| Confidence::High),
            ats_override,
            tier: self.tier,
            frequency_hours,
            last_checked_at: None,
            last_success_at: None,
            status: self.status,
            consecutive_failures: 0,
            consecutive_empty_runs: 0,
            last_error: None,
            region: self.region,
            country: self.country,
            iata_code: self.iata_code,
            icao_code: self.icao_code,
            discovered_via: self.discovered_via,
            jobs_found_last_run: 0,
            total_jobs_found: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of a source row. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourcePatch {
    pub ats_type: Option<AtsType>,
    pub ats_confidence: Option<Confidence>,
    pub ats_override: Option<bool>,
    pub tier: Option<Tier>,
    pub frequency_hours: Option<u32>,
    pub status: Option<SourceStatus>,
    pub consecutive_failures: Option<u32>,
    pub consecutive_empty_runs: Option<u32>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    /// `Some(None)` clears the stored error.
    pub last_error: Option<Option<String>>,
    pub jobs_found_last_run: Option<u32>,
    pub total_jobs_found: Option<u64>,
}

impl SourcePatch {
    pub fn is_empty(&self) -> bool {
        *self == SourcePatch::default()
    }

    /// Operator reset: back to active with a clean failure history.
    pub fn reset() -> Self {
        Self {
            status: Some(SourceStatus::Active),
            consecutive_failures: Some(0),
            consecutive_empty_runs: Some(0),
            last_error: Some(None),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, source: &mut Source) {
        if let Some(ats_type) = self.ats_type {
            source.ats_type = Some(ats_type);
        }
        if let Some(confidence) = self.ats_confidence {
            source.ats_confidence = Some(confidence);
        }
        if let Some(pinned) = self.ats_override {
            source.ats_override = pinned;
        }
        if let Some(tier) = self.tier {
            source.tier = tier;
        }
        if let Some(hours) = self.frequency_hours {
            source.frequency_hours = hours;
        }
        if let Some(status) = self.status {
            source.status = status;
        }
        if let Some(failures) = self.consecutive_failures {
            source.consecutive_failures = failures;
        }
        if let Some(empty) = self.consecutive_empty_runs {
            source.consecutive_empty_runs = empty;
        }
        if let Some(at) = self.last_checked_at {
            source.last_checked_at = Some(at);
        }
        if let Some(at) = self.last_success_at {
            source.last_success_at = Some(at);
        }
        if let Some(error) = &self.last_error {
            source.last_error = error.clone();
        }
        if let Some(found) = self.jobs_found_last_run {
            source.jobs_found_last_run = found;
        }
        if let Some(total) = self.total_jobs_found {
            source.total_jobs_found = total;
        }
    }
}

/// Listing filter for the registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceFilter {
    pub status: Option<SourceStatus>,
    pub tier: Option<Tier>,
}

impl SourceFilter {
    pub fn matches(&self, source: &Source) -> bool {
        self.status.is_none_or(|s| s == source.status) && self.tier.is_none_or(|t| t == source.tier)
    }
}

/// Aggregate registry counts for operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: u64,
    pub by_tier: BTreeMap<u8, u64>,
    pub by_status: BTreeMap<String, u64>,
    pub due: u64,
}
