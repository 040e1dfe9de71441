//! Mapping of raw strategy records onto canonical postings.
//!
//! The product rules (entry-level, visa sponsorship, region inference and
//! junk filtering) are separate public functions driven by a
//! [`NormalizationPolicy`], so they can be tested and changed on their own.
//! The policy can be loaded from JSON; every field is optional and falls
//! back to the built-in default:
//!
//! ```json
//! {
//!   "sponsor_regions": ["middle_east", "asia"],
//!   "sponsor_companies": ["Emirates"],
//!   "entry_level_max_hours": 500
//! }
//! ```

use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ats::AtsType;
use crate::error::AppError;
use crate::posting::{NormalizedJob, PositionCategory, RawJob};
use crate::source::{Region, Source};
use crate::util::{collapse_whitespace, truncate_chars};

/// Column length limits of the posting schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldLimits {
    pub title: usize,
    pub company: usize,
    pub location: usize,
    pub aircraft: usize,
    pub license: usize,
    pub contract: usize,
    pub description: usize,
}

impl Default for FieldLimits {
    fn default() -> Self {
        Self {
            title: 500,
            company: 255,
            location: 255,
            aircraft: 100,
            license: 100,
            contract: 50,
            description: 20_000,
        }
    }
}

/// Product policy applied by the [`Normalizer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationPolicy {
    /// Regions where employers routinely sponsor work visas.
    pub sponsor_regions: Vec<Region>,
    /// Employers known to sponsor regardless of region (case-insensitive).
    pub sponsor_companies: Vec<String>,
    /// A stated minimum strictly below this many total hours marks a posting entry-level.
    pub entry_level_max_hours: u32,
    /// Title words that mark a scraped link as site chrome rather than a job.
    pub junk_title_keywords: Vec<String>,
    pub limits: FieldLimits,
}

impl Default for NormalizationPolicy {
    fn default() -> Self {
        Self {
            sponsor_regions: vec![Region::MiddleEast],
            sponsor_companies: Vec::new(),
            entry_level_max_hours: 500,
            junk_title_keywords: ["faq", "login", "register", "game", "policy"]
                .into_iter()
                .map(String::from)
                .collect(),
            limits: FieldLimits::default(),
        }
    }
}

impl NormalizationPolicy {
    pub fn from_json(json: &str) -> Result<Self, AppError> {
        serde_json::from_str(json)
            .map_err(|e| AppError::ConfigError(format!("Invalid normalization policy: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to read policy {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn is_sponsor_company(&self, company: &str) -> bool {
        let company = company.trim().to_lowercase();
        self.sponsor_companies
            .iter()
            .any(|c| c.trim().to_lowercase() == company)
    }
}

// ---------------------------------------------------------------------------
// Phrase matching
// ---------------------------------------------------------------------------

/// Lowercase `s` and turn every run of non-alphanumerics into one space,
/// padded at both ends, so whole-word phrases can be found with `contains`.
pub(crate) fn phrase_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push(' ');
    let mut gap = true;
    for ch in s.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            gap = false;
        } else if !gap {
            out.push(' ');
            gap = true;
        }
    }
    if !gap {
        out.push(' ');
    }
    out
}

fn has_phrase(text: &str, phrase: &str) -> bool {
    text.contains(&format!(" {phrase} "))
}

fn first_phrase<'a>(text: &str, phrases: &[&'a str]) -> Option<&'a str> {
    phrases.iter().copied().find(|p| has_phrase(text, p))
}

const CAPTAIN: &[&str] = &["captain", "commander", "pic", "p i c"];
const FIRST_OFFICER: &[&str] = &[
    "first officer",
    "f o",
    "fo",
    "co pilot",
    "copilot",
    "second officer",
    "s o",
];
const CADET: &[&str] = &["cadet", "trainee", "ab initio", "mpl", "mentored"];
const INSTRUCTOR: &[&str] = &["instructor", "trf", "tri", "tre", "examiner", "check pilot"];

const PILOT_KEYWORDS: &[&str] = &[
    "pilot",
    "pilots",
    "captain",
    "first officer",
    "second officer",
    "f o",
    "co pilot",
    "copilot",
    "flight crew",
    "flight deck",
    "cockpit",
    "type rating",
    "atpl",
    "cpl",
    "mpl",
    "aviator",
    "cadet",
    "ab initio",
    "direct entry",
    "a320",
    "a330",
    "a350",
    "a380",
    "b737",
    "b747",
    "b777",
    "b787",
    "737",
    "777",
    "787",
];

const NON_PILOT_KEYWORDS: &[&str] = &["cabin crew", "flight attendant", "cabin attendant"];

const AIRCRAFT: &[(&str, &str)] = &[
    ("a320neo", "Airbus A320neo"),
    ("a320 neo", "Airbus A320neo"),
    ("a321neo", "Airbus A321neo"),
    ("a319", "Airbus A319"),
    ("a320", "Airbus A320"),
    ("a321", "Airbus A321"),
    ("a330", "Airbus A330"),
    ("a340", "Airbus A340"),
    ("a350", "Airbus A350"),
    ("a380", "Airbus A380"),
    ("b737 max", "Boeing 737 MAX"),
    ("737 max", "Boeing 737 MAX"),
    ("737max", "Boeing 737 MAX"),
    ("b737max", "Boeing 737 MAX"),
    ("737ng", "Boeing 737NG"),
    ("b737", "Boeing 737"),
    ("737", "Boeing 737"),
    ("b747", "Boeing 747"),
    ("747", "Boeing 747"),
    ("b777", "Boeing 777"),
    ("777", "Boeing 777"),
    ("b787", "Boeing 787"),
    ("787", "Boeing 787"),
    ("dreamliner", "Boeing 787"),
    ("e190", "Embraer E190"),
    ("e195", "Embraer E195"),
    ("e jet", "Embraer E-Jet"),
    ("atr72", "ATR 72"),
    ("atr 72", "ATR 72"),
    ("atr42", "ATR 42"),
    ("atr 42", "ATR 42"),
    ("atr", "ATR"),
    ("crj900", "Bombardier CRJ-900"),
    ("crj 900", "Bombardier CRJ-900"),
    ("crj", "Bombardier CRJ"),
    ("dash 8", "De Havilland Dash 8"),
    ("q400", "Dash 8 Q400"),
];

// South America precedes North America so "latin america" is not read as "america".
const REGION_KEYWORDS: &[(&str, Region)] = &[
    ("uae", Region::MiddleEast),
    ("united arab emirates", Region::MiddleEast),
    ("dubai", Region::MiddleEast),
    ("abu dhabi", Region::MiddleEast),
    ("qatar", Region::MiddleEast),
    ("doha", Region::MiddleEast),
    ("saudi", Region::MiddleEast),
    ("riyadh", Region::MiddleEast),
    ("jeddah", Region::MiddleEast),
    ("bahrain", Region::MiddleEast),
    ("oman", Region::MiddleEast),
    ("muscat", Region::MiddleEast),
    ("kuwait", Region::MiddleEast),
    ("uk", Region::Europe),
    ("united kingdom", Region::Europe),
    ("london", Region::Europe),
    ("ireland", Region::Europe),
    ("dublin", Region::Europe),
    ("germany", Region::Europe),
    ("frankfurt", Region::Europe),
    ("munich", Region::Europe),
    ("france", Region::Europe),
    ("paris", Region::Europe),
    ("spain", Region::Europe),
    ("madrid", Region::Europe),
    ("italy", Region::Europe),
    ("netherlands", Region::Europe),
    ("amsterdam", Region::Europe),
    ("switzerland", Region::Europe),
    ("zurich", Region::Europe),
    ("austria", Region::Europe),
    ("vienna", Region::Europe),
    ("belgium", Region::Europe),
    ("brussels", Region::Europe),
    ("portugal", Region::Europe),
    ("lisbon", Region::Europe),
    ("poland", Region::Europe),
    ("warsaw", Region::Europe),
    ("hungary", Region::Europe),
    ("budapest", Region::Europe),
    ("czech", Region::Europe),
    ("prague", Region::Europe),
    ("norway", Region::Europe),
    ("oslo", Region::Europe),
    ("sweden", Region::Europe),
    ("stockholm", Region::Europe),
    ("finland", Region::Europe),
    ("helsinki", Region::Europe),
    ("denmark", Region::Europe),
    ("copenhagen", Region::Europe),
    ("greece", Region::Europe),
    ("athens", Region::Europe),
    ("turkey", Region::Europe),
    ("istanbul", Region::Europe),
    ("singapore", Region::Asia),
    ("hong kong", Region::Asia),
    ("japan", Region::Asia),
    ("tokyo", Region::Asia),
    ("korea", Region::Asia),
    ("seoul", Region::Asia),
    ("china", Region::Asia),
    ("beijing", Region::Asia),
    ("shanghai", Region::Asia),
    ("taiwan", Region::Asia),
    ("taipei", Region::Asia),
    ("thailand", Region::Asia),
    ("bangkok", Region::Asia),
    ("malaysia", Region::Asia),
    ("kuala lumpur", Region::Asia),
    ("indonesia", Region::Asia),
    ("jakarta", Region::Asia),
    ("philippines", Region::Asia),
    ("manila", Region::Asia),
    ("vietnam", Region::Asia),
    ("hanoi", Region::Asia),
    ("india", Region::Asia),
    ("mumbai", Region::Asia),
    ("delhi", Region::Asia),
    ("australia", Region::Oceania),
    ("sydney", Region::Oceania),
    ("melbourne", Region::Oceania),
    ("brisbane", Region::Oceania),
    ("new zealand", Region::Oceania),
    ("auckland", Region::Oceania),
    ("brazil", Region::SouthAmerica),
    ("sao paulo", Region::SouthAmerica),
    ("são paulo", Region::SouthAmerica),
    ("argentina", Region::SouthAmerica),
    ("buenos aires", Region::SouthAmerica),
    ("chile", Region::SouthAmerica),
    ("santiago", Region::SouthAmerica),
    ("colombia", Region::SouthAmerica),
    ("bogota", Region::SouthAmerica),
    ("peru", Region::SouthAmerica),
    ("lima", Region::SouthAmerica),
    ("panama", Region::SouthAmerica),
    ("latin america", Region::SouthAmerica),
    ("usa", Region::NorthAmerica),
    ("united states", Region::NorthAmerica),
    ("america", Region::NorthAmerica),
    ("atlanta", Region::NorthAmerica),
    ("new york", Region::NorthAmerica),
    ("los angeles", Region::NorthAmerica),
    ("chicago", Region::NorthAmerica),
    ("dallas", Region::NorthAmerica),
    ("denver", Region::NorthAmerica),
    ("canada", Region::NorthAmerica),
    ("toronto", Region::NorthAmerica),
    ("vancouver", Region::NorthAmerica),
    ("mexico", Region::NorthAmerica),
    ("south africa", Region::Africa),
    ("johannesburg", Region::Africa),
    ("kenya", Region::Africa),
    ("nairobi", Region::Africa),
    ("ethiopia", Region::Africa),
    ("addis ababa", Region::Africa),
    ("egypt", Region::Africa),
    ("cairo", Region::Africa),
    ("morocco", Region::Africa),
    ("casablanca", Region::Africa),
    ("nigeria", Region::Africa),
    ("lagos", Region::Africa),
];

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Entry-level iff cadet, or a stated minimum below the policy threshold, or
/// a provided type rating on a non-captain role. Missing hours alone never
/// qualify.
pub fn is_entry_level(
    position: PositionCategory,
    min_total_hours: Option<u32>,
    type_rating_provided: bool,
    policy: &NormalizationPolicy,
) -> bool {
    position == PositionCategory::Cadet
        || min_total_hours.is_some_and(|h| h < policy.entry_level_max_hours)
        || (type_rating_provided && position != PositionCategory::Captain)
}

/// An explicit statement by the source wins. Otherwise sponsorship is
/// assumed for sponsor-friendly regions and allowlisted employers only.
pub fn visa_sponsorship(
    region: Region,
    company: &str,
    stated: Option<bool>,
    policy: &NormalizationPolicy,
) -> bool {
    match stated {
        Some(stated) => stated,
        None => policy.sponsor_regions.contains(&region) || policy.is_sponsor_company(company),
    }
}

/// Region precedence: the record's own region, then the source's configured
/// region, then keywords in the location, then `global`.
pub fn infer_region(
    raw_region: Option<&str>,
    source_region: Option<Region>,
    location: Option<&str>,
) -> Region {
    raw_region
        .and_then(|r| r.parse().ok())
        .or(source_region)
        .or_else(|| location.and_then(region_from_location))
        .unwrap_or(Region::Global)
}

pub fn region_from_location(location: &str) -> Option<Region> {
    let text = phrase_text(location);
    REGION_KEYWORDS
        .iter()
        .find(|(keyword, _)| has_phrase(&text, keyword))
        .map(|(_, region)| *region)
}

pub fn detect_position(title: &str) -> PositionCategory {
    let text = phrase_text(title);
    if first_phrase(&text, CAPTAIN).is_some() {
        PositionCategory::Captain
    } else if first_phrase(&text, FIRST_OFFICER).is_some() {
        PositionCategory::FirstOfficer
    } else if first_phrase(&text, CADET).is_some() {
        PositionCategory::Cadet
    } else if first_phrase(&text, INSTRUCTOR).is_some() {
        PositionCategory::Instructor
    } else {
        PositionCategory::Other
    }
}

/// True when a title looks like a flight-deck role.
pub fn is_pilot_related(title: &str) -> bool {
    let text = phrase_text(title);
    first_phrase(&text, NON_PILOT_KEYWORDS).is_none()
        && first_phrase(&text, PILOT_KEYWORDS).is_some()
}

/// The first junk keyword found in `title`, if any.
pub fn junk_keyword<'a>(title: &str, policy: &'a NormalizationPolicy) -> Option<&'a str> {
    let text = phrase_text(title);
    policy
        .junk_title_keywords
        .iter()
        .map(String::as_str)
        .find(|keyword| has_phrase(&text, &keyword.to_lowercase()))
}

pub fn detect_aircraft(text: &str) -> Option<&'static str> {
    let text = phrase_text(text);
    AIRCRAFT
        .iter()
        .find(|(alias, _)| has_phrase(&text, alias))
        .map(|(_, name)| *name)
}

/// Returns `(required, provided)`.
pub fn detect_type_rating(text: &str) -> (bool, bool) {
    let text = phrase_text(text);
    let non_type_rated = has_phrase(&text, "non type rated");
    let required = !non_type_rated
        && first_phrase(
            &text,
            &["type rating required", "type rated", "current type", "valid type rating"],
        )
        .is_some();
    let provided = non_type_rated
        || first_phrase(
            &text,
            &[
                "type rating provided",
                "type rating included",
                "type rating will be provided",
                "conversion",
            ],
        )
        .is_some();
    (required, provided)
}

pub fn detect_license(text: &str) -> Option<&'static str> {
    let text = phrase_text(text);
    if has_phrase(&text, "frozen atpl") {
        Some("Frozen ATPL")
    } else if has_phrase(&text, "atpl") {
        Some("ATPL")
    } else if has_phrase(&text, "mpl") {
        Some("MPL")
    } else if has_phrase(&text, "cpl") {
        Some("CPL")
    } else {
        None
    }
}

pub fn detect_contract(text: &str) -> Option<&'static str> {
    let text = phrase_text(text);
    if has_phrase(&text, "seasonal") {
        Some("seasonal")
    } else if first_phrase(&text, &["fixed term", "contract", "contractor"]).is_some() {
        Some("contract")
    } else if first_phrase(&text, &["freelance", "freelancer"]).is_some() {
        Some("freelance")
    } else if first_phrase(&text, &["permanent", "full time"]).is_some() {
        Some("permanent")
    } else {
        None
    }
}

/// An explicit statement about visa sponsorship in free text.
pub fn detect_visa_statement(text: &str) -> Option<bool> {
    let text = phrase_text(text);
    let negative = [
        "no visa sponsorship",
        "not provide visa",
        "not offer visa",
        "unable to sponsor",
        "cannot sponsor",
        "without sponsorship",
        "must have the right to work",
        "existing right to work",
    ];
    let positive = [
        "visa sponsorship",
        "visa provided",
        "visa will be provided",
        "work permit provided",
        "sponsorship available",
    ];
    if first_phrase(&text, &negative).is_some() {
        Some(false)
    } else if first_phrase(&text, &positive).is_some() {
        Some(true)
    } else {
        None
    }
}

const HOURS_NUM: &str = r"(\d{1,2}[,.]\d{3}|\d{3,5})";

static TOTAL_HOURS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // ranges take the lower bound
        format!(r"(?i){HOURS_NUM}\s*(?:-|–|to)\s*{HOURS_NUM}\s*(?:hours?|hrs?|h)\b"),
        format!(r"(?i)(?:minimum|min\.?|at least)\s*(?:of\s*)?{HOURS_NUM}"),
        format!(r"(?i)(?:total\s*time|tt)\s*[:\-]?\s*{HOURS_NUM}"),
        format!(r"(?i){HOURS_NUM}\s*\+?\s*(?:total\s+)?(?:flying\s+|flight\s+)?(?:hours?|hrs?|h)\b"),
    ]
    .iter()
    .map(|p| Regex::new(p).expect("hour pattern is valid"))
    .collect()
});

static PIC_HOURS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        format!(
            r"(?i){HOURS_NUM}\s*\+?\s*(?:hours?|hrs?|h)?\s*(?:of\s+)?(?:as\s+)?(?:pic|p\.i\.c\.?|pilot[\s-]in[\s-]command|command)\b"
        ),
        format!(
            r"(?i)(?:pic|pilot[\s-]in[\s-]command)\s*(?:time|hours|experience)?\s*[:\-]?\s*(?:of\s*)?{HOURS_NUM}"
        ),
    ]
    .iter()
    .map(|p| Regex::new(p).expect("PIC pattern is valid"))
    .collect()
});

fn parse_hours(raw: &str) -> Option<u32> {
    let hours: u32 = raw.replace([',', '.'], "").parse().ok()?;
    (100..=25_000).contains(&hours).then_some(hours)
}

fn mentions_command(tail: &str) -> bool {
    let window: String = tail.chars().take(20).collect::<String>().to_lowercase();
    window.contains("pic") || window.contains("command")
}

/// Minimum total flight hours stated in free text.
pub fn detect_total_hours(text: &str) -> Option<u32> {
    let text = collapse_whitespace(text);
    for pattern in TOTAL_HOURS.iter() {
        for caps in pattern.captures_iter(&text) {
            let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if mentions_command(&text[whole.end()..]) {
                continue;
            }
            if let Some(hours) = parse_hours(number.as_str()) {
                return Some(hours);
            }
        }
    }
    None
}

/// Minimum pilot-in-command hours stated in free text.
pub fn detect_pic_hours(text: &str) -> Option<u32> {
    let text = collapse_whitespace(text);
    PIC_HOURS.iter().find_map(|pattern| {
        pattern
            .captures_iter(&text)
            .filter_map(|caps| caps.get(1))
            .find_map(|m| parse_hours(m.as_str()))
    })
}

/// Best-effort parse of a scraper-supplied posting date.
pub fn parse_posted_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    const FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%d/%m/%Y",
        "%d.%m.%Y",
        "%d %B %Y",
        "%d %b %Y",
        "%B %d, %Y",
        "%b %d, %Y",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            raw.get(..10)
                .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        })
}

/// Parse an absolute http(s) URL and drop its fragment.
pub fn canonical_url(raw: &str) -> Option<String> {
    let mut url = url::Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Why a raw record was not turned into a posting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("record has no title")]
    MissingTitle,
    #[error("record has no application URL")]
    MissingUrl,
    #[error("invalid application URL: {0}")]
    InvalidUrl(String),
    #[error("junk title (matched '{0}')")]
    Junk(String),
}

/// Per-source facts the normalizer needs.
#[derive(Debug, Clone, Copy)]
pub struct SourceContext<'a> {
    pub source_name: &'a str,
    pub company: &'a str,
    pub region: Option<Region>,
    pub ats_type: AtsType,
}

impl<'a> SourceContext<'a> {
    pub fn for_source(source: &'a Source, ats_type: AtsType) -> Self {
        Self {
            source_name: &source.name,
            company: &source.name,
            region: source.region,
            ats_type,
        }
    }
}

fn clean_text(value: Option<&str>) -> Option<String> {
    value
        .map(collapse_whitespace)
        .filter(|s| !s.is_empty())
}

/// Shapes raw records into canonical postings under a [`NormalizationPolicy`].
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    policy: NormalizationPolicy,
}

impl Normalizer {
    pub fn new(policy: NormalizationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &NormalizationPolicy {
        &self.policy
    }

    pub fn normalize(
        &self,
        raw: RawJob,
        ctx: &SourceContext<'_>,
    ) -> Result<NormalizedJob, Rejection> {
        let limits = &self.policy.limits;

        let title = clean_text(raw.title.as_deref()).ok_or(Rejection::MissingTitle)?;
        if let Some(keyword) = junk_keyword(&title, &self.policy) {
            return Err(Rejection::Junk(keyword.to_string()));
        }
        let url = raw
            .application_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(Rejection::MissingUrl)?;
        let application_url =
            canonical_url(url).ok_or_else(|| Rejection::InvalidUrl(url.to_string()))?;

        let description = raw
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        let text = format!("{title} {}", description.as_deref().unwrap_or_default());

        let location = clean_text(raw.location.as_deref());
        let company = clean_text(raw.company.as_deref()).unwrap_or_else(|| ctx.company.to_string());
        let position = raw
            .position
            .as_deref()
            .and_then(|p| p.parse().ok())
            .unwrap_or_else(|| detect_position(&title));
        let region = infer_region(raw.region.as_deref(), ctx.region, location.as_deref());

        let (rating_required, rating_provided) = detect_type_rating(&text);
        let type_rating_required = raw.type_rating_required.unwrap_or(rating_required);
        let type_rating_provided = raw.type_rating_provided.unwrap_or(rating_provided);
        let min_total_hours = raw.min_total_hours.or_else(|| detect_total_hours(&text));
        let min_pic_hours = raw.min_pic_hours.or_else(|| detect_pic_hours(&text));

        let stated_visa = raw
            .visa_sponsorship
            .or_else(|| detect_visa_statement(&text));

        let aircraft_type = clean_text(raw.aircraft.as_deref())
            .or_else(|| detect_aircraft(&text).map(String::from));
        let license_required =
            clean_text(raw.license.as_deref()).or_else(|| detect_license(&text).map(String::from));
        let contract_type = clean_text(raw.contract_type.as_deref())
            .or_else(|| detect_contract(&text).map(String::from));

        Ok(NormalizedJob {
            application_url,
            source_name: ctx.source_name.to_string(),
            title: truncate_chars(&title, limits.title),
            visa_sponsorship: visa_sponsorship(region, &company, stated_visa, &self.policy),
            company: truncate_chars(&company, limits.company),
            location: location.map(|l| truncate_chars(&l, limits.location)),
            region,
            position,
            aircraft_type: aircraft_type.map(|a| truncate_chars(&a, limits.aircraft)),
            contract_type: contract_type.map(|c| truncate_chars(&c, limits.contract)),
            min_total_hours,
            min_pic_hours,
            min_type_hours: raw.min_type_hours,
            license_required: license_required.map(|l| truncate_chars(&l, limits.license)),
            type_rating_required,
            type_rating_provided,
            is_entry_level: is_entry_level(
                position,
                min_total_hours,
                type_rating_provided,
                &self.policy,
            ),
            description: description.map(|d| truncate_chars(&d, limits.description)),
            date_posted: raw.date_posted.as_deref().and_then(parse_posted_date),
            ats_type: Some(ctx.ats_type),
        })
    }
}
