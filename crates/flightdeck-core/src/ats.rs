//! Applicant-tracking-system classification.
//!
//! Classification is ordered signature matching: every vendor owns a set of
//! URL patterns and a set of page-content markers. URL patterns are checked
//! first for all vendors (most distinctive), then content markers, and the
//! first hit wins. Anything unrecognised resolves to
//! [`AtsType::CustomFallback`]; classification never fails.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::source::{Source, Tier};

/// Closed set of ATS labels. Each label is bound to one extraction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtsType {
    Taleo,
    Workday,
    #[serde(rename = "successfactors")]
    SuccessFactors,
    Brassring,
    Icims,
    Greenhouse,
    Lever,
    #[serde(rename = "smartrecruiters")]
    SmartRecruiters,
    Avature,
    CustomFallback,
    Unknown,
}

impl AtsType {
    pub const ALL: [AtsType; 11] = [
        AtsType::Taleo,
        AtsType::Workday,
        AtsType::SuccessFactors,
        AtsType::Brassring,
        AtsType::Icims,
        AtsType::Greenhouse,
        AtsType::Lever,
        AtsType::SmartRecruiters,
        AtsType::Avature,
        AtsType::CustomFallback,
        AtsType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AtsType::Taleo => "taleo",
            AtsType::Workday => "workday",
            AtsType::SuccessFactors => "successfactors",
            AtsType::Brassring => "brassring",
            AtsType::Icims => "icims",
            AtsType::Greenhouse => "greenhouse",
            AtsType::Lever => "lever",
            AtsType::SmartRecruiters => "smartrecruiters",
            AtsType::Avature => "avature",
            AtsType::CustomFallback => "custom_fallback",
            AtsType::Unknown => "unknown",
        }
    }

    /// True for labels that name a real vendor (and so a vendor strategy).
    pub fn is_vendor(&self) -> bool {
        !matches!(self, AtsType::CustomFallback | AtsType::Unknown)
    }
}

impl fmt::Display for AtsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AtsType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace(['-', ' '], "_");
        match key.as_str() {
            "taleo" => Ok(AtsType::Taleo),
            "workday" => Ok(AtsType::Workday),
            "successfactors" | "success_factors" => Ok(AtsType::SuccessFactors),
            "brassring" => Ok(AtsType::Brassring),
            "icims" => Ok(AtsType::Icims),
            "greenhouse" => Ok(AtsType::Greenhouse),
            "lever" => Ok(AtsType::Lever),
            "smartrecruiters" | "smart_recruiters" => Ok(AtsType::SmartRecruiters),
            "avature" => Ok(AtsType::Avature),
            "custom_fallback" | "custom" | "custom_ai" | "generic" => Ok(AtsType::CustomFallback),
            "unknown" => Ok(AtsType::Unknown),
            _ => Err(format!("Unknown ATS type: {s}")),
        }
    }
}

/// How much a classification can be trusted on later runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Nothing matched; fallback label.
    Low,
    /// Matched a marker in page content.
    Medium,
    /// Matched the URL itself.
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Confidence::Low),
            "medium" => Ok(Confidence::Medium),
            "high" => Ok(Confidence::High),
            _ => Err(format!("Unknown confidence: {s}")),
        }
    }
}

/// Result of classifying a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub ats_type: AtsType,
    pub confidence: Confidence,
    /// The signature that matched, if any.
    pub matched: Option<&'static str>,
}

impl Classification {
    pub fn fallback() -> Self {
        Self {
            ats_type: AtsType::CustomFallback,
            confidence: Confidence::Low,
            matched: None,
        }
    }
}

struct Signature {
    ats_type: AtsType,
    url_patterns: &'static [&'static str],
    content_markers: &'static [&'static str],
}

// Priority order. Taleo precedes Workday because Oracle-hosted Taleo
// career sites share infrastructure domains with other Oracle products.
const SIGNATURES: &[Signature] = &[
    Signature {
        ats_type: AtsType::Taleo,
        url_patterns: &["taleo.net", "taleo.com", "oraclecloud.com/hcmui"],
        content_markers: &["taleo.net", "/careersection/"],
    },
    Signature {
        ats_type: AtsType::Workday,
        url_patterns: &[
            "myworkdayjobs.com",
            "myworkdaysite.com",
            "workday.com",
            ".wd1.",
            ".wd3.",
            ".wd5.",
        ],
        content_markers: &["myworkdayjobs.com", "data-automation-id=\"jobtitle\""],
    },
    Signature {
        ats_type: AtsType::SuccessFactors,
        url_patterns: &[
            "successfactors.com",
            "successfactors.eu",
            "jobs2web.com",
            "sapsf.",
        ],
        content_markers: &["successfactors", "jobs2web", "careersitetoken"],
    },
    Signature {
        ats_type: AtsType::Brassring,
        url_patterns: &["brassring"],
        content_markers: &["brassring"],
    },
    Signature {
        ats_type: AtsType::Icims,
        url_patterns: &["icims.com"],
        content_markers: &["icims.com", "icims_"],
    },
    Signature {
        ats_type: AtsType::Greenhouse,
        url_patterns: &["greenhouse.io"],
        content_markers: &["boards.greenhouse.io", "grnhse_app"],
    },
    Signature {
        ats_type: AtsType::Lever,
        url_patterns: &["jobs.lever.co", "api.lever.co"],
        content_markers: &["jobs.lever.co"],
    },
    Signature {
        ats_type: AtsType::SmartRecruiters,
        url_patterns: &["smartrecruiters.com"],
        content_markers: &["smartrecruiters.com"],
    },
    Signature {
        ats_type: AtsType::Avature,
        url_patterns: &["avature.net"],
        content_markers: &["avature.net"],
    },
];

/// Classify a target from its URL and, optionally, its fetched page.
///
/// A URL signature always wins over page content.
pub fn classify(url: &str, content: Option<&str>) -> Classification {
    let url = url.to_lowercase();
    for sig in SIGNATURES {
        if let Some(pattern) = sig.url_patterns.iter().find(|p| url.contains(*p)) {
            return Classification {
                ats_type: sig.ats_type,
                confidence: Confidence::High,
                matched: Some(pattern),
            };
        }
    }

    if let Some(content) = content {
        let content = content.to_lowercase();
        for sig in SIGNATURES {
            if let Some(marker) = sig.content_markers.iter().find(|m| content.contains(*m)) {
                return Classification {
                    ats_type: sig.ats_type,
                    confidence: Confidence::Medium,
                    matched: Some(marker),
                };
            }
        }
    }

    Classification::fallback()
}

/// Knobs deciding when a cached classification is re-examined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierPolicy {
    /// Consecutive zero-result runs after which the site is assumed to have changed.
    pub empty_run_threshold: u32,
    /// Tiers whose untrusted classifications are re-checked on every run.
    pub retry_tiers: Vec<Tier>,
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self {
            empty_run_threshold: 3,
            retry_tiers: vec![Tier::One, Tier::Two],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclassifyReason {
    /// The source was never classified.
    Unassigned,
    /// The cached label is the fallback or came from a weak match.
    Untrusted,
    /// Too many consecutive empty extractions under the cached label.
    RepeatedEmpty,
}

/// Decide whether `source` should be classified again before extraction.
pub fn needs_reclassification(
    source: &Source,
    policy: &ClassifierPolicy,
) -> Option<ReclassifyReason> {
    if source.ats_override {
        return None;
    }
    let Some(ats_type) = source.ats_type else {
        return Some(ReclassifyReason::Unassigned);
    };
    if source.consecutive_empty_runs >= policy.empty_run_threshold {
        return Some(ReclassifyReason::RepeatedEmpty);
    }
    let untrusted = !ats_type.is_vendor()
        || source
            .ats_confidence
            .is_none_or(|c| c == Confidence::Low);
    if untrusted && policy.retry_tiers.contains(&source.tier) {
        return Some(ReclassifyReason::Untrusted);
    }
    None
}
