pub mod ats;
pub mod circuit_breaker;
pub mod engine;
pub mod error;
pub mod normalize;
pub mod posting;
pub mod run;
pub mod scheduler;
pub mod source;
pub mod throttle;
pub mod traits;
pub mod util;

#[cfg(test)]
pub(crate) mod testutil;

pub use ats::{AtsType, Classification, Confidence, classify};
pub use engine::Engine;
pub use error::{AppError, ExtractionKind};
pub use normalize::{NormalizationPolicy, Normalizer};
pub use posting::{JobPosting, NormalizedJob, RawJob};
pub use run::{RunOutcome, RunStatus};
pub use scheduler::{SchedulerConfig, SmartQueue};
pub use source::{NewSource, Source, SourcePatch, SourceStatus, Tier};
pub use traits::{Fetcher, JobStore, SourceRegistry, StrategySet};
