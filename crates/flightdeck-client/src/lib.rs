pub mod ai;
#[cfg(feature = "browser")]
pub mod browser_fetcher;
pub mod cleaner;
pub mod fetcher;
pub mod link_checker;
pub mod strategies;

#[cfg(test)]
pub(crate) mod testutil;

pub use ai::OpenAiContentExtractor;
#[cfg(feature = "browser")]
pub use browser_fetcher::BrowserFetcher;
pub use cleaner::HtmdCleaner;
pub use fetcher::ReqwestFetcher;
pub use link_checker::{LinkChecker, LinkStatus};
pub use strategies::AtsStrategies;
