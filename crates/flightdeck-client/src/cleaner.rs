use std::sync::Arc;

use flightdeck_core::error::AppError;
use flightdeck_core::traits::Cleaner;
use htmd::HtmlToMarkdown;

/// Page chrome that never holds postings.
const CHROME_TAGS: &[&str] = &[
    "script", "style", "noscript", "iframe", "svg", "nav", "footer", "header", "aside", "form",
];

/// HTML-to-Markdown cleaner used before handing a career page to the AI
/// extractor. Links survive as `[text](href)` so postings keep their URLs.
pub struct HtmdCleaner {
    converter: Arc<HtmlToMarkdown>,
}

impl Clone for HtmdCleaner {
    fn clone(&self) -> Self {
        Self {
            converter: Arc::clone(&self.converter),
        }
    }
}

impl HtmdCleaner {
    pub fn new() -> Self {
        Self::with_skip_tags(CHROME_TAGS)
    }

    pub fn with_skip_tags(tags: &[&str]) -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(tags.to_vec())
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }
}

impl Default for HtmdCleaner {
    fn default() -> Self {
        Self::new()
    }
}

impl Cleaner for HtmdCleaner {
    fn clean(&self, html: &str) -> Result<String, AppError> {
        self.converter
            .convert(html)
            .map_err(|e| AppError::CleanerError(e.to_string()))
    }
}
