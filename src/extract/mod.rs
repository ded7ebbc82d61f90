pub mod model;
pub mod selectors;
pub mod structured;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::types::Seed;

/// A fetched page handed to extraction strategies.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub html: String,
}

impl Page {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }
}

/// One extraction strategy. The Discovery Engine holds an ordered list of
/// these and escalates down the list when yield is low, so new strategies
/// slot in without touching orchestration.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pull candidate seeds out of a page. An empty result is a valid
    /// outcome; per-candidate extraction failures are skipped internally.
    async fn discover(&self, page: &Page, today: NaiveDate) -> Result<Vec<Seed>>;
}

/// Resolve a possibly-relative href against the page it appeared on.
pub fn resolve_url(page_url: &str, href: &str) -> Option<String> {
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    let base = reqwest::Url::parse(page_url).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_hrefs() {
        assert_eq!(
            resolve_url("https://example.org/schedule", "/events/jazz-night").as_deref(),
            Some("https://example.org/events/jazz-night")
        );
        assert_eq!(
            resolve_url("https://example.org/schedule", "https://tickets.example/x").as_deref(),
            Some("https://tickets.example/x")
        );
        assert_eq!(resolve_url("https://example.org", "#top"), None);
        assert_eq!(resolve_url("https://example.org", "javascript:void(0)"), None);
    }
}
