use crate::error::{Result, ScoutError};
use serde::{Deserialize, Serialize};
use std::fs;

/// Top-level application configuration, loaded from `config.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Bound on concurrently crawled sources.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_sources: usize,
    /// Hard deadline per source crawl, seconds.
    #[serde(default = "default_deadline_secs")]
    pub per_source_deadline_secs: u64,
    /// Requests per second allowed against any single host.
    #[serde(default = "default_host_rps")]
    pub host_requests_per_second: f64,
    /// Token bucket burst size per host.
    #[serde(default = "default_host_burst")]
    pub host_burst: u32,
    /// Base URL of the headless render service (browserless-style
    /// /content endpoint). Render-mode fetches fail without it.
    pub render_endpoint: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_max_concurrent() -> usize {
    4
}
fn default_deadline_secs() -> u64 {
    300
}
fn default_host_rps() -> f64 {
    1.0
}
fn default_host_burst() -> u32 {
    3
}
fn default_user_agent() -> String {
    "event_scout/0.1 (+https://github.com/event-scout)".to_string()
}

/// One declarative source definition. This is the seam between the generic
/// pipeline and the per-source configuration that operators maintain.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    pub slug: String,
    pub name: String,
    pub venue_name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    pub typical_month: Option<u32>,
    #[serde(flatten)]
    pub profile: SourceProfile,
}

fn default_active() -> bool {
    true
}

/// Per-source discovery profile consumed by the Discovery Engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceProfile {
    pub entry_urls: Vec<String>,
    pub discovery: DiscoveryKind,
    /// CSS selectors for list-page card extraction. Required when
    /// `discovery` is `ListPage`.
    pub selectors: Option<SelectorSpec>,
    #[serde(default)]
    pub fetch: FetchOptions,
    #[serde(default)]
    pub detail: DetailOptions,
}

/// Declared primary discovery strategy for a source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryKind {
    /// Entry pages carry repeated event cards addressable by CSS selectors.
    ListPage,
    /// No stable markup; structured data first, model-assisted fallback.
    GenericPage,
}

/// CSS selector spec for card extraction on list pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorSpec {
    /// Selector matching one event card.
    pub card: String,
    pub title: String,
    pub date: Option<String>,
    pub time: Option<String>,
    /// Anchor inside the card pointing at the detail page.
    pub url: Option<String>,
    pub image: Option<String>,
}

/// Per-request fetch options for this source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchOptions {
    #[serde(default)]
    pub render: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra wait after page load in render mode, milliseconds.
    #[serde(default)]
    pub wait_after_load_ms: u64,
    pub user_agent: Option<String>,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            render: false,
            timeout_secs: default_timeout_secs(),
            wait_after_load_ms: 0,
            user_agent: None,
        }
    }
}

/// Which extraction strategies run against individual detail pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailOptions {
    #[serde(default = "default_true")]
    pub structured_data: bool,
    #[serde(default = "default_true")]
    pub meta_tags: bool,
    #[serde(default)]
    pub model_assisted: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DetailOptions {
    fn default() -> Self {
        Self {
            structured_data: true,
            meta_tags: true,
            model_assisted: false,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let config_content = fs::read_to_string(path).map_err(|e| {
            ScoutError::Config(format!("Failed to read config file '{}': {}", path, e))
        })?;

        let config: Config = toml::from_str(&config_content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for entry in &self.sources {
            if entry.profile.entry_urls.is_empty() {
                return Err(ScoutError::Config(format!(
                    "source '{}' has no entry_urls",
                    entry.slug
                )));
            }
            if entry.profile.discovery == DiscoveryKind::ListPage
                && entry.profile.selectors.is_none()
            {
                return Err(ScoutError::Config(format!(
                    "source '{}' declares list_page discovery but no selectors",
                    entry.slug
                )));
            }
            if let Some(month) = entry.typical_month {
                if !(1..=12).contains(&month) {
                    return Err(ScoutError::Config(format!(
                        "source '{}' has invalid typical_month {}",
                        entry.slug, month
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_source_entry() {
        let toml_src = r#"
            [crawler]
            render_endpoint = "http://localhost:3000"

            [[sources]]
            slug = "city-arts-fest"
            name = "City Arts Festival"
            venue_name = "Riverfront Park"
            entry_urls = ["https://cityartsfest.org/schedule"]
            discovery = "list_page"

            [sources.selectors]
            card = ".event-card"
            title = ".event-card h3"
            date = ".event-card .date"
        "#;

        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.crawler.max_concurrent_sources, 4);
        assert_eq!(config.sources.len(), 1);
        let entry = &config.sources[0];
        assert!(entry.active);
        assert_eq!(entry.profile.discovery, DiscoveryKind::ListPage);
        assert_eq!(entry.profile.fetch.timeout_secs, 30);
        assert!(entry.profile.detail.structured_data);
        assert!(!entry.profile.detail.model_assisted);
    }

    #[test]
    fn rejects_list_page_without_selectors() {
        let toml_src = r#"
            [crawler]

            [[sources]]
            slug = "broken"
            name = "Broken"
            venue_name = "Nowhere"
            entry_urls = ["https://example.org"]
            discovery = "list_page"
        "#;

        let config: Config = toml::from_str(toml_src).unwrap();
        assert!(config.validate().is_err());
    }
}
