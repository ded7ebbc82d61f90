use chrono::{NaiveDate, Utc};
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::DiscoveryKind;
use crate::error::{Result, ScoutError};
use crate::extract::model::{ModelAssistedExtractor, ModelExtractor};
use crate::extract::selectors::SelectorCardExtractor;
use crate::extract::structured::StructuredDataExtractor;
use crate::extract::{resolve_url, Extractor, Page};
use crate::fetch::PageFetcher;
use crate::rate_limit::HostRateLimiter;
use crate::types::{Seed, Source};

/// Link texts/paths that smell like secondary listing pages worth
/// following when the entry page yields too little.
const LIST_LINK_KEYWORDS: [&str; 6] = [
    "calendar",
    "schedule",
    "events",
    "shows",
    "lineup",
    "whats-on",
];

/// Decides when discovery escalates to a more expensive strategy.
#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    /// Below this many seeds, discovery is considered low-confidence.
    pub min_yield: usize,
    /// Detail-shaped link count that makes escalation worthwhile even
    /// without list-like links.
    pub detail_link_threshold: usize,
    /// Cap on individual detail pages walked per crawl; bounds cost
    /// against sources with large but mostly redundant link graphs.
    pub max_detail_pages: usize,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            min_yield: 5,
            detail_link_threshold: 8,
            max_detail_pages: 120,
        }
    }
}

/// What a discovery run produced.
#[derive(Debug)]
pub struct DiscoveryOutcome {
    pub seeds: Vec<Seed>,
    /// True when the deadline passed mid-walk; the seeds gathered before
    /// cancellation are still here and should still be processed.
    pub deadline_hit: bool,
}

impl DiscoveryOutcome {
    fn complete(seeds: Vec<Seed>) -> Self {
        Self {
            seeds,
            deadline_hit: false,
        }
    }

    fn cancelled(seeds: Vec<Seed>) -> Self {
        Self {
            seeds,
            deadline_hit: true,
        }
    }
}

/// Links found on a page, split by what they appear to point at.
#[derive(Debug, Default)]
struct PageLinks {
    list_like: Vec<String>,
    detail_like: Vec<String>,
}

/// Orchestrates extraction strategies over a source's entry pages,
/// escalating only when yield is insufficient.
pub struct DiscoveryEngine {
    fetcher: Arc<dyn PageFetcher>,
    model: Arc<dyn ModelExtractor>,
    limiter: Arc<HostRateLimiter>,
    policy: EscalationPolicy,
}

impl DiscoveryEngine {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        model: Arc<dyn ModelExtractor>,
        limiter: Arc<HostRateLimiter>,
    ) -> Self {
        Self {
            fetcher,
            model,
            limiter,
            policy: EscalationPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: EscalationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The ordered strategy list declared by the source profile.
    fn primary_extractors(&self, source: &Source) -> Vec<Box<dyn Extractor>> {
        let mut extractors: Vec<Box<dyn Extractor>> = Vec::new();
        match source.profile.discovery {
            DiscoveryKind::ListPage => {
                if let Some(spec) = &source.profile.selectors {
                    extractors.push(Box::new(SelectorCardExtractor::new(spec.clone())));
                }
            }
            DiscoveryKind::GenericPage => {
                extractors.push(Box::new(StructuredDataExtractor::new(
                    source.profile.detail.meta_tags,
                )));
                if source.profile.detail.model_assisted {
                    extractors.push(Box::new(ModelAssistedExtractor::new(
                        self.model.clone(),
                        source.name.clone(),
                    )));
                }
            }
        }
        extractors
    }

    async fn fetch_page(&self, url: &str, source: &Source) -> Result<Page> {
        self.limiter.acquire(url).await;
        let html = self.fetcher.fetch(url, &source.profile.fetch).await?;
        Ok(Page::new(url, html))
    }

    async fn run_extractors(
        &self,
        extractors: &[Box<dyn Extractor>],
        page: &Page,
        today: NaiveDate,
    ) -> Vec<Seed> {
        let mut seeds = Vec::new();
        for extractor in extractors {
            match extractor.discover(page, today).await {
                Ok(found) => {
                    debug!(
                        "{} found {} seeds on {}",
                        extractor.name(),
                        found.len(),
                        page.url
                    );
                    seeds.extend(found);
                }
                Err(e) => {
                    // One strategy failing never aborts discovery.
                    warn!("{} failed on {}: {}", extractor.name(), page.url, e);
                }
            }
        }
        seeds
    }

    fn classify_links(page: &Page) -> PageLinks {
        let mut links = PageLinks::default();
        let anchor_selector = match Selector::parse("a[href]") {
            Ok(sel) => sel,
            Err(_) => return links,
        };

        let document = Html::parse_document(&page.html);
        let mut seen = HashSet::new();
        for anchor in document.select(&anchor_selector) {
            let href = anchor.value().attr("href").unwrap_or_default();
            let resolved = match resolve_url(&page.url, href) {
                Some(u) => u,
                None => continue,
            };
            if resolved == page.url || !seen.insert(resolved.clone()) {
                continue;
            }

            let text = anchor.text().collect::<String>().to_lowercase();
            let lower = resolved.to_lowercase();
            if LIST_LINK_KEYWORDS
                .iter()
                .any(|kw| text.contains(kw) || lower.contains(kw))
            {
                links.list_like.push(resolved.clone());
            }
            if Self::looks_like_detail_link(&resolved) {
                links.detail_like.push(resolved);
            }
        }
        links
    }

    /// Detail pages live a couple of path segments deep with a slug-ish
    /// last segment.
    fn looks_like_detail_link(url: &str) -> bool {
        let parsed = match reqwest::Url::parse(url) {
            Ok(u) => u,
            Err(_) => return false,
        };
        let segments: Vec<&str> = parsed
            .path()
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        if segments.len() < 2 {
            return false;
        }
        let last = segments[segments.len() - 1];
        last.contains('-') || last.chars().any(|c| c.is_ascii_digit())
    }

    fn dedupe(seeds: Vec<Seed>) -> Vec<Seed> {
        let mut seen = HashSet::new();
        seeds
            .into_iter()
            .filter(|s| seen.insert(s.dedupe_key()))
            .collect()
    }

    /// Turn a source's entry pages into a deduplicated seed list. A
    /// pre-flight failure (no entry page fetchable) is the only error;
    /// an empty result is a valid outcome.
    pub async fn discover(&self, source: &Source) -> Result<Vec<Seed>> {
        Ok(self.discover_with_deadline(source, None).await?.seeds)
    }

    /// Deadline-aware discovery: when the deadline passes mid-walk, the
    /// seeds gathered so far are returned rather than discarded, flagged
    /// so the caller can record the cycle as cancelled.
    #[instrument(skip(self, source, deadline), fields(source = %source.slug))]
    pub async fn discover_with_deadline(
        &self,
        source: &Source,
        deadline: Option<std::time::Instant>,
    ) -> Result<DiscoveryOutcome> {
        let expired = || deadline.is_some_and(|d| std::time::Instant::now() >= d);
        let today = Utc::now().date_naive();
        let extractors = self.primary_extractors(source);
        if extractors.is_empty() {
            return Err(ScoutError::Config(format!(
                "source '{}' has no usable extraction strategy",
                source.slug
            )));
        }

        // Stage 1: primary strategy over entry pages.
        let mut seeds = Vec::new();
        let mut entry_pages = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut last_error = None;
        for url in &source.profile.entry_urls {
            visited.insert(url.clone());
            match self.fetch_page(url, source).await {
                Ok(page) => {
                    seeds.extend(self.run_extractors(&extractors, &page, today).await);
                    entry_pages.push(page);
                }
                Err(e) => {
                    warn!("Entry page fetch failed for {}: {}", url, e);
                    last_error = Some(e);
                }
            }
        }
        if entry_pages.is_empty() {
            // Inability to fetch any entry page aborts the cycle.
            return Err(last_error.unwrap_or_else(|| {
                ScoutError::Config(format!("source '{}' has no entry_urls", source.slug))
            }));
        }
        seeds = Self::dedupe(seeds);

        if seeds.len() >= self.policy.min_yield {
            return Ok(DiscoveryOutcome::complete(seeds));
        }

        // Stage 2: low yield; follow list-like secondary links.
        let mut links = PageLinks::default();
        for page in &entry_pages {
            let found = Self::classify_links(page);
            links.list_like.extend(found.list_like);
            links.detail_like.extend(found.detail_like);
        }

        let should_escalate = !links.list_like.is_empty()
            || links.detail_like.len() >= self.policy.detail_link_threshold;
        if !should_escalate {
            return Ok(DiscoveryOutcome::complete(seeds));
        }

        info!(
            "Low yield ({} seeds) for {}; escalating via {} list links",
            seeds.len(),
            source.slug,
            links.list_like.len()
        );
        for url in &links.list_like {
            if expired() {
                return Ok(DiscoveryOutcome::cancelled(Self::dedupe(seeds)));
            }
            if !visited.insert(url.clone()) {
                continue;
            }
            match self.fetch_page(url, source).await {
                Ok(page) => {
                    seeds.extend(self.run_extractors(&extractors, &page, today).await);
                    let more = Self::classify_links(&page);
                    links.detail_like.extend(more.detail_like);
                }
                Err(e) => {
                    warn!("Fallback list page {} failed: {}; skipping", url, e);
                }
            }
        }
        seeds = Self::dedupe(seeds);

        if seeds.len() >= self.policy.min_yield || links.detail_like.is_empty() {
            return Ok(DiscoveryOutcome::complete(seeds));
        }

        // Stage 3: still low; walk individual detail pages with
        // structured-data extraction, one seed per page at most.
        if !source.profile.detail.structured_data && !source.profile.detail.meta_tags {
            return Ok(DiscoveryOutcome::complete(seeds));
        }
        let detail_extractor = StructuredDataExtractor::new(source.profile.detail.meta_tags);
        let mut walked = 0;
        for url in &links.detail_like {
            if expired() {
                return Ok(DiscoveryOutcome::cancelled(Self::dedupe(seeds)));
            }
            if walked >= self.policy.max_detail_pages {
                break;
            }
            if !visited.insert(url.clone()) {
                continue;
            }
            walked += 1;
            match self.fetch_page(url, source).await {
                Ok(page) => {
                    if let Ok(mut found) = detail_extractor.discover(&page, today).await {
                        if !found.is_empty() {
                            seeds.push(found.remove(0));
                        }
                    }
                }
                Err(e) => {
                    warn!("Detail page {} failed: {}; skipping", url, e);
                }
            }
        }

        Ok(DiscoveryOutcome::complete(Self::dedupe(seeds)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetailOptions, FetchOptions, SelectorSpec, SourceProfile};
    use crate::extract::model::NullModelExtractor;
    use crate::types::ExtractionMethod;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FixturePages {
        pages: HashMap<String, String>,
    }

    #[async_trait]
    impl PageFetcher for FixturePages {
        async fn fetch(&self, url: &str, _: &FetchOptions) -> Result<String> {
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| ScoutError::FetchStatus {
                    url: url.to_string(),
                    status: 404,
                })
        }
    }

    fn engine(pages: HashMap<String, String>) -> DiscoveryEngine {
        DiscoveryEngine::new(
            Arc::new(FixturePages { pages }),
            Arc::new(NullModelExtractor),
            Arc::new(HostRateLimiter::new(1000.0, 100)),
        )
    }

    fn list_source(entry: &str) -> Source {
        Source {
            id: Some(uuid::Uuid::new_v4()),
            slug: "riverfront-jazz".to_string(),
            name: "Riverfront Jazz".to_string(),
            venue_name: "Riverfront Park".to_string(),
            active: true,
            typical_month: None,
            profile: SourceProfile {
                entry_urls: vec![entry.to_string()],
                discovery: DiscoveryKind::ListPage,
                selectors: Some(SelectorSpec {
                    card: ".event-card".to_string(),
                    title: "h3".to_string(),
                    date: Some(".date".to_string()),
                    time: None,
                    url: Some("a".to_string()),
                    image: None,
                }),
                fetch: FetchOptions::default(),
                detail: DetailOptions::default(),
            },
            created_at: Utc::now(),
        }
    }

    fn card(title: &str, date: &str, href: &str) -> String {
        format!(
            r#"<div class="event-card"><h3>{title}</h3><span class="date">{date}</span><a href="{href}">more</a></div>"#
        )
    }

    #[tokio::test]
    async fn high_yield_entry_page_does_not_escalate() {
        let cards: String = (0..6)
            .map(|i| card(&format!("Show {i}"), "June 5, 2026", &format!("/events/show-{i}")))
            .collect();
        let mut pages = HashMap::new();
        pages.insert(
            "https://riverfrontjazz.example/schedule".to_string(),
            format!("<html><body>{cards}<a href=\"/calendar\">Calendar</a></body></html>"),
        );
        // The calendar link is intentionally not in fixtures; fetching it
        // would fail the test with a 404 escalation.
        let engine = engine(pages);
        let seeds = engine
            .discover(&list_source("https://riverfrontjazz.example/schedule"))
            .await
            .unwrap();
        assert_eq!(seeds.len(), 6);
    }

    #[tokio::test]
    async fn low_yield_escalates_through_calendar_link() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://riverfrontjazz.example/home".to_string(),
            format!(
                "<html><body>{}<a href=\"/calendar\">Full calendar</a></body></html>",
                card("Opening Gala", "June 5, 2026", "/events/gala-2026")
            ),
        );
        let cards: String = (0..5)
            .map(|i| card(&format!("Show {i}"), "July 10, 2026", &format!("/events/show-{i}")))
            .collect();
        pages.insert(
            "https://riverfrontjazz.example/calendar".to_string(),
            format!("<html><body>{cards}</body></html>"),
        );

        let engine = engine(pages);
        let seeds = engine
            .discover(&list_source("https://riverfrontjazz.example/home"))
            .await
            .unwrap();
        assert_eq!(seeds.len(), 6);
    }

    #[tokio::test]
    async fn broken_fallback_link_is_skipped_not_fatal() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://riverfrontjazz.example/home".to_string(),
            format!(
                "<html><body>{}<a href=\"/calendar\">Calendar</a><a href=\"/events-list\">Events</a></body></html>",
                card("Opening Gala", "June 5, 2026", "/events/gala-2026")
            ),
        );
        // /calendar 404s; /events-list succeeds.
        pages.insert(
            "https://riverfrontjazz.example/events-list".to_string(),
            card("Second Night", "June 6, 2026", "/events/second-night"),
        );

        let engine = engine(pages);
        let seeds = engine
            .discover(&list_source("https://riverfrontjazz.example/home"))
            .await
            .unwrap();
        assert_eq!(seeds.len(), 2);
    }

    #[tokio::test]
    async fn detail_walk_extracts_structured_data() {
        // "/programs/..." avoids the list-link keywords so these links
        // only qualify as detail-shaped, exercising the stage-3 walk.
        let detail_links: String = (0..8)
            .map(|i| format!("<a href=\"/programs/show-{i}\">Show {i}</a>"))
            .collect();
        let mut pages = HashMap::new();
        pages.insert(
            "https://riverfrontjazz.example/home".to_string(),
            format!("<html><body>{detail_links}</body></html>"),
        );
        for i in 0..8 {
            pages.insert(
                format!("https://riverfrontjazz.example/programs/show-{i}"),
                format!(
                    r#"<html><head><script type="application/ld+json">
                    {{"@type": "MusicEvent", "name": "Show {i}", "startDate": "2026-06-{:02}"}}
                    </script></head></html>"#,
                    i + 1
                ),
            );
        }

        let mut source = list_source("https://riverfrontjazz.example/home");
        source.profile.discovery = DiscoveryKind::GenericPage;
        source.profile.selectors = None;

        let engine = engine(pages);
        let seeds = engine.discover(&source).await.unwrap();
        assert_eq!(seeds.len(), 8);
        assert!(seeds
            .iter()
            .all(|s| s.extraction_method == ExtractionMethod::StructuredData));
    }

    #[tokio::test]
    async fn expired_deadline_returns_partial_seeds() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://riverfrontjazz.example/home".to_string(),
            format!(
                "<html><body>{}<a href=\"/calendar\">Calendar</a></body></html>",
                card("Opening Gala", "June 5, 2026", "/events/gala-2026")
            ),
        );

        let engine = engine(pages);
        let deadline = std::time::Instant::now() - std::time::Duration::from_secs(1);
        let outcome = engine
            .discover_with_deadline(
                &list_source("https://riverfrontjazz.example/home"),
                Some(deadline),
            )
            .await
            .unwrap();
        assert!(outcome.deadline_hit);
        // The entry-page seed gathered before cancellation survives.
        assert_eq!(outcome.seeds.len(), 1);
    }

    #[tokio::test]
    async fn unfetchable_entry_page_aborts_the_cycle() {
        let engine = engine(HashMap::new());
        let result = engine
            .discover(&list_source("https://riverfrontjazz.example/schedule"))
            .await;
        assert!(result.is_err());
    }
}
