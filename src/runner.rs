use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::Config;
use crate::discovery::DiscoveryEngine;
use crate::error::Result;
use crate::extract::model::{ModelExtractor, NullModelExtractor};
use crate::fetch::HttpFetcher;
use crate::pipeline::{CrawlResult, SourcePipeline};
use crate::rate_limit::HostRateLimiter;
use crate::storage::Storage;
use crate::types::Source;

/// Fans crawl cycles out across sources with a bound on concurrency.
pub struct CrawlRunner {
    storage: Arc<dyn Storage>,
    pipeline: Arc<SourcePipeline>,
    max_concurrent_sources: usize,
    per_source_deadline: Duration,
}

impl CrawlRunner {
    pub fn from_config(config: &Config, storage: Arc<dyn Storage>) -> Self {
        let fetcher = Arc::new(HttpFetcher::new(
            config.crawler.render_endpoint.clone(),
            config.crawler.user_agent.clone(),
        ));
        let model: Arc<dyn ModelExtractor> = Arc::new(NullModelExtractor);
        let limiter = Arc::new(HostRateLimiter::new(
            config.crawler.host_requests_per_second,
            config.crawler.host_burst,
        ));
        let discovery = Arc::new(DiscoveryEngine::new(fetcher, model, limiter));
        let pipeline = Arc::new(SourcePipeline::new(storage.clone(), discovery));

        Self::new(
            storage,
            pipeline,
            config.crawler.max_concurrent_sources,
            Duration::from_secs(config.crawler.per_source_deadline_secs),
        )
    }

    pub fn new(
        storage: Arc<dyn Storage>,
        pipeline: Arc<SourcePipeline>,
        max_concurrent_sources: usize,
        per_source_deadline: Duration,
    ) -> Self {
        Self {
            storage,
            pipeline,
            max_concurrent_sources: max_concurrent_sources.max(1),
            per_source_deadline,
        }
    }

    /// Override the per-source deadline, e.g. from a CLI flag.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.per_source_deadline = deadline;
        self
    }

    /// Reconcile configured sources into storage. Existing sources keep
    /// their ids; new ones are created.
    pub async fn sync_sources(&self, config: &Config) -> Result<usize> {
        let mut count = 0;
        for entry in &config.sources {
            let mut source = Source::from_config(entry);
            self.storage.upsert_source(&mut source).await?;
            count += 1;
        }
        info!("Synced {} configured sources", count);
        Ok(count)
    }

    /// Crawl every active source, optionally restricted to the given slugs.
    /// Join errors (worker panics) are reported as per-source error results
    /// rather than aborting the batch.
    pub async fn crawl_all(&self, only_slugs: Option<&[String]>) -> Result<Vec<CrawlResult>> {
        let sources: Vec<Source> = self
            .storage
            .get_active_sources()
            .await?
            .into_iter()
            .filter(|s| match only_slugs {
                Some(slugs) => slugs.iter().any(|slug| slug == &s.slug),
                None => true,
            })
            .collect();

        info!(
            "Crawling {} sources ({} max concurrent)",
            sources.len(),
            self.max_concurrent_sources
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_sources));
        let mut join_set = JoinSet::new();

        for source in sources {
            let permit_source = semaphore.clone();
            let pipeline = self.pipeline.clone();
            let deadline = Instant::now() + self.per_source_deadline;

            join_set.spawn(async move {
                // Semaphore closed only on drop, so acquire cannot fail here.
                let _permit = permit_source.acquire().await;
                pipeline.crawl_source(&source, Some(deadline)).await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!("Crawl worker failed to join: {}", e);
                    let mut result = CrawlResult::failed("unknown");
                    result.errors.push(format!("worker join error: {}", e));
                    results.push(result);
                }
            }
        }

        results.sort_by(|a, b| a.source_slug.cmp(&b.source_slug));
        Ok(results)
    }
}
