use chrono::{Datelike, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::confidence::{classify_page, month_matches, score_date_extraction, should_update};
use crate::dates::{
    normalize_event_date, parse_human_date, DEFAULT_MAX_FUTURE_DAYS, DEFAULT_ROLLOVER_GRACE_DAYS,
};
use crate::dedupe::{merge_event_data, DedupeDecision, Deduplicator};
use crate::discovery::DiscoveryEngine;
use crate::error::{Result, ScoutError};
use crate::health::{CircuitState, SourceHealthMonitor};
use crate::storage::{InsertOutcome, Storage};
use crate::types::{
    CanonicalEvent, CrawlStatus, FieldProvenance, NormalizedCandidate, Seed, Source, Venue,
};

/// Result of a complete crawl cycle for one source.
#[derive(Debug, Serialize)]
pub struct CrawlResult {
    pub source_slug: String,
    /// The circuit was open; nothing ran.
    pub gated: bool,
    /// The per-source deadline cut discovery short; partial seeds were
    /// still processed.
    pub cancelled: bool,
    pub discovered: usize,
    pub created: usize,
    pub merged: usize,
    pub unchanged: usize,
    /// Seeds dropped because no trustworthy date could be resolved.
    pub dropped_dates: usize,
    pub errors: Vec<String>,
}

impl CrawlResult {
    /// Empty result carrying only an error slot, for failures that happen
    /// before a crawl cycle can even start.
    pub fn failed(slug: &str) -> Self {
        Self::empty(slug)
    }

    fn empty(slug: &str) -> Self {
        Self {
            source_slug: slug.to_string(),
            gated: false,
            cancelled: false,
            discovered: 0,
            created: 0,
            merged: 0,
            unchanged: 0,
            dropped_dates: 0,
            errors: Vec::new(),
        }
    }
}

enum SeedOutcome {
    Created,
    Merged,
    Unchanged,
    DroppedDate,
}

/// Per-source crawl orchestration: health gate, discovery, date
/// normalization, dedup, and confidence-gated persistence.
pub struct SourcePipeline {
    storage: Arc<dyn Storage>,
    discovery: Arc<DiscoveryEngine>,
    monitor: SourceHealthMonitor,
    deduplicator: Deduplicator,
}

impl SourcePipeline {
    pub fn new(storage: Arc<dyn Storage>, discovery: Arc<DiscoveryEngine>) -> Self {
        Self {
            monitor: SourceHealthMonitor::new(storage.clone()),
            deduplicator: Deduplicator::new(storage.clone()),
            storage,
            discovery,
        }
    }

    /// Run one crawl cycle for a source. Never returns an error: every
    /// failure mode ends up in the result and the crawl-attempt log.
    #[instrument(skip(self, source, deadline), fields(source = %source.slug))]
    pub async fn crawl_source(&self, source: &Source, deadline: Option<Instant>) -> CrawlResult {
        let mut result = CrawlResult::empty(&source.slug);
        let started = Instant::now();

        let source_id = match source.id {
            Some(id) => id,
            None => {
                result.errors.push("source has no id".to_string());
                return result;
            }
        };

        if self.monitor.check(source_id).await == CircuitState::Open {
            info!("Circuit open for {}; skipping this cycle", source.slug);
            counter!("scout_crawls_gated_total", "source" => source.slug.clone()).increment(1);
            result.gated = true;
            return result;
        }

        counter!("scout_crawls_total", "source" => source.slug.clone()).increment(1);

        let outcome = match self.discovery.discover_with_deadline(source, deadline).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Discovery failed for {}: {}", source.slug, e);
                let kind = e.error_kind();
                result.errors.push(e.to_string());
                if let Err(log_err) = self
                    .storage
                    .record_crawl_attempt(source_id, CrawlStatus::Error, Some(kind))
                    .await
                {
                    warn!("Failed to record crawl attempt: {}", log_err);
                }
                return result;
            }
        };

        result.cancelled = outcome.deadline_hit;
        result.discovered = outcome.seeds.len();
        counter!("scout_seeds_discovered_total", "source" => source.slug.clone())
            .increment(outcome.seeds.len() as u64);

        for (i, seed) in outcome.seeds.iter().enumerate() {
            match self.process_seed(seed, source).await {
                Ok(SeedOutcome::Created) => result.created += 1,
                Ok(SeedOutcome::Merged) => result.merged += 1,
                Ok(SeedOutcome::Unchanged) => result.unchanged += 1,
                Ok(SeedOutcome::DroppedDate) => result.dropped_dates += 1,
                Err(e) => {
                    // One candidate's failure never aborts the batch.
                    warn!("Seed {} ('{}') failed: {}", i, seed.title, e);
                    result.errors.push(format!("'{}': {}", seed.title, e));
                }
            }
        }

        counter!("scout_events_created_total", "source" => source.slug.clone())
            .increment(result.created as u64);
        counter!("scout_events_merged_total", "source" => source.slug.clone())
            .increment(result.merged as u64);
        counter!("scout_dates_dropped_total", "source" => source.slug.clone())
            .increment(result.dropped_dates as u64);
        histogram!("scout_crawl_duration_seconds", "source" => source.slug.clone())
            .record(started.elapsed().as_secs_f64());

        let status = if result.cancelled {
            CrawlStatus::Cancelled
        } else {
            CrawlStatus::Success
        };
        if let Err(e) = self
            .storage
            .record_crawl_attempt(source_id, status, None)
            .await
        {
            warn!("Failed to record crawl attempt: {}", e);
        }

        info!(
            "Crawl finished for {}: {} discovered, {} created, {} merged, {} unchanged, {} dropped, {} errors",
            source.slug,
            result.discovered,
            result.created,
            result.merged,
            result.unchanged,
            result.dropped_dates,
            result.errors.len()
        );
        result
    }

    /// Resolve a seed's date, or reject the seed. `None` means the seed
    /// is dropped; a bad date is never defaulted to "today".
    fn resolve_date(seed: &Seed, today: chrono::NaiveDate) -> Option<chrono::NaiveDate> {
        if let Some(date) = seed.date {
            return normalize_event_date(
                date,
                seed.raw_date_text.as_deref(),
                today,
                DEFAULT_MAX_FUTURE_DAYS,
                DEFAULT_ROLLOVER_GRACE_DAYS,
            );
        }
        seed.raw_date_text.as_deref().and_then(|text| {
            parse_human_date(
                text,
                today,
                DEFAULT_MAX_FUTURE_DAYS,
                DEFAULT_ROLLOVER_GRACE_DAYS,
            )
        })
    }

    async fn process_seed(&self, seed: &Seed, source: &Source) -> Result<SeedOutcome> {
        let today = Utc::now().date_naive();

        let event_day = match Self::resolve_date(seed, today) {
            Some(day) => day,
            None => {
                debug!("Dropping '{}': no trustworthy date", seed.title);
                return Ok(SeedOutcome::DroppedDate);
            }
        };

        let candidate = NormalizedCandidate {
            title: seed.title.trim().to_string(),
            venue_name: source.venue_name.clone(),
            event_day,
            start_time: seed.time,
            end_time: None,
            description: seed.description.clone(),
            price_min: None,
            price_max: None,
            price_note: None,
            tags: Vec::new(),
            image_url: seed.image_url.clone(),
            ticket_url: seed.ticket_url.clone(),
            extraction_method: seed.extraction_method,
            page_url: seed.page_url.clone(),
        };

        let venue = self
            .storage
            .get_or_create_venue(&Venue::from_name(&candidate.venue_name))
            .await?;
        let venue_id = venue
            .id
            .ok_or_else(|| ScoutError::Storage("venue came back without an id".into()))?;

        let page_kind = classify_page(&candidate.page_url, &source.slug);
        let month_ok = month_matches(Some(event_day.month()), source.typical_month);
        let confidence =
            score_date_extraction(candidate.extraction_method, page_kind, month_ok);

        match self.deduplicator.check(&candidate, &venue).await? {
            DedupeDecision::New { fingerprint } => {
                let now = Utc::now();
                let mut event = CanonicalEvent {
                    id: None,
                    title: candidate.title.clone(),
                    venue_id,
                    event_day,
                    start_time: candidate.start_time,
                    end_time: candidate.end_time,
                    description: candidate.description.clone(),
                    price_min: candidate.price_min,
                    price_max: candidate.price_max,
                    price_note: candidate.price_note.clone(),
                    tags: candidate.tags.clone(),
                    image_url: candidate.image_url.clone(),
                    ticket_url: candidate.ticket_url.clone(),
                    fingerprint: fingerprint.clone(),
                    confidence,
                    date_provenance: FieldProvenance {
                        method: candidate.extraction_method,
                        confidence,
                        page_kind,
                    },
                    created_at: now,
                    updated_at: now,
                };

                match self.storage.insert_event(&mut event).await? {
                    InsertOutcome::Inserted(_) => Ok(SeedOutcome::Created),
                    InsertOutcome::Existing(id) => {
                        // A concurrent worker won the insert race; merge
                        // into the surviving row instead.
                        debug!("Insert race on '{}'; merging into {}", candidate.title, id);
                        self.merge_into(id, &candidate, venue_id, confidence, &source.slug)
                            .await
                    }
                }
            }
            DedupeDecision::Duplicate { event_id } => {
                self.merge_into(event_id, &candidate, venue_id, confidence, &source.slug)
                    .await
            }
        }
    }

    async fn merge_into(
        &self,
        event_id: Uuid,
        candidate: &NormalizedCandidate,
        venue_id: Uuid,
        new_confidence: u8,
        source_slug: &str,
    ) -> Result<SeedOutcome> {
        let existing = self
            .storage
            .find_candidates(candidate.event_day, venue_id)
            .await?
            .into_iter()
            .find(|e| e.id == Some(event_id))
            .ok_or_else(|| {
                ScoutError::Storage(format!("duplicate target {event_id} disappeared"))
            })?;

        let (mut merged, mut changed) = merge_event_data(&existing, candidate, new_confidence);

        // A strictly better extraction refreshes the date provenance,
        // but only when the overwrite gate allows it.
        if new_confidence > existing.date_provenance.confidence
            && should_update(&existing.date_provenance, new_confidence)
        {
            merged.date_provenance = FieldProvenance {
                method: candidate.extraction_method,
                confidence: new_confidence,
                page_kind: classify_page(&candidate.page_url, source_slug),
            };
            changed = true;
        }

        if changed {
            self.storage.update_event(&merged).await?;
            Ok(SeedOutcome::Merged)
        } else {
            Ok(SeedOutcome::Unchanged)
        }
    }
}
