use chrono::{NaiveDate, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::storage::Storage;
use crate::types::{CanonicalEvent, NormalizedCandidate, Venue};

/// Similarity at or above this classifies a candidate as a duplicate of an
/// existing record.
pub const DUPLICATE_SIMILARITY_THRESHOLD: f64 = 85.0;

const LEADING_ARTICLES: [&str; 3] = ["the ", "a ", "an "];

/// Canonical text form for comparison and fingerprinting: lowercase,
/// punctuation stripped, leading article dropped, whitespace collapsed.
pub fn normalize_for_comparison(text: &str) -> String {
    let lowered = text.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    for article in LEADING_ARTICLES {
        if let Some(rest) = collapsed.strip_prefix(article) {
            return rest.to_string();
        }
    }
    collapsed
}

/// Deterministic hash of (normalized title, normalized venue, date).
/// Semantically equal events hash identically regardless of case,
/// punctuation, leading articles, or whitespace.
pub fn content_fingerprint(title: &str, venue_name: &str, date: NaiveDate) -> String {
    let canonical = format!(
        "{}|{}|{}",
        normalize_for_comparison(title),
        normalize_for_comparison(venue_name),
        date.format("%Y-%m-%d")
    );

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Edit-distance similarity of two normalized strings in [0, 100].
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&normalize_for_comparison(a), &normalize_for_comparison(b))
        * 100.0
}

/// Combined duplicate score weighting title over venue.
pub fn duplicate_score(title_a: &str, title_b: &str, venue_a: &str, venue_b: &str) -> f64 {
    0.6 * similarity(title_a, title_b) + 0.4 * similarity(venue_a, venue_b)
}

/// Decision for a normalized candidate against the stored corpus.
#[derive(Debug, Clone, PartialEq)]
pub enum DedupeDecision {
    /// No match; insert with this fingerprint.
    New { fingerprint: String },
    /// Matched an existing canonical record; merge into it.
    Duplicate { event_id: Uuid },
}

/// Fingerprint-first, fuzzy-second duplicate detection against storage.
pub struct Deduplicator {
    storage: Arc<dyn Storage>,
}

impl Deduplicator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Classify a candidate as new or a duplicate of a stored record.
    /// Date equality (post-normalization) is mandatory before similarity
    /// scoring runs; `find_candidates` is already scoped by (date, venue).
    pub async fn check(
        &self,
        candidate: &NormalizedCandidate,
        venue: &Venue,
    ) -> Result<DedupeDecision> {
        let fingerprint =
            content_fingerprint(&candidate.title, &venue.name, candidate.event_day);

        if let Some(existing) = self.storage.find_event_by_fingerprint(&fingerprint).await? {
            debug!(
                "Exact fingerprint match for '{}' on {}",
                candidate.title, candidate.event_day
            );
            if let Some(id) = existing.id {
                return Ok(DedupeDecision::Duplicate { event_id: id });
            }
        }

        let venue_id = match venue.id {
            Some(id) => id,
            None => return Ok(DedupeDecision::New { fingerprint }),
        };

        let existing_candidates = self
            .storage
            .find_candidates(candidate.event_day, venue_id)
            .await?;

        for existing in &existing_candidates {
            let score = duplicate_score(
                &candidate.title,
                &existing.title,
                &candidate.venue_name,
                &venue.name,
            );
            if score >= DUPLICATE_SIMILARITY_THRESHOLD {
                if let Some(id) = existing.id {
                    info!(
                        "Fuzzy duplicate: '{}' ~ '{}' scored {:.1}",
                        candidate.title, existing.title, score
                    );
                    return Ok(DedupeDecision::Duplicate { event_id: id });
                }
            }
        }

        Ok(DedupeDecision::New { fingerprint })
    }
}

/// Merge a newly crawled candidate into an existing canonical record.
/// Conservative union: populated fields are never overwritten on this
/// path, only gaps are filled. Returns the merged record and whether
/// anything actually changed.
pub fn merge_event_data(
    existing: &CanonicalEvent,
    new: &NormalizedCandidate,
    new_confidence: u8,
) -> (CanonicalEvent, bool) {
    let mut merged = existing.clone();
    let mut changed = false;

    let new_desc_longer = match (&existing.description, &new.description) {
        (Some(old), Some(newer)) => newer.len() > old.len(),
        (None, Some(_)) => true,
        _ => false,
    };
    if new_desc_longer {
        merged.description = new.description.clone();
        changed = true;
    }

    if merged.start_time.is_none() && new.start_time.is_some() {
        merged.start_time = new.start_time;
        changed = true;
    }
    if merged.end_time.is_none() && new.end_time.is_some() {
        merged.end_time = new.end_time;
        changed = true;
    }

    // Pessimistic: a merged record is only as trustworthy as its weakest
    // contributor.
    let lower = existing.confidence.min(new_confidence);
    if lower != merged.confidence {
        merged.confidence = lower;
        changed = true;
    }

    for tag in &new.tags {
        if !merged.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            merged.tags.push(tag.clone());
            changed = true;
        }
    }

    if merged.price_min.is_none() && new.price_min.is_some() {
        merged.price_min = new.price_min;
        changed = true;
    }
    if merged.price_max.is_none() && new.price_max.is_some() {
        merged.price_max = new.price_max;
        changed = true;
    }
    if merged.price_note.is_none() && new.price_note.is_some() {
        merged.price_note = new.price_note.clone();
        changed = true;
    }
    if merged.image_url.is_none() && new.image_url.is_some() {
        merged.image_url = new.image_url.clone();
        changed = true;
    }
    if merged.ticket_url.is_none() && new.ticket_url.is_some() {
        merged.ticket_url = new.ticket_url.clone();
        changed = true;
    }

    if changed {
        merged.updated_at = Utc::now();
    }

    (merged, changed)
}
