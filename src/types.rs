use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An unresolved event pulled off a source page, before date normalization
/// and dedup. Never persisted as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Seed {
    pub title: String,
    /// Raw date text as it appeared on the page, kept for explicit-year
    /// detection during normalization.
    pub raw_date_text: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub detail_url: Option<String>,
    pub ticket_url: Option<String>,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub extraction_method: ExtractionMethod,
    /// Page the seed was extracted from, used for page classification.
    pub page_url: String,
}

impl Seed {
    /// Uniqueness key used to drop exact repeats within one discovery run.
    pub fn dedupe_key(&self) -> String {
        let url = self
            .detail_url
            .as_deref()
            .or(self.ticket_url.as_deref())
            .unwrap_or("");
        format!(
            "{}|{}|{}|{}",
            self.title.to_lowercase().trim(),
            self.date.map(|d| d.to_string()).unwrap_or_default(),
            self.time.map(|t| t.to_string()).unwrap_or_default(),
            url
        )
    }
}

/// A seed whose date survived normalization, ready for dedup and persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedCandidate {
    pub title: String,
    pub venue_name: String,
    pub event_day: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub description: Option<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub price_note: Option<String>,
    pub tags: Vec<String>,
    pub image_url: Option<String>,
    pub ticket_url: Option<String>,
    pub extraction_method: ExtractionMethod,
    pub page_url: String,
}

/// The resolved, persisted event entity. At most one exists per
/// (normalized title, venue, date) equivalence class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub id: Option<Uuid>,
    pub title: String,
    pub venue_id: Uuid,
    pub event_day: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub description: Option<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub price_note: Option<String>,
    pub tags: Vec<String>,
    pub image_url: Option<String>,
    pub ticket_url: Option<String>,
    pub fingerprint: String,
    /// Extraction confidence in [0, 100].
    pub confidence: u8,
    /// Provenance of the date fields specifically; gates overwrites.
    pub date_provenance: FieldProvenance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A venue in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Venue {
    pub id: Option<Uuid>,
    pub name: String,
    pub name_lower: String,
    pub city: Option<String>,
    pub venue_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Venue {
    pub fn from_name(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            name_lower: name.to_lowercase(),
            city: None,
            venue_url: None,
            created_at: Utc::now(),
        }
    }
}

/// A crawl target. Deactivated, not deleted, when retired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Option<Uuid>,
    pub slug: String,
    pub name: String,
    pub venue_name: String,
    pub active: bool,
    /// Month (1-12) this recurring event historically lands in, when known.
    pub typical_month: Option<u32>,
    pub profile: crate::config::SourceProfile,
    pub created_at: DateTime<Utc>,
}

impl Source {
    pub fn from_config(entry: &crate::config::SourceEntry) -> Self {
        Self {
            id: None,
            slug: entry.slug.clone(),
            name: entry.name.clone(),
            venue_name: entry.venue_name.clone(),
            active: entry.active,
            typical_month: entry.typical_month,
            profile: entry.profile.clone(),
            created_at: Utc::now(),
        }
    }
}

/// How a field was produced. Ordering here is not meaningful; the
/// confidence scorer owns the quality ranking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExtractionMethod {
    Manual,
    Migration,
    StructuredData,
    MetaTag,
    Selector,
    RegexPattern,
    ModelAssisted,
}

impl ExtractionMethod {
    /// Manual and migration entries are trusted absolutely and never
    /// overwritten by crawled data.
    pub fn is_protected(&self) -> bool {
        matches!(self, ExtractionMethod::Manual | ExtractionMethod::Migration)
    }
}

/// Whether a page is specific to one event/organization or a generic
/// aggregator/calendar page.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PageKind {
    Dedicated,
    Generic,
}

/// Per-field extraction provenance, used to gate overwrites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldProvenance {
    pub method: ExtractionMethod,
    pub confidence: u8,
    pub page_kind: PageKind,
}

/// Outcome of a single crawl execution. Append-only; the health monitor
/// recomputes circuit state from these rather than persisting state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlAttempt {
    pub id: Option<Uuid>,
    pub source_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub status: CrawlStatus,
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CrawlStatus {
    Success,
    Error,
    Cancelled,
}

/// Failure classification fed into the circuit breaker. Transient classes
/// get a shorter cool-down; persistent classes require a longer streak.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Persistent,
}
