use crate::error::{Result, ScoutError};
use crate::types::{CanonicalEvent, CrawlAttempt, CrawlStatus, ErrorKind, Source, Venue};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Result of an atomic insert-or-get on the fingerprint column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new canonical record was created.
    Inserted(Uuid),
    /// Another record already holds this fingerprint; its id is returned
    /// instead of creating a duplicate row.
    Existing(Uuid),
}

impl InsertOutcome {
    pub fn event_id(&self) -> Uuid {
        match self {
            InsertOutcome::Inserted(id) | InsertOutcome::Existing(id) => *id,
        }
    }
}

/// Storage contract the core pipeline depends on. Backends must enforce
/// fingerprint uniqueness atomically in `insert_event`; a read-then-write
/// sequence can still race two workers into duplicate rows.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn find_event_by_fingerprint(&self, fingerprint: &str)
        -> Result<Option<CanonicalEvent>>;
    async fn find_candidates(&self, date: NaiveDate, venue_id: Uuid)
        -> Result<Vec<CanonicalEvent>>;
    async fn insert_event(&self, event: &mut CanonicalEvent) -> Result<InsertOutcome>;
    async fn update_event(&self, event: &CanonicalEvent) -> Result<()>;

    /// Find a venue by (case-insensitive) name or create it.
    async fn get_or_create_venue(&self, venue: &Venue) -> Result<Venue>;

    async fn get_active_sources(&self) -> Result<Vec<Source>>;
    async fn upsert_source(&self, source: &mut Source) -> Result<()>;

    /// Attempts for a source since `since`, most recent first.
    async fn get_recent_crawl_attempts(
        &self,
        source_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<CrawlAttempt>>;
    async fn record_crawl_attempt(
        &self,
        source_id: Uuid,
        status: CrawlStatus,
        error_kind: Option<ErrorKind>,
    ) -> Result<()>;
}

/// Events and their fingerprint index live under one lock so
/// insert-or-get stays atomic.
#[derive(Default)]
struct EventStore {
    by_id: HashMap<Uuid, CanonicalEvent>,
    by_fingerprint: HashMap<String, Uuid>,
}

/// In-memory storage implementation for development/testing.
pub struct InMemoryStorage {
    events: Arc<Mutex<EventStore>>,
    venues: Arc<Mutex<HashMap<Uuid, Venue>>>,
    sources: Arc<Mutex<HashMap<Uuid, Source>>>,
    attempts: Arc<Mutex<Vec<CrawlAttempt>>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(EventStore::default())),
            venues: Arc::new(Mutex::new(HashMap::new())),
            sources: Arc::new(Mutex::new(HashMap::new())),
            attempts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn lock_events(&self) -> Result<std::sync::MutexGuard<'_, EventStore>> {
        self.events
            .lock()
            .map_err(|_| ScoutError::Storage("event store lock poisoned".into()))
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn find_event_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<CanonicalEvent>> {
        let store = self.lock_events()?;
        Ok(store
            .by_fingerprint
            .get(fingerprint)
            .and_then(|id| store.by_id.get(id))
            .cloned())
    }

    async fn find_candidates(
        &self,
        date: NaiveDate,
        venue_id: Uuid,
    ) -> Result<Vec<CanonicalEvent>> {
        let store = self.lock_events()?;
        Ok(store
            .by_id
            .values()
            .filter(|e| e.event_day == date && e.venue_id == venue_id)
            .cloned()
            .collect())
    }

    async fn insert_event(&self, event: &mut CanonicalEvent) -> Result<InsertOutcome> {
        let mut store = self.lock_events()?;

        if let Some(existing_id) = store.by_fingerprint.get(&event.fingerprint) {
            debug!(
                "Fingerprint collision on insert for '{}'; returning existing {}",
                event.title, existing_id
            );
            return Ok(InsertOutcome::Existing(*existing_id));
        }

        let id = Uuid::new_v4();
        event.id = Some(id);
        store.by_fingerprint.insert(event.fingerprint.clone(), id);
        store.by_id.insert(id, event.clone());

        debug!("Created event: {} with id {}", event.title, id);
        Ok(InsertOutcome::Inserted(id))
    }

    async fn update_event(&self, event: &CanonicalEvent) -> Result<()> {
        let event_id = event
            .id
            .ok_or_else(|| ScoutError::Storage("Cannot update event without ID".into()))?;

        let mut store = self.lock_events()?;
        if !store.by_id.contains_key(&event_id) {
            return Err(ScoutError::Storage(format!(
                "No event with id {event_id} to update"
            )));
        }
        store.by_id.insert(event_id, event.clone());

        debug!("Updated event: {} with id {}", event.title, event_id);
        Ok(())
    }

    async fn get_or_create_venue(&self, venue: &Venue) -> Result<Venue> {
        let mut venues = self
            .venues
            .lock()
            .map_err(|_| ScoutError::Storage("venue lock poisoned".into()))?;

        if let Some(existing) = venues
            .values()
            .find(|v| v.name_lower == venue.name.to_lowercase())
        {
            return Ok(existing.clone());
        }

        let id = Uuid::new_v4();
        let mut created = venue.clone();
        created.id = Some(id);
        created.name_lower = venue.name.to_lowercase();
        venues.insert(id, created.clone());

        debug!("Created venue: {} with id {}", created.name, id);
        Ok(created)
    }

    async fn get_active_sources(&self) -> Result<Vec<Source>> {
        let sources = self
            .sources
            .lock()
            .map_err(|_| ScoutError::Storage("source lock poisoned".into()))?;
        let mut active: Vec<Source> = sources.values().filter(|s| s.active).cloned().collect();
        active.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(active)
    }

    async fn upsert_source(&self, source: &mut Source) -> Result<()> {
        let mut sources = self
            .sources
            .lock()
            .map_err(|_| ScoutError::Storage("source lock poisoned".into()))?;

        if let Some(existing) = sources.values().find(|s| s.slug == source.slug) {
            source.id = existing.id;
        }
        let id = source.id.unwrap_or_else(Uuid::new_v4);
        source.id = Some(id);
        sources.insert(id, source.clone());
        Ok(())
    }

    async fn get_recent_crawl_attempts(
        &self,
        source_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<CrawlAttempt>> {
        let attempts = self
            .attempts
            .lock()
            .map_err(|_| ScoutError::Storage("attempt lock poisoned".into()))?;

        let mut recent: Vec<CrawlAttempt> = attempts
            .iter()
            .filter(|a| a.source_id == source_id && a.started_at >= since)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(recent)
    }

    async fn record_crawl_attempt(
        &self,
        source_id: Uuid,
        status: CrawlStatus,
        error_kind: Option<ErrorKind>,
    ) -> Result<()> {
        let mut attempts = self
            .attempts
            .lock()
            .map_err(|_| ScoutError::Storage("attempt lock poisoned".into()))?;
        attempts.push(CrawlAttempt {
            id: Some(Uuid::new_v4()),
            source_id,
            started_at: Utc::now(),
            status,
            error_kind,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExtractionMethod, FieldProvenance, PageKind};

    fn sample_event(fingerprint: &str) -> CanonicalEvent {
        CanonicalEvent {
            id: None,
            title: "Jazz Night".to_string(),
            venue_id: Uuid::new_v4(),
            event_day: NaiveDate::from_ymd_opt(2026, 5, 20).unwrap(),
            start_time: None,
            end_time: None,
            description: None,
            price_min: None,
            price_max: None,
            price_note: None,
            tags: Vec::new(),
            image_url: None,
            ticket_url: None,
            fingerprint: fingerprint.to_string(),
            confidence: 80,
            date_provenance: FieldProvenance {
                method: ExtractionMethod::Selector,
                confidence: 80,
                page_kind: PageKind::Dedicated,
            },
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_is_idempotent_per_fingerprint() {
        let storage = InMemoryStorage::new();

        let mut first = sample_event("fp-1");
        let outcome = storage.insert_event(&mut first).await.unwrap();
        let first_id = match outcome {
            InsertOutcome::Inserted(id) => id,
            InsertOutcome::Existing(_) => panic!("expected fresh insert"),
        };

        let mut second = sample_event("fp-1");
        let outcome = storage.insert_event(&mut second).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Existing(first_id));

        // Only one row exists.
        let found = storage.find_event_by_fingerprint("fp-1").await.unwrap();
        assert_eq!(found.unwrap().id, Some(first_id));
    }

    #[tokio::test]
    async fn concurrent_inserts_yield_one_record() {
        let storage = Arc::new(InMemoryStorage::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                let mut event = sample_event("fp-race");
                storage.insert_event(&mut event).await.unwrap()
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if let InsertOutcome::Inserted(_) = handle.await.unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
    }

    #[tokio::test]
    async fn venue_lookup_is_case_insensitive() {
        let storage = InMemoryStorage::new();
        let first = storage
            .get_or_create_venue(&Venue::from_name("The Crocodile"))
            .await
            .unwrap();
        let second = storage
            .get_or_create_venue(&Venue::from_name("the crocodile"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn attempts_come_back_most_recent_first() {
        let storage = InMemoryStorage::new();
        let source_id = Uuid::new_v4();
        storage
            .record_crawl_attempt(source_id, CrawlStatus::Error, Some(ErrorKind::Transient))
            .await
            .unwrap();
        storage
            .record_crawl_attempt(source_id, CrawlStatus::Success, None)
            .await
            .unwrap();

        let attempts = storage
            .get_recent_crawl_attempts(source_id, Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].status, CrawlStatus::Success);
    }
}
