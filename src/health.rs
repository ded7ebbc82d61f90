use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::storage::Storage;
use crate::types::{CrawlAttempt, CrawlStatus, ErrorKind};

/// Circuit state is never stored; it is recomputed on demand from the
/// durable crawl-attempt log so there is no second source of truth to go
/// stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Crawl proceeds.
    Closed,
    /// Crawl is skipped this cycle.
    Open,
}

#[derive(Debug, Clone)]
pub struct CircuitPolicy {
    /// How far back attempts are considered at all.
    pub lookback: Duration,
    /// Consecutive failures needed to open the circuit.
    pub failure_threshold: usize,
    /// How long the circuit stays open after the most recent failure.
    pub recovery_timeout: Duration,
    /// Shorter cool-down for transient failure classes; retrying a
    /// temporary block soon is cheap and often succeeds.
    pub transient_recovery_timeout: Duration,
    /// Extra consecutive failures required before opening on persistent
    /// classes, since a broken parser fails identically every run.
    pub persistent_extra_failures: usize,
}

impl Default for CircuitPolicy {
    fn default() -> Self {
        Self {
            lookback: Duration::hours(24),
            failure_threshold: 3,
            recovery_timeout: Duration::hours(6),
            transient_recovery_timeout: Duration::hours(1),
            persistent_extra_failures: 2,
        }
    }
}

impl CircuitPolicy {
    /// Most rows any evaluation can need.
    pub fn max_attempt_rows(&self) -> usize {
        self.failure_threshold + self.persistent_extra_failures + 1
    }
}

/// Count consecutive `Error` attempts from most recent backward; a
/// success (or cancellation) breaks the streak.
fn failure_streak(attempts: &[CrawlAttempt]) -> (usize, Option<DateTime<Utc>>) {
    let mut streak = 0;
    let mut last_failure_at = None;
    for attempt in attempts {
        if attempt.status != CrawlStatus::Error {
            break;
        }
        if last_failure_at.is_none() {
            last_failure_at = Some(attempt.started_at);
        }
        streak += 1;
    }
    (streak, last_failure_at)
}

/// Evaluate circuit state from attempt history, most recent first.
pub fn evaluate(attempts: &[CrawlAttempt], now: DateTime<Utc>, policy: &CircuitPolicy) -> CircuitState {
    let (streak, last_failure_at) = failure_streak(attempts);
    if streak < policy.failure_threshold {
        return CircuitState::Closed;
    }
    match last_failure_at {
        Some(at) if now - at < policy.recovery_timeout => CircuitState::Open,
        _ => CircuitState::Closed,
    }
}

/// Richer evaluation that classifies the most recent failure: transient
/// classes cool down faster, persistent classes need a longer streak.
pub fn evaluate_classified(
    attempts: &[CrawlAttempt],
    now: DateTime<Utc>,
    policy: &CircuitPolicy,
) -> CircuitState {
    let (streak, last_failure_at) = failure_streak(attempts);
    if streak == 0 {
        return CircuitState::Closed;
    }

    let kind = attempts
        .first()
        .and_then(|a| a.error_kind)
        .unwrap_or(ErrorKind::Transient);

    let (threshold, recovery) = match kind {
        ErrorKind::Transient => (policy.failure_threshold, policy.transient_recovery_timeout),
        ErrorKind::Persistent => (
            policy.failure_threshold + policy.persistent_extra_failures,
            policy.recovery_timeout,
        ),
    };

    if streak < threshold {
        return CircuitState::Closed;
    }
    match last_failure_at {
        Some(at) if now - at < recovery => CircuitState::Open,
        _ => CircuitState::Closed,
    }
}

/// Read-side gate over the crawl-attempt log. Performs no writes and
/// never fails: missing history or a storage hiccup both mean "allow
/// the crawl".
pub struct SourceHealthMonitor {
    storage: Arc<dyn Storage>,
    policy: CircuitPolicy,
}

impl SourceHealthMonitor {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            policy: CircuitPolicy::default(),
        }
    }

    pub fn with_policy(storage: Arc<dyn Storage>, policy: CircuitPolicy) -> Self {
        Self { storage, policy }
    }

    pub async fn check(&self, source_id: Uuid) -> CircuitState {
        let now = Utc::now();
        let since = now - self.policy.lookback;

        let attempts = match self.storage.get_recent_crawl_attempts(source_id, since).await {
            Ok(mut attempts) => {
                attempts.truncate(self.policy.max_attempt_rows());
                attempts
            }
            Err(e) => {
                warn!("Failed to read crawl history for {}: {}; allowing crawl", source_id, e);
                return CircuitState::Closed;
            }
        };

        let state = evaluate_classified(&attempts, now, &self.policy);
        debug!("Circuit for {} is {:?}", source_id, state);
        state
    }

    /// Explicit admin reset. Intentionally a no-op today: state lives
    /// entirely in the attempt log, so the next successful crawl clears
    /// the streak naturally.
    pub fn reset_circuit(&self, source_id: Uuid) {
        debug!("reset_circuit({}) requested; circuit state is derived, nothing to clear", source_id);
    }
}
