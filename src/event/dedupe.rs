//! Duplicate-delivery suppression for at-least-once event delivery
//!
//! An event is skipped when an event for the same maintenance id and
//! occurrence was already handled within the TTL. A starting event is also
//! skipped when the matching completion was already handled, so a late
//! redelivery of the start cannot re-create rules after cleanup.
//!
//! Completion markers that carry an occurrence are kept for the longer
//! tombstone TTL, which must outlast the sender's retry horizon. Without an
//! occurrence every window of a maintenance id shares one key, so those
//! markers only live for the regular TTL: a new window starting within it
//! is treated as a duplicate.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use super::types::{MaintenanceEvent, MaintenanceEventKind};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct DedupeKey {
    maintenance_id: String,
    kind: MaintenanceEventKind,
    occurrence: Option<String>,
}

impl DedupeKey {
    fn for_event(event: &MaintenanceEvent, kind: MaintenanceEventKind) -> Self {
        Self {
            maintenance_id: event.maintenance_id().to_ascii_lowercase(),
            kind,
            occurrence: event.occurrence().map(str::to_string),
        }
    }

    fn is_tombstone(&self) -> bool {
        self.kind == MaintenanceEventKind::MaintenanceCompleted && self.occurrence.is_some()
    }
}

pub struct EventDeduplicator {
    ttl: Duration,
    tombstone_ttl: Duration,
    handled: Mutex<HashMap<DedupeKey, Instant>>,
}

impl EventDeduplicator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tombstone_ttl: ttl,
            handled: Mutex::new(HashMap::new()),
        }
    }

    /// Keep completion markers with an occurrence for `ttl` (never shorter than the regular TTL)
    pub fn with_tombstone_ttl(mut self, ttl: Duration) -> Self {
        self.tombstone_ttl = ttl.max(self.ttl);
        self
    }

    fn ttl_for(&self, key: &DedupeKey) -> Duration {
        if key.is_tombstone() {
            self.tombstone_ttl
        } else {
            self.ttl
        }
    }

    /// Whether `event` was already handled and should be skipped
    pub fn is_duplicate(&self, event: &MaintenanceEvent) -> bool {
        let now = Instant::now();
        let mut handled = self.handled.lock().unwrap_or_else(|e| e.into_inner());
        handled.retain(|key, at| now.duration_since(*at) < self.ttl_for(key));

        let same = DedupeKey::for_event(event, event.kind());
        if handled.contains_key(&same) {
            return true;
        }
        event.kind() == MaintenanceEventKind::MaintenanceStarting
            && handled.contains_key(&DedupeKey::for_event(
                event,
                MaintenanceEventKind::MaintenanceCompleted,
            ))
    }

    /// Record that `event` was handled
    pub fn mark_handled(&self, event: &MaintenanceEvent) {
        let mut handled = self.handled.lock().unwrap_or_else(|e| e.into_inner());
        handled.insert(DedupeKey::for_event(event, event.kind()), Instant::now());
    }

    pub fn len(&self) -> usize {
        self.handled.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn starting(id: &str) -> MaintenanceEvent {
        MaintenanceEvent::new(MaintenanceEventKind::MaintenanceStarting, id, vec!["sub1".into()])
    }

    fn completed(id: &str) -> MaintenanceEvent {
        MaintenanceEvent::new(MaintenanceEventKind::MaintenanceCompleted, id, vec!["sub1".into()])
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_within_ttl() {
        let dedupe = EventDeduplicator::new(Duration::from_secs(60));
        assert!(!dedupe.is_duplicate(&starting("m1")));
        dedupe.mark_handled(&starting("m1"));
        assert!(dedupe.is_duplicate(&starting("M1")));
        assert!(!dedupe.is_duplicate(&completed("m1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let dedupe = EventDeduplicator::new(Duration::from_secs(60));
        dedupe.mark_handled(&starting("m1"));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!dedupe.is_duplicate(&starting("m1")));
        assert!(dedupe.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_start_after_completion_is_skipped() {
        let dedupe = EventDeduplicator::new(Duration::from_secs(60));
        dedupe.mark_handled(&completed("m1"));
        assert!(dedupe.is_duplicate(&starting("m1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_occurrences_are_not_duplicates() {
        let dedupe = EventDeduplicator::new(Duration::from_secs(60));
        dedupe.mark_handled(&starting("m1").with_occurrence("run-1"));
        assert!(!dedupe.is_duplicate(&starting("m1").with_occurrence("run-2")));
        assert!(dedupe.is_duplicate(&starting("m1").with_occurrence("run-1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_tombstone_outlives_regular_ttl() {
        let six_hours = Duration::from_secs(6 * 60 * 60);
        let dedupe = EventDeduplicator::new(six_hours)
            .with_tombstone_ttl(Duration::from_secs(48 * 60 * 60));
        dedupe.mark_handled(&completed("m1").with_occurrence("corr-1"));
        dedupe.mark_handled(&starting("m2").with_occurrence("corr-2"));

        tokio::time::advance(Duration::from_secs(7 * 60 * 60)).await;
        assert!(dedupe.is_duplicate(&starting("m1").with_occurrence("corr-1")));
        assert!(!dedupe.is_duplicate(&starting("m2").with_occurrence("corr-2")));

        tokio::time::advance(Duration::from_secs(42 * 60 * 60)).await;
        assert!(!dedupe.is_duplicate(&starting("m1").with_occurrence("corr-1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_without_occurrence_uses_regular_ttl() {
        let dedupe = EventDeduplicator::new(Duration::from_secs(60))
            .with_tombstone_ttl(Duration::from_secs(3600));
        dedupe.mark_handled(&completed("m1"));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!dedupe.is_duplicate(&starting("m1")));
    }
}
