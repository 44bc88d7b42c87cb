//! Notification deduplication
//!
//! Candidates are grouped by `DedupKey`. Within the window a key yields at most
//! one notification; a strictly higher priority candidate upgrades the existing
//! entry in place instead of creating a second one.
//!
//! Admission is serialized through a single mutex: each `offer` is one critical
//! section, so concurrent producers never admit the same key twice.

use crate::domain::notification::{DedupKey, Notification, SourceKind};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

/// Result of offering a candidate
#[derive(Debug, Clone, PartialEq)]
pub enum DedupOutcome {
    /// New key (or the previous entry lapsed): deliver this notification
    Admitted(Notification),
    /// Existing entry raised to a higher priority; same id as before
    Upgraded(Notification),
    /// A live entry with equal or higher priority already exists
    Dropped { existing_id: String },
}

#[derive(Debug, Clone)]
struct DedupEntry {
    notification: Notification,
    admitted_at_ms: u64,
}

impl DedupEntry {
    #[inline]
    fn is_live(&self, now_ms: u64, window_ms: u64) -> bool {
        !self.notification.is_expired(now_ms) && now_ms.saturating_sub(self.admitted_at_ms) < window_ms
    }
}

/// Bounded, time-windowed dedup map
pub struct NotificationDeduplicator {
    entries: Mutex<FxHashMap<DedupKey, DedupEntry>>,
    window_ms: u64,
    max_entries: usize,
}

impl NotificationDeduplicator {
    pub fn new(window_ms: u64, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
            window_ms,
            max_entries: max_entries.max(1),
        }
    }

    /// Decide whether a candidate is new, an upgrade, or a duplicate
    pub fn offer(&self, candidate: Notification, now_ms: u64) -> DedupOutcome {
        let mut entries = self.entries.lock();
        let key = candidate.dedup_key.clone();

        if let Some(entry) = entries.get_mut(&key) {
            if entry.is_live(now_ms, self.window_ms) {
                if candidate.priority <= entry.notification.priority {
                    debug!(key = %key, priority = %candidate.priority.as_str(), "notification_deduplicated");
                    return DedupOutcome::Dropped { existing_id: entry.notification.id.clone() };
                }
                let existing = &mut entry.notification;
                debug!(
                    key = %key,
                    from = %existing.priority.as_str(),
                    to = %candidate.priority.as_str(),
                    "notification_upgraded"
                );
                existing.priority = candidate.priority;
                existing.title = candidate.title;
                existing.body = candidate.body;
                existing.action_required = candidate.action_required;
                existing.expires_at_ms = candidate.expires_at_ms;
                return DedupOutcome::Upgraded(existing.clone());
            }
            // Lapsed entry: evict lazily and admit afresh
            entries.remove(&key);
        }

        if entries.len() >= self.max_entries {
            self.make_room(&mut entries, now_ms);
        }

        if candidate.source_kind == SourceKind::ZoneTransition {
            if let Some(counterpart) = key.counterpart() {
                entries.remove(&counterpart);
            }
        }

        entries.insert(key, DedupEntry { notification: candidate.clone(), admitted_at_ms: now_ms });
        DedupOutcome::Admitted(candidate)
    }

    /// Forget a key so the next candidate for it is admitted
    pub fn release(&self, key: &DedupKey) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Register a notification that was admitted elsewhere (server rows)
    pub fn record(&self, notification: &Notification, now_ms: u64) {
        let mut entries = self.entries.lock();
        if !entries.contains_key(&notification.dedup_key) && entries.len() >= self.max_entries {
            self.make_room(&mut entries, now_ms);
        }
        let admitted_at_ms = entries
            .get(&notification.dedup_key)
            .map_or(notification.created_at_ms.min(now_ms), |e| e.admitted_at_ms);
        entries.insert(
            notification.dedup_key.clone(),
            DedupEntry { notification: notification.clone(), admitted_at_ms },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Prune lapsed entries, then evict the oldest if still at capacity
    fn make_room(&self, entries: &mut FxHashMap<DedupKey, DedupEntry>, now_ms: u64) {
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now_ms, self.window_ms));
        let pruned = before - entries.len();

        if entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.admitted_at_ms)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                debug!(key = %key, "dedup_evicted_oldest");
                entries.remove(&key);
            }
        }
        if pruned > 0 {
            debug!(pruned = %pruned, "dedup_pruned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::notification::Priority;

    const WINDOW: u64 = 86_400_000;

    fn candidate(subject: &str, kind: &str, priority: Priority, at: u64) -> Notification {
        Notification::new(SourceKind::Weather, subject, kind, "Weather", "Heavy rain", priority, at)
    }

    fn transition(zone: &str, kind: &str, at: u64) -> Notification {
        Notification::new(SourceKind::ZoneTransition, zone, kind, "Zone", "body", Priority::Low, at)
    }

    #[test]
    fn test_identical_key_and_priority_dropped() {
        let dedup = NotificationDeduplicator::new(WINDOW, 16);
        let first = candidate("mumbai", "rain", Priority::High, 0);
        let first_id = first.id.clone();

        assert!(matches!(dedup.offer(first, 0), DedupOutcome::Admitted(_)));
        let outcome = dedup.offer(candidate("mumbai", "rain", Priority::High, 10), 10);
        assert_eq!(outcome, DedupOutcome::Dropped { existing_id: first_id });
        assert!(matches!(
            dedup.offer(candidate("mumbai", "rain", Priority::Low, 20), 20),
            DedupOutcome::Dropped { .. }
        ));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_higher_priority_upgrades_in_place() {
        let dedup = NotificationDeduplicator::new(WINDOW, 16);
        let first = candidate("mumbai", "rain", Priority::Low, 0);
        let id = first.id.clone();
        dedup.offer(first, 0);

        let mut louder = candidate("mumbai", "rain", Priority::Critical, 50);
        louder.title = "Flood warning".to_string();
        match dedup.offer(louder, 50) {
            DedupOutcome::Upgraded(n) => {
                assert_eq!(n.id, id);
                assert_eq!(n.priority, Priority::Critical);
                assert_eq!(n.title, "Flood warning");
                assert_eq!(n.created_at_ms, 0);
            }
            other => panic!("expected upgrade, got {other:?}"),
        }
        // Back to low: dropped against the upgraded entry
        assert!(matches!(
            dedup.offer(candidate("mumbai", "rain", Priority::High, 60), 60),
            DedupOutcome::Dropped { .. }
        ));
    }

    #[test]
    fn test_window_lapse_admits_again() {
        let dedup = NotificationDeduplicator::new(1_000, 16);
        dedup.offer(candidate("mumbai", "rain", Priority::Low, 0), 0);
        assert!(matches!(
            dedup.offer(candidate("mumbai", "rain", Priority::Low, 999), 999),
            DedupOutcome::Dropped { .. }
        ));
        assert!(matches!(
            dedup.offer(candidate("mumbai", "rain", Priority::Low, 1_000), 1_000),
            DedupOutcome::Admitted(_)
        ));
    }

    #[test]
    fn test_expired_entry_evicted_on_lookup() {
        let dedup = NotificationDeduplicator::new(WINDOW, 16);
        dedup.offer(candidate("mumbai", "rain", Priority::Low, 0).with_expiry(100), 0);
        assert!(matches!(
            dedup.offer(candidate("mumbai", "rain", Priority::Low, 100), 100),
            DedupOutcome::Admitted(_)
        ));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_transition_admission_releases_counterpart() {
        let dedup = NotificationDeduplicator::new(WINDOW, 16);
        assert!(matches!(dedup.offer(transition("1", "enter", 0), 0), DedupOutcome::Admitted(_)));
        // Double-fired enter is suppressed
        assert!(matches!(dedup.offer(transition("1", "enter", 5), 5), DedupOutcome::Dropped { .. }));

        assert!(matches!(dedup.offer(transition("1", "exit", 10), 10), DedupOutcome::Admitted(_)));
        assert!(!dedup.contains(&DedupKey::new(SourceKind::ZoneTransition, "1", "enter")));

        // Genuine re-entry after a full exit is a new notification
        assert!(matches!(dedup.offer(transition("1", "enter", 20), 20), DedupOutcome::Admitted(_)));
        assert!(!dedup.contains(&DedupKey::new(SourceKind::ZoneTransition, "1", "exit")));
    }

    #[test]
    fn test_release() {
        let dedup = NotificationDeduplicator::new(WINDOW, 16);
        let n = candidate("mumbai", "rain", Priority::Low, 0);
        let key = n.dedup_key.clone();
        dedup.offer(n, 0);
        assert!(dedup.release(&key));
        assert!(!dedup.release(&key));
        assert!(matches!(
            dedup.offer(candidate("mumbai", "rain", Priority::Low, 1), 1),
            DedupOutcome::Admitted(_)
        ));
    }

    #[test]
    fn test_capacity_prunes_then_evicts_oldest() {
        let dedup = NotificationDeduplicator::new(1_000, 3);
        dedup.offer(candidate("a", "x", Priority::Low, 0), 0);
        dedup.offer(candidate("b", "x", Priority::Low, 500), 500);
        dedup.offer(candidate("c", "x", Priority::Low, 600), 600);

        // "a" is outside the window at t=1200 and gets pruned
        dedup.offer(candidate("d", "x", Priority::Low, 1_200), 1_200);
        assert_eq!(dedup.len(), 3);
        assert!(!dedup.contains(&DedupKey::new(SourceKind::Weather, "a", "x")));

        // Nothing lapsed at t=1300: the oldest live entry ("b") is evicted
        dedup.offer(candidate("e", "x", Priority::Low, 1_300), 1_300);
        assert_eq!(dedup.len(), 3);
        assert!(!dedup.contains(&DedupKey::new(SourceKind::Weather, "b", "x")));
        assert!(dedup.contains(&DedupKey::new(SourceKind::Weather, "e", "x")));
    }

    #[test]
    fn test_record_server_row_suppresses_local_duplicate() {
        let dedup = NotificationDeduplicator::new(WINDOW, 16);
        let server = candidate("mumbai", "rain", Priority::High, 0);
        dedup.record(&server, 10);
        assert_eq!(
            dedup.offer(candidate("mumbai", "rain", Priority::Medium, 20), 20),
            DedupOutcome::Dropped { existing_id: server.id.clone() }
        );
    }
}
