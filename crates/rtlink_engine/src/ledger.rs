//! Event deduplication.

use rtlink_protocol::EventRecord;
use std::collections::{HashMap, HashSet};

/// Remembers every admitted event hash and the latest admitted time of each
/// entity.
///
/// # Invariants
///
/// - An event is admitted iff its hash is unseen AND it has no entity key,
///   no time, no recorded entity version, or a time at or after that version
/// - Recorded entity versions never decrease
/// - A rejected event leaves the ledger untouched
#[derive(Debug, Default)]
pub struct EventLedger {
    seen_hashes: HashSet<String>,
    entity_versions: HashMap<String, i64>,
}

impl EventLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks and records an event in one step.
    pub fn admit(&mut self, event: &EventRecord) -> bool {
        if self.seen_hashes.contains(&event.hash) {
            return false;
        }

        let entity = event.entity_key();
        if let (Some(key), Some(time)) = (&entity, event.time) {
            if let Some(&version) = self.entity_versions.get(key.as_str()) {
                if time < version {
                    return false;
                }
            }
        }

        self.seen_hashes.insert(event.hash.clone());
        if let (Some(key), Some(time)) = (entity, event.time) {
            let version = self.entity_versions.entry(key.as_str().to_owned()).or_insert(time);
            *version = (*version).max(time);
        }
        true
    }

    /// Forgets everything.
    pub fn reset(&mut self) {
        self.seen_hashes.clear();
        self.entity_versions.clear();
    }

    /// Returns true if the hash was admitted before.
    pub fn contains(&self, hash: &str) -> bool {
        self.seen_hashes.contains(hash)
    }

    /// Latest admitted time of an entity (`"{class_name}:{id}"`).
    pub fn entity_version(&self, key: &str) -> Option<i64> {
        self.entity_versions.get(key).copied()
    }

    /// Number of admitted events.
    pub fn len(&self) -> usize {
        self.seen_hashes.len()
    }

    /// Returns true if nothing was admitted.
    pub fn is_empty(&self) -> bool {
        self.seen_hashes.is_empty() && self.entity_versions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rtlink_protocol::Via;

    fn quote(hash: &str, time: i64) -> EventRecord {
        EventRecord::new(hash).with_time(time).with_entity("Quote", "1")
    }

    #[test]
    fn duplicate_hash_is_rejected() {
        let mut ledger = EventLedger::new();
        let event = EventRecord::new("h1");

        assert!(ledger.admit(&event));
        assert!(!ledger.admit(&event));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn stale_entity_update_is_rejected_on_either_path() {
        let mut ledger = EventLedger::new();
        assert!(ledger.admit(&quote("a", 200).with_via(Via::Socket)));

        assert!(!ledger.admit(&quote("b", 199).with_via(Via::Polling)));
        assert!(!ledger.admit(&quote("c", 100).with_via(Via::Socket)));
        // rejected hashes were not recorded
        assert!(!ledger.contains("b"));

        // equal time is accepted
        assert!(ledger.admit(&quote("d", 200)));
        assert!(ledger.admit(&quote("e", 300)));
        assert_eq!(ledger.entity_version("Quote:1"), Some(300));
    }

    #[test]
    fn events_without_identity_or_time_skip_version_check() {
        let mut ledger = EventLedger::new();
        assert!(ledger.admit(&quote("a", 500)));

        let untimed = EventRecord::new("b").with_entity("Quote", "1");
        assert!(ledger.admit(&untimed));
        assert_eq!(ledger.entity_version("Quote:1"), Some(500));

        let anonymous = EventRecord::new("c").with_time(1);
        assert!(ledger.admit(&anonymous));
    }

    #[test]
    fn reset_clears_everything() {
        let mut ledger = EventLedger::new();
        ledger.admit(&quote("a", 10));
        ledger.reset();

        assert!(ledger.is_empty());
        assert!(ledger.admit(&quote("a", 1)));
    }

    proptest! {
        #[test]
        fn entity_version_never_decreases(times in proptest::collection::vec(1i64..1_000, 1..64)) {
            let mut ledger = EventLedger::new();
            let mut high = i64::MIN;
            for (i, time) in times.iter().enumerate() {
                let admitted = ledger.admit(&quote(&format!("h{i}"), *time));
                prop_assert_eq!(admitted, *time >= high);
                if admitted {
                    high = *time;
                }
                prop_assert_eq!(ledger.entity_version("Quote:1"), Some(high));
            }
        }
    }
}
