//! Request-scoped sibling memoization.
//!
//! Expanding a recurring series is the most expensive step of a sync pass
//! and the same sibling set is consulted several times per request. The
//! cache memoizes per `(calendar_id, event_uid, sequence)` and must be
//! invalidated by any caller that mutates the underlying object's sequence;
//! a missing entry only costs one re-expansion.

use std::collections::{BTreeMap, HashMap};

use crate::error::CalinkResult;
use crate::event::{CalendarInstance, CalendarObject};
use crate::recurrence::expand_object;

/// Cache key for one version of one calendar object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SiblingKey {
    pub calendar_id: String,
    pub event_uid: String,
    pub sequence: i64,
}

impl SiblingKey {
    pub fn for_object(calendar_id: &str, object: &CalendarObject) -> Option<SiblingKey> {
        let reference = object.master().or_else(|| object.components.first())?;
        Some(SiblingKey {
            calendar_id: calendar_id.to_string(),
            event_uid: reference.uid.clone(),
            sequence: reference.sequence,
        })
    }
}

/// Sibling sets memoized for the duration of one request.
#[derive(Debug, Default)]
pub struct SiblingCache {
    entries: HashMap<SiblingKey, BTreeMap<String, CalendarInstance>>,
}

impl SiblingCache {
    pub fn new() -> SiblingCache {
        SiblingCache::default()
    }

    pub fn get(&self, key: &SiblingKey) -> Option<&BTreeMap<String, CalendarInstance>> {
        self.entries.get(key)
    }

    pub fn put(&mut self, key: SiblingKey, instances: BTreeMap<String, CalendarInstance>) {
        self.entries.insert(key, instances);
    }

    pub fn invalidate(&mut self, key: &SiblingKey) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Expanded sibling set for an object, memoized per sequence.
    pub fn get_or_expand(
        &mut self,
        calendar_id: &str,
        object: &CalendarObject,
    ) -> CalinkResult<BTreeMap<String, CalendarInstance>> {
        let key = match SiblingKey::for_object(calendar_id, object) {
            Some(key) => key,
            None => return Ok(BTreeMap::new()),
        };

        if let Some(hit) = self.entries.get(&key) {
            return Ok(hit.clone());
        }

        let expansion = expand_object(calendar_id, object)?;
        self.entries.insert(key, expansion.instances.clone());
        Ok(expansion.instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ics::parse_object;

    const SERIES: &str = "BEGIN:VCALENDAR\nVERSION:2.0\nPRODID:TEST\nBEGIN:VEVENT\nUID:E1\nSUMMARY:Rehearsal\nDTSTART:20240101T100000Z\nRRULE:FREQ=WEEKLY;COUNT=3\nSEQUENCE:0\nEND:VEVENT\nEND:VCALENDAR";

    #[test]
    fn test_get_or_expand_memoizes_until_invalidated() {
        let object = parse_object(SERIES).unwrap();
        let mut cache = SiblingCache::new();

        let first = cache.get_or_expand("cal-1", &object).unwrap();
        assert_eq!(first.len(), 3);

        // Mutating the object without bumping the sequence hits the stale
        // entry; this is exactly why writers must invalidate.
        let mut mutated = object.clone();
        mutated.components[0].categories.push("Spring2024".to_string());
        let stale = cache.get_or_expand("cal-1", &mutated).unwrap();
        assert!(stale[""].categories.is_empty());

        let key = SiblingKey::for_object("cal-1", &mutated).unwrap();
        cache.invalidate(&key);
        let fresh = cache.get_or_expand("cal-1", &mutated).unwrap();
        assert_eq!(fresh[""].categories, vec!["Spring2024"]);
    }

    #[test]
    fn test_sequence_bump_misses_old_entry() {
        let object = parse_object(SERIES).unwrap();
        let mut cache = SiblingCache::new();
        cache.get_or_expand("cal-1", &object).unwrap();

        let mut bumped = object.clone();
        bumped.components[0].sequence = 1;
        bumped.components[0].categories.push("Tour".to_string());

        // New sequence, new key: no invalidation needed for a fresh result
        let fresh = cache.get_or_expand("cal-1", &bumped).unwrap();
        assert_eq!(fresh[""].categories, vec!["Tour"]);
    }
}
