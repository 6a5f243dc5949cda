//! Deletion semantics for recurring and non-recurring calendar entries.
//!
//! Deleting the master (or a non-recurring entry, or the last remaining
//! sibling) removes the whole object. Deleting one occurrence of a series
//! instead records an EXDATE and bumps SEQUENCE so optimistic-concurrency
//! readers of any sibling observe a consistent version.

use tracing::debug;

use crate::cache::{SiblingCache, SiblingKey};
use crate::error::{CalinkError, CalinkResult};
use crate::event::MASTER_RECURRENCE_ID;
use crate::ics::{generate_object, parse_object};
use crate::store::CalendarStore;

pub struct DeletionEngine<'a> {
    pub store: &'a mut dyn CalendarStore,
    pub cache: &'a mut SiblingCache,
}

impl DeletionEngine<'_> {
    /// Delete a calendar entry, or a single recurrence instance of it.
    pub fn delete_calendar_entry(
        &mut self,
        calendar_id: &str,
        uri: &str,
        recurrence_id: Option<&str>,
    ) -> CalinkResult<()> {
        let raw = self.store.get_object(calendar_id, uri)?.ok_or_else(|| {
            CalinkError::ObjectNotFound(calendar_id.to_string(), uri.to_string())
        })?;
        let mut object = parse_object(&raw)?;

        let instances = self.cache.get_or_expand(calendar_id, &object)?;
        let cache_key = SiblingKey::for_object(calendar_id, &object);

        let recurrence_id = recurrence_id.unwrap_or(MASTER_RECURRENCE_ID);
        let whole_object = recurrence_id == MASTER_RECURRENCE_ID
            || object
                .master()
                .is_none_or(|master| master.recurrence.is_none())
            || instances.len() <= 1;

        if whole_object {
            if let Some(key) = cache_key {
                self.cache.invalidate(&key);
            }
            return self.store.delete_object(calendar_id, uri);
        }

        let target = match instances.get(recurrence_id) {
            Some(target) => target.clone(),
            // Already gone
            None => return Ok(()),
        };

        // If the instance existed as an explicit exception, the EXDATE
        // supersedes it
        if object.remove_exception(recurrence_id) {
            debug!(recurrence_id, "removing superseded exception component");
        }

        let master = object.master_mut().ok_or_else(|| {
            CalinkError::AmbiguousState(format!(
                "instance '{}' without master component",
                recurrence_id
            ))
        })?;
        let old_sequence = master.sequence;

        // EXDATE matches the original occurrence time, date-only for
        // whole-day instances
        if let Some(recurrence) = master.recurrence.as_mut() {
            recurrence.exdates.push(target.occurrence.clone());
        }
        master.sequence = old_sequence + 1;

        // Exceptions sharing the old sequence value get bumped with it
        for component in &mut object.components {
            if !component.is_master() && component.sequence == old_sequence {
                component.sequence += 1;
            }
        }

        if let Some(key) = cache_key {
            self.cache.invalidate(&key);
        }

        let rewritten = generate_object(&object)?;
        self.store.update_object(calendar_id, uri, &rewritten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::expand_object;
    use crate::store::MemoryCalendarStore;

    const CAL: &str = "orchestra";
    const URI: &str = "festival.ics";

    fn delete(
        store: &mut MemoryCalendarStore,
        recurrence_id: Option<&str>,
    ) -> CalinkResult<()> {
        let mut cache = SiblingCache::new();
        let mut engine = DeletionEngine {
            store,
            cache: &mut cache,
        };
        engine.delete_calendar_entry(CAL, URI, recurrence_id)
    }

    fn all_day_series() -> String {
        [
            "BEGIN:VCALENDAR",
            "VERSION:2.0",
            "PRODID:TEST",
            "BEGIN:VEVENT",
            "UID:E1",
            "SUMMARY:Festival day",
            "DTSTART;VALUE=DATE:20240101",
            "DTEND;VALUE=DATE:20240102",
            "SEQUENCE:0",
            "RRULE:FREQ=DAILY;COUNT=5",
            "END:VEVENT",
            "END:VCALENDAR",
        ]
        .join("\n")
    }

    #[test]
    fn test_delete_instance_of_all_day_series_writes_date_exdate() {
        let mut store = MemoryCalendarStore::new();
        store.seed(CAL, URI, &all_day_series());

        delete(&mut store, Some("20240103")).unwrap();

        let raw = store.raw(CAL, URI).unwrap().clone();
        assert!(
            raw.contains("EXDATE;VALUE=DATE:20240103"),
            "whole-day instance must produce a date-only EXDATE. ICS:\n{}",
            raw
        );

        let object = parse_object(&raw).unwrap();
        assert_eq!(object.master().unwrap().sequence, 1, "SEQUENCE bumped");

        // 4 remaining expandable instances
        let expansion = expand_object(CAL, &object).unwrap();
        assert_eq!(expansion.instances.len(), 4);
        assert!(!expansion.instances.contains_key("20240103"));
    }

    #[test]
    fn test_delete_bumps_exceptions_sharing_old_sequence() {
        let mut store = MemoryCalendarStore::new();
        let ics = [
            "BEGIN:VCALENDAR",
            "VERSION:2.0",
            "PRODID:TEST",
            "BEGIN:VEVENT",
            "UID:E1",
            "SUMMARY:Rehearsal",
            "DTSTART:20240101T100000Z",
            "SEQUENCE:0",
            "RRULE:FREQ=WEEKLY;COUNT=4",
            "END:VEVENT",
            "BEGIN:VEVENT",
            "UID:E1",
            "SUMMARY:Rehearsal (moved)",
            "DTSTART:20240108T140000Z",
            "RECURRENCE-ID:20240108T100000Z",
            "SEQUENCE:0",
            "END:VEVENT",
            "BEGIN:VEVENT",
            "UID:E1",
            "SUMMARY:Rehearsal (edited earlier)",
            "DTSTART:20240122T100000Z",
            "RECURRENCE-ID:20240122T100000Z",
            "SEQUENCE:3",
            "END:VEVENT",
            "END:VCALENDAR",
        ]
        .join("\n");
        store.seed(CAL, URI, &ics);

        delete(&mut store, Some("20240115T100000Z")).unwrap();

        let object = parse_object(store.raw(CAL, URI).unwrap()).unwrap();
        assert_eq!(object.master().unwrap().sequence, 1);
        assert_eq!(
            object.exception_for("20240108T100000Z").unwrap().sequence,
            1,
            "exception sharing the old sequence gets bumped"
        );
        assert_eq!(
            object.exception_for("20240122T100000Z").unwrap().sequence,
            3,
            "exception on a different sequence is untouched"
        );
    }

    #[test]
    fn test_delete_explicit_exception_removes_component_and_adds_exdate() {
        let mut store = MemoryCalendarStore::new();
        let ics = [
            "BEGIN:VCALENDAR",
            "VERSION:2.0",
            "PRODID:TEST",
            "BEGIN:VEVENT",
            "UID:E1",
            "SUMMARY:Rehearsal",
            "DTSTART:20240101T100000Z",
            "SEQUENCE:0",
            "RRULE:FREQ=WEEKLY;COUNT=3",
            "END:VEVENT",
            "BEGIN:VEVENT",
            "UID:E1",
            "SUMMARY:Rehearsal (moved)",
            "DTSTART:20240109T150000Z",
            "RECURRENCE-ID:20240108T100000Z",
            "SEQUENCE:0",
            "END:VEVENT",
            "END:VCALENDAR",
        ]
        .join("\n");
        store.seed(CAL, URI, &ics);

        delete(&mut store, Some("20240108T100000Z")).unwrap();

        let object = parse_object(store.raw(CAL, URI).unwrap()).unwrap();
        assert!(object.exception_for("20240108T100000Z").is_none());
        assert_eq!(object.components.len(), 1, "EXDATE supersedes the exception");
        // EXDATE matches the original occurrence, not the moved start
        let exdates = &object.master().unwrap().recurrence.as_ref().unwrap().exdates;
        assert_eq!(exdates.len(), 1);
        assert_eq!(exdates[0].to_ics_string(), "20240108T100000Z");
    }

    #[test]
    fn test_delete_master_recurrence_id_removes_whole_object() {
        let mut store = MemoryCalendarStore::new();
        store.seed(CAL, URI, &all_day_series());

        delete(&mut store, None).unwrap();
        assert!(!store.contains(CAL, URI));
    }

    #[test]
    fn test_delete_non_recurring_removes_whole_object() {
        let mut store = MemoryCalendarStore::new();
        let ics = "BEGIN:VCALENDAR\nVERSION:2.0\nPRODID:TEST\nBEGIN:VEVENT\nUID:E2\nSUMMARY:One-off\nDTSTART:20240601T190000Z\nEND:VEVENT\nEND:VCALENDAR";
        store.seed(CAL, URI, ics);

        // Even with a recurrence-id argument, a non-recurring entry goes away
        delete(&mut store, Some("20240601T190000Z")).unwrap();
        assert!(!store.contains(CAL, URI));
    }

    #[test]
    fn test_delete_unknown_instance_is_a_no_op() {
        let mut store = MemoryCalendarStore::new();
        store.seed(CAL, URI, &all_day_series());

        delete(&mut store, Some("20240199")).unwrap();
        assert_eq!(store.update_calls(), 0);
        assert!(store.contains(CAL, URI));
    }
}
