//! Removal of one project's tag from one or all instances of an event.
//!
//! Unchaining leaves the calendar event itself visible to other projects and
//! consumers; only the category tag and the corresponding links go. Write
//! ordering is fixed: invalidate the sibling cache, retire the link(s), then
//! persist the calendar mutation, so a crash never leaves the calendar
//! showing the tag removed while the link table still matches it.

use chrono::Utc;
use tracing::debug;

use crate::cache::{SiblingCache, SiblingKey};
use crate::error::{CalinkError, CalinkResult};
use crate::event::{CalendarObject, MASTER_RECURRENCE_ID};
use crate::ics::{generate_object, parse_object};
use crate::links::LinkRepository;
use crate::project::Project;
use crate::related::resolve_uid_class;
use crate::store::CalendarStore;

pub struct UnchainEngine<'a> {
    pub store: &'a mut dyn CalendarStore,
    pub links: &'a mut dyn LinkRepository,
    pub cache: &'a mut SiblingCache,
}

impl UnchainEngine<'_> {
    /// Remove the association between `project` and one event, or one
    /// specific recurrence instance of it.
    pub fn unchain(
        &mut self,
        project: &Project,
        calendar_id: &str,
        event_uri: &str,
        recurrence_id: Option<&str>,
    ) -> CalinkResult<()> {
        let raw = self
            .store
            .get_object(calendar_id, event_uri)?
            .ok_or_else(|| {
                CalinkError::ObjectNotFound(calendar_id.to_string(), event_uri.to_string())
            })?;
        let object = parse_object(&raw)?;

        let instances = self.cache.get_or_expand(calendar_id, &object)?;
        let uid_class = resolve_uid_class(&object, &*self.links)?;

        let has_rrule = object
            .master()
            .is_some_and(|master| master.recurrence.is_some());
        let is_recurring = (has_rrule && !instances.is_empty()) || uid_class.len() > 1;

        let recurrence_id = recurrence_id.unwrap_or(MASTER_RECURRENCE_ID);
        if recurrence_id == MASTER_RECURRENCE_ID || !is_recurring {
            return self.unchain_all(project, calendar_id, event_uri, object, &uid_class);
        }

        // Only siblings that currently carry the tag participate
        let tagged: Vec<&String> = instances
            .iter()
            .filter(|(_, instance)| instance.has_category(&project.name))
            .map(|(rid, _)| rid)
            .collect();

        if !tagged.iter().any(|rid| rid.as_str() == recurrence_id) {
            // Already stale: the calendar no longer tags this instance
            debug!(
                project = %project.id,
                recurrence_id,
                "unchain target not tagged, retiring stale link only"
            );
            self.retire_links(project, &uid_class, Some(recurrence_id))?;
            return Ok(());
        }

        if tagged.len() <= 2 {
            // At most one tagged sibling would remain; degrade to master
            // removal instead of leaving a one-instance exception-only series
            return self.unchain_all(project, calendar_id, event_uri, object, &uid_class);
        }

        self.unchain_single(
            project,
            calendar_id,
            event_uri,
            object,
            &uid_class,
            recurrence_id,
        )
    }

    /// Remove the project's tag from every instance and retire every link.
    fn unchain_all(
        &mut self,
        project: &Project,
        calendar_id: &str,
        event_uri: &str,
        mut object: CalendarObject,
        uid_class: &[String],
    ) -> CalinkResult<()> {
        if let Some(key) = SiblingKey::for_object(calendar_id, &object) {
            self.cache.invalidate(&key);
        }
        self.retire_links(project, uid_class, None)?;

        if object.strip_category(&project.name, Utc::now()) {
            let rewritten = generate_object(&object)?;
            self.store.update_object(calendar_id, event_uri, &rewritten)?;
        }
        Ok(())
    }

    /// Clear the tag on a single sibling by inserting it as an explicit
    /// exception, so it stops inheriting the master's categories.
    fn unchain_single(
        &mut self,
        project: &Project,
        calendar_id: &str,
        event_uri: &str,
        mut object: CalendarObject,
        uid_class: &[String],
        recurrence_id: &str,
    ) -> CalinkResult<()> {
        let now = Utc::now();

        let mut exception = match object.exception_for(recurrence_id) {
            Some(existing) => existing.clone(),
            None => {
                // Materialize the generated occurrence as an exception
                let master = object.master().ok_or_else(|| {
                    CalinkError::AmbiguousState(format!(
                        "instance '{}' without master component",
                        recurrence_id
                    ))
                })?;
                let instances = self.cache.get_or_expand(calendar_id, &object)?;
                let instance = instances.get(recurrence_id).ok_or_else(|| {
                    CalinkError::AmbiguousState(format!(
                        "no expanded sibling for recurrence-id '{}'",
                        recurrence_id
                    ))
                })?;
                let mut component = master.clone();
                component.recurrence = None;
                component.recurrence_id = Some(instance.occurrence.clone());
                component.start = Some(instance.start.clone());
                component.end = instance.end.clone();
                component
            }
        };

        exception.remove_category(&project.name);
        exception.touch(now);
        object.upsert_exception(exception);

        if let Some(key) = SiblingKey::for_object(calendar_id, &object) {
            self.cache.invalidate(&key);
        }
        self.retire_links(project, uid_class, Some(recurrence_id))?;

        let rewritten = generate_object(&object)?;
        self.store.update_object(calendar_id, event_uri, &rewritten)
    }

    /// Soft-delete the project's links in the UID class, optionally scoped
    /// to one recurrence-id.
    fn retire_links(
        &mut self,
        project: &Project,
        uid_class: &[String],
        recurrence_id: Option<&str>,
    ) -> CalinkResult<()> {
        let now = Utc::now();
        for link in self.links.links_for_uids(uid_class, false)? {
            if link.project != project.id {
                continue;
            }
            if recurrence_id.is_some_and(|rid| link.recurrence_id != rid) {
                continue;
            }
            self.links.soft_delete(link.id, now)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::MemoryLinkRepository;
    use crate::store::MemoryCalendarStore;
    use crate::sync::SyncEngine;

    const CAL: &str = "orchestra";
    const URI: &str = "e1.ics";

    fn series_ics(count: u32) -> String {
        [
            "BEGIN:VCALENDAR",
            "VERSION:2.0",
            "PRODID:TEST",
            "BEGIN:VEVENT",
            "UID:E1",
            "SUMMARY:Rehearsal",
            "DTSTART:20240101T100000Z",
            "SEQUENCE:0",
            &format!("RRULE:FREQ=WEEKLY;COUNT={}", count),
            "CATEGORIES:Spring2024",
            "END:VEVENT",
            "END:VCALENDAR",
        ]
        .join("\n")
    }

    fn synced_fixture(
        count: u32,
    ) -> (MemoryCalendarStore, MemoryLinkRepository, Vec<Project>) {
        let mut store = MemoryCalendarStore::new();
        let mut links = MemoryLinkRepository::new();
        let projects = vec![Project::new(1, "Spring2024")];
        let raw = series_ics(count);
        store.seed(CAL, URI, &raw);

        let mut cache = SiblingCache::new();
        let mut engine = SyncEngine {
            store: &mut store,
            links: &mut links,
            cache: &mut cache,
            projects: &projects,
        };
        engine.sync_calendar_object(CAL, URI, &raw, true).unwrap();

        (store, links, projects)
    }

    fn unchain(
        store: &mut MemoryCalendarStore,
        links: &mut MemoryLinkRepository,
        project: &Project,
        recurrence_id: Option<&str>,
    ) {
        let mut cache = SiblingCache::new();
        let mut engine = UnchainEngine {
            store,
            links,
            cache: &mut cache,
        };
        engine
            .unchain(project, CAL, URI, recurrence_id)
            .expect("unchain should succeed");
    }

    #[test]
    fn test_unchain_two_instance_series_degrades_to_master_removal() {
        let (mut store, mut links, projects) = synced_fixture(2);
        assert_eq!(links.all_links(false).unwrap().len(), 2);

        unchain(&mut store, &mut links, &projects[0], Some("20240108T100000Z"));

        // No stray one-instance exception: the master itself loses the tag
        let rewritten = parse_object(store.raw(CAL, URI).unwrap()).unwrap();
        assert!(!rewritten.master().unwrap().has_category("Spring2024"));
        assert_eq!(rewritten.exceptions().count(), 0);

        assert!(links.all_links(false).unwrap().is_empty(), "both links retired");
        assert_eq!(links.all_links(true).unwrap().len(), 2);
    }

    #[test]
    fn test_unchain_subset_creates_untagged_exception() {
        let (mut store, mut links, projects) = synced_fixture(4);
        assert_eq!(links.all_links(false).unwrap().len(), 4);

        unchain(&mut store, &mut links, &projects[0], Some("20240115T100000Z"));

        let rewritten = parse_object(store.raw(CAL, URI).unwrap()).unwrap();
        assert!(rewritten.master().unwrap().has_category("Spring2024"));
        let exception = rewritten
            .exception_for("20240115T100000Z")
            .expect("unchained instance becomes an explicit exception");
        assert!(!exception.has_category("Spring2024"));
        assert!(exception.updated.is_some(), "LAST-MODIFIED bumped");

        let alive = links.all_links(false).unwrap();
        assert_eq!(alive.len(), 3);
        assert!(alive.iter().all(|l| l.recurrence_id != "20240115T100000Z"));
    }

    #[test]
    fn test_unchain_without_recurrence_id_strips_every_instance() {
        let (mut store, mut links, projects) = synced_fixture(3);

        unchain(&mut store, &mut links, &projects[0], None);

        let rewritten = parse_object(store.raw(CAL, URI).unwrap()).unwrap();
        assert!(rewritten
            .components
            .iter()
            .all(|c| !c.has_category("Spring2024")));
        assert!(links.all_links(false).unwrap().is_empty());
    }

    #[test]
    fn test_unchain_stale_instance_only_retires_link() {
        let (mut store, mut links, projects) = synced_fixture(4);
        let before = store.update_calls();

        // Manufacture staleness: a link for an instance that carries no tag
        let raw = store.raw(CAL, URI).unwrap().clone();
        let mut object = parse_object(&raw).unwrap();
        let r2 = crate::event::EventTime::DateTimeUtc(
            chrono::NaiveDate::from_ymd_opt(2024, 1, 15)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap()
                .and_utc(),
        );
        let mut exception = object.master().unwrap().clone();
        exception.recurrence = None;
        exception.recurrence_id = Some(r2.clone());
        exception.start = Some(r2);
        exception.categories.clear();
        object.upsert_exception(exception);
        store.seed(CAL, URI, &generate_object(&object).unwrap());

        unchain(&mut store, &mut links, &projects[0], Some("20240115T100000Z"));

        assert_eq!(store.update_calls(), before, "no calendar rewrite");
        let alive = links.all_links(false).unwrap();
        assert_eq!(alive.len(), 3);
        assert!(alive.iter().all(|l| l.recurrence_id != "20240115T100000Z"));
    }

    #[test]
    fn test_unchain_missing_object_is_an_error() {
        let mut store = MemoryCalendarStore::new();
        let mut links = MemoryLinkRepository::new();
        let mut cache = SiblingCache::new();
        let project = Project::new(1, "Spring2024");
        let mut engine = UnchainEngine {
            store: &mut store,
            links: &mut links,
            cache: &mut cache,
        };

        let result = engine.unchain(&project, CAL, "missing.ics", None);
        assert!(matches!(result, Err(CalinkError::ObjectNotFound(_, _))));
    }
}
