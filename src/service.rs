//! Caller-facing surface over the sync, unchain and deletion engines.
//!
//! Owns the collaborators plus a request-scoped sibling cache, and carries
//! the list of known projects whose names participate in membership
//! resolution. Read paths degrade gracefully: a link whose calendar object
//! is gone, or whose recurrence-id no longer matches an expanded sibling,
//! is logged and skipped instead of failing the batch.

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::{error, warn};

use crate::cache::SiblingCache;
use crate::deletion::DeletionEngine;
use crate::error::{CalinkError, CalinkResult};
use crate::event::CalendarInstance;
use crate::ics::parse_object;
use crate::links::{LinkRepository, ProjectEventLink};
use crate::project::{Project, ProjectId};
use crate::store::CalendarStore;
use crate::sync::{SyncEngine, SyncOutcome};
use crate::unchain::UnchainEngine;

/// One event instance belonging to a project, with its link metadata.
#[derive(Debug, Clone)]
pub struct ProjectEvent {
    pub link: ProjectEventLink,
    pub instance: CalendarInstance,
}

pub struct EventLinkService<S: CalendarStore, R: LinkRepository> {
    store: S,
    links: R,
    cache: SiblingCache,
    projects: Vec<Project>,
}

impl<S: CalendarStore, R: LinkRepository> EventLinkService<S, R> {
    pub fn new(store: S, links: R, projects: Vec<Project>) -> Self {
        EventLinkService {
            store,
            links,
            cache: SiblingCache::new(),
            projects,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn links(&self) -> &R {
        &self.links
    }

    /// Replace the known-project list (e.g. after a project was created).
    pub fn set_projects(&mut self, projects: Vec<Project>) {
        self.projects = projects;
    }

    /// Discard the request-scoped sibling cache. Call between requests; the
    /// cache must never be treated as authoritative across a write boundary.
    pub fn reset_cache(&mut self) {
        self.cache.clear();
    }

    /// Process one object created/updated notification (§sync algorithm).
    pub fn sync_calendar_object(
        &mut self,
        calendar_id: &str,
        uri: &str,
        raw: &str,
        unregister_stale: bool,
    ) -> CalinkResult<SyncOutcome> {
        let mut engine = SyncEngine {
            store: &mut self.store,
            links: &mut self.links,
            cache: &mut self.cache,
            projects: &self.projects,
        };
        engine.sync_calendar_object(calendar_id, uri, raw, unregister_stale)
    }

    /// Remove one project's tag from one or all instances of an event.
    pub fn unchain(
        &mut self,
        project: ProjectId,
        calendar_id: &str,
        event_uri: &str,
        recurrence_id: Option<&str>,
    ) -> CalinkResult<()> {
        let project = self.project(project)?.clone();
        let mut engine = UnchainEngine {
            store: &mut self.store,
            links: &mut self.links,
            cache: &mut self.cache,
        };
        engine.unchain(&project, calendar_id, event_uri, recurrence_id)
    }

    /// Delete a calendar entry or one recurrence instance of it.
    pub fn delete_calendar_entry(
        &mut self,
        calendar_id: &str,
        uri: &str,
        recurrence_id: Option<&str>,
    ) -> CalinkResult<()> {
        let mut engine = DeletionEngine {
            store: &mut self.store,
            cache: &mut self.cache,
        };
        engine.delete_calendar_entry(calendar_id, uri, recurrence_id)
    }

    /// Retire link rows only, leaving the calendar object untouched.
    ///
    /// Returns whether any link was retired.
    pub fn unregister(
        &mut self,
        project: ProjectId,
        event_uri: &str,
        recurrence_id: Option<&str>,
    ) -> CalinkResult<bool> {
        let now = Utc::now();
        let mut retired = false;
        for link in self.links.links_for_project(project, false)? {
            if link.event_uri != event_uri {
                continue;
            }
            if recurrence_id.is_some_and(|rid| link.recurrence_id != rid) {
                continue;
            }
            self.links.soft_delete(link.id, now)?;
            retired = true;
        }
        Ok(retired)
    }

    /// All event instances currently linked to a project, sorted by start.
    pub fn events(&mut self, project: ProjectId) -> CalinkResult<Vec<ProjectEvent>> {
        let mut result = Vec::new();

        for link in self.links.links_for_project(project, false)? {
            let raw = match self.store.get_object(&link.calendar_id, &link.event_uri)? {
                Some(raw) => raw,
                None => {
                    // Orphan link: calendar object gone, read path degrades
                    warn!(
                        calendar_id = %link.calendar_id,
                        uri = %link.event_uri,
                        "skipping orphan link, calendar object missing"
                    );
                    continue;
                }
            };
            let object = parse_object(&raw)?;
            let instances = self.cache.get_or_expand(&link.calendar_id, &object)?;

            match instances.get(&link.recurrence_id) {
                Some(instance) => result.push(ProjectEvent {
                    instance: instance.clone(),
                    link,
                }),
                None => {
                    error!(
                        uid = %link.event_uid,
                        recurrence_id = %link.recurrence_id,
                        "persisted recurrence-id has no expanded sibling"
                    );
                }
            }
        }

        result.sort_by_key(|event| event.instance.start.to_utc());
        Ok(result)
    }

    /// Maintenance pass: retire links whose calendar object no longer
    /// exists. Returns the number of links retired.
    pub fn purge_orphan_links(&mut self) -> CalinkResult<usize> {
        let now = Utc::now();
        let mut purged = 0;

        for link in self.links.all_links(false)? {
            if self
                .store
                .get_object(&link.calendar_id, &link.event_uri)?
                .is_some()
            {
                continue;
            }
            warn!(
                calendar_id = %link.calendar_id,
                uri = %link.event_uri,
                "purging orphan link"
            );
            self.links.soft_delete(link.id, now)?;
            purged += 1;
        }

        Ok(purged)
    }

    /// Projects currently holding at least one live link, for notification
    /// fan-out by callers.
    pub fn linked_projects(&self) -> CalinkResult<BTreeSet<ProjectId>> {
        Ok(self
            .links
            .all_links(false)?
            .into_iter()
            .map(|link| link.project)
            .collect())
    }

    fn project(&self, id: ProjectId) -> CalinkResult<&Project> {
        self.projects
            .iter()
            .find(|project| project.id == id)
            .ok_or(CalinkError::UnknownProject(id.0))
    }
}
