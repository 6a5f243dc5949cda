//! Synchronization of one calendar-object change into the link table.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tracing::{debug, warn};

use crate::cache::SiblingCache;
use crate::error::CalinkResult;
use crate::event::CalendarObject;
use crate::ics::{generate_object, parse_object};
use crate::links::{LinkRepository, NewProjectEventLink, ProjectEventLink, SeriesUid};
use crate::membership;
use crate::project::{Project, ProjectId};
use crate::related::resolve_uid_class;
use crate::store::CalendarStore;

/// What one sync pass did, for notification purposes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Projects with at least one link created or refreshed.
    pub registered: BTreeSet<ProjectId>,
    /// Projects with at least one link retired.
    pub unregistered: BTreeSet<ProjectId>,
    /// The pass aborted after forcing the object back to CLASS:PUBLIC; the
    /// rewrite generates a fresh change notification that re-enters sync.
    pub privacy_rewritten: bool,
}

/// Reconciles project/event links for one calendar-object change.
///
/// Single-threaded and request-scoped; the caller flushes transactionally
/// after the pass, so any repository or store error aborts without partial
/// commit.
pub struct SyncEngine<'a> {
    pub store: &'a mut dyn CalendarStore,
    pub links: &'a mut dyn LinkRepository,
    pub cache: &'a mut SiblingCache,
    pub projects: &'a [Project],
}

impl SyncEngine<'_> {
    /// Process one object created/updated notification.
    ///
    /// `raw` is the payload carried by the notification; `unregister_stale`
    /// controls whether step 4 (stale retirement) runs.
    pub fn sync_calendar_object(
        &mut self,
        calendar_id: &str,
        uri: &str,
        raw: &str,
        unregister_stale: bool,
    ) -> CalinkResult<SyncOutcome> {
        let object = parse_object(raw)?;

        // Step 1: privacy override. The incoming payload of a private event
        // is already redacted, so rewrite the original stored object and let
        // the rewrite's own notification re-enter this algorithm cleanly.
        if object.has_private_instance() {
            self.force_object_public(calendar_id, uri, object)?;
            return Ok(SyncOutcome {
                privacy_rewritten: true,
                ..SyncOutcome::default()
            });
        }

        // Step 2: instance expansion. An empty expansion registers nothing
        // and lets stale retirement clear the table; a truncated one keeps
        // the produced prefix.
        let instances = self.cache.get_or_expand(calendar_id, &object)?;
        let uid_class = resolve_uid_class(&object, &*self.links)?;

        let has_rrule = object
            .master()
            .is_some_and(|master| master.recurrence.is_some());
        let is_recurring = (has_rrule && !instances.is_empty()) || uid_class.len() > 1;

        let mut existing = self.links.links_for_uids(&uid_class, true)?;
        // One series_uid per logical series: reuse whatever a sibling link
        // already carries before minting a fresh one.
        let mut series_uid = existing.iter().find_map(|link| link.series_uid);

        // UIDs this pass actually expanded; class siblings under other UIDs
        // were not, so their recurrence-ids cannot be judged here.
        let expanded_uids: BTreeSet<String> = object.uids().into_iter().collect();

        // Step 3: per-instance registration against each instance's own
        // categories (exceptions may differ from the master).
        let mut matched: BTreeMap<ProjectId, BTreeSet<String>> = BTreeMap::new();
        let mut outcome = SyncOutcome::default();

        for (recurrence_id, instance) in &instances {
            for project_id in membership::resolve(instance, self.projects) {
                matched
                    .entry(project_id)
                    .or_default()
                    .insert(recurrence_id.clone());

                let found = existing.iter_mut().find(|link| {
                    link.project == project_id
                        && link.event_uid == instance.event_uid
                        && link.calendar_id == calendar_id
                        && link.recurrence_id == *recurrence_id
                });
                match found {
                    Some(link) => {
                        link.event_uri = uri.to_string();
                        link.sequence = instance.sequence;
                        link.deleted_at = None;
                        if link.series_uid.is_none() && is_recurring {
                            link.series_uid =
                                Some(*series_uid.get_or_insert_with(SeriesUid::mint));
                        }
                        self.links.update(link)?;
                    }
                    None => {
                        let minted = if is_recurring {
                            Some(*series_uid.get_or_insert_with(SeriesUid::mint))
                        } else {
                            None
                        };
                        let created = self.links.insert(NewProjectEventLink {
                            project: project_id,
                            calendar_id: calendar_id.to_string(),
                            event_uri: uri.to_string(),
                            event_uid: instance.event_uid.clone(),
                            sequence: instance.sequence,
                            recurrence_id: recurrence_id.clone(),
                            series_uid: minted,
                            component_type: instance.component_type,
                        })?;
                        existing.push(created);
                    }
                }
                outcome.registered.insert(project_id);
            }
        }

        // Step 4: stale retirement, derived from the membership invariant.
        // A project that matched nothing is retired class-wide; within the
        // object's own UIDs, a link also goes when its recurrence-id fell
        // out of that project's matched set.
        if unregister_stale {
            let now = Utc::now();
            for link in &existing {
                if link.is_deleted() {
                    continue;
                }
                if !is_stale(link, &matched, &expanded_uids) {
                    continue;
                }
                debug!(
                    project = %link.project,
                    uid = %link.event_uid,
                    recurrence_id = %link.recurrence_id,
                    "retiring stale project/event link"
                );
                self.links.soft_delete(link.id, now)?;
                outcome.unregistered.insert(link.project);
            }
        }

        Ok(outcome)
    }

    /// Rewrite the stored object with CLASS:PUBLIC on every component.
    fn force_object_public(
        &mut self,
        calendar_id: &str,
        uri: &str,
        notified: CalendarObject,
    ) -> CalinkResult<()> {
        let (mut original, existed) = match self.store.get_object(calendar_id, uri)? {
            Some(raw) => (parse_object(&raw)?, true),
            None => {
                warn!(
                    calendar_id,
                    uri, "privacy override: stored object missing, rewriting notified copy"
                );
                (notified, false)
            }
        };

        original.force_public(Utc::now());
        let rewritten = generate_object(&original)?;
        if existed {
            self.store.update_object(calendar_id, uri, &rewritten)
        } else {
            self.store.create_object(calendar_id, uri, &rewritten)
        }
    }
}

fn is_stale(
    link: &ProjectEventLink,
    matched: &BTreeMap<ProjectId, BTreeSet<String>>,
    expanded_uids: &BTreeSet<String>,
) -> bool {
    match matched.get(&link.project) {
        None => true,
        Some(recurrence_ids) => {
            expanded_uids.contains(&link.event_uid)
                && !recurrence_ids.contains(&link.recurrence_id)
        }
    }
}
