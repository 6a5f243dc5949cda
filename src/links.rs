//! Persisted project/event links and the repository seam.
//!
//! A [`ProjectEventLink`] row records that one concrete recurrence instance
//! belongs to one project. The sync engine is the only writer; physical
//! storage lives behind the [`LinkRepository`] trait, with
//! [`MemoryLinkRepository`] backing tests and embedders without a database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CalinkError, CalinkResult};
use crate::event::ComponentType;
use crate::project::ProjectId;

/// Repository-assigned link identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LinkId(pub i64);

/// Opaque identifier grouping every link of one logical recurring series,
/// minted once on first registration and propagated to sibling links even
/// after a client has split the series across UIDs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SeriesUid(pub Uuid);

impl SeriesUid {
    pub fn mint() -> SeriesUid {
        SeriesUid(Uuid::new_v4())
    }
}

impl std::fmt::Display for SeriesUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One persisted project/event association.
///
/// At most one non-deleted link exists per
/// `(project, calendar_id, uid-equivalence-class, recurrence_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectEventLink {
    pub id: LinkId,
    pub project: ProjectId,
    pub calendar_id: String,
    /// External object locator within the calendar.
    pub event_uri: String,
    pub event_uid: String,
    /// SEQUENCE of the object when this link was last refreshed.
    pub sequence: i64,
    /// Recurrence-id of the linked instance ("" for the master).
    pub recurrence_id: String,
    pub series_uid: Option<SeriesUid>,
    pub component_type: ComponentType,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ProjectEventLink {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A link about to be inserted; the repository assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProjectEventLink {
    pub project: ProjectId,
    pub calendar_id: String,
    pub event_uri: String,
    pub event_uid: String,
    pub sequence: i64,
    pub recurrence_id: String,
    pub series_uid: Option<SeriesUid>,
    pub component_type: ComponentType,
}

/// Storage seam for project/event links.
///
/// Every read takes an explicit `include_deleted` flag instead of a stateful
/// soft-delete filter. Implementations provide per-row atomicity; the engines
/// order their calls so a caller-side transaction can flush once per pass.
pub trait LinkRepository {
    fn links_for_uids(
        &self,
        uids: &[String],
        include_deleted: bool,
    ) -> CalinkResult<Vec<ProjectEventLink>>;

    fn links_for_project(
        &self,
        project: ProjectId,
        include_deleted: bool,
    ) -> CalinkResult<Vec<ProjectEventLink>>;

    fn links_for_series(
        &self,
        series: SeriesUid,
        include_deleted: bool,
    ) -> CalinkResult<Vec<ProjectEventLink>>;

    fn all_links(&self, include_deleted: bool) -> CalinkResult<Vec<ProjectEventLink>>;

    fn insert(&mut self, link: NewProjectEventLink) -> CalinkResult<ProjectEventLink>;

    fn update(&mut self, link: &ProjectEventLink) -> CalinkResult<()>;

    fn soft_delete(&mut self, id: LinkId, when: DateTime<Utc>) -> CalinkResult<()>;
}

/// In-memory repository used by tests and embedders without a database.
#[derive(Debug, Default)]
pub struct MemoryLinkRepository {
    rows: Vec<ProjectEventLink>,
    next_id: i64,
}

impl MemoryLinkRepository {
    pub fn new() -> MemoryLinkRepository {
        MemoryLinkRepository::default()
    }

    fn filtered<F>(&self, include_deleted: bool, predicate: F) -> Vec<ProjectEventLink>
    where
        F: Fn(&ProjectEventLink) -> bool,
    {
        self.rows
            .iter()
            .filter(|link| include_deleted || !link.is_deleted())
            .filter(|link| predicate(link))
            .cloned()
            .collect()
    }
}

impl LinkRepository for MemoryLinkRepository {
    fn links_for_uids(
        &self,
        uids: &[String],
        include_deleted: bool,
    ) -> CalinkResult<Vec<ProjectEventLink>> {
        Ok(self.filtered(include_deleted, |link| uids.contains(&link.event_uid)))
    }

    fn links_for_project(
        &self,
        project: ProjectId,
        include_deleted: bool,
    ) -> CalinkResult<Vec<ProjectEventLink>> {
        Ok(self.filtered(include_deleted, |link| link.project == project))
    }

    fn links_for_series(
        &self,
        series: SeriesUid,
        include_deleted: bool,
    ) -> CalinkResult<Vec<ProjectEventLink>> {
        Ok(self.filtered(include_deleted, |link| link.series_uid == Some(series)))
    }

    fn all_links(&self, include_deleted: bool) -> CalinkResult<Vec<ProjectEventLink>> {
        Ok(self.filtered(include_deleted, |_| true))
    }

    fn insert(&mut self, link: NewProjectEventLink) -> CalinkResult<ProjectEventLink> {
        self.next_id += 1;
        let row = ProjectEventLink {
            id: LinkId(self.next_id),
            project: link.project,
            calendar_id: link.calendar_id,
            event_uri: link.event_uri,
            event_uid: link.event_uid,
            sequence: link.sequence,
            recurrence_id: link.recurrence_id,
            series_uid: link.series_uid,
            component_type: link.component_type,
            deleted_at: None,
        };
        self.rows.push(row.clone());
        Ok(row)
    }

    fn update(&mut self, link: &ProjectEventLink) -> CalinkResult<()> {
        let row = self
            .rows
            .iter_mut()
            .find(|row| row.id == link.id)
            .ok_or_else(|| CalinkError::Repository(format!("unknown link id {}", link.id.0)))?;
        *row = link.clone();
        Ok(())
    }

    fn soft_delete(&mut self, id: LinkId, when: DateTime<Utc>) -> CalinkResult<()> {
        let row = self
            .rows
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or_else(|| CalinkError::Repository(format!("unknown link id {}", id.0)))?;
        row.deleted_at = Some(when);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_link(project: i64, uid: &str, recurrence_id: &str) -> NewProjectEventLink {
        NewProjectEventLink {
            project: ProjectId(project),
            calendar_id: "cal-1".to_string(),
            event_uri: format!("{}.ics", uid),
            event_uid: uid.to_string(),
            sequence: 0,
            recurrence_id: recurrence_id.to_string(),
            series_uid: None,
            component_type: ComponentType::Event,
        }
    }

    #[test]
    fn test_soft_delete_respects_include_deleted_flag() {
        let mut repo = MemoryLinkRepository::new();
        let link = repo.insert(new_link(1, "E1", "")).unwrap();
        repo.insert(new_link(1, "E1", "20240108T100000Z")).unwrap();

        repo.soft_delete(link.id, Utc::now()).unwrap();

        let uids = vec!["E1".to_string()];
        assert_eq!(repo.links_for_uids(&uids, false).unwrap().len(), 1);
        assert_eq!(repo.links_for_uids(&uids, true).unwrap().len(), 2);
    }

    #[test]
    fn test_update_clears_soft_delete_marker() {
        let mut repo = MemoryLinkRepository::new();
        let mut link = repo.insert(new_link(1, "E1", "")).unwrap();
        repo.soft_delete(link.id, Utc::now()).unwrap();

        link.deleted_at = None;
        link.sequence = 3;
        repo.update(&link).unwrap();

        let rows = repo.links_for_project(ProjectId(1), false).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sequence, 3);
    }

    #[test]
    fn test_links_for_series_groups_split_series() {
        let mut repo = MemoryLinkRepository::new();
        let series = SeriesUid::mint();

        let mut a = new_link(1, "E1", "");
        a.series_uid = Some(series);
        let mut b = new_link(1, "E1-split", "");
        b.series_uid = Some(series);
        repo.insert(a).unwrap();
        repo.insert(b).unwrap();
        repo.insert(new_link(1, "E2", "")).unwrap();

        let grouped = repo.links_for_series(series, false).unwrap();
        assert_eq!(grouped.len(), 2);
    }
}
