//! Project membership derivation from category labels.

use std::collections::BTreeSet;

use crate::event::CalendarInstance;
use crate::project::{Project, ProjectId};

/// Projects whose name appears in the instance's own category list.
///
/// Matching is exact and case-sensitive; a renamed project must have its new
/// name propagated into category lists by the rename operation, never
/// normalized here.
pub fn resolve(instance: &CalendarInstance, known_projects: &[Project]) -> BTreeSet<ProjectId> {
    known_projects
        .iter()
        .filter(|project| instance.has_category(&project.name))
        .map(|project| project.id)
        .collect()
}
