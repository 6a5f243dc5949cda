//! UID equivalence classes for split recurring series.
//!
//! When a client edits "this and future" instances, the backend splits one
//! logical series into multiple objects linked via RELATED-TO. Membership
//! queries must span the whole class, so the chains are resolved once per
//! pass via union-find instead of being re-scanned at every lookup.

use std::collections::HashMap;

use crate::error::CalinkResult;
use crate::event::CalendarObject;
use crate::links::LinkRepository;

/// Union-find over event UIDs.
#[derive(Debug, Default)]
pub struct UidUnionFind {
    parent: HashMap<String, String>,
}

impl UidUnionFind {
    pub fn new() -> UidUnionFind {
        UidUnionFind::default()
    }

    fn root(&mut self, uid: &str) -> String {
        if !self.parent.contains_key(uid) {
            self.parent.insert(uid.to_string(), uid.to_string());
            return uid.to_string();
        }
        let mut current = uid.to_string();
        loop {
            let parent = self.parent[&current].clone();
            if parent == current {
                break;
            }
            // Path halving
            let grandparent = self.parent[&parent].clone();
            self.parent.insert(current.clone(), grandparent);
            current = parent;
        }
        current
    }

    pub fn union(&mut self, a: &str, b: &str) {
        let root_a = self.root(a);
        let root_b = self.root(b);
        if root_a != root_b {
            self.parent.insert(root_b, root_a);
        }
    }

    /// All known UIDs in the same class as `uid`, sorted.
    pub fn class_of(&mut self, uid: &str) -> Vec<String> {
        let target = self.root(uid);
        let members: Vec<String> = self.parent.keys().cloned().collect();
        let mut class: Vec<String> = members
            .into_iter()
            .filter(|member| self.root(member) == target)
            .collect();
        class.sort();
        class
    }
}

/// Resolve the UID equivalence class of a calendar object.
///
/// Seeds the class with the object's own UIDs and its RELATED-TO targets,
/// then widens it through the link table: any series_uid found on a class
/// link pulls in the UIDs of its sibling links, since the series_uid was
/// propagated across the split.
pub fn resolve_uid_class(
    object: &CalendarObject,
    links: &dyn LinkRepository,
) -> CalinkResult<Vec<String>> {
    let mut uf = UidUnionFind::new();

    let anchor = match object.uid() {
        Some(uid) => uid.to_string(),
        None => return Ok(Vec::new()),
    };

    for component in &object.components {
        uf.union(&anchor, &component.uid);
        for related in &component.related_uids {
            uf.union(&component.uid, related);
        }
    }

    let seed = uf.class_of(&anchor);
    let seed_links = links.links_for_uids(&seed, true)?;

    let mut series_uids: Vec<_> = seed_links.iter().filter_map(|l| l.series_uid).collect();
    series_uids.sort();
    series_uids.dedup();

    for series in series_uids {
        for link in links.links_for_series(series, true)? {
            uf.union(&anchor, &link.event_uid);
        }
    }

    Ok(uf.class_of(&anchor))
}
