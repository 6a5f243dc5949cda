//! Calendar backend seam.
//!
//! The transport (CalDAV, filesystem, provider process) lives behind
//! [`CalendarStore`]; the engines exchange raw ICS payloads with it and do
//! all parsing/generation themselves. [`MemoryCalendarStore`] backs tests.

use std::collections::HashMap;

use crate::error::{CalinkError, CalinkResult};

/// CRUD over raw calendar objects, addressed by `(calendar_id, uri)`.
pub trait CalendarStore {
    /// Fetch the stored object, or `None` if it does not exist.
    fn get_object(&self, calendar_id: &str, uri: &str) -> CalinkResult<Option<String>>;

    fn create_object(&mut self, calendar_id: &str, uri: &str, ics: &str) -> CalinkResult<()>;

    /// Overwrite an existing object. Fails if the object is missing.
    fn update_object(&mut self, calendar_id: &str, uri: &str, ics: &str) -> CalinkResult<()>;

    fn delete_object(&mut self, calendar_id: &str, uri: &str) -> CalinkResult<()>;
}

/// In-memory calendar store for tests and embedders.
#[derive(Debug, Default)]
pub struct MemoryCalendarStore {
    objects: HashMap<(String, String), String>,
    update_calls: usize,
}

impl MemoryCalendarStore {
    pub fn new() -> MemoryCalendarStore {
        MemoryCalendarStore::default()
    }

    /// Seed an object without going through `create_object`.
    pub fn seed(&mut self, calendar_id: &str, uri: &str, ics: &str) {
        self.objects
            .insert((calendar_id.to_string(), uri.to_string()), ics.to_string());
    }

    pub fn raw(&self, calendar_id: &str, uri: &str) -> Option<&String> {
        self.objects
            .get(&(calendar_id.to_string(), uri.to_string()))
    }

    pub fn contains(&self, calendar_id: &str, uri: &str) -> bool {
        self.raw(calendar_id, uri).is_some()
    }

    /// Number of `update_object` calls, used to assert single-rewrite passes.
    pub fn update_calls(&self) -> usize {
        self.update_calls
    }
}

impl CalendarStore for MemoryCalendarStore {
    fn get_object(&self, calendar_id: &str, uri: &str) -> CalinkResult<Option<String>> {
        Ok(self.raw(calendar_id, uri).cloned())
    }

    fn create_object(&mut self, calendar_id: &str, uri: &str, ics: &str) -> CalinkResult<()> {
        let key = (calendar_id.to_string(), uri.to_string());
        if self.objects.contains_key(&key) {
            return Err(CalinkError::Store(format!(
                "object already exists: {}/{}",
                calendar_id, uri
            )));
        }
        self.objects.insert(key, ics.to_string());
        Ok(())
    }

    fn update_object(&mut self, calendar_id: &str, uri: &str, ics: &str) -> CalinkResult<()> {
        let key = (calendar_id.to_string(), uri.to_string());
        if !self.objects.contains_key(&key) {
            return Err(CalinkError::ObjectNotFound(
                calendar_id.to_string(),
                uri.to_string(),
            ));
        }
        self.objects.insert(key, ics.to_string());
        self.update_calls += 1;
        Ok(())
    }

    fn delete_object(&mut self, calendar_id: &str, uri: &str) -> CalinkResult<()> {
        self.objects
            .remove(&(calendar_id.to_string(), uri.to_string()))
            .ok_or_else(|| {
                CalinkError::ObjectNotFound(calendar_id.to_string(), uri.to_string())
            })?;
        Ok(())
    }
}
