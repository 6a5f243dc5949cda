//! Calendar value types.
//!
//! A raw calendar object parses into a [`CalendarObject`]: one master
//! component plus zero or more exception components that override single
//! occurrences. Concrete occurrences are represented by [`CalendarInstance`]
//! values produced by the recurrence expander; instances are immutable
//! snapshots and are never persisted.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Recurrence-id of the master (or only) instance of an event.
pub const MASTER_RECURRENCE_ID: &str = "";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventTime {
    Date(NaiveDate),
    DateTimeUtc(DateTime<Utc>),
    DateTimeFloating(NaiveDateTime),
    DateTimeZoned { datetime: NaiveDateTime, tzid: String },
}

impl EventTime {
    /// ICS value string, also used as the recurrence-id key for siblings.
    pub fn to_ics_string(&self) -> String {
        match self {
            EventTime::Date(d) => d.format("%Y%m%d").to_string(),
            EventTime::DateTimeUtc(dt) => dt.format("%Y%m%dT%H%M%SZ").to_string(),
            EventTime::DateTimeFloating(dt) => dt.format("%Y%m%dT%H%M%S").to_string(),
            EventTime::DateTimeZoned { datetime, .. } => {
                datetime.format("%Y%m%dT%H%M%S").to_string()
            }
        }
    }

    /// Whether this is a date-only (whole-day) value.
    pub fn is_date(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }

    /// Best-effort UTC conversion, used for ordering read-path results.
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            EventTime::Date(d) => d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()),
            EventTime::DateTimeUtc(dt) => Some(*dt),
            EventTime::DateTimeFloating(dt) => Some(dt.and_utc()),
            EventTime::DateTimeZoned { datetime, tzid } => tzid
                .parse::<chrono_tz::Tz>()
                .ok()
                .and_then(|tz| tz.from_local_datetime(datetime).single())
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

impl std::fmt::Display for EventTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_ics_string())
    }
}

/// CLASS property of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Public,
    Private,
    Confidential,
}

impl Classification {
    pub fn from_ics_str(value: &str) -> Classification {
        match value {
            "PRIVATE" => Classification::Private,
            "CONFIDENTIAL" => Classification::Confidential,
            _ => Classification::Public,
        }
    }

    pub fn as_ics_str(&self) -> &'static str {
        match self {
            Classification::Public => "PUBLIC",
            Classification::Private => "PRIVATE",
            Classification::Confidential => "CONFIDENTIAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComponentType {
    Event,
    Todo,
}

impl ComponentType {
    pub fn as_ics_str(&self) -> &'static str {
        match self {
            ComponentType::Event => "VEVENT",
            ComponentType::Todo => "VTODO",
        }
    }
}

/// Recurrence rule plus exception dates for a master component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recurrence {
    /// RRULE value, e.g. `FREQ=WEEKLY;COUNT=3`
    pub rrule: String,
    pub exdates: Vec<EventTime>,
}

/// One VEVENT/VTODO component of a calendar object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventComponent {
    pub uid: String,
    pub summary: String,
    pub component_type: ComponentType,
    /// Free-text category labels, order preserved.
    pub categories: Vec<String>,
    pub classification: Classification,
    /// SEQUENCE, bumped on structural edits.
    pub sequence: i64,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    /// RRULE + EXDATEs for master components.
    pub recurrence: Option<Recurrence>,
    /// RECURRENCE-ID for exception components.
    pub recurrence_id: Option<EventTime>,
    /// UIDs this component is linked to via RELATED-TO.
    pub related_uids: Vec<String>,
    /// LAST-MODIFIED
    pub updated: Option<DateTime<Utc>>,
    /// DTSTAMP
    pub dtstamp: Option<DateTime<Utc>>,
}

impl EventComponent {
    pub fn is_master(&self) -> bool {
        self.recurrence_id.is_none()
    }

    pub fn has_category(&self, name: &str) -> bool {
        self.categories.iter().any(|c| c == name)
    }

    /// Remove a category label; returns whether it was present.
    pub fn remove_category(&mut self, name: &str) -> bool {
        let before = self.categories.len();
        self.categories.retain(|c| c != name);
        self.categories.len() != before
    }

    /// Refresh LAST-MODIFIED and DTSTAMP after a mutation.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated = Some(now);
        self.dtstamp = Some(now);
    }
}

/// A parsed calendar object: a master component plus exception components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarObject {
    pub components: Vec<EventComponent>,
}

impl CalendarObject {
    /// The master component (no RECURRENCE-ID). Split-series tail objects
    /// can consist of exception components only.
    pub fn master(&self) -> Option<&EventComponent> {
        self.components.iter().find(|c| c.is_master())
    }

    pub fn master_mut(&mut self) -> Option<&mut EventComponent> {
        self.components.iter_mut().find(|c| c.is_master())
    }

    pub fn exceptions(&self) -> impl Iterator<Item = &EventComponent> {
        self.components.iter().filter(|c| !c.is_master())
    }

    /// Exception component whose RECURRENCE-ID matches the given key.
    pub fn exception_for(&self, recurrence_id: &str) -> Option<&EventComponent> {
        self.exceptions().find(|c| {
            c.recurrence_id
                .as_ref()
                .is_some_and(|rid| rid.to_ics_string() == recurrence_id)
        })
    }

    /// UID of the object (the master's, or the first component's).
    pub fn uid(&self) -> Option<&str> {
        self.master()
            .or_else(|| self.components.first())
            .map(|c| c.uid.as_str())
    }

    /// All UIDs appearing in this object's components.
    pub fn uids(&self) -> Vec<String> {
        let mut uids: Vec<String> = self.components.iter().map(|c| c.uid.clone()).collect();
        uids.dedup();
        uids
    }

    /// Union of RELATED-TO targets across all components.
    pub fn related_uids(&self) -> Vec<String> {
        let mut related: Vec<String> = self
            .components
            .iter()
            .flat_map(|c| c.related_uids.iter().cloned())
            .collect();
        related.sort();
        related.dedup();
        related
    }

    /// Whether any component is marked PRIVATE or CONFIDENTIAL.
    pub fn has_private_instance(&self) -> bool {
        self.components
            .iter()
            .any(|c| c.classification != Classification::Public)
    }

    /// Force CLASS:PUBLIC on every component and refresh their timestamps.
    pub fn force_public(&mut self, now: DateTime<Utc>) {
        for component in &mut self.components {
            component.classification = Classification::Public;
            component.touch(now);
        }
    }

    /// Remove a category label from every component; returns whether any
    /// component changed. Changed components get their timestamps refreshed.
    pub fn strip_category(&mut self, name: &str, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        for component in &mut self.components {
            if component.remove_category(name) {
                component.touch(now);
                changed = true;
            }
        }
        changed
    }

    /// Insert an exception component, replacing any existing one with the
    /// same RECURRENCE-ID.
    pub fn upsert_exception(&mut self, component: EventComponent) {
        if let Some(rid) = component.recurrence_id.as_ref().map(|r| r.to_ics_string()) {
            self.remove_exception(&rid);
        }
        self.components.push(component);
    }

    /// Remove the exception component for a recurrence-id; returns whether
    /// one was present.
    pub fn remove_exception(&mut self, recurrence_id: &str) -> bool {
        let before = self.components.len();
        self.components.retain(|c| {
            c.is_master()
                || c.recurrence_id
                    .as_ref()
                    .is_none_or(|rid| rid.to_ics_string() != recurrence_id)
        });
        self.components.len() != before
    }
}

/// One concrete occurrence of a (possibly recurring) event.
///
/// Derived on demand by the recurrence expander, never persisted. Invalidated
/// whenever the backing object's SEQUENCE changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarInstance {
    pub calendar_id: String,
    pub event_uid: String,
    pub sequence: i64,
    /// ICS string of the original occurrence time, or
    /// [`MASTER_RECURRENCE_ID`] for the master instance.
    pub recurrence_id: String,
    /// Original occurrence time. Equals `start` unless the instance was
    /// moved by an exception component.
    pub occurrence: EventTime,
    pub start: EventTime,
    pub end: Option<EventTime>,
    pub summary: String,
    pub categories: Vec<String>,
    pub classification: Classification,
    pub related_uids: Vec<String>,
    pub component_type: ComponentType,
    /// Whether this instance is backed by an explicit exception component.
    pub is_exception: bool,
}

impl CalendarInstance {
    pub fn is_master(&self) -> bool {
        self.recurrence_id == MASTER_RECURRENCE_ID
    }

    pub fn has_category(&self, name: &str) -> bool {
        self.categories.iter().any(|c| c == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_time_ics_strings() {
        let date = EventTime::Date(NaiveDate::from_ymd_opt(2024, 1, 8).unwrap());
        assert_eq!(date.to_ics_string(), "20240108");

        let utc = EventTime::DateTimeUtc(Utc.with_ymd_and_hms(2024, 1, 8, 10, 0, 0).unwrap());
        assert_eq!(utc.to_ics_string(), "20240108T100000Z");

        let zoned = EventTime::DateTimeZoned {
            datetime: NaiveDate::from_ymd_opt(2024, 1, 8)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            tzid: "America/New_York".to_string(),
        };
        assert_eq!(zoned.to_ics_string(), "20240108T100000");
    }

    #[test]
    fn test_strip_category_touches_only_changed_components() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut object = CalendarObject {
            components: vec![
                component_with_categories(vec!["Spring2024".to_string(), "Tour".to_string()]),
                component_with_categories(vec!["Tour".to_string()]),
            ],
        };

        assert!(object.strip_category("Spring2024", now));

        assert_eq!(object.components[0].categories, vec!["Tour".to_string()]);
        assert_eq!(object.components[0].updated, Some(now));
        assert_eq!(object.components[1].updated, None, "untouched component");
    }

    #[test]
    fn test_upsert_exception_replaces_same_recurrence_id() {
        let rid = EventTime::DateTimeUtc(Utc.with_ymd_and_hms(2024, 1, 8, 10, 0, 0).unwrap());
        let mut exception = component_with_categories(vec![]);
        exception.recurrence_id = Some(rid.clone());

        let mut object = CalendarObject {
            components: vec![component_with_categories(vec![])],
        };
        object.upsert_exception(exception.clone());
        exception.summary = "Replaced".to_string();
        object.upsert_exception(exception);

        assert_eq!(object.components.len(), 2);
        assert_eq!(object.exceptions().count(), 1);
        assert_eq!(
            object.exception_for("20240108T100000Z").unwrap().summary,
            "Replaced"
        );
    }

    fn component_with_categories(categories: Vec<String>) -> EventComponent {
        EventComponent {
            uid: "E1".to_string(),
            summary: "Rehearsal".to_string(),
            component_type: ComponentType::Event,
            categories,
            classification: Classification::Public,
            sequence: 0,
            start: Some(EventTime::DateTimeUtc(
                Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
            )),
            end: None,
            recurrence: None,
            recurrence_id: None,
            related_uids: vec![],
            updated: None,
            dtstamp: None,
        }
    }
}
