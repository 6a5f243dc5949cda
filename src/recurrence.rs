//! Sibling expansion for calendar objects.
//!
//! Expands a master component plus its exception components into the full
//! set of concrete instances, keyed by recurrence-id. The master instance
//! uses the empty-string sentinel key; every other occurrence is keyed by
//! the ICS string of its original start time.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rrule::RRuleSet;

use crate::error::{CalinkError, CalinkResult};
use crate::event::{
    CalendarInstance, CalendarObject, EventComponent, EventTime, MASTER_RECURRENCE_ID, Recurrence,
};

/// Cap on expanded occurrences per series. Expansion past this point yields
/// a truncated prefix instead of failing the whole pass.
pub const MAX_INSTANCES: u16 = 730;

/// How an expansion terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionOutcome {
    /// Every occurrence of the series was produced.
    Complete,
    /// The rule yields no occurrences at all.
    Empty,
    /// The series exceeded [`MAX_INSTANCES`]; only a prefix was produced.
    Truncated,
}

/// Result of expanding one calendar object.
#[derive(Debug, Clone)]
pub struct Expansion {
    /// recurrence-id → instance, master first ("" sorts before any date key).
    pub instances: BTreeMap<String, CalendarInstance>,
    pub outcome: ExpansionOutcome,
}

/// Expand a calendar object into its concrete instances.
///
/// Non-recurring objects produce a single master instance. Recurring objects
/// produce one instance per occurrence; explicit exception components replace
/// the generated instance at their recurrence-id (they may carry different
/// categories or a moved start time). Objects without a master component
/// (split-series tails) produce their exception instances only.
pub fn expand_object(calendar_id: &str, object: &CalendarObject) -> CalinkResult<Expansion> {
    let mut instances = BTreeMap::new();
    let mut outcome = ExpansionOutcome::Complete;

    if let Some(master) = object.master() {
        match &master.recurrence {
            None => {
                instances.insert(
                    MASTER_RECURRENCE_ID.to_string(),
                    master_instance(calendar_id, master),
                );
            }
            Some(recurrence) => {
                let start = master.start.clone().ok_or_else(|| {
                    CalinkError::IcsParse(format!(
                        "recurring component '{}' without DTSTART",
                        master.uid
                    ))
                })?;

                let rrule_str = build_rrule_string(&start, recurrence);
                let rrule_set: RRuleSet = rrule_str.parse().map_err(|e| {
                    CalinkError::Recurrence(format!(
                        "failed to parse RRULE for event '{}': {}",
                        master.uid, e
                    ))
                })?;

                let result = rrule_set.all(MAX_INSTANCES);
                if result.limited {
                    outcome = ExpansionOutcome::Truncated;
                }

                for (i, occ_dt) in result.dates.iter().enumerate() {
                    let occ_time = occurrence_to_event_time(occ_dt, &start);
                    let key = if i == 0 && occ_time == start {
                        MASTER_RECURRENCE_ID.to_string()
                    } else {
                        occ_time.to_ics_string()
                    };
                    instances.insert(
                        key.clone(),
                        occurrence_instance(calendar_id, master, occ_time, key),
                    );
                }
            }
        }
    }

    // Explicit exceptions replace their generated occurrence, and stand on
    // their own when the occurrence was not generated (moved instances,
    // split-series tails).
    let master_start_key = object
        .master()
        .and_then(|m| m.start.as_ref())
        .map(|s| s.to_ics_string());
    for exception in object.exceptions() {
        let Some(rid_time) = exception.recurrence_id.clone() else {
            continue;
        };
        let rid_string = rid_time.to_ics_string();
        let key = if master_start_key.as_deref() == Some(rid_string.as_str())
            && instances.contains_key(MASTER_RECURRENCE_ID)
        {
            // Exception overriding the first occurrence shadows the master slot
            MASTER_RECURRENCE_ID.to_string()
        } else {
            rid_string
        };
        instances.insert(
            key.clone(),
            exception_instance(calendar_id, exception, rid_time, key),
        );
    }

    if instances.is_empty() {
        outcome = ExpansionOutcome::Empty;
    }

    Ok(Expansion { instances, outcome })
}

fn master_instance(calendar_id: &str, master: &EventComponent) -> CalendarInstance {
    let start = master
        .start
        .clone()
        .unwrap_or_else(|| EventTime::DateTimeUtc(Utc::now()));
    CalendarInstance {
        calendar_id: calendar_id.to_string(),
        event_uid: master.uid.clone(),
        sequence: master.sequence,
        recurrence_id: MASTER_RECURRENCE_ID.to_string(),
        occurrence: start.clone(),
        start,
        end: master.end.clone(),
        summary: master.summary.clone(),
        categories: master.categories.clone(),
        classification: master.classification,
        related_uids: master.related_uids.clone(),
        component_type: master.component_type,
        is_exception: false,
    }
}

fn occurrence_instance(
    calendar_id: &str,
    master: &EventComponent,
    occ_time: EventTime,
    key: String,
) -> CalendarInstance {
    let end = occurrence_end(master, &occ_time);
    CalendarInstance {
        calendar_id: calendar_id.to_string(),
        event_uid: master.uid.clone(),
        sequence: master.sequence,
        recurrence_id: key,
        occurrence: occ_time.clone(),
        start: occ_time,
        end,
        summary: master.summary.clone(),
        categories: master.categories.clone(),
        classification: master.classification,
        related_uids: master.related_uids.clone(),
        component_type: master.component_type,
        is_exception: false,
    }
}

fn exception_instance(
    calendar_id: &str,
    exception: &EventComponent,
    rid_time: EventTime,
    key: String,
) -> CalendarInstance {
    CalendarInstance {
        calendar_id: calendar_id.to_string(),
        event_uid: exception.uid.clone(),
        sequence: exception.sequence,
        recurrence_id: key,
        occurrence: rid_time.clone(),
        start: exception.start.clone().unwrap_or(rid_time),
        end: exception.end.clone(),
        summary: exception.summary.clone(),
        categories: exception.categories.clone(),
        classification: exception.classification,
        related_uids: exception.related_uids.clone(),
        component_type: exception.component_type,
        is_exception: true,
    }
}

/// Instance end time preserving the master's EventTime variant.
fn occurrence_end(master: &EventComponent, occ_time: &EventTime) -> Option<EventTime> {
    let (start, end) = match (&master.start, &master.end) {
        (Some(s), Some(e)) => (s, e),
        _ => return None,
    };

    Some(match (start, end, occ_time) {
        (EventTime::Date(d_start), EventTime::Date(d_end), EventTime::Date(occ)) => {
            let day_diff = (*d_end - *d_start).num_days();
            EventTime::Date(*occ + Duration::days(day_diff))
        }
        _ => {
            let duration = match (start.to_utc(), end.to_utc()) {
                (Some(s), Some(e)) => e - s,
                _ => Duration::zero(),
            };
            match occ_time {
                EventTime::Date(d) => EventTime::Date(*d),
                EventTime::DateTimeUtc(dt) => EventTime::DateTimeUtc(*dt + duration),
                EventTime::DateTimeFloating(dt) => EventTime::DateTimeFloating(*dt + duration),
                EventTime::DateTimeZoned { datetime, tzid } => EventTime::DateTimeZoned {
                    datetime: *datetime + duration,
                    tzid: tzid.clone(),
                },
            }
        }
    })
}

/// Build an iCalendar-format RRULE string for the rrule crate parser.
fn build_rrule_string(start: &EventTime, recurrence: &Recurrence) -> String {
    let mut lines = Vec::new();

    // DTSTART - the rrule crate needs a datetime, so all-day dates become midnight UTC
    let dtstart = match start {
        EventTime::Date(d) => format!("DTSTART:{}T000000Z", d.format("%Y%m%d")),
        EventTime::DateTimeUtc(dt) => format!("DTSTART:{}", dt.format("%Y%m%dT%H%M%SZ")),
        EventTime::DateTimeFloating(dt) => format!("DTSTART:{}Z", dt.format("%Y%m%dT%H%M%S")),
        EventTime::DateTimeZoned { datetime, tzid } => {
            format!("DTSTART;TZID={}:{}", tzid, datetime.format("%Y%m%dT%H%M%S"))
        }
    };
    lines.push(dtstart);

    lines.push(format!("RRULE:{}", recurrence.rrule));

    for exdate in &recurrence.exdates {
        let exdate_str = match exdate {
            EventTime::Date(d) => format!("EXDATE:{}T000000Z", d.format("%Y%m%d")),
            EventTime::DateTimeUtc(dt) => format!("EXDATE:{}", dt.format("%Y%m%dT%H%M%SZ")),
            EventTime::DateTimeFloating(dt) => format!("EXDATE:{}Z", dt.format("%Y%m%dT%H%M%S")),
            EventTime::DateTimeZoned { datetime, tzid } => {
                format!("EXDATE;TZID={}:{}", tzid, datetime.format("%Y%m%dT%H%M%S"))
            }
        };
        lines.push(exdate_str);
    }

    lines.join("\n")
}

/// Convert an rrule occurrence datetime back to an EventTime matching the master's variant.
fn occurrence_to_event_time(dt: &DateTime<rrule::Tz>, master_start: &EventTime) -> EventTime {
    match master_start {
        EventTime::Date(_) => EventTime::Date(dt.date_naive()),
        EventTime::DateTimeUtc(_) => EventTime::DateTimeUtc(dt.with_timezone(&Utc)),
        EventTime::DateTimeFloating(_) => EventTime::DateTimeFloating(dt.naive_utc()),
        EventTime::DateTimeZoned { tzid, .. } => EventTime::DateTimeZoned {
            datetime: dt.naive_local(),
            tzid: tzid.clone(),
        },
    }
}
