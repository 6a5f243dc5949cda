//! Calendar object generation.

use crate::error::CalinkResult;
use crate::event::{CalendarObject, Classification, ComponentType, EventComponent, EventTime};
use icalendar::{Calendar, Component, Property, ValueType};

/// Generate ICS content for a calendar object (master + exception components).
pub fn generate_object(object: &CalendarObject) -> CalinkResult<String> {
    let mut cal = Calendar::new();

    for component in &object.components {
        match component.component_type {
            ComponentType::Event => {
                let mut event = icalendar::Event::new();
                fill_component(&mut event, component);
                cal.push(event.done());
            }
            ComponentType::Todo => {
                let mut todo = icalendar::Todo::new();
                fill_component(&mut todo, component);
                cal.push(todo.done());
            }
        }
    }

    let cal = cal.done();

    // Post-process to remove unnecessary bloat from the icalendar crate's output
    Ok(strip_ics_bloat(&cal.to_string()))
}

fn fill_component<C: Component>(ics: &mut C, component: &EventComponent) {
    ics.uid(&component.uid);
    ics.summary(&component.summary);

    // DTSTAMP - required by RFC 5545, use stored timestamp or current time
    let dtstamp = component
        .dtstamp
        .unwrap_or_else(chrono::Utc::now)
        .format("%Y%m%dT%H%M%SZ")
        .to_string();
    ics.add_property("DTSTAMP", dtstamp);

    // LAST-MODIFIED
    if let Some(updated) = component.updated {
        let last_modified = updated.format("%Y%m%dT%H%M%SZ").to_string();
        ics.add_property("LAST-MODIFIED", last_modified);
    }

    // SEQUENCE - always emitted, sync relies on it as a version counter
    ics.add_property("SEQUENCE", component.sequence.to_string());

    if let Some(ref start) = component.start {
        add_datetime_property(ics, "DTSTART", start);
    }
    if let Some(ref end) = component.end {
        add_datetime_property(ics, "DTEND", end);
    }

    // CLASS - only emit if not PUBLIC (the implied default)
    if component.classification != Classification::Public {
        ics.add_property("CLASS", component.classification.as_ics_str());
    }

    if !component.categories.is_empty() {
        ics.add_property("CATEGORIES", component.categories.join(","));
    }

    // Recurrence rules (for master components)
    if let Some(ref recurrence) = component.recurrence {
        ics.add_property("RRULE", &recurrence.rrule);
        for exdate in &recurrence.exdates {
            add_exdate_property(ics, exdate);
        }
    }

    // RECURRENCE-ID (for exception components)
    if let Some(ref recurrence_id) = component.recurrence_id {
        add_datetime_property(ics, "RECURRENCE-ID", recurrence_id);
    }

    // RELATED-TO (multi-property - links split series across UIDs)
    for related in &component.related_uids {
        ics.append_multi_property(Property::new("RELATED-TO", related));
    }
}

/// Clean up ICS output from the icalendar crate
/// - Replace PRODID with CALINK (we post-process the output)
/// - Remove CALSCALE:GREGORIAN (it's the default)
fn strip_ics_bloat(ics: &str) -> String {
    let mut result = String::with_capacity(ics.len());

    for line in ics.lines() {
        if line.starts_with("PRODID:") {
            result.push_str("PRODID:CALINK\r\n");
            continue;
        }
        if line == "CALSCALE:GREGORIAN" {
            continue;
        }
        result.push_str(line);
        result.push_str("\r\n");
    }

    result
}

/// Add a datetime property with proper formatting based on EventTime variant
fn add_datetime_property<C: Component>(ics: &mut C, name: &str, time: &EventTime) {
    match time {
        EventTime::Date(d) => {
            let mut prop = Property::new(name, d.format("%Y%m%d").to_string());
            prop.append_parameter(ValueType::Date);
            ics.append_property(prop);
        }
        EventTime::DateTimeUtc(dt) => {
            // UTC datetime with Z suffix
            ics.add_property(name, dt.format("%Y%m%dT%H%M%SZ").to_string());
        }
        EventTime::DateTimeFloating(dt) => {
            // Floating datetime (no Z, no TZID)
            ics.add_property(name, dt.format("%Y%m%dT%H%M%S").to_string());
        }
        EventTime::DateTimeZoned { datetime, tzid } => {
            let mut prop = Property::new(name, datetime.format("%Y%m%dT%H%M%S").to_string());
            prop.add_parameter("TZID", tzid);
            ics.append_property(prop);
        }
    }
}

/// Add an EXDATE property for a single exception date, preserving the
/// DATE vs DATE-TIME value-type distinction.
fn add_exdate_property<C: Component>(ics: &mut C, time: &EventTime) {
    match time {
        EventTime::Date(d) => {
            let mut prop = Property::new("EXDATE", d.format("%Y%m%d").to_string());
            prop.append_parameter(ValueType::Date);
            ics.append_multi_property(prop);
        }
        EventTime::DateTimeUtc(dt) => {
            let prop = Property::new("EXDATE", dt.format("%Y%m%dT%H%M%SZ").to_string());
            ics.append_multi_property(prop);
        }
        EventTime::DateTimeFloating(dt) => {
            let prop = Property::new("EXDATE", dt.format("%Y%m%dT%H%M%S").to_string());
            ics.append_multi_property(prop);
        }
        EventTime::DateTimeZoned { datetime, tzid } => {
            let mut prop = Property::new("EXDATE", datetime.format("%Y%m%dT%H%M%S").to_string());
            prop.add_parameter("TZID", tzid);
            ics.append_multi_property(prop);
        }
    }
}
