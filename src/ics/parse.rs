//! Calendar object parsing using the icalendar crate's parser.

use crate::error::{CalinkError, CalinkResult};
use crate::event::{
    CalendarObject, Classification, ComponentType, EventComponent, EventTime, Recurrence,
};
use icalendar::{
    DatePerhapsTime,
    parser::{Property, read_calendar, unfold},
};

/// Parse raw ICS content into a [`CalendarObject`].
///
/// All VEVENT/VTODO components are kept: the master plus any exception
/// components overriding single occurrences. Other component kinds (VALARM
/// lives nested, VTIMEZONE is display-only) are ignored.
pub fn parse_object(content: &str) -> CalinkResult<CalendarObject> {
    let unfolded = unfold(content);
    let calendar = read_calendar(&unfolded).map_err(CalinkError::IcsParse)?;

    let components: Vec<EventComponent> = calendar
        .components
        .iter()
        .filter(|c| c.name == "VEVENT" || c.name == "VTODO")
        .map(parse_component)
        .collect::<CalinkResult<_>>()?;

    if components.is_empty() {
        return Err(CalinkError::IcsParse(
            "calendar object contains no VEVENT or VTODO component".to_string(),
        ));
    }

    Ok(CalendarObject { components })
}

fn parse_component(component: &icalendar::parser::Component) -> CalinkResult<EventComponent> {
    let component_type = if component.name == "VTODO" {
        ComponentType::Todo
    } else {
        ComponentType::Event
    };

    let uid = component
        .find_prop("UID")
        .map(|p| p.val.to_string())
        .ok_or_else(|| CalinkError::IcsParse(format!("{} without UID", component.name)))?;

    let summary = component
        .find_prop("SUMMARY")
        .map(|p| p.val.to_string())
        .unwrap_or_else(|| "(No title)".to_string());

    let start = component
        .find_prop("DTSTART")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(to_event_time);
    let end = component
        .find_prop("DTEND")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(to_event_time);

    // CATEGORIES may appear as multiple properties and/or comma-separated values
    let categories: Vec<String> = component
        .properties
        .iter()
        .filter(|p| p.name == "CATEGORIES")
        .flat_map(|p| p.val.as_ref().split(','))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    let classification = component
        .find_prop("CLASS")
        .map(|p| Classification::from_ics_str(p.val.as_ref()))
        .unwrap_or(Classification::Public);

    let sequence = component
        .find_prop("SEQUENCE")
        .and_then(|p| p.val.as_ref().parse().ok())
        .unwrap_or(0);

    // Recurrence (RRULE, EXDATE)
    let rrule = component.find_prop("RRULE").map(|p| p.val.to_string());
    let exdates: Vec<EventTime> = component
        .properties
        .iter()
        .filter(|p| p.name == "EXDATE")
        .flat_map(parse_exdate_property)
        .collect();
    let recurrence = rrule.map(|rrule| Recurrence { rrule, exdates });

    // RECURRENCE-ID for exception components
    let recurrence_id = component
        .find_prop("RECURRENCE-ID")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(to_event_time);

    // RELATED-TO is a multi-property; used when a client splits a series
    let related_uids: Vec<String> = component
        .properties
        .iter()
        .filter(|p| p.name == "RELATED-TO")
        .map(|p| p.val.to_string())
        .collect();

    let updated = component
        .find_prop("LAST-MODIFIED")
        .and_then(|p| parse_utc_timestamp(p.val.as_ref()));
    let dtstamp = component
        .find_prop("DTSTAMP")
        .and_then(|p| parse_utc_timestamp(p.val.as_ref()));

    Ok(EventComponent {
        uid,
        summary,
        component_type,
        categories,
        classification,
        sequence,
        start,
        end,
        recurrence,
        recurrence_id,
        related_uids,
        updated,
        dtstamp,
    })
}

/// Convert icalendar's DatePerhapsTime to our EventTime, preserving timezone info
fn to_event_time(dpt: DatePerhapsTime) -> EventTime {
    match dpt {
        DatePerhapsTime::Date(d) => EventTime::Date(d),
        DatePerhapsTime::DateTime(cal_dt) => match cal_dt {
            icalendar::CalendarDateTime::Utc(dt) => EventTime::DateTimeUtc(dt),
            icalendar::CalendarDateTime::Floating(naive) => EventTime::DateTimeFloating(naive),
            icalendar::CalendarDateTime::WithTimezone { date_time, tzid } => {
                EventTime::DateTimeZoned {
                    datetime: date_time,
                    tzid,
                }
            }
        },
    }
}

/// Parse an EXDATE property into a list of EventTime values.
///
/// Handles:
/// - TZID parameter: `EXDATE;TZID=America/New_York:20240108T100000`
/// - VALUE=DATE: `EXDATE;VALUE=DATE:20240108`
/// - UTC: `EXDATE:20240108T100000Z`
/// - Floating: `EXDATE:20240108T100000`
/// - Comma-separated values: `EXDATE;TZID=...:20240108T100000,20240115T100000`
fn parse_exdate_property(prop: &Property) -> Vec<EventTime> {
    let tzid = prop
        .params
        .iter()
        .find(|p| p.key == "TZID")
        .and_then(|p| p.val.as_ref().map(|v| v.to_string()));

    let is_date = prop
        .params
        .iter()
        .any(|p| p.key == "VALUE" && p.val.as_ref().map(|v| v.as_ref()) == Some("DATE"));

    let val_str = prop.val.as_ref();
    val_str
        .split(',')
        .filter_map(|s| {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if is_date {
                chrono::NaiveDate::parse_from_str(s, "%Y%m%d")
                    .ok()
                    .map(EventTime::Date)
            } else if let Some(ref tz) = tzid {
                chrono::NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(|dt| EventTime::DateTimeZoned {
                        datetime: dt,
                        tzid: tz.clone(),
                    })
            } else if s.ends_with('Z') {
                let s = s.trim_end_matches('Z');
                chrono::NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(|dt| EventTime::DateTimeUtc(dt.and_utc()))
            } else {
                chrono::NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(EventTime::DateTimeFloating)
            }
        })
        .collect()
}

/// Parse a `20240101T100000Z` style timestamp (LAST-MODIFIED, DTSTAMP).
fn parse_utc_timestamp(value: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let trimmed = value.trim_end_matches('Z');
    chrono::NaiveDateTime::parse_from_str(trimmed, "%Y%m%dT%H%M%S")
        .ok()
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_master_and_exception() {
        let ics = r#"BEGIN:VCALENDAR
VERSION:2.0
PRODID:TEST
BEGIN:VEVENT
UID:E1
SUMMARY:Rehearsal
DTSTART:20240101T100000Z
DTEND:20240101T120000Z
SEQUENCE:2
RRULE:FREQ=WEEKLY;COUNT=3
CATEGORIES:Spring2024,Tour
END:VEVENT
BEGIN:VEVENT
UID:E1
SUMMARY:Rehearsal (moved)
DTSTART:20240115T140000Z
DTEND:20240115T160000Z
SEQUENCE:2
RECURRENCE-ID:20240115T100000Z
CATEGORIES:Tour
END:VEVENT
END:VCALENDAR"#;

        let object = parse_object(ics).expect("Should parse");
        assert_eq!(object.components.len(), 2);

        let master = object.master().expect("Should have master");
        assert_eq!(master.sequence, 2);
        assert_eq!(master.categories, vec!["Spring2024", "Tour"]);
        assert_eq!(master.recurrence.as_ref().unwrap().rrule, "FREQ=WEEKLY;COUNT=3");

        let exception = object
            .exception_for("20240115T100000Z")
            .expect("Should find exception by recurrence-id");
        assert_eq!(exception.categories, vec!["Tour"]);
        assert_eq!(
            exception.start,
            Some(EventTime::DateTimeUtc(
                chrono::NaiveDate::from_ymd_opt(2024, 1, 15)
                    .unwrap()
                    .and_hms_opt(14, 0, 0)
                    .unwrap()
                    .and_utc()
            ))
        );
    }

    #[test]
    fn test_parse_multiple_categories_properties() {
        let ics = r#"BEGIN:VCALENDAR
VERSION:2.0
PRODID:TEST
BEGIN:VEVENT
UID:E1
SUMMARY:Concert
DTSTART:20240101T100000Z
CATEGORIES:Spring2024
CATEGORIES:Tour, Gala
END:VEVENT
END:VCALENDAR"#;

        let object = parse_object(ics).expect("Should parse");
        assert_eq!(
            object.components[0].categories,
            vec!["Spring2024", "Tour", "Gala"]
        );
    }

    #[test]
    fn test_parse_class_and_related_to() {
        let ics = r#"BEGIN:VCALENDAR
VERSION:2.0
PRODID:TEST
BEGIN:VEVENT
UID:E2
SUMMARY:Board meeting
DTSTART:20240201T180000Z
CLASS:CONFIDENTIAL
RELATED-TO:E1
RELATED-TO:E3
END:VEVENT
END:VCALENDAR"#;

        let object = parse_object(ics).expect("Should parse");
        let component = &object.components[0];
        assert_eq!(component.classification, Classification::Confidential);
        assert_eq!(component.related_uids, vec!["E1", "E3"]);
        assert!(object.has_private_instance());
    }

    #[test]
    fn test_parse_exdate_value_date() {
        let ics = r#"BEGIN:VCALENDAR
VERSION:2.0
PRODID:TEST
BEGIN:VEVENT
UID:E1
SUMMARY:Festival day
DTSTART;VALUE=DATE:20240101
RRULE:FREQ=DAILY;COUNT=5
EXDATE;VALUE=DATE:20240103
END:VEVENT
END:VCALENDAR"#;

        let object = parse_object(ics).expect("Should parse");
        let recurrence = object.components[0].recurrence.as_ref().unwrap();
        assert_eq!(
            recurrence.exdates,
            vec![EventTime::Date(
                chrono::NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()
            )]
        );
        assert!(object.components[0].start.as_ref().unwrap().is_date());
    }

    #[test]
    fn test_parse_rejects_object_without_components() {
        let ics = "BEGIN:VCALENDAR\nVERSION:2.0\nPRODID:TEST\nEND:VCALENDAR";
        assert!(parse_object(ics).is_err());
    }
}
