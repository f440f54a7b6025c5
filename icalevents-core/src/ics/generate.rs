//! ICS generation for exports.

use chrono::{Duration, Utc};
use icalendar::{Calendar, Component, EventLike, Property, ValueType};

use crate::event::{Event, EventTime};
use crate::occurrence::Occurrence;
use crate::timezone::TimeZoneResolver;

/// Product identifier written into every exported calendar.
pub const PRODID: &str = "-//DokuWiki//NONSGML Plugin iCalEvents//EN";

/// Wrap VEVENTs in a VCALENDAR envelope. Lines end with CRLF.
pub fn generate_calendar(vevents: Vec<icalendar::Event>) -> String {
    let mut cal = Calendar::new();
    for vevent in vevents {
        cal.push(vevent);
    }
    let cal = cal.done();

    strip_ics_bloat(&cal.to_string())
}

/// A master (or override) VEVENT, serialized with its authored values.
pub fn event_to_vevent(event: &Event) -> icalendar::Event {
    let mut ics_event = base_vevent(event);

    add_datetime_property(&mut ics_event, "DTSTART", &event.start);
    match (&event.end, event.duration) {
        (Some(end), _) => add_datetime_property(&mut ics_event, "DTEND", end),
        (None, Some(duration)) => {
            ics_event.add_property("DURATION", format_duration(duration));
        }
        (None, None) => {}
    }

    if let Some(ref recurrence) = event.recurrence {
        if let Some(ref rrule) = recurrence.rrule {
            ics_event.add_property("RRULE", rrule);
        }
        for rdate in &recurrence.rdates {
            add_multi_datetime_property(&mut ics_event, "RDATE", rdate);
        }
        for exdate in &recurrence.exdates {
            add_multi_datetime_property(&mut ics_event, "EXDATE", exdate);
        }
    }

    if let Some(ref recurrence_id) = event.recurrence_id {
        add_datetime_property(&mut ics_event, "RECURRENCE-ID", recurrence_id);
    }

    ics_event.done()
}

/// A single instance as a standalone VEVENT: times in UTC (or `VALUE=DATE`
/// for all-day), a RECURRENCE-ID and no recurrence rules.
pub fn occurrence_to_vevent(
    occurrence: &Occurrence<'_>,
    resolver: &TimeZoneResolver,
) -> icalendar::Event {
    let mut ics_event = base_vevent(occurrence.event);

    let (start, end) = if occurrence.all_day {
        let start = resolver.to_local(occurrence.start).date();
        let end = resolver.to_local(occurrence.end).date();
        (EventTime::Date(start), EventTime::Date(end))
    } else {
        (
            EventTime::DateTimeUtc(occurrence.start),
            EventTime::DateTimeUtc(occurrence.end),
        )
    };

    add_datetime_property(&mut ics_event, "DTSTART", &start);
    add_datetime_property(&mut ics_event, "DTEND", &end);

    // Overrides keep the RECURRENCE-ID they were authored with
    match (&occurrence.event.recurrence_id, &occurrence.recurrence_id) {
        (Some(authored), _) => add_datetime_property(&mut ics_event, "RECURRENCE-ID", authored),
        (None, Some(_)) => add_datetime_property(&mut ics_event, "RECURRENCE-ID", &start),
        (None, None) => {}
    }

    ics_event.done()
}

fn base_vevent(event: &Event) -> icalendar::Event {
    let mut ics_event = icalendar::Event::new();
    ics_event.uid(&event.uid);
    ics_event.add_property("DTSTAMP", Utc::now().format("%Y%m%dT%H%M%SZ").to_string());

    if !event.summary.is_empty() {
        ics_event.summary(&event.summary);
    }
    if let Some(ref desc) = event.description {
        ics_event.description(desc);
    }
    if let Some(ref loc) = event.location {
        ics_event.location(loc);
    }

    ics_event
}

/// Replace the crate's PRODID with ours and drop CALSCALE:GREGORIAN (the default).
fn strip_ics_bloat(ics: &str) -> String {
    let mut result = String::with_capacity(ics.len());

    for line in ics.lines() {
        if line.starts_with("PRODID:") {
            result.push_str("PRODID:");
            result.push_str(PRODID);
            result.push_str("\r\n");
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

fn add_datetime_property(ics_event: &mut icalendar::Event, name: &str, time: &EventTime) {
    ics_event.append_property(datetime_property(name, time));
}

fn add_multi_datetime_property(ics_event: &mut icalendar::Event, name: &str, time: &EventTime) {
    ics_event.append_multi_property(datetime_property(name, time));
}

fn datetime_property(name: &str, time: &EventTime) -> Property {
    match time {
        EventTime::Date(_) => {
            let mut prop = Property::new(name, time.to_ics_string());
            prop.append_parameter(ValueType::Date);
            prop
        }
        EventTime::DateTimeUtc(_) | EventTime::DateTimeFloating(_) => {
            Property::new(name, time.to_ics_string())
        }
        EventTime::DateTimeZoned { tzid, .. } => {
            let mut prop = Property::new(name, time.to_ics_string());
            prop.add_parameter("TZID", tzid);
            prop
        }
    }
}

fn format_duration(duration: Duration) -> String {
    let sign = if duration < Duration::zero() { "-" } else { "" };
    let seconds = duration.num_seconds().abs();
    if seconds % 86_400 == 0 && seconds > 0 {
        format!("{sign}P{}D", seconds / 86_400)
    } else {
        format!("{sign}PT{seconds}S")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Recurrence;
    use crate::ics::parse;
    use chrono::{NaiveDate, TimeZone};
    use chrono_tz::Tz;

    fn make_test_event() -> Event {
        Event {
            uid: "abc123".to_string(),
            summary: "Standup".to_string(),
            description: Some("Daily sync".to_string()),
            location: None,
            start: EventTime::DateTimeZoned {
                datetime: NaiveDate::from_ymd_opt(2024, 1, 1)
                    .unwrap()
                    .and_hms_opt(9, 0, 0)
                    .unwrap(),
                tzid: "Europe/Berlin".to_string(),
            },
            end: None,
            duration: Some(Duration::minutes(15)),
            recurrence: Some(Recurrence {
                rrule: Some("FREQ=DAILY;COUNT=5".to_string()),
                rdates: vec![],
                exdates: vec![EventTime::DateTimeZoned {
                    datetime: NaiveDate::from_ymd_opt(2024, 1, 3)
                        .unwrap()
                        .and_hms_opt(9, 0, 0)
                        .unwrap(),
                    tzid: "Europe/Berlin".to_string(),
                }],
            }),
            recurrence_id: None,
        }
    }

    #[test]
    fn test_envelope_uses_fixed_prodid() {
        let ics = generate_calendar(vec![event_to_vevent(&make_test_event())]);

        assert!(ics.starts_with("BEGIN:VCALENDAR\r\n"));
        assert!(ics.contains(&format!("PRODID:{PRODID}\r\n")));
        assert!(ics.contains("VERSION:2.0\r\n"));
        assert!(!ics.contains("CALSCALE"));
        assert!(ics.ends_with("END:VCALENDAR\r\n"));
        assert!(!ics.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn test_master_keeps_authored_values() {
        let ics = generate_calendar(vec![event_to_vevent(&make_test_event())]);

        assert!(ics.contains("UID:abc123"));
        assert!(ics.contains("DTSTART;TZID=Europe/Berlin:20240101T090000"));
        assert!(ics.contains("DURATION:PT900S"));
        assert!(ics.contains("RRULE:FREQ=DAILY;COUNT=5"));
        assert!(ics.contains("EXDATE;TZID=Europe/Berlin:20240103T090000"));
    }

    #[test]
    fn test_master_roundtrips_through_parser() {
        let original = make_test_event();
        let ics = generate_calendar(vec![event_to_vevent(&original)]);
        let doc = parse(ics.as_bytes()).expect("Should parse");

        assert_eq!(doc.events.len(), 1);
        let parsed = &doc.events[0];
        assert_eq!(parsed.uid, original.uid);
        assert_eq!(parsed.summary, original.summary);
        assert_eq!(parsed.start, original.start);
        assert_eq!(parsed.duration, original.duration);
        assert_eq!(parsed.recurrence, original.recurrence);
    }

    #[test]
    fn test_occurrence_serialized_in_utc() {
        let event = make_test_event();
        let resolver = TimeZoneResolver::new(Tz::UTC);
        let occurrence = Occurrence {
            event: &event,
            start: Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 2, 8, 15, 0).unwrap(),
            all_day: false,
            recurrence_id: Some("20240102".to_string()),
        };

        let ics = generate_calendar(vec![occurrence_to_vevent(&occurrence, &resolver)]);

        assert!(ics.contains("DTSTART:20240102T080000Z"));
        assert!(ics.contains("DTEND:20240102T081500Z"));
        assert!(ics.contains("RECURRENCE-ID:20240102T080000Z"));
        assert!(!ics.contains("RRULE"));
        assert!(!ics.contains("EXDATE"));
    }

    #[test]
    fn test_all_day_occurrence_uses_date_values() {
        let mut event = make_test_event();
        event.start = EventTime::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let resolver = TimeZoneResolver::new(Tz::UTC);
        let occurrence = Occurrence {
            event: &event,
            start: Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 9, 0, 0, 0).unwrap(),
            all_day: true,
            recurrence_id: Some("20240108".to_string()),
        };

        let ics = generate_calendar(vec![occurrence_to_vevent(&occurrence, &resolver)]);

        assert!(ics.contains("DTSTART;VALUE=DATE:20240108"));
        assert!(ics.contains("DTEND;VALUE=DATE:20240109"));
        assert!(ics.contains("RECURRENCE-ID;VALUE=DATE:20240108"));
    }
}
