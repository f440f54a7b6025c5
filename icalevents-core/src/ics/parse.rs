//! ICS parsing using the icalendar crate's parser.
//!
//! Parsing is forgiving: a missing trailing newline, LF-only line endings, a
//! UTF-8 BOM and invalid UTF-8 sequences are tolerated. Only broken
//! BEGIN/END nesting makes a document unparsable.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use icalendar::parser::{Component, Property, read_calendar, unfold};

use crate::error::{IcalEventsError, IcalEventsResult};
use crate::event::{CalendarDocument, Event, EventTime, Recurrence};

/// Marker used by some devices for internal-only entries.
const INTERNAL_ENTRY_MARKER: &str = "@@@";

/// Parse raw calendar bytes into a [`CalendarDocument`].
#[tracing::instrument(skip(bytes), fields(len = bytes.len()))]
pub fn parse(bytes: &[u8]) -> IcalEventsResult<CalendarDocument> {
    let text = normalize_input(bytes);

    check_structure(&text)?;

    let unfolded = unfold(&text);
    let calendar = read_calendar(&unfolded).map_err(|e| IcalEventsError::Malformed(e.to_string()))?;

    let prodid = calendar
        .properties
        .iter()
        .find(|p| p.name.as_ref().eq_ignore_ascii_case("PRODID"))
        .map(|p| p.val.to_string());
    let version = calendar
        .properties
        .iter()
        .find(|p| p.name.as_ref().eq_ignore_ascii_case("VERSION"))
        .map(|p| p.val.to_string());

    let events: Vec<Event> = calendar
        .components
        .iter()
        .filter(|c| c.name.as_ref().eq_ignore_ascii_case("VEVENT"))
        .enumerate()
        .filter_map(|(index, vevent)| parse_vevent(vevent, index))
        .collect();

    tracing::debug!(events = events.len(), "Parsed calendar");

    Ok(CalendarDocument {
        prodid,
        version,
        events,
    })
}

/// Decode bytes, strip a BOM and make sure the last line is terminated.
fn normalize_input(bytes: &[u8]) -> String {
    let decoded = String::from_utf8_lossy(bytes);
    let mut text = decoded.trim_start_matches('\u{feff}').to_string();
    if !text.ends_with('\n') {
        text.push_str("\r\n");
    }
    text
}

/// Verify BEGIN/END nesting before handing the text to the property parser.
fn check_structure(text: &str) -> IcalEventsResult<()> {
    let mut stack: Vec<String> = Vec::new();
    let mut closed_root = false;

    for (index, raw_line) in text.lines().enumerate() {
        let line_num = index + 1;
        let line = raw_line.trim_end_matches('\r');

        // Blank lines and folded continuations carry no structure.
        if line.trim().is_empty() || line.starts_with(' ') || line.starts_with('\t') {
            continue;
        }

        if closed_root {
            return Err(IcalEventsError::Malformed(format!(
                "content after END:VCALENDAR on line {line_num}"
            )));
        }

        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name.trim().to_ascii_uppercase(), value.trim()),
            None => (line.trim().to_ascii_uppercase(), ""),
        };

        match name.as_str() {
            "BEGIN" => {
                let component = value.to_ascii_uppercase();
                if stack.is_empty() && component != "VCALENDAR" {
                    return Err(IcalEventsError::Malformed(format!(
                        "expected BEGIN:VCALENDAR, found BEGIN:{component} on line {line_num}"
                    )));
                }
                stack.push(component);
            }
            "END" => {
                let component = value.to_ascii_uppercase();
                match stack.pop() {
                    Some(open) if open == component => {
                        if stack.is_empty() {
                            closed_root = true;
                        }
                    }
                    Some(open) => {
                        return Err(IcalEventsError::Malformed(format!(
                            "END:{component} on line {line_num} does not close BEGIN:{open}"
                        )));
                    }
                    None => {
                        return Err(IcalEventsError::Malformed(format!(
                            "END:{component} on line {line_num} without BEGIN"
                        )));
                    }
                }
            }
            _ if stack.is_empty() => {
                return Err(IcalEventsError::Malformed(format!(
                    "property outside of VCALENDAR on line {line_num}"
                )));
            }
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(IcalEventsError::Malformed(format!(
            "BEGIN:{open} is never closed"
        )));
    }
    if !closed_root {
        return Err(IcalEventsError::Malformed("no VCALENDAR found".to_string()));
    }

    Ok(())
}

/// Convert one VEVENT. Returns `None` for events that are filtered out or
/// lack a usable DTSTART; neither aborts the document.
fn parse_vevent(vevent: &Component, index: usize) -> Option<Event> {
    let uid = match find_prop(vevent, "UID") {
        Some(p) if !p.val.as_ref().trim().is_empty() => p.val.as_ref().trim().to_string(),
        _ => {
            let synthetic = format!("icalevents-{index}");
            tracing::warn!(uid = %synthetic, "VEVENT without UID, using synthetic UID");
            synthetic
        }
    };

    let description = find_prop(vevent, "DESCRIPTION").map(|p| unescape_text(p.val.as_ref()));
    if description
        .as_deref()
        .is_some_and(|d| d.contains(INTERNAL_ENTRY_MARKER))
    {
        tracing::debug!(uid = %uid, "Skipping device-internal event");
        return None;
    }

    let Some(start) = find_prop(vevent, "DTSTART").and_then(|p| parse_time_values(p).into_iter().next())
    else {
        tracing::warn!(uid = %uid, "VEVENT without valid DTSTART, skipping");
        return None;
    };

    let end = find_prop(vevent, "DTEND").and_then(|p| parse_time_values(p).into_iter().next());
    let duration = find_prop(vevent, "DURATION").and_then(|p| parse_duration(p.val.as_ref()));

    let summary = find_prop(vevent, "SUMMARY")
        .map(|p| unescape_text(p.val.as_ref()))
        .unwrap_or_default();
    let location = find_prop(vevent, "LOCATION")
        .map(|p| unescape_text(p.val.as_ref()))
        .filter(|l| !l.trim().is_empty());

    // Recurrence (RRULE, RDATE, EXDATE)
    let rrule = find_prop(vevent, "RRULE").map(|p| p.val.as_ref().trim().to_string());
    let rdates: Vec<EventTime> = props(vevent, "RDATE").flat_map(parse_time_values).collect();
    let exdates: Vec<EventTime> = props(vevent, "EXDATE").flat_map(parse_time_values).collect();
    let recurrence = if rrule.is_some() || !rdates.is_empty() {
        Some(Recurrence {
            rrule,
            rdates,
            exdates,
        })
    } else {
        None
    };

    // RECURRENCE-ID for instance overrides
    let recurrence_id =
        find_prop(vevent, "RECURRENCE-ID").and_then(|p| parse_time_values(p).into_iter().next());

    Some(Event {
        uid,
        summary,
        description,
        location,
        start,
        end,
        duration,
        recurrence,
        recurrence_id,
    })
}

fn find_prop<'a, 'b>(component: &'b Component<'a>, name: &'b str) -> Option<&'b Property<'a>> {
    props(component, name).next()
}

fn props<'a, 'b>(
    component: &'b Component<'a>,
    name: &'b str,
) -> impl Iterator<Item = &'b Property<'a>> + 'b {
    component
        .properties
        .iter()
        .filter(move |p| p.name.as_ref().eq_ignore_ascii_case(name))
}

fn param_value(prop: &Property, key: &str) -> Option<String> {
    prop.params
        .iter()
        .find(|p| p.key.as_ref().eq_ignore_ascii_case(key))
        .and_then(|p| p.val.as_ref().map(|v| v.to_string()))
}

/// Parse a DTSTART/DTEND/RDATE/EXDATE/RECURRENCE-ID property into time values.
///
/// Handles:
/// - TZID parameter: `EXDATE;TZID=America/New_York:20240108T100000`
/// - VALUE=DATE: `DTSTART;VALUE=DATE:20240108`
/// - UTC: `DTSTART:20240108T100000Z`
/// - Floating: `DTSTART:20240108T100000`
/// - Comma-separated values: `EXDATE;TZID=...:20240108T100000,20240115T100000`
///
/// PERIOD values (`start/end`) are skipped.
fn parse_time_values(prop: &Property) -> Vec<EventTime> {
    let tzid = param_value(prop, "TZID");
    let is_date = param_value(prop, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE"));

    prop.val
        .as_ref()
        .split(',')
        .filter_map(|s| {
            let s = s.trim();
            if s.is_empty() || s.contains('/') {
                return None;
            }
            if is_date || (s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit())) {
                return NaiveDate::parse_from_str(&s[..8.min(s.len())], "%Y%m%d")
                    .ok()
                    .map(EventTime::Date);
            }
            if let Some(utc) = s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
                return parse_naive(utc).map(|dt| EventTime::DateTimeUtc(dt.and_utc()));
            }
            let datetime = parse_naive(s)?;
            Some(match &tzid {
                Some(tz) => EventTime::DateTimeZoned {
                    datetime,
                    tzid: tz.clone(),
                },
                None => EventTime::DateTimeFloating(datetime),
            })
        })
        .collect()
}

fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
        .or_else(|_| NaiveDateTime::parse_from_str(&format!("{s}00"), "%Y%m%dT%H%M%S"))
        .ok()
}

/// Parse a DURATION value (`PT1H30M`, `P1D`, `-PT15M`).
fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let is_negative = value.starts_with('-');
    let duration_str = value.trim_start_matches(['-', '+']);

    let duration = iso8601::duration(duration_str).ok()?;
    let std_duration: std::time::Duration = duration.into();
    let duration = Duration::from_std(std_duration).ok()?;

    Some(if is_negative { -duration } else { duration })
}

/// Undo TEXT escaping: `\,` and `\;` become the bare character, `\n`/`\N`
/// becomes a line break and `\\` a single backslash.
pub fn unescape_text(raw: &str) -> String {
    let mut result = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            if c != '\r' {
                result.push(c);
            }
            continue;
        }
        match chars.peek() {
            Some(',') | Some(';') | Some('\\') => {
                result.push(chars.next().unwrap_or_default());
            }
            Some('n') | Some('N') => {
                chars.next();
                result.push('\n');
            }
            _ => result.push('\\'),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timezone::TimeZoneRef;

    fn wrap(vevents: &str) -> String {
        format!("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:TEST\r\n{vevents}END:VCALENDAR\r\n")
    }

    #[test]
    fn test_parse_basic_event() {
        let ics = wrap(
            "BEGIN:VEVENT\r\n\
UID:abc123\r\n\
SUMMARY:Standup\r\n\
DTSTART:20240105T090000Z\r\n\
DTEND:20240105T091500Z\r\n\
END:VEVENT\r\n",
        );

        let doc = parse(ics.as_bytes()).expect("Should parse");
        assert_eq!(doc.prodid.as_deref(), Some("TEST"));
        assert_eq!(doc.version.as_deref(), Some("2.0"));
        assert_eq!(doc.events.len(), 1);

        let event = &doc.events[0];
        assert_eq!(event.uid, "abc123");
        assert_eq!(event.summary, "Standup");
        assert!(event.location.is_none());
        assert!(!event.is_all_day());
        assert_eq!(event.start.zone(), TimeZoneRef::Utc);
    }

    #[test]
    fn test_parse_date_and_zone_forms() {
        let ics = wrap(
            "BEGIN:VEVENT\r\n\
UID:allday\r\n\
DTSTART;VALUE=DATE:20240101\r\n\
DTEND;VALUE=DATE:20240103\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:zoned\r\n\
DTSTART;TZID=Europe/Berlin:20240101T100000\r\n\
DTEND:20240101T100000\r\n\
END:VEVENT\r\n",
        );

        let doc = parse(ics.as_bytes()).expect("Should parse");
        let allday = &doc.events[0];
        assert!(allday.is_all_day());
        assert_eq!(
            allday.end,
            Some(EventTime::Date(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()))
        );

        let zoned = &doc.events[1];
        assert_eq!(
            zoned.start.zone(),
            TimeZoneRef::Named("Europe/Berlin".to_string())
        );
        assert_eq!(zoned.end.as_ref().map(EventTime::zone), Some(TimeZoneRef::Floating));
    }

    #[test]
    fn test_quoted_offset_tzid() {
        let ics = wrap(
            "BEGIN:VEVENT\r\n\
UID:offset\r\n\
DTSTART;TZID=\"UTC+01:00\":20240101T100000\r\n\
END:VEVENT\r\n",
        );

        let doc = parse(ics.as_bytes()).expect("Should parse");
        assert_eq!(doc.events.len(), 1);
        assert_eq!(doc.events[0].start.zone(), TimeZoneRef::FixedOffsetSeconds(3600));

        let resolver = crate::timezone::TimeZoneResolver::new(chrono_tz::Tz::UTC);
        assert_eq!(
            resolver.to_utc(&doc.events[0].start),
            NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap()
                .and_utc()
        );
    }

    #[test]
    fn test_parse_line_folding_and_escapes() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
BEGIN:VEVENT\r\n\
UID:test-123\r\n\
SUMMARY:Lunch\\, then coffee\r\n\
LOCATION:Main St. 1\\, Springfield\r\n\
DTSTART:20240101T100000Z\r\n\
DESCRIPTION:Hello \r\n world and \r\n more text\\nsecond line\r\n\
END:VEVENT\r\n\
END:VCALENDAR";

        let doc = parse(ics.as_bytes()).expect("Should parse without trailing newline");
        let event = &doc.events[0];
        assert_eq!(event.summary, "Lunch, then coffee");
        assert_eq!(event.location.as_deref(), Some("Main St. 1, Springfield"));
        assert_eq!(
            event.description.as_deref(),
            Some("Hello world and more text\nsecond line")
        );
    }

    #[test]
    fn test_internal_entries_are_dropped() {
        let ics = wrap(
            "BEGIN:VEVENT\r\n\
UID:palm\r\n\
DESCRIPTION:@@@ internal\r\n\
DTSTART:20240101T100000Z\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:kept\r\n\
DTSTART:20240102T100000Z\r\n\
END:VEVENT\r\n",
        );

        let doc = parse(ics.as_bytes()).expect("Should parse");
        assert_eq!(doc.events.len(), 1);
        assert_eq!(doc.events[0].uid, "kept");
    }

    #[test]
    fn test_no_events_is_empty_document() {
        let doc = parse(wrap("").as_bytes()).expect("Should parse");
        assert!(doc.events.is_empty());
    }

    #[test]
    fn test_broken_nesting_is_malformed() {
        let ics = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\n\
UID:x\r\n\
END:VCALENDAR\r\n";
        assert!(matches!(
            parse(ics.as_bytes()),
            Err(IcalEventsError::Malformed(_))
        ));

        assert!(matches!(
            parse(b"this is not a calendar"),
            Err(IcalEventsError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_recurrence_properties() {
        let ics = wrap(
            "BEGIN:VEVENT\r\n\
UID:series\r\n\
DTSTART:20240101T100000Z\r\n\
DTEND:20240101T110000Z\r\n\
RRULE:FREQ=WEEKLY;BYDAY=MO\r\n\
RDATE:20240103T100000Z\r\n\
EXDATE;TZID=America/New_York:20240108T100000,20240115T100000\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:series\r\n\
RECURRENCE-ID:20240122T100000Z\r\n\
DTSTART:20240122T120000Z\r\n\
DTEND:20240122T130000Z\r\n\
END:VEVENT\r\n",
        );

        let doc = parse(ics.as_bytes()).expect("Should parse");
        let recurrence = doc.events[0].recurrence.as_ref().expect("Should have recurrence");
        assert_eq!(recurrence.rrule.as_deref(), Some("FREQ=WEEKLY;BYDAY=MO"));
        assert_eq!(recurrence.rdates.len(), 1);
        assert_eq!(recurrence.exdates.len(), 2);
        for exdate in &recurrence.exdates {
            match exdate {
                EventTime::DateTimeZoned { tzid, .. } => assert_eq!(tzid, "America/New_York"),
                other => panic!("Expected DateTimeZoned, got {:?}", other),
            }
        }

        let override_event = &doc.events[1];
        assert_eq!(
            override_event.recurrence_id.as_ref().map(EventTime::recurrence_key),
            Some("20240122".to_string())
        );
        assert_eq!(doc.events_by_uid("series").count(), 2);
    }

    #[test]
    fn test_missing_uid_gets_synthetic_and_missing_dtstart_is_skipped() {
        let ics = wrap(
            "BEGIN:VEVENT\r\n\
SUMMARY:No uid\r\n\
DTSTART:20240101T100000Z\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:no-start\r\n\
SUMMARY:Broken\r\n\
END:VEVENT\r\n",
        );

        let doc = parse(ics.as_bytes()).expect("Should parse");
        assert_eq!(doc.events.len(), 1);
        assert_eq!(doc.events[0].uid, "icalevents-0");
    }

    #[test]
    fn test_duration_property() {
        assert_eq!(parse_duration("PT1H30M"), Some(Duration::minutes(90)));
        assert_eq!(parse_duration("P1D"), Some(Duration::days(1)));
        assert_eq!(parse_duration("-PT15M"), Some(Duration::minutes(-15)));
    }

    #[test]
    fn test_unescape_text() {
        assert_eq!(unescape_text("a\\,b\\;c\\\\d\\Ne"), "a,b;c\\d\ne");
        assert_eq!(unescape_text("C:\\temp"), "C:\\temp");
    }
}
