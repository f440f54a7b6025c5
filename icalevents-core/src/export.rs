//! Export of a single event (or one instance of a series) as an .ics file.

use chrono::{Duration, NaiveDate};

use crate::date_range::QueryWindow;
use crate::error::{IcalEventsError, IcalEventsResult};
use crate::event::CalendarDocument;
use crate::ics::{event_to_vevent, generate_calendar, occurrence_to_vevent};
use crate::recurrence::expand_document;
use crate::select::RenderSession;
use crate::timezone::TimeZoneResolver;

pub const CONTENT_TYPE: &str = "text/calendar";

/// An export ready to be sent as a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportResponse {
    pub content_type: &'static str,
    pub content_disposition: String,
    pub body: String,
}

/// Serialize the event `uid` as a complete VCALENDAR.
///
/// Without a recurrence id the master event is returned as authored. With a
/// `YYYYMMDD` recurrence id the matching instance is returned in UTC, carrying
/// a RECURRENCE-ID and no recurrence rules.
#[tracing::instrument(skip(document, resolver))]
pub fn lookup(
    document: &CalendarDocument,
    uid: &str,
    recurrence_id: Option<&str>,
    resolver: &TimeZoneResolver,
) -> IcalEventsResult<String> {
    let not_found = || IcalEventsError::NotFound {
        uid: uid.to_string(),
        recurrence_id: recurrence_id.map(str::to_string),
    };

    let Some(recurrence_id) = recurrence_id.map(str::trim).filter(|r| !r.is_empty()) else {
        let event = document
            .events_by_uid(uid)
            .find(|e| e.recurrence_id.is_none())
            .ok_or_else(not_found)?;
        return Ok(generate_calendar(vec![event_to_vevent(event)]));
    };

    let date = NaiveDate::parse_from_str(recurrence_id, "%Y%m%d").map_err(|_| not_found())?;
    let from = (date - Duration::days(1)).and_time(chrono::NaiveTime::MIN).and_utc();
    let to = (date + Duration::days(2)).and_time(chrono::NaiveTime::MIN).and_utc();

    let occurrences = expand_document(document, &QueryWindow::new(Some(from), to), resolver);
    let occurrence = occurrences
        .iter()
        .find(|o| o.uid() == uid && o.recurrence_id.as_deref() == Some(recurrence_id))
        .ok_or_else(not_found)?;

    Ok(generate_calendar(vec![occurrence_to_vevent(occurrence, resolver)]))
}

/// [`lookup`] wrapped as a download. An instance already exported in this
/// session yields an empty calendar.
pub fn export_event(
    document: &CalendarDocument,
    uid: &str,
    recurrence_id: Option<&str>,
    resolver: &TimeZoneResolver,
    session: &mut RenderSession,
    page_id: Option<&str>,
) -> IcalEventsResult<ExportResponse> {
    let recurrence_id = recurrence_id.map(str::trim).filter(|r| !r.is_empty());

    let body = if session.has_seen(uid, recurrence_id) {
        tracing::debug!(uid, "Already exported in this session");
        generate_calendar(Vec::new())
    } else {
        let body = lookup(document, uid, recurrence_id, resolver)?;
        session.first_sighting((uid.to_string(), recurrence_id.map(str::to_string)));
        body
    };

    Ok(ExportResponse {
        content_type: CONTENT_TYPE,
        content_disposition: format!("attachment; filename={}.ics", file_stem(page_id, uid)),
        body,
    })
}

fn file_stem(page_id: Option<&str>, uid: &str) -> String {
    let name = page_id.filter(|p| !p.trim().is_empty()).unwrap_or(uid);
    let stem = slug::slugify(name.replace(['/', ':'], "-"));
    if stem.is_empty() {
        "calendar".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ics::{PRODID, parse};
    use chrono_tz::Tz;

    const FEED: &str = "BEGIN:VCALENDAR\r\n\
        VERSION:2.0\r\n\
        PRODID:TEST\r\n\
        BEGIN:VEVENT\r\n\
        UID:series@example\r\n\
        SUMMARY:Standup\r\n\
        DTSTART;TZID=Europe/Berlin:20240101T090000\r\n\
        DTEND;TZID=Europe/Berlin:20240101T091500\r\n\
        RRULE:FREQ=DAILY;COUNT=10\r\n\
        END:VEVENT\r\n\
        BEGIN:VEVENT\r\n\
        UID:single@example\r\n\
        SUMMARY:Review\r\n\
        DTSTART:20240105T130000Z\r\n\
        END:VEVENT\r\n\
        END:VCALENDAR\r\n";

    fn doc() -> CalendarDocument {
        parse(FEED.as_bytes()).expect("Should parse")
    }

    #[test]
    fn test_export_instance() {
        let resolver = TimeZoneResolver::new(Tz::UTC);
        let ics = lookup(&doc(), "series@example", Some("20240103"), &resolver).expect("Should export");

        assert!(ics.contains(&format!("PRODID:{PRODID}")));
        assert!(ics.contains("UID:series@example"));
        assert!(ics.contains("DTSTART:20240103T080000Z"));
        assert!(ics.contains("DTEND:20240103T081500Z"));
        assert!(ics.contains("RECURRENCE-ID:20240103T080000Z"));
        assert!(!ics.contains("RRULE"));
    }

    #[test]
    fn test_export_master_as_authored() {
        let resolver = TimeZoneResolver::new(Tz::UTC);
        let ics = lookup(&doc(), "series@example", None, &resolver).expect("Should export");

        assert!(ics.contains("DTSTART;TZID=Europe/Berlin:20240101T090000"));
        assert!(ics.contains("RRULE:FREQ=DAILY;COUNT=10"));
        assert!(!ics.contains("RECURRENCE-ID"));
    }

    #[test]
    fn test_not_found_cases() {
        let resolver = TimeZoneResolver::new(Tz::UTC);
        let doc = doc();

        let unknown = lookup(&doc, "nope", None, &resolver).unwrap_err();
        assert_eq!(unknown.status_code(), 404);

        let bad_rid = lookup(&doc, "series@example", Some("2024-01-03"), &resolver).unwrap_err();
        assert!(matches!(bad_rid, IcalEventsError::NotFound { .. }));

        let outside = lookup(&doc, "series@example", Some("20240301"), &resolver).unwrap_err();
        assert!(matches!(outside, IcalEventsError::NotFound { .. }));

        let non_recurring = lookup(&doc, "single@example", Some("20240105"), &resolver).unwrap_err();
        assert!(matches!(non_recurring, IcalEventsError::NotFound { .. }));
    }

    #[test]
    fn test_export_response_and_session() {
        let resolver = TimeZoneResolver::new(Tz::UTC);
        let doc = doc();
        let mut session = RenderSession::new();

        let first = export_event(&doc, "single@example", Some(""), &resolver, &mut session, Some("team:events"))
            .expect("Should export");
        assert_eq!(first.content_type, "text/calendar");
        assert_eq!(first.content_disposition, "attachment; filename=team-events.ics");
        assert!(first.body.contains("UID:single@example"));

        let second = export_event(&doc, "single@example", None, &resolver, &mut session, None)
            .expect("Should export");
        assert!(!second.body.contains("BEGIN:VEVENT"));
        assert!(second.body.contains("BEGIN:VCALENDAR"));
        assert_eq!(second.content_disposition, "attachment; filename=single-example.ics");
    }
}
