//! Calendar document and event types.
//!
//! These are produced once per request by [`crate::ics::parse`] and never mutated
//! afterwards. Occurrences borrow from them during expansion and rendering.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

use crate::timezone::TimeZoneRef;

/// A parsed VCALENDAR.
#[derive(Debug, Clone, Default)]
pub struct CalendarDocument {
    pub prodid: Option<String>,
    pub version: Option<String>,
    pub events: Vec<Event>,
}

impl CalendarDocument {
    /// All events with the given UID (master and overrides).
    pub fn events_by_uid<'a>(&'a self, uid: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.events.iter().filter(move |e| e.uid == uid)
    }
}

/// One VEVENT block.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub uid: String,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: EventTime,
    pub end: Option<EventTime>,
    /// DURATION property, only consulted when DTEND is absent
    pub duration: Option<Duration>,
    pub recurrence: Option<Recurrence>,
    /// Set when this VEVENT overrides one instance of a recurring series
    pub recurrence_id: Option<EventTime>,
}

impl Event {
    pub fn is_all_day(&self) -> bool {
        self.start.is_date()
    }

    /// The effective end: DTEND, else DTSTART + DURATION, else one day for all-day
    /// events and zero length for timed events.
    pub fn effective_end(&self) -> EventTime {
        if let Some(end) = &self.end {
            return end.clone();
        }
        match (&self.start, self.duration) {
            (EventTime::Date(d), Some(dur)) => {
                EventTime::Date(*d + Duration::days(dur.num_days().max(1)))
            }
            (EventTime::Date(d), None) => EventTime::Date(*d + Duration::days(1)),
            (start, Some(dur)) => start.shifted(dur),
            (start, None) => start.clone(),
        }
    }
}

/// RRULE, RDATE and EXDATE of a master event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Recurrence {
    /// RRULE value without the `RRULE:` prefix; `None` for RDATE-only series
    pub rrule: Option<String>,
    pub rdates: Vec<EventTime>,
    pub exdates: Vec<EventTime>,
}

/// A DTSTART/DTEND style value, keeping the timezone form it was authored in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventTime {
    /// All-day value (`VALUE=DATE`)
    Date(NaiveDate),
    /// `...Z`
    DateTimeUtc(DateTime<Utc>),
    /// No zone, interpreted in the rendering timezone
    DateTimeFloating(NaiveDateTime),
    /// `TZID=...`; the zone may be an IANA name or a fixed offset like `UTC+01:00`
    DateTimeZoned {
        datetime: NaiveDateTime,
        tzid: String,
    },
}

impl EventTime {
    pub fn is_date(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }

    /// Wall-clock value as authored (dates at midnight).
    pub fn naive(&self) -> NaiveDateTime {
        match self {
            EventTime::Date(d) => d.and_time(chrono::NaiveTime::MIN),
            EventTime::DateTimeUtc(dt) => dt.naive_utc(),
            EventTime::DateTimeFloating(dt) => *dt,
            EventTime::DateTimeZoned { datetime, .. } => *datetime,
        }
    }

    /// Calendar date as authored, in the value's own zone.
    pub fn date(&self) -> NaiveDate {
        self.naive().date()
    }

    /// The timezone reference this value should be resolved in.
    pub fn zone(&self) -> TimeZoneRef {
        match self {
            EventTime::Date(_) | EventTime::DateTimeFloating(_) => TimeZoneRef::Floating,
            EventTime::DateTimeUtc(_) => TimeZoneRef::Utc,
            EventTime::DateTimeZoned { tzid, .. } => TimeZoneRef::from_tzid(tzid),
        }
    }

    /// Same variant and zone, moved by `delta` on the wall clock.
    pub fn shifted(&self, delta: Duration) -> EventTime {
        match self {
            EventTime::Date(d) => EventTime::Date(*d + Duration::days(delta.num_days())),
            EventTime::DateTimeUtc(dt) => EventTime::DateTimeUtc(*dt + delta),
            EventTime::DateTimeFloating(dt) => EventTime::DateTimeFloating(*dt + delta),
            EventTime::DateTimeZoned { datetime, tzid } => EventTime::DateTimeZoned {
                datetime: *datetime + delta,
                tzid: tzid.clone(),
            },
        }
    }

    /// Value part in iCalendar form (`20240101`, `20240101T100000Z`, `20240101T100000`).
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

    /// The `YYYYMMDD` key identifying an instance of a recurring series.
    pub fn recurrence_key(&self) -> String {
        self.date().format("%Y%m%d").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn event(start: EventTime, end: Option<EventTime>) -> Event {
        Event {
            uid: "uid-1".to_string(),
            summary: "Test".to_string(),
            description: None,
            location: None,
            start,
            end,
            duration: None,
            recurrence: None,
            recurrence_id: None,
        }
    }

    #[test]
    fn test_all_day_without_end_lasts_one_day() {
        let e = event(EventTime::Date(date(2024, 1, 2)), None);
        assert!(e.is_all_day());
        assert_eq!(e.effective_end(), EventTime::Date(date(2024, 1, 3)));
    }

    #[test]
    fn test_duration_used_when_dtend_missing() {
        let start = date(2024, 1, 2).and_hms_opt(10, 0, 0).unwrap();
        let mut e = event(EventTime::DateTimeFloating(start), None);
        e.duration = Some(Duration::minutes(90));
        assert_eq!(
            e.effective_end(),
            EventTime::DateTimeFloating(date(2024, 1, 2).and_hms_opt(11, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_recurrence_key_uses_own_zone_date() {
        let t = EventTime::DateTimeZoned {
            datetime: date(2024, 3, 9).and_hms_opt(23, 30, 0).unwrap(),
            tzid: "America/New_York".to_string(),
        };
        assert_eq!(t.recurrence_key(), "20240309");
        assert_eq!(t.to_ics_string(), "20240309T233000");
    }
}
