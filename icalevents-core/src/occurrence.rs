//! Concrete instances produced by recurrence expansion.

use chrono::{DateTime, NaiveDate, Utc};

use crate::date_range::QueryWindow;
use crate::event::Event;
use crate::timezone::TimeZoneResolver;

/// One concrete instance of an event, borrowing the event it came from.
///
/// `start`/`end` are absolute instants. For all-day occurrences they are
/// midnight in the rendering timezone and `end` is exclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence<'a> {
    pub event: &'a Event,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    /// `YYYYMMDD` of the instance, `None` for non-recurring events
    pub recurrence_id: Option<String>,
}

impl<'a> Occurrence<'a> {
    pub fn uid(&self) -> &'a str {
        &self.event.uid
    }

    /// Identity used for de-duplication within a page.
    pub fn key(&self) -> (String, Option<String>) {
        (self.event.uid.clone(), self.recurrence_id.clone())
    }

    pub fn intersects(&self, window: &QueryWindow) -> bool {
        window.intersects(self.start, self.end)
    }

    /// First and last calendar day covered, in the rendering timezone.
    /// The last day of an all-day occurrence is the day before its exclusive end.
    pub fn local_dates(&self, resolver: &TimeZoneResolver) -> (NaiveDate, NaiveDate) {
        let start = resolver.to_local(self.start).date();
        let end = resolver.to_local(self.end).date();
        if self.all_day && end > start {
            (start, end.pred_opt().unwrap_or(end))
        } else {
            (start, end)
        }
    }
}
