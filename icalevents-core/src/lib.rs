//! Core of icalevents: render iCalendar feeds through text templates.
//!
//! This crate provides everything except the command line:
//! - `ics` parses feeds and generates exports
//! - `timezone` and `recurrence` turn events into concrete occurrences
//! - `select` and `template` pick and render occurrences
//! - `render` and `export` tie the steps together for one request

pub mod date_range;
pub mod error;
pub mod event;
pub mod export;
pub mod fetch;
pub mod ics;
pub mod occurrence;
pub mod params;
pub mod recurrence;
pub mod render;
pub mod select;
pub mod settings;
pub mod template;
pub mod timezone;

pub use error::{IcalEventsError, IcalEventsResult};
pub use event::{CalendarDocument, Event, EventTime, Recurrence};
pub use occurrence::Occurrence;
