//! ICS parsing and generation.
//!
//! Reading accepts the sloppy feeds found in the wild. Writing is only used
//! for exports and always produces RFC 5545 output with CRLF line endings.

mod generate;
mod parse;

pub use generate::{PRODID, event_to_vevent, generate_calendar, occurrence_to_vevent};
pub use parse::{parse, unescape_text};
