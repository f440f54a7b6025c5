//! Error types for icalevents.

use thiserror::Error;

/// Prefix for diagnostics rendered inline in place of calendar output.
pub const ERROR_PREFIX: &str = "Error: ";

/// Errors that can occur while fetching, parsing, expanding or exporting calendars.
#[derive(Error, Debug)]
pub enum IcalEventsError {
    #[error("could not get {source_id}{}", status_suffix(.status))]
    Fetch {
        source_id: String,
        /// HTTP status, `None` for local files and transport failures
        status: Option<u16>,
    },

    #[error("invalid iCalendar input: {0}")]
    Malformed(String),

    #[error("unable to expand recurrent event '{uid}': {reason}")]
    Expansion { uid: String, reason: String },

    #[error("event '{uid}' not found{}", recurrence_suffix(.recurrence_id))]
    NotFound {
        uid: String,
        recurrence_id: Option<String>,
    },

    #[error("invalid date expression '{0}'")]
    InvalidDate(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IcalEventsError {
    /// HTTP-equivalent status for boundaries that speak HTTP.
    pub fn status_code(&self) -> u16 {
        match self {
            IcalEventsError::NotFound { .. } => 404,
            IcalEventsError::Fetch { .. } => 502,
            IcalEventsError::InvalidDate(_) => 400,
            _ => 500,
        }
    }

    /// The single-line diagnostic shown in place of a calendar.
    pub fn inline_message(&self) -> String {
        format!("{ERROR_PREFIX}{self}")
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(", HTTP status {code}"),
        None => String::new(),
    }
}

fn recurrence_suffix(recurrence_id: &Option<String>) -> String {
    match recurrence_id {
        Some(id) => format!(" (recurrence-id {id})"),
        None => String::new(),
    }
}

/// Result type alias for icalevents operations.
pub type IcalEventsResult<T> = Result<T, IcalEventsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_404() {
        let err = IcalEventsError::NotFound {
            uid: "abc123".to_string(),
            recurrence_id: Some("20240105".to_string()),
        };
        assert_eq!(err.status_code(), 404);
        assert_eq!(
            err.to_string(),
            "event 'abc123' not found (recurrence-id 20240105)"
        );
    }

    #[test]
    fn test_inline_message_is_prefixed() {
        let err = IcalEventsError::Fetch {
            source_id: "https://example.com/cal.ics".to_string(),
            status: Some(500),
        };
        assert_eq!(
            err.inline_message(),
            "Error: could not get https://example.com/cal.ics, HTTP status 500"
        );
    }
}
