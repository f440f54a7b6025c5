//! Timezone resolution for iCalendar date-times.
//!
//! Every DTSTART/DTEND carries its own [`TimeZoneRef`]. The resolver turns a
//! wall-clock value plus that reference into an absolute instant, falling back
//! to the rendering ("local") timezone for floating times and for TZIDs that
//! are not known IANA names.

use std::cell::RefCell;
use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

use crate::event::EventTime;

/// The zone a date-time value is expressed in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimeZoneRef {
    Utc,
    /// Seconds east of UTC, unaffected by DST
    FixedOffsetSeconds(i32),
    /// IANA identifier (possibly unknown; resolved lazily)
    Named(String),
    /// No zone; rendered in the local timezone
    Floating,
}

impl TimeZoneRef {
    /// Classify a TZID parameter value.
    ///
    /// `UTC`, `GMT` and `Z` map to [`TimeZoneRef::Utc`]; offsets such as `UTC+01:00`,
    /// `GMT-0500` or `+0100` map to fixed offsets; anything else is a named zone.
    /// In a content line a value containing `:` must be quoted
    /// (`TZID="UTC+01:00"`), otherwise the line splits at that colon.
    pub fn from_tzid(tzid: &str) -> Self {
        let trimmed = tzid.trim().trim_matches('"');
        let upper = trimmed.to_ascii_uppercase();

        if matches!(upper.as_str(), "UTC" | "GMT" | "Z" | "ETC/UTC" | "ETC/GMT") {
            return TimeZoneRef::Utc;
        }

        let rest = upper
            .strip_prefix("UTC")
            .or_else(|| upper.strip_prefix("GMT"))
            .unwrap_or(&upper);

        match parse_offset(rest) {
            Some(0) => TimeZoneRef::Utc,
            Some(seconds) => TimeZoneRef::FixedOffsetSeconds(seconds),
            None => TimeZoneRef::Named(trimmed.to_string()),
        }
    }
}

/// Parse `+HH`, `+HHMM`, `+HH:MM` (and `-` forms) into seconds.
fn parse_offset(s: &str) -> Option<i32> {
    let (sign, digits) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let digits = digits.replace(':', "");
    if digits.is_empty() || digits.len() > 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse::<i32>().ok()?, 0),
        3 => (digits[..1].parse::<i32>().ok()?, digits[1..].parse::<i32>().ok()?),
        _ => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
    };
    if hours > 18 || minutes > 59 {
        return None;
    }
    Some(sign * (hours * 3600 + minutes * 60))
}

/// Resolves zone references against the IANA database and a local rendering zone.
///
/// Lookups of named zones are cached, so an unknown TZID is only reported once.
#[derive(Debug)]
pub struct TimeZoneResolver {
    local: Tz,
    cache: RefCell<HashMap<String, Option<Tz>>>,
}

impl TimeZoneResolver {
    pub fn new(local: Tz) -> Self {
        TimeZoneResolver {
            local,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Resolver using the system timezone, or UTC if it cannot be determined.
    pub fn system() -> Self {
        Self::new(system_timezone())
    }

    /// Resolver for an optional configured zone name, falling back to the system zone.
    pub fn for_setting(name: Option<&str>) -> Self {
        match name.and_then(|n| Tz::from_str(&normalize_tzid(n)).ok()) {
            Some(tz) => Self::new(tz),
            None => {
                if let Some(n) = name {
                    tracing::warn!(timezone = n, "Unknown configured timezone, using system zone");
                }
                Self::system()
            }
        }
    }

    /// The rendering timezone.
    pub fn local(&self) -> Tz {
        self.local
    }

    /// Look up an IANA zone, returning `None` when the name is unknown.
    pub fn lookup(&self, tzid: &str) -> Option<Tz> {
        if let Some(cached) = self.cache.borrow().get(tzid) {
            return *cached;
        }

        let resolved = Tz::from_str(&normalize_tzid(tzid)).ok();
        if resolved.is_none() {
            tracing::warn!(tzid, local = %self.local.name(), "Unknown timezone, falling back to local");
        }
        self.cache.borrow_mut().insert(tzid.to_string(), resolved);
        resolved
    }

    /// The IANA zone a reference resolves to, if any. Fixed offsets and UTC have none.
    pub fn iana_zone(&self, zone: &TimeZoneRef) -> Option<Tz> {
        match zone {
            TimeZoneRef::Named(name) => Some(self.lookup(name).unwrap_or(self.local)),
            TimeZoneRef::Floating => Some(self.local),
            TimeZoneRef::Utc | TimeZoneRef::FixedOffsetSeconds(_) => None,
        }
    }

    /// UTC offset in seconds for the wall-clock time `naive` in `zone`.
    pub fn resolve_offset(&self, zone: &TimeZoneRef, naive: NaiveDateTime) -> i32 {
        match zone {
            TimeZoneRef::Utc => 0,
            TimeZoneRef::FixedOffsetSeconds(seconds) => *seconds,
            TimeZoneRef::Named(_) | TimeZoneRef::Floating => {
                let tz = self.iana_zone(zone).unwrap_or(self.local);
                offset_at(&tz, naive)
            }
        }
    }

    /// Offset of zone `a` minus offset of zone `b`, each evaluated at its own
    /// wall-clock interpretation of `naive`.
    pub fn offset_difference(&self, a: &TimeZoneRef, b: &TimeZoneRef, naive: NaiveDateTime) -> i32 {
        self.resolve_offset(a, naive) - self.resolve_offset(b, naive)
    }

    /// Absolute instant of a wall-clock time in `zone`.
    pub fn instant(&self, zone: &TimeZoneRef, naive: NaiveDateTime) -> DateTime<Utc> {
        let offset = self.resolve_offset(zone, naive);
        (naive - Duration::seconds(i64::from(offset))).and_utc()
    }

    /// Absolute instant of an [`EventTime`]. Dates resolve at local midnight.
    pub fn to_utc(&self, time: &EventTime) -> DateTime<Utc> {
        match time {
            EventTime::DateTimeUtc(dt) => *dt,
            other => self.instant(&other.zone(), other.naive()),
        }
    }

    /// Wall-clock time of an instant in the rendering zone.
    pub fn to_local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.local).naive_local()
    }
}

/// Offset for a wall-clock time. Ambiguous times take the earlier instant;
/// times inside a DST gap use the offset in effect before the gap, which moves
/// them forward by the gap length.
fn offset_at(tz: &Tz, naive: NaiveDateTime) -> i32 {
    match tz.offset_from_local_datetime(&naive) {
        LocalResult::Single(offset) => offset.fix().local_minus_utc(),
        LocalResult::Ambiguous(earliest, latest) => {
            // The earlier instant has the larger offset.
            earliest
                .fix()
                .local_minus_utc()
                .max(latest.fix().local_minus_utc())
        }
        LocalResult::None => tz
            .offset_from_utc_datetime(&(naive - Duration::days(1)))
            .fix()
            .local_minus_utc(),
    }
}

/// Normalizes TZIDs written by common calendar clients to IANA names.
fn normalize_tzid(tzid: &str) -> String {
    let trimmed = tzid.trim().trim_matches('"');

    // Lotus Notes / Mozilla style prefixes: "/mozilla.org/20050126_1/Europe/Berlin"
    let stripped = match trimmed.strip_prefix("/mozilla.org/") {
        Some(rest) => rest.split_once('/').map(|(_, zone)| zone).unwrap_or(rest),
        None => trimmed.trim_start_matches('/'),
    };

    match stripped {
        "Z" | "UTC" | "GMT" => "UTC".to_string(),
        "US/Eastern" | "Eastern Standard Time" => "America/New_York".to_string(),
        "US/Central" | "Central Standard Time" => "America/Chicago".to_string(),
        "US/Mountain" | "Mountain Standard Time" => "America/Denver".to_string(),
        "US/Pacific" | "Pacific Standard Time" => "America/Los_Angeles".to_string(),
        "W. Europe Standard Time" => "Europe/Berlin".to_string(),
        "Romance Standard Time" => "Europe/Paris".to_string(),
        "GMT Standard Time" => "Europe/London".to_string(),
        other => other.to_string(),
    }
}

fn system_timezone() -> Tz {
    iana_time_zone::get_timezone()
        .ok()
        .and_then(|name| Tz::from_str(&name).ok())
        .unwrap_or(Tz::UTC)
}
