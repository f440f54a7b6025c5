//! RRULE expansion for recurring events.
//!
//! Expands events into concrete [`Occurrence`]s inside a query window,
//! respecting RDATEs, EXDATEs and instance overrides (VEVENTs carrying a
//! RECURRENCE-ID). Each series is expanded on its own wall clock, so a weekly
//! 10:00 meeting in Europe/Berlin stays at 10:00 across DST changes.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use rrule::RRuleSet;

use crate::date_range::QueryWindow;
use crate::error::{IcalEventsError, IcalEventsResult};
use crate::event::{CalendarDocument, Event, EventTime, Recurrence};
use crate::occurrence::Occurrence;
use crate::timezone::{TimeZoneRef, TimeZoneResolver};

/// Hard cap on instances generated per series.
pub const MAX_INSTANCES: u16 = 10_000;

/// The wall clock a series is expanded on.
#[derive(Debug, Clone, Copy)]
enum SeriesClock {
    /// All-day series, laid out at midnight UTC
    AllDay,
    Utc,
    /// Fixed offset in seconds; laid out in UTC and shifted back
    Offset(i32),
    Zone(Tz),
}

/// Length of one instance.
#[derive(Debug, Clone, Copy)]
enum Span {
    Days(i64),
    Exact(Duration),
}

/// Expand every event of a document into occurrences intersecting `window`.
///
/// Overrides replace the generated instance with the same UID and
/// `YYYYMMDD` key. An override's key is its RECURRENCE-ID read on the master
/// series' clock, so a UTC RECURRENCE-ID on a zoned series still matches. A
/// series whose RRULE cannot be expanded is logged and treated as a single
/// non-recurring event.
#[tracing::instrument(skip_all, fields(events = document.events.len()))]
pub fn expand_document<'a>(
    document: &'a CalendarDocument,
    window: &QueryWindow,
    resolver: &TimeZoneResolver,
) -> Vec<Occurrence<'a>> {
    let masters: HashMap<&str, &Event> = document
        .events
        .iter()
        .filter(|e| e.recurrence_id.is_none())
        .map(|e| (e.uid.as_str(), e))
        .collect();

    let overrides: HashSet<(&str, String)> = document
        .events
        .iter()
        .filter_map(|e| {
            e.recurrence_id
                .as_ref()
                .map(|rid| (e.uid.as_str(), override_key(&masters, e, rid, resolver)))
        })
        .collect();

    let mut occurrences = Vec::new();

    for event in &document.events {
        if let Some(ref rid) = event.recurrence_id {
            if let Some(mut occurrence) = single_occurrence(event, window, resolver) {
                occurrence.recurrence_id = Some(override_key(&masters, event, rid, resolver));
                occurrences.push(occurrence);
            }
            continue;
        }

        let expanded = match expand(event, window, resolver) {
            Ok(expanded) => expanded,
            Err(e) => {
                tracing::warn!(uid = %event.uid, error = %e, "Treating event as non-recurring");
                single_occurrence(event, window, resolver).into_iter().collect()
            }
        };

        occurrences.extend(expanded.into_iter().filter(|occ| {
            occ.recurrence_id
                .as_ref()
                .is_none_or(|key| !overrides.contains(&(event.uid.as_str(), key.clone())))
        }));
    }

    tracing::debug!(occurrences = occurrences.len(), "Expanded document");
    occurrences
}

/// Key of the instance an override replaces. Without a master the
/// RECURRENCE-ID is taken as written.
fn override_key(
    masters: &HashMap<&str, &Event>,
    event: &Event,
    recurrence_id: &EventTime,
    resolver: &TimeZoneResolver,
) -> String {
    let Some(master) = masters.get(event.uid.as_str()) else {
        return recurrence_id.recurrence_key();
    };
    let clock = series_clock(&master.start, resolver);
    with_wall_clock(&master.start, wall_clock_of(recurrence_id, clock, resolver)).recurrence_key()
}

/// Expand one event into the occurrences intersecting `window`.
///
/// Non-recurring events yield at most one occurrence with no recurrence id.
/// Recurring events yield one occurrence per instance, keyed by the instance's
/// date in the series' own zone. Results are sorted by start.
pub fn expand<'a>(
    event: &'a Event,
    window: &QueryWindow,
    resolver: &TimeZoneResolver,
) -> IcalEventsResult<Vec<Occurrence<'a>>> {
    let Some(ref recurrence) = event.recurrence else {
        return Ok(single_occurrence(event, window, resolver).into_iter().collect());
    };

    let clock = series_clock(&event.start, resolver);
    let span = instance_span(event, resolver);

    let mut starts = vec![event.start.clone()];
    if let Some(ref rrule) = recurrence.rrule {
        starts.extend(rrule_starts(event, rrule, recurrence, clock, span, window)?);
    }
    starts.extend(
        recurrence
            .rdates
            .iter()
            .map(|rdate| with_wall_clock(&event.start, wall_clock_of(rdate, clock, resolver))),
    );

    let mut instances: Vec<(DateTime<Utc>, EventTime)> = starts
        .into_iter()
        .filter(|start| !is_excluded(start, &recurrence.exdates, resolver))
        .map(|start| (resolver.to_utc(&start), start))
        .filter(|(instant, _)| *instant < window.to)
        .collect();
    instances.sort_by_key(|(instant, _)| *instant);
    instances.dedup_by_key(|(instant, _)| *instant);
    keep_within_cap(&mut instances, window);

    Ok(instances
        .into_iter()
        .map(|(_, start)| {
            let key = start.recurrence_key();
            occurrence_at(event, &start, span, Some(key), resolver)
        })
        .filter(|occ| occ.intersects(window))
        .collect())
}

fn single_occurrence<'a>(
    event: &'a Event,
    window: &QueryWindow,
    resolver: &TimeZoneResolver,
) -> Option<Occurrence<'a>> {
    let span = instance_span(event, resolver);
    let occurrence = occurrence_at(event, &event.start, span, None, resolver);
    occurrence.intersects(window).then_some(occurrence)
}

fn occurrence_at<'a>(
    event: &'a Event,
    start: &EventTime,
    span: Span,
    recurrence_id: Option<String>,
    resolver: &TimeZoneResolver,
) -> Occurrence<'a> {
    let start_instant = resolver.to_utc(start);
    let end_instant = match span {
        Span::Days(days) => resolver.to_utc(&EventTime::Date(start.date() + Duration::days(days))),
        Span::Exact(duration) => start_instant + duration,
    };

    Occurrence {
        event,
        start: start_instant,
        end: end_instant,
        all_day: event.is_all_day(),
        recurrence_id,
    }
}

/// All-day events span whole days (at least one); timed events keep the
/// absolute distance between their start and end instants.
fn instance_span(event: &Event, resolver: &TimeZoneResolver) -> Span {
    let end = event.effective_end();
    if event.is_all_day() {
        Span::Days((end.date() - event.start.date()).num_days().max(1))
    } else {
        let duration = resolver.to_utc(&end) - resolver.to_utc(&event.start);
        Span::Exact(duration.max(Duration::zero()))
    }
}

/// Build an iCalendar-format rule set string for the rrule crate parser and
/// return the instance starts it generates around `window`.
fn rrule_starts(
    event: &Event,
    rrule: &str,
    recurrence: &Recurrence,
    clock: SeriesClock,
    span: Span,
    window: &QueryWindow,
) -> IcalEventsResult<Vec<EventTime>> {
    let rrule_str = format!(
        "{}\nRRULE:{}",
        dtstart_line(&event.start, clock),
        normalize_rrule(rrule, clock)
    );

    let rrule_set: RRuleSet = rrule_str.parse().map_err(|e| IcalEventsError::Expansion {
        uid: event.uid.clone(),
        reason: format!("{e}"),
    })?;

    // Pad the window by one instance and a day so zone shifts can't drop
    // boundary instances; the exact filter runs afterwards.
    let pad = match span {
        Span::Days(days) => Duration::days(days + 1),
        Span::Exact(duration) => duration + Duration::days(1),
    };
    let tz: rrule::Tz = Utc.into();
    let before = (window.to + Duration::days(1)).with_timezone(&tz);
    let (dates, limited) = match window.from {
        Some(from) => {
            let result = rrule_set
                .before(before)
                .after((from - pad).with_timezone(&tz))
                .all(MAX_INSTANCES);
            (result.dates, result.limited)
        }
        None => latest_before(&rrule_set, before),
    };
    if limited {
        tracing::warn!(
            uid = %event.uid,
            limit = MAX_INSTANCES,
            rdates = recurrence.rdates.len(),
            "Recurrence expansion hit the instance cap"
        );
    }

    Ok(dates
        .iter()
        .map(|dt| with_wall_clock(&event.start, rrule_wall_clock(dt, clock)))
        .collect())
}

/// The last [`MAX_INSTANCES`] instances before `before`, for windows without a
/// lower bound. Returns whether earlier instances were dropped.
fn latest_before(
    rrule_set: &RRuleSet,
    before: DateTime<rrule::Tz>,
) -> (Vec<DateTime<rrule::Tz>>, bool) {
    let cap = usize::from(MAX_INSTANCES);
    let mut latest = VecDeque::with_capacity(cap);
    let mut limited = false;

    for dt in rrule_set.into_iter().take_while(|dt| *dt < before) {
        if latest.len() == cap {
            latest.pop_front();
            limited = true;
        }
        latest.push_back(dt);
    }

    (latest.into(), limited)
}

/// Apply the instance cap to sorted instances. Bounded windows keep the
/// earliest instances; an unbounded past keeps the latest.
fn keep_within_cap<T>(instances: &mut Vec<T>, window: &QueryWindow) {
    let cap = usize::from(MAX_INSTANCES);
    if instances.len() <= cap {
        return;
    }
    if window.from.is_none() {
        let excess = instances.len() - cap;
        instances.drain(..excess);
    } else {
        instances.truncate(cap);
    }
}

fn series_clock(start: &EventTime, resolver: &TimeZoneResolver) -> SeriesClock {
    match start {
        EventTime::Date(_) => SeriesClock::AllDay,
        EventTime::DateTimeUtc(_) => SeriesClock::Utc,
        other => match other.zone() {
            TimeZoneRef::Utc => SeriesClock::Utc,
            TimeZoneRef::FixedOffsetSeconds(offset) => SeriesClock::Offset(offset),
            zone => SeriesClock::Zone(resolver.iana_zone(&zone).unwrap_or(resolver.local())),
        },
    }
}

fn dtstart_line(start: &EventTime, clock: SeriesClock) -> String {
    let naive = start.naive();
    match clock {
        SeriesClock::AllDay | SeriesClock::Utc => {
            format!("DTSTART:{}", naive.format("%Y%m%dT%H%M%SZ"))
        }
        SeriesClock::Offset(offset) => {
            let utc = naive - Duration::seconds(i64::from(offset));
            format!("DTSTART:{}", utc.format("%Y%m%dT%H%M%SZ"))
        }
        SeriesClock::Zone(tz) => {
            format!("DTSTART;TZID={}:{}", tz.name(), naive.format("%Y%m%dT%H%M%S"))
        }
    }
}

/// Rewrite UNTIL so the rrule crate accepts it: date-only values become the
/// last second of that day and floating values are converted to UTC.
fn normalize_rrule(rrule: &str, clock: SeriesClock) -> String {
    rrule
        .trim()
        .trim_start_matches("RRULE:")
        .split(';')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) if key.eq_ignore_ascii_case("UNTIL") => {
                format!("UNTIL={}", normalize_until(value, clock))
            }
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}

fn normalize_until(value: &str, clock: SeriesClock) -> String {
    let value = value.trim();
    if value.ends_with(['Z', 'z']) {
        return value.to_ascii_uppercase();
    }

    let naive = if value.len() == 8 {
        chrono::NaiveDate::parse_from_str(value, "%Y%m%d")
            .ok()
            .and_then(|d| d.and_hms_opt(23, 59, 59))
    } else {
        NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()
    };
    let Some(naive) = naive else {
        return value.to_string();
    };

    let instant = match clock {
        SeriesClock::AllDay | SeriesClock::Utc => naive.and_utc(),
        SeriesClock::Offset(offset) => (naive - Duration::seconds(i64::from(offset))).and_utc(),
        SeriesClock::Zone(tz) => tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| naive.and_utc()),
    };
    instant.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Wall-clock value of an rrule result on the series clock.
fn rrule_wall_clock(dt: &DateTime<rrule::Tz>, clock: SeriesClock) -> NaiveDateTime {
    match clock {
        SeriesClock::AllDay | SeriesClock::Utc => dt.naive_utc(),
        SeriesClock::Offset(offset) => dt.naive_utc() + Duration::seconds(i64::from(offset)),
        SeriesClock::Zone(_) => dt.naive_local(),
    }
}

/// Wall-clock value of an arbitrary time (an RDATE) on the series clock.
fn wall_clock_of(time: &EventTime, clock: SeriesClock, resolver: &TimeZoneResolver) -> NaiveDateTime {
    if matches!(clock, SeriesClock::AllDay) || time.is_date() {
        return time.naive();
    }
    let instant = resolver.to_utc(time);
    match clock {
        SeriesClock::AllDay | SeriesClock::Utc => instant.naive_utc(),
        SeriesClock::Offset(offset) => instant.naive_utc() + Duration::seconds(i64::from(offset)),
        SeriesClock::Zone(tz) => instant.with_timezone(&tz).naive_local(),
    }
}

/// Same variant (and TZID) as the master's DTSTART, at a new wall-clock time.
fn with_wall_clock(master_start: &EventTime, naive: NaiveDateTime) -> EventTime {
    match master_start {
        EventTime::Date(_) => EventTime::Date(naive.date()),
        EventTime::DateTimeUtc(_) => EventTime::DateTimeUtc(naive.and_utc()),
        EventTime::DateTimeFloating(_) => EventTime::DateTimeFloating(naive),
        EventTime::DateTimeZoned { tzid, .. } => EventTime::DateTimeZoned {
            datetime: naive,
            tzid: tzid.clone(),
        },
    }
}

/// Date-valued EXDATEs remove every instance on that date; date-time EXDATEs
/// remove the instance at that exact instant.
fn is_excluded(start: &EventTime, exdates: &[EventTime], resolver: &TimeZoneResolver) -> bool {
    exdates.iter().any(|exdate| match exdate {
        EventTime::Date(d) => start.date() == *d,
        other => resolver.to_utc(other) == resolver.to_utc(start),
    })
}
