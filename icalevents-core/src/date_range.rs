//! Query windows and the date expressions that define them.
//!
//! `from`/`to` accept a subset of the strtotime-like syntax users write in
//! calendar tags: absolute dates (`2024-01-01`, `2024-01-01 10:00`), anchors
//! (`now`, `today`, `tomorrow`, `next monday`), offsets (`+3 days`,
//! `1 week ago`, `today +2 weeks`) and legacy unix timestamps. Anything else is
//! handed to `fuzzydate`.

use std::str::FromStr;

use chrono::{
    DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
    Weekday,
};
use chrono_tz::Tz;

use crate::error::{IcalEventsError, IcalEventsResult};

/// Default upper bound when no `to` is given.
pub const DEFAULT_TO: &str = "+30 days";

/// Half-open window `[from, to)`. `from = None` means unbounded past.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: DateTime<Utc>,
}

impl QueryWindow {
    pub fn new(from: Option<DateTime<Utc>>, to: DateTime<Utc>) -> Self {
        QueryWindow { from, to }
    }

    /// Whether `[start, end)` intersects the window. Zero-length ranges
    /// intersect when their start lies inside the window.
    pub fn intersects(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        if start >= self.to {
            return false;
        }
        match self.from {
            None => true,
            Some(from) if end <= start => start >= from,
            Some(from) => end > from,
        }
    }

    /// Resolve `from`/`to` expressions at `now` in the rendering zone.
    pub fn from_expressions(
        from: Option<&str>,
        to: Option<&str>,
        now: DateTime<Utc>,
        tz: Tz,
    ) -> IcalEventsResult<ResolvedWindow> {
        let from_expr = DateExpr::parse(from.unwrap_or("now"));
        let to_expr = DateExpr::parse(to.unwrap_or(DEFAULT_TO));

        let from_instant = from_expr.resolve(now, tz)?;
        let to_instant = to_expr
            .resolve(now, tz)?
            .ok_or_else(|| IcalEventsError::InvalidDate(to.unwrap_or_default().to_string()))?;

        let has_relative_range = from_expr.is_relative(now, tz) || to_expr.is_relative(now, tz);

        Ok(ResolvedWindow {
            window: QueryWindow::new(from_instant, to_instant),
            has_relative_range,
        })
    }
}

/// A window plus whether it depends on the current time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedWindow {
    pub window: QueryWindow,
    /// True when `from` or `to` resolves differently depending on "now";
    /// such renders must not be cached.
    pub has_relative_range: bool,
}

/// A parsed `from`/`to` expression.
#[derive(Debug, Clone, PartialEq)]
pub enum DateExpr {
    /// `start`: no lower bound
    Unbounded,
    /// `@1700000000` or a bare integer
    Timestamp(i64),
    /// An anchor moved by zero or more offsets
    Calendar {
        anchor: Anchor,
        offsets: Vec<(i64, Unit)>,
    },
    /// Not understood here; resolved by `fuzzydate`
    Fuzzy(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Anchor {
    Now,
    Today,
    Fixed(NaiveDateTime),
    Weekday(Weekday, Direction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    This,
    Next,
    Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Fortnight,
    Month,
    Year,
}

impl DateExpr {
    pub fn parse(input: &str) -> DateExpr {
        let lower = input.trim().to_lowercase();

        match lower.as_str() {
            "" | "now" => {
                return DateExpr::Calendar {
                    anchor: Anchor::Now,
                    offsets: Vec::new(),
                };
            }
            "start" => return DateExpr::Unbounded,
            _ => {}
        }

        if let Some(ts) = lower.strip_prefix('@').and_then(|t| t.parse::<i64>().ok()) {
            return DateExpr::Timestamp(ts);
        }
        if lower.len() != 8 && lower.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(ts) = lower.parse::<i64>() {
                return DateExpr::Timestamp(ts);
            }
        }

        parse_calendar(&lower).unwrap_or_else(|| DateExpr::Fuzzy(input.trim().to_string()))
    }

    /// Resolve against `now` in `tz`. `Ok(None)` for [`DateExpr::Unbounded`].
    pub fn resolve(&self, now: DateTime<Utc>, tz: Tz) -> IcalEventsResult<Option<DateTime<Utc>>> {
        match self {
            DateExpr::Unbounded => Ok(None),
            DateExpr::Timestamp(ts) => DateTime::from_timestamp(*ts, 0)
                .map(Some)
                .ok_or_else(|| IcalEventsError::InvalidDate(format!("@{ts}"))),
            DateExpr::Calendar { anchor, offsets } => {
                let local_now = now.with_timezone(&tz).naive_local();
                let mut value = anchor_value(anchor, local_now);
                for (amount, unit) in offsets {
                    value = apply_offset(value, *amount, *unit)
                        .ok_or_else(|| IcalEventsError::InvalidDate(format!("{self:?}")))?;
                }
                Ok(Some(local_to_utc(value, tz)))
            }
            DateExpr::Fuzzy(text) => {
                let value = fuzzydate::parse(text.as_str())
                    .map_err(|_| IcalEventsError::InvalidDate(text.clone()))?;
                Ok(Some(local_to_utc(value, tz)))
            }
        }
    }

    /// An expression is relative iff it resolves differently now and two years ago.
    /// `fuzzydate` expressions cannot be re-evaluated at another base and count as relative.
    pub fn is_relative(&self, now: DateTime<Utc>, tz: Tz) -> bool {
        if let DateExpr::Fuzzy(_) = self {
            return true;
        }
        let earlier = now - Duration::days(2 * 365);
        match (self.resolve(now, tz), self.resolve(earlier, tz)) {
            (Ok(a), Ok(b)) => a != b,
            _ => true,
        }
    }
}

fn parse_calendar(lower: &str) -> Option<DateExpr> {
    let tokens: Vec<&str> = lower.split_whitespace().collect();
    let mut idx = 0;
    let mut offsets = Vec::new();

    let anchor = match tokens.first().copied()? {
        "now" => {
            idx = 1;
            Anchor::Now
        }
        "today" | "midnight" => {
            idx = 1;
            Anchor::Today
        }
        "tomorrow" => {
            idx = 1;
            offsets.push((1, Unit::Day));
            Anchor::Today
        }
        "yesterday" => {
            idx = 1;
            offsets.push((-1, Unit::Day));
            Anchor::Today
        }
        word @ ("next" | "last" | "this") => {
            let direction = match word {
                "next" => Direction::Next,
                "last" => Direction::Last,
                _ => Direction::This,
            };
            let target = tokens.get(1)?;
            idx = 2;
            if let Ok(weekday) = Weekday::from_str(target) {
                Anchor::Weekday(weekday, direction)
            } else {
                let unit = parse_unit(target)?;
                let amount = match direction {
                    Direction::Next => 1,
                    Direction::Last => -1,
                    Direction::This => 0,
                };
                offsets.push((amount, unit));
                Anchor::Now
            }
        }
        first => {
            if let Some(date) = parse_date(first) {
                idx = 1;
                let time = tokens
                    .get(1)
                    .and_then(|t| parse_time(t))
                    .inspect(|_| idx = 2)
                    .unwrap_or(NaiveTime::MIN);
                Anchor::Fixed(date.and_time(time))
            } else if let Some(datetime) = parse_datetime(first) {
                idx = 1;
                Anchor::Fixed(datetime)
            } else if let Ok(weekday) = Weekday::from_str(first) {
                idx = 1;
                Anchor::Weekday(weekday, Direction::This)
            } else {
                Anchor::Now
            }
        }
    };

    while idx < tokens.len() {
        let (amount, unit, consumed) = parse_offset(&tokens[idx..])?;
        offsets.push((amount, unit));
        idx += consumed;
    }

    Some(DateExpr::Calendar { anchor, offsets })
}

/// `+3 days`, `-1 week`, `3 days ago`, `+2weeks`.
fn parse_offset(tokens: &[&str]) -> Option<(i64, Unit, usize)> {
    let first = tokens.first()?;
    let split = first
        .char_indices()
        .find(|(i, c)| c.is_ascii_alphabetic() && *i > 0)
        .map(|(i, _)| i);

    let (amount, unit, mut consumed) = match split {
        Some(i) => (parse_amount(&first[..i])?, parse_unit(&first[i..])?, 1),
        None => (parse_amount(first)?, parse_unit(tokens.get(1)?)?, 2),
    };

    let mut amount = amount;
    if tokens.get(consumed) == Some(&"ago") {
        amount = -amount;
        consumed += 1;
    }
    Some((amount, unit, consumed))
}

fn parse_amount(s: &str) -> Option<i64> {
    s.strip_prefix('+').unwrap_or(s).parse().ok()
}

fn parse_unit(s: &str) -> Option<Unit> {
    let unit = match s {
        "sec" | "secs" | "second" | "seconds" => Unit::Second,
        "min" | "mins" | "minute" | "minutes" => Unit::Minute,
        "hour" | "hours" => Unit::Hour,
        "day" | "days" => Unit::Day,
        "week" | "weeks" => Unit::Week,
        "fortnight" | "fortnights" => Unit::Fortnight,
        "month" | "months" => Unit::Month,
        "year" | "years" => Unit::Year,
        _ => return None,
    };
    Some(unit)
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%dt%H:%M:%S", "%Y-%m-%dt%H:%M", "%Y%m%dt%H%M%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

fn anchor_value(anchor: &Anchor, local_now: NaiveDateTime) -> NaiveDateTime {
    let today = local_now.date();
    match anchor {
        Anchor::Now => local_now,
        Anchor::Today => today.and_time(NaiveTime::MIN),
        Anchor::Fixed(value) => *value,
        Anchor::Weekday(weekday, direction) => {
            let current = i64::from(today.weekday().num_days_from_monday());
            let target = i64::from(weekday.num_days_from_monday());
            let days = match direction {
                Direction::This => (target - current).rem_euclid(7),
                Direction::Next => match (target - current).rem_euclid(7) {
                    0 => 7,
                    n => n,
                },
                Direction::Last => match (current - target).rem_euclid(7) {
                    0 => -7,
                    n => -n,
                },
            };
            (today + Duration::days(days)).and_time(NaiveTime::MIN)
        }
    }
}

fn apply_offset(value: NaiveDateTime, amount: i64, unit: Unit) -> Option<NaiveDateTime> {
    match unit {
        Unit::Second => value.checked_add_signed(Duration::seconds(amount)),
        Unit::Minute => value.checked_add_signed(Duration::minutes(amount)),
        Unit::Hour => value.checked_add_signed(Duration::hours(amount)),
        Unit::Day => value.checked_add_signed(Duration::days(amount)),
        Unit::Week => value.checked_add_signed(Duration::weeks(amount)),
        Unit::Fortnight => value.checked_add_signed(Duration::weeks(amount.checked_mul(2)?)),
        Unit::Month => shift_months(value, amount),
        Unit::Year => shift_months(value, amount.checked_mul(12)?),
    }
}

fn shift_months(value: NaiveDateTime, months: i64) -> Option<NaiveDateTime> {
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        value.checked_add_months(magnitude)
    } else {
        value.checked_sub_months(magnitude)
    }
}

fn local_to_utc(value: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    tz.from_local_datetime(&value)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| value.and_utc())
}
