//! Template rendering for occurrences.
//!
//! Templates are plain text with `{placeholder}` tokens. Substitution is a
//! single left-to-right pass, so text coming from the feed is never scanned
//! for further placeholders.

use std::fmt::{Display, Write};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::occurrence::Occurrence;
use crate::timezone::TimeZoneResolver;

pub const DEFAULT_DATE_FORMAT: &str = "%Y/%m/%d";
pub const DEFAULT_TIME_FORMAT: &str = "%H:%M";

/// Shown for `{location}` and `{location_link}` when the event has no location.
pub const UNKNOWN_LOCATION: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Date,
    Summary,
    SummaryLink,
    Location,
    LocationLink,
    Description,
}

impl Placeholder {
    pub const ALL: [Placeholder; 6] = [
        Placeholder::Date,
        Placeholder::Summary,
        Placeholder::SummaryLink,
        Placeholder::Location,
        Placeholder::LocationLink,
        Placeholder::Description,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            Placeholder::Date => "{date}",
            Placeholder::Summary => "{summary}",
            Placeholder::SummaryLink => "{summary_link}",
            Placeholder::Location => "{location}",
            Placeholder::LocationLink => "{location_link}",
            Placeholder::Description => "{description}",
        }
    }

    fn value(&self, occurrence: &Occurrence<'_>, ctx: &RenderContext<'_>) -> String {
        let event = occurrence.event;
        let medium = ctx.medium;
        match self {
            Placeholder::Date => when(occurrence, ctx),
            Placeholder::Summary => medium.text(&event.summary),
            Placeholder::Description => match event.description.as_deref() {
                Some(desc) if !desc.is_empty() => medium.text(desc),
                _ => String::new(),
            },
            Placeholder::Location => match event.location.as_deref() {
                Some(loc) if !loc.is_empty() => medium.raw(loc),
                _ => UNKNOWN_LOCATION.to_string(),
            },
            Placeholder::LocationLink => match event.location.as_deref() {
                Some(loc) if !loc.is_empty() => match ctx.location_url(loc) {
                    Some(url) => medium.link(&url, loc),
                    None => medium.raw(loc),
                },
                _ => UNKNOWN_LOCATION.to_string(),
            },
            Placeholder::SummaryLink => match ctx.export_link(occurrence) {
                Some(url) => medium.link(&url, &event.summary),
                None => medium.text(&event.summary),
            },
        }
    }
}

/// Markup flavour of the rendered output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMedium {
    #[default]
    Wiki,
    Html,
    Plain,
}

impl FromStr for OutputMedium {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wiki" => Ok(OutputMedium::Wiki),
            "html" | "xhtml" => Ok(OutputMedium::Html),
            "plain" | "text" => Ok(OutputMedium::Plain),
            other => Err(format!("unknown output medium: {other}")),
        }
    }
}

impl OutputMedium {
    /// Feed text with line breaks in the medium's syntax.
    pub fn text(&self, s: &str) -> String {
        match self {
            OutputMedium::Wiki => {
                let cleaned = remove_ignore_ascii_case(s, "</nowiki>");
                format!(
                    "<nowiki>{}</nowiki>",
                    cleaned.replace('\n', "</nowiki>\\\\ <nowiki>")
                )
            }
            OutputMedium::Html => escape_html(s).replace('\n', "<br />"),
            OutputMedium::Plain => s.to_string(),
        }
    }

    /// Feed text that is inserted without line break handling.
    pub fn raw(&self, s: &str) -> String {
        match self {
            OutputMedium::Html => escape_html(s),
            OutputMedium::Wiki | OutputMedium::Plain => s.to_string(),
        }
    }

    pub fn link(&self, url: &str, text: &str) -> String {
        match self {
            OutputMedium::Wiki => format!("[[{url}|{text}]]"),
            OutputMedium::Html => format!(
                "<a href=\"{}\" rel=\"nofollow\">{}</a>",
                escape_html(url),
                escape_html(text).replace('\n', "<br />")
            ),
            OutputMedium::Plain => format!("{text} <{url}>"),
        }
    }
}

/// Everything the renderer needs besides the template and the occurrence.
#[derive(Debug, Clone)]
pub struct RenderContext<'r> {
    pub resolver: &'r TimeZoneResolver,
    pub date_format: String,
    pub time_format: String,
    pub show_end_dates: bool,
    pub medium: OutputMedium,
    /// Prefix for `{location_link}`; no link when `None`
    pub location_url_prefix: Option<String>,
    /// Base URL for `{summary_link}`; the summary is not linked when `None`
    pub export_url: Option<String>,
}

impl<'r> RenderContext<'r> {
    pub fn new(resolver: &'r TimeZoneResolver) -> Self {
        RenderContext {
            resolver,
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            show_end_dates: false,
            medium: OutputMedium::default(),
            location_url_prefix: None,
            export_url: None,
        }
    }

    fn location_url(&self, location: &str) -> Option<String> {
        let prefix = self.location_url_prefix.as_deref().filter(|p| !p.is_empty())?;
        let encoded: String =
            url::form_urlencoded::byte_serialize(location.replace('\n', " ").as_bytes()).collect();
        Some(format!("{prefix}{encoded}"))
    }

    fn export_link(&self, occurrence: &Occurrence<'_>) -> Option<String> {
        let base = self.export_url.as_deref().filter(|u| !u.is_empty())?;
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("uid", occurrence.uid())
            .append_pair(
                "recurrence-id",
                occurrence.recurrence_id.as_deref().unwrap_or_default(),
            )
            .finish();
        let separator = if base.contains('?') { '&' } else { '?' };
        Some(format!("{base}{separator}{query}"))
    }

    fn format_date(&self, date: NaiveDate) -> String {
        format_or_default(date.format(&self.date_format), || {
            date.format(DEFAULT_DATE_FORMAT).to_string()
        })
    }

    fn format_time(&self, time: chrono::NaiveDateTime) -> String {
        format_or_default(time.format(&self.time_format), || {
            time.format(DEFAULT_TIME_FORMAT).to_string()
        })
    }
}

/// Substitute every placeholder in `template` for one occurrence.
pub fn render(template: &str, occurrence: &Occurrence<'_>, ctx: &RenderContext<'_>) -> String {
    let mut out = String::with_capacity(template.len() * 2);
    let mut rest = template;

    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match Placeholder::ALL.iter().find(|p| tail.starts_with(p.token())) {
            Some(placeholder) => {
                out.push_str(&placeholder.value(occurrence, ctx));
                rest = &tail[placeholder.token().len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);

    out
}

/// Render all occurrences, one template instance per line.
pub fn render_all(template: &str, occurrences: &[Occurrence<'_>], ctx: &RenderContext<'_>) -> String {
    occurrences
        .iter()
        .map(|occ| render(template, occ, ctx) + "\n")
        .collect()
}

/// `{date}`: start, then ` - ` and the end when there is anything to show.
/// The end date is only repeated when it differs from the start date (or when
/// end dates are forced). All-day occurrences show dates only.
fn when(occurrence: &Occurrence<'_>, ctx: &RenderContext<'_>) -> String {
    let (start_date, end_date) = occurrence.local_dates(ctx.resolver);

    let (start_time, end_time) = if occurrence.all_day {
        (String::new(), String::new())
    } else {
        (
            ctx.format_time(ctx.resolver.to_local(occurrence.start)),
            ctx.format_time(ctx.resolver.to_local(occurrence.end)),
        )
    };

    let start_date = ctx.format_date(start_date);
    let end_date = ctx.format_date(end_date);

    let start = join_nonempty(&start_date, &start_time);
    let end = if end_date != start_date || ctx.show_end_dates {
        join_nonempty(&end_date, &end_time)
    } else {
        end_time
    };

    if end.is_empty() {
        start
    } else {
        format!("{start} - {end}")
    }
}

fn join_nonempty(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (_, true) => a.to_string(),
        (true, false) => b.to_string(),
        (false, false) => format!("{a} {b}"),
    }
}

/// chrono reports invalid user-supplied format strings as a formatting error.
fn format_or_default(item: impl Display, fallback: impl FnOnce() -> String) -> String {
    let mut out = String::new();
    match write!(out, "{item}") {
        Ok(()) => out,
        Err(_) => {
            tracing::warn!("Invalid date/time format, using default");
            fallback()
        }
    }
}

fn remove_ignore_ascii_case(haystack: &str, needle: &str) -> String {
    let lower = haystack.to_ascii_lowercase();
    let mut out = String::with_capacity(haystack.len());
    let mut last = 0;
    for (idx, _) in lower.match_indices(needle) {
        out.push_str(&haystack[last..idx]);
        last = idx + needle.len();
    }
    out.push_str(&haystack[last..]);
    out
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
