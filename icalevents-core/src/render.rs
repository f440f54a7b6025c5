//! The render pipeline: fetch, parse, expand, select, substitute.

use chrono::{DateTime, Utc};

use crate::error::IcalEventsResult;
use crate::fetch::{Fetch, is_local_source};
use crate::ics::parse;
use crate::params::RenderParams;
use crate::recurrence::expand_document;
use crate::select::{RenderSession, select};
use crate::settings::Settings;
use crate::template::{RenderContext, render_all};

/// Rendered text plus whether it may be cached by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
    pub text: String,
    /// False for local sources, for windows relative to "now" and for errors
    pub cacheable: bool,
    /// True when `text` is an inline error message
    pub failed: bool,
}

/// Render one calendar source.
///
/// Failures to fetch or parse the source, or to resolve the window, produce a
/// single `Error: ...` line instead of partial output.
#[tracing::instrument(skip(params, settings, fetcher, session), fields(show_as = %params.show_as))]
pub fn render_source(
    source: &str,
    params: &RenderParams,
    settings: &Settings,
    fetcher: &dyn Fetch,
    session: &mut RenderSession,
    now: DateTime<Utc>,
) -> RenderOutput {
    match try_render(source, params, settings, fetcher, session, now) {
        Ok((text, has_relative_range)) => RenderOutput {
            text,
            cacheable: !is_local_source(source) && !has_relative_range,
            failed: false,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Render failed");
            RenderOutput {
                text: e.inline_message(),
                cacheable: false,
                failed: true,
            }
        }
    }
}

fn try_render(
    source: &str,
    params: &RenderParams,
    settings: &Settings,
    fetcher: &dyn Fetch,
    session: &mut RenderSession,
    now: DateTime<Utc>,
) -> IcalEventsResult<(String, bool)> {
    let resolver = settings.resolver();
    let resolved = params.window(now, resolver.local())?;
    tracing::debug!(from = ?resolved.window.from, to = %resolved.window.to, "Resolved window");

    let bytes = fetcher.fetch(source)?;
    let document = parse(&bytes)?;

    let occurrences = expand_document(&document, &resolved.window, &resolver);
    let selected = select(occurrences, params.sort, params.max_entries, session);
    tracing::debug!(selected = selected.len(), "Selected occurrences");

    let ctx = RenderContext {
        resolver: &resolver,
        date_format: params
            .date_format
            .clone()
            .unwrap_or_else(|| settings.date_format.clone()),
        time_format: params
            .time_format
            .clone()
            .unwrap_or_else(|| settings.time_format.clone()),
        show_end_dates: params.show_end_dates,
        medium: settings.medium,
        location_url_prefix: settings.location_prefix().map(str::to_string),
        export_url: settings.export_url.clone(),
    };

    let text = render_all(settings.template_for(&params.show_as), &selected, &ctx);
    Ok((text, resolved.has_relative_range))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IcalEventsError;
    use chrono::TimeZone;

    struct StaticFetcher(&'static str);

    impl Fetch for StaticFetcher {
        fn fetch(&self, source: &str) -> IcalEventsResult<Vec<u8>> {
            if source.contains("missing") {
                return Err(IcalEventsError::Fetch {
                    source_id: source.to_string(),
                    status: Some(404),
                });
            }
            Ok(self.0.as_bytes().to_vec())
        }
    }

    const FEED: &str = "BEGIN:VCALENDAR\r\n\
        VERSION:2.0\r\n\
        PRODID:TEST\r\n\
        BEGIN:VEVENT\r\n\
        UID:t1\r\n\
        SUMMARY:First\r\n\
        DTSTART:20240102T090000Z\r\n\
        DTEND:20240102T100000Z\r\n\
        END:VEVENT\r\n\
        BEGIN:VEVENT\r\n\
        UID:t2\r\n\
        SUMMARY:Second\r\n\
        DTSTART:20240103T090000Z\r\n\
        DTEND:20240103T100000Z\r\n\
        END:VEVENT\r\n\
        END:VCALENDAR\r\n";

    fn settings() -> Settings {
        let mut settings = Settings {
            timezone: Some("UTC".to_string()),
            medium: crate::template::OutputMedium::Plain,
            ..Settings::default()
        };
        settings
            .templates
            .insert("default".to_string(), "{date} {summary}".to_string());
        settings
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_renders_sorted_lines() {
        let params = RenderParams::from_flags("from=2024-01-01&to=2024-02-01&sort=desc");
        let output = render_source(
            "https://example.com/cal.ics",
            &params,
            &settings(),
            &StaticFetcher(FEED),
            &mut RenderSession::new(),
            now(),
        );

        assert_eq!(
            output.text,
            "2024/01/03 09:00 - 10:00 Second\n2024/01/02 09:00 - 10:00 First\n"
        );
        assert!(output.cacheable);
        assert!(!output.failed);
    }

    #[test]
    fn test_relative_or_local_is_not_cacheable() {
        let relative = render_source(
            "https://example.com/cal.ics",
            &RenderParams::from_flags("from=today"),
            &settings(),
            &StaticFetcher(FEED),
            &mut RenderSession::new(),
            now(),
        );
        assert!(!relative.cacheable);

        let local = render_source(
            "calendars:team.ics",
            &RenderParams::from_flags("from=2024-01-01&to=2024-02-01"),
            &settings(),
            &StaticFetcher(FEED),
            &mut RenderSession::new(),
            now(),
        );
        assert!(!local.cacheable);
        assert_eq!(local.text.lines().count(), 2);
    }

    #[test]
    fn test_errors_render_inline() {
        let params = RenderParams::from_flags("from=2024-01-01&to=2024-02-01");

        let fetch_failure = render_source(
            "https://example.com/missing.ics",
            &params,
            &settings(),
            &StaticFetcher(FEED),
            &mut RenderSession::new(),
            now(),
        );
        assert_eq!(
            fetch_failure.text,
            "Error: could not get https://example.com/missing.ics, HTTP status 404"
        );

        let malformed = render_source(
            "https://example.com/cal.ics",
            &params,
            &settings(),
            &StaticFetcher("BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nEND:VCALENDAR\r\n"),
            &mut RenderSession::new(),
            now(),
        );
        assert!(malformed.failed);
        assert!(malformed.text.starts_with("Error: invalid iCalendar input"));
        assert!(!malformed.text.contains('\n'));
    }

    #[test]
    fn test_session_shared_between_renders() {
        let params = RenderParams::from_flags("from=2024-01-01&to=2024-02-01&maxNumberOfEntries=1");
        let mut session = RenderSession::new();

        let first = render_source("https://example.com/cal.ics", &params, &settings(), &StaticFetcher(FEED), &mut session, now());
        let second = render_source("https://example.com/cal.ics", &params, &settings(), &StaticFetcher(FEED), &mut session, now());

        assert!(first.text.ends_with("First\n"));
        assert!(second.text.ends_with("Second\n"));
    }

    #[test]
    fn test_renders_recurring_media_file() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        std::fs::write(
            dir.path().join("weekly.ics"),
            "BEGIN:VCALENDAR\r\n\
             VERSION:2.0\r\n\
             PRODID:TEST\r\n\
             BEGIN:VEVENT\r\n\
             UID:weekly@example\r\n\
             SUMMARY:Planning\r\n\
             DTSTART:20240101T090000Z\r\n\
             DTEND:20240101T100000Z\r\n\
             RRULE:FREQ=WEEKLY;COUNT=4\r\n\
             EXDATE:20240108T090000Z\r\n\
             END:VEVENT\r\n\
             END:VCALENDAR\r\n",
        )
        .expect("Should write feed");

        let output = render_source(
            "weekly.ics",
            &RenderParams::from_flags("from=2024-01-01&to=2024-02-01"),
            &settings(),
            &crate::fetch::SourceFetcher::new(dir.path()),
            &mut RenderSession::new(),
            now(),
        );

        assert!(!output.failed);
        assert!(!output.cacheable);
        assert_eq!(
            output.text,
            "2024/01/01 09:00 - 10:00 Planning\n\
             2024/01/15 09:00 - 10:00 Planning\n\
             2024/01/22 09:00 - 10:00 Planning\n"
        );
    }
}
