//! Render parameters parsed from a tag's flag string.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::date_range::{QueryWindow, ResolvedWindow};
use crate::error::IcalEventsResult;
use crate::select::Sort;

/// Options for one render, parsed from a query string such as
/// `from=today&to=%2B2%20weeks&showAs=list&sort=desc`.
///
/// Legacy names are still accepted. Where two names exist the current one wins:
/// - `maxNumberOfEntries`, then `numberOfEntries`; default unlimited (`-1`)
/// - `showAs`, then `showAsList=1` (meaning `list`); default `default`
/// - `to`, then `previewDays=N` (meaning `+N days`); default `+30 days`
/// - `dformat`/`tformat` override the configured date/time formats
#[derive(Debug, Clone, PartialEq)]
pub struct RenderParams {
    pub from: Option<String>,
    pub to: Option<String>,
    /// Negative means unlimited
    pub max_entries: i64,
    pub show_as: String,
    pub show_end_dates: bool,
    pub sort: Sort,
    pub date_format: Option<String>,
    pub time_format: Option<String>,
}

impl Default for RenderParams {
    fn default() -> Self {
        RenderParams {
            from: None,
            to: None,
            max_entries: -1,
            show_as: "default".to_string(),
            show_end_dates: false,
            sort: Sort::default(),
            date_format: None,
            time_format: None,
        }
    }
}

impl RenderParams {
    pub fn from_flags(flags: &str) -> Self {
        let flags = flags.trim().trim_start_matches(['#', '?']);
        let raw: HashMap<String, String> = url::form_urlencoded::parse(flags.as_bytes())
            .into_owned()
            .collect();
        let get = |key: &str| raw.get(key).map(String::as_str).filter(|v| !v.is_empty());

        let max_entries = get("maxNumberOfEntries")
            .or_else(|| get("numberOfEntries"))
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(-1);

        let show_as = match get("showAs") {
            Some(show_as) => show_as.to_string(),
            None if get("showAsList").is_some_and(is_truthy) => "list".to_string(),
            None => "default".to_string(),
        };

        let to = match (get("to"), get("previewDays")) {
            (Some(to), _) => Some(to.to_string()),
            (None, Some(days)) => Some(format!("+{} days", days.trim())),
            (None, None) => None,
        };

        let sort = get("sort")
            .map(|s| {
                s.parse::<Sort>().unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Ignoring sort parameter");
                    Sort::default()
                })
            })
            .unwrap_or_default();

        RenderParams {
            from: get("from").map(str::to_string),
            to,
            max_entries,
            show_as,
            show_end_dates: get("showEndDates").is_some_and(is_truthy),
            sort,
            date_format: get("dformat").map(str::to_string),
            time_format: get("tformat").map(str::to_string),
        }
    }

    /// Resolve `from`/`to` into a query window.
    pub fn window(&self, now: DateTime<Utc>, tz: Tz) -> IcalEventsResult<ResolvedWindow> {
        QueryWindow::from_expressions(self.from.as_deref(), self.to.as_deref(), now, tz)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}
