//! Installation settings.
//!
//! Read from an optional TOML file, then overridden by `ICALEVENTS_*`
//! environment variables (e.g. `ICALEVENTS_TIMEZONE=Europe/Berlin`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{IcalEventsError, IcalEventsResult};
use crate::template::{DEFAULT_DATE_FORMAT, DEFAULT_TIME_FORMAT, OutputMedium};
use crate::timezone::TimeZoneResolver;

pub const DEFAULT_TEMPLATE: &str = "=== {date}: {summary} ===\n**Location**: {location_link}\\\\ \n{description}";
pub const LIST_TEMPLATE: &str = "  * {date}: {summary} {summary_link}";
pub const TABLE_TEMPLATE: &str =
    "| {date} | {summary} | {description} | {location_link} | {summary_link} |";
pub const TABLE_WITHOUT_DESCRIPTION_TEMPLATE: &str =
    "| {date} | {summary} | {location_link} | {summary_link} |";

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

fn default_time_format() -> String {
    DEFAULT_TIME_FORMAT.to_string()
}

fn default_media_dir() -> PathBuf {
    PathBuf::from(".")
}

fn builtin_template(show_as: &str) -> Option<&'static str> {
    match show_as {
        "default" => Some(DEFAULT_TEMPLATE),
        "list" => Some(LIST_TEMPLATE),
        "table" => Some(TABLE_TEMPLATE),
        "table_without_description" => Some(TABLE_WITHOUT_DESCRIPTION_TEMPLATE),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// strftime-style pattern for dates
    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// strftime-style pattern for times
    #[serde(default = "default_time_format")]
    pub time_format: String,

    /// Map provider prefix for `{location_link}`, e.g. `https://maps.google.com/maps?q=`
    #[serde(default)]
    pub location_url_prefix: Option<String>,

    /// Overrides `location_url_prefix` when non-blank
    #[serde(default)]
    pub custom_location_url_prefix: Option<String>,

    /// IANA name of the rendering timezone; the system zone when unset
    #[serde(default)]
    pub timezone: Option<String>,

    /// Root directory for local (non-URL) sources
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,

    /// Base URL that `{summary_link}` points at
    #[serde(default)]
    pub export_url: Option<String>,

    #[serde(default)]
    pub medium: OutputMedium,

    /// Templates keyed by `showAs` value
    #[serde(default)]
    pub templates: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            date_format: default_date_format(),
            time_format: default_time_format(),
            location_url_prefix: None,
            custom_location_url_prefix: None,
            timezone: None,
            media_dir: default_media_dir(),
            export_url: None,
            medium: OutputMedium::default(),
            templates: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from `path` (if it exists) and the environment.
    pub fn load(path: Option<&Path>) -> IcalEventsResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.to_path_buf()).required(false));
        }

        let settings: Settings = builder
            .add_source(Environment::with_prefix("ICALEVENTS"))
            .build()
            .map_err(|e| IcalEventsError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| IcalEventsError::Config(e.to_string()))?;

        tracing::debug!(
            timezone = ?settings.timezone,
            media_dir = %settings.media_dir.display(),
            templates = settings.templates.len(),
            "Loaded settings"
        );

        Ok(settings)
    }

    /// Template for a `showAs` value. Configured templates win over the
    /// built-in ones; unknown names fall back to `default`. Names are
    /// case-insensitive since config keys are lowercased.
    pub fn template_for(&self, show_as: &str) -> &str {
        let show_as = show_as.to_ascii_lowercase();
        self.templates
            .get(&show_as)
            .map(String::as_str)
            .or_else(|| builtin_template(&show_as))
            .or_else(|| self.templates.get("default").map(String::as_str))
            .unwrap_or(DEFAULT_TEMPLATE)
    }

    /// The custom prefix when set, else the selected provider prefix.
    pub fn location_prefix(&self) -> Option<&str> {
        self.custom_location_url_prefix
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .or_else(|| {
                self.location_url_prefix
                    .as_deref()
                    .filter(|p| !p.trim().is_empty())
            })
    }

    pub fn resolver(&self) -> TimeZoneResolver {
        TimeZoneResolver::for_setting(self.timezone.as_deref())
    }
}
