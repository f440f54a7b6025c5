//! Retrieval of raw calendar bytes.

use std::path::{Component, Path, PathBuf};

use crate::error::{IcalEventsError, IcalEventsResult};

/// Source of raw calendar data.
pub trait Fetch {
    fn fetch(&self, source: &str) -> IcalEventsResult<Vec<u8>>;
}

/// Anything that isn't an `http://` or `https://` URL is a local media id.
pub fn is_local_source(source: &str) -> bool {
    let lower = source.trim().to_ascii_lowercase();
    !(lower.starts_with("http://") || lower.starts_with("https://"))
}

/// Reads media ids below `media_dir` and downloads URLs with a blocking client.
#[derive(Debug, Clone)]
pub struct SourceFetcher {
    media_dir: PathBuf,
}

impl SourceFetcher {
    pub fn new(media_dir: impl Into<PathBuf>) -> Self {
        SourceFetcher {
            media_dir: media_dir.into(),
        }
    }

    /// Map a media id (`calendars:team.ics`) to a path below the media root.
    /// Ids that would escape the root are rejected.
    pub fn media_path(&self, source: &str) -> Option<PathBuf> {
        let relative = source.trim().trim_start_matches(':').replace(':', "/");
        let relative = Path::new(&relative);

        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || relative.as_os_str().is_empty() {
            return None;
        }

        Some(self.media_dir.join(relative))
    }

    fn read_local(&self, source: &str) -> IcalEventsResult<Vec<u8>> {
        let not_found = || IcalEventsError::Fetch {
            source_id: source.to_string(),
            status: None,
        };

        let path = self.media_path(source).ok_or_else(not_found)?;
        std::fs::read(&path).map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Could not read media file");
            not_found()
        })
    }

    fn download(&self, url: &str) -> IcalEventsResult<Vec<u8>> {
        let transport_error = |e: reqwest::Error| {
            tracing::warn!(url, error = %e, "Request failed");
            IcalEventsError::Fetch {
                source_id: url.to_string(),
                status: e.status().map(|s| s.as_u16()),
            }
        };

        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("icalevents/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(transport_error)?;

        let response = client.get(url).send().map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(IcalEventsError::Fetch {
                source_id: url.to_string(),
                status: Some(status.as_u16()),
            });
        }

        let body = response.bytes().map_err(transport_error)?;
        Ok(body.to_vec())
    }
}

impl Fetch for SourceFetcher {
    #[tracing::instrument(skip(self))]
    fn fetch(&self, source: &str) -> IcalEventsResult<Vec<u8>> {
        let bytes = if is_local_source(source) {
            self.read_local(source)?
        } else {
            self.download(source.trim())?
        };
        tracing::debug!(bytes = bytes.len(), "Fetched source");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_source_detection() {
        assert!(!is_local_source("https://example.com/cal.ics"));
        assert!(!is_local_source("HTTP://example.com/cal.ics"));
        assert!(is_local_source("calendars:team.ics"));
        assert!(is_local_source("ftp://example.com/cal.ics"));
        assert!(is_local_source("//example.com/cal.ics"));
    }

    #[test]
    fn test_media_path() {
        let fetcher = SourceFetcher::new("/srv/media");

        assert_eq!(
            fetcher.media_path("calendars:team.ics"),
            Some(PathBuf::from("/srv/media/calendars/team.ics"))
        );
        assert_eq!(
            fetcher.media_path(":team.ics"),
            Some(PathBuf::from("/srv/media/team.ics"))
        );
        assert_eq!(fetcher.media_path("..:secret.ics"), None);
        assert_eq!(fetcher.media_path("/etc/passwd"), None);
    }

    #[test]
    fn test_reads_local_media() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        std::fs::create_dir(dir.path().join("calendars")).unwrap();
        std::fs::write(dir.path().join("calendars/team.ics"), b"BEGIN:VCALENDAR").unwrap();
        let fetcher = SourceFetcher::new(dir.path());

        let bytes = fetcher.fetch("calendars:team.ics").expect("Should read");
        assert_eq!(bytes, b"BEGIN:VCALENDAR");

        let missing = fetcher.fetch("calendars:missing.ics");
        assert!(matches!(
            missing,
            Err(IcalEventsError::Fetch { status: None, .. })
        ));
    }
}
