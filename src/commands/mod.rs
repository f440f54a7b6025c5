pub mod export;
pub mod render;

use icalevents_core::fetch::SourceFetcher;
use icalevents_core::settings::Settings;

/// Fetcher rooted at the configured media directory.
pub fn fetcher(settings: &Settings) -> SourceFetcher {
    SourceFetcher::new(&settings.media_dir)
}

/// Decode a value as written into export links (form-urlencoded, so `+` is a
/// space and `%2B` a literal plus).
pub fn decode_query_value(input: &str) -> String {
    let query = format!("value={}", input.replace('&', "%26"));
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "value")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_query_value() {
        assert_eq!(decode_query_value("abc%40example.com"), "abc@example.com");
        assert_eq!(decode_query_value("a+b%2Bc"), "a b+c");
        assert_eq!(decode_query_value("100%"), "100%");
        assert_eq!(decode_query_value("%zz%4"), "%zz%4");
        assert_eq!(decode_query_value("caf%C3%A9"), "café");
        assert_eq!(decode_query_value("a&b=c"), "a&b=c");
    }
}
