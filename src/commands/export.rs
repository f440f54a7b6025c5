use anyhow::Result;
use icalevents_core::IcalEventsError;
use icalevents_core::export::export_event;
use icalevents_core::fetch::Fetch;
use icalevents_core::ics::parse;
use icalevents_core::select::RenderSession;
use icalevents_core::settings::Settings;

use super::decode_query_value;

/// Print the export as a response: headers, a blank line, then the body.
pub fn run(
    settings: &Settings,
    source: &str,
    uid: &str,
    recurrence_id: Option<&str>,
    page_id: Option<&str>,
) -> Result<()> {
    let uid = decode_query_value(uid);
    let recurrence_id = recurrence_id.map(decode_query_value);

    let bytes = super::fetcher(settings).fetch(source)?;
    let document = parse(&bytes)?;

    let result = export_event(
        &document,
        &uid,
        recurrence_id.as_deref(),
        &settings.resolver(),
        &mut RenderSession::new(),
        page_id,
    );

    match result {
        Ok(response) => {
            println!("Content-Type: {}", response.content_type);
            println!("Content-Disposition: {}", response.content_disposition);
            println!();
            print!("{}", response.body);
            Ok(())
        }
        Err(e @ IcalEventsError::NotFound { .. }) => {
            tracing::info!(error = %e, "Export lookup failed");
            println!("{} Not Found", e.status_code());
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}
