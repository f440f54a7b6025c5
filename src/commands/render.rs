use anyhow::Result;
use chrono::Utc;
use icalevents_core::params::RenderParams;
use icalevents_core::render::render_source;
use icalevents_core::select::RenderSession;
use icalevents_core::settings::Settings;

pub fn run(settings: &Settings, source: &str, flags: &str, page_id: Option<&str>) -> Result<()> {
    let params = RenderParams::from_flags(flags);

    let mut settings = settings.clone();
    if let (Some(base), Some(page_id)) = (settings.export_url.as_mut(), page_id) {
        let separator = if base.contains('?') { '&' } else { '?' };
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("id", page_id)
            .finish();
        base.push(separator);
        base.push_str(&query);
    }

    let output = render_source(
        source,
        &params,
        &settings,
        &super::fetcher(&settings),
        &mut RenderSession::new(),
        Utc::now(),
    );

    print!("{}", output.text);
    tracing::debug!(cacheable = output.cacheable, "Rendered");

    if output.failed {
        println!();
        std::process::exit(1);
    }

    Ok(())
}
