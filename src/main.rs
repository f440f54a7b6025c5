mod commands;
mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "icalevents")]
#[command(about = "Render iCalendar events through text templates and export single events")]
struct Cli {
    /// Settings file (defaults to ~/.config/icalevents/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the events of a calendar source
    Render {
        /// URL (http/https) or media id such as "calendars:team.ics"
        source: String,

        /// Render flags, e.g. "from=today&to=+2 weeks&showAs=list&sort=desc"
        #[arg(short, long, default_value = "")]
        flags: String,

        /// Page the calendar is embedded in, appended to export links
        #[arg(long)]
        page_id: Option<String>,
    },
    /// Export one event (or one instance of a series) as .ics
    Export {
        /// URL (http/https) or media id such as "calendars:team.ics"
        source: String,

        /// UID of the event (percent-encoded values are decoded)
        #[arg(short, long)]
        uid: String,

        /// Instance date as YYYYMMDD; omit for the whole event
        #[arg(short, long)]
        recurrence_id: Option<String>,

        /// Page id used for the download file name
        #[arg(long)]
        page_id: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Render {
            source,
            flags,
            page_id,
        } => commands::render::run(&settings, &source, &flags, page_id.as_deref()),
        Commands::Export {
            source,
            uid,
            recurrence_id,
            page_id,
        } => commands::export::run(
            &settings,
            &source,
            &uid,
            recurrence_id.as_deref(),
            page_id.as_deref(),
        ),
    }
}
