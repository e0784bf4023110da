//! spirits - browse the spirits catalog from the terminal.
//!
//! On every start the catalog is synchronized with its data source (unless
//! offline), then the requested command reads from the local cache.

mod output;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use spirits_core::models::build_menu;
use spirits_core::{
    catalog_schema, select_strategy, Config, DataStrategy, HttpFetcher, ResourceFetcher, Spirit,
    SpiritOrder, StorageMode, SyncFlow, SyncOutcome,
};
use spirits_core::store::Filter;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Directory for an additional log file, unset to log to stderr only
const LOG_DIR_ENV: &str = "SPIRITS_LOG_DIR";

const LOG_FILE_PREFIX: &str = "spirits.log";

const USAGE: &str = "\
Usage: spirits [--offline] [--ephemeral] [--json] <command>

Commands:
  menu                       List series, characters and forms
  show <firstname> <form>    Show one form of a character (form as in the menu URL)
  show '#spirits/<firstname>/<form>'
  series <name>              List the stored forms of one series
  refresh                    Clear cached data and images, then import again
  status                     Show storage and import status

Options:
  --offline      Do not contact the data source
  --ephemeral    Keep everything in memory for this run
  --json         Print JSON instead of text";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Menu,
    Show { firstname: String, form_url: String },
    Series(String),
    Refresh,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Cli {
    offline: bool,
    ephemeral: bool,
    json: bool,
    command: Command,
}

fn parse_args<I>(args: I) -> Result<Cli, String>
where
    I: IntoIterator<Item = String>,
{
    let mut offline = false;
    let mut ephemeral = false;
    let mut json = false;
    let mut positional = Vec::new();

    for arg in args {
        match arg.as_str() {
            "--offline" => offline = true,
            "--ephemeral" => ephemeral = true,
            "--json" => json = true,
            flag if flag.starts_with("--") => return Err(format!("unknown option '{}'", flag)),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("menu") => Command::Menu,
        Some("show") => match (positional.next(), positional.next()) {
            (Some(firstname), Some(form_url)) => Command::Show { firstname, form_url },
            (Some(route), None) => {
                parse_route(&route).ok_or_else(|| format!("invalid route '{}'", route))?
            }
            _ => return Err("show needs a firstname and a form".to_string()),
        },
        Some("series") => {
            Command::Series(positional.next().ok_or("series needs a series name")?)
        }
        Some("refresh") => Command::Refresh,
        Some("status") => Command::Status,
        Some(other) => return Err(format!("unknown command '{}'", other)),
        None => return Err("missing command".to_string()),
    };

    if let Some(extra) = positional.next() {
        return Err(format!("unexpected argument '{}'", extra));
    }

    Ok(Cli {
        offline,
        ephemeral,
        json,
        command,
    })
}

/// `#spirits/<firstname>/<form url>`, both parts made of word characters.
fn parse_route(route: &str) -> Option<Command> {
    let rest = route.strip_prefix("#spirits/")?;
    let (firstname, form_url) = rest.split_once('/')?;
    let is_word = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_');
    if !is_word(firstname) || !is_word(form_url) {
        return None;
    }
    Some(Command::Show {
        firstname: firstname.to_string(),
        form_url: form_url.to_string(),
    })
}

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(PathBuf::from(dir), LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = match parse_args(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(message) => {
            eprintln!("Error: {}\n\n{}", message, USAGE);
            std::process::exit(2);
        }
    };

    let _log_guard = init_tracing();
    info!("spirits starting");

    let mut config = Config::load()?;
    if cli.offline {
        config.offline = true;
    }
    if cli.ephemeral {
        config.storage = StorageMode::Ephemeral;
    }

    let fetcher: Arc<dyn ResourceFetcher> = Arc::new(HttpFetcher::new()?);
    let cache_dir = config.cache_dir()?;
    let store: Arc<dyn DataStrategy<Spirit>> =
        select_strategy(catalog_schema(), &cache_dir, config.storage, Arc::clone(&fetcher)).await;

    if cli.command == Command::Status {
        return output::print_status(store.as_ref(), &cache_dir, cli.json).await;
    }

    if cli.command == Command::Refresh {
        tokio::try_join!(store.clear_data(), store.clear_blobs())
            .context("Failed to clear the local cache")?;
        eprintln!("Cleared cached data and images");
    }

    let report = SyncFlow::new(Arc::clone(&store), fetcher)
        .with_source(config.data_source()?)
        .online(!config.offline)
        .run()
        .await
        .context("Critical error")?;
    if report.failed > 0 {
        warn!(failed = report.failed, "Some records could not be imported");
    }
    match &report.outcome {
        SyncOutcome::SourceUnavailable { reason } => {
            eprintln!("Warning: using cached data, the data source is unavailable ({})", reason);
        }
        SyncOutcome::Skipped { reason } => {
            eprintln!("Warning: using cached data, the update was skipped ({})", reason);
        }
        _ => {}
    }

    match cli.command {
        Command::Menu => {
            let all = store.search_data(None).await?;
            let order = SpiritOrder::from_spirits(&all);
            let menu = build_menu(store.as_ref(), &order).await?;
            output::print_menu(&menu, cli.json)
        }
        Command::Show {
            firstname,
            form_url,
        } => {
            let forms = store
                .search_data(Some(&Filter::new("firstname", firstname.as_str())))
                .await?;
            let spirit = forms
                .into_iter()
                .find(|spirit| spirit.form.url == form_url)
                .ok_or_else(|| anyhow::anyhow!("Could not find {} {}", form_url, firstname))?;
            output::print_spirit(store.as_ref(), &spirit, cli.json).await
        }
        Command::Series(series) => {
            let spirits = store
                .search_data(Some(&Filter::new("series", series.as_str())))
                .await?;
            output::print_series(&series, &spirits, cli.json)
        }
        Command::Refresh => output::print_sync(&report, cli.json),
        Command::Status => Ok(()),
    }
}
