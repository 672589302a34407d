//! tabsync - watch dashboard views from the terminal.
//!
//! Drives the sync engine against a live backend: one-shot fetches of a
//! view, or a long-running watch that prints every refresh as a JSON line
//! until interrupted.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde_json::json;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tabsync_core::{AppConfig, HttpClient, SyncEvent, ViewController, ViewSpec, ViewTable};

const USAGE: &str = "\
Usage: tabsync [--config <path>] [--log-dir <dir>] <command>

Commands:
  views               List configured views
  fetch <view>        Load one view and print its payload
  watch <view>...     Enter views and print every refresh until Ctrl+C";

/// Log file name prefix inside `--log-dir`; files roll daily.
const LOG_FILE_PREFIX: &str = "tabsync.log";

#[derive(Debug, PartialEq)]
enum Command {
    Views,
    Fetch(String),
    Watch(Vec<String>),
}

#[derive(Debug, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    command: Command,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Args> {
    let mut config = None;
    let mut log_dir = None;
    let mut positional = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config = Some(PathBuf::from(args.next().context("--config needs a path")?));
            }
            "--log-dir" => {
                log_dir = Some(PathBuf::from(args.next().context("--log-dir needs a directory")?));
            }
            "-h" | "--help" => bail!("{}", USAGE),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("views") => Command::Views,
        Some("fetch") => match positional.next() {
            Some(view) => Command::Fetch(view),
            None => bail!("fetch needs a view\n\n{}", USAGE),
        },
        Some("watch") => {
            let views: Vec<String> = positional.collect();
            if views.is_empty() {
                bail!("watch needs at least one view\n\n{}", USAGE);
            }
            Command::Watch(views)
        }
        Some(other) => bail!("unknown command: {}\n\n{}", other, USAGE),
        None => bail!("{}", USAGE),
    };

    Ok(Args {
        config,
        log_dir,
        command,
    })
}

/// Initialize the tracing subscriber for logging.
/// Logs go to stderr unless a log directory is given. The returned guard must
/// be held until exit so buffered file output is flushed.
fn init_tracing(log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    config.apply_env();
    Ok(config)
}

fn build_table(config: &AppConfig) -> Result<ViewTable> {
    let client = HttpClient::from_config(config)?;
    Ok(config
        .effective_views()
        .iter()
        .map(|entry| ViewSpec::from_entry(entry, &config.sync, Arc::new(client.for_view(entry))))
        .collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = parse_args(std::env::args().skip(1))?;
    let _log_guard = init_tracing(args.log_dir.as_ref());

    let config = load_config(args.config.as_ref())?;
    info!(base_url = %config.base_url, "tabsync starting");

    match args.command {
        Command::Views => list_views(&config),
        Command::Fetch(view) => fetch(&config, &view).await,
        Command::Watch(views) => watch(&config, &views).await,
    }
}

fn list_views(config: &AppConfig) -> Result<()> {
    for entry in config.effective_views() {
        let poll = entry
            .poll_interval_ms
            .map(|ms| format!("every {}s", ms / 1000))
            .unwrap_or_else(|| "manual".to_string());
        let scopes: Vec<&str> = entry.editable.keys().map(String::as_str).collect();
        println!(
            "{:<18} {:<36} {:<10} {}",
            entry.key,
            entry.path,
            poll,
            scopes.join(",")
        );
    }
    Ok(())
}

async fn fetch(config: &AppConfig, view: &str) -> Result<()> {
    let controller = ViewController::new(config.sync.clone());
    controller.register_all(build_table(config)?)?;

    let result = controller.enter(view).await;
    controller.teardown();

    let outcome = result.map_err(|e| anyhow::anyhow!(e.user_message()))?;
    let payload = outcome.into_payload().unwrap_or_default();
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

async fn watch(config: &AppConfig, views: &[String]) -> Result<()> {
    let controller = ViewController::new(config.sync.clone());
    controller.register_all(build_table(config)?)?;
    let mut events = controller
        .take_events()
        .context("Event channel already taken")?;

    for view in views {
        // Failures are reported as events; only an unknown view is fatal here
        if let Err(e @ tabsync_core::SyncError::UnknownView(_)) = controller.enter(view).await {
            controller.teardown();
            return Err(e.into());
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => {
                    error!("Event channel closed");
                    break;
                }
            },
        }
    }

    for view in views {
        controller.exit(view);
    }
    controller.teardown();
    Ok(())
}

fn print_event(event: &SyncEvent) {
    let line = match event {
        SyncEvent::Updated {
            view,
            payload,
            silent,
        } => json!({
            "at": Utc::now().to_rfc3339(),
            "view": view,
            "silent": silent,
            "payload": payload,
        }),
        SyncEvent::Failed { view, error } => json!({
            "at": Utc::now().to_rfc3339(),
            "view": view,
            "error": error.user_message(),
        }),
    };
    println!("{}", line);
}
