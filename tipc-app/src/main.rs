//! tipc demo shell.
//!
//! Starts the privileged side, opens a few simulated renderer windows and
//! drives the procedure catalog from them the way a front-end would.

mod demo;
mod functions;
mod renderer;
mod settings;
mod state;
mod windows;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use settings::{default_settings_path, load_settings, save_settings};
use state::Shell;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tipc-demo", version, about = "Typed IPC bridge demo shell")]
struct Cli {
    /// Settings file (defaults to the per-user app data directory).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set.
    #[arg(long)]
    debug: bool,

    /// Renderer windows to open.
    #[arg(long, default_value_t = 2)]
    windows: usize,

    /// How long subscriptions stay open, in milliseconds.
    #[arg(long, default_value_t = 250)]
    linger_ms: u64,

    /// Write the effective settings back to the settings file.
    #[arg(long)]
    write_settings: bool,
}

fn init_tracing(fallback: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new(settings::DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let settings = load_settings(&settings_path);

    // Target prefixes: `tipc` covers tipc_core, tipc_app and renderer logs.
    init_tracing(if cli.debug {
        "tipc=debug"
    } else {
        &settings.log_filter
    });
    info!(path = %settings_path.display(), "settings loaded");

    if cli.write_settings {
        save_settings(&settings_path, &settings)
            .with_context(|| format!("writing {}", settings_path.display()))?;
        info!(path = %settings_path.display(), "settings written");
    }

    let shell = Shell::start(&settings)?;
    let options = demo::DemoOptions {
        windows: cli.windows,
        linger: Duration::from_millis(cli.linger_ms),
    };
    let outcome = demo::run(&shell, &options).await;

    let stats = shell.diagnostics();
    info!(
        calls = stats.calls,
        queries = stats.queries,
        notifies = stats.notifies,
        streams = stats.streams,
        unknown_procedure = stats.unknown_procedure,
        handler_failures = stats.handler_failures,
        "dispatch totals"
    );
    shell.shutdown().await;

    let report = outcome?;
    info!(
        windows = report.windows_opened,
        final_counter = report.final_counter,
        pushes = ?report.pushes,
        windows_left = report.windows_left,
        "demo finished"
    );
    Ok(())
}
