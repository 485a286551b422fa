//! Jukebox: plays a queue of local files and internet radio streams.
//!
//! ## Modes
//! - `play`: play the given items in order, then exit.
//! - `console`: read control commands (`add`, `play`, `pause`, `skip`, `stop`, ...) from stdin.
//!
//! Settings come from an optional TOML file (`--config`); command-line flags override it.

mod cli;
mod config;
mod console;
mod runtime;

use anyhow::{Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,jukebox=info,jukebox_player=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let config = config::JukeboxConfig::from_args(&args)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        device = config.device.as_deref().unwrap_or("default"),
        queue_capacity = config.controller.queue_capacity,
        "jukebox starting"
    );

    match args.cmd {
        Some(cli::Command::Play { items }) => runtime::run_play(&config, args.null_output, items),
        Some(cli::Command::Console { items }) => {
            runtime::run_console(&config, args.null_output, items)
        }
        None => bail!("no command given (try `jukebox --help`)"),
    }
}
