use std::path::PathBuf;

use clap::{Parser, Subcommand};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "jukebox", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of items the queue can hold
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Directory that local locators are resolved against
    #[arg(long)]
    pub library_root: Option<PathBuf>,

    /// Decode without opening an output device
    #[arg(long)]
    pub null_output: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play the given items in order, then exit
    Play {
        /// Local paths or http(s) URLs
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Read control commands from stdin (`help` lists them)
    Console {
        /// Items to enqueue before reading commands
        items: Vec<String>,
    },
}
