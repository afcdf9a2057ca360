//! Stillwatch CLI: run the engine against a camera device or a synthetic
//! scene and inspect its persisted state.
//!
//! Usage:
//!   stillwatch run [OPTIONS]        Run monitoring on the configured device
//!   stillwatch simulate [OPTIONS]   Run monitoring against a synthetic scene
//!   stillwatch stills [OPTIONS]     List or delete stored stills
//!   stillwatch events [OPTIONS]     Print recent motion events
//!   stillwatch profiles             Print the camera profile table
//!   stillwatch config [OPTIONS]     Print or validate the configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use stillwatch_common::config::{AppConfig, LoggingConfig};

mod commands;

#[derive(Parser)]
#[command(
    name = "stillwatch",
    about = "Motion-triggered still capture with ambient-light calibration",
    version,
    author
)]
struct Cli {
    /// Config file (defaults to the XDG location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine on the configured camera device (needs the `v4l` feature)
    Run {
        /// Seconds between status lines
        #[arg(long, default_value = "10")]
        status_period: u64,
    },

    /// Run the full engine against a synthetic camera
    Simulate {
        /// How long to run (seconds)
        #[arg(short, long, default_value = "20")]
        duration: u64,

        /// Directory for stills and the event log (overrides the config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Seconds between scene changes
        #[arg(long, default_value = "3")]
        scene_period: u64,

        /// Seconds between status lines
        #[arg(long, default_value = "1")]
        status_period: u64,
    },

    /// Print recent motion events
    Events {
        /// Event log file (overrides the config)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Number of events to show
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored stills
    Stills {
        /// Delete the named still instead of listing
        #[arg(long, value_name = "NAME")]
        delete: Option<String>,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the camera profile table
    Profiles,

    /// Print the effective configuration
    Config {
        /// Only validate; print nothing on success
        #[arg(long)]
        check: bool,

        /// Write the effective configuration to the config path
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {}: {e}", path.display()))?,
        None => AppConfig::load(),
    };

    let mut logging = LoggingConfig {
        json: cli.json_logs || config.logging.json,
        ..config.logging.clone()
    };
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    stillwatch_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Run { status_period } => commands::run::run(config, status_period).await,
        Commands::Simulate {
            duration,
            output,
            scene_period,
            status_period,
        } => commands::simulate::run(config, duration, output, scene_period, status_period).await,
        Commands::Events { path, limit, json } => commands::events::run(&config, path, limit, json),
        Commands::Stills { delete, json } => commands::stills::run(&config, delete, json),
        Commands::Profiles => commands::profiles::run(),
        Commands::Config { check, write } => commands::config::run(&config, cli.config, check, write),
    }
}
