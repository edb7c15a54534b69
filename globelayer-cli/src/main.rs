//! GlobeLayer CLI - inspect imagery tile matching and cache behaviour.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use globelayer::logging::{init_logging, DEFAULT_LOG_FILE};
use tracing::info;

use commands::match_tile::MatchArgs;
use commands::simulate::SimulateArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "globelayer")]
#[command(version = globelayer::VERSION)]
#[command(about = "Imagery tiling and layer compositing for virtual globes", long_about = None)]
struct Cli {
    /// Layer config file (default: ~/.globelayer/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write log events to stderr
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which imagery tiles cover a terrain tile
    Match(MatchArgs),

    /// Load a patch of terrain tiles through the full imagery pipeline
    Simulate(SimulateArgs),
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let log_dir = commands::common::default_log_dir();
    let _logging =
        init_logging(&log_dir, DEFAULT_LOG_FILE, cli.verbose).map_err(CliError::LoggingInit)?;
    info!(version = globelayer::VERSION, "GlobeLayer CLI started");

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Match(args) => commands::match_tile::run(args, config),
        Commands::Simulate(args) => commands::simulate::run(args, config),
    }
}
