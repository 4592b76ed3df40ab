//! Orthopatch CLI - Command-line interface
//!
//! This binary exposes the patch operations of the orthopatch library
//! (apply, undo, redo, clear, list) against a tile cache directory.

use clap::Parser;
use std::path::PathBuf;

mod commands;
mod error;

use commands::Command;
use error::CliError;

#[derive(Parser)]
#[command(name = "orthopatch")]
#[command(version = orthopatch::VERSION)]
#[command(about = "Polygon patching with undo/redo for orthophoto tile mosaics", long_about = None)]
struct Cli {
    /// Cache directory holding the tile pyramid
    #[arg(long, default_value = "cache")]
    cache: PathBuf,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();

    let _guard = match orthopatch::logging::init_logging("logs", "orthopatch.log") {
        Ok(guard) => guard,
        Err(e) => CliError::LoggingInit(e.to_string()).exit(),
    };

    if let Err(e) = commands::run(&cli.cache, cli.command) {
        e.exit();
    }
}
