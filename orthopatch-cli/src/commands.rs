//! CLI command implementations.
//!
//! Each subcommand maps onto one operation of
//! [`orthopatch::history::PatchHistory`] against a cache directory.

use clap::Subcommand;
use orthopatch::geojson::FeatureCollection;
use orthopatch::history::{ClearOutcome, PatchHistory, RedoOutcome, UndoOutcome};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CliError;

/// Patch operations on a tile cache.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Apply a GeoJSON polygon patch to the mosaic
    Apply {
        /// Path of the GeoJSON feature collection to apply
        #[arg(long)]
        file: PathBuf,
    },
    /// Revert the most recently applied patch
    Undo,
    /// Reapply the most recently undone patch
    Redo,
    /// Drop all patches and restore every tile to its original content
    Clear,
    /// Print the active patch log
    List,
}

/// Run a subcommand against a cache directory.
pub fn run(cache_dir: &Path, command: Command) -> Result<(), CliError> {
    let mut history = PatchHistory::open(cache_dir).map_err(CliError::OpenCache)?;

    match command {
        Command::Apply { file } => {
            let text = fs::read_to_string(&file).map_err(|error| CliError::FileRead {
                path: file.display().to_string(),
                error,
            })?;
            let collection: FeatureCollection =
                serde_json::from_str(&text).map_err(|e| CliError::MalformedGeoJson(e.to_string()))?;
            let applied = history.apply(collection).map_err(CliError::Patch)?;
            println!(
                "patch {} applied, {} tile(s) modified",
                applied.id,
                applied.tiles.len()
            );
            let tiles =
                serde_json::to_string(&applied.tiles).map_err(|e| CliError::Output(e.to_string()))?;
            println!("{tiles}");
            Ok(())
        }
        Command::Undo => {
            match history.undo().map_err(CliError::Patch)? {
                UndoOutcome::Reverted(id) => println!("undo: patch {id} canceled"),
                UndoOutcome::Nothing => println!("nothing to undo"),
            }
            Ok(())
        }
        Command::Redo => {
            match history.redo().map_err(CliError::Patch)? {
                RedoOutcome::Reapplied(id) => println!("redo: patch {id} reapplied"),
                RedoOutcome::Nothing => println!("nothing to redo"),
            }
            Ok(())
        }
        Command::Clear => {
            match history.clear().map_err(CliError::Patch)? {
                ClearOutcome::Cleared => println!("clear: all patches deleted"),
                ClearOutcome::Nothing => println!("nothing to clear"),
            }
            Ok(())
        }
        Command::List => {
            let log = serde_json::to_string_pretty(history.active())
                .map_err(|e| CliError::Output(e.to_string()))?;
            println!("{log}");
            Ok(())
        }
    }
}
