//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use orthopatch::history::PatchError;
use std::fmt;
use std::process;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Failed to open the cache directory
    OpenCache(PatchError),
    /// Failed to read the GeoJSON input file
    FileRead { path: String, error: std::io::Error },
    /// The input file is not a GeoJSON feature collection
    MalformedGeoJson(String),
    /// A patch operation failed
    Patch(PatchError),
    /// Failed to serialize output
    Output(String),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        let code = match self {
            CliError::LoggingInit(_) => 2,
            CliError::OpenCache(_) => 3,
            CliError::FileRead { .. } | CliError::MalformedGeoJson(_) => 4,
            CliError::Patch(PatchError::Validation(_)) => 4,
            CliError::Patch(PatchError::MissingTileData { .. }) => 5,
            CliError::Patch(_) => 1,
            CliError::Output(_) => 1,
        };
        process::exit(code);
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => {
                write!(f, "failed to initialize logging: {}", msg)
            }
            CliError::OpenCache(err) => {
                write!(f, "cannot open cache directory: {}", err)
            }
            CliError::FileRead { path, error } => {
                write!(f, "cannot read {}: {}", path, error)
            }
            CliError::MalformedGeoJson(msg) => {
                write!(f, "input is not a GeoJSON feature collection: {}", msg)
            }
            CliError::Patch(err) => write!(f, "{}", err),
            CliError::Output(msg) => write!(f, "cannot serialize output: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_read_display_names_path() {
        let err = CliError::FileRead {
            path: "patch.json".to_string(),
            error: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        let msg = err.to_string();
        assert!(msg.contains("patch.json"));
        assert!(msg.contains("no such file"));
    }

    #[test]
    fn test_patch_error_display_passes_through() {
        let err = CliError::Patch(PatchError::MissingTileData {
            tile: orthopatch::pyramid::TileCoord { z: 21, x: 100, y: 99 },
            filename: "ortho.png".to_string(),
        });
        let msg = err.to_string();
        assert!(msg.contains("ortho.png"));
        assert!(msg.contains("21/99/100"));
    }
}
