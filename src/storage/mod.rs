//! Persistent storage
//!
//! Data directory resolution, model weight downloads and backend settings.

pub mod huggingface;
pub mod settings;

use directories::ProjectDirs;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Could not determine data directory")]
    NoDataDir,
    #[error("Invalid model URL: {0}")]
    InvalidUrl(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Download failed with status: {0}")]
    Status(reqwest::StatusCode),
    #[error("Could not determine file size")]
    UnknownSize,
    #[error("Download incomplete: got {got} bytes, expected {expected}")]
    Incomplete { got: u64, expected: u64 },
}

/// Get the application data directory, creating it if needed
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    let dirs = ProjectDirs::from("ai", "memora", "memora").ok_or(StorageError::NoDataDir)?;
    let dir = dirs.data_dir().to_path_buf();
    fs::create_dir_all(&dir)?;
    Ok(dir)
}
