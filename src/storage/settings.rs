//! Settings storage
//!
//! Manages persistence of the inference backend settings.

use crate::storage::{get_data_dir, StorageError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const VALID_CONTEXT_SIZES: [u32; 7] = [2048, 4096, 8192, 16384, 32768, 65536, 131072];

/// Backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Directory where model files (.gguf) are stored
    pub models_directory: PathBuf,
    /// Context window size
    pub context_size: u32,
    /// Maximum number of tokens to generate
    pub max_tokens: u32,
    /// Number of GPU layers to offload (0 = CPU only)
    pub gpu_layers: u32,
    /// Sampler seed
    #[serde(default = "default_seed")]
    pub seed: u32,
    /// Worker threads for decoding, `None` = all cores
    #[serde(default)]
    pub threads: Option<u32>,
}

fn default_seed() -> u32 {
    1234
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            models_directory: get_data_dir()
                .ok()
                .map(|d| d.join("models"))
                .unwrap_or_else(|| PathBuf::from("./models")),
            context_size: 4096,
            max_tokens: 512,
            gpu_layers: 99, // Offload all layers when a GPU is present
            seed: default_seed(),
            threads: None,
        }
    }
}

impl BackendSettings {
    /// Validate settings values
    ///
    /// Snaps the context size to a supported value and keeps generation
    /// inside the context window.
    pub fn validate(&mut self) {
        if !VALID_CONTEXT_SIZES.contains(&self.context_size) {
            self.context_size = *VALID_CONTEXT_SIZES
                .iter()
                .min_by_key(|&&size| (size as i64 - self.context_size as i64).abs())
                .unwrap_or(&4096);
        }

        self.max_tokens = self.max_tokens.clamp(1, 65536);
        if self.max_tokens > self.context_size {
            self.max_tokens = self.context_size / 2;
        }

        if self.threads == Some(0) {
            self.threads = None;
        }
    }
}

/// Get the settings file path
fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from disk
///
/// Returns default settings if the file doesn't exist or is corrupted
pub fn load_settings() -> BackendSettings {
    let loaded = get_settings_path().and_then(|path| load_settings_from(&path));
    match loaded {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            BackendSettings::default()
        }
    }
}

/// Load and validate settings from a specific file
pub fn load_settings_from(path: &Path) -> Result<BackendSettings, StorageError> {
    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(BackendSettings::default());
    }

    let json = fs::read_to_string(path)?;
    let mut settings: BackendSettings = serde_json::from_str(&json)?;
    settings.validate();

    tracing::debug!("Loaded settings from {:?}", path);
    Ok(settings)
}

/// Save settings to disk
pub fn save_settings(settings: &BackendSettings) -> Result<(), StorageError> {
    save_settings_to(settings, &get_settings_path()?)
}

/// Save settings to a specific file
pub fn save_settings_to(settings: &BackendSettings, path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;

    tracing::debug!("Saved settings to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = BackendSettings::default();
        assert_eq!(settings.context_size, 4096);
        assert_eq!(settings.max_tokens, 512);
        assert_eq!(settings.gpu_layers, 99);
        assert_eq!(settings.seed, 1234);
        assert!(settings.models_directory.ends_with("models"));
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = BackendSettings::default();

        settings.context_size = 5000;
        settings.validate();
        assert_eq!(settings.context_size, 4096);

        settings.max_tokens = 10_000;
        settings.validate();
        assert_eq!(settings.max_tokens, 2048);

        settings.max_tokens = 0;
        settings.threads = Some(0);
        settings.validate();
        assert_eq!(settings.max_tokens, 1);
        assert!(settings.threads.is_none());
    }

    #[test]
    fn test_settings_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = BackendSettings::default();
        settings.gpu_layers = 0;
        settings.context_size = 8192;
        save_settings_to(&settings, &path).unwrap();

        let loaded = load_settings_from(&path).unwrap();
        assert_eq!(loaded.gpu_layers, 0);
        assert_eq!(loaded.context_size, 8192);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"models_directory":"/tmp/m","context_size":2048,"max_tokens":64,"gpu_layers":0}"#,
        )
        .unwrap();

        let loaded = load_settings_from(&path).unwrap();
        assert_eq!(loaded.seed, 1234);
        assert!(loaded.threads.is_none());
        assert_eq!(loaded.models_directory, PathBuf::from("/tmp/m"));
    }

    #[test]
    fn test_corrupted_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_settings_from(&path), Err(StorageError::Json(_))));
    }
}
