//! Model types
//!
//! Defines the immutable description of the single model the runtime serves.

use serde::{Deserialize, Serialize};

/// Identifier of the bundled default model
pub const DEFAULT_MODEL_ID: &str = "SmolLM2-360M.Q8_0";
/// Display name of the bundled default model
pub const DEFAULT_MODEL_NAME: &str = "SmolLM2 360M Q8_0";
/// Where the default model's weights are fetched from
pub const DEFAULT_MODEL_URL: &str =
    "https://huggingface.co/prithivMLmods/SmolLM2-360M-GGUF/resolve/main/SmolLM2-360M.Q8_0.gguf";
/// Expected resident memory of the default model (~500 MB)
pub const DEFAULT_MODEL_MEMORY: u64 = 500_000_000;

/// Description of a model registered with the backend catalog.
///
/// Built once at configuration time and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique identifier used for every backend call
    pub id: String,
    /// Display name of the model
    pub name: String,
    /// Source location of the weights
    pub url: String,
    /// Expected resident-memory footprint in bytes
    pub memory_bytes: u64,
}

impl ModelDescriptor {
    /// Create a new descriptor
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
        memory_bytes: u64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            memory_bytes,
        }
    }
}

impl Default for ModelDescriptor {
    fn default() -> Self {
        Self::new(
            DEFAULT_MODEL_ID,
            DEFAULT_MODEL_NAME,
            DEFAULT_MODEL_URL,
            DEFAULT_MODEL_MEMORY,
        )
    }
}
