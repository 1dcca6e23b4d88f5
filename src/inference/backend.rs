use async_trait::async_trait;
use thiserror::Error;

use crate::storage::StorageError;
use crate::types::ModelDescriptor;

/// Download progress callback, receives a completion ratio
pub type ProgressFn<'a> = &'a (dyn Fn(f32) + Send + Sync);

/// Failure reported by a backend, carrying its human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<StorageError> for BackendError {
    fn from(err: StorageError) -> Self {
        Self::new(err.to_string())
    }
}

/// Operations an on-device inference engine exposes.
///
/// Every call may suspend and may fail. Sequencing is the caller's job:
/// the lifecycle coordinator guarantees bring-up before registration,
/// registration before download/load and load before inference.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Bring the engine's runtime environment online
    async fn initialize_environment(&self) -> Result<(), BackendError>;

    /// Pick and register the execution provider (CPU or GPU offload)
    async fn register_execution_provider(&self) -> Result<(), BackendError>;

    /// Add a model to the engine's catalog
    async fn register_model(&self, descriptor: &ModelDescriptor) -> Result<(), BackendError>;

    /// Whether the model's weights are already on local storage
    async fn is_model_present(&self, id: &str) -> Result<bool, BackendError>;

    /// Fetch the model's weights, reporting progress as a ratio in `[0, 1]`
    async fn download_model(&self, id: &str, on_progress: ProgressFn<'_>) -> Result<(), BackendError>;

    /// Load the model's weights into memory
    async fn load_model(&self, id: &str) -> Result<(), BackendError>;

    /// Complete a prompt with the loaded model
    async fn infer(&self, prompt: &str) -> Result<String, BackendError>;
}
