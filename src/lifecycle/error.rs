//! Lifecycle errors

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The step of the lifecycle an operation was in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Engine bring-up and model registration
    Bootstrap,
    /// Presence check, download and activation
    Provisioning,
    /// Prompt completion
    Inference,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Bootstrap => "engine bring-up",
            Phase::Provisioning => "model provisioning",
            Phase::Inference => "inference",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the lifecycle manager.
///
/// Backend messages are carried verbatim. The type is `Clone` so that one
/// outcome can be handed to every caller that waited on the same attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("engine bring-up failed: {0}")]
    EngineBringup(String),
    #[error("model download failed: {0}")]
    ModelDownload(String),
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("cancelled during {0}")]
    Cancelled(Phase),
    #[error("prompt is empty")]
    EmptyPrompt,
}

impl LifecycleError {
    /// The backend's own message, without the kind prefix
    pub fn message(&self) -> String {
        match self {
            LifecycleError::EngineBringup(msg)
            | LifecycleError::ModelDownload(msg)
            | LifecycleError::ModelLoad(msg)
            | LifecycleError::Inference(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LifecycleError::Cancelled(_))
    }
}
