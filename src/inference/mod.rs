//! LLM inference backend
//!
//! The capability surface the lifecycle manager drives, and the llama.cpp
//! implementation used on device.

pub mod backend;
mod generation;
pub mod llama;

pub use backend::{BackendError, InferenceBackend, ProgressFn};
pub use llama::{ExecutionProvider, LlamaCppBackend};
