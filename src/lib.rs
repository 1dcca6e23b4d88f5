//! Memora runtime library
//!
//! Lifecycle manager for an on-device LLM: brings a local llama.cpp engine
//! from "not present" to "answering prompts" and reports progress on the way.

pub mod inference;
pub mod lifecycle;
pub mod storage;
pub mod system;
pub mod types;

pub use lifecycle::{LifecycleCoordinator, LifecycleError, StatusObserver};
pub use types::{ModelDescriptor, ProgressEvent};
