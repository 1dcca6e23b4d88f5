//! Shared type definitions
//!
//! Values that cross the boundary between the lifecycle manager, the
//! inference backend and whatever UI sits on top.

pub mod model;
pub mod progress;

pub use model::ModelDescriptor;
pub use progress::ProgressEvent;
