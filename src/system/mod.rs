//! System utilities
//!
//! Hardware probing used when choosing an execution provider.

pub mod gpu;
