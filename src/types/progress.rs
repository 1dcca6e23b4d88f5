//! Progress types
//!
//! Transient status values delivered to observers while the lifecycle
//! manager works. Nothing here is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single advisory status update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Human-readable status line
    pub message: String,
    /// Completion ratio in `[0, 1]`, only set for download progress
    pub ratio: Option<f32>,
    /// When the event was produced
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    /// Create a plain status event
    pub fn status(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ratio: None,
            at: Utc::now(),
        }
    }

    /// Create a download progress event. The ratio is clamped into `[0, 1]`.
    pub fn progress(message: impl Into<String>, ratio: f32) -> Self {
        let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        Self {
            message: message.into(),
            ratio: Some(ratio),
            at: Utc::now(),
        }
    }

    /// Whole percent for progress events
    pub fn percent(&self) -> Option<u32> {
        self.ratio.map(|r| (r * 100.0).round() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_event_has_no_ratio() {
        let event = ProgressEvent::status("Loading model into memory...");
        assert_eq!(event.message, "Loading model into memory...");
        assert!(event.ratio.is_none());
        assert!(event.percent().is_none());
    }

    #[test]
    fn test_progress_ratio_is_clamped() {
        assert_eq!(ProgressEvent::progress("x", 1.7).ratio, Some(1.0));
        assert_eq!(ProgressEvent::progress("x", -0.2).ratio, Some(0.0));
        assert_eq!(ProgressEvent::progress("x", f32::NAN).ratio, Some(0.0));
        assert_eq!(ProgressEvent::progress("x", 0.426).percent(), Some(43));
    }
}
