//! Motion event records.
//!
//! The event log is persisted as a JSON array of these records, oldest
//! first.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// A single motion occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionEvent {
    /// Wall-clock time of the detection.
    pub timestamp: DateTime<Local>,

    /// Pixels above the sensitivity threshold in the masked difference.
    pub pixels_changed: u32,

    /// The motion threshold in effect when the event fired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u32>,
}

impl MotionEvent {
    /// Create an event stamped with the current time.
    pub fn now(pixels_changed: u32, threshold: u32) -> Self {
        Self {
            timestamp: Local::now(),
            pixels_changed,
            threshold: Some(threshold),
        }
    }
}

/// Parse a persisted event log (JSON array).
pub fn parse_event_log(json: &str) -> Result<Vec<MotionEvent>, serde_json::Error> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(json)
}
