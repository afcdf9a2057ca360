//! Status record exposed to callers.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::profile::CameraProfile;

/// A point-in-time copy of the engine's shared state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// The monitoring loop is running (or initializing).
    pub monitoring: bool,

    /// A burst capture is in progress.
    pub capturing: bool,

    /// The most recent detection reported motion.
    pub motion_detected: bool,

    /// Time of the most recent motion event.
    pub last_motion: Option<DateTime<Local>>,

    /// Profile currently written to the camera.
    pub active_profile: Option<CameraProfile>,

    /// The camera is open and streaming.
    pub camera_streaming: bool,

    /// Why monitoring stopped on its own, if it did.
    pub fault: Option<String>,
}
