//! Stillwatch data model.
//!
//! Plain data shared by the camera, detection, and engine crates:
//!
//! - [`frame`]: pixel buffers tagged with their stream
//! - [`profile`]: named camera control bundles and luminance classification
//! - [`event`]: persisted motion events
//! - [`status`]: the status record exposed to callers

pub mod event;
pub mod frame;
pub mod profile;
pub mod status;

pub use event::MotionEvent;
pub use frame::{Frame, StreamId};
pub use profile::{AwbMode, CameraProfile, ControlSet, NoiseReductionMode};
pub use status::StatusReport;
