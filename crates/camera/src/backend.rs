//! Device backend interface.
//!
//! A backend wraps one physical (or simulated) camera that produces a
//! lores and a main stream from the same sensor. Backends are not
//! reentrant; [`crate::CameraResource`] is the only caller.

use stillwatch_common::error::StillwatchResult;
use stillwatch_model::{ControlSet, Frame, StreamId};

/// Trait for a camera device.
///
/// Every method is one blocking device call. Implementations do not need
/// internal locking.
pub trait CameraBackend: Send {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Acquire the device and configure both streams.
    fn open(&mut self) -> StillwatchResult<()>;

    /// Release the device. Must tolerate being called on a half-open or
    /// faulted handle.
    fn close(&mut self) -> StillwatchResult<()>;

    /// Start streaming.
    fn start(&mut self) -> StillwatchResult<()>;

    /// Stop streaming, keeping the device open.
    fn stop(&mut self) -> StillwatchResult<()>;

    /// Capture one frame from the given stream.
    fn capture(&mut self, stream: StreamId) -> StillwatchResult<Frame>;

    /// Write a set of controls.
    fn set_controls(&mut self, controls: &ControlSet) -> StillwatchResult<()>;

    /// Configured `(width, height)` of a stream.
    fn stream_size(&self, stream: StreamId) -> (u32, u32);
}
