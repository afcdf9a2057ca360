//! Stillwatch Detection
//!
//! Pure image analysis over the lores luminance plane:
//!
//! - [`mask`]: builds a lores binary mask from full-resolution rectangles
//! - [`motion`]: sliding-window frame differencing with optional masking

pub mod mask;
pub mod motion;

pub use mask::{build_region_mask, RegionMask};
pub use motion::{Detection, DetectionParams, MotionDetector};
