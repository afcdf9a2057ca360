//! Stillwatch Camera
//!
//! Owns the physical capture device and serializes every access to it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ ┌──────────────┐ ┌──────────────┐
//! │ Orchestrator │ │  Calibrator  │ │   Requests   │
//! └──────┬───────┘ └──────┬───────┘ └──────┬───────┘
//!        │                │         PreviewCache
//!        ▼                ▼                ▼
//! ┌─────────────────────────────────────────────────┐
//! │ CameraResource   (one lock, one device call)    │
//! │  ┌───────────────────────────────────────────┐  │
//! │  │ dyn CameraBackend (V4L2 / synthetic)      │  │
//! │  └───────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod preview;
pub mod resource;
pub mod synthetic;
#[cfg(feature = "v4l")]
pub mod v4l2;

pub use backend::CameraBackend;
pub use preview::{Preview, PreviewCache};
pub use resource::{CameraResource, DeviceState, ResourceStats};
pub use synthetic::{Block, SceneHandle, SyntheticCamera};
#[cfg(feature = "v4l")]
pub use v4l2::V4l2Camera;
