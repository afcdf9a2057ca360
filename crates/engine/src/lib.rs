//! Stillwatch Engine
//!
//! Runs the two long-lived loops that share the camera:
//!
//! - **Orchestrator:** lores frames → motion detection → burst capture,
//!   with camera initialization retries and cooldown
//! - **Calibrator:** periodic luminance sampling → DAY/DUSK/NIGHT profile
//!
//! [`Monitor`] ties them to a [`stillwatch_camera::CameraResource`], the
//! shared [`SystemState`], the persisted [`EventLog`], and the still store.
//! Both loops stop cooperatively through `Arc<AtomicBool>` flags.

pub mod burst;
pub mod calibrator;
pub mod cancel;
pub mod event_log;
pub mod monitor;
pub mod orchestrator;
pub mod state;
pub mod stills;

pub use burst::{run_burst, CaptureSession, CapturingGuard};
pub use calibrator::{CalibrationCommand, Calibrator, CalibratorHandle};
pub use event_log::{EventLog, DEFAULT_RECENT_EVENTS, EVENT_LOG_CAPACITY};
pub use monitor::Monitor;
pub use orchestrator::{
    Orchestrator, OrchestratorContext, OrchestratorExit, OrchestratorHandle, OrchestratorPhase,
};
pub use state::{SharedSettings, SystemState};
pub use stills::{StillInfo, StillStore};
