//! The monitoring loop.
//!
//! ```text
//!            start
//! Stopped ─────────▶ Initializing ──3 failures──▶ Faulted
//!    ▲                 │      ▲
//!    │ stop flag       │ ok   │ frame error
//!    │                 ▼      │
//!    └──────────────  Active ─┘
//!                      │  ▲
//!               burst  ▼  │ cooldown elapsed
//!                     Cooldown
//! ```
//!
//! One orchestrator owns the detector and the region mask. It is spawned
//! with a fresh stop flag and never restarted in place; a region change
//! stops it and spawns a new one.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use stillwatch_camera::CameraResource;
use stillwatch_common::clock::IntervalGate;
use stillwatch_common::config::EngineConfig;
use stillwatch_common::error::{StillwatchError, StillwatchResult};
use stillwatch_detection::{build_region_mask, DetectionParams, MotionDetector, RegionMask};
use stillwatch_model::{MotionEvent, StreamId};

use crate::burst::run_burst;
use crate::cancel::sleep_unless_stopped;
use crate::event_log::EventLog;
use crate::state::{SharedSettings, SystemState};
use crate::stills::StillStore;

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorPhase {
    Stopped,
    Initializing,
    Active,
    Cooldown,
    Faulted,
}

impl OrchestratorPhase {
    fn to_u8(self) -> u8 {
        match self {
            OrchestratorPhase::Stopped => 0,
            OrchestratorPhase::Initializing => 1,
            OrchestratorPhase::Active => 2,
            OrchestratorPhase::Cooldown => 3,
            OrchestratorPhase::Faulted => 4,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => OrchestratorPhase::Initializing,
            2 => OrchestratorPhase::Active,
            3 => OrchestratorPhase::Cooldown,
            4 => OrchestratorPhase::Faulted,
            _ => OrchestratorPhase::Stopped,
        }
    }
}

/// How a loop run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorExit {
    /// The stop flag was observed.
    Stopped,
    /// The camera could not be brought up; monitoring is off.
    Faulted { attempts: u32, error: String },
    /// The loop panicked; monitoring is off and the fault is recorded.
    Panicked { error: String },
}

/// Everything an orchestrator shares with the rest of the engine.
#[derive(Clone)]
pub struct OrchestratorContext {
    pub camera: Arc<CameraResource>,
    pub state: Arc<SystemState>,
    pub events: Arc<EventLog>,
    pub stills: Arc<StillStore>,
    pub settings: Arc<SharedSettings>,
    pub engine: EngineConfig,
}

#[derive(Debug, Default)]
struct LoopStats {
    frames: u64,
    triggers: u64,
    bursts: u64,
    stills: u64,
    frame_errors: u64,
    peak_changed: u32,
    peak_max_diff: u8,
}

/// Turns an unwinding loop into a recorded fault.
struct UnwindGuard {
    state: Arc<SystemState>,
    phase: Arc<AtomicU8>,
}

impl Drop for UnwindGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.state.set_monitoring(false);
            self.state
                .set_fault(Some("monitoring loop panicked".to_string()));
            self.phase
                .store(OrchestratorPhase::Faulted.to_u8(), Ordering::SeqCst);
        }
    }
}

enum ActiveExit {
    Stopped,
    FrameError(StillwatchError),
}

enum InitFailure {
    Stopped,
    Exhausted { attempts: u32, error: StillwatchError },
}

pub struct Orchestrator {
    ctx: OrchestratorContext,
    stop: Arc<AtomicBool>,
    phase: Arc<AtomicU8>,
    detector: MotionDetector,
    mask: Option<RegionMask>,
    stats: LoopStats,
}

impl Orchestrator {
    pub fn new(ctx: OrchestratorContext) -> Self {
        Self {
            ctx,
            stop: Arc::new(AtomicBool::new(false)),
            phase: Arc::new(AtomicU8::new(OrchestratorPhase::Stopped.to_u8())),
            detector: MotionDetector::new(),
            mask: None,
            stats: LoopStats::default(),
        }
    }

    /// Spawn the loop on the current runtime.
    pub fn spawn(self) -> OrchestratorHandle {
        let stop = self.stop.clone();
        let phase = self.phase.clone();
        let join_timeout = self.ctx.engine.stop_join_timeout();
        let task = tokio::spawn(self.run());
        OrchestratorHandle {
            stop,
            phase,
            join_timeout,
            task: Some(task),
        }
    }

    fn set_phase(&self, phase: OrchestratorPhase) {
        let previous = OrchestratorPhase::from_u8(self.phase.swap(phase.to_u8(), Ordering::SeqCst));
        if previous != phase {
            tracing::debug!(from = ?previous, to = ?phase, "Orchestrator phase");
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Run until stopped or faulted.
    pub async fn run(mut self) -> OrchestratorExit {
        tracing::info!(camera = %self.ctx.camera.name(), "Monitoring loop started");
        let _unwind = UnwindGuard {
            state: self.ctx.state.clone(),
            phase: self.phase.clone(),
        };

        let exit = loop {
            self.set_phase(OrchestratorPhase::Initializing);
            match self.initialize().await {
                Ok(()) => {}
                Err(InitFailure::Stopped) => break OrchestratorExit::Stopped,
                Err(InitFailure::Exhausted { attempts, error }) => {
                    let message = format!("camera initialization failed after {attempts} attempts: {error}");
                    tracing::error!(attempts, error = %error, "Giving up on camera initialization");
                    self.ctx.state.set_monitoring(false);
                    self.ctx.state.set_fault(Some(message));
                    break OrchestratorExit::Faulted {
                        attempts,
                        error: error.to_string(),
                    };
                }
            }

            self.set_phase(OrchestratorPhase::Active);
            match self.run_active().await {
                ActiveExit::Stopped => break OrchestratorExit::Stopped,
                ActiveExit::FrameError(e) => {
                    self.stats.frame_errors += 1;
                    tracing::warn!(error = %e, "Frame acquisition failed; reinitializing camera");
                    if !sleep_unless_stopped(self.ctx.engine.fault_pause(), &self.stop).await {
                        break OrchestratorExit::Stopped;
                    }
                }
            }
        };

        self.set_phase(match exit {
            OrchestratorExit::Stopped => OrchestratorPhase::Stopped,
            OrchestratorExit::Faulted { .. } | OrchestratorExit::Panicked { .. } => {
                OrchestratorPhase::Faulted
            }
        });
        tracing::info!(
            frames = self.stats.frames,
            triggers = self.stats.triggers,
            bursts = self.stats.bursts,
            stills = self.stats.stills,
            exit = ?exit,
            "Monitoring loop exited"
        );
        exit
    }

    /// Bring the camera up, retrying per the engine's policy, then build
    /// the mask for the camera's negotiated stream sizes.
    async fn initialize(&mut self) -> Result<(), InitFailure> {
        let policy = self.ctx.engine.retry_policy();
        let mut failures = 0u32;

        loop {
            if self.stopped() {
                return Err(InitFailure::Stopped);
            }
            match self.start_camera().await {
                Ok(()) => break,
                Err(error) => {
                    failures += 1;
                    tracing::warn!(
                        attempt = failures,
                        max_attempts = policy.max_attempts,
                        error = %error,
                        "Camera initialization failed"
                    );
                    if policy.is_exhausted(failures) {
                        return Err(InitFailure::Exhausted {
                            attempts: failures,
                            error,
                        });
                    }
                    if !sleep_unless_stopped(policy.delay_after(failures), &self.stop).await {
                        return Err(InitFailure::Stopped);
                    }
                }
            }
        }

        let settings = self.ctx.settings.get();
        let full = self.ctx.camera.stream_size(StreamId::Main);
        let lores = self.ctx.camera.stream_size(StreamId::Lores);
        self.mask = build_region_mask(&settings.detection_regions, settings.use_regions, full, lores);
        self.detector.reset();

        tracing::info!(
            main = ?full,
            lores = ?lores,
            masked = self.mask.is_some(),
            "Camera ready; monitoring active"
        );
        Ok(())
    }

    async fn start_camera(&self) -> StillwatchResult<()> {
        self.ctx.camera.open().await?;
        self.ctx.camera.start().await
    }

    async fn run_active(&mut self) -> ActiveExit {
        let mut diagnostics =
            IntervalGate::starting_at(self.ctx.engine.diagnostics_interval(), Instant::now());

        loop {
            if self.stopped() {
                return ActiveExit::Stopped;
            }

            let settings = self.ctx.settings.get();
            let params = DetectionParams::from(&settings);

            let frame = match self.ctx.camera.capture_frame(StreamId::Lores).await {
                Ok(frame) => frame,
                Err(e) => return ActiveExit::FrameError(e),
            };
            self.stats.frames += 1;

            let detection = match self.detector.process(&frame, &params, self.mask.as_ref()) {
                Ok(detection) => detection,
                Err(e) => return ActiveExit::FrameError(e),
            };
            drop(frame);

            self.stats.peak_changed = self.stats.peak_changed.max(detection.changed_pixels);
            self.stats.peak_max_diff = self.stats.peak_max_diff.max(detection.max_diff);

            if detection.motion {
                let event = MotionEvent::now(detection.changed_pixels, params.threshold);
                self.ctx.state.record_motion(event.timestamp);
                self.ctx.events.append_blocking(event).await;
                self.stats.triggers += 1;
                tracing::info!(
                    pixels_changed = detection.changed_pixels,
                    threshold = params.threshold,
                    max_diff = detection.max_diff,
                    "Motion detected"
                );

                if settings.bursts_enabled() {
                    let session = run_burst(
                        &self.ctx.camera,
                        &self.ctx.stills,
                        &self.ctx.state,
                        settings.burst_count,
                        settings.burst_interval(),
                        &self.stop,
                    )
                    .await;
                    self.stats.bursts += 1;
                    self.stats.stills += session.len() as u64;
                    self.detector.reset();

                    self.set_phase(OrchestratorPhase::Cooldown);
                    tracing::debug!(seconds = settings.cooldown_seconds, "Cooldown");
                    if !sleep_unless_stopped(settings.cooldown(), &self.stop).await {
                        return ActiveExit::Stopped;
                    }
                    self.set_phase(OrchestratorPhase::Active);
                    continue;
                }
            } else if !detection.baseline_only {
                self.ctx.state.set_motion_detected(false);
            }

            if diagnostics.should_tick(Instant::now()) {
                self.log_diagnostics(diagnostics.interval());
            }

            if !sleep_unless_stopped(self.ctx.engine.frame_interval(), &self.stop).await {
                return ActiveExit::Stopped;
            }
        }
    }

    fn log_diagnostics(&mut self, interval: Duration) {
        tracing::info!(
            interval_secs = interval.as_secs(),
            frames = self.stats.frames,
            triggers = self.stats.triggers,
            frame_errors = self.stats.frame_errors,
            peak_changed = self.stats.peak_changed,
            peak_max_diff = self.stats.peak_max_diff,
            "Detection summary"
        );
        self.stats.peak_changed = 0;
        self.stats.peak_max_diff = 0;
    }
}

/// Owner-side handle to a spawned orchestrator.
pub struct OrchestratorHandle {
    stop: Arc<AtomicBool>,
    phase: Arc<AtomicU8>,
    join_timeout: Duration,
    task: Option<JoinHandle<OrchestratorExit>>,
}

impl OrchestratorHandle {
    pub fn phase(&self) -> OrchestratorPhase {
        OrchestratorPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// The loop has returned (stopped or faulted).
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Signal the loop and wait for it to exit.
    ///
    /// A loop that outlives the join timeout is logged and aborted, so no
    /// two loops ever drive the camera at once.
    pub async fn stop(mut self) -> Option<OrchestratorExit> {
        self.stop.store(true, Ordering::SeqCst);
        let mut task = self.task.take()?;

        match tokio::time::timeout(self.join_timeout, &mut task).await {
            Ok(Ok(exit)) => Some(exit),
            Ok(Err(e)) if e.is_panic() => {
                tracing::error!(error = %e, "Monitoring loop panicked");
                Some(OrchestratorExit::Panicked {
                    error: e.to_string(),
                })
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Monitoring loop was cancelled");
                None
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.join_timeout.as_millis() as u64,
                    "Monitoring loop did not stop in time; aborting"
                );
                task.abort();
                None
            }
        }
    }
}

impl Drop for OrchestratorHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
