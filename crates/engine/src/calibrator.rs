//! Ambient-light calibration.
//!
//! Samples the lores luminance on a fixed period and switches the camera
//! between the DAY, DUSK and NIGHT profiles. Requests reach the loop over
//! its command channel, so the loop is the only writer of the active
//! profile.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use stillwatch_camera::CameraResource;
use stillwatch_common::config::CalibrationConfig;
use stillwatch_common::error::{StillwatchError, StillwatchResult};
use stillwatch_model::{CameraProfile, ControlSet, StreamId};

use crate::cancel::{deadline_after, sleep_unless_stopped, STOP_POLL_INTERVAL};
use crate::state::SystemState;

const COMMAND_QUEUE: usize = 8;

#[derive(Debug)]
pub enum CalibrationCommand {
    /// Sample and classify now instead of at the end of the period.
    Trigger,
    /// Apply a profile without sampling.
    Force {
        profile: CameraProfile,
        reply: oneshot::Sender<StillwatchResult<()>>,
    },
}

enum Wake {
    Elapsed,
    Stopped,
    Command(CalibrationCommand),
}

pub struct Calibrator {
    camera: Arc<CameraResource>,
    state: Arc<SystemState>,
    config: CalibrationConfig,
    stop: Arc<AtomicBool>,
    commands: mpsc::Receiver<CalibrationCommand>,
    commands_open: bool,
    active: Option<CameraProfile>,
}

impl Calibrator {
    pub fn new(
        camera: Arc<CameraResource>,
        state: Arc<SystemState>,
        config: CalibrationConfig,
    ) -> (Self, mpsc::Sender<CalibrationCommand>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let calibrator = Self {
            camera,
            state,
            config,
            stop: Arc::new(AtomicBool::new(false)),
            commands: rx,
            commands_open: true,
            active: None,
        };
        (calibrator, tx)
    }

    /// Spawn the loop on the current runtime.
    pub fn spawn(
        camera: Arc<CameraResource>,
        state: Arc<SystemState>,
        config: CalibrationConfig,
        join_timeout: Duration,
    ) -> CalibratorHandle {
        let (calibrator, commands) = Self::new(camera, state, config);
        let stop = calibrator.stop.clone();
        let task = tokio::spawn(calibrator.run());
        CalibratorHandle {
            commands,
            stop,
            join_timeout,
            task: Some(task),
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            enabled = self.config.enabled,
            period_secs = self.config.period_secs,
            "Calibrator started"
        );

        // With automatic sampling disabled the loop only serves commands.
        let enabled = self.config.enabled;
        if self.wait_for_streaming().await {
            let mut next = enabled.then(|| deadline_after(self.config.settle())).flatten();
            while self.idle_until(next).await {
                self.run_cycle().await;
                next = enabled.then(|| deadline_after(self.config.period())).flatten();
            }
        }

        tracing::info!(active = ?self.active, "Calibrator stopped");
    }

    /// Serve commands until the camera streams. Returns false when stopped.
    async fn wait_for_streaming(&mut self) -> bool {
        loop {
            if self.camera.is_streaming() {
                return true;
            }
            match self.wait(deadline_after(STOP_POLL_INTERVAL)).await {
                Wake::Stopped => return false,
                Wake::Elapsed => {}
                Wake::Command(CalibrationCommand::Trigger) => {
                    tracing::debug!("Calibration trigger ignored; camera not streaming");
                }
                Wake::Command(CalibrationCommand::Force { profile, reply }) => {
                    let result = self.apply(profile, "forced").await;
                    let _ = reply.send(result);
                }
            }
        }
    }

    /// Serve commands until `deadline` passes or a trigger arrives.
    /// `None` waits for a trigger only. Returns false when stopped.
    async fn idle_until(&mut self, deadline: Option<Instant>) -> bool {
        loop {
            match self.wait(deadline).await {
                Wake::Stopped => return false,
                Wake::Elapsed | Wake::Command(CalibrationCommand::Trigger) => return true,
                Wake::Command(CalibrationCommand::Force { profile, reply }) => {
                    let result = self.apply(profile, "forced").await;
                    let _ = reply.send(result);
                }
            }
        }
    }

    async fn wait(&mut self, deadline: Option<Instant>) -> Wake {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Wake::Stopped;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Wake::Elapsed;
                    }
                    (deadline - now).min(STOP_POLL_INTERVAL)
                }
                None => STOP_POLL_INTERVAL,
            };

            tokio::select! {
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(command) => return Wake::Command(command),
                    None => self.commands_open = false,
                },
                _ = tokio::time::sleep(slice) => {}
            }
        }
    }

    /// Sample, classify, and switch profile if the class changed.
    async fn run_cycle(&mut self) {
        let mean = match self.sample().await {
            Ok(mean) => mean,
            Err(e) => {
                tracing::warn!(error = %e, active = ?self.active, "Calibration sample failed");
                return;
            }
        };

        let profile =
            CameraProfile::classify_with_hysteresis(mean, self.active, self.config.hysteresis);
        tracing::debug!(mean_luma = mean, %profile, "Calibration sample");

        if self.active == Some(profile) {
            return;
        }
        if let Err(e) = self.apply(profile, "luminance").await {
            tracing::warn!(error = %e, %profile, active = ?self.active, "Failed to apply camera profile");
        }
    }

    async fn sample(&self) -> StillwatchResult<f64> {
        let frame = self.camera.capture_frame(StreamId::Lores).await?;
        frame.mean_luma()
    }

    /// Two device writes: re-enable AWB, then the profile's controls.
    async fn apply(&mut self, profile: CameraProfile, reason: &'static str) -> StillwatchResult<()> {
        self.camera.set_controls(&ControlSet::awb_reset()).await?;
        if !sleep_unless_stopped(self.config.awb_reset_pause(), &self.stop).await {
            return Err(StillwatchError::calibration(
                "stopped before the profile was written",
            ));
        }
        self.camera.set_controls(&profile.controls()).await?;

        let previous = self.active.replace(profile);
        self.state.set_active_profile(Some(profile));
        tracing::info!(from = ?previous, to = %profile, reason, "Camera profile applied");
        Ok(())
    }
}

/// Owner-side handle to the calibrator loop.
pub struct CalibratorHandle {
    commands: mpsc::Sender<CalibrationCommand>,
    stop: Arc<AtomicBool>,
    join_timeout: Duration,
    task: Option<JoinHandle<()>>,
}

impl CalibratorHandle {
    /// Ask for an immediate calibration cycle.
    pub async fn trigger(&self) -> StillwatchResult<()> {
        self.commands
            .send(CalibrationCommand::Trigger)
            .await
            .map_err(|_| StillwatchError::calibration("calibrator is not running"))
    }

    /// Apply `profile` now and wait for the device writes to finish.
    pub async fn force(&self, profile: CameraProfile) -> StillwatchResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(CalibrationCommand::Force { profile, reply })
            .await
            .map_err(|_| StillwatchError::calibration("calibrator is not running"))?;
        response
            .await
            .map_err(|_| StillwatchError::calibration("calibrator stopped before replying"))?
    }

    pub async fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let Some(mut task) = self.task.take() else {
            return;
        };
        match tokio::time::timeout(self.join_timeout, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Calibrator panicked or was cancelled"),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.join_timeout.as_millis() as u64,
                    "Calibrator did not stop in time; aborting"
                );
                task.abort();
            }
        }
    }
}

impl Drop for CalibratorHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stillwatch_camera::{SceneHandle, SyntheticCamera};

    fn config() -> CalibrationConfig {
        CalibrationConfig {
            enabled: true,
            period_secs: 3600,
            settle_secs: 0,
            awb_reset_pause_ms: 1,
            hysteresis: 0.0,
        }
    }

    async fn streaming() -> (Arc<CameraResource>, SceneHandle) {
        let camera = SyntheticCamera::new((32, 24), (16, 12));
        let scene = camera.scene();
        let camera = Arc::new(CameraResource::new(Box::new(camera)));
        camera.open().await.unwrap();
        camera.start().await.unwrap();
        (camera, scene)
    }

    #[tokio::test]
    async fn first_cycle_applies_in_two_writes() {
        let (camera, scene) = streaming().await;
        scene.set_background(200);
        let state = Arc::new(SystemState::new());
        let (mut calibrator, _tx) = Calibrator::new(camera, state.clone(), config());

        calibrator.run_cycle().await;

        let writes = scene.control_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], ControlSet::awb_reset());
        assert_eq!(writes[1], CameraProfile::Day.controls());
        assert_eq!(scene.applied_controls(), CameraProfile::Day.controls());
        assert_eq!(state.active_profile(), Some(CameraProfile::Day));
    }

    #[tokio::test]
    async fn unchanged_class_writes_nothing() {
        let (camera, scene) = streaming().await;
        scene.set_background(100);
        let state = Arc::new(SystemState::new());
        let (mut calibrator, _tx) = Calibrator::new(camera, state.clone(), config());

        calibrator.run_cycle().await;
        scene.set_background(120);
        calibrator.run_cycle().await;

        assert_eq!(scene.control_writes().len(), 2);
        assert_eq!(state.active_profile(), Some(CameraProfile::Dusk));

        scene.set_background(30);
        calibrator.run_cycle().await;
        assert_eq!(scene.control_writes().len(), 4);
        assert_eq!(state.active_profile(), Some(CameraProfile::Night));
    }

    #[tokio::test]
    async fn failed_write_keeps_previous_profile() {
        let (camera, scene) = streaming().await;
        scene.set_background(200);
        let state = Arc::new(SystemState::new());
        let (mut calibrator, _tx) = Calibrator::new(camera, state.clone(), config());
        calibrator.run_cycle().await;

        scene.set_background(10);
        scene.fail_next_control_writes(1);
        calibrator.run_cycle().await;
        assert_eq!(state.active_profile(), Some(CameraProfile::Day));
    }

    #[tokio::test]
    async fn force_and_trigger_over_the_channel() {
        let (camera, scene) = streaming().await;
        scene.set_background(200);
        let state = Arc::new(SystemState::new());
        let handle = Calibrator::spawn(camera, state.clone(), config(), Duration::from_secs(2));

        // Wait for the first automatic cycle.
        for _ in 0..100 {
            if state.active_profile().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state.active_profile(), Some(CameraProfile::Day));

        handle.force(CameraProfile::Night).await.unwrap();
        assert_eq!(state.active_profile(), Some(CameraProfile::Night));
        assert_eq!(
            scene.applied_controls().exposure_time_us,
            CameraProfile::Night.controls().exposure_time_us
        );

        handle.trigger().await.unwrap();
        for _ in 0..100 {
            if state.active_profile() == Some(CameraProfile::Day) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state.active_profile(), Some(CameraProfile::Day));

        handle.stop().await;
    }
}
