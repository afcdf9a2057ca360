//! The request-facing facade.
//!
//! `Monitor` owns the camera, the shared state, and the handles of both
//! loops. Request handlers (an HTTP layer, the CLI simulator, tests) call
//! into it; nothing else spawns or stops loops.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Local;

use stillwatch_camera::{CameraBackend, CameraResource, Preview, PreviewCache};
use stillwatch_common::config::{AppConfig, ConfigChange, ConfigUpdate, MonitorSettings};
use stillwatch_common::error::{StillwatchError, StillwatchResult};
use stillwatch_model::{CameraProfile, MotionEvent, StatusReport, StreamId};

use crate::calibrator::{Calibrator, CalibratorHandle};
use crate::event_log::{EventLog, DEFAULT_RECENT_EVENTS};
use crate::orchestrator::{
    Orchestrator, OrchestratorContext, OrchestratorExit, OrchestratorHandle, OrchestratorPhase,
};
use crate::state::{SharedSettings, SystemState};
use crate::stills::{StillInfo, StillStore};

pub struct Monitor {
    config: Mutex<AppConfig>,
    config_path: Option<PathBuf>,
    ctx: OrchestratorContext,
    preview: PreviewCache,
    /// At most one orchestrator. Held across stop-and-restart so region
    /// changes and start/stop requests never interleave.
    orchestrator: tokio::sync::Mutex<Option<OrchestratorHandle>>,
    calibrator: tokio::sync::Mutex<Option<CalibratorHandle>>,
}

impl Monitor {
    /// Build the engine around a camera backend and start the calibrator.
    ///
    /// Must be called from within a Tokio runtime. Monitoring itself is not
    /// started; see [`Monitor::start_monitoring`].
    pub fn new(config: AppConfig, backend: Box<dyn CameraBackend>) -> Self {
        let camera = Arc::new(CameraResource::new(backend));
        let state = Arc::new(SystemState::new());
        let events = Arc::new(EventLog::open(&config.storage.event_log));
        let stills = Arc::new(StillStore::new(
            &config.storage.stills_dir,
            config.camera.jpeg_quality,
        ));
        let settings = Arc::new(SharedSettings::new(config.monitor.clone()));

        let calibrator = Calibrator::spawn(
            camera.clone(),
            state.clone(),
            config.calibration.clone(),
            config.engine.stop_join_timeout(),
        );

        tracing::info!(
            camera = %camera.name(),
            stills = %config.storage.stills_dir.display(),
            events = events.len(),
            "Monitor ready"
        );

        Self {
            preview: PreviewCache::new(config.engine.preview_ttl(), config.camera.jpeg_quality),
            ctx: OrchestratorContext {
                camera,
                state,
                events,
                stills,
                settings,
                engine: config.engine.clone(),
            },
            config: Mutex::new(config),
            config_path: None,
            orchestrator: tokio::sync::Mutex::new(None),
            calibrator: tokio::sync::Mutex::new(Some(calibrator)),
        }
    }

    /// Persist accepted configuration updates to `path`.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn camera(&self) -> &Arc<CameraResource> {
        &self.ctx.camera
    }

    pub fn state(&self) -> &Arc<SystemState> {
        &self.ctx.state
    }

    pub fn settings(&self) -> MonitorSettings {
        self.ctx.settings.get()
    }

    /// Phase of the current orchestrator, `Stopped` if none is running.
    pub async fn phase(&self) -> OrchestratorPhase {
        self.orchestrator
            .lock()
            .await
            .as_ref()
            .map_or(OrchestratorPhase::Stopped, OrchestratorHandle::phase)
    }

    /// Start the monitoring loop. A no-op if one is already running.
    pub async fn start_monitoring(&self) -> StillwatchResult<()> {
        let mut slot = self.orchestrator.lock().await;
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                tracing::debug!("Monitoring already running");
                return Ok(());
            }
        }
        if let Some(finished) = slot.take() {
            finished.stop().await;
        }
        *slot = Some(self.spawn_orchestrator());
        Ok(())
    }

    fn spawn_orchestrator(&self) -> OrchestratorHandle {
        self.ctx.state.set_fault(None);
        self.ctx.state.set_monitoring(true);
        tracing::info!("Starting monitoring");
        Orchestrator::new(self.ctx.clone()).spawn()
    }

    /// Stop the monitoring loop and wait for it. The camera stays open so
    /// previews and calibration keep working.
    pub async fn stop_monitoring(&self) -> Option<OrchestratorExit> {
        let mut slot = self.orchestrator.lock().await;
        let exit = match slot.take() {
            Some(handle) => handle.stop().await,
            None => None,
        };
        self.ctx.state.set_monitoring(false);
        self.ctx.state.set_motion_detected(false);
        tracing::info!(exit = ?exit, "Monitoring stopped");
        exit
    }

    /// Merge a partial settings update.
    ///
    /// A change to the region set restarts a running loop so it rebuilds
    /// its mask. Other keys take effect on the next frame.
    pub async fn update_config(&self, update: ConfigUpdate) -> StillwatchResult<ConfigChange> {
        let mut slot = self.orchestrator.lock().await;
        let change = self.ctx.settings.update(|s| s.apply_update(update))?;
        if change.is_empty() {
            return Ok(change);
        }
        tracing::info!(keys = ?change.changed_keys, "Settings updated");

        if change.regions_changed {
            if let Some(handle) = slot.take() {
                let was_running = !handle.is_finished();
                handle.stop().await;
                if was_running {
                    tracing::info!("Detection regions changed; restarting monitoring");
                    *slot = Some(self.spawn_orchestrator());
                }
            }
        }
        drop(slot);

        self.persist_settings();
        Ok(change)
    }

    /// [`Monitor::update_config`] from a JSON object.
    pub async fn update_config_json(&self, json: &str) -> StillwatchResult<ConfigChange> {
        self.update_config(ConfigUpdate::from_json(json)?).await
    }

    fn persist_settings(&self) {
        let mut config = self.config.lock().unwrap_or_else(|e| e.into_inner());
        config.monitor = self.ctx.settings.get();
        if let Some(path) = &self.config_path {
            if let Err(e) = config.save_to(path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to persist config");
            }
        }
    }

    /// The effective configuration, including runtime updates.
    pub fn config(&self) -> AppConfig {
        self.config.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            camera_streaming: self.ctx.camera.is_streaming(),
            ..self.ctx.state.snapshot()
        }
    }

    /// The newest `limit` events (50 by default), oldest first.
    pub fn recent_events(&self, limit: Option<usize>) -> Vec<MotionEvent> {
        self.ctx.events.recent(limit.unwrap_or(DEFAULT_RECENT_EVENTS))
    }

    /// Capture one full-resolution still into the stills directory.
    pub async fn snapshot(&self) -> StillwatchResult<PathBuf> {
        let frame = self.ctx.camera.capture_frame(StreamId::Main).await?;
        let path = self.ctx.stills.save_snapshot_blocking(frame, Local::now()).await?;
        tracing::info!(path = %path.display(), "Snapshot saved");
        Ok(path)
    }

    /// Stored stills, newest first.
    pub async fn stills(&self) -> StillwatchResult<Vec<StillInfo>> {
        self.on_still_store(|store| store.list()).await
    }

    /// Location of one stored still, for serving its bytes.
    pub async fn still_path(&self, name: &str) -> StillwatchResult<PathBuf> {
        let name = name.to_string();
        self.on_still_store(move |store| store.resolve(&name)).await
    }

    pub async fn delete_still(&self, name: &str) -> StillwatchResult<()> {
        let name = name.to_string();
        self.on_still_store(move |store| store.delete(&name)).await
    }

    async fn on_still_store<T, F>(&self, op: F) -> StillwatchResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&StillStore) -> StillwatchResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.ctx.stills);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| StillwatchError::storage(format!("still store task failed: {e}")))?
    }

    /// A JPEG preview of `stream`, reused for the preview TTL.
    pub async fn preview(&self, stream: StreamId) -> StillwatchResult<Preview> {
        self.preview.get_or_capture(&self.ctx.camera, stream).await
    }

    pub async fn force_profile(&self, profile: CameraProfile) -> StillwatchResult<()> {
        match self.calibrator.lock().await.as_ref() {
            Some(calibrator) => calibrator.force(profile).await,
            None => Err(StillwatchError::calibration("calibrator has been shut down")),
        }
    }

    pub async fn trigger_calibration(&self) -> StillwatchResult<()> {
        match self.calibrator.lock().await.as_ref() {
            Some(calibrator) => calibrator.trigger().await,
            None => Err(StillwatchError::calibration("calibrator has been shut down")),
        }
    }

    /// Stop both loops and release the camera.
    pub async fn shutdown(&self) {
        self.stop_monitoring().await;
        if let Some(calibrator) = self.calibrator.lock().await.take() {
            calibrator.stop().await;
        }
        self.preview.invalidate().await;
        if let Err(e) = self.ctx.camera.stop().await {
            tracing::warn!(error = %e, "Failed to stop camera");
        }
        if let Err(e) = self.ctx.camera.close().await {
            tracing::warn!(error = %e, "Failed to close camera");
        }
        tracing::info!("Monitor shut down");
    }
}
