//! Burst capture.
//!
//! A burst grabs `count` full-resolution stills spaced `interval` apart.
//! Individual failures are skipped, so a burst yields anywhere from zero
//! to `count` stills.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};

use stillwatch_camera::CameraResource;
use stillwatch_model::StreamId;

use crate::cancel::sleep_unless_stopped;
use crate::state::SystemState;
use crate::stills::StillStore;

/// Holds `capturing` high for its lifetime.
pub struct CapturingGuard<'a> {
    state: &'a SystemState,
}

impl<'a> CapturingGuard<'a> {
    pub fn raise(state: &'a SystemState) -> Self {
        state.set_capturing(true);
        Self { state }
    }
}

impl Drop for CapturingGuard<'_> {
    fn drop(&mut self) {
        self.state.set_capturing(false);
    }
}

/// Result of one burst.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub started_at: DateTime<Local>,
    pub requested: u32,
    /// Written stills, in capture order.
    pub stills: Vec<PathBuf>,
}

impl CaptureSession {
    pub fn len(&self) -> usize {
        self.stills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stills.is_empty()
    }
}

/// Capture a burst of stills.
pub async fn run_burst(
    camera: &CameraResource,
    store: &Arc<StillStore>,
    state: &SystemState,
    count: u32,
    interval: Duration,
    stop: &AtomicBool,
) -> CaptureSession {
    let _capturing = CapturingGuard::raise(state);
    let mut session = CaptureSession {
        started_at: Local::now(),
        requested: count,
        stills: Vec::with_capacity(count as usize),
    };
    tracing::info!(count, interval_ms = interval.as_millis() as u64, "Burst started");

    for seq in 1..=count {
        if stop.load(Ordering::SeqCst) {
            tracing::info!(captured = session.len(), "Burst interrupted by stop request");
            break;
        }

        match camera.capture_frame(StreamId::Main).await {
            Ok(frame) => match store.save_burst_frame_blocking(frame, Local::now(), seq).await {
                Ok(path) => session.stills.push(path),
                Err(e) => tracing::warn!(seq, error = %e, "Failed to store burst still"),
            },
            Err(e) => tracing::warn!(seq, error = %e, "Burst capture failed"),
        }

        if seq < count && !sleep_unless_stopped(interval, stop).await {
            tracing::info!(captured = session.len(), "Burst interrupted by stop request");
            break;
        }
    }

    tracing::info!(
        captured = session.len(),
        requested = count,
        "Burst finished"
    );
    session
}

#[cfg(test)]
mod tests {
    use super::*;
    use stillwatch_camera::SyntheticCamera;

    async fn streaming_camera() -> (CameraResource, stillwatch_camera::SceneHandle) {
        let camera = SyntheticCamera::new((32, 24), (16, 12));
        let scene = camera.scene();
        let camera = CameraResource::new(Box::new(camera));
        camera.open().await.unwrap();
        camera.start().await.unwrap();
        (camera, scene)
    }

    fn temp_store(name: &str) -> (Arc<StillStore>, PathBuf) {
        let dir = std::env::temp_dir().join(name);
        let _ = std::fs::remove_dir_all(&dir);
        (Arc::new(StillStore::new(&dir, 80)), dir)
    }

    #[tokio::test]
    async fn captures_the_requested_count() {
        let (camera, scene) = streaming_camera().await;
        let (store, dir) = temp_store("stillwatch_test_burst_ok");
        let state = SystemState::new();
        let stop = AtomicBool::new(false);

        let session =
            run_burst(&camera, &store, &state, 3, Duration::from_millis(5), &stop).await;
        assert_eq!(session.len(), 3);
        assert_eq!(scene.main_captures(), 3);
        assert!(!state.is_capturing());
        assert!(session.stills.iter().all(|p| p.exists()));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn failed_frames_are_skipped() {
        let (camera, scene) = streaming_camera().await;
        let (store, dir) = temp_store("stillwatch_test_burst_partial");
        let state = SystemState::new();
        let stop = AtomicBool::new(false);

        scene.fail_next_main_captures(2);
        let session =
            run_burst(&camera, &store, &state, 3, Duration::from_millis(1), &stop).await;
        assert_eq!(session.len(), 1);
        assert!(session.stills[0].to_string_lossy().ends_with("_3.jpg"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn capturing_clears_when_every_frame_fails() {
        let (camera, scene) = streaming_camera().await;
        let (store, dir) = temp_store("stillwatch_test_burst_fail");
        let state = SystemState::new();
        let stop = AtomicBool::new(false);

        scene.fail_next_main_captures(5);
        let session =
            run_burst(&camera, &store, &state, 5, Duration::from_millis(1), &stop).await;
        assert!(session.is_empty());
        assert_eq!(session.requested, 5);
        assert!(!state.is_capturing());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn stop_flag_ends_the_burst_early() {
        let (camera, scene) = streaming_camera().await;
        let (store, dir) = temp_store("stillwatch_test_burst_stop");
        let state = SystemState::new();
        let stop = AtomicBool::new(true);

        let session =
            run_burst(&camera, &store, &state, 4, Duration::from_millis(1), &stop).await;
        assert!(session.is_empty());
        assert_eq!(scene.main_captures(), 0);
        assert!(!state.is_capturing());

        std::fs::remove_dir_all(&dir).ok();
    }
}
