//! Serialized access to the camera device.
//!
//! All device calls go through [`CameraResource::with_device`], which holds
//! the resource lock for exactly one synchronous backend call and runs that
//! call on Tokio's blocking pool. The closure cannot await, so the lock is
//! never held across a sleep or a multi-step sequence; a burst or
//! calibration step that needs several calls takes the lock once per call
//! and competing callers (e.g. a preview request) wait at most one device
//! call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Mutex;

use stillwatch_common::error::{StillwatchError, StillwatchResult};
use stillwatch_model::{ControlSet, Frame, StreamId};

use crate::backend::CameraBackend;

/// Lifecycle of the device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Closed,
    Open,
    Streaming,
}

/// Counters kept under the device lock.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceStats {
    pub opens: u64,
    pub open_failures: u64,
    pub frames_captured: u64,
    pub capture_failures: u64,
    pub control_writes: u64,
    /// Longest single device call, in milliseconds.
    pub max_call_ms: f64,
}

struct DeviceSlot {
    backend: Box<dyn CameraBackend>,
    state: DeviceState,
    /// A call failed; the handle may be stale and is closed before reopening.
    stale: bool,
    stats: ResourceStats,
}

/// The single owner of the camera device.
pub struct CameraResource {
    name: String,
    slot: Arc<Mutex<DeviceSlot>>,
    streaming: Arc<AtomicBool>,
    main_size: (u32, u32),
    lores_size: (u32, u32),
}

impl CameraResource {
    pub fn new(backend: Box<dyn CameraBackend>) -> Self {
        let name = backend.name().to_string();
        let main_size = backend.stream_size(StreamId::Main);
        let lores_size = backend.stream_size(StreamId::Lores);
        Self {
            name,
            slot: Arc::new(Mutex::new(DeviceSlot {
                backend,
                state: DeviceState::Closed,
                stale: false,
                stats: ResourceStats::default(),
            })),
            streaming: Arc::new(AtomicBool::new(false)),
            main_size,
            lores_size,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured size of a stream.
    pub fn stream_size(&self, stream: StreamId) -> (u32, u32) {
        match stream {
            StreamId::Main => self.main_size,
            StreamId::Lores => self.lores_size,
        }
    }

    /// Lock-free check used by loops waiting for the camera.
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> DeviceState {
        self.slot.lock().await.state
    }

    pub async fn stats(&self) -> ResourceStats {
        self.slot.lock().await.stats.clone()
    }

    /// Open the device. A no-op if already open and healthy; a stale handle
    /// from an earlier failure is closed first.
    pub async fn open(&self) -> StillwatchResult<()> {
        self.with_device("open", |slot| {
            if slot.state != DeviceState::Closed && !slot.stale {
                return Ok(());
            }
            if slot.stale || slot.state != DeviceState::Closed {
                tracing::debug!(camera = %slot.backend.name(), "Closing stale camera handle");
                if let Err(e) = slot.backend.close() {
                    tracing::warn!(error = %e, "Failed to close stale camera handle");
                }
                slot.state = DeviceState::Closed;
                slot.stale = false;
            }

            match slot.backend.open() {
                Ok(()) => {
                    slot.state = DeviceState::Open;
                    slot.stats.opens += 1;
                    Ok(())
                }
                Err(e) => {
                    slot.stale = true;
                    slot.stats.open_failures += 1;
                    Err(e)
                }
            }
        })
        .await
    }

    /// Start streaming. A no-op if already streaming.
    pub async fn start(&self) -> StillwatchResult<()> {
        self.with_device("start", |slot| match slot.state {
            DeviceState::Streaming => Ok(()),
            DeviceState::Closed => Err(StillwatchError::camera_not_ready("camera is not open")),
            DeviceState::Open => match slot.backend.start() {
                Ok(()) => {
                    slot.state = DeviceState::Streaming;
                    Ok(())
                }
                Err(e) => {
                    slot.stale = true;
                    Err(e)
                }
            },
        })
        .await
    }

    /// Stop streaming, keeping the device open.
    pub async fn stop(&self) -> StillwatchResult<()> {
        self.with_device("stop", |slot| {
            if slot.state != DeviceState::Streaming {
                return Ok(());
            }
            let result = slot.backend.stop();
            slot.state = DeviceState::Open;
            if result.is_err() {
                slot.stale = true;
            }
            result
        })
        .await
    }

    /// Release the device.
    pub async fn close(&self) -> StillwatchResult<()> {
        self.with_device("close", |slot| {
            if slot.state == DeviceState::Closed && !slot.stale {
                return Ok(());
            }
            let result = slot.backend.close();
            slot.state = DeviceState::Closed;
            slot.stale = false;
            result
        })
        .await
    }

    /// Capture one frame. The returned frame is owned by the caller.
    pub async fn capture_frame(&self, stream: StreamId) -> StillwatchResult<Frame> {
        let expected = self.stream_size(stream);
        self.with_device("capture", move |slot| {
            if slot.state != DeviceState::Streaming {
                return Err(StillwatchError::camera_not_ready("camera is not streaming"));
            }
            let frame = slot.backend.capture(stream).and_then(|frame| {
                if frame.stream() != stream || frame.dimensions() != expected {
                    Err(StillwatchError::camera(format!(
                        "expected {stream} frame {}x{}, got {} {}x{}",
                        expected.0,
                        expected.1,
                        frame.stream(),
                        frame.width(),
                        frame.height()
                    )))
                } else {
                    Ok(frame)
                }
            });
            match frame {
                Ok(frame) => {
                    slot.stale = false;
                    slot.stats.frames_captured += 1;
                    Ok(frame)
                }
                Err(e) => {
                    slot.stale = true;
                    slot.stats.capture_failures += 1;
                    Err(e)
                }
            }
        })
        .await
    }

    /// Write a set of controls in one device call.
    pub async fn set_controls(&self, controls: &ControlSet) -> StillwatchResult<()> {
        let controls = controls.clone();
        self.with_device("set_controls", move |slot| {
            if slot.state == DeviceState::Closed {
                return Err(StillwatchError::camera_not_ready("camera is not open"));
            }
            slot.backend.set_controls(&controls)?;
            slot.stats.control_writes += 1;
            Ok(())
        })
        .await
    }

    /// The single acquisition primitive. The lock is released as soon as
    /// `op` returns. A panicking backend call marks the handle stale and
    /// surfaces as a camera error.
    async fn with_device<T, F>(&self, label: &'static str, op: F) -> StillwatchResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut DeviceSlot) -> StillwatchResult<T> + Send + 'static,
    {
        let mut slot = Arc::clone(&self.slot).lock_owned().await;
        let streaming = Arc::clone(&self.streaming);
        let call = tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            let result = op(&mut *slot);
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            if elapsed_ms > slot.stats.max_call_ms {
                slot.stats.max_call_ms = elapsed_ms;
            }
            streaming.store(
                slot.state == DeviceState::Streaming && !slot.stale,
                Ordering::SeqCst,
            );
            (result, elapsed_ms)
        })
        .await;

        match call {
            Ok((Err(e), _)) => {
                tracing::debug!(camera = %self.name, op = label, error = %e, "Camera call failed");
                Err(e)
            }
            Ok((Ok(value), elapsed_ms)) => {
                tracing::trace!(camera = %self.name, op = label, elapsed_ms, "Camera call");
                Ok(value)
            }
            Err(e) => {
                let mut slot = self.slot.lock().await;
                slot.stale = true;
                self.streaming.store(false, Ordering::SeqCst);
                drop(slot);
                tracing::error!(camera = %self.name, op = label, error = %e, "Camera call panicked");
                Err(StillwatchError::camera(format!("{label} call did not complete: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticCamera;

    fn resource() -> (CameraResource, crate::SceneHandle) {
        let camera = SyntheticCamera::new((64, 48), (16, 12));
        let scene = camera.scene();
        (CameraResource::new(Box::new(camera)), scene)
    }

    #[tokio::test]
    async fn capture_requires_streaming() {
        let (camera, _) = resource();
        let err = camera.capture_frame(StreamId::Lores).await.unwrap_err();
        assert!(matches!(err, StillwatchError::CameraNotReady { .. }));

        camera.open().await.unwrap();
        camera.start().await.unwrap();
        assert!(camera.is_streaming());

        let frame = camera.capture_frame(StreamId::Lores).await.unwrap();
        assert_eq!(frame.dimensions(), (16, 12));
        let frame = camera.capture_frame(StreamId::Main).await.unwrap();
        assert_eq!(frame.dimensions(), (64, 48));
    }

    #[tokio::test]
    async fn open_is_idempotent_when_healthy() {
        let (camera, scene) = resource();
        camera.open().await.unwrap();
        camera.open().await.unwrap();
        assert_eq!(scene.open_attempts(), 1);
        assert_eq!(scene.close_calls(), 0);
    }

    #[tokio::test]
    async fn open_after_failure_closes_stale_handle() {
        let (camera, scene) = resource();
        scene.fail_next_opens(1);

        assert!(camera.open().await.is_err());
        assert_eq!(camera.state().await, DeviceState::Closed);

        camera.open().await.unwrap();
        assert_eq!(scene.open_attempts(), 2);
        assert_eq!(scene.close_calls(), 1);
        assert_eq!(camera.stats().await.open_failures, 1);
    }

    #[tokio::test]
    async fn capture_failure_marks_handle_stale() {
        let (camera, scene) = resource();
        camera.open().await.unwrap();
        camera.start().await.unwrap();

        scene.fail_next_captures(1);
        assert!(camera.capture_frame(StreamId::Lores).await.is_err());
        assert!(!camera.is_streaming());

        camera.open().await.unwrap();
        camera.start().await.unwrap();
        assert!(camera.is_streaming());
        assert_eq!(scene.close_calls(), 1);
        assert!(camera.capture_frame(StreamId::Lores).await.is_ok());
    }

    #[tokio::test]
    async fn panicking_backend_call_becomes_an_error() {
        let (camera, scene) = resource();
        camera.open().await.unwrap();
        camera.start().await.unwrap();

        scene.panic_next_captures(1);
        let err = camera.capture_frame(StreamId::Lores).await.unwrap_err();
        assert!(matches!(err, StillwatchError::Camera { .. }));
        assert!(!camera.is_streaming());

        // The lock was released and the stale handle is reopened.
        camera.open().await.unwrap();
        camera.start().await.unwrap();
        assert!(camera.capture_frame(StreamId::Lores).await.is_ok());
        assert_eq!(scene.close_calls(), 1);
    }

    #[tokio::test]
    async fn controls_need_an_open_device() {
        let (camera, scene) = resource();
        assert!(camera.set_controls(&ControlSet::awb_reset()).await.is_err());
        camera.open().await.unwrap();
        camera.set_controls(&ControlSet::awb_reset()).await.unwrap();
        assert_eq!(scene.control_writes().len(), 1);
    }
}
