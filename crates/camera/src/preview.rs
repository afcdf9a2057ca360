//! Short-lived preview cache.
//!
//! Clients poll previews far faster than the scene changes. Within the TTL
//! every request for a stream is served from the last encoded JPEG instead
//! of issuing a fresh device capture.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tokio::sync::Mutex;

use stillwatch_common::error::{StillwatchError, StillwatchResult};
use stillwatch_model::StreamId;

use crate::resource::CameraResource;

/// An encoded preview image.
#[derive(Debug, Clone)]
pub struct Preview {
    pub stream: StreamId,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Local>,
    pub jpeg: Arc<Vec<u8>>,
}

struct CachedPreview {
    fetched: Instant,
    preview: Preview,
}

pub struct PreviewCache {
    ttl: Duration,
    quality: u8,
    entries: Mutex<HashMap<StreamId, CachedPreview>>,
}

impl PreviewCache {
    pub fn new(ttl: Duration, quality: u8) -> Self {
        Self {
            ttl,
            quality,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return a cached preview younger than the TTL, or capture a new one.
    ///
    /// The cache lock is held while capturing so concurrent pollers share
    /// one device capture.
    pub async fn get_or_capture(
        &self,
        camera: &CameraResource,
        stream: StreamId,
    ) -> StillwatchResult<Preview> {
        let mut entries = self.entries.lock().await;
        if let Some(cached) = entries.get(&stream) {
            if cached.fetched.elapsed() < self.ttl {
                return Ok(cached.preview.clone());
            }
        }

        let frame = camera.capture_frame(stream).await?;
        let (width, height) = frame.dimensions();
        let quality = self.quality;
        let jpeg = tokio::task::spawn_blocking(move || frame.encode_jpeg(quality))
            .await
            .map_err(|e| StillwatchError::camera(format!("preview encoder task failed: {e}")))??;
        let preview = Preview {
            stream,
            width,
            height,
            captured_at: Local::now(),
            jpeg: Arc::new(jpeg),
        };
        entries.insert(
            stream,
            CachedPreview {
                fetched: Instant::now(),
                preview: preview.clone(),
            },
        );
        Ok(preview)
    }

    /// Drop all cached previews.
    pub async fn invalidate(&self) {
        self.entries.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticCamera;

    #[tokio::test]
    async fn rapid_polls_share_one_capture() {
        let camera = SyntheticCamera::new((32, 16), (16, 8));
        let scene = camera.scene();
        let camera = CameraResource::new(Box::new(camera));
        camera.open().await.unwrap();
        camera.start().await.unwrap();

        let cache = PreviewCache::new(Duration::from_secs(60), 80);
        let first = cache.get_or_capture(&camera, StreamId::Lores).await.unwrap();
        let second = cache.get_or_capture(&camera, StreamId::Lores).await.unwrap();
        assert_eq!(scene.lores_captures(), 1);
        assert!(Arc::ptr_eq(&first.jpeg, &second.jpeg));

        cache.get_or_capture(&camera, StreamId::Main).await.unwrap();
        assert_eq!(scene.main_captures(), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_recaptured() {
        let camera = SyntheticCamera::new((32, 16), (16, 8));
        let scene = camera.scene();
        let camera = CameraResource::new(Box::new(camera));
        camera.open().await.unwrap();
        camera.start().await.unwrap();

        let cache = PreviewCache::new(Duration::ZERO, 80);
        cache.get_or_capture(&camera, StreamId::Lores).await.unwrap();
        cache.get_or_capture(&camera, StreamId::Lores).await.unwrap();
        assert_eq!(scene.lores_captures(), 2);
    }
}
