//! JPEG still storage.
//!
//! Encoding and file writes are blocking; async callers go through the
//! `*_blocking` variants, which run on Tokio's blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::Serialize;

use stillwatch_common::clock::file_stamp;
use stillwatch_common::error::{StillwatchError, StillwatchResult};
use stillwatch_model::Frame;

const STILL_EXTENSION: &str = "jpg";

/// One stored still as reported by [`StillStore::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StillInfo {
    pub filename: String,
    pub size_bytes: u64,
    pub created: DateTime<Local>,
}

/// Writes encoded stills into one directory.
#[derive(Debug, Clone)]
pub struct StillStore {
    dir: PathBuf,
    quality: u8,
}

impl StillStore {
    pub fn new(dir: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            dir: dir.into(),
            quality,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `motion_<stamp>_<seq>.jpg`
    pub fn burst_file_name(at: &DateTime<Local>, seq: u32) -> String {
        format!("motion_{}_{seq}.{STILL_EXTENSION}", file_stamp(at))
    }

    /// `snapshot_<stamp>.jpg`
    pub fn snapshot_file_name(at: &DateTime<Local>) -> String {
        format!("snapshot_{}.{STILL_EXTENSION}", file_stamp(at))
    }

    /// Encode and write one burst frame.
    pub fn save_burst_frame(
        &self,
        frame: &Frame,
        at: &DateTime<Local>,
        seq: u32,
    ) -> StillwatchResult<PathBuf> {
        self.write(frame, &Self::burst_file_name(at, seq))
    }

    /// Encode and write an on-demand snapshot.
    pub fn save_snapshot(&self, frame: &Frame, at: &DateTime<Local>) -> StillwatchResult<PathBuf> {
        self.write(frame, &Self::snapshot_file_name(at))
    }

    pub async fn save_burst_frame_blocking(
        self: &Arc<Self>,
        frame: Frame,
        at: DateTime<Local>,
        seq: u32,
    ) -> StillwatchResult<PathBuf> {
        self.write_blocking(frame, Self::burst_file_name(&at, seq)).await
    }

    pub async fn save_snapshot_blocking(
        self: &Arc<Self>,
        frame: Frame,
        at: DateTime<Local>,
    ) -> StillwatchResult<PathBuf> {
        self.write_blocking(frame, Self::snapshot_file_name(&at)).await
    }

    async fn write_blocking(self: &Arc<Self>, frame: Frame, name: String) -> StillwatchResult<PathBuf> {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.write(&frame, &name))
            .await
            .map_err(|e| StillwatchError::storage(format!("still writer task failed: {e}")))?
    }

    fn write(&self, frame: &Frame, name: &str) -> StillwatchResult<PathBuf> {
        let jpeg = frame.encode_jpeg(self.quality)?;
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        std::fs::write(&path, &jpeg)?;
        tracing::debug!(path = %path.display(), bytes = jpeg.len(), "Wrote still");
        Ok(path)
    }

    /// Stored stills, newest name first. A missing directory is empty.
    pub fn list(&self) -> StillwatchResult<Vec<StillInfo>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut stills = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(STILL_EXTENSION) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let created = metadata.created().or_else(|_| metadata.modified())?;
            stills.push(StillInfo {
                filename: entry.file_name().to_string_lossy().into_owned(),
                size_bytes: metadata.len(),
                created: DateTime::<Local>::from(created),
            });
        }

        stills.sort_by(|a, b| b.filename.cmp(&a.filename));
        Ok(stills)
    }

    /// Path of a stored still. Only plain `.jpg` file names inside the
    /// store directory are accepted.
    pub fn resolve(&self, name: &str) -> StillwatchResult<PathBuf> {
        let plain = Path::new(name)
            .file_name()
            .is_some_and(|file_name| file_name == name);
        let is_still = Path::new(name).extension().and_then(|ext| ext.to_str()) == Some(STILL_EXTENSION);
        if !plain || !is_still || name.contains(['/', '\\']) {
            return Err(StillwatchError::storage(format!("invalid still name: {name:?}")));
        }

        let path = self.dir.join(name);
        if !path.is_file() {
            return Err(StillwatchError::FileNotFound { path });
        }
        Ok(path)
    }

    /// Remove one stored still.
    pub fn delete(&self, name: &str) -> StillwatchResult<()> {
        let path = self.resolve(name)?;
        std::fs::remove_file(&path)?;
        tracing::info!(path = %path.display(), "Deleted still");
        Ok(())
    }
}
