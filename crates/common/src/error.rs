//! Error types shared across Stillwatch crates.

use std::path::PathBuf;

/// Top-level error type for Stillwatch operations.
#[derive(Debug, thiserror::Error)]
pub enum StillwatchError {
    #[error("Camera error: {message}")]
    Camera { message: String },

    #[error("Camera not ready: {message}")]
    CameraNotReady { message: String },

    #[error("Detection error: {message}")]
    Detection { message: String },

    #[error("Calibration error: {message}")]
    Calibration { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using StillwatchError.
pub type StillwatchResult<T> = Result<T, StillwatchError>;

impl StillwatchError {
    pub fn camera(msg: impl Into<String>) -> Self {
        Self::Camera {
            message: msg.into(),
        }
    }

    pub fn camera_not_ready(msg: impl Into<String>) -> Self {
        Self::CameraNotReady {
            message: msg.into(),
        }
    }

    pub fn detection(msg: impl Into<String>) -> Self {
        Self::Detection {
            message: msg.into(),
        }
    }

    pub fn calibration(msg: impl Into<String>) -> Self {
        Self::Calibration {
            message: msg.into(),
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }
}
