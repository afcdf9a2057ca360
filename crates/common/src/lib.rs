//! Stillwatch Common Utilities
//!
//! Shared infrastructure for all Stillwatch crates:
//! - Error types and result aliases
//! - Retry policies and interval gates for the long-running loops
//! - Tracing/logging initialization
//! - Configuration loading, validation, and partial updates

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
