//! Application configuration.
//!
//! Every section deserializes with defaults so a partial config file is
//! valid. Runtime changes to the monitoring settings go through
//! [`MonitorSettings::apply_update`], which only accepts recognised keys.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::clock::{Backoff, RetryPolicy};
use crate::error::{StillwatchError, StillwatchResult};

/// A detection rectangle `[x1, y1, x2, y2]` in full-resolution pixels.
pub type Region = [u32; 4];

/// Upper bound on stills per burst.
pub const MAX_BURST_COUNT: u32 = 100;

/// Upper bound on the pause between burst stills.
pub const MAX_BURST_INTERVAL_SECS: f64 = 3600.0;

/// Upper bound on second-granularity waits (cooldown, calibration period
/// and settle, diagnostics interval).
pub const MAX_WAIT_SECS: u64 = 86_400;

/// Upper bound on millisecond-granularity engine timings.
pub const MAX_TIMING_MS: u64 = 3_600_000;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where stills and the event log live.
    pub storage: StorageConfig,

    /// Camera stream geometry and encoding.
    pub camera: CameraConfig,

    /// Motion detection and capture settings.
    pub monitor: MonitorSettings,

    /// Loop timings and retry behaviour.
    pub engine: EngineConfig,

    /// Ambient-light calibration loop.
    pub calibration: CalibrationConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for burst and snapshot stills.
    pub stills_dir: PathBuf,

    /// JSON file holding the bounded motion event history.
    pub event_log: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Video device node used by hardware backends.
    pub device: PathBuf,

    /// Full-resolution (main) stream size, `[width, height]`.
    pub main_size: [u32; 2],

    /// Low-resolution (lores) stream size, `[width, height]`.
    pub lores_size: [u32; 2],

    /// JPEG quality for stills and previews (1-100).
    pub jpeg_quality: u8,
}

/// The settings the detection and capture loop consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Master switch for motion detection.
    pub motion_detection_enabled: bool,

    /// Number of changed pixels required to report motion.
    pub motion_threshold: u32,

    /// Per-pixel difference (0-255) above which a pixel counts as changed.
    pub motion_sensitivity: u8,

    /// Run a burst capture when motion is detected.
    pub capture_on_motion: bool,

    /// Stills per burst.
    pub burst_count: u32,

    /// Seconds between stills within a burst.
    pub burst_interval_secs: f64,

    /// Refractory period after a burst.
    pub cooldown_seconds: u64,

    /// Rectangles in full-resolution coordinates.
    pub detection_regions: Vec<Region>,

    /// Restrict detection to `detection_regions`.
    pub use_regions: bool,

    /// Write burst stills to disk.
    pub save_stills: bool,

    /// Gaussian sigma applied to the luminance plane before differencing.
    /// Zero disables smoothing.
    pub blur_sigma: f32,

    /// 3x3 dilation passes over the thresholded difference map.
    pub dilate_iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay between low-res frames while monitoring.
    pub frame_interval_ms: u64,

    /// Consecutive camera open/start attempts before giving up.
    pub init_attempts: u32,

    /// Fixed delay between camera open/start attempts.
    pub init_backoff_ms: u64,

    /// Pause after a mid-loop frame error before re-initializing.
    pub fault_pause_ms: u64,

    /// Interval between diagnostic summaries.
    pub diagnostics_interval_secs: u64,

    /// How long a stop request waits for a loop to exit.
    pub stop_join_timeout_ms: u64,

    /// How long a preview frame is reused.
    pub preview_ttl_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Run the automatic calibration loop.
    pub enabled: bool,

    /// Seconds between luminance samples.
    pub period_secs: u64,

    /// Seconds to let auto exposure converge after the camera starts.
    pub settle_secs: u64,

    /// Pause between re-enabling AWB and writing the profile controls.
    pub awb_reset_pause_ms: u64,

    /// Luminance margin required to leave the active profile.
    pub hysteresis: f64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "stillwatch_engine=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Include thread ids in text output.
    pub thread_ids: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = data_dir_default();
        Self {
            stills_dir: base.join("stills"),
            event_log: base.join("logs").join("motion_events.json"),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/video0"),
            main_size: [1920, 1080],
            lores_size: [640, 360],
            jpeg_quality: 90,
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            motion_detection_enabled: true,
            motion_threshold: 500,
            motion_sensitivity: 25,
            capture_on_motion: true,
            burst_count: 3,
            burst_interval_secs: 1.0,
            cooldown_seconds: 10,
            detection_regions: Vec::new(),
            use_regions: false,
            save_stills: true,
            blur_sigma: 3.5,
            dilate_iterations: 0,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 100,
            init_attempts: 3,
            init_backoff_ms: 2000,
            fault_pause_ms: 1000,
            diagnostics_interval_secs: 60,
            stop_join_timeout_ms: 5000,
            preview_ttl_ms: 500,
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_secs: 300,
            settle_secs: 5,
            awb_reset_pause_ms: 500,
            hysteresis: 0.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            thread_ids: false,
        }
    }
}

impl EngineConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn fault_pause(&self) -> Duration {
        Duration::from_millis(self.fault_pause_ms)
    }

    pub fn diagnostics_interval(&self) -> Duration {
        Duration::from_secs(self.diagnostics_interval_secs)
    }

    pub fn stop_join_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_join_timeout_ms)
    }

    pub fn preview_ttl(&self) -> Duration {
        Duration::from_millis(self.preview_ttl_ms)
    }

    pub fn validate(&self) -> StillwatchResult<()> {
        for (name, value) in [
            ("frame_interval_ms", self.frame_interval_ms),
            ("init_backoff_ms", self.init_backoff_ms),
            ("fault_pause_ms", self.fault_pause_ms),
            ("stop_join_timeout_ms", self.stop_join_timeout_ms),
            ("preview_ttl_ms", self.preview_ttl_ms),
        ] {
            check_at_most(name, value, MAX_TIMING_MS)?;
        }
        check_at_most(
            "diagnostics_interval_secs",
            self.diagnostics_interval_secs,
            MAX_WAIT_SECS,
        )
    }

    /// Retry policy for camera initialization.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.init_attempts.max(1),
            backoff: Backoff::Fixed(Duration::from_millis(self.init_backoff_ms)),
        }
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> StillwatchResult<()> {
        check_at_most("calibration.period_secs", self.period_secs, MAX_WAIT_SECS)?;
        check_at_most("calibration.settle_secs", self.settle_secs, MAX_WAIT_SECS)?;
        check_at_most(
            "calibration.awb_reset_pause_ms",
            self.awb_reset_pause_ms,
            MAX_TIMING_MS,
        )?;
        if !self.hysteresis.is_finite() || self.hysteresis < 0.0 {
            return Err(StillwatchError::config("hysteresis must be non-negative"));
        }
        Ok(())
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs.min(MAX_WAIT_SECS))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs.min(MAX_WAIT_SECS))
    }

    pub fn awb_reset_pause(&self) -> Duration {
        Duration::from_millis(self.awb_reset_pause_ms)
    }
}

impl MonitorSettings {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> StillwatchResult<()> {
        if self.burst_count > MAX_BURST_COUNT {
            return Err(StillwatchError::config(format!(
                "burst_count must be at most {MAX_BURST_COUNT}, got {}",
                self.burst_count
            )));
        }
        if !(0.0..=MAX_BURST_INTERVAL_SECS).contains(&self.burst_interval_secs) {
            return Err(StillwatchError::config(format!(
                "burst_interval_secs must be within 0..={MAX_BURST_INTERVAL_SECS}, got {}",
                self.burst_interval_secs
            )));
        }
        check_at_most("cooldown_seconds", self.cooldown_seconds, MAX_WAIT_SECS)?;
        if !self.blur_sigma.is_finite() || self.blur_sigma < 0.0 {
            return Err(StillwatchError::config(format!(
                "blur_sigma must be a non-negative number, got {}",
                self.blur_sigma
            )));
        }
        for region in &self.detection_regions {
            let [x1, y1, x2, y2] = *region;
            if x1 == x2 || y1 == y2 {
                return Err(StillwatchError::config(format!(
                    "detection region {region:?} has zero area"
                )));
            }
        }
        Ok(())
    }

    pub fn burst_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.burst_interval_secs.clamp(0.0, MAX_BURST_INTERVAL_SECS))
            .unwrap_or_default()
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds.min(MAX_WAIT_SECS))
    }

    /// Whether a burst should follow a detection.
    pub fn bursts_enabled(&self) -> bool {
        self.capture_on_motion && self.save_stills
    }

    /// Merge a partial update. The update is validated as a whole and
    /// rejected without side effects if the result would be invalid.
    pub fn apply_update(&mut self, update: ConfigUpdate) -> StillwatchResult<ConfigChange> {
        let mut next = self.clone();
        let mut changed = Vec::new();

        macro_rules! merge {
            ($field:ident) => {
                if let Some(value) = update.$field {
                    if next.$field != value {
                        next.$field = value;
                        changed.push(stringify!($field));
                    }
                }
            };
        }

        merge!(motion_detection_enabled);
        merge!(motion_threshold);
        merge!(motion_sensitivity);
        merge!(capture_on_motion);
        merge!(burst_count);
        merge!(burst_interval_secs);
        merge!(cooldown_seconds);
        merge!(detection_regions);
        merge!(use_regions);
        merge!(save_stills);
        merge!(blur_sigma);
        merge!(dilate_iterations);

        next.validate()?;

        let regions_changed = changed
            .iter()
            .any(|key| *key == "detection_regions" || *key == "use_regions");
        *self = next;

        Ok(ConfigChange {
            changed_keys: changed,
            regions_changed,
        })
    }
}

/// A partial update of [`MonitorSettings`]. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigUpdate {
    pub motion_detection_enabled: Option<bool>,
    pub motion_threshold: Option<u32>,
    pub motion_sensitivity: Option<u8>,
    pub capture_on_motion: Option<bool>,
    pub burst_count: Option<u32>,
    pub burst_interval_secs: Option<f64>,
    pub cooldown_seconds: Option<u64>,
    pub detection_regions: Option<Vec<Region>>,
    pub use_regions: Option<bool>,
    pub save_stills: Option<bool>,
    pub blur_sigma: Option<f32>,
    pub dilate_iterations: Option<u32>,
}

impl ConfigUpdate {
    /// Parse an update from JSON, rejecting unrecognised keys.
    pub fn from_json(json: &str) -> StillwatchResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| StillwatchError::config(format!("Invalid config update: {e}")))
    }
}

/// What an applied [`ConfigUpdate`] actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigChange {
    /// Keys whose values differ from before.
    pub changed_keys: Vec<&'static str>,

    /// The detection region set changed; the monitoring loop must restart.
    pub regions_changed: bool,
}

impl ConfigChange {
    pub fn is_empty(&self) -> bool {
        self.changed_keys.is_empty()
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load and validate config from an explicit path.
    pub fn load_from(path: impl AsRef<Path>) -> StillwatchResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StillwatchError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the standard location.
    pub fn save(&self) -> StillwatchResult<()> {
        self.save_to(config_file_path())
    }

    /// Save config to an explicit path.
    pub fn save_to(&self, path: impl AsRef<Path>) -> StillwatchResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> StillwatchResult<()> {
        let [main_w, main_h] = self.camera.main_size;
        let [lores_w, lores_h] = self.camera.lores_size;
        if main_w == 0 || main_h == 0 || lores_w == 0 || lores_h == 0 {
            return Err(StillwatchError::config("stream sizes must be non-zero"));
        }
        if lores_w > main_w || lores_h > main_h {
            return Err(StillwatchError::config(format!(
                "lores stream {lores_w}x{lores_h} is larger than main stream {main_w}x{main_h}"
            )));
        }
        if !(1..=100).contains(&self.camera.jpeg_quality) {
            return Err(StillwatchError::config("jpeg_quality must be within 1..=100"));
        }
        self.engine.validate()?;
        self.calibration.validate()?;
        self.monitor.validate()
    }
}

fn check_at_most(name: &str, value: u64, max: u64) -> StillwatchResult<()> {
    if value > max {
        return Err(StillwatchError::config(format!(
            "{name} must be at most {max}, got {value}"
        )));
    }
    Ok(())
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("stillwatch").join("config.json")
}

/// Default data directory.
fn data_dir_default() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("stillwatch")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_file_fills_defaults() {
        let json = r#"{ "monitor": { "motion_threshold": 800 } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.monitor.motion_threshold, 800);
        assert_eq!(config.monitor.motion_sensitivity, 25);
        assert_eq!(config.engine.init_attempts, 3);
    }

    #[test]
    fn update_rejects_unknown_keys() {
        let err = ConfigUpdate::from_json(r#"{ "motion_treshold": 10 }"#).unwrap_err();
        assert!(matches!(err, StillwatchError::Config { .. }));
    }

    #[test]
    fn update_reports_region_changes() {
        let mut settings = MonitorSettings::default();
        let update = ConfigUpdate::from_json(
            r#"{ "detection_regions": [[0, 0, 100, 100]], "motion_threshold": 300 }"#,
        )
        .unwrap();

        let change = settings.apply_update(update).unwrap();
        assert!(change.regions_changed);
        assert_eq!(change.changed_keys, vec!["motion_threshold", "detection_regions"]);
        assert_eq!(settings.detection_regions, vec![[0, 0, 100, 100]]);
    }

    #[test]
    fn unchanged_values_are_not_reported() {
        let mut settings = MonitorSettings::default();
        let update = ConfigUpdate {
            motion_threshold: Some(settings.motion_threshold),
            ..Default::default()
        };
        let change = settings.apply_update(update).unwrap();
        assert!(change.is_empty());
        assert!(!change.regions_changed);
    }

    #[test]
    fn invalid_update_leaves_settings_untouched() {
        let mut settings = MonitorSettings::default();
        let update = ConfigUpdate {
            motion_threshold: Some(42),
            detection_regions: Some(vec![[10, 10, 10, 50]]),
            ..Default::default()
        };
        assert!(settings.apply_update(update).is_err());
        assert_eq!(settings, MonitorSettings::default());
    }

    #[test]
    fn save_and_load_from_explicit_path() {
        let dir = std::env::temp_dir().join("stillwatch_test_config");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.monitor.cooldown_seconds = 42;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.monitor.cooldown_seconds, 42);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn unbounded_waits_are_rejected() {
        let mut settings = MonitorSettings::default();
        let update = ConfigUpdate {
            cooldown_seconds: Some(u64::MAX),
            ..Default::default()
        };
        assert!(settings.apply_update(update).is_err());

        let update = ConfigUpdate {
            burst_interval_secs: Some(1e20),
            ..Default::default()
        };
        assert!(settings.apply_update(update).is_err());
        assert_eq!(settings, MonitorSettings::default());

        let mut config = AppConfig::default();
        config.calibration.period_secs = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.engine.fault_pause_ms = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duration_getters_saturate() {
        let settings = MonitorSettings {
            cooldown_seconds: u64::MAX,
            burst_interval_secs: f64::NAN,
            ..MonitorSettings::default()
        };
        assert_eq!(settings.cooldown(), Duration::from_secs(MAX_WAIT_SECS));
        assert_eq!(settings.burst_interval(), Duration::ZERO);

        let settings = MonitorSettings {
            burst_interval_secs: 1e20,
            ..MonitorSettings::default()
        };
        assert_eq!(
            settings.burst_interval(),
            Duration::from_secs_f64(MAX_BURST_INTERVAL_SECS)
        );
    }

    #[test]
    fn oversized_lores_stream_is_rejected() {
        let mut config = AppConfig::default();
        config.camera.lores_size = [4000, 360];
        assert!(config.validate().is_err());
    }
}
