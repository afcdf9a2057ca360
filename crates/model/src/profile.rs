//! Camera control profiles.
//!
//! A profile is a fixed bundle of exposure, white balance, and noise
//! reduction controls. The active profile follows ambient light: the mean
//! lores luminance is compared against two thresholds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use stillwatch_common::error::StillwatchError;

/// Mean luminance at or above which DAY is selected.
pub const DAY_LUMA_THRESHOLD: f64 = 140.0;

/// Mean luminance at or above which DUSK is selected (below DAY).
pub const DUSK_LUMA_THRESHOLD: f64 = 90.0;

/// Named camera profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CameraProfile {
    Day,
    Dusk,
    Night,
}

/// White balance preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AwbMode {
    Auto,
    Daylight,
    Cloudy,
    Tungsten,
    Indoor,
}

/// Sensor noise reduction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseReductionMode {
    Off,
    Fast,
    HighQuality,
}

/// A set of control writes. `None` leaves the device's current value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ae_enable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awb_enable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awb_mode: Option<AwbMode>,
    /// Manual exposure time in microseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_time_us: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analogue_gain: Option<f32>,
    /// Exposure compensation in stops.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_value: Option<f32>,
    /// Manual (red, blue) gains, used when AWB is off.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colour_gains: Option<(f32, f32)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_reduction: Option<NoiseReductionMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contrast: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saturation: Option<f32>,
}

impl ControlSet {
    /// Re-enable automatic white balance and nothing else.
    pub fn awb_reset() -> Self {
        Self {
            awb_enable: Some(true),
            ..Self::default()
        }
    }

    /// Overlay `other` onto `self`; set fields in `other` win.
    pub fn merge(&mut self, other: &ControlSet) {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field;
                })*
            };
        }
        overlay!(
            ae_enable,
            awb_enable,
            awb_mode,
            exposure_time_us,
            analogue_gain,
            exposure_value,
            colour_gains,
            noise_reduction,
            brightness,
            contrast,
            saturation
        );
    }
}

impl CameraProfile {
    pub const ALL: [CameraProfile; 3] = [CameraProfile::Day, CameraProfile::Dusk, CameraProfile::Night];

    /// Classify a mean luminance value.
    pub fn classify(mean_luma: f64) -> Self {
        if mean_luma >= DAY_LUMA_THRESHOLD {
            CameraProfile::Day
        } else if mean_luma >= DUSK_LUMA_THRESHOLD {
            CameraProfile::Dusk
        } else {
            CameraProfile::Night
        }
    }

    /// Classify with a dead band around the thresholds: the active profile
    /// is kept while the luminance is within `margin` of its range.
    pub fn classify_with_hysteresis(
        mean_luma: f64,
        current: Option<CameraProfile>,
        margin: f64,
    ) -> Self {
        let raw = Self::classify(mean_luma);
        match current {
            Some(active) if margin > 0.0 && raw != active => {
                if Self::classify(mean_luma + margin) == active
                    || Self::classify(mean_luma - margin) == active
                {
                    active
                } else {
                    raw
                }
            }
            _ => raw,
        }
    }

    /// Inclusive-exclusive luminance range this profile covers.
    pub fn luma_range(&self) -> (f64, f64) {
        match self {
            CameraProfile::Day => (DAY_LUMA_THRESHOLD, 256.0),
            CameraProfile::Dusk => (DUSK_LUMA_THRESHOLD, DAY_LUMA_THRESHOLD),
            CameraProfile::Night => (0.0, DUSK_LUMA_THRESHOLD),
        }
    }

    /// The full control set written when this profile is applied.
    pub fn controls(&self) -> ControlSet {
        match self {
            CameraProfile::Day => ControlSet {
                ae_enable: Some(true),
                awb_enable: Some(true),
                awb_mode: Some(AwbMode::Auto),
                exposure_time_us: None,
                analogue_gain: None,
                exposure_value: Some(0.0),
                colour_gains: None,
                noise_reduction: Some(NoiseReductionMode::Fast),
                brightness: Some(0.0),
                contrast: Some(1.0),
                saturation: Some(1.0),
            },
            CameraProfile::Dusk => ControlSet {
                ae_enable: Some(true),
                awb_enable: Some(true),
                awb_mode: Some(AwbMode::Cloudy),
                exposure_time_us: None,
                analogue_gain: None,
                exposure_value: Some(0.5),
                colour_gains: None,
                noise_reduction: Some(NoiseReductionMode::HighQuality),
                brightness: Some(0.05),
                contrast: Some(1.1),
                saturation: Some(1.0),
            },
            CameraProfile::Night => ControlSet {
                ae_enable: Some(false),
                awb_enable: Some(false),
                awb_mode: None,
                exposure_time_us: Some(100_000),
                analogue_gain: Some(8.0),
                exposure_value: Some(0.0),
                colour_gains: Some((1.6, 1.4)),
                noise_reduction: Some(NoiseReductionMode::HighQuality),
                brightness: Some(0.1),
                contrast: Some(1.2),
                saturation: Some(0.8),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CameraProfile::Day => "DAY",
            CameraProfile::Dusk => "DUSK",
            CameraProfile::Night => "NIGHT",
        }
    }
}

impl fmt::Display for CameraProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CameraProfile {
    type Err = StillwatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DAY" => Ok(CameraProfile::Day),
            "DUSK" => Ok(CameraProfile::Dusk),
            "NIGHT" => Ok(CameraProfile::Night),
            other => Err(StillwatchError::config(format!(
                "unknown camera profile '{other}' (expected DAY, DUSK or NIGHT)"
            ))),
        }
    }
}
