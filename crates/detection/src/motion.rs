//! Frame-differencing motion detection.
//!
//! The detector keeps one baseline: the previous smoothed lores luminance
//! frame. Each new frame is compared against it and then replaces it, so
//! motion is measured between consecutive frames rather than against a
//! fixed reference.

use image::imageops;
use image::GrayImage;

use stillwatch_common::config::MonitorSettings;
use stillwatch_common::error::{StillwatchError, StillwatchResult};
use stillwatch_model::Frame;

use crate::mask::RegionMask;

/// Tunables read from the monitor settings on every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionParams {
    pub enabled: bool,
    /// Per-pixel difference a pixel must exceed to count as changed.
    pub sensitivity: u8,
    /// Changed pixels a frame must exceed to report motion.
    pub threshold: u32,
    pub blur_sigma: f32,
    pub dilate_iterations: u32,
}

impl From<&MonitorSettings> for DetectionParams {
    fn from(settings: &MonitorSettings) -> Self {
        Self {
            enabled: settings.motion_detection_enabled,
            sensitivity: settings.motion_sensitivity,
            threshold: settings.motion_threshold,
            blur_sigma: settings.blur_sigma,
            dilate_iterations: settings.dilate_iterations,
        }
    }
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self::from(&MonitorSettings::default())
    }
}

/// Outcome of comparing one frame against the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Detection {
    pub motion: bool,
    pub changed_pixels: u32,
    /// Largest absolute difference seen anywhere in the frame.
    pub max_diff: u8,
    /// This frame became the first baseline; nothing was compared.
    pub baseline_only: bool,
}

#[derive(Debug, Default)]
pub struct MotionDetector {
    baseline: Option<GrayImage>,
}

impl MotionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    /// Forget the baseline; the next frame can never report motion.
    pub fn reset(&mut self) {
        self.baseline = None;
    }

    /// Run detection on a lores frame.
    pub fn process(
        &mut self,
        frame: &Frame,
        params: &DetectionParams,
        mask: Option<&RegionMask>,
    ) -> StillwatchResult<Detection> {
        if !params.enabled {
            return Ok(Detection::default());
        }
        let luma = frame.to_luma_image()?;
        self.process_luma(luma, params, mask)
    }

    /// Run detection on a luminance image.
    pub fn process_luma(
        &mut self,
        luma: GrayImage,
        params: &DetectionParams,
        mask: Option<&RegionMask>,
    ) -> StillwatchResult<Detection> {
        if !params.enabled {
            return Ok(Detection::default());
        }

        let current = if params.blur_sigma > 0.0 {
            imageops::blur(&luma, params.blur_sigma)
        } else {
            luma
        };

        if let Some(mask) = mask {
            if mask.dimensions() != current.dimensions() {
                return Err(StillwatchError::detection(format!(
                    "mask is {}x{} but frame is {}x{}",
                    mask.width(),
                    mask.height(),
                    current.width(),
                    current.height()
                )));
            }
        }

        let baseline = match self.baseline.take() {
            Some(previous) if previous.dimensions() == current.dimensions() => previous,
            Some(previous) => {
                tracing::debug!(
                    old = ?previous.dimensions(),
                    new = ?current.dimensions(),
                    "Frame size changed; discarding baseline"
                );
                self.baseline = Some(current);
                return Ok(Detection {
                    baseline_only: true,
                    ..Detection::default()
                });
            }
            None => {
                self.baseline = Some(current);
                return Ok(Detection {
                    baseline_only: true,
                    ..Detection::default()
                });
            }
        };

        let mut max_diff = 0u8;
        let mut changed: Vec<bool> = baseline
            .as_raw()
            .iter()
            .zip(current.as_raw())
            .enumerate()
            .map(|(i, (&before, &after))| {
                let diff = before.abs_diff(after);
                max_diff = max_diff.max(diff);
                let inside = mask.map_or(true, |m| m.cells()[i]);
                inside && diff > params.sensitivity
            })
            .collect();

        if params.dilate_iterations > 0 {
            for _ in 0..params.dilate_iterations {
                changed = dilate(&changed, current.width() as usize, current.height() as usize);
            }
            // Dilation must not grow the changed area past the regions.
            if let Some(mask) = mask {
                for (cell, &inside) in changed.iter_mut().zip(mask.cells()) {
                    *cell &= inside;
                }
            }
        }

        let changed_pixels = changed.iter().filter(|&&c| c).count() as u32;
        self.baseline = Some(current);

        Ok(Detection {
            motion: changed_pixels > params.threshold,
            changed_pixels,
            max_diff,
            baseline_only: false,
        })
    }
}

/// One pass of 3x3 binary dilation.
fn dilate(cells: &[bool], width: usize, height: usize) -> Vec<bool> {
    let mut out = vec![false; cells.len()];
    for y in 0..height {
        for x in 0..width {
            if !cells[y * width + x] {
                continue;
            }
            for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                    out[ny * width + nx] = true;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::build_region_mask;

    fn params() -> DetectionParams {
        DetectionParams {
            enabled: true,
            sensitivity: 25,
            threshold: 500,
            blur_sigma: 0.0,
            dilate_iterations: 0,
        }
    }

    fn flat(level: u8) -> GrayImage {
        GrayImage::from_pixel(100, 80, image::Luma([level]))
    }

    fn with_block(level: u8, x: u32, y: u32, w: u32, h: u32, value: u8) -> GrayImage {
        let mut img = flat(level);
        for yy in y..y + h {
            for xx in x..x + w {
                img.put_pixel(xx, yy, image::Luma([value]));
            }
        }
        img
    }

    #[test]
    fn first_frame_never_reports_motion() {
        let mut detector = MotionDetector::new();
        let d = detector
            .process_luma(with_block(0, 0, 0, 100, 80, 255), &params(), None)
            .unwrap();
        assert!(!d.motion);
        assert!(d.baseline_only);
        assert!(detector.has_baseline());
    }

    #[test]
    fn identical_frames_do_not_trigger() {
        let mut detector = MotionDetector::new();
        detector.process_luma(flat(120), &params(), None).unwrap();
        let d = detector.process_luma(flat(120), &params(), None).unwrap();
        assert!(!d.motion);
        assert_eq!(d.changed_pixels, 0);
        assert_eq!(d.max_diff, 0);
    }

    #[test]
    fn six_hundred_changed_pixels_trigger() {
        let mut detector = MotionDetector::new();
        detector.process_luma(flat(100), &params(), None).unwrap();
        let d = detector
            .process_luma(with_block(100, 10, 10, 30, 20, 160), &params(), None)
            .unwrap();
        assert!(d.motion);
        assert_eq!(d.changed_pixels, 600);
        assert_eq!(d.max_diff, 60);
    }

    #[test]
    fn differences_at_the_sensitivity_do_not_count() {
        let mut detector = MotionDetector::new();
        detector.process_luma(flat(100), &params(), None).unwrap();
        let d = detector
            .process_luma(with_block(100, 10, 10, 30, 20, 125), &params(), None)
            .unwrap();
        assert_eq!(d.changed_pixels, 0);
        assert_eq!(d.max_diff, 25);
    }

    #[test]
    fn baseline_slides_forward() {
        let mut detector = MotionDetector::new();
        detector.process_luma(flat(100), &params(), None).unwrap();
        let moved = with_block(100, 10, 10, 30, 20, 160);
        assert!(detector.process_luma(moved.clone(), &params(), None).unwrap().motion);
        assert!(!detector.process_luma(moved, &params(), None).unwrap().motion);
    }

    #[test]
    fn mask_excludes_changes_outside_regions() {
        let mask = build_region_mask(&[[50, 0, 100, 80]], true, (100, 80), (100, 80)).unwrap();
        let mut detector = MotionDetector::new();
        detector.process_luma(flat(100), &params(), Some(&mask)).unwrap();
        let d = detector
            .process_luma(with_block(100, 10, 10, 30, 20, 200), &params(), Some(&mask))
            .unwrap();
        assert!(!d.motion);
        assert_eq!(d.changed_pixels, 0);
        assert_eq!(d.max_diff, 100);
    }

    #[test]
    fn mask_of_the_wrong_size_is_an_error() {
        let mask = RegionMask::empty(10, 10);
        let mut detector = MotionDetector::new();
        assert!(detector.process_luma(flat(100), &params(), Some(&mask)).is_err());
    }

    #[test]
    fn reset_discards_the_baseline() {
        let mut detector = MotionDetector::new();
        detector.process_luma(flat(0), &params(), None).unwrap();
        detector.reset();
        let d = detector.process_luma(flat(255), &params(), None).unwrap();
        assert!(!d.motion);
        assert!(d.baseline_only);
    }

    #[test]
    fn resolution_change_restarts_the_baseline() {
        let mut detector = MotionDetector::new();
        detector.process_luma(flat(0), &params(), None).unwrap();
        let d = detector
            .process_luma(GrayImage::from_pixel(50, 40, image::Luma([255])), &params(), None)
            .unwrap();
        assert!(d.baseline_only);
        assert!(!d.motion);
    }

    #[test]
    fn disabled_detection_keeps_no_baseline() {
        let mut detector = MotionDetector::new();
        let p = DetectionParams {
            enabled: false,
            ..params()
        };
        detector.process_luma(flat(0), &p, None).unwrap();
        assert!(!detector.has_baseline());
    }

    #[test]
    fn dilation_grows_the_changed_area() {
        let mut detector = MotionDetector::new();
        let p = DetectionParams {
            dilate_iterations: 1,
            threshold: 0,
            ..params()
        };
        detector.process_luma(flat(100), &p, None).unwrap();
        let d = detector
            .process_luma(with_block(100, 10, 10, 10, 10, 200), &p, None)
            .unwrap();
        assert_eq!(d.changed_pixels, 12 * 12);
    }

    #[test]
    fn dilation_stays_inside_the_mask() {
        let mask = build_region_mask(&[[50, 0, 100, 80]], true, (100, 80), (100, 80)).unwrap();
        let mut detector = MotionDetector::new();
        let p = DetectionParams {
            dilate_iterations: 1,
            threshold: 0,
            ..params()
        };
        detector.process_luma(flat(100), &p, Some(&mask)).unwrap();
        let d = detector
            .process_luma(with_block(100, 50, 10, 10, 10, 200), &p, Some(&mask))
            .unwrap();
        // The grown 12x12 square loses its column left of x = 50.
        assert_eq!(d.changed_pixels, 11 * 12);
    }

    #[test]
    fn smoothing_still_detects_a_large_block() {
        let mut detector = MotionDetector::new();
        let p = DetectionParams {
            blur_sigma: 3.5,
            ..params()
        };
        detector.process_luma(flat(100), &p, None).unwrap();
        let d = detector
            .process_luma(with_block(100, 20, 20, 40, 30, 200), &p, None)
            .unwrap();
        assert!(d.motion);
        assert!(d.changed_pixels >= 900);
    }
}
