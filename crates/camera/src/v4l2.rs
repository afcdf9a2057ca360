//! Video4Linux2 capture backend.
//!
//! One device node delivers YUYV frames at the main stream size. Main
//! frames are those converted to RGB; lores frames are their luminance
//! scaled down to the lores size, so both streams come from the same
//! sensor readout.

use std::path::PathBuf;

use image::imageops::{self, FilterType};
use image::GrayImage;
use v4l::buffer::Type;
use v4l::control::{Control, Value};
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use stillwatch_common::error::{StillwatchError, StillwatchResult};
use stillwatch_model::{ControlSet, Frame, StreamId};

use crate::backend::CameraBackend;

const YUYV: &[u8; 4] = b"YUYV";
const BUFFER_COUNT: u32 = 4;

const CID_AUTO_WHITE_BALANCE: u32 = 0x0098_090c;
const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
const EXPOSURE_MANUAL: i64 = 1;
const EXPOSURE_APERTURE_PRIORITY: i64 = 3;

struct Session {
    device: Device,
    /// Present while streaming. Dropping it stops the stream and unmaps
    /// the buffers.
    stream: Option<MmapStream<'static>>,
}

/// A V4L2 camera such as a USB webcam or the Pi camera's V4L2 node.
pub struct V4l2Camera {
    name: String,
    path: PathBuf,
    main_size: (u32, u32),
    lores_size: (u32, u32),
    session: Option<Session>,
}

impl V4l2Camera {
    pub fn new(path: impl Into<PathBuf>, main_size: (u32, u32), lores_size: (u32, u32)) -> Self {
        let path = path.into();
        Self {
            name: format!("v4l2:{}", path.display()),
            path,
            main_size,
            lores_size,
            session: None,
        }
    }

    fn session(&mut self) -> StillwatchResult<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| StillwatchError::camera("device not acquired"))
    }
}

fn io_error(action: &str, e: std::io::Error) -> StillwatchError {
    StillwatchError::camera(format!("{action}: {e}"))
}

impl CameraBackend for V4l2Camera {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> StillwatchResult<()> {
        if self.session.is_some() {
            return Err(StillwatchError::camera("device already acquired"));
        }
        let (width, height) = self.main_size;
        if width % 2 != 0 {
            return Err(StillwatchError::config("YUYV capture needs an even main width"));
        }

        let device = Device::with_path(&self.path)
            .map_err(|e| io_error(&format!("open {}", self.path.display()), e))?;
        let format = device
            .set_format(&Format::new(width, height, FourCC::new(YUYV)))
            .map_err(|e| io_error("set format", e))?;
        if format.fourcc != FourCC::new(YUYV) || (format.width, format.height) != self.main_size {
            return Err(StillwatchError::camera(format!(
                "device negotiated {format} instead of YUYV {width}x{height}"
            )));
        }

        tracing::info!(device = %self.path.display(), format = %format, "V4L2 device opened");
        self.session = Some(Session {
            device,
            stream: None,
        });
        Ok(())
    }

    fn close(&mut self) -> StillwatchResult<()> {
        if self.session.take().is_some() {
            tracing::debug!(device = %self.path.display(), "V4L2 device closed");
        }
        Ok(())
    }

    fn start(&mut self) -> StillwatchResult<()> {
        let session = self.session()?;
        if session.stream.is_none() {
            // Streaming begins with the first dequeue.
            let stream = MmapStream::with_buffers(&session.device, Type::VideoCapture, BUFFER_COUNT)
                .map_err(|e| io_error("map capture buffers", e))?;
            session.stream = Some(stream);
        }
        Ok(())
    }

    fn stop(&mut self) -> StillwatchResult<()> {
        if let Some(session) = self.session.as_mut() {
            session.stream = None;
        }
        Ok(())
    }

    fn capture(&mut self, stream: StreamId) -> StillwatchResult<Frame> {
        let (width, height) = self.main_size;
        let lores_size = self.lores_size;
        let session = self.session()?;
        let capture = session
            .stream
            .as_mut()
            .ok_or_else(|| StillwatchError::camera("device not streaming"))?;

        let (buf, meta) = capture.next().map_err(|e| io_error("dequeue frame", e))?;
        let used = (meta.bytesused as usize).min(buf.len());
        let pixels = width as usize * height as usize;
        if used < pixels * 2 {
            return Err(StillwatchError::camera(format!(
                "short YUYV frame: {used} bytes for {width}x{height}"
            )));
        }
        let yuyv = &buf[..pixels * 2];

        match stream {
            StreamId::Main => Frame::new(StreamId::Main, width, height, yuyv_to_rgb(yuyv)),
            StreamId::Lores => lores_from_yuyv(yuyv, (width, height), lores_size),
        }
    }

    fn set_controls(&mut self, controls: &ControlSet) -> StillwatchResult<()> {
        let path = self.path.clone();
        let session = self.session()?;

        let mut writes = Vec::new();
        if let Some(enabled) = controls.awb_enable {
            writes.push(Control {
                id: CID_AUTO_WHITE_BALANCE,
                value: Value::Boolean(enabled),
            });
        }
        if let Some(enabled) = controls.ae_enable {
            let mode = if enabled {
                EXPOSURE_APERTURE_PRIORITY
            } else {
                EXPOSURE_MANUAL
            };
            writes.push(Control {
                id: CID_EXPOSURE_AUTO,
                value: Value::Integer(mode),
            });
        }
        if let Some(exposure_us) = controls.exposure_time_us {
            // V4L2 absolute exposure is in 100 us units.
            writes.push(Control {
                id: CID_EXPOSURE_ABSOLUTE,
                value: Value::Integer(i64::from(exposure_us / 100).max(1)),
            });
        }

        for control in writes {
            let id = control.id;
            session
                .device
                .set_control(control)
                .map_err(|e| io_error(&format!("set control {id:#010x}"), e))?;
        }
        tracing::trace!(device = %path.display(), "V4L2 controls written");
        Ok(())
    }

    fn stream_size(&self, stream: StreamId) -> (u32, u32) {
        match stream {
            StreamId::Main => self.main_size,
            StreamId::Lores => self.lores_size,
        }
    }
}

/// Packed YUYV 4:2:2 to RGB888 (BT.601, full range).
fn yuyv_to_rgb(yuyv: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(yuyv.len() / 2 * 3);
    for chunk in yuyv.chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push((y + 1.402 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344_136 * u - 0.714_136 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).round().clamp(0.0, 255.0) as u8);
        }
    }
    rgb
}

/// The Y samples of a YUYV frame, resized to the lores stream.
fn lores_from_yuyv(
    yuyv: &[u8],
    (width, height): (u32, u32),
    (lores_w, lores_h): (u32, u32),
) -> StillwatchResult<Frame> {
    let luma: Vec<u8> = yuyv.iter().step_by(2).copied().collect();
    let full = GrayImage::from_raw(width, height, luma)
        .ok_or_else(|| StillwatchError::camera("luma plane size mismatch"))?;
    let lores = if (width, height) == (lores_w, lores_h) {
        full
    } else {
        imageops::resize(&full, lores_w, lores_h, FilterType::Triangle)
    };
    Frame::lores_from_luma(lores_w, lores_h, lores.into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_chroma_gives_grey() {
        let rgb = yuyv_to_rgb(&[100, 128, 200, 128]);
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn lores_keeps_luminance_and_size() {
        let (w, h) = (8u32, 4u32);
        let yuyv: Vec<u8> = (0..w * h).flat_map(|_| [90u8, 128]).collect();
        let frame = lores_from_yuyv(&yuyv, (w, h), (4, 2)).unwrap();
        assert_eq!(frame.dimensions(), (4, 2));
        assert!((frame.mean_luma().unwrap() - 90.0).abs() < 1.0);
    }

    #[test]
    fn calls_before_open_fail() {
        let mut camera = V4l2Camera::new("/dev/video-missing", (8, 4), (4, 2));
        assert!(camera.start().is_err());
        assert!(camera.capture(StreamId::Lores).is_err());
        assert!(camera.close().is_ok());
        assert!(camera.open().is_err());
    }
}
