//! Captured frames.
//!
//! The camera produces two views of the same sensor:
//!
//! - `Lores`: small planar YUV420 (I420) frames. The Y plane is the
//!   luminance used for detection and calibration.
//! - `Main`: full-size packed RGB888 frames used for stored stills.
//!
//! A `Frame` is owned by whoever captured it; nothing in the engine shares
//! frame buffers between loops.

use std::fmt;

use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use stillwatch_common::error::{StillwatchError, StillwatchResult};

/// Which camera stream a frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamId {
    /// Low-resolution, luminance-bearing stream.
    Lores,
    /// Full-resolution colour stream.
    Main,
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamId::Lores => f.write_str("lores"),
            StreamId::Main => f.write_str("main"),
        }
    }
}

/// A rectangular pixel buffer tagged with its stream.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    stream: StreamId,
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("stream", &self.stream)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Frame {
    /// Wrap raw bytes, checking the buffer length against the stream layout.
    pub fn new(stream: StreamId, width: u32, height: u32, data: Vec<u8>) -> StillwatchResult<Self> {
        let expected = Self::buffer_len(stream, width, height);
        if width == 0 || height == 0 || data.len() != expected {
            return Err(StillwatchError::camera(format!(
                "{stream} frame {width}x{height} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            stream,
            width,
            height,
            data,
        })
    }

    /// Build a lores frame from a luminance plane, with neutral chroma.
    pub fn lores_from_luma(width: u32, height: u32, luma: Vec<u8>) -> StillwatchResult<Self> {
        let chroma = chroma_plane_len(width, height);
        let mut data = luma;
        data.resize(data.len() + 2 * chroma, 128);
        Self::new(StreamId::Lores, width, height, data)
    }

    /// Bytes needed for a frame of the given stream and size.
    pub fn buffer_len(stream: StreamId, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match stream {
            StreamId::Lores => pixels + 2 * chroma_plane_len(width, height),
            StreamId::Main => pixels * 3,
        }
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The luminance plane. Only the lores stream carries one; reading
    /// brightness from the processed colour stream would feed auto white
    /// balance back into calibration.
    pub fn luma_plane(&self) -> StillwatchResult<&[u8]> {
        match self.stream {
            StreamId::Lores => Ok(&self.data[..self.width as usize * self.height as usize]),
            StreamId::Main => Err(StillwatchError::detection(
                "main stream frames carry no luminance plane",
            )),
        }
    }

    /// Copy the luminance plane into a grayscale image.
    pub fn to_luma_image(&self) -> StillwatchResult<GrayImage> {
        let luma = self.luma_plane()?.to_vec();
        GrayImage::from_raw(self.width, self.height, luma)
            .ok_or_else(|| StillwatchError::detection("luma plane size mismatch"))
    }

    /// Mean of the luminance plane, 0-255.
    pub fn mean_luma(&self) -> StillwatchResult<f64> {
        let luma = self.luma_plane()?;
        let sum: u64 = luma.iter().map(|&v| v as u64).sum();
        Ok(sum as f64 / luma.len() as f64)
    }

    /// Convert to packed RGB. Lores frames go through BT.601 YUV conversion.
    pub fn to_rgb_image(&self) -> StillwatchResult<RgbImage> {
        let rgb = match self.stream {
            StreamId::Main => self.data.clone(),
            StreamId::Lores => yuv420_to_rgb(&self.data, self.width, self.height),
        };
        RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| StillwatchError::camera("rgb buffer size mismatch"))
    }

    /// Encode the frame as a JPEG.
    pub fn encode_jpeg(&self, quality: u8) -> StillwatchResult<Vec<u8>> {
        let rgb = self.to_rgb_image()?;
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
            .encode_image(&rgb)
            .map_err(|e| StillwatchError::storage(format!("JPEG encode failed: {e}")))?;
        Ok(buf)
    }
}

fn chroma_plane_len(width: u32, height: u32) -> usize {
    width.div_ceil(2) as usize * height.div_ceil(2) as usize
}

fn yuv420_to_rgb(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let cw = width.div_ceil(2) as usize;
    let chroma = chroma_plane_len(width, height);
    let (y_plane, rest) = data.split_at(w * h);
    let (u_plane, v_plane) = rest.split_at(chroma);

    let mut rgb = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        for col in 0..w {
            let y = y_plane[row * w + col] as f32;
            let ci = (row / 2) * cw + col / 2;
            let u = u_plane[ci] as f32 - 128.0;
            let v = v_plane[ci] as f32 - 128.0;
            let r = y + 1.402 * v;
            let g = y - 0.344_136 * u - 0.714_136 * v;
            let b = y + 1.772 * u;
            rgb.push(r.round().clamp(0.0, 255.0) as u8);
            rgb.push(g.round().clamp(0.0, 255.0) as u8);
            rgb.push(b.round().clamp(0.0, 255.0) as u8);
        }
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lores_layout_includes_chroma_planes() {
        assert_eq!(Frame::buffer_len(StreamId::Lores, 4, 4), 16 + 2 * 4);
        assert_eq!(Frame::buffer_len(StreamId::Lores, 5, 3), 15 + 2 * 6);
        assert_eq!(Frame::buffer_len(StreamId::Main, 4, 4), 48);
    }

    #[test]
    fn wrong_buffer_length_is_rejected() {
        assert!(Frame::new(StreamId::Main, 4, 4, vec![0; 47]).is_err());
        assert!(Frame::new(StreamId::Lores, 0, 4, Vec::new()).is_err());
    }

    #[test]
    fn mean_luma_reads_only_the_y_plane() {
        let frame = Frame::lores_from_luma(4, 2, vec![100, 100, 100, 100, 200, 200, 200, 200])
            .unwrap();
        assert!((frame.mean_luma().unwrap() - 150.0).abs() < 1e-9);
    }

    #[test]
    fn main_stream_has_no_luma_plane() {
        let frame = Frame::new(StreamId::Main, 2, 2, vec![255; 12]).unwrap();
        assert!(frame.luma_plane().is_err());
        assert!(frame.mean_luma().is_err());
    }

    #[test]
    fn neutral_chroma_converts_to_gray() {
        let frame = Frame::lores_from_luma(2, 2, vec![90; 4]).unwrap();
        let rgb = frame.to_rgb_image().unwrap();
        assert_eq!(rgb.get_pixel(1, 1).0, [90, 90, 90]);
    }

    #[test]
    fn jpeg_output_has_soi_marker() {
        let frame = Frame::new(StreamId::Main, 16, 8, vec![128; 16 * 8 * 3]).unwrap();
        let jpeg = frame.encode_jpeg(80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
