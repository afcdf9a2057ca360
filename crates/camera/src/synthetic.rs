//! Synthetic camera backend.
//!
//! Renders a flat background with rectangular blocks into both streams.
//! The scene is shared through a [`SceneHandle`] so a simulator or a test
//! can move blocks, change the light level, and inject device failures
//! while the engine is running.

use std::sync::{Arc, Mutex, MutexGuard};

use stillwatch_common::error::{StillwatchError, StillwatchResult};
use stillwatch_model::{ControlSet, Frame, StreamId};

use crate::backend::CameraBackend;

/// A filled rectangle in lores pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub luma: u8,
}

impl Block {
    pub fn new(x: u32, y: u32, width: u32, height: u32, luma: u8) -> Self {
        Self {
            x,
            y,
            width,
            height,
            luma,
        }
    }
}

#[derive(Debug, Default)]
struct Scene {
    background: u8,
    blocks: Vec<Block>,

    fail_opens: u32,
    fail_starts: u32,
    fail_captures: u32,
    fail_main_captures: u32,
    fail_controls: u32,
    panic_captures: u32,

    open_attempts: u32,
    close_calls: u32,
    lores_captures: u64,
    main_captures: u64,
    control_writes: Vec<ControlSet>,
    applied: ControlSet,
}

/// Shared control over a [`SyntheticCamera`]'s scene and fault injection.
#[derive(Debug, Clone, Default)]
pub struct SceneHandle {
    inner: Arc<Mutex<Scene>>,
}

impl SceneHandle {
    fn lock(&self) -> MutexGuard<'_, Scene> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Uniform background luminance.
    pub fn set_background(&self, luma: u8) {
        self.lock().background = luma;
    }

    pub fn set_blocks(&self, blocks: Vec<Block>) {
        self.lock().blocks = blocks;
    }

    pub fn add_block(&self, block: Block) {
        self.lock().blocks.push(block);
    }

    pub fn clear_blocks(&self) {
        self.lock().blocks.clear();
    }

    /// Fail the next `n` open calls.
    pub fn fail_next_opens(&self, n: u32) {
        self.lock().fail_opens = n;
    }

    /// Fail the next `n` start calls.
    pub fn fail_next_starts(&self, n: u32) {
        self.lock().fail_starts = n;
    }

    /// Fail the next `n` captures on either stream.
    pub fn fail_next_captures(&self, n: u32) {
        self.lock().fail_captures = n;
    }

    /// Fail the next `n` main-stream captures only.
    pub fn fail_next_main_captures(&self, n: u32) {
        self.lock().fail_main_captures = n;
    }

    /// Fail the next `n` control writes.
    pub fn fail_next_control_writes(&self, n: u32) {
        self.lock().fail_controls = n;
    }

    /// Panic inside the next `n` captures, as a misbehaving driver might.
    pub fn panic_next_captures(&self, n: u32) {
        self.lock().panic_captures = n;
    }

    pub fn open_attempts(&self) -> u32 {
        self.lock().open_attempts
    }

    pub fn close_calls(&self) -> u32 {
        self.lock().close_calls
    }

    pub fn lores_captures(&self) -> u64 {
        self.lock().lores_captures
    }

    pub fn main_captures(&self) -> u64 {
        self.lock().main_captures
    }

    /// Every control set written, in order.
    pub fn control_writes(&self) -> Vec<ControlSet> {
        self.lock().control_writes.clone()
    }

    /// The accumulated state of all control writes.
    pub fn applied_controls(&self) -> ControlSet {
        self.lock().applied.clone()
    }
}

/// A camera that renders a [`SceneHandle`]'s scene.
pub struct SyntheticCamera {
    scene: SceneHandle,
    main_size: (u32, u32),
    lores_size: (u32, u32),
    open: bool,
    streaming: bool,
}

impl SyntheticCamera {
    pub fn new(main_size: (u32, u32), lores_size: (u32, u32)) -> Self {
        let scene = SceneHandle::default();
        scene.set_background(128);
        Self {
            scene,
            main_size,
            lores_size,
            open: false,
            streaming: false,
        }
    }

    pub fn scene(&self) -> SceneHandle {
        self.scene.clone()
    }

    fn render_luma(scene: &Scene, width: u32, height: u32, scale: (f64, f64)) -> Vec<u8> {
        let mut luma = vec![scene.background; width as usize * height as usize];
        for block in &scene.blocks {
            let x0 = ((block.x as f64 * scale.0) as u32).min(width);
            let y0 = ((block.y as f64 * scale.1) as u32).min(height);
            let x1 = (((block.x + block.width) as f64 * scale.0) as u32).min(width);
            let y1 = (((block.y + block.height) as f64 * scale.1) as u32).min(height);
            for y in y0..y1 {
                let row = y as usize * width as usize;
                luma[row + x0 as usize..row + x1 as usize].fill(block.luma);
            }
        }
        luma
    }
}

impl CameraBackend for SyntheticCamera {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open(&mut self) -> StillwatchResult<()> {
        let mut scene = self.scene.lock();
        scene.open_attempts += 1;
        if scene.fail_opens > 0 {
            scene.fail_opens -= 1;
            return Err(StillwatchError::camera("synthetic open failure"));
        }
        if self.open {
            return Err(StillwatchError::camera("camera already acquired"));
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> StillwatchResult<()> {
        self.scene.lock().close_calls += 1;
        self.open = false;
        self.streaming = false;
        Ok(())
    }

    fn start(&mut self) -> StillwatchResult<()> {
        let mut scene = self.scene.lock();
        if scene.fail_starts > 0 {
            scene.fail_starts -= 1;
            return Err(StillwatchError::camera("synthetic start failure"));
        }
        if !self.open {
            return Err(StillwatchError::camera("camera not acquired"));
        }
        self.streaming = true;
        Ok(())
    }

    fn stop(&mut self) -> StillwatchResult<()> {
        self.streaming = false;
        Ok(())
    }

    fn capture(&mut self, stream: StreamId) -> StillwatchResult<Frame> {
        let mut scene = self.scene.lock();
        if !self.streaming {
            return Err(StillwatchError::camera("camera not streaming"));
        }
        if scene.fail_captures > 0 {
            scene.fail_captures -= 1;
            return Err(StillwatchError::camera("synthetic capture failure"));
        }
        if scene.panic_captures > 0 {
            scene.panic_captures -= 1;
            drop(scene);
            panic!("synthetic capture panic");
        }

        match stream {
            StreamId::Lores => {
                scene.lores_captures += 1;
                let (w, h) = self.lores_size;
                let luma = Self::render_luma(&scene, w, h, (1.0, 1.0));
                Frame::lores_from_luma(w, h, luma)
            }
            StreamId::Main => {
                if scene.fail_main_captures > 0 {
                    scene.fail_main_captures -= 1;
                    return Err(StillwatchError::camera("synthetic main capture failure"));
                }
                scene.main_captures += 1;
                let (w, h) = self.main_size;
                let scale = (
                    w as f64 / self.lores_size.0 as f64,
                    h as f64 / self.lores_size.1 as f64,
                );
                let luma = Self::render_luma(&scene, w, h, scale);
                let rgb = luma.iter().flat_map(|&v| [v, v, v]).collect();
                Frame::new(StreamId::Main, w, h, rgb)
            }
        }
    }

    fn set_controls(&mut self, controls: &ControlSet) -> StillwatchResult<()> {
        let mut scene = self.scene.lock();
        if scene.fail_controls > 0 {
            scene.fail_controls -= 1;
            return Err(StillwatchError::camera("synthetic control write failure"));
        }
        scene.control_writes.push(controls.clone());
        scene.applied.merge(controls);
        Ok(())
    }

    fn stream_size(&self, stream: StreamId) -> (u32, u32) {
        match stream {
            StreamId::Main => self.main_size,
            StreamId::Lores => self.lores_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_render_into_both_streams() {
        let mut camera = SyntheticCamera::new((80, 40), (40, 20));
        let scene = camera.scene();
        scene.set_background(10);
        scene.add_block(Block::new(5, 5, 10, 4, 200));

        camera.open().unwrap();
        camera.start().unwrap();

        let lores = camera.capture(StreamId::Lores).unwrap();
        let luma = lores.luma_plane().unwrap();
        assert_eq!(luma.iter().filter(|&&v| v == 200).count(), 40);
        assert_eq!(luma[0], 10);

        let main = camera.capture(StreamId::Main).unwrap();
        let lit = main.as_bytes().chunks(3).filter(|px| px[0] == 200).count();
        assert_eq!(lit, 160);
    }

    #[test]
    fn second_open_without_close_is_refused() {
        let mut camera = SyntheticCamera::new((8, 8), (4, 4));
        camera.open().unwrap();
        assert!(camera.open().is_err());
        camera.close().unwrap();
        camera.open().unwrap();
    }

    #[test]
    fn injected_failures_are_consumed() {
        let mut camera = SyntheticCamera::new((8, 8), (4, 4));
        let scene = camera.scene();
        scene.fail_next_opens(2);
        assert!(camera.open().is_err());
        assert!(camera.open().is_err());
        camera.open().unwrap();
        assert_eq!(scene.open_attempts(), 3);
    }
}
