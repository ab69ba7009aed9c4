//! Capture collaborator boundary: `capture_init`/`capture_frame`/
//! `capture_cleanup`, expressed as a trait plus a deterministic dummy
//! backend that synthesizes a moving test pattern instead of touching
//! a real display.

use std::time::Instant;

#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB24, row-major.
    pub data: Vec<u8>,
    pub captured_at: Instant,
}

pub trait Capture: Send {
    fn init(&mut self, display: &str) -> anyhow::Result<()>;
    fn capture_frame(&mut self) -> anyhow::Result<Frame>;
    fn cleanup(&mut self);
}

/// Synthesizes a deterministic, slowly scrolling gradient so the rest
/// of the pipeline has real bytes to push through without depending on
/// X11/Wayland/SHM.
pub struct DummyCapture {
    width: u32,
    height: u32,
    tick: u64,
}

impl DummyCapture {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, tick: 0 }
    }
}

impl Capture for DummyCapture {
    fn init(&mut self, _display: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn capture_frame(&mut self) -> anyhow::Result<Frame> {
        let mut data = vec![0u8; (self.width * self.height * 3) as usize];
        let offset = (self.tick % 255) as u8;
        for (i, px) in data.chunks_mut(3).enumerate() {
            let x = (i as u32 % self.width) as u8;
            let y = (i as u32 / self.width) as u8;
            px[0] = x.wrapping_add(offset);
            px[1] = y.wrapping_add(offset);
            px[2] = offset;
        }
        self.tick += 1;
        Ok(Frame {
            width: self.width,
            height: self.height,
            data,
            captured_at: Instant::now(),
        })
    }

    fn cleanup(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_capture_produces_correctly_sized_frames() {
        let mut capture = DummyCapture::new(16, 8);
        capture.init(":0").unwrap();
        let frame = capture.capture_frame().unwrap();
        assert_eq!(frame.width, 16);
        assert_eq!(frame.height, 8);
        assert_eq!(frame.data.len(), 16 * 8 * 3);
    }

    #[test]
    fn dummy_capture_advances_between_frames() {
        let mut capture = DummyCapture::new(4, 4);
        let first = capture.capture_frame().unwrap();
        let second = capture.capture_frame().unwrap();
        assert_ne!(first.data, second.data);
    }
}
