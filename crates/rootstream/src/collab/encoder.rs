//! Encoder collaborator boundary. The dummy backend doesn't run a real
//! codec; it frames each raw `Frame` with a tiny self-describing header
//! so the decoder side can recover dimensions and keyframe status
//! without needing an actual bitstream parser.

use crate::collab::capture::Frame;

pub trait Encoder: Send {
    fn init(&mut self, bitrate_kbps: u32) -> anyhow::Result<()>;
    /// Encodes into `out`, returning the number of bytes written.
    /// `force_keyframe` mirrors the session layer's request after a
    /// peer misses a GOP.
    fn encode_frame(&mut self, frame: &Frame, force_keyframe: bool, out: &mut Vec<u8>) -> anyhow::Result<usize>;
    fn cleanup(&mut self);
}

pub(crate) const DUMMY_HEADER_LEN: usize = 1 + 4 + 4;

pub struct DummyEncoder {
    frames_since_keyframe: u32,
    keyframe_interval: u32,
}

impl DummyEncoder {
    pub fn new(keyframe_interval: u32) -> Self {
        Self {
            frames_since_keyframe: 0,
            keyframe_interval,
        }
    }
}

impl Encoder for DummyEncoder {
    fn init(&mut self, _bitrate_kbps: u32) -> anyhow::Result<()> {
        Ok(())
    }

    fn encode_frame(&mut self, frame: &Frame, force_keyframe: bool, out: &mut Vec<u8>) -> anyhow::Result<usize> {
        let is_keyframe = force_keyframe || self.frames_since_keyframe >= self.keyframe_interval;
        self.frames_since_keyframe = if is_keyframe { 0 } else { self.frames_since_keyframe + 1 };

        out.clear();
        out.push(is_keyframe as u8);
        out.extend_from_slice(&frame.width.to_le_bytes());
        out.extend_from_slice(&frame.height.to_le_bytes());
        out.extend_from_slice(&frame.data);
        Ok(DUMMY_HEADER_LEN + frame.data.len())
    }

    fn cleanup(&mut self) {}
}

pub fn is_keyframe(bitstream: &[u8]) -> bool {
    bitstream.first().map(|&b| b != 0).unwrap_or(false)
}
