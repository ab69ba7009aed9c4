//! Decoder collaborator boundary. The dummy backend parses the tiny
//! self-describing header [`crate::collab::encoder::DummyEncoder`]
//! writes and hands back a [`Frame`] with the enclosed raw bytes —
//! there's no real codec to invert, just the framing.

use anyhow::{bail, Context};

use crate::collab::capture::Frame;
use crate::collab::encoder::DUMMY_HEADER_LEN;

pub trait Decoder: Send {
    fn init(&mut self) -> anyhow::Result<()>;
    /// Decodes one bitstream unit into a displayable frame. Returns
    /// `Ok(None)` for a unit this decoder understood but chose to
    /// drop (never the case for the dummy backend, but real codecs
    /// may skip non-displayable units).
    fn decode(&mut self, bitstream: &[u8]) -> anyhow::Result<Option<Frame>>;
    fn cleanup(&mut self);
}

#[derive(Default)]
pub struct DummyDecoder {
    frames_decoded: u64,
}

impl DummyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }
}

impl Decoder for DummyDecoder {
    fn init(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn decode(&mut self, bitstream: &[u8]) -> anyhow::Result<Option<Frame>> {
        if bitstream.len() < DUMMY_HEADER_LEN {
            bail!("bitstream unit of {} bytes is shorter than the dummy header", bitstream.len());
        }

        let width = u32::from_le_bytes(bitstream[1..5].try_into().context("width field")?);
        let height = u32::from_le_bytes(bitstream[5..9].try_into().context("height field")?);
        let data = bitstream[DUMMY_HEADER_LEN..].to_vec();

        let expected = (width as usize) * (height as usize) * 3;
        if data.len() != expected {
            bail!("dummy frame body is {} bytes, expected {expected} for {width}x{height}", data.len());
        }

        self.frames_decoded += 1;
        Ok(Some(Frame {
            width,
            height,
            data,
            captured_at: std::time::Instant::now(),
        }))
    }

    fn cleanup(&mut self) {}
}
