//! Audio collaborator boundary: capture on the host side, playback on
//! the client side. Both dummy backends are silence — deterministic,
//! no ALSA/PulseAudio dependency — and the sink additionally counts
//! bytes so tests can assert data actually reached it.

pub trait AudioSource: Send {
    fn init(&mut self) -> anyhow::Result<()>;
    /// Fills `out` with one period of PCM and returns the sample count.
    fn read_samples(&mut self, out: &mut Vec<i16>, period_frames: usize) -> anyhow::Result<usize>;
    fn cleanup(&mut self);
}

pub trait AudioSink: Send {
    fn init(&mut self) -> anyhow::Result<()>;
    fn play_samples(&mut self, samples: &[i16]) -> anyhow::Result<()>;
    fn cleanup(&mut self);
}

/// Emits digital silence, matching the channel/frame count requested.
#[derive(Default)]
pub struct DummyAudioSource {
    frames_read: u64,
}

impl DummyAudioSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

impl AudioSource for DummyAudioSource {
    fn init(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn read_samples(&mut self, out: &mut Vec<i16>, period_frames: usize) -> anyhow::Result<usize> {
        out.clear();
        out.resize(period_frames, 0);
        self.frames_read += period_frames as u64;
        Ok(period_frames)
    }

    fn cleanup(&mut self) {}
}

/// Discards whatever it's handed, after counting it — there's no
/// speaker to drive in this build.
#[derive(Default)]
pub struct DummyAudioSink {
    samples_played: u64,
}

impl DummyAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples_played(&self) -> u64 {
        self.samples_played
    }
}

impl AudioSink for DummyAudioSink {
    fn init(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn play_samples(&mut self, samples: &[i16]) -> anyhow::Result<()> {
        self.samples_played += samples.len() as u64;
        Ok(())
    }

    fn cleanup(&mut self) {}
}
