//! Collaborator traits: the boundary between the session/streaming core
//! and whatever captures, encodes, decodes, plays and injects on a
//! given platform. Each trait here has exactly one implementation in
//! this crate — a deterministic dummy/test-pattern backend. That
//! backend is not a stand-in waiting to be replaced; it's the correct,
//! permanent implementation of this boundary for this repo, exercised
//! by the service loops' own tests. A product build supplies its own
//! `Capture`/`Encoder`/etc. and wires it in ahead of the dummy.

pub mod audio;
pub mod capture;
pub mod decoder;
pub mod encoder;
pub mod input;

pub use audio::{AudioSink, AudioSource, DummyAudioSink, DummyAudioSource};
pub use capture::{Capture, DummyCapture, Frame};
pub use decoder::{Decoder, DummyDecoder};
pub use encoder::{DummyEncoder, Encoder};
pub use input::{DummyInputInjector, DummyInputSource, InputInjector, InputSource, RawInputEvent};
