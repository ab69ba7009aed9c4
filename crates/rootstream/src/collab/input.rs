//! Input collaborator boundary, both directions: `InputSource` collects
//! local input on the client for transmission to the host;
//! `InputInjector` replays received input into the host's session on
//! the other end. Both dummy backends are deterministic and keep no
//! real keyboard/mouse/controller dependency, matching the pattern of
//! every other collaborator in this module.

use rootstream_protocol::{InputEventKind, InputEventPacket};

/// One raw local input sample, before it is wrapped into the wire
/// [`InputEventPacket`] (which also carries the client sequence and
/// origin timestamp, assigned by the caller at send time).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawInputEvent {
    pub kind: InputEventKind,
    pub code: u16,
    pub value: i32,
}

pub trait InputSource: Send {
    fn init(&mut self) -> anyhow::Result<()>;
    /// Drains whatever local input has accumulated since the last call.
    fn poll_events(&mut self) -> anyhow::Result<Vec<RawInputEvent>>;
    fn cleanup(&mut self);
}

pub trait InputInjector: Send {
    fn init(&mut self) -> anyhow::Result<()>;
    fn inject(&mut self, event: &InputEventPacket) -> anyhow::Result<()>;
    fn cleanup(&mut self);
}

/// Never produces local input — there's no keyboard/mouse/controller
/// to poll in this build. Exists so the client loop's input-collection
/// path is exercised by its own tests without a real device.
#[derive(Default)]
pub struct DummyInputSource;

impl DummyInputSource {
    pub fn new() -> Self {
        Self
    }
}

impl InputSource for DummyInputSource {
    fn init(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn poll_events(&mut self) -> anyhow::Result<Vec<RawInputEvent>> {
        Ok(Vec::new())
    }

    fn cleanup(&mut self) {}
}

/// Records every injected event instead of driving a real uinput
/// device; the count is the permanent, testable contract of this
/// boundary in this build.
#[derive(Default)]
pub struct DummyInputInjector {
    injected: Vec<InputEventPacket>,
}

impl DummyInputInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn injected(&self) -> &[InputEventPacket] {
        &self.injected
    }
}

impl InputInjector for DummyInputInjector {
    fn init(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn inject(&mut self, event: &InputEventPacket) -> anyhow::Result<()> {
        self.injected.push(*event);
        Ok(())
    }

    fn cleanup(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_source_never_produces_events() {
        let mut source = DummyInputSource::new();
        source.init().unwrap();
        assert!(source.poll_events().unwrap().is_empty());
    }

    #[test]
    fn dummy_injector_records_every_event_in_order() {
        let mut injector = DummyInputInjector::new();
        let event = InputEventPacket {
            kind: InputEventKind::Key,
            code: 30,
            value: 1,
            client_sequence: 1,
            origin_timestamp_us: 100,
        };
        injector.inject(&event).unwrap();
        injector.inject(&event).unwrap();
        assert_eq!(injector.injected().len(), 2);
        assert_eq!(injector.injected()[0], event);
    }
}
