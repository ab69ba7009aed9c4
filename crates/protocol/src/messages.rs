//! Handshake, liveness, input and control message payloads.
//!
//! These are the plaintexts carried inside packet payloads (see
//! [`crate::packet`]). HELLO/HELLO_ACK travel cleartext-but-signed, so
//! their encoding must be byte-exact and independent of any JSON map
//! ordering — these are plain fixed-layout binary records, the same way
//! the packet header itself is.

use thiserror::Error;

pub const CHALLENGE_LEN: usize = 16;
pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("buffer too short: {0} bytes, need at least {1}")]
    TooShort(usize, usize),
    #[error("unknown control message tag: {0:#04x}")]
    BadControlTag(u8),
    #[error("unknown input event tag: {0:#04x}")]
    BadInputTag(u8),
}

/// `HELLO { my_public_key, random_challenge(16), timestamp, signature }`
///
/// The signed region is `public_key || challenge || timestamp_ms`, per
/// the design note that the signature must bind the claimed key, the
/// challenge, and a timestamp to prevent cross-protocol confusion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub public_key: [u8; PUBLIC_KEY_LEN],
    pub challenge: [u8; CHALLENGE_LEN],
    pub timestamp_ms: u64,
    pub signature: [u8; SIGNATURE_LEN],
}

const HELLO_LEN: usize = PUBLIC_KEY_LEN + CHALLENGE_LEN + 8 + SIGNATURE_LEN;

impl Hello {
    /// The bytes an implementer signs and verifies: everything except
    /// the signature itself.
    pub fn signed_region(public_key: &[u8; PUBLIC_KEY_LEN], challenge: &[u8; CHALLENGE_LEN], timestamp_ms: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PUBLIC_KEY_LEN + CHALLENGE_LEN + 8);
        buf.extend_from_slice(public_key);
        buf.extend_from_slice(challenge);
        buf.extend_from_slice(&timestamp_ms.to_le_bytes());
        buf
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HELLO_LEN);
        buf.extend_from_slice(&self.public_key);
        buf.extend_from_slice(&self.challenge);
        buf.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        buf.extend_from_slice(&self.signature);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, MessageError> {
        if buf.len() < HELLO_LEN {
            return Err(MessageError::TooShort(buf.len(), HELLO_LEN));
        }
        let mut public_key = [0u8; PUBLIC_KEY_LEN];
        public_key.copy_from_slice(&buf[0..32]);
        let mut challenge = [0u8; CHALLENGE_LEN];
        challenge.copy_from_slice(&buf[32..48]);
        let timestamp_ms = u64::from_le_bytes(buf[48..56].try_into().unwrap());
        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(&buf[56..120]);
        Ok(Self {
            public_key,
            challenge,
            timestamp_ms,
            signature,
        })
    }
}

/// `HELLO_ACK { my_public_key, echo_challenge, random_challenge, signature }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloAck {
    pub public_key: [u8; PUBLIC_KEY_LEN],
    pub echo_challenge: [u8; CHALLENGE_LEN],
    pub challenge: [u8; CHALLENGE_LEN],
    pub timestamp_ms: u64,
    pub signature: [u8; SIGNATURE_LEN],
}

const HELLO_ACK_LEN: usize = PUBLIC_KEY_LEN + CHALLENGE_LEN + CHALLENGE_LEN + 8 + SIGNATURE_LEN;

impl HelloAck {
    pub fn signed_region(
        public_key: &[u8; PUBLIC_KEY_LEN],
        echo_challenge: &[u8; CHALLENGE_LEN],
        challenge: &[u8; CHALLENGE_LEN],
        timestamp_ms: u64,
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PUBLIC_KEY_LEN + 2 * CHALLENGE_LEN + 8);
        buf.extend_from_slice(public_key);
        buf.extend_from_slice(echo_challenge);
        buf.extend_from_slice(challenge);
        buf.extend_from_slice(&timestamp_ms.to_le_bytes());
        buf
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HELLO_ACK_LEN);
        buf.extend_from_slice(&self.public_key);
        buf.extend_from_slice(&self.echo_challenge);
        buf.extend_from_slice(&self.challenge);
        buf.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        buf.extend_from_slice(&self.signature);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, MessageError> {
        if buf.len() < HELLO_ACK_LEN {
            return Err(MessageError::TooShort(buf.len(), HELLO_ACK_LEN));
        }
        let mut public_key = [0u8; PUBLIC_KEY_LEN];
        public_key.copy_from_slice(&buf[0..32]);
        let mut echo_challenge = [0u8; CHALLENGE_LEN];
        echo_challenge.copy_from_slice(&buf[32..48]);
        let mut challenge = [0u8; CHALLENGE_LEN];
        challenge.copy_from_slice(&buf[48..64]);
        let timestamp_ms = u64::from_le_bytes(buf[64..72].try_into().unwrap());
        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(&buf[72..136]);
        Ok(Self {
            public_key,
            echo_challenge,
            challenge,
            timestamp_ms,
            signature,
        })
    }
}

/// PING/PONG liveness token: capture time in microseconds, echoed back
/// unchanged so the sender can compute an RTT estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessToken {
    pub token_us: u64,
}

impl LivenessToken {
    pub fn encode(&self) -> [u8; 8] {
        self.token_us.to_le_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, MessageError> {
        if buf.len() < 8 {
            return Err(MessageError::TooShort(buf.len(), 8));
        }
        Ok(Self {
            token_us: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
        })
    }
}

/// One typed input event: `{ type, code, value }` per §4.11, plus the
/// per-client sequence and origin timestamp used for dedup and latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEventKind {
    Key,
    Rel,
    Abs,
    Syn,
}

impl InputEventKind {
    fn tag(self) -> u8 {
        match self {
            Self::Key => 0,
            Self::Rel => 1,
            Self::Abs => 2,
            Self::Syn => 3,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::Key,
            1 => Self::Rel,
            2 => Self::Abs,
            3 => Self::Syn,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEventPacket {
    pub kind: InputEventKind,
    pub code: u16,
    pub value: i32,
    pub client_sequence: u64,
    pub origin_timestamp_us: u64,
}

const INPUT_EVENT_LEN: usize = 1 + 2 + 4 + 8 + 8;

impl InputEventPacket {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(INPUT_EVENT_LEN);
        buf.push(self.kind.tag());
        buf.extend_from_slice(&self.code.to_le_bytes());
        buf.extend_from_slice(&self.value.to_le_bytes());
        buf.extend_from_slice(&self.client_sequence.to_le_bytes());
        buf.extend_from_slice(&self.origin_timestamp_us.to_le_bytes());
        buf
    }

    /// Unknown `type` tags are ignored by the caller (returns `Ok(None)`
    /// here is deliberately not modeled — the caller distinguishes
    /// "malformed, too short" from "well-formed but unknown kind" via
    /// [`MessageError::BadInputTag`] and drops the latter silently).
    pub fn decode(buf: &[u8]) -> Result<Self, MessageError> {
        if buf.len() < INPUT_EVENT_LEN {
            return Err(MessageError::TooShort(buf.len(), INPUT_EVENT_LEN));
        }
        let kind = InputEventKind::from_tag(buf[0]).ok_or(MessageError::BadInputTag(buf[0]))?;
        let code = u16::from_le_bytes(buf[1..3].try_into().unwrap());
        let value = i32::from_le_bytes(buf[3..7].try_into().unwrap());
        let client_sequence = u64::from_le_bytes(buf[7..15].try_into().unwrap());
        let origin_timestamp_us = u64::from_le_bytes(buf[15..23].try_into().unwrap());
        Ok(Self {
            kind,
            code,
            value,
            client_sequence,
            origin_timestamp_us,
        })
    }
}

/// CONTROL packet payloads: either direction, small and typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Disconnect,
    RequestKeyframe,
}

impl ControlMessage {
    pub fn encode(self) -> [u8; 1] {
        match self {
            Self::Disconnect => [0x01],
            Self::RequestKeyframe => [0x02],
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, MessageError> {
        if buf.is_empty() {
            return Err(MessageError::TooShort(0, 1));
        }
        match buf[0] {
            0x01 => Ok(Self::Disconnect),
            0x02 => Ok(Self::RequestKeyframe),
            other => Err(MessageError::BadControlTag(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_roundtrips() {
        let hello = Hello {
            public_key: [7u8; 32],
            challenge: [9u8; 16],
            timestamp_ms: 1_700_000_000_000,
            signature: [3u8; 64],
        };
        let encoded = hello.encode();
        assert_eq!(encoded.len(), HELLO_LEN);
        assert_eq!(Hello::decode(&encoded).unwrap(), hello);
    }

    #[test]
    fn hello_signed_region_excludes_signature() {
        let pk = [1u8; 32];
        let ch = [2u8; 16];
        let region = Hello::signed_region(&pk, &ch, 42);
        assert_eq!(region.len(), 32 + 16 + 8);
        assert!(!region.windows(64).any(|w| w.iter().all(|&b| b == 3)));
    }

    #[test]
    fn hello_ack_roundtrips() {
        let ack = HelloAck {
            public_key: [1u8; 32],
            echo_challenge: [2u8; 16],
            challenge: [3u8; 16],
            timestamp_ms: 99,
            signature: [4u8; 64],
        };
        let encoded = ack.encode();
        assert_eq!(encoded.len(), HELLO_ACK_LEN);
        assert_eq!(HelloAck::decode(&encoded).unwrap(), ack);
    }

    #[test]
    fn liveness_token_roundtrips() {
        let tok = LivenessToken { token_us: 123_456_789 };
        let encoded = tok.encode();
        assert_eq!(LivenessToken::decode(&encoded).unwrap(), tok);
    }

    #[test]
    fn input_event_roundtrips_each_kind() {
        for kind in [
            InputEventKind::Key,
            InputEventKind::Rel,
            InputEventKind::Abs,
            InputEventKind::Syn,
        ] {
            let ev = InputEventPacket {
                kind,
                code: 30,
                value: -1,
                client_sequence: 5,
                origin_timestamp_us: 42,
            };
            let encoded = ev.encode();
            assert_eq!(InputEventPacket::decode(&encoded).unwrap(), ev);
        }
    }

    #[test]
    fn input_event_rejects_unknown_kind() {
        let mut buf = vec![0u8; INPUT_EVENT_LEN];
        buf[0] = 0xFF;
        assert_eq!(
            InputEventPacket::decode(&buf),
            Err(MessageError::BadInputTag(0xFF))
        );
    }

    #[test]
    fn control_message_roundtrips() {
        for msg in [ControlMessage::Disconnect, ControlMessage::RequestKeyframe] {
            let encoded = msg.encode();
            assert_eq!(ControlMessage::decode(&encoded).unwrap(), msg);
        }
    }

    #[test]
    fn control_message_rejects_unknown_tag() {
        assert_eq!(
            ControlMessage::decode(&[0x99]),
            Err(MessageError::BadControlTag(0x99))
        );
    }

    #[test]
    fn decode_never_panics_on_short_buffers() {
        for len in 0..20 {
            let buf = vec![0xAAu8; len];
            let _ = Hello::decode(&buf);
            let _ = HelloAck::decode(&buf);
            let _ = LivenessToken::decode(&buf);
            let _ = InputEventPacket::decode(&buf);
            let _ = ControlMessage::decode(&buf);
        }
    }
}
