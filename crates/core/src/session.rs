//! Per-peer encrypted session: send/receive sequencing, AEAD sealing,
//! and the 64-wide replay window.

use rootstream_crypto::{aead_open, aead_seal, CryptoError};
use rootstream_protocol::{checksum, EncodedPacket, PacketError, PacketType};
use thiserror::Error;

use crate::time::now_ms_truncated;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),
    #[error("authentication failed")]
    AuthFailed,
    #[error("replayed or too-old sequence")]
    Replay,
}

impl From<CryptoError> for SessionError {
    fn from(_: CryptoError) -> Self {
        SessionError::AuthFailed
    }
}

const REPLAY_WINDOW_WIDTH: u64 = 64;

/// 64-wide sliding bitmap of accepted nonces, keyed off `window_high`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayWindow {
    window_high: u64,
    bitmap: u64,
    seen_any: bool,
}

impl ReplayWindow {
    pub fn window_high(&self) -> u64 {
        self.window_high
    }

    pub fn has_seen_any(&self) -> bool {
        self.seen_any
    }

    /// Accepts iff `nonce` is newer than the high-water mark, or falls
    /// within the last [`REPLAY_WINDOW_WIDTH`] accepted nonces and has
    /// not been seen yet. On acceptance, advances state.
    pub fn accept(&mut self, nonce: u64) -> bool {
        if !self.seen_any {
            self.seen_any = true;
            self.window_high = nonce;
            self.bitmap = 1;
            return true;
        }

        if nonce > self.window_high {
            let shift = nonce - self.window_high;
            self.bitmap = if shift >= REPLAY_WINDOW_WIDTH {
                1
            } else {
                (self.bitmap << shift) | 1
            };
            self.window_high = nonce;
            return true;
        }

        let back = self.window_high - nonce;
        if back >= REPLAY_WINDOW_WIDTH {
            return false;
        }

        let bit = 1u64 << back;
        if self.bitmap & bit != 0 {
            return false;
        }
        self.bitmap |= bit;
        true
    }
}

/// An established, keyed session with a peer. `send_nonce` and the
/// replay window are tracked independently of the 16-bit wire
/// `sequence` field (see DESIGN.md, Open Question 1) — only the low
/// bits are mirrored onto the wire.
pub struct Session {
    key: [u8; 32],
    send_nonce: u64,
    replay: ReplayWindow,
    consecutive_auth_failures: u32,
}

impl Session {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key,
            send_nonce: 0,
            replay: ReplayWindow::default(),
            consecutive_auth_failures: 0,
        }
    }

    pub fn seal_and_send(
        &mut self,
        packet_type: PacketType,
        plaintext: &[u8],
    ) -> Result<EncodedPacket, SessionError> {
        let nonce = self.send_nonce;
        self.send_nonce += 1;

        let ciphertext = aead_seal(&self.key, nonce, plaintext);
        let sequence = nonce as u16;
        let encoded = EncodedPacket::build(packet_type, sequence, now_ms_truncated(), &ciphertext)?;
        Ok(encoded)
    }

    /// Reconstructs the receive nonce from `expected_nonce` (the
    /// caller's own per-session monotonic counter candidate, typically
    /// `window_high + 1` or a value near it) rather than trusting the
    /// wire `sequence` field directly; the wire field is only used to
    /// pick among nearby candidates when reordering is suspected.
    pub fn recv_and_open(&mut self, nonce: u64, ciphertext: &[u8]) -> Result<Vec<u8>, SessionError> {
        if !self.replay.accept(nonce) {
            return Err(SessionError::Replay);
        }

        match aead_open(&self.key, nonce, ciphertext) {
            Ok(plaintext) => {
                self.consecutive_auth_failures = 0;
                Ok(plaintext)
            }
            Err(_) => {
                self.consecutive_auth_failures += 1;
                Err(SessionError::AuthFailed)
            }
        }
    }

    pub fn consecutive_auth_failures(&self) -> u32 {
        self.consecutive_auth_failures
    }

    pub fn checksum_is_valid(payload: &[u8], expected: u16) -> bool {
        checksum(payload) == expected
    }

    /// The caller's best starting candidate for the next inbound nonce,
    /// used to reconstruct the full 64-bit value from the wire's
    /// 16-bit mirrored low bits (see DESIGN.md, Open Question 1).
    pub fn next_expected_nonce(&self) -> u64 {
        if self.replay.has_seen_any() {
            self.replay.window_high() + 1
        } else {
            0
        }
    }
}

/// Reconstructs the most likely full 64-bit AEAD nonce for an inbound
/// packet from the wire's 16-bit mirrored low bits, by picking the
/// candidate among the three neighboring 16-bit periods closest to
/// `expected` (the receiver's own next-expected nonce). Handles the
/// common in-order case and small reordering/wraparound near a period
/// boundary; wide reordering beyond one period is not recoverable from
/// the wire field alone and falls back to whichever candidate is
/// nearest, which the replay window will then accept or reject.
pub fn reconstruct_nonce(expected: u64, wire_sequence: u16) -> u64 {
    const PERIOD: u64 = 1 << 16;
    let base = expected & !(PERIOD - 1);
    [base.wrapping_sub(PERIOD), base, base.wrapping_add(PERIOD)]
        .into_iter()
        .map(|b| b | wire_sequence as u64)
        .min_by_key(|&candidate| candidate.abs_diff(expected))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_and_send_then_open_roundtrips() {
        let key = [5u8; 32];
        let mut sender = Session::new(key);
        let mut receiver = Session::new(key);

        let encoded = sender
            .seal_and_send(PacketType::Video, b"frame data")
            .unwrap();
        let parsed = rootstream_protocol::validate(&encoded.bytes).unwrap();

        let plaintext = receiver
            .recv_and_open(parsed.header.sequence as u64, parsed.payload)
            .unwrap();
        assert_eq!(plaintext, b"frame data");
    }

    #[test]
    fn replay_window_rejects_exact_replay() {
        let mut window = ReplayWindow::default();
        assert!(window.accept(10));
        assert!(!window.accept(10));
    }

    #[test]
    fn replay_window_accepts_in_order_and_slightly_reordered() {
        let mut window = ReplayWindow::default();
        assert!(window.accept(100));
        assert!(window.accept(101));
        assert!(window.accept(99)); // arrived late, still within window
        assert!(!window.accept(99)); // now a replay
    }

    #[test]
    fn replay_window_rejects_too_far_behind() {
        let mut window = ReplayWindow::default();
        assert!(window.accept(1000));
        assert!(!window.accept(1000 - REPLAY_WINDOW_WIDTH));
    }

    #[test]
    fn replay_window_handles_large_forward_jumps() {
        let mut window = ReplayWindow::default();
        assert!(window.accept(5));
        assert!(window.accept(5 + REPLAY_WINDOW_WIDTH * 10));
        assert!(!window.accept(5)); // long gone from the window now
    }

    #[test]
    fn auth_failures_increment_counter_and_reset_on_success() {
        let key = [9u8; 32];
        let mut sender = Session::new(key);
        let mut receiver = Session::new(key);

        let encoded = sender.seal_and_send(PacketType::Audio, b"ok").unwrap();
        let parsed = rootstream_protocol::validate(&encoded.bytes).unwrap();
        assert!(receiver
            .recv_and_open(parsed.header.sequence as u64, parsed.payload)
            .is_ok());
        assert_eq!(receiver.consecutive_auth_failures(), 0);

        let mut tampered = parsed.payload.to_vec();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xFF;
        assert!(receiver.recv_and_open(999, &tampered).is_err());
        assert_eq!(receiver.consecutive_auth_failures(), 1);
    }

    #[test]
    fn next_expected_nonce_starts_at_zero_before_anything_is_seen() {
        let session = Session::new([0u8; 32]);
        assert_eq!(session.next_expected_nonce(), 0);
    }

    #[test]
    fn next_expected_nonce_follows_the_high_water_mark() {
        let mut session = Session::new([3u8; 32]);
        assert!(session.replay.accept(41));
        assert_eq!(session.next_expected_nonce(), 42);
    }

    #[test]
    fn reconstruct_nonce_matches_exactly_within_the_same_period() {
        assert_eq!(reconstruct_nonce(100, 105), 105);
    }

    #[test]
    fn reconstruct_nonce_handles_forward_wraparound() {
        // expected is near the top of a 16-bit period, wire sequence
        // wrapped to a small value just past the boundary.
        let expected = 0x1_FFF8;
        assert_eq!(reconstruct_nonce(expected, 0x0002), 0x2_0002);
    }

    #[test]
    fn reconstruct_nonce_handles_backward_wraparound() {
        // expected just rolled over into a new period, wire sequence
        // belongs to the tail of the previous one (a late arrival).
        let expected = 0x2_0002;
        assert_eq!(reconstruct_nonce(expected, 0xFFF8), 0x1_FFF8);
    }
}
