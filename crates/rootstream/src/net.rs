//! Shared handshake and liveness dispatch helpers for the host and
//! client service loops (`host.rs`/`client.rs`): the two loops are
//! symmetric in how they establish and keep a session alive, and
//! differ only in their data-plane payloads (video/audio vs. input).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use ed25519_dalek::{SigningKey, VerifyingKey};
use rootstream_core::handshake::{
    build_hello, build_hello_ack, random_challenge, verify_hello, verify_hello_ack,
    wins_concurrent_initiation,
};
use rootstream_core::peer::{PeerEntry, PeerState};
use rootstream_core::rate_limit::HelloRateLimiter;
use rootstream_core::session::Session;
use rootstream_core::time::now_ms_truncated;
use rootstream_core::transport::Transport;
use rootstream_protocol::{EncodedPacket, Hello, HelloAck, LivenessToken, PacketType, CHALLENGE_LEN};
use rootstream_crypto::derive_session;
use tracing::{debug, warn};

/// Default handshake retry budget: one retry before giving up on an
/// in-flight HELLO. Not config-driven — unlike the timeout, this isn't
/// documented as a tunable and changing it would change the handshake's
/// observable retry behavior rather than just its pacing.
pub const HANDSHAKE_MAX_RETRIES: u32 = 1;

struct PendingHandshake {
    challenge: [u8; CHALLENGE_LEN],
    deadline: Instant,
    retries_left: u32,
}

/// In-flight initiator handshake state, keyed by destination address.
/// Deliberately not folded into `PeerEntry`: it's transient per-attempt
/// bookkeeping, not part of the peer's long-lived record.
pub struct HandshakeBook {
    pending: HashMap<SocketAddr, PendingHandshake>,
    timeout: Duration,
}

/// What a timed-out handshake attempt means for the caller: either
/// retry with a fresh challenge, or the attempt is exhausted and the
/// peer should be marked FAILED.
pub enum TimeoutOutcome {
    Retry([u8; CHALLENGE_LEN]),
    Exhausted,
}

impl HandshakeBook {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            timeout,
        }
    }

    pub fn begin(&mut self, addr: SocketAddr, now: Instant) -> [u8; CHALLENGE_LEN] {
        let challenge = random_challenge();
        self.pending.insert(
            addr,
            PendingHandshake {
                challenge,
                deadline: now + self.timeout,
                retries_left: HANDSHAKE_MAX_RETRIES,
            },
        );
        challenge
    }

    pub fn is_pending(&self, addr: &SocketAddr) -> bool {
        self.pending.contains_key(addr)
    }

    pub fn cancel(&mut self, addr: &SocketAddr) {
        self.pending.remove(addr);
    }

    fn challenge_for(&self, addr: &SocketAddr) -> Option<[u8; CHALLENGE_LEN]> {
        self.pending.get(addr).map(|p| p.challenge)
    }

    /// Drains timed-out attempts as of `now`, returning each address
    /// paired with its outcome. Retried attempts stay in the book with
    /// a fresh challenge and deadline; exhausted ones are removed.
    pub fn poll_timeouts(&mut self, now: Instant) -> Vec<(SocketAddr, TimeoutOutcome)> {
        let expired: Vec<SocketAddr> = self
            .pending
            .iter()
            .filter(|(_, p)| now >= p.deadline)
            .map(|(&addr, _)| addr)
            .collect();

        let mut results = Vec::with_capacity(expired.len());
        for addr in expired {
            let pending = self.pending.get_mut(&addr).expect("just collected from this map");
            if pending.retries_left > 0 {
                pending.retries_left -= 1;
                pending.challenge = random_challenge();
                pending.deadline = now + self.timeout;
                results.push((addr, TimeoutOutcome::Retry(pending.challenge)));
            } else {
                self.pending.remove(&addr);
                results.push((addr, TimeoutOutcome::Exhausted));
            }
        }
        results
    }
}

pub fn build_hello_packet(signing_key: &SigningKey, challenge: [u8; CHALLENGE_LEN]) -> EncodedPacket {
    let hello = build_hello(signing_key, challenge);
    EncodedPacket::build(PacketType::Hello, 0, now_ms_truncated(), &hello.encode())
        .expect("a HELLO payload always fits in one packet")
}

pub fn build_ping_packet() -> EncodedPacket {
    let token = LivenessToken { token_us: rootstream_core::time::now_us() };
    EncodedPacket::build(PacketType::Ping, 0, now_ms_truncated(), &token.encode())
        .expect("a liveness token always fits in one packet")
}

pub fn build_pong_packet(token: LivenessToken) -> EncodedPacket {
    EncodedPacket::build(PacketType::Pong, 0, now_ms_truncated(), &token.encode())
        .expect("a liveness token always fits in one packet")
}

/// Drives one peer's liveness probe: sends a PING once per
/// `ping_interval` and, if the previous PING went unanswered, counts a
/// miss. Fails the peer once `ping_miss_threshold` consecutive PINGs
/// have gone unanswered (reconnect scheduling follows the same pattern
/// as a handshake-timeout exhaustion). Shared by the host, which calls
/// this once per CONNECTED/STREAMING peer, and the client, which has
/// exactly one.
pub async fn poll_peer_liveness(
    peer: &mut PeerEntry,
    transport: &Transport,
    ping_interval: Duration,
    ping_miss_threshold: u32,
) {
    if !matches!(peer.state, PeerState::Connected | PeerState::Streaming) {
        return;
    }

    let now = Instant::now();
    let due = peer
        .last_ping_sent_at
        .map(|sent_at| now.duration_since(sent_at) >= ping_interval)
        .unwrap_or(true);
    if !due {
        return;
    }

    if let Some(sent_at) = peer.last_ping_sent_at {
        let replied = peer.last_pong_at.map(|pong_at| pong_at >= sent_at).unwrap_or(false);
        if !replied {
            peer.missed_pings += 1;
        }
    }

    if peer.missed_pings >= ping_miss_threshold {
        peer.transition(PeerState::Failed);
        if peer.reconnect.on_failure().is_none() {
            peer.transition(PeerState::Disconnected);
        }
        return;
    }

    let ping = build_ping_packet();
    let _ = transport.send_to(peer.addr, &ping.bytes).await;
    peer.last_ping_sent_at = Some(now);
}

/// Result of processing an inbound HELLO.
pub enum HelloOutcome {
    /// The HELLO verified; session is derived and an ACK is ready to
    /// send. The caller installs the session and transitions the peer
    /// straight to CONNECTED (the responder never waits on an ACK of
    /// its own).
    Accepted {
        ack: EncodedPacket,
        session: Session,
        public_key: VerifyingKey,
    },
    /// Rate-limited, malformed/unverifiable, or lost a concurrent
    /// initiation tiebreak — nothing to send, nothing to install.
    Ignored,
}

/// Processes an inbound HELLO as a responder. If we also have our own
/// in-flight HELLO to the same address (concurrent initiation), the
/// lexicographically smaller public key wins and keeps initiating; the
/// loser cancels its own attempt and answers as a responder instead.
pub fn handle_inbound_hello(
    my_signing_key: &SigningKey,
    rate_limiter: &mut HelloRateLimiter,
    handshakes: &mut HandshakeBook,
    from: SocketAddr,
    payload: &[u8],
) -> HelloOutcome {
    if !rate_limiter.allow(from) {
        warn!(%from, "HELLO rate limit exceeded, dropping");
        return HelloOutcome::Ignored;
    }

    let hello = match Hello::decode(payload) {
        Ok(h) => h,
        Err(e) => {
            debug!(%from, error = %e, "malformed HELLO");
            return HelloOutcome::Ignored;
        }
    };

    let peer_verifying_key = match verify_hello(&hello) {
        Ok(key) => key,
        Err(e) => {
            warn!(%from, error = %e, "HELLO signature verification failed");
            return HelloOutcome::Ignored;
        }
    };

    if handshakes.is_pending(&from) {
        let my_public = my_signing_key.verifying_key().to_bytes();
        if wins_concurrent_initiation(&my_public, &hello.public_key) {
            debug!(%from, "concurrent initiation: we win the tiebreak, ignoring peer's HELLO");
            return HelloOutcome::Ignored;
        }
        debug!(%from, "concurrent initiation: peer wins the tiebreak, answering as responder");
        handshakes.cancel(&from);
    }

    let session_key = match derive_session(my_signing_key, &peer_verifying_key) {
        Ok(k) => k,
        Err(e) => {
            warn!(%from, error = %e, "session key derivation failed");
            return HelloOutcome::Ignored;
        }
    };

    let ack = build_hello_ack(my_signing_key, hello.challenge, random_challenge());
    let encoded = match EncodedPacket::build(PacketType::HelloAck, 0, now_ms_truncated(), &ack.encode()) {
        Ok(p) => p,
        Err(e) => {
            warn!(%from, error = %e, "failed to encode HELLO_ACK");
            return HelloOutcome::Ignored;
        }
    };

    HelloOutcome::Accepted {
        ack: encoded,
        session: Session::new(session_key),
        public_key: peer_verifying_key,
    }
}

/// Processes an inbound HELLO_ACK as an initiator. Leaves the pending
/// handshake in place on failure, so the normal timeout/retry path
/// still governs it (the ACK may simply have been corrupted in
/// transit, and a retry can still succeed).
pub fn handle_inbound_hello_ack(
    my_signing_key: &SigningKey,
    handshakes: &mut HandshakeBook,
    from: SocketAddr,
    payload: &[u8],
) -> Option<(Session, VerifyingKey)> {
    let challenge = handshakes.challenge_for(&from)?;

    let ack = match HelloAck::decode(payload) {
        Ok(a) => a,
        Err(e) => {
            debug!(%from, error = %e, "malformed HELLO_ACK");
            return None;
        }
    };

    let peer_verifying_key = match verify_hello_ack(&ack, &challenge) {
        Ok(k) => k,
        Err(e) => {
            warn!(%from, error = %e, "HELLO_ACK verification failed");
            return None;
        }
    };

    let session_key = match derive_session(my_signing_key, &peer_verifying_key) {
        Ok(k) => k,
        Err(e) => {
            warn!(%from, error = %e, "session key derivation failed");
            return None;
        }
    };

    handshakes.cancel(&from);
    Some((Session::new(session_key), peer_verifying_key))
}
