//! Client service loop (C12): initiate the handshake with one host,
//! then receive/decode video and audio, forward local input, and keep
//! the connection alive. Mirrors the structure of `host.rs` but the
//! data plane runs in the opposite direction.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rootstream_core::discovery::{BroadcastListener, DiscoveryTier, MdnsBrowser, PeerCache, PeerHistory};
use rootstream_core::peer::{PeerRegistry, PeerState};
use rootstream_core::session::reconstruct_nonce;
use rootstream_core::time::now_us;
use rootstream_core::transport::Transport;
use rootstream_crypto::{parse_peer_code, Identity};
use rootstream_protocol::{
    validate, ControlMessage, InputEventPacket, LivenessToken, MAX_PACKET_SIZE, PacketType,
};
use tracing::{debug, info, warn};

use crate::collab::{
    AudioSink, Decoder, DummyAudioSink, DummyDecoder, DummyInputSource, InputSource,
};
use crate::net::{build_hello_packet, handle_inbound_hello_ack, poll_peer_liveness, HandshakeBook};

/// One dropped GOP's worth of video packets before asking the host for
/// a fresh keyframe, rather than waiting for the decoder to fail.
const KEYFRAME_GAP_TOLERANCE: u16 = 5;
const INPUT_BATCH_INTERVAL: Duration = Duration::from_millis(1);
/// How long each discovery tier gets to turn up the target peer code
/// before the next tier (and eventually manual resolution) is tried.
const DISCOVERY_WINDOW: Duration = Duration::from_secs(3);

pub struct ClientConfig {
    pub peer_code: String,
    pub port: u16,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_reconnect_attempts: u32,
    pub max_peers: usize,
    pub handshake_timeout_secs: u64,
    pub ping_interval_secs: u64,
    pub ping_miss_threshold: u32,
    pub enable_mdns: bool,
    pub enable_broadcast: bool,
    pub broadcast_port: u16,
    pub cache_ttl_secs: u64,
    pub cache_cap: usize,
}

pub async fn run(identity: Arc<Identity>, config: ClientConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let (host_public_key, host_label) = parse_peer_code(&config.peer_code)
        .map_err(|e| anyhow::anyhow!("invalid peer code: {e}"))?;

    let host_addr = discover_host_addr(&host_label, &config).await?;
    info!(%host_addr, "connecting");

    let transport = Transport::bind(0)?;
    let mut registry = PeerRegistry::new(config.max_peers.max(1));
    let mut handshakes = HandshakeBook::new(Duration::from_secs(config.handshake_timeout_secs));

    let mut decoder = DummyDecoder::new();
    decoder.init()?;
    let mut audio_sink = DummyAudioSink::new();
    audio_sink.init()?;
    let mut input_source = DummyInputSource::new();
    input_source.init()?;

    let initial_backoff = Duration::from_millis(config.initial_backoff_ms);
    let max_backoff = Duration::from_millis(config.max_backoff_ms);
    let max_attempts = config.max_reconnect_attempts;
    let ping_interval = Duration::from_secs(config.ping_interval_secs);
    let ping_miss_threshold = config.ping_miss_threshold;

    let Some(peer) = registry.get_or_insert(host_addr, initial_backoff, max_backoff, max_attempts) else {
        anyhow::bail!("peer registry rejected the only peer this client will ever track");
    };
    peer.public_key = Some(host_public_key);
    let challenge = handshakes.begin(host_addr, Instant::now());
    let hello = build_hello_packet(&identity.signing_key, challenge);
    transport.send_to(host_addr, &hello.bytes).await?;
    peer.transition(PeerState::Connecting);

    let mut recv_buf = vec![0u8; MAX_PACKET_SIZE];
    let mut last_video_sequence: Option<u16> = None;
    let mut client_sequence: u64 = 0;
    let mut last_input_flush = Instant::now();

    while running.load(Ordering::Relaxed) {
        if let Ok(Some((from, len))) = transport.recv(5, &mut recv_buf).await {
            if from == host_addr {
                dispatch_inbound(
                    &identity,
                    &mut registry,
                    &mut handshakes,
                    &mut decoder,
                    &mut audio_sink,
                    &transport,
                    from,
                    &recv_buf[..len],
                    &mut last_video_sequence,
                )
                .await;
            }
        }

        for (addr, outcome) in handshakes.poll_timeouts(Instant::now()) {
            match outcome {
                crate::net::TimeoutOutcome::Retry(challenge) => {
                    let packet = build_hello_packet(&identity.signing_key, challenge);
                    let _ = transport.send_to(addr, &packet.bytes).await;
                }
                crate::net::TimeoutOutcome::Exhausted => {
                    if let Some(peer) = registry.get_mut(&addr) {
                        peer.transition(PeerState::Failed);
                        warn!(%addr, "handshake exhausted");
                        if peer.reconnect.on_failure().is_none() {
                            peer.transition(PeerState::Disconnected);
                        }
                    }
                }
            }
        }

        if let Some(peer) = registry.get_mut(&host_addr) {
            poll_peer_liveness(peer, &transport, ping_interval, ping_miss_threshold).await;

            if peer.state == PeerState::Failed && peer.reconnect.is_due(Instant::now()) {
                let challenge = handshakes.begin(host_addr, Instant::now());
                let hello = build_hello_packet(&identity.signing_key, challenge);
                let _ = transport.send_to(host_addr, &hello.bytes).await;
                peer.transition(PeerState::Connecting);
                info!(%host_addr, attempt = peer.reconnect.attempt_count(), "redialing host");
            }
        }

        if last_input_flush.elapsed() >= INPUT_BATCH_INTERVAL {
            flush_input(
                &mut registry,
                &transport,
                host_addr,
                &mut input_source,
                &mut client_sequence,
            )
            .await;
            last_input_flush = Instant::now();
        }
    }

    if let Some(peer) = registry.get_mut(&host_addr) {
        if let Some(session) = peer.session.as_mut() {
            if let Ok(encoded) = session.seal_and_send(PacketType::Control, &ControlMessage::Disconnect.encode()) {
                let _ = transport.send_to(host_addr, &encoded.bytes).await;
            }
        }
    }

    decoder.cleanup();
    audio_sink.cleanup();
    input_source.cleanup();
    info!("client shut down cleanly");
    Ok(())
}

/// Resolves the host's network address, trying each discovery tier in
/// turn before falling back to the manual `<label>:<port>`/DNS lookup:
/// mDNS browsing first (if enabled), then a short LAN broadcast listen
/// (if enabled), each bounded to [`DISCOVERY_WINDOW`] so a host that
/// isn't advertising doesn't stall the connect attempt. Every hit,
/// including the manual fallback, is recorded into a transient
/// [`PeerCache`]/[`PeerHistory`] pair so a future reconnect front end
/// has something to read from.
async fn discover_host_addr(host_label: &str, config: &ClientConfig) -> anyhow::Result<SocketAddr> {
    let mut cache = PeerCache::with_ttl_and_cap(Duration::from_secs(config.cache_ttl_secs), config.cache_cap);
    let mut history = PeerHistory::new();

    if config.enable_mdns {
        if let Some(addr) = discover_via_mdns(&config.peer_code, &mut cache, &mut history).await {
            return Ok(addr);
        }
    }
    if config.enable_broadcast {
        if let Some(addr) =
            discover_via_broadcast(&config.peer_code, config.broadcast_port, &mut cache, &mut history).await
        {
            return Ok(addr);
        }
    }

    debug!(cached = cache.len(), history = history.len(), "falling back to manual resolution");
    let addr = rootstream_core::discovery::resolve_manual_entry(host_label, config.port)
        .map_err(|e| anyhow::anyhow!("could not resolve host '{host_label}': {e}"))?;
    history.record(host_label, config.port, &config.peer_code);
    Ok(addr)
}

async fn discover_via_mdns(peer_code: &str, cache: &mut PeerCache, history: &mut PeerHistory) -> Option<SocketAddr> {
    let browser = MdnsBrowser::browse().ok()?;
    let deadline = Instant::now() + DISCOVERY_WINDOW;
    while Instant::now() < deadline {
        for svc in browser.poll() {
            if svc.peer_code.as_deref() == Some(peer_code) {
                cache.add(&svc.hostname, svc.port, peer_code, DiscoveryTier::Mdns);
                history.record(&svc.hostname, svc.port, peer_code);
                let _ = browser.stop();
                return rootstream_core::discovery::resolve_manual_entry(&svc.hostname, svc.port).ok();
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let _ = browser.stop();
    None
}

async fn discover_via_broadcast(
    peer_code: &str,
    port: u16,
    cache: &mut PeerCache,
    history: &mut PeerHistory,
) -> Option<SocketAddr> {
    let listener = BroadcastListener::bind_on(port).ok()?;
    let deadline = Instant::now() + DISCOVERY_WINDOW;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        let Ok(Ok(Some((from, beacon)))) = tokio::time::timeout(remaining, listener.recv_beacon()).await else {
            continue;
        };
        if beacon.peer_code == peer_code {
            cache.add(&beacon.hostname, beacon.listen_port, peer_code, DiscoveryTier::Broadcast);
            history.record(&beacon.hostname, beacon.listen_port, peer_code);
            return Some(SocketAddr::new(from.ip(), beacon.listen_port));
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_inbound(
    identity: &Identity,
    registry: &mut PeerRegistry,
    handshakes: &mut HandshakeBook,
    decoder: &mut DummyDecoder,
    audio_sink: &mut DummyAudioSink,
    transport: &Transport,
    from: SocketAddr,
    datagram: &[u8],
    last_video_sequence: &mut Option<u16>,
) {
    let parsed = match validate(datagram) {
        Ok(p) => p,
        Err(e) => {
            debug!(%from, error = %e, "dropping malformed datagram");
            return;
        }
    };

    match parsed.header.packet_type {
        PacketType::HelloAck => {
            if let Some((session, public_key)) =
                handle_inbound_hello_ack(&identity.signing_key, handshakes, from, parsed.payload)
            {
                if let Some(peer) = registry.get_mut(&from) {
                    peer.public_key = Some(public_key);
                    peer.session = Some(session);
                    peer.transition(PeerState::Authenticating);
                    peer.transition(PeerState::Connected);
                    peer.reconnect.on_success();
                    peer.touch_activity();
                    info!(%from, "handshake complete");
                }
            }
        }
        PacketType::Pong => {
            if let Some(peer) = registry.get_mut(&from) {
                peer.last_pong_at = Some(Instant::now());
                peer.missed_pings = 0;
                peer.touch_activity();
            }
        }
        PacketType::Video => {
            let Some(peer) = registry.get_mut(&from) else { return };
            let Some(session) = peer.session.as_mut() else { return };
            let nonce = reconstruct_nonce(session.next_expected_nonce(), parsed.header.sequence);
            match session.recv_and_open(nonce, parsed.payload) {
                Ok(plaintext) => {
                    peer.touch_activity();
                    if peer.state == PeerState::Connected {
                        peer.transition(PeerState::Streaming);
                    }
                    let gap = last_video_sequence
                        .map(|prev| parsed.header.sequence.wrapping_sub(prev))
                        .unwrap_or(1);
                    *last_video_sequence = Some(parsed.header.sequence);

                    match decoder.decode(&plaintext) {
                        Ok(Some(_frame)) => {}
                        Ok(None) => {}
                        Err(e) => {
                            warn!(%from, error = %e, "video decode failed");
                        }
                    }

                    if gap > KEYFRAME_GAP_TOLERANCE {
                        if let Ok(encoded) =
                            session.seal_and_send(PacketType::Control, &ControlMessage::RequestKeyframe.encode())
                        {
                            let _ = transport.send_to(from, &encoded.bytes).await;
                        }
                    }
                }
                Err(e) => warn!(%from, error = %e, "video packet rejected"),
            }
        }
        PacketType::Audio => {
            let Some(peer) = registry.get_mut(&from) else { return };
            let Some(session) = peer.session.as_mut() else { return };
            let nonce = reconstruct_nonce(session.next_expected_nonce(), parsed.header.sequence);
            if let Ok(plaintext) = session.recv_and_open(nonce, parsed.payload) {
                let samples: Vec<i16> = plaintext
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]))
                    .collect();
                let _ = audio_sink.play_samples(&samples);
            }
        }
        PacketType::Control => {
            let Some(peer) = registry.get_mut(&from) else { return };
            let Some(session) = peer.session.as_mut() else { return };
            let nonce = reconstruct_nonce(session.next_expected_nonce(), parsed.header.sequence);
            if let Ok(plaintext) = session.recv_and_open(nonce, parsed.payload) {
                peer.touch_activity();
                if let Ok(ControlMessage::Disconnect) = ControlMessage::decode(&plaintext) {
                    peer.transition(PeerState::Failed);
                    info!(%from, "host sent disconnect");
                }
            }
        }
        PacketType::Ping => {
            if let Ok(token) = LivenessToken::decode(parsed.payload) {
                if let Some(peer) = registry.get_mut(&from) {
                    peer.touch_activity();
                }
                let pong_packet = crate::net::build_pong_packet(token);
                let _ = transport.send_to(from, &pong_packet.bytes).await;
            }
        }
        PacketType::Hello | PacketType::Input => {
            debug!(%from, packet_type = ?parsed.header.packet_type, "unexpected packet type for a client, dropping");
        }
    }
}

async fn flush_input(
    registry: &mut PeerRegistry,
    transport: &Transport,
    host_addr: SocketAddr,
    input_source: &mut DummyInputSource,
    client_sequence: &mut u64,
) {
    let Some(peer) = registry.get_mut(&host_addr) else { return };
    if peer.state != PeerState::Streaming && peer.state != PeerState::Connected {
        return;
    }
    let Some(session) = peer.session.as_mut() else { return };

    let events = match input_source.poll_events() {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, "local input collection failed");
            return;
        }
    };

    for raw in events {
        let packet = InputEventPacket {
            kind: raw.kind,
            code: raw.code,
            value: raw.value,
            client_sequence: *client_sequence,
            origin_timestamp_us: now_us(),
        };
        *client_sequence += 1;

        if let Ok(encoded) = session.seal_and_send(PacketType::Input, &packet.encode()) {
            let _ = transport.send_to(host_addr, &encoded.bytes).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyframe_gap_beyond_tolerance_is_detected() {
        let prev: u16 = 10;
        let next: u16 = prev + KEYFRAME_GAP_TOLERANCE + 1;
        assert!(next.wrapping_sub(prev) > KEYFRAME_GAP_TOLERANCE);
    }

    #[test]
    fn keyframe_gap_within_tolerance_is_not_flagged() {
        let prev: u16 = 10;
        let next: u16 = prev + 1;
        assert!(next.wrapping_sub(prev) <= KEYFRAME_GAP_TOLERANCE);
    }
}
