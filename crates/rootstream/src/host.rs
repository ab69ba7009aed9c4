//! Host service loop (C11): capture, encode, fan out to every
//! streaming peer, then drain and dispatch whatever arrived. Runs on a
//! single task; capture/encode/network are sequenced within one tick,
//! matching the concurrency model's "single-threaded cooperative
//! within the core" contract.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rootstream_core::discovery::BroadcastListener;
use rootstream_core::handshake::random_challenge;
use rootstream_core::peer::{PeerRegistry, PeerState};
use rootstream_core::rate_limit::HelloRateLimiter;
use rootstream_core::session::reconstruct_nonce;
use rootstream_core::time::now_us;
use rootstream_core::transport::Transport;
use rootstream_core::{latency::LatencySample, latency::LatencyTracker};
use rootstream_crypto::Identity;
use rootstream_protocol::{
    validate, ControlMessage, DiscoveryBeacon, InputEventPacket, LivenessToken, MAX_PACKET_SIZE,
    PacketType,
};
use tracing::{debug, info, warn};

use crate::collab::{Capture, DummyCapture, DummyEncoder, DummyInputInjector, Encoder, InputInjector};
use crate::net::{
    build_hello_packet, build_pong_packet, handle_inbound_hello, poll_peer_liveness, HandshakeBook,
    HelloOutcome, TimeoutOutcome,
};

const TICK_RATE_HZ: u64 = 60;
const KEYFRAME_INTERVAL_FRAMES: u32 = 60;

pub struct HostConfig {
    pub port: u16,
    pub display: String,
    pub bitrate_kbps: u32,
    pub no_discovery: bool,
    pub latency_log: bool,
    pub latency_interval_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_reconnect_attempts: u32,
    pub max_peers: usize,
    pub idle_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    pub ping_interval_secs: u64,
    pub ping_miss_threshold: u32,
    pub enable_mdns: bool,
    pub enable_broadcast: bool,
    pub broadcast_port: u16,
    pub broadcast_interval_secs: u64,
}

/// Per-client dedup/latency bookkeeping for inbound INPUT packets
/// (§4.11): tracked outside `PeerEntry` since it's data-plane state,
/// not connection state.
#[derive(Default)]
struct InputStats {
    last_sequence: Option<u64>,
    latency_sum_us: u64,
    latency_count: u64,
}

impl InputStats {
    fn accept(&mut self, event: &InputEventPacket, received_at_us: u64) -> bool {
        if self.last_sequence == Some(event.client_sequence) {
            return false;
        }
        self.last_sequence = Some(event.client_sequence);
        self.latency_sum_us += received_at_us.saturating_sub(event.origin_timestamp_us);
        self.latency_count += 1;
        true
    }

    fn average_latency_us(&self) -> Option<u64> {
        (self.latency_count > 0).then(|| self.latency_sum_us / self.latency_count)
    }
}

pub async fn run(identity: Arc<Identity>, config: HostConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let transport = Transport::bind(config.port)?;
    let local_addr = transport.local_addr()?;
    info!(port = local_addr.port(), peer_code = %identity.peer_code(), "host listening");

    let mdns = if config.no_discovery || !config.enable_mdns {
        None
    } else {
        match rootstream_core::discovery::MdnsAdvertiser::announce(
            &identity.label,
            local_addr.port(),
            &identity.peer_code(),
            rootstream_protocol::MDNS_CAPABILITY_HOST,
            config.max_peers as u32,
            config.bitrate_kbps,
        ) {
            Ok(advertiser) => Some(advertiser),
            Err(e) => {
                warn!(error = %e, "mDNS advertisement failed, continuing without it");
                None
            }
        }
    };

    let broadcaster = if config.no_discovery || !config.enable_broadcast {
        None
    } else {
        match BroadcastListener::bind_on(config.broadcast_port) {
            Ok(listener) => Some(listener),
            Err(e) => {
                warn!(error = %e, "LAN broadcast advertisement failed, continuing without it");
                None
            }
        }
    };
    let beacon = DiscoveryBeacon {
        protocol_version: rootstream_protocol::DISCOVERY_PROTOCOL_VERSION,
        hostname: identity.label.clone(),
        listen_port: local_addr.port(),
        peer_code: identity.peer_code(),
    };
    let broadcast_target: SocketAddr = (std::net::Ipv4Addr::BROADCAST, config.broadcast_port).into();
    let mut last_beacon_sent = Instant::now() - Duration::from_secs(config.broadcast_interval_secs);

    let mut registry = PeerRegistry::new(config.max_peers);
    let mut handshakes = HandshakeBook::new(Duration::from_secs(config.handshake_timeout_secs));
    let mut rate_limiter = HelloRateLimiter::new(20);
    let mut latency = LatencyTracker::new(256);
    let mut input_stats: HashMap<SocketAddr, InputStats> = HashMap::new();

    let mut capture = DummyCapture::new(1280, 720);
    capture.init(&config.display)?;
    let mut encoder = DummyEncoder::new(KEYFRAME_INTERVAL_FRAMES);
    encoder.init(config.bitrate_kbps)?;
    let mut injector = DummyInputInjector::new();
    injector.init()?;

    let initial_backoff = Duration::from_millis(config.initial_backoff_ms);
    let max_backoff = Duration::from_millis(config.max_backoff_ms);
    let max_attempts = config.max_reconnect_attempts;
    let ping_interval = Duration::from_secs(config.ping_interval_secs);
    let ping_miss_threshold = config.ping_miss_threshold;
    let idle_timeout = Duration::from_secs(config.idle_timeout_secs);
    let broadcast_interval = Duration::from_secs(config.broadcast_interval_secs);

    let tick_interval = Duration::from_millis(1000 / TICK_RATE_HZ);
    let mut force_keyframe = false;
    let mut last_report = Instant::now();
    let mut recv_buf = vec![0u8; MAX_PACKET_SIZE];
    let mut bitstream = Vec::new();

    while running.load(Ordering::Relaxed) {
        let t0 = Instant::now();

        let t_cap;
        match capture.capture_frame() {
            Ok(frame) => {
                t_cap = t0.elapsed().as_micros() as u64;

                match encoder.encode_frame(&frame, force_keyframe, &mut bitstream) {
                    Ok(_) => {
                        force_keyframe = false;
                        let t_enc = t0.elapsed().as_micros() as u64;

                        for peer in registry.iter_mut().filter(|p| p.state == PeerState::Streaming) {
                            if let Some(session) = peer.session.as_mut() {
                                match session.seal_and_send(PacketType::Video, &bitstream) {
                                    Ok(encoded) => {
                                        let _ = transport.send_to(peer.addr, &encoded.bytes).await;
                                    }
                                    Err(e) => warn!(addr = %peer.addr, error = %e, "seal_and_send video failed"),
                                }
                            }
                        }
                        let t_send = t0.elapsed().as_micros() as u64;

                        latency.record(LatencySample {
                            capture_us: t_cap,
                            encode_us: t_enc.saturating_sub(t_cap),
                            send_us: t_send.saturating_sub(t_enc),
                            total_us: t_send,
                        });
                    }
                    Err(e) => warn!(error = %e, "encode failed, skipping this tick's fan-out"),
                }
            }
            Err(e) => warn!(error = %e, "capture failed, skipping this tick"),
        }

        if let Ok(Some((from, len))) = transport.recv(1, &mut recv_buf).await {
            dispatch_inbound(
                &identity,
                &mut registry,
                &mut handshakes,
                &mut rate_limiter,
                &mut injector,
                &mut input_stats,
                &mut force_keyframe,
                &transport,
                from,
                &recv_buf[..len],
                initial_backoff,
                max_backoff,
                max_attempts,
            )
            .await;
        }

        poll_handshake_timeouts(&identity, &mut registry, &mut handshakes, &transport).await;
        poll_liveness(&mut registry, &transport, ping_interval, ping_miss_threshold).await;
        evict_idle_peers(&mut registry, idle_timeout);
        evict_disconnected(&mut registry);

        if let Some(listener) = &broadcaster {
            if last_beacon_sent.elapsed() >= broadcast_interval {
                let _ = listener.send_beacon(broadcast_target, &beacon).await;
                last_beacon_sent = Instant::now();
            }
        }

        if config.latency_log && last_report.elapsed() >= Duration::from_millis(config.latency_interval_ms) {
            let p50 = latency.report(0.5);
            let p95 = latency.report(0.95);
            let p99 = latency.report(0.99);
            info!(?p50, ?p95, ?p99, "latency report");
            last_report = Instant::now();
        }

        for (addr, stats) in &input_stats {
            if let Some(avg) = stats.average_latency_us() {
                debug!(%addr, average_input_latency_us = avg, "input latency");
            }
        }

        let elapsed = t0.elapsed();
        if elapsed < tick_interval {
            tokio::time::sleep(tick_interval - elapsed).await;
        }
    }

    for peer in registry.iter_mut() {
        if let Some(session) = peer.session.as_mut() {
            if let Ok(encoded) = session.seal_and_send(PacketType::Control, &ControlMessage::Disconnect.encode()) {
                let _ = transport.send_to(peer.addr, &encoded.bytes).await;
            }
        }
    }

    capture.cleanup();
    encoder.cleanup();
    injector.cleanup();
    if let Some(advertiser) = mdns {
        let _ = advertiser.stop();
    }
    info!("host shut down cleanly");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_inbound(
    identity: &Identity,
    registry: &mut PeerRegistry,
    handshakes: &mut HandshakeBook,
    rate_limiter: &mut HelloRateLimiter,
    injector: &mut DummyInputInjector,
    input_stats: &mut HashMap<SocketAddr, InputStats>,
    force_keyframe: &mut bool,
    transport: &Transport,
    from: SocketAddr,
    datagram: &[u8],
    initial_backoff: Duration,
    max_backoff: Duration,
    max_attempts: u32,
) {
    let parsed = match validate(datagram) {
        Ok(p) => p,
        Err(e) => {
            debug!(%from, error = %e, "dropping malformed datagram");
            return;
        }
    };

    match parsed.header.packet_type {
        PacketType::Hello => {
            match handle_inbound_hello(&identity.signing_key, rate_limiter, handshakes, from, parsed.payload) {
                HelloOutcome::Accepted { ack, session, public_key } => {
                    let Some(peer) = registry.get_or_insert(from, initial_backoff, max_backoff, max_attempts)
                    else {
                        warn!(%from, "peer registry full, rejecting new connection");
                        return;
                    };
                    peer.public_key = Some(public_key);
                    peer.session = Some(session);
                    peer.transition(PeerState::Connecting);
                    peer.transition(PeerState::Authenticating);
                    peer.transition(PeerState::Connected);
                    peer.touch_activity();
                    let _ = transport.send_to(from, &ack.bytes).await;
                    info!(%from, "peer authenticated");
                }
                HelloOutcome::Ignored => {}
            }
        }
        PacketType::Ping => {
            if let Ok(token) = LivenessToken::decode(parsed.payload) {
                if let Some(peer) = registry.get_mut(&from) {
                    peer.last_pong_at = Some(Instant::now());
                    peer.missed_pings = 0;
                    peer.touch_activity();
                }
                let pong = build_pong_packet(token);
                let _ = transport.send_to(from, &pong.bytes).await;
            }
        }
        PacketType::Pong => {
            if let Some(peer) = registry.get_mut(&from) {
                peer.last_pong_at = Some(Instant::now());
                peer.missed_pings = 0;
                peer.touch_activity();
            }
        }
        PacketType::Input => {
            let Some(peer) = registry.get_mut(&from) else { return };
            let Some(session) = peer.session.as_mut() else { return };
            let nonce = reconstruct_nonce(session.next_expected_nonce(), parsed.header.sequence);
            match session.recv_and_open(nonce, parsed.payload) {
                Ok(plaintext) => {
                    peer.touch_activity();
                    if peer.state == PeerState::Connected {
                        peer.transition(PeerState::Streaming);
                    }
                    match InputEventPacket::decode(&plaintext) {
                        Ok(event) => {
                            let stats = input_stats.entry(from).or_default();
                            if stats.accept(&event, now_us()) {
                                let _ = injector.inject(&event);
                            }
                        }
                        Err(e) => debug!(%from, error = %e, "malformed input event"),
                    }
                }
                Err(e) => warn!(%from, error = %e, "input packet rejected"),
            }
        }
        PacketType::Control => {
            let Some(peer) = registry.get_mut(&from) else { return };
            let Some(session) = peer.session.as_mut() else { return };
            let nonce = reconstruct_nonce(session.next_expected_nonce(), parsed.header.sequence);
            if let Ok(plaintext) = session.recv_and_open(nonce, parsed.payload) {
                match ControlMessage::decode(&plaintext) {
                    Ok(ControlMessage::RequestKeyframe) => *force_keyframe = true,
                    Ok(ControlMessage::Disconnect) => {
                        peer.transition(PeerState::Failed);
                    }
                    Err(e) => debug!(%from, error = %e, "malformed control message"),
                }
            }
        }
        PacketType::Video | PacketType::Audio | PacketType::HelloAck => {
            debug!(%from, packet_type = ?parsed.header.packet_type, "unexpected packet type for a host, dropping");
        }
    }
}

async fn poll_handshake_timeouts(
    identity: &Identity,
    registry: &mut PeerRegistry,
    handshakes: &mut HandshakeBook,
    transport: &Transport,
) {
    for (addr, outcome) in handshakes.poll_timeouts(Instant::now()) {
        match outcome {
            TimeoutOutcome::Retry(challenge) => {
                let packet = build_hello_packet(&identity.signing_key, challenge);
                let _ = transport.send_to(addr, &packet.bytes).await;
            }
            TimeoutOutcome::Exhausted => {
                if let Some(peer) = registry.get_mut(&addr) {
                    peer.transition(PeerState::Failed);
                    if peer.reconnect.on_failure().is_none() {
                        peer.transition(PeerState::Disconnected);
                    }
                }
            }
        }
    }
}

async fn poll_liveness(
    registry: &mut PeerRegistry,
    transport: &Transport,
    ping_interval: Duration,
    ping_miss_threshold: u32,
) {
    for peer in registry.iter_mut() {
        poll_peer_liveness(peer, transport, ping_interval, ping_miss_threshold).await;
    }
}

/// Fails (and schedules a reconnect attempt for) any CONNECTED/STREAMING
/// peer that has sent no HELLO/PING/INPUT/CONTROL traffic in
/// `idle_timeout` — independent of the PING-miss check in
/// [`poll_liveness`], which only proves the transport is up, not that
/// the peer is actually doing anything.
fn evict_idle_peers(registry: &mut PeerRegistry, idle_timeout: Duration) {
    let now = Instant::now();
    for peer in registry.iter_mut() {
        if !matches!(peer.state, PeerState::Connected | PeerState::Streaming) {
            continue;
        }
        if now.duration_since(peer.last_activity_at) >= idle_timeout {
            warn!(addr = %peer.addr, "peer idle past timeout, failing connection");
            peer.transition(PeerState::Failed);
            if peer.reconnect.on_failure().is_none() {
                peer.transition(PeerState::Disconnected);
            }
        }
    }
}

/// The host never redials — a peer whose scheduler is exhausted (or
/// that reached DISCONNECTED directly) just leaves its registry slot
/// behind to be garbage collected; a future inbound HELLO from the
/// same address starts a brand new entry via `get_or_insert`.
fn evict_disconnected(registry: &mut PeerRegistry) {
    let dead: Vec<SocketAddr> = registry
        .iter()
        .filter(|p| p.state == PeerState::Disconnected)
        .map(|p| p.addr)
        .collect();
    for addr in dead {
        registry.remove(&addr);
    }
}
