//! Peer registry: connection state machine and reconnect scheduler.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use ed25519_dalek::VerifyingKey;

use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    Discovered,
    Connecting,
    Authenticating,
    Connected,
    Streaming,
    Failed,
    Disconnected,
}

impl PeerState {
    pub fn can_transition_to(self, next: PeerState) -> bool {
        use PeerState::*;
        matches!(
            (self, next),
            (Discovered, Connecting)
                | (Connecting, Authenticating)
                | (Authenticating, Connected)
                | (Connected, Streaming)
                | (Streaming, Connected)
                | (Connecting, Failed)
                | (Authenticating, Failed)
                | (Connected, Failed)
                | (Streaming, Failed)
                | (Failed, Connecting)
                | (Failed, Disconnected)
        )
    }
}

pub struct ReconnectScheduler {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
    backoff: Duration,
    attempt_count: u32,
    next_attempt_at: Option<Instant>,
}

impl ReconnectScheduler {
    pub fn new(initial_backoff: Duration, max_backoff: Duration, max_attempts: u32) -> Self {
        Self {
            initial_backoff,
            max_backoff,
            max_attempts,
            backoff: initial_backoff,
            attempt_count: 0,
            next_attempt_at: None,
        }
    }

    /// Records a failure and returns `Some(deadline)` for the next
    /// attempt, or `None` if the attempt ceiling has been reached and
    /// the peer should move to `DISCONNECTED`. `max_attempts` backoff
    /// schedules are handed out before giving up, so the ceiling bites
    /// on the `max_attempts + 1`th consecutive failure.
    pub fn on_failure(&mut self) -> Option<Instant> {
        self.attempt_count += 1;
        if self.attempt_count > self.max_attempts {
            return None;
        }
        let deadline = Instant::now() + self.backoff;
        self.next_attempt_at = Some(deadline);
        self.backoff = (self.backoff * 2).min(self.max_backoff);
        Some(deadline)
    }

    pub fn on_success(&mut self) {
        self.attempt_count = 0;
        self.backoff = self.initial_backoff;
        self.next_attempt_at = None;
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_attempt_at.is_none_or(|deadline| now >= deadline)
    }
}

pub struct PeerEntry {
    pub addr: SocketAddr,
    pub public_key: Option<VerifyingKey>,
    pub state: PeerState,
    pub session: Option<Session>,
    pub reconnect: ReconnectScheduler,
    pub last_pong_at: Option<Instant>,
    pub missed_pings: u32,
    pub last_ping_sent_at: Option<Instant>,
    pub last_activity_at: Instant,
}

impl PeerEntry {
    pub fn new(addr: SocketAddr, initial_backoff: Duration, max_backoff: Duration, max_attempts: u32) -> Self {
        Self {
            addr,
            public_key: None,
            state: PeerState::Discovered,
            session: None,
            reconnect: ReconnectScheduler::new(initial_backoff, max_backoff, max_attempts),
            last_pong_at: None,
            missed_pings: 0,
            last_ping_sent_at: None,
            last_activity_at: Instant::now(),
        }
    }

    pub fn transition(&mut self, next: PeerState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        true
    }

    /// Marks inbound traffic from this peer, independent of the
    /// liveness-probe bookkeeping (`last_pong_at`/`missed_pings`): a
    /// peer that keeps answering PINGs but has stopped sending any
    /// data-plane traffic is still idle for eviction purposes.
    pub fn touch_activity(&mut self) {
        self.last_activity_at = Instant::now();
    }
}

/// Fixed-capacity peer table. The cap mirrors the `max_peers` value
/// advertised in the mDNS TXT record, so a host never accepts more
/// concurrent peers than it told the network it could serve.
pub struct PeerRegistry {
    peers: HashMap<SocketAddr, PeerEntry>,
    cap: usize,
}

impl PeerRegistry {
    pub fn new(cap: usize) -> Self {
        Self {
            peers: HashMap::new(),
            cap: cap.max(1),
        }
    }

    /// Returns the existing entry for `addr`, or inserts a new one if
    /// there is room. Once at capacity, a `Failed`/`Disconnected` entry
    /// belonging to some other address is evicted to make room; if
    /// every slot is occupied by a live peer, `None` is returned and the
    /// caller drops the would-be connection rather than overrunning the
    /// table.
    pub fn get_or_insert(
        &mut self,
        addr: SocketAddr,
        initial_backoff: Duration,
        max_backoff: Duration,
        max_attempts: u32,
    ) -> Option<&mut PeerEntry> {
        if self.peers.contains_key(&addr) {
            return self.peers.get_mut(&addr);
        }

        if self.peers.len() >= self.cap {
            let stale = self
                .peers
                .iter()
                .find(|(_, p)| matches!(p.state, PeerState::Failed | PeerState::Disconnected))
                .map(|(&a, _)| a);
            match stale {
                Some(stale_addr) => {
                    self.peers.remove(&stale_addr);
                }
                None => {
                    tracing::warn!(%addr, cap = self.cap, "peer registry full, rejecting new peer");
                    return None;
                }
            }
        }

        Some(
            self.peers
                .entry(addr)
                .or_insert_with(|| PeerEntry::new(addr, initial_backoff, max_backoff, max_attempts)),
        )
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&PeerEntry> {
        self.peers.get(addr)
    }

    pub fn get_mut(&mut self, addr: &SocketAddr) -> Option<&mut PeerEntry> {
        self.peers.get_mut(addr)
    }

    pub fn remove(&mut self, addr: &SocketAddr) -> Option<PeerEntry> {
        self.peers.remove(addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerEntry> {
        self.peers.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerEntry> {
        self.peers.values_mut()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn streaming_peers(&self) -> impl Iterator<Item = &PeerEntry> {
        self.peers.values().filter(|p| p.state == PeerState::Streaming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9001".parse().unwrap()
    }

    #[test]
    fn state_machine_allows_the_documented_happy_path() {
        let mut peer = PeerEntry::new(addr(), Duration::from_millis(100), Duration::from_secs(30), 10);
        assert!(peer.transition(PeerState::Connecting));
        assert!(peer.transition(PeerState::Authenticating));
        assert!(peer.transition(PeerState::Connected));
        assert!(peer.transition(PeerState::Streaming));
    }

    #[test]
    fn state_machine_rejects_illegal_jumps() {
        let mut peer = PeerEntry::new(addr(), Duration::from_millis(100), Duration::from_secs(30), 10);
        assert!(!peer.transition(PeerState::Streaming));
        assert_eq!(peer.state, PeerState::Discovered);
    }

    #[test]
    fn any_active_state_can_fail() {
        for start in [
            PeerState::Connecting,
            PeerState::Authenticating,
            PeerState::Connected,
            PeerState::Streaming,
        ] {
            let mut peer = PeerEntry::new(addr(), Duration::from_millis(1), Duration::from_secs(1), 1);
            peer.state = start;
            assert!(peer.transition(PeerState::Failed));
        }
    }

    #[test]
    fn failed_can_reconnect_or_disconnect_terminally() {
        let mut peer = PeerEntry::new(addr(), Duration::from_millis(1), Duration::from_secs(1), 1);
        peer.state = PeerState::Failed;
        assert!(peer.transition(PeerState::Connecting));
        peer.state = PeerState::Failed;
        assert!(peer.transition(PeerState::Disconnected));
    }

    #[test]
    fn reconnect_scheduler_doubles_backoff_up_to_cap() {
        let mut sched = ReconnectScheduler::new(Duration::from_millis(100), Duration::from_millis(350), 10);
        let before = Instant::now();
        let first = sched.on_failure().unwrap();
        assert!(first >= before + Duration::from_millis(100));
        let second = sched.on_failure().unwrap();
        assert!(second >= before + Duration::from_millis(300));
        let third = sched.on_failure().unwrap();
        // capped at 350ms growth, never exceeds max_backoff per step
        assert!(third - second <= Duration::from_millis(360));
    }

    #[test]
    fn reconnect_scheduler_gives_up_after_max_attempts() {
        let mut sched = ReconnectScheduler::new(Duration::from_millis(1), Duration::from_millis(2), 3);
        assert!(sched.on_failure().is_some());
        assert!(sched.on_failure().is_some());
        assert!(sched.on_failure().is_some());
        assert!(sched.on_failure().is_none());
    }

    #[test]
    fn reconnect_scheduler_matches_the_documented_ten_interval_sequence() {
        // mirrors the 100ms..30000ms sequence and the eleventh-failure
        // disconnect from the reconnect scenario this component backs.
        let mut sched = ReconnectScheduler::new(Duration::from_millis(100), Duration::from_millis(30_000), 10);
        for _ in 0..10 {
            assert!(sched.on_failure().is_some());
        }
        assert!(sched.on_failure().is_none());
    }

    #[test]
    fn reconnect_scheduler_resets_on_success() {
        let mut sched = ReconnectScheduler::new(Duration::from_millis(100), Duration::from_secs(30), 10);
        sched.on_failure();
        sched.on_failure();
        assert_eq!(sched.attempt_count(), 2);
        sched.on_success();
        assert_eq!(sched.attempt_count(), 0);
    }

    #[test]
    fn registry_get_or_insert_is_idempotent() {
        let mut registry = PeerRegistry::new(16);
        let a = addr();
        registry.get_or_insert(a, Duration::from_millis(1), Duration::from_secs(1), 1);
        registry
            .get_mut(&a)
            .unwrap()
            .transition(PeerState::Connecting);
        let entry = registry
            .get_or_insert(a, Duration::from_millis(1), Duration::from_secs(1), 1)
            .unwrap();
        assert_eq!(entry.state, PeerState::Connecting);
    }

    #[test]
    fn registry_rejects_the_peer_past_capacity() {
        let mut registry = PeerRegistry::new(2);
        assert!(registry
            .get_or_insert("127.0.0.1:1".parse().unwrap(), Duration::from_millis(1), Duration::from_secs(1), 1)
            .is_some());
        assert!(registry
            .get_or_insert("127.0.0.1:2".parse().unwrap(), Duration::from_millis(1), Duration::from_secs(1), 1)
            .is_some());
        assert!(registry
            .get_or_insert("127.0.0.1:3".parse().unwrap(), Duration::from_millis(1), Duration::from_secs(1), 1)
            .is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn registry_evicts_a_failed_peer_to_make_room_for_a_new_one() {
        let mut registry = PeerRegistry::new(1);
        let stale: SocketAddr = "127.0.0.1:1".parse().unwrap();
        registry.get_or_insert(stale, Duration::from_millis(1), Duration::from_secs(1), 1);
        registry.get_mut(&stale).unwrap().state = PeerState::Failed;

        let fresh: SocketAddr = "127.0.0.1:2".parse().unwrap();
        let entry = registry.get_or_insert(fresh, Duration::from_millis(1), Duration::from_secs(1), 1);
        assert!(entry.is_some());
        assert!(registry.get(&stale).is_none());
        assert_eq!(registry.len(), 1);
    }
}
