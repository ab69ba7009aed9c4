//! Per-source-address HELLO rate limiting, independent of the per-peer
//! AuthFailed escalation in [`crate::session`]. Grounded in
//! `attack_prevention.c`'s sliding-window limiter: addresses with no
//! peer-table entry yet still need a ceiling on unauthenticated
//! handshake attempts.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

pub struct HelloRateLimiter {
    max_per_window: u32,
    attempts: HashMap<SocketAddr, Vec<Instant>>,
}

impl HelloRateLimiter {
    pub fn new(max_per_window: u32) -> Self {
        Self {
            max_per_window,
            attempts: HashMap::new(),
        }
    }

    /// Records one HELLO attempt from `addr` and returns whether it
    /// should be accepted. Expired timestamps are pruned first so the
    /// window never grows unbounded for a quiet address that later
    /// bursts.
    pub fn allow(&mut self, addr: SocketAddr) -> bool {
        self.allow_at(addr, Instant::now())
    }

    fn allow_at(&mut self, addr: SocketAddr, now: Instant) -> bool {
        let history = self.attempts.entry(addr).or_default();
        history.retain(|&t| now.duration_since(t) < WINDOW);

        if history.len() as u32 >= self.max_per_window {
            return false;
        }

        history.push(now);
        true
    }

    /// Drops tracking state for addresses with no attempts inside the
    /// window, to bound memory for a long-running host.
    pub fn sweep(&mut self) {
        let now = Instant::now();
        self.attempts
            .retain(|_, history| history.iter().any(|&t| now.duration_since(t) < WINDOW));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn allows_up_to_the_configured_ceiling() {
        let mut limiter = HelloRateLimiter::new(3);
        let a = addr(1);
        assert!(limiter.allow(a));
        assert!(limiter.allow(a));
        assert!(limiter.allow(a));
        assert!(!limiter.allow(a));
    }

    #[test]
    fn tracks_addresses_independently() {
        let mut limiter = HelloRateLimiter::new(1);
        assert!(limiter.allow(addr(1)));
        assert!(limiter.allow(addr(2)));
        assert!(!limiter.allow(addr(1)));
    }

    #[test]
    fn old_attempts_fall_out_of_the_window() {
        let mut limiter = HelloRateLimiter::new(1);
        let a = addr(1);
        let t0 = Instant::now();
        assert!(limiter.allow_at(a, t0));
        assert!(!limiter.allow_at(a, t0 + Duration::from_secs(10)));
        assert!(limiter.allow_at(a, t0 + Duration::from_secs(61)));
    }

    #[test]
    fn sweep_drops_stale_entries() {
        let mut limiter = HelloRateLimiter::new(1);
        let a = addr(1);
        let t0 = Instant::now();
        limiter.allow_at(a, t0);
        assert_eq!(limiter.attempts.len(), 1);
        // sweep() uses Instant::now() internally, so this only exercises
        // that it does not panic and is a no-op for a fresh entry.
        limiter.sweep();
        assert_eq!(limiter.attempts.len(), 1);
    }
}
