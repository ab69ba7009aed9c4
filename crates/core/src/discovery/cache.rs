//! Bounded, TTL'd peer cache shared by all three discovery tiers.

use std::time::{Duration, Instant};

pub const MAX_CACHE_ENTRIES: usize = 32;
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum DiscoveryTier {
    Mdns,
    Broadcast,
    Manual,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub hostname: String,
    pub port: u16,
    pub peer_code: String,
    pub tier: DiscoveryTier,
    pub last_seen: Instant,
    pub is_online: bool,
    pub contact_count: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoveryStats {
    pub total_discoveries: u64,
    pub total_losses: u64,
    pub mdns_count: u64,
    pub broadcast_count: u64,
    pub manual_count: u64,
}

pub struct PeerCache {
    entries: Vec<CacheEntry>,
    ttl: Option<Duration>,
    cap: usize,
    pub stats: DiscoveryStats,
}

impl Default for PeerCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerCache {
    pub fn new() -> Self {
        Self::with_ttl_and_cap(DEFAULT_TTL, MAX_CACHE_ENTRIES)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self::with_ttl_and_cap(ttl, MAX_CACHE_ENTRIES)
    }

    /// Same as [`Self::with_ttl`] but with a caller-chosen capacity,
    /// for deployments that override the default cache size.
    pub fn with_ttl_and_cap(ttl: Duration, cap: usize) -> Self {
        Self {
            entries: Vec::new(),
            ttl: Some(ttl),
            cap: cap.max(1),
            stats: DiscoveryStats::default(),
        }
    }

    /// Updates an existing entry's timestamp and bumps `contact_count`
    /// if `hostname` is already present; otherwise appends. Rejects
    /// (with a `false` return and a `warn!`) once the cache is full.
    pub fn add(&mut self, hostname: &str, port: u16, peer_code: &str, tier: DiscoveryTier) -> bool {
        self.bump_tier_stat(tier);

        if let Some(existing) = self.entries.iter_mut().find(|e| e.hostname == hostname) {
            existing.last_seen = Instant::now();
            existing.is_online = true;
            existing.contact_count += 1;
            existing.port = port;
            existing.peer_code = peer_code.to_string();
            return true;
        }

        if self.entries.len() >= self.cap {
            tracing::warn!(hostname, "peer cache is full, dropping new discovery");
            return false;
        }

        self.stats.total_discoveries += 1;
        self.entries.push(CacheEntry {
            hostname: hostname.to_string(),
            port,
            peer_code: peer_code.to_string(),
            tier,
            last_seen: Instant::now(),
            is_online: true,
            contact_count: 1,
        });
        true
    }

    pub fn update_seen(&mut self, hostname: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.hostname == hostname) {
            entry.last_seen = Instant::now();
            entry.is_online = true;
        }
    }

    /// Entries older than the TTL are removed entirely; entries older
    /// than TTL/2 are marked offline but kept.
    pub fn expire(&mut self) {
        let Some(ttl) = self.ttl else { return };
        let now = Instant::now();
        let half_ttl = ttl / 2;

        let before = self.entries.len();
        self.entries.retain(|e| now.duration_since(e.last_seen) < ttl);
        self.stats.total_losses += (before - self.entries.len()) as u64;

        for entry in &mut self.entries {
            if now.duration_since(entry.last_seen) >= half_ttl {
                entry.is_online = false;
            }
        }
    }

    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn bump_tier_stat(&mut self, tier: DiscoveryTier) {
        match tier {
            DiscoveryTier::Mdns => self.stats.mdns_count += 1,
            DiscoveryTier::Broadcast => self.stats.broadcast_count += 1,
            DiscoveryTier::Manual => self.stats.manual_count += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_update_bumps_contact_count_instead_of_duplicating() {
        let mut cache = PeerCache::new();
        assert!(cache.add("desk", 9001, "code@desk", DiscoveryTier::Mdns));
        assert!(cache.add("desk", 9001, "code@desk", DiscoveryTier::Mdns));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.entries()[0].contact_count, 2);
    }

    #[test]
    fn add_rejects_once_full() {
        let mut cache = PeerCache::new();
        for i in 0..MAX_CACHE_ENTRIES {
            assert!(cache.add(&format!("host-{i}"), 9001, "code", DiscoveryTier::Broadcast));
        }
        assert!(!cache.add("one-too-many", 9001, "code", DiscoveryTier::Broadcast));
        assert_eq!(cache.len(), MAX_CACHE_ENTRIES);
    }

    #[test]
    fn expire_removes_entries_past_ttl() {
        let mut cache = PeerCache::with_ttl(Duration::from_millis(10));
        cache.add("stale", 9001, "code", DiscoveryTier::Manual);
        std::thread::sleep(Duration::from_millis(30));
        cache.expire();
        assert!(cache.is_empty());
        assert_eq!(cache.stats.total_losses, 1);
    }

    #[test]
    fn expire_marks_half_ttl_entries_offline_but_keeps_them() {
        let mut cache = PeerCache::with_ttl(Duration::from_millis(20));
        cache.add("aging", 9001, "code", DiscoveryTier::Manual);
        std::thread::sleep(Duration::from_millis(15));
        cache.expire();
        assert_eq!(cache.len(), 1);
        assert!(!cache.entries()[0].is_online);
    }

    #[test]
    fn update_seen_marks_entry_online_again() {
        let mut cache = PeerCache::new();
        cache.add("host", 9001, "code", DiscoveryTier::Mdns);
        cache.entries[0].is_online = false;
        cache.update_seen("host");
        assert!(cache.entries()[0].is_online);
    }

    #[test]
    fn with_ttl_and_cap_honors_a_caller_chosen_capacity() {
        let mut cache = PeerCache::with_ttl_and_cap(DEFAULT_TTL, 2);
        assert!(cache.add("a", 1, "c", DiscoveryTier::Mdns));
        assert!(cache.add("b", 1, "c", DiscoveryTier::Mdns));
        assert!(!cache.add("c", 1, "c", DiscoveryTier::Mdns));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn stats_track_per_tier_counts() {
        let mut cache = PeerCache::new();
        cache.add("a", 1, "c", DiscoveryTier::Mdns);
        cache.add("b", 1, "c", DiscoveryTier::Broadcast);
        cache.add("c", 1, "c", DiscoveryTier::Manual);
        assert_eq!(cache.stats.mdns_count, 1);
        assert_eq!(cache.stats.broadcast_count, 1);
        assert_eq!(cache.stats.manual_count, 1);
        assert_eq!(cache.stats.total_discoveries, 3);
    }
}
