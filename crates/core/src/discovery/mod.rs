//! Three discovery tiers (mDNS, LAN broadcast, manual entry) feeding one
//! cache with an identical external contract. Each tier runs
//! independently; any tier may add to the cache.

pub mod broadcast;
pub mod cache;
pub mod history;
pub mod mdns;

pub use broadcast::{BroadcastError, BroadcastListener};
pub use cache::{CacheEntry, DiscoveryStats, DiscoveryTier, PeerCache};
pub use history::{HistoryEntry, PeerHistory};
pub use mdns::{DiscoveredService, MdnsAdvertiser, MdnsBrowser};

/// Resolves a manual `<host>:<port>` or bare hostname entry via the
/// standard library's DNS resolution (itself a thin wrapper, since an
/// IP literal and a hostname are handled identically by
/// `ToSocketAddrs`).
pub fn resolve_manual_entry(spec: &str, default_port: u16) -> std::io::Result<std::net::SocketAddr> {
    use std::net::ToSocketAddrs;

    let candidate = if spec.contains(':') {
        spec.to_string()
    } else {
        format!("{spec}:{default_port}")
    };

    candidate
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_manual_entry_accepts_ip_literal_with_port() {
        let addr = resolve_manual_entry("127.0.0.1:9001", 5555).unwrap();
        assert_eq!(addr.port(), 9001);
    }

    #[test]
    fn resolve_manual_entry_applies_default_port_when_missing() {
        let addr = resolve_manual_entry("127.0.0.1", 5555).unwrap();
        assert_eq!(addr.port(), 5555);
    }
}
