//! TOML configuration schema, loaded from the directory chain documented
//! in `core::paths` (XDG_CONFIG_HOME, then ~/.config, then a /tmp
//! fallback with a warning).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RootstreamConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub latency: LatencyConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

impl Default for RootstreamConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            identity: IdentityConfig::default(),
            latency: LatencyConfig::default(),
            session: SessionConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

fn default_listen_port() -> u16 {
    9876
}
fn default_bitrate_kbps() -> u32 {
    20_000
}
fn default_max_packet_size() -> usize {
    1400
}
fn default_max_peers() -> usize {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_bitrate_kbps")]
    pub bitrate_kbps: u32,
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
    /// Fixed capacity of the peer table; the same number is advertised
    /// as the mDNS TXT `max_peers` field.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            bitrate_kbps: default_bitrate_kbps(),
            max_packet_size: default_max_packet_size(),
            max_peers: default_max_peers(),
        }
    }
}

fn default_key_path() -> String {
    "identity.key".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityConfig {
    /// Relative to the resolved config directory unless absolute.
    #[serde(default = "default_key_path")]
    pub key_path: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            key_path: default_key_path(),
        }
    }
}

fn default_sample_window() -> usize {
    256
}
fn default_report_interval_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LatencyConfig {
    #[serde(default = "default_sample_window")]
    pub sample_window: usize,
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            sample_window: default_sample_window(),
            report_interval_secs: default_report_interval_secs(),
        }
    }
}

fn default_initial_backoff_ms() -> u64 {
    100
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_idle_timeout_secs() -> u64 {
    30
}
fn default_handshake_timeout_secs() -> u64 {
    3
}
fn default_ping_interval_secs() -> u64 {
    1
}
fn default_ping_miss_threshold() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Eviction threshold for a peer that answers liveness PINGs but
    /// has sent no other traffic (HELLO/INPUT/CONTROL/PING) in this
    /// long, independent of the PING-miss check.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_ping_miss_threshold")]
    pub ping_miss_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            idle_timeout_secs: default_idle_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            ping_interval_secs: default_ping_interval_secs(),
            ping_miss_threshold: default_ping_miss_threshold(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_broadcast_interval_secs() -> u64 {
    2
}
fn default_broadcast_port() -> u16 {
    5555
}
fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_cache_cap() -> usize {
    32
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    #[serde(default = "default_true")]
    pub enable_mdns: bool,
    #[serde(default = "default_true")]
    pub enable_broadcast: bool,
    #[serde(default = "default_broadcast_interval_secs")]
    pub broadcast_interval_secs: u64,
    /// UDP port the LAN broadcast beacon is sent to and listened on.
    #[serde(default = "default_broadcast_port")]
    pub broadcast_port: u16,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_cap")]
    pub cache_cap: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enable_mdns: default_true(),
            enable_broadcast: default_true(),
            broadcast_interval_secs: default_broadcast_interval_secs(),
            broadcast_port: default_broadcast_port(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_cap: default_cache_cap(),
        }
    }
}

impl RootstreamConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Collects every problem rather than bailing on the first one, so a
    /// user fixing a config file sees the whole list in one pass.
    /// `"ERROR: ..."` entries mean the config cannot be used as-is;
    /// `"WARNING: ..."` entries are informational.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.network.listen_port == 0 {
            problems.push("ERROR: network.listen_port must not be 0".to_string());
        }
        if self.network.bitrate_kbps == 0 {
            problems.push("ERROR: network.bitrate_kbps must not be 0".to_string());
        }
        if self.network.bitrate_kbps > 200_000 {
            problems.push(format!(
                "WARNING: network.bitrate_kbps of {} is unusually high for most links",
                self.network.bitrate_kbps
            ));
        }
        if self.network.max_packet_size < 512 {
            problems.push(
                "ERROR: network.max_packet_size is too small to carry a packet header and payload"
                    .to_string(),
            );
        }
        if self.network.max_packet_size > 65507 {
            problems
                .push("ERROR: network.max_packet_size exceeds the maximum UDP payload size".to_string());
        }
        if self.network.max_peers == 0 {
            problems.push("ERROR: network.max_peers must not be 0".to_string());
        }

        if self.identity.key_path.trim().is_empty() {
            problems.push("ERROR: identity.key_path must not be empty".to_string());
        }

        if self.latency.sample_window == 0 {
            problems.push("ERROR: latency.sample_window must not be 0".to_string());
        }
        if self.latency.report_interval_secs == 0 {
            problems.push(
                "WARNING: latency.report_interval_secs of 0 disables periodic reporting".to_string(),
            );
        }

        if self.session.initial_backoff_ms == 0 {
            problems.push("ERROR: session.initial_backoff_ms must not be 0".to_string());
        }
        if self.session.max_backoff_ms < self.session.initial_backoff_ms {
            problems.push(
                "ERROR: session.max_backoff_ms must be >= session.initial_backoff_ms".to_string(),
            );
        }
        if self.session.max_reconnect_attempts == 0 {
            problems.push(
                "WARNING: session.max_reconnect_attempts of 0 disables reconnection entirely"
                    .to_string(),
            );
        }
        if self.session.idle_timeout_secs == 0 {
            problems.push("ERROR: session.idle_timeout_secs must not be 0".to_string());
        }
        if self.session.handshake_timeout_secs == 0 {
            problems.push("ERROR: session.handshake_timeout_secs must not be 0".to_string());
        }
        if self.session.ping_interval_secs == 0 {
            problems.push("ERROR: session.ping_interval_secs must not be 0".to_string());
        }
        if self.session.ping_miss_threshold == 0 {
            problems.push(
                "WARNING: session.ping_miss_threshold of 0 fails a peer on its very first missed PING"
                    .to_string(),
            );
        }

        if !self.discovery.enable_mdns && !self.discovery.enable_broadcast {
            problems.push(
                "WARNING: both discovery.enable_mdns and discovery.enable_broadcast are false; peers must be entered manually"
                    .to_string(),
            );
        }
        if self.discovery.broadcast_interval_secs == 0 {
            problems.push("ERROR: discovery.broadcast_interval_secs must not be 0".to_string());
        }
        if self.discovery.broadcast_port == 0 {
            problems.push("ERROR: discovery.broadcast_port must not be 0".to_string());
        }
        if self.discovery.cache_ttl_secs == 0 {
            problems.push("ERROR: discovery.cache_ttl_secs must not be 0".to_string());
        }
        if self.discovery.cache_cap == 0 {
            problems.push("ERROR: discovery.cache_cap must not be 0".to_string());
        }

        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_from_empty_string() {
        let cfg = RootstreamConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, RootstreamConfig::default());
        assert_eq!(cfg.network.listen_port, 9876);
        assert_eq!(cfg.network.bitrate_kbps, 20_000);
        assert_eq!(cfg.network.max_packet_size, 1400);
        assert_eq!(cfg.network.max_peers, 16);
        assert_eq!(cfg.identity.key_path, "identity.key");
        assert_eq!(cfg.latency.sample_window, 256);
        assert_eq!(cfg.latency.report_interval_secs, 5);
        assert_eq!(cfg.session.initial_backoff_ms, 100);
        assert_eq!(cfg.session.max_backoff_ms, 30_000);
        assert_eq!(cfg.session.max_reconnect_attempts, 10);
        assert_eq!(cfg.session.idle_timeout_secs, 30);
        assert_eq!(cfg.session.handshake_timeout_secs, 3);
        assert_eq!(cfg.session.ping_interval_secs, 1);
        assert_eq!(cfg.session.ping_miss_threshold, 3);
        assert!(cfg.discovery.enable_mdns);
        assert!(cfg.discovery.enable_broadcast);
        assert_eq!(cfg.discovery.broadcast_interval_secs, 2);
        assert_eq!(cfg.discovery.broadcast_port, 5555);
        assert_eq!(cfg.discovery.cache_ttl_secs, 3600);
        assert_eq!(cfg.discovery.cache_cap, 32);
    }

    #[test]
    fn default_config_has_no_validation_problems() {
        assert!(RootstreamConfig::default().validate().is_empty());
    }

    #[test]
    fn partial_override_keeps_remaining_defaults() {
        let cfg = RootstreamConfig::from_toml_str(
            r#"
            [network]
            listen_port = 12345
            "#,
        )
        .unwrap();
        assert_eq!(cfg.network.listen_port, 12345);
        assert_eq!(cfg.network.bitrate_kbps, 20_000);
    }

    #[test]
    fn zero_listen_port_is_an_error() {
        let mut cfg = RootstreamConfig::default();
        cfg.network.listen_port = 0;
        assert!(cfg
            .validate()
            .iter()
            .any(|p| p.starts_with("ERROR") && p.contains("listen_port")));
    }

    #[test]
    fn high_bitrate_is_a_warning_not_an_error() {
        let mut cfg = RootstreamConfig::default();
        cfg.network.bitrate_kbps = 300_000;
        let problems = cfg.validate();
        assert!(problems.iter().any(|p| p.starts_with("WARNING") && p.contains("bitrate")));
        assert!(!problems.iter().any(|p| p.starts_with("ERROR") && p.contains("bitrate")));
    }

    #[test]
    fn max_backoff_below_initial_is_an_error() {
        let mut cfg = RootstreamConfig::default();
        cfg.session.max_backoff_ms = 10;
        cfg.session.initial_backoff_ms = 100;
        assert!(cfg.validate().iter().any(|p| p.contains("max_backoff_ms")));
    }

    #[test]
    fn disabling_both_discovery_mechanisms_warns() {
        let mut cfg = RootstreamConfig::default();
        cfg.discovery.enable_mdns = false;
        cfg.discovery.enable_broadcast = false;
        assert!(cfg
            .validate()
            .iter()
            .any(|p| p.starts_with("WARNING") && p.contains("manually")));
    }

    #[test]
    fn zero_max_peers_is_an_error() {
        let mut cfg = RootstreamConfig::default();
        cfg.network.max_peers = 0;
        assert!(cfg.validate().iter().any(|p| p.starts_with("ERROR") && p.contains("max_peers")));
    }

    #[test]
    fn zero_ping_miss_threshold_is_a_warning_not_an_error() {
        let mut cfg = RootstreamConfig::default();
        cfg.session.ping_miss_threshold = 0;
        let problems = cfg.validate();
        assert!(problems.iter().any(|p| p.starts_with("WARNING") && p.contains("ping_miss_threshold")));
    }

    #[test]
    fn zero_cache_cap_or_broadcast_port_is_an_error() {
        let mut cfg = RootstreamConfig::default();
        cfg.discovery.cache_cap = 0;
        cfg.discovery.broadcast_port = 0;
        let problems = cfg.validate();
        assert!(problems.iter().any(|p| p.contains("cache_cap")));
        assert!(problems.iter().any(|p| p.contains("broadcast_port")));
    }

    #[test]
    fn validate_collects_multiple_problems_at_once() {
        let mut cfg = RootstreamConfig::default();
        cfg.network.listen_port = 0;
        cfg.session.idle_timeout_secs = 0;
        let problems = cfg.validate();
        assert!(problems.len() >= 2);
    }
}
