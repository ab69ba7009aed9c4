//! LAN UDP broadcast discovery wire layout and mDNS TXT-record keys.
//!
//! The broadcast beacon is a fixed-layout record, NUL-padded where the
//! original used fixed C buffers, so a listener can validate the magic
//! before trusting anything else in the datagram.

use thiserror::Error;

/// ASCII, NUL-padded to 20 bytes.
pub const DISCOVERY_MAGIC: &[u8; 20] = b"ROOTSTREAM_DISCOVER\0";
pub const DISCOVERY_PORT: u16 = 5555;
pub const DISCOVERY_PROTOCOL_VERSION: u32 = 1;

const HOSTNAME_LEN: usize = 256;
const PEER_CODE_LEN: usize = 128;
const BEACON_LEN: usize = 20 + 4 + HOSTNAME_LEN + 2 + PEER_CODE_LEN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscoveryWireError {
    #[error("buffer too short: {0} bytes, need {BEACON_LEN}")]
    TooShort(usize),
    #[error("bad discovery magic")]
    BadMagic,
    #[error("hostname is not valid UTF-8")]
    BadHostname,
    #[error("peer code is not valid UTF-8")]
    BadPeerCode,
}

/// mDNS service type advertised and browsed for.
pub const MDNS_SERVICE_TYPE: &str = "_rootstream._udp.local.";

pub const MDNS_TXT_VERSION: &str = "version";
pub const MDNS_TXT_CODE: &str = "code";
pub const MDNS_TXT_CAPABILITY: &str = "capability";
pub const MDNS_TXT_MAX_PEERS: &str = "max_peers";
pub const MDNS_TXT_BANDWIDTH: &str = "bandwidth";

pub const MDNS_CAPABILITY_HOST: &str = "host";
pub const MDNS_CAPABILITY_CLIENT: &str = "client";

/// One LAN broadcast beacon, as sent periodically by a host and heard
/// by any client listening on [`DISCOVERY_PORT`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryBeacon {
    pub protocol_version: u32,
    pub hostname: String,
    pub listen_port: u16,
    pub peer_code: String,
}

impl DiscoveryBeacon {
    pub fn encode(&self) -> [u8; BEACON_LEN] {
        let mut buf = [0u8; BEACON_LEN];
        let mut off = 0;
        buf[off..off + 20].copy_from_slice(DISCOVERY_MAGIC);
        off += 20;
        buf[off..off + 4].copy_from_slice(&self.protocol_version.to_le_bytes());
        off += 4;
        write_padded(&mut buf[off..off + HOSTNAME_LEN], self.hostname.as_bytes());
        off += HOSTNAME_LEN;
        buf[off..off + 2].copy_from_slice(&self.listen_port.to_le_bytes());
        off += 2;
        write_padded(&mut buf[off..off + PEER_CODE_LEN], self.peer_code.as_bytes());
        buf
    }

    /// Validates the magic before touching anything else; non-matching
    /// datagrams (foreign broadcast traffic sharing the port) are the
    /// normal case on a busy LAN, not an error worth logging loudly.
    pub fn decode(buf: &[u8]) -> Result<Self, DiscoveryWireError> {
        if buf.len() < BEACON_LEN {
            return Err(DiscoveryWireError::TooShort(buf.len()));
        }
        if &buf[0..20] != DISCOVERY_MAGIC {
            return Err(DiscoveryWireError::BadMagic);
        }
        let mut off = 20;
        let protocol_version = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let hostname = read_padded(&buf[off..off + HOSTNAME_LEN])
            .map_err(|_| DiscoveryWireError::BadHostname)?;
        off += HOSTNAME_LEN;
        let listen_port = u16::from_le_bytes(buf[off..off + 2].try_into().unwrap());
        off += 2;
        let peer_code = read_padded(&buf[off..off + PEER_CODE_LEN])
            .map_err(|_| DiscoveryWireError::BadPeerCode)?;

        Ok(Self {
            protocol_version,
            hostname,
            listen_port,
            peer_code,
        })
    }
}

fn write_padded(out: &mut [u8], data: &[u8]) {
    let n = data.len().min(out.len() - 1);
    out[..n].copy_from_slice(&data[..n]);
    // remaining bytes, including at least one, stay zero.
}

fn read_padded(buf: &[u8]) -> Result<String, std::str::Utf8Error> {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    std::str::from_utf8(&buf[..end]).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DiscoveryBeacon {
        DiscoveryBeacon {
            protocol_version: DISCOVERY_PROTOCOL_VERSION,
            hostname: "desk-lounge".to_string(),
            listen_port: 9001,
            peer_code: "WREN-4821".to_string(),
        }
    }

    #[test]
    fn beacon_roundtrips() {
        let beacon = sample();
        let encoded = beacon.encode();
        assert_eq!(DiscoveryBeacon::decode(&encoded).unwrap(), beacon);
    }

    #[test]
    fn beacon_has_fixed_length() {
        assert_eq!(sample().encode().len(), BEACON_LEN);
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut encoded = sample().encode();
        encoded[0] = b'X';
        assert_eq!(DiscoveryBeacon::decode(&encoded), Err(DiscoveryWireError::BadMagic));
    }

    #[test]
    fn decode_ignores_foreign_short_datagrams_gracefully() {
        for len in 0..BEACON_LEN {
            let buf = vec![0x41u8; len];
            assert_eq!(DiscoveryBeacon::decode(&buf), Err(DiscoveryWireError::TooShort(len)));
        }
    }

    #[test]
    fn hostname_and_peer_code_overlong_values_are_truncated_not_panicking() {
        let beacon = DiscoveryBeacon {
            protocol_version: 1,
            hostname: "x".repeat(HOSTNAME_LEN + 50),
            listen_port: 1,
            peer_code: "y".repeat(PEER_CODE_LEN + 50),
        };
        let encoded = beacon.encode();
        let decoded = DiscoveryBeacon::decode(&encoded).unwrap();
        assert_eq!(decoded.hostname.len(), HOSTNAME_LEN - 1);
        assert_eq!(decoded.peer_code.len(), PEER_CODE_LEN - 1);
    }

    #[test]
    fn mdns_service_type_is_udp() {
        assert!(MDNS_SERVICE_TYPE.ends_with("._udp.local."));
    }
}
