//! LAN UDP broadcast discovery: periodic beacon send plus a listener
//! that validates the magic before trusting anything else.

use std::net::SocketAddr;

use rootstream_protocol::{DiscoveryBeacon, DISCOVERY_PORT};
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct BroadcastListener {
    socket: UdpSocket,
}

impl BroadcastListener {
    /// Binds `INADDR_ANY:DISCOVERY_PORT` with `SO_REUSEADDR` and
    /// broadcast send permission.
    pub fn bind() -> Result<Self, BroadcastError> {
        Self::bind_on(DISCOVERY_PORT)
    }

    /// Same as [`Self::bind`] but on a caller-chosen port, for
    /// deployments that override the default discovery port.
    pub fn bind_on(port: u16) -> Result<Self, BroadcastError> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        let std_socket: std::net::UdpSocket = socket.into();
        Ok(Self {
            socket: UdpSocket::from_std(std_socket)?,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, BroadcastError> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn send_beacon(&self, target: SocketAddr, beacon: &DiscoveryBeacon) -> Result<(), BroadcastError> {
        self.socket.send_to(&beacon.encode(), target).await?;
        Ok(())
    }

    /// Receives one datagram and attempts to parse it as a beacon.
    /// Non-matching datagrams (foreign broadcast traffic) return `Ok(None)`
    /// rather than an error — that's the expected common case on a busy
    /// LAN, not a fault worth surfacing per-packet.
    pub async fn recv_beacon(&self) -> Result<Option<(SocketAddr, DiscoveryBeacon)>, BroadcastError> {
        let mut buf = [0u8; 512];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        match DiscoveryBeacon::decode(&buf[..len]) {
            Ok(beacon) => Ok(Some((from, beacon))),
            Err(_) => Ok(None),
        }
    }
}
