//! UDP transport: one socket per process, tuned for low-latency
//! streaming (large send/receive buffers, low-delay ToS, SO_REUSEADDR).

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const SOCKET_BUFFER_BYTES: usize = 2 * 1024 * 1024;
/// DSCP value for low-delay traffic (CS5, shifted into the legacy TOS
/// byte's high 6 bits), matching the original's `IP_TOS` setting.
const IP_TOS_LOW_DELAY: u32 = 0x10;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket setup failed: {0}")]
    Setup(#[from] std::io::Error),
}

pub struct Transport {
    socket: UdpSocket,
}

impl Transport {
    pub fn bind(port: u16) -> Result<Self, TransportError> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_send_buffer_size(SOCKET_BUFFER_BYTES)?;
        socket.set_recv_buffer_size(SOCKET_BUFFER_BYTES)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;

        #[cfg(target_os = "linux")]
        {
            use std::os::unix::io::AsRawFd;
            let tos = IP_TOS_LOW_DELAY;
            unsafe {
                libc_setsockopt_ip_tos(socket.as_raw_fd(), tos);
            }
        }

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;
        Ok(Self { socket })
    }

    /// Single send; partial sends are not retried (UDP datagrams are
    /// sent atomically by the kernel or not at all).
    pub async fn send_to(&self, addr: SocketAddr, bytes: &[u8]) -> Result<usize, TransportError> {
        Ok(self.socket.send_to(bytes, addr).await?)
    }

    /// Polls with a timeout; returns `None` on timeout rather than an
    /// error, since "nothing arrived yet" is the expected common case.
    pub async fn recv(&self, timeout_ms: u64, buf: &mut [u8]) -> Result<Option<(SocketAddr, usize)>, TransportError> {
        match timeout(Duration::from_millis(timeout_ms), self.socket.recv_from(buf)).await {
            Ok(Ok((len, addr))) => Ok(Some((addr, len))),
            Ok(Err(e)) => Err(e.into()),
            Err(_elapsed) => Ok(None),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }
}

#[cfg(target_os = "linux")]
unsafe fn libc_setsockopt_ip_tos(fd: std::os::unix::io::RawFd, tos: u32) {
    const IPPROTO_IP: libc::c_int = 0;
    const IP_TOS: libc::c_int = 1;
    let value = tos as libc::c_int;
    libc::setsockopt(
        fd,
        IPPROTO_IP,
        IP_TOS,
        &value as *const _ as *const libc::c_void,
        std::mem::size_of::<libc::c_int>() as libc::socklen_t,
    );
}
