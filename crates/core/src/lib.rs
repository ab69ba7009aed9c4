pub mod discovery;
pub mod handshake;
pub mod latency;
pub mod paths;
pub mod peer;
pub mod rate_limit;
pub mod session;
pub mod time;
pub mod transport;

pub use handshake::HandshakeError;
pub use peer::{PeerEntry, PeerRegistry, PeerState, ReconnectScheduler};
pub use rate_limit::HelloRateLimiter;
pub use session::{Session, SessionError};
pub use transport::{Transport, TransportError};
