pub mod config;
pub mod discovery_wire;
pub mod messages;
pub mod packet;

pub use config::*;
pub use discovery_wire::*;
pub use messages::*;
pub use packet::*;
