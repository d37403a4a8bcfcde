//! gcast - group-communication UDP transport
//!
//! High-level API for the gcast transport: a multicast/unicast datagram
//! transport whose network resources can be fully torn down and rebuilt
//! in place via `reconnect()`.

pub use gcast_io as io;
pub use gcast_transport as transport;

// Re-export commonly used types
pub use transport::{
    Datagram, Reconnectable, ReconnectError, ReconnectReport, ReceiverRole, TransportConfig,
    TransportStats, UdpTransport,
};
