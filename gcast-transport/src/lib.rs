//! gcast transport core
//!
//! This crate implements the lifecycle state machine around the gcast
//! UDP transport: configuration, the multicast/unicast socket pair,
//! threaded datagram receivers, the diagnostics probe channel, and the
//! reconnect controller that tears all of it down and rebuilds it without
//! restarting the owning process.

pub mod config;
pub mod diagnostics;
pub mod receiver;
pub mod reconnect;
pub mod session;

pub use config::{ConfigError, DiagnosticsConfig, TransportConfig};
pub use diagnostics::{DiagnosticsChannel, DiagnosticsError};
pub use receiver::{create_receivers, Datagram, Receiver, ReceiverError, ReceiverRole};
pub use reconnect::{Reconnectable, ReconnectError, ReconnectReport};
pub use session::{TransportError, TransportStats, UdpTransport};
