//! gcast I/O layer
//!
//! This crate provides the UDP socket abstraction used by the gcast
//! transport: unicast and multicast bind paths, and close semantics that
//! unblock in-flight reads so receiver threads can be torn down.

pub mod socket;

pub use socket::{GroupSocket, MulticastOptions, SocketError};
