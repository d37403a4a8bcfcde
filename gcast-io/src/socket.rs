//! UDP socket wrapper for the gcast transport
//!
//! Provides cross-platform unicast and multicast UDP sockets with close
//! semantics suitable for threaded receivers: `close()` releases the OS
//! socket immediately and any read parked in `recv_from` observes the
//! closure within one read-timeout interval.

use parking_lot::RwLock;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use thiserror::Error;

/// How long a blocking `recv_from` waits before re-checking socket state.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Socket configuration errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: io::Error,
    },

    #[error("{0} is not a multicast address")]
    NotMulticast(Ipv4Addr),

    #[error("failed to join multicast group {group}: {source}")]
    Group {
        group: Ipv4Addr,
        source: io::Error,
    },

    #[error("socket is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid socket address")]
    InvalidAddress,
}

impl SocketError {
    /// True for the timeout/would-block results a receive loop should
    /// simply retry.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SocketError::Io(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut
        )
    }
}

/// Options applied to a multicast socket at bind time.
#[derive(Debug, Clone, Copy)]
pub struct MulticastOptions {
    /// IP TTL for outgoing multicast datagrams
    pub ttl: u32,
    /// Whether locally-sent multicast is looped back to this host
    pub loopback: bool,
    /// Interface for the group join and outgoing multicast
    /// (`0.0.0.0` lets the OS choose by route)
    pub iface: Ipv4Addr,
    /// Receive buffer size in bytes (0 leaves the OS default)
    pub recv_buffer_size: usize,
}

impl Default for MulticastOptions {
    fn default() -> Self {
        MulticastOptions {
            ttl: 8,
            loopback: true,
            iface: Ipv4Addr::UNSPECIFIED,
            recv_buffer_size: 0,
        }
    }
}

/// UDP socket owned by the gcast transport
///
/// The underlying socket lives behind a lock so `close()` can drop it
/// while receiver threads still hold references to the wrapper. Reads are
/// bounded by [`READ_TIMEOUT`], so no reader outlives a close by more
/// than one interval.
pub struct GroupSocket {
    inner: RwLock<Option<Socket>>,
    local: SocketAddr,
}

impl GroupSocket {
    /// Bind a unicast socket to the given address
    ///
    /// Port 0 requests an ephemeral port. No `SO_REUSEADDR` is set, so an
    /// occupied port is a genuine bind failure.
    pub fn bind_unicast(addr: SocketAddr, recv_buffer_size: usize) -> Result<Self, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        if recv_buffer_size > 0 {
            socket.set_recv_buffer_size(recv_buffer_size)?;
        }

        socket
            .bind(&addr.into())
            .map_err(|source| SocketError::Bind { addr, source })?;

        Self::from_socket(socket)
    }

    /// Bind a multicast socket on `port` and join `group`
    ///
    /// The socket binds the wildcard address with `SO_REUSEADDR`, as
    /// multicast binds conventionally do, then joins the group on the
    /// interface named in `opts`.
    pub fn bind_multicast(
        group: Ipv4Addr,
        port: u16,
        opts: MulticastOptions,
    ) -> Result<Self, SocketError> {
        if !group.is_multicast() {
            return Err(SocketError::NotMulticast(group));
        }

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        if opts.recv_buffer_size > 0 {
            socket.set_recv_buffer_size(opts.recv_buffer_size)?;
        }

        let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        socket.bind(&bind_addr.into()).map_err(|source| SocketError::Bind {
            addr: bind_addr,
            source,
        })?;

        socket
            .join_multicast_v4(&group, &opts.iface)
            .map_err(|source| SocketError::Group { group, source })?;
        if opts.iface != Ipv4Addr::UNSPECIFIED {
            socket.set_multicast_if_v4(&opts.iface)?;
        }
        socket.set_multicast_ttl_v4(opts.ttl)?;
        socket.set_multicast_loop_v4(opts.loopback)?;

        Self::from_socket(socket)
    }

    fn from_socket(socket: Socket) -> Result<Self, SocketError> {
        let local = socket
            .local_addr()?
            .as_socket()
            .ok_or(SocketError::InvalidAddress)?;

        Ok(GroupSocket {
            inner: RwLock::new(Some(socket)),
            local,
        })
    }

    /// The address this socket was bound to
    ///
    /// Still answers after `close()`, for diagnostics correlation.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Set the send buffer size
    pub fn set_send_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        let guard = self.inner.read();
        let socket = guard.as_ref().ok_or(SocketError::Closed)?;
        socket.set_send_buffer_size(size)?;
        Ok(())
    }

    /// Get the send buffer size
    pub fn send_buffer_size(&self) -> Result<usize, SocketError> {
        let guard = self.inner.read();
        let socket = guard.as_ref().ok_or(SocketError::Closed)?;
        Ok(socket.send_buffer_size()?)
    }

    /// Get the receive buffer size
    pub fn recv_buffer_size(&self) -> Result<usize, SocketError> {
        let guard = self.inner.read();
        let socket = guard.as_ref().ok_or(SocketError::Closed)?;
        Ok(socket.recv_buffer_size()?)
    }

    /// Send data to the given address
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        let guard = self.inner.read();
        let socket = guard.as_ref().ok_or(SocketError::Closed)?;
        Ok(socket.send_to(buf, &target.into())?)
    }

    /// Receive data from the socket
    ///
    /// Blocks for at most one read-timeout interval; a timeout surfaces
    /// as an `Io` error for which [`SocketError::is_timeout`] is true.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        let guard = self.inner.read();
        let socket = guard.as_ref().ok_or(SocketError::Closed)?;

        // socket2 recv_from takes MaybeUninit; reuse the caller's buffer.
        use std::mem::MaybeUninit;
        let uninit_buf = unsafe {
            std::slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut MaybeUninit<u8>, buf.len())
        };

        let (n, addr) = socket.recv_from(uninit_buf)?;
        Ok((n, addr.as_socket().ok_or(SocketError::InvalidAddress)?))
    }

    /// Close the socket, releasing the OS handle
    ///
    /// Idempotent. Waits for in-flight reads to drain (bounded by the
    /// read timeout), after which every reader observes `Closed`.
    pub fn close(&self) {
        let mut guard = self.inner.write();
        if guard.take().is_some() {
            tracing::debug!("closed socket bound to {}", self.local);
        }
    }

    /// Whether `close()` has run
    pub fn is_closed(&self) -> bool {
        self.inner.read().is_none()
    }
}
