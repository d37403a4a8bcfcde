//! Datagram receivers
//!
//! A [`Receiver`] is one execution unit bound to exactly one socket and
//! one role. Receivers are created unstarted so a whole pool can be built
//! and installed before any thread runs, then started together.

use bytes::Bytes;
use crossbeam::channel::Sender;
use gcast_io::{GroupSocket, SocketError};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

/// Largest datagram a receiver will accept
const MAX_DATAGRAM_SIZE: usize = 65535;

/// Receiver errors
#[derive(Error, Debug)]
pub enum ReceiverError {
    #[error("{role} socket is not valid; sockets must be created before receivers")]
    InvalidSocket { role: ReceiverRole },

    #[error("failed to spawn {role} receiver thread: {source}")]
    Spawn {
        role: ReceiverRole,
        source: io::Error,
    },
}

/// Which socket a receiver consumes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverRole {
    /// Group-addressed datagrams
    Multicast,
    /// Point-to-point datagrams
    Unicast,
}

impl ReceiverRole {
    /// Stable label used for thread naming and diagnostics correlation
    pub fn label(&self) -> &'static str {
        match self {
            ReceiverRole::Multicast => "mcast",
            ReceiverRole::Unicast => "ucast",
        }
    }
}

impl fmt::Display for ReceiverRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An inbound datagram, tagged with the role of the socket it arrived on
#[derive(Debug, Clone)]
pub struct Datagram {
    /// Role of the receiving socket
    pub role: ReceiverRole,
    /// Sender address
    pub from: SocketAddr,
    /// Payload bytes
    pub payload: Bytes,
}

/// A single receiver execution unit
///
/// Bound at creation to one socket and one role; `start()` spawns the
/// read loop on a named thread. Dropping a receiver signals the loop and
/// joins the thread.
pub struct Receiver {
    role: ReceiverRole,
    index: usize,
    socket: Arc<GroupSocket>,
    up: Sender<Datagram>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Receiver {
    fn new(role: ReceiverRole, index: usize, socket: Arc<GroupSocket>, up: Sender<Datagram>) -> Self {
        Receiver {
            role,
            index,
            socket,
            up,
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Start the read loop; idempotent once running
    pub fn start(&mut self) -> Result<(), ReceiverError> {
        if self.handle.is_some() {
            return Ok(());
        }

        let role = self.role;
        let socket = Arc::clone(&self.socket);
        let up = self.up.clone();
        let stop = Arc::clone(&self.stop);

        let handle = std::thread::Builder::new()
            .name(format!("{}-receiver-{}", role.label(), self.index))
            .spawn(move || read_loop(role, socket, up, stop))
            .map_err(|source| ReceiverError::Spawn { role, source })?;

        self.handle = Some(handle);
        Ok(())
    }

    /// Role this receiver was created with
    pub fn role(&self) -> ReceiverRole {
        self.role
    }

    /// Address of the socket this receiver is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    /// True once the read loop thread has been spawned and has not exited
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// True if the bound socket has been destroyed
    pub fn is_stale(&self) -> bool {
        self.socket.is_closed()
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_loop(
    role: ReceiverRole,
    socket: Arc<GroupSocket>,
    up: Sender<Datagram>,
    stop: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    while !stop.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                let datagram = Datagram {
                    role,
                    from,
                    payload: Bytes::copy_from_slice(&buf[..n]),
                };
                if up.send(datagram).is_err() {
                    // Nobody is consuming anymore; the transport is gone.
                    break;
                }
            }
            Err(SocketError::Closed) => break,
            Err(e) if e.is_timeout() => continue,
            Err(e) => {
                tracing::warn!("{} receiver error: {}", role, e);
            }
        }
    }

    tracing::debug!("{} receiver exiting", role);
}

/// Build an ordered sequence of exactly `count` receivers over `socket`
///
/// `count` of 0 yields an empty, valid pool. Fails if the socket has
/// already been destroyed: receivers must never bind to a dead socket.
pub fn create_receivers(
    count: usize,
    socket: &Arc<GroupSocket>,
    role: ReceiverRole,
    up: &Sender<Datagram>,
) -> Result<Vec<Receiver>, ReceiverError> {
    if socket.is_closed() {
        return Err(ReceiverError::InvalidSocket { role });
    }

    Ok((0..count)
        .map(|index| Receiver::new(role, index, Arc::clone(socket), up.clone()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use std::time::Duration;

    fn loopback_socket() -> Arc<GroupSocket> {
        Arc::new(GroupSocket::bind_unicast("127.0.0.1:0".parse().unwrap(), 0).unwrap())
    }

    #[test]
    fn test_create_receivers_counts() {
        let socket = loopback_socket();
        let (tx, _rx) = channel::unbounded();

        let receivers = create_receivers(3, &socket, ReceiverRole::Unicast, &tx).unwrap();
        assert_eq!(receivers.len(), 3);
        assert!(receivers.iter().all(|r| !r.is_running()));

        let empty = create_receivers(0, &socket, ReceiverRole::Unicast, &tx).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_create_receivers_rejects_closed_socket() {
        let socket = loopback_socket();
        socket.close();
        let (tx, _rx) = channel::unbounded();

        let result = create_receivers(1, &socket, ReceiverRole::Multicast, &tx);
        assert!(matches!(
            result,
            Err(ReceiverError::InvalidSocket {
                role: ReceiverRole::Multicast
            })
        ));
    }

    #[test]
    fn test_receiver_delivers_tagged_datagrams() {
        let socket = loopback_socket();
        let (tx, rx) = channel::unbounded();

        let mut receivers = create_receivers(1, &socket, ReceiverRole::Unicast, &tx).unwrap();
        receivers[0].start().unwrap();
        assert!(receivers[0].is_running());

        let sender = loopback_socket();
        sender.send_to(b"ping", socket.local_addr()).unwrap();

        let datagram = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(datagram.role, ReceiverRole::Unicast);
        assert_eq!(&datagram.payload[..], b"ping");
    }

    #[test]
    fn test_receiver_exits_when_socket_closes() {
        let socket = loopback_socket();
        let (tx, _rx) = channel::unbounded();

        let mut receivers = create_receivers(2, &socket, ReceiverRole::Unicast, &tx).unwrap();
        for r in receivers.iter_mut() {
            r.start().unwrap();
        }

        socket.close();
        for r in &receivers {
            assert!(r.is_stale());
        }

        // Loops notice the closed socket within one read timeout.
        for _ in 0..50 {
            if receivers.iter().all(|r| !r.is_running()) {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("receivers did not exit after socket close");
    }

    #[test]
    fn test_drop_joins_running_receiver() {
        let socket = loopback_socket();
        let (tx, _rx) = channel::unbounded();

        let mut receivers = create_receivers(1, &socket, ReceiverRole::Unicast, &tx).unwrap();
        receivers[0].start().unwrap();

        // Socket still open; drop must stop the loop via the stop flag.
        drop(receivers);
        assert!(!socket.is_closed());
    }
}
