//! Transport session
//!
//! [`UdpTransport`] is the long-lived owner of the multicast/unicast
//! socket pair, the receiver pool, and the diagnostics channel. All of
//! that state lives behind a single session lock so the pool is only ever
//! replaced as a whole and lifecycle operations never interleave.

use crossbeam::channel::{self, Receiver as ChannelReceiver, Sender};
use gcast_io::{GroupSocket, SocketError};
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{ConfigError, TransportConfig};
use crate::diagnostics::DiagnosticsChannel;
use crate::receiver::{create_receivers, Datagram, Receiver, ReceiverError, ReceiverRole};

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("socket error: {0}")]
    Socket(#[from] SocketError),

    #[error(transparent)]
    Receiver(#[from] ReceiverError),

    #[error("transport is not connected")]
    NotConnected,
}

/// The multicast/unicast socket pair
///
/// Invariant: both handles are absent between a destroy and the matching
/// create, and both present outside that window. Never half-populated.
#[derive(Default)]
pub(crate) struct SocketPair {
    pub(crate) mcast: Option<Arc<GroupSocket>>,
    pub(crate) ucast: Option<Arc<GroupSocket>>,
}

impl SocketPair {
    /// Close and release both sockets; idempotent
    pub(crate) fn destroy(&mut self) {
        if let Some(sock) = self.mcast.take() {
            sock.close();
        }
        if let Some(sock) = self.ucast.take() {
            sock.close();
        }
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.mcast.is_some() && self.ucast.is_some()
    }
}

pub(crate) struct SessionState {
    pub(crate) sockets: SocketPair,
    pub(crate) mcast_receivers: Vec<Receiver>,
    pub(crate) ucast_receivers: Vec<Receiver>,
    pub(crate) diagnostics: DiagnosticsChannel,
}

/// Snapshot of transport state, served over the diagnostics channel
#[derive(Debug, Clone)]
pub struct TransportStats {
    /// Whether both sockets are currently valid
    pub sockets_valid: bool,
    /// Local multicast socket address, when valid
    pub mcast_addr: Option<SocketAddr>,
    /// Local unicast socket address, when valid
    pub ucast_addr: Option<SocketAddr>,
    /// Number of multicast receivers in the pool
    pub mcast_receivers: usize,
    /// Number of unicast receivers in the pool
    pub ucast_receivers: usize,
    /// Receivers still bound to a destroyed socket
    pub stale_receivers: usize,
    /// Whether the diagnostics responder is running
    pub diagnostics_active: bool,
}

/// The gcast UDP transport session
///
/// Created once per process and kept across reconnects. Inbound datagrams
/// are handed to the channel returned by [`UdpTransport::new`].
pub struct UdpTransport {
    // Socket creation reads whatever the configuration says at that
    // moment, so a rebind to a new address/port is just set_config()
    // followed by reconnect().
    config: RwLock<TransportConfig>,
    // One lock over the whole session: reconnect holds it for its full
    // five-step sequence, which is what serializes concurrent reconnects
    // and keeps pool replacement atomic.
    pub(crate) state: Mutex<SessionState>,
    up: Sender<Datagram>,
}

impl UdpTransport {
    /// Create an unstarted transport session
    ///
    /// Returns the session and the channel inbound datagrams arrive on.
    /// No sockets are bound until [`UdpTransport::start`].
    pub fn new(
        config: TransportConfig,
    ) -> Result<(Self, ChannelReceiver<Datagram>), TransportError> {
        config.validate()?;
        let (up, inbound) = channel::unbounded();

        let transport = UdpTransport {
            config: RwLock::new(config),
            state: Mutex::new(SessionState {
                sockets: SocketPair::default(),
                mcast_receivers: Vec::new(),
                ucast_receivers: Vec::new(),
                diagnostics: DiagnosticsChannel::new(),
            }),
            up,
        };
        Ok((transport, inbound))
    }

    /// Snapshot of the configuration the next bring-up will use
    pub fn config(&self) -> TransportConfig {
        self.config.read().clone()
    }

    /// Replace the session configuration
    ///
    /// Validated immediately; takes effect at the next `start()` or
    /// `reconnect()`. This is how the transport moves to a new bind
    /// address or port without restarting the owning process.
    pub fn set_config(&self, config: TransportConfig) -> Result<(), TransportError> {
        config.validate()?;
        *self.config.write() = config;
        Ok(())
    }

    /// Initial bring-up: sockets, receivers, threads, diagnostics
    ///
    /// No-op if the session is already running. Diagnostics failures are
    /// logged and swallowed here exactly as during a reconnect.
    pub fn start(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.sockets.is_valid() {
            return Ok(());
        }

        self.create_sockets_locked(&mut state)?;
        self.recreate_receivers_locked(&mut state)?;
        Self::start_threads_locked(&mut state)?;

        let info = self.info_locked(&state);
        let diag_config = self.config.read().diagnostics.clone();
        if let Err(e) = state.diagnostics.start(&diag_config, info) {
            tracing::warn!("diagnostics failed to start: {}", e);
        }

        tracing::info!(
            "transport started: mcast {:?}, ucast {:?}",
            state.sockets.mcast.as_ref().map(|s| s.local_addr()),
            state.sockets.ucast.as_ref().map(|s| s.local_addr()),
        );
        Ok(())
    }

    /// Full teardown: the session ends fully stopped, never half-wired
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.sockets.destroy();
        // Dropping the receivers joins their threads; the sockets are
        // already closed, so the loops exit within one read timeout.
        state.mcast_receivers.clear();
        state.ucast_receivers.clear();
        state.diagnostics.stop();
        tracing::info!("transport stopped");
    }

    /// Send a point-to-point datagram from the unicast socket
    pub fn send_unicast(&self, buf: &[u8], target: SocketAddr) -> Result<usize, TransportError> {
        let socket = {
            let state = self.state.lock();
            state.sockets.ucast.clone().ok_or(TransportError::NotConnected)?
        };
        Ok(socket.send_to(buf, target)?)
    }

    /// Send a datagram to the configured multicast group
    pub fn send_multicast(&self, buf: &[u8]) -> Result<usize, TransportError> {
        let socket = {
            let state = self.state.lock();
            state.sockets.mcast.clone().ok_or(TransportError::NotConnected)?
        };
        // Use the bound port, which differs from the configured one when
        // the config asked for an ephemeral port.
        let dest = SocketAddr::new(
            self.config.read().mcast_group.into(),
            socket.local_addr().port(),
        );
        Ok(socket.send_to(buf, dest)?)
    }

    /// Snapshot current session state
    pub fn stats(&self) -> TransportStats {
        let state = self.state.lock();
        Self::stats_locked(&state)
    }

    /// Address of the diagnostics responder, when active
    pub fn diagnostics_addr(&self) -> Option<SocketAddr> {
        self.state.lock().diagnostics.local_addr()
    }

    fn stats_locked(state: &SessionState) -> TransportStats {
        let stale = state
            .mcast_receivers
            .iter()
            .chain(state.ucast_receivers.iter())
            .filter(|r| r.is_stale())
            .count();

        TransportStats {
            sockets_valid: state.sockets.is_valid(),
            mcast_addr: state.sockets.mcast.as_ref().map(|s| s.local_addr()),
            ucast_addr: state.sockets.ucast.as_ref().map(|s| s.local_addr()),
            mcast_receivers: state.mcast_receivers.len(),
            ucast_receivers: state.ucast_receivers.len(),
            stale_receivers: stale,
            diagnostics_active: state.diagnostics.is_active(),
        }
    }

    /// Bind both sockets from the current configuration
    ///
    /// Caller must have destroyed the previous pair first. Binds into
    /// locals and installs both at once, so a failed unicast bind leaves
    /// the pair fully absent rather than half-populated.
    pub(crate) fn create_sockets_locked(
        &self,
        state: &mut SessionState,
    ) -> Result<(), SocketError> {
        debug_assert!(!state.sockets.is_valid(), "create over live sockets");

        let config = self.config.read().clone();
        let mcast = GroupSocket::bind_multicast(
            config.mcast_group,
            config.mcast_port,
            config.multicast_options(),
        )?;
        let ucast = GroupSocket::bind_unicast(config.ucast_bind_addr(), config.recv_buffer_size)?;
        if config.send_buffer_size > 0 {
            mcast.set_send_buffer_size(config.send_buffer_size)?;
            ucast.set_send_buffer_size(config.send_buffer_size)?;
        }

        tracing::info!(
            "sockets created: mcast {} (group {}), ucast {}",
            mcast.local_addr(),
            config.mcast_group,
            ucast.local_addr(),
        );
        state.sockets.mcast = Some(Arc::new(mcast));
        state.sockets.ucast = Some(Arc::new(ucast));
        Ok(())
    }

    /// Replace both receiver sequences against the current sockets
    ///
    /// Both new sequences are built before either old one is discarded;
    /// the pool is swapped as a whole, never patched.
    pub(crate) fn recreate_receivers_locked(
        &self,
        state: &mut SessionState,
    ) -> Result<(), ReceiverError> {
        let mcast_sock = state
            .sockets
            .mcast
            .clone()
            .ok_or(ReceiverError::InvalidSocket {
                role: ReceiverRole::Multicast,
            })?;
        let ucast_sock = state
            .sockets
            .ucast
            .clone()
            .ok_or(ReceiverError::InvalidSocket {
                role: ReceiverRole::Unicast,
            })?;

        let (mcast_count, ucast_count) = {
            let config = self.config.read();
            (
                config.multicast_receiver_threads,
                config.unicast_receiver_threads,
            )
        };
        let mcast = create_receivers(mcast_count, &mcast_sock, ReceiverRole::Multicast, &self.up)?;
        let ucast = create_receivers(ucast_count, &ucast_sock, ReceiverRole::Unicast, &self.up)?;

        state.mcast_receivers = mcast;
        state.ucast_receivers = ucast;
        tracing::debug!(
            "receiver pool rebuilt: {} mcast, {} ucast",
            state.mcast_receivers.len(),
            state.ucast_receivers.len(),
        );
        Ok(())
    }

    /// Start every not-yet-started receiver; idempotent
    pub(crate) fn start_threads_locked(state: &mut SessionState) -> Result<(), ReceiverError> {
        for receiver in state
            .mcast_receivers
            .iter_mut()
            .chain(state.ucast_receivers.iter_mut())
        {
            receiver.start()?;
        }
        Ok(())
    }

    /// Render the info snapshot the diagnostics responder serves
    pub(crate) fn info_locked(&self, state: &SessionState) -> String {
        let stats = Self::stats_locked(state);
        format!(
            "gcast transport\nmcast={} group={} ucast={}\nreceivers: {} mcast, {} ucast",
            stats
                .mcast_addr
                .map_or_else(|| "-".to_string(), |a| a.to_string()),
            self.config.read().mcast_group,
            stats
                .ucast_addr
                .map_or_else(|| "-".to_string(), |a| a.to_string()),
            stats.mcast_receivers,
            stats.ucast_receivers,
        )
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.stop();
    }
}
