//! Reconnect controller
//!
//! Tears down and rebuilds the transport's network resources in five
//! strictly ordered steps: destroy sockets, create sockets, rebuild the
//! receiver pool, start threads, cycle diagnostics. Runs under the
//! session lock for its whole duration, so at most one reconnect is ever
//! in flight per session.

use gcast_io::SocketError;
use thiserror::Error;

use crate::diagnostics::DiagnosticsError;
use crate::receiver::ReceiverError;
use crate::session::UdpTransport;

/// Failure of one of the fatal reconnect steps
///
/// Any of these aborts the remaining steps with no rollback; the session
/// is left non-operational and a repeated `reconnect()` is the recovery
/// path (socket destruction is idempotent).
#[derive(Error, Debug)]
pub enum ReconnectError {
    #[error("socket creation failed: {0}")]
    Create(#[from] SocketError),

    #[error(transparent)]
    Receivers(#[from] ReceiverError),
}

/// Outcome of a successful reconnect
///
/// Diagnostics is best-effort: its failure is carried here instead of
/// failing the call, so callers can alert on it separately.
#[derive(Debug)]
pub struct ReconnectReport {
    /// Result of the diagnostics stop/start cycle
    pub diagnostics: Result<(), DiagnosticsError>,
}

impl ReconnectReport {
    /// True when the diagnostics channel also came back up
    pub fn diagnostics_ok(&self) -> bool {
        self.diagnostics.is_ok()
    }
}

/// Capability to rebuild network resources in place
pub trait Reconnectable {
    /// Full teardown and rebuild of sockets, receivers and diagnostics
    fn reconnect(&self) -> Result<ReconnectReport, ReconnectError>;

    /// Replace both receiver sequences against the current sockets
    ///
    /// Ordinary use is via [`Reconnectable::reconnect`]; callers that
    /// have re-created sockets out-of-band can invoke this directly.
    fn recreate_receivers(&self) -> Result<(), ReconnectError>;
}

impl Reconnectable for UdpTransport {
    fn reconnect(&self) -> Result<ReconnectReport, ReconnectError> {
        // Held for all five steps: concurrent reconnects serialize here.
        let mut state = self.state.lock();

        tracing::info!("reconnecting transport");

        // 1. Destroy: close both sockets, which also unblocks every
        //    receiver parked in a read. Idempotent on an already-down pair.
        state.sockets.destroy();

        // 2. Create: bind a fresh pair from current configuration.
        self.create_sockets_locked(&mut state)?;

        // 3. Rebind: replace the whole receiver pool against the new
        //    sockets. Must precede step 4, otherwise starting threads has
        //    nothing new to run.
        self.recreate_receivers_locked(&mut state)?;

        // 4. Start: the new receivers begin consuming datagrams.
        Self::start_threads_locked(&mut state)?;

        // 5. Diagnostics cycle, always last. Never fails the reconnect;
        //    the result travels in the report instead.
        state.diagnostics.stop();
        let info = self.info_locked(&state);
        let diagnostics = state.diagnostics.start(&self.config().diagnostics, info);
        match &diagnostics {
            Ok(()) => tracing::info!("transport reconnected"),
            Err(e) => tracing::warn!("transport reconnected, diagnostics failed: {}", e),
        }

        Ok(ReconnectReport { diagnostics })
    }

    fn recreate_receivers(&self) -> Result<(), ReconnectError> {
        let mut state = self.state.lock();
        self.recreate_receivers_locked(&mut state)?;
        // The fresh receivers are created unstarted and replace running
        // ones; start them here or the rebuilt pool never consumes.
        UdpTransport::start_threads_locked(&mut state)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiagnosticsConfig, TransportConfig};
    use crate::receiver::ReceiverRole;

    fn test_config() -> TransportConfig {
        TransportConfig {
            bind_addr: "127.0.0.1".parse().unwrap(),
            mcast_group: "239.255.7.8".parse().unwrap(),
            mcast_port: 0,
            ucast_port: 0,
            mcast_iface: "127.0.0.1".parse().unwrap(),
            multicast_receiver_threads: 1,
            unicast_receiver_threads: 1,
            diagnostics: DiagnosticsConfig {
                enabled: true,
                bind_addr: "127.0.0.1".parse().unwrap(),
                port: 0,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_reconnect_from_cold_session() {
        // Step 1 on a never-started session is the idempotent-destroy case.
        let (transport, _inbound) = UdpTransport::new(test_config()).unwrap();
        let report = transport.reconnect().unwrap();
        assert!(report.diagnostics_ok());

        let stats = transport.stats();
        assert!(stats.sockets_valid);
        assert_eq!(stats.stale_receivers, 0);
    }

    #[test]
    fn test_recreate_receivers_requires_sockets() {
        let (transport, _inbound) = UdpTransport::new(test_config()).unwrap();
        let result = transport.recreate_receivers();
        assert!(matches!(
            result,
            Err(ReconnectError::Receivers(ReceiverError::InvalidSocket {
                role: ReceiverRole::Multicast
            }))
        ));
    }

    #[test]
    fn test_recreate_receivers_standalone_delivers() {
        // The advanced-caller path: sockets already valid, pool rebuilt
        // and its receivers started in place.
        let (transport, inbound) = UdpTransport::new(test_config()).unwrap();
        transport.start().unwrap();

        transport.recreate_receivers().unwrap();
        let stats = transport.stats();
        assert_eq!(stats.mcast_receivers, 1);
        assert_eq!(stats.ucast_receivers, 1);
        assert_eq!(stats.stale_receivers, 0);

        // The rebuilt pool must actually consume datagrams.
        let ucast_addr = stats.ucast_addr.unwrap();
        transport.send_unicast(b"rebuilt", ucast_addr).unwrap();
        let datagram = inbound
            .recv_timeout(std::time::Duration::from_secs(5))
            .unwrap();
        assert_eq!(&datagram.payload[..], b"rebuilt");
    }
}
