//! Diagnostics probe channel
//!
//! An optional UDP responder, off the data plane, that answers probe
//! datagrams with a snapshot of transport state. Best-effort by contract:
//! a failure to start it never fails the surrounding reconnect.

use gcast_io::{GroupSocket, SocketError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

use crate::config::DiagnosticsConfig;

/// Diagnostics channel errors; non-fatal to the transport data plane
#[derive(Error, Debug)]
pub enum DiagnosticsError {
    #[error("failed to acquire diagnostics socket: {0}")]
    Bind(#[from] SocketError),

    #[error("failed to spawn diagnostics thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// The diagnostics probe responder
#[derive(Default)]
pub struct DiagnosticsChannel {
    runner: Option<Runner>,
}

struct Runner {
    socket: Arc<GroupSocket>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DiagnosticsChannel {
    pub fn new() -> Self {
        DiagnosticsChannel { runner: None }
    }

    /// Start the responder with the given config and info snapshot
    ///
    /// A disabled config is a successful no-op. If the channel is already
    /// running it is stopped first, so the responder always serves the
    /// snapshot taken by the most recent start.
    pub fn start(&mut self, config: &DiagnosticsConfig, info: String) -> Result<(), DiagnosticsError> {
        self.stop();

        if !config.enabled {
            tracing::debug!("diagnostics disabled, not starting");
            return Ok(());
        }

        let socket = Arc::new(GroupSocket::bind_unicast(config.listen_addr(), 0)?);
        let stop = Arc::new(AtomicBool::new(false));

        let loop_socket = Arc::clone(&socket);
        let loop_stop = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("diag-responder".to_string())
            .spawn(move || respond_loop(loop_socket, loop_stop, info))?;

        tracing::info!("diagnostics listening on {}", socket.local_addr());
        self.runner = Some(Runner {
            socket,
            stop,
            handle: Some(handle),
        });
        Ok(())
    }

    /// Stop the responder; idempotent, no-op when not running
    pub fn stop(&mut self) {
        if let Some(mut runner) = self.runner.take() {
            runner.stop.store(true, Ordering::Relaxed);
            runner.socket.close();
            if let Some(handle) = runner.handle.take() {
                let _ = handle.join();
            }
            tracing::debug!("diagnostics stopped");
        }
    }

    /// Whether the responder is currently running
    pub fn is_active(&self) -> bool {
        self.runner
            .as_ref()
            .is_some_and(|r| r.handle.as_ref().is_some_and(|h| !h.is_finished()))
    }

    /// Address the responder is bound to, when active
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.runner.as_ref().map(|r| r.socket.local_addr())
    }
}

impl Drop for DiagnosticsChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

fn respond_loop(socket: Arc<GroupSocket>, stop: Arc<AtomicBool>, info: String) {
    let mut buf = [0u8; 1024];

    while !stop.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((_n, from)) => {
                if let Err(e) = socket.send_to(info.as_bytes(), from) {
                    tracing::debug!("diagnostics reply to {} failed: {}", from, e);
                }
            }
            Err(SocketError::Closed) => break,
            Err(e) if e.is_timeout() => continue,
            Err(e) => {
                tracing::debug!("diagnostics receive error: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(port: u16) -> DiagnosticsConfig {
        DiagnosticsConfig {
            enabled: true,
            bind_addr: "127.0.0.1".parse().unwrap(),
            port,
        }
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let mut diag = DiagnosticsChannel::new();
        diag.stop();
        diag.stop();
        assert!(!diag.is_active());
    }

    #[test]
    fn test_disabled_config_is_noop() {
        let mut diag = DiagnosticsChannel::new();
        let config = DiagnosticsConfig {
            enabled: false,
            ..test_config(0)
        };
        diag.start(&config, "info".to_string()).unwrap();
        assert!(!diag.is_active());
    }

    #[test]
    fn test_start_fails_on_occupied_port() {
        let blocker = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();

        let mut diag = DiagnosticsChannel::new();
        let result = diag.start(&test_config(port), "info".to_string());
        assert!(matches!(result, Err(DiagnosticsError::Bind(_))));
        assert!(!diag.is_active());
    }

    #[test]
    fn test_probe_response() {
        let mut diag = DiagnosticsChannel::new();
        diag.start(&test_config(0), "transport=up".to_string())
            .unwrap();
        let addr = diag.local_addr().unwrap();

        let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        probe
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        probe.send_to(b"probe", addr).unwrap();

        let mut buf = [0u8; 256];
        let (n, _from) = probe.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"transport=up");

        diag.stop();
        assert!(!diag.is_active());
    }
}
