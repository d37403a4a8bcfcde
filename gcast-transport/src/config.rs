//! Configuration for the gcast transport

use gcast_io::MulticastOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Local address the unicast socket binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,
    /// Multicast group for group-addressed datagrams
    #[serde(default = "default_mcast_group")]
    pub mcast_group: Ipv4Addr,
    /// Port the multicast socket binds to (0 = ephemeral)
    #[serde(default = "default_mcast_port")]
    pub mcast_port: u16,
    /// Port the unicast socket binds to (0 = ephemeral)
    #[serde(default)]
    pub ucast_port: u16,
    /// Interface the multicast join uses (0.0.0.0 lets the OS choose)
    #[serde(default = "default_mcast_iface")]
    pub mcast_iface: Ipv4Addr,
    /// Number of receiver threads on the multicast socket
    #[serde(default = "default_receiver_threads")]
    pub multicast_receiver_threads: usize,
    /// Number of receiver threads on the unicast socket
    #[serde(default = "default_receiver_threads")]
    pub unicast_receiver_threads: usize,
    /// TTL for outgoing multicast datagrams
    #[serde(default = "default_ip_ttl")]
    pub ip_ttl: u32,
    /// Whether locally-sent multicast loops back to this host
    #[serde(default = "default_mcast_loopback")]
    pub mcast_loopback: bool,
    /// Socket receive buffer size in bytes (0 leaves the OS default)
    #[serde(default)]
    pub recv_buffer_size: usize,
    /// Socket send buffer size in bytes (0 leaves the OS default)
    #[serde(default)]
    pub send_buffer_size: usize,
    /// Diagnostics probe channel
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_mcast_group() -> Ipv4Addr {
    Ipv4Addr::new(239, 8, 8, 8)
}

fn default_mcast_port() -> u16 {
    45566
}

fn default_mcast_iface() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

fn default_receiver_threads() -> usize {
    1
}

fn default_ip_ttl() -> u32 {
    8
}

fn default_mcast_loopback() -> bool {
    true
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            bind_addr: default_bind_addr(),
            mcast_group: default_mcast_group(),
            mcast_port: default_mcast_port(),
            ucast_port: 0,
            mcast_iface: default_mcast_iface(),
            multicast_receiver_threads: default_receiver_threads(),
            unicast_receiver_threads: default_receiver_threads(),
            ip_ttl: default_ip_ttl(),
            mcast_loopback: default_mcast_loopback(),
            recv_buffer_size: 0,
            send_buffer_size: 0,
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: TransportConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Check configuration invariants that do not require binding
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.mcast_group.is_multicast() {
            return Err(ConfigError::Invalid(format!(
                "{} is not a multicast group",
                self.mcast_group
            )));
        }
        Ok(())
    }

    /// Options applied to the multicast socket at bind time
    pub fn multicast_options(&self) -> MulticastOptions {
        MulticastOptions {
            ttl: self.ip_ttl,
            loopback: self.mcast_loopback,
            iface: self.mcast_iface,
            recv_buffer_size: self.recv_buffer_size,
        }
    }

    /// The unicast bind address
    pub fn ucast_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.ucast_port)
    }
}

/// Diagnostics channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Whether the diagnostics channel is started at all
    #[serde(default = "default_diag_enabled")]
    pub enabled: bool,
    /// Address the probe responder binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,
    /// Port the probe responder binds to (0 = ephemeral)
    #[serde(default = "default_diag_port")]
    pub port: u16,
}

fn default_diag_enabled() -> bool {
    true
}

fn default_diag_port() -> u16 {
    7500
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        DiagnosticsConfig {
            enabled: default_diag_enabled(),
            bind_addr: default_bind_addr(),
            port: default_diag_port(),
        }
    }
}

impl DiagnosticsConfig {
    /// The address the responder binds to
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TransportConfig::default();
        config.validate().unwrap();
        assert!(config.mcast_group.is_multicast());
        assert_eq!(config.multicast_receiver_threads, 1);
        assert!(config.diagnostics.enabled);
    }

    #[test]
    fn test_rejects_unicast_group() {
        let config = TransportConfig {
            mcast_group: "10.1.2.3".parse().unwrap(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = TransportConfig {
            multicast_receiver_threads: 4,
            ..Default::default()
        };
        let toml = toml::to_string(&config).unwrap();
        let parsed: TransportConfig = toml::from_str(&toml).unwrap();

        assert_eq!(parsed.multicast_receiver_threads, 4);
        assert_eq!(parsed.mcast_group, config.mcast_group);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: TransportConfig = toml::from_str("ucast_port = 9000").unwrap();
        assert_eq!(parsed.ucast_port, 9000);
        assert_eq!(parsed.mcast_port, 45566);
        assert_eq!(parsed.diagnostics.port, 7500);
    }
}
