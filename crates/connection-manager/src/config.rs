//! Connection manager configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default idle timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Configuration for the connection manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnMgrConfig {
    /// TCP port to listen on (0 picks an ephemeral port)
    pub port: u16,
    /// Interface to bind
    pub bind_address: IpAddr,
    /// Idle window for single connections and for the whole server
    pub timeout: Duration,
    /// Bytes requested per socket read
    pub read_chunk: usize,
}

impl Default for ConnMgrConfig {
    fn default() -> Self {
        Self {
            port: 0,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            read_chunk: 1024,
        }
    }
}

impl ConnMgrConfig {
    /// Listen on `port` with default settings
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Loopback-only config, used by tests and the simulator
    pub fn local(timeout: Duration) -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            timeout,
            ..Default::default()
        }
    }

    /// Socket address to bind
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}
