//! Connection Manager Error Types

use std::net::SocketAddr;

use thiserror::Error;

/// Fatal connection manager errors; per-connection failures never surface here
#[derive(Debug, Error)]
pub enum ConnMgrError {
    /// Could not bind or listen
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Accepting or registering a new socket with the reactor failed
    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),
}
