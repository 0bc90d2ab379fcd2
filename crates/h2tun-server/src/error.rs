//! Gateway errors

use h2tun_transport_h2::TransportError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this address: lsof -i {address}\n  • Try using a different address or port")]
    BindError { address: String, reason: String },

    #[error("Transport error: {0}")]
    TransportError(#[from] TransportError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failure to open the TCP connection to the backend
#[derive(Debug, Error)]
pub enum DialError {
    #[error("Failed to connect to backend {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out connecting to backend {address} after {timeout:?}")]
    Timeout { address: String, timeout: Duration },
}
