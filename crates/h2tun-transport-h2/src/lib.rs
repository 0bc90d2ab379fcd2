//! Full-duplex HTTP/2 streams
//!
//! This crate turns a single HTTP/2 request/response exchange into a
//! bidirectional byte stream, so that a TCP connection can be carried
//! through infrastructure that only lets HTTP/2 through.
//!
//! # Stream Mapping
//!
//! - Request body DATA frames = bytes flowing from the client
//! - Response body DATA frames = bytes flowing back to the client
//! - END_STREAM on either body = that direction is finished
//!
//! The server side is [`accept`], the client side is [`H2Connector`].
//! Both produce an [`H2Stream`] that implements tokio's `AsyncRead` and
//! `AsyncWrite`.

pub mod accept;
pub mod config;
pub mod connector;
pub mod stream;

pub use accept::accept;
pub use config::H2Config;
pub use connector::H2Connector;
pub use stream::{DuplexBody, H2Stream};

use thiserror::Error;

/// Boxed error type accepted from HTTP body implementations
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Full-duplex streams require HTTP/2, got {0:?}")]
    NotHttp2(http::Version),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Tunnel request rejected with status {0}")]
    Rejected(http::StatusCode),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
