//! HTTP/2 tunnel gateway
//!
//! Accepts full-duplex HTTP/2 requests on a configured path and bridges each
//! one to a fresh TCP connection to a fixed backend. Other paths can be served
//! from a static web root.
//!
//! ```no_run
//! use h2tun_relay::ShutdownSignal;
//! use h2tun_server::{ServerConfig, TunnelServer};
//!
//! # async fn run() -> Result<(), h2tun_server::ServerError> {
//! let config = ServerConfig::new("0.0.0.0:8443", "127.0.0.1:22")
//!     .with_tls("server.key", "server.crt");
//! let server = TunnelServer::bind(config).await?;
//!
//! let shutdown = ShutdownSignal::new();
//! shutdown.trigger_on_os_signal();
//! server.serve(shutdown).await
//! # }
//! ```

mod config;
mod dialer;
mod error;
mod router;
mod server;
mod session;

pub use config::{ServeMode, ServerConfig, DEFAULT_DIAL_TIMEOUT, DEFAULT_TUNNEL_PATH};
pub use dialer::BackendDialer;
pub use error::{DialError, ServerError};
pub use router::build_router;
pub use server::TunnelServer;
pub use session::{open_session, TunnelSession};
