//! Tunnel client
//!
//! Listens on a local TCP address and forwards every accepted connection
//! through its own HTTP/2 tunnel stream to an h2tun gateway.

pub mod client;
pub mod config;

pub use client::{ClientError, TunnelClient};
pub use config::ClientConfig;
