//! One tunnel: a client stream bridged to its own backend connection

use h2tun_relay::{bridge, RelayReport};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dialer::BackendDialer;

pub struct TunnelSession<S> {
    id: Uuid,
    remote_addr: Option<SocketAddr>,
    client: S,
    backend: TcpStream,
}

impl<S> TunnelSession<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(client: S, backend: TcpStream, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_addr,
            client,
            backend,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Relay until either side closes; both ends are closed on return
    pub async fn run(self) -> RelayReport {
        let started = Instant::now();
        let backend_addr = self
            .backend
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "backend".to_string());

        info!(
            "Tunnel {} opened: {} <-> {}",
            self.id,
            display_addr(self.remote_addr),
            backend_addr
        );

        let report = bridge(self.client, self.backend).await;

        info!(
            "Tunnel {} closed after {:?} ({:?}): {} bytes sent to backend, {} bytes received",
            self.id,
            started.elapsed(),
            report.outcome,
            report.client_to_backend,
            report.backend_to_client
        );

        report
    }
}

/// Dial the backend for an accepted client stream and relay until done
///
/// When the backend cannot be reached the client stream is dropped, which
/// ends the response body the client is reading.
pub async fn open_session<S>(
    client: S,
    remote_addr: Option<SocketAddr>,
    dialer: &BackendDialer,
) -> Option<RelayReport>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let backend = match dialer.dial().await {
        Ok(backend) => backend,
        Err(e) => {
            warn!(
                "Failed to connect to backend for {}: {}",
                display_addr(remote_addr),
                e
            );
            drop(client);
            return None;
        }
    };

    let session = TunnelSession::new(client, backend, remote_addr);
    debug!("Starting tunnel {}", session.id());
    Some(session.run().await)
}

pub(crate) fn display_addr(addr: Option<SocketAddr>) -> String {
    addr.map(|a| a.to_string())
        .unwrap_or_else(|| "unknown peer".to_string())
}
