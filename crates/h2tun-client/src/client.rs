//! Local listener forwarding TCP connections through tunnel streams

use h2tun_relay::{
    bridge, is_connection_error, AcceptFailures, DrainOutcome, ShutdownSignal, TaskTracker,
    ACCEPT_ERROR_BACKOFF,
};
use h2tun_transport_h2::{H2Connector, TransportError};
use http::Uri;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Failed to bind to {address}: {reason}")]
    BindError { address: String, reason: String },

    #[error("Transport error: {0}")]
    TransportError(#[from] TransportError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub struct TunnelClient {
    listener: TcpListener,
    connector: Arc<H2Connector>,
    tunnel_uri: Uri,
}

impl TunnelClient {
    pub async fn bind(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let tunnel_uri = config.tunnel_uri()?;
        if config.h2.insecure_skip_verify {
            warn!("Gateway certificate verification is disabled");
        }
        let connector = H2Connector::new(Arc::new(config.h2.clone()))?;

        let listener = TcpListener::bind(config.listen_addr.as_str())
            .await
            .map_err(|e| ClientError::BindError {
                address: config.listen_addr.clone(),
                reason: e.to_string(),
            })?;

        info!(
            "Forwarding connections on {} through {}",
            listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| config.listen_addr.clone()),
            tunnel_uri
        );

        Ok(Self {
            listener,
            connector: Arc::new(connector),
            tunnel_uri,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.listener.local_addr()?)
    }

    /// Forward connections until `shutdown` fires, then drain
    ///
    /// Returns `Err(ClientError::IoError)` when the local listener keeps failing.
    pub async fn serve(self, shutdown: ShutdownSignal) -> Result<(), ClientError> {
        let tasks = TaskTracker::new();
        let mut failures = AcceptFailures::new();
        let mut listener_error = None;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => {
                        failures.record_success();
                        debug!("Accepted local connection from {}", peer_addr);
                        tasks.spawn(forward(
                            socket,
                            peer_addr,
                            self.connector.clone(),
                            self.tunnel_uri.clone(),
                        ));
                    }
                    Err(e) if is_connection_error(&e) => {
                        debug!("Local connection dropped before accept: {}", e);
                    }
                    Err(e) => {
                        let give_up = failures.record_failure(&e);
                        error!(
                            "Failed to accept connection ({} in a row): {}",
                            failures.consecutive(),
                            e
                        );
                        if give_up {
                            listener_error = Some(e);
                            break;
                        }
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                _ = shutdown.triggered() => break,
            }
        }

        drop(self.listener);

        if let DrainOutcome::Forced { remaining } = tasks.drain(shutdown.grace()).await {
            warn!("Closed {} forwarded connection(s) at shutdown", remaining);
        }
        info!("Tunnel client stopped");

        match listener_error {
            Some(e) => Err(ClientError::IoError(e)),
            None => Ok(()),
        }
    }
}

async fn forward(socket: TcpStream, peer_addr: SocketAddr, connector: Arc<H2Connector>, uri: Uri) {
    let id = Uuid::new_v4();

    if let Err(e) = socket.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
    }

    let stream = match connector.connect(&uri).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to open tunnel for {}: {}", peer_addr, e);
            return;
        }
    };

    let started = Instant::now();
    info!("Tunnel {} opened for {}", id, peer_addr);

    let report = bridge(socket, stream).await;

    info!(
        "Tunnel {} closed after {:?} ({:?}): {} bytes sent, {} bytes received",
        id,
        started.elapsed(),
        report.outcome,
        report.client_to_backend,
        report.backend_to_client
    );
}
