//! Gateway listener and connection lifecycle

use axum::extract::ConnectInfo;
use axum::Router;
use h2tun_relay::{
    is_connection_error, AcceptFailures, DrainOutcome, ShutdownSignal, TaskTracker,
    ACCEPT_ERROR_BACKOFF,
};
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

use crate::config::{ServeMode, ServerConfig};
use crate::error::ServerError;
use crate::router::build_router;

/// HTTP/2 tunnel gateway bound to its listen address
pub struct TunnelServer {
    config: Arc<ServerConfig>,
    listener: TcpListener,
    mode: ServeMode,
    tls_acceptor: Option<TlsAcceptor>,
}

impl TunnelServer {
    /// Validate the configuration, load TLS material and bind the listener
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        if let Some(problem) = config.partial_tls() {
            warn!("{}; serving without TLS", problem);
        }

        let mode = config.serve_mode();
        let tls_acceptor = match &mode {
            ServeMode::Tls {
                cert_path,
                key_path,
            } => {
                let mut h2 = config.h2.clone();
                h2.server_cert_path = Some(cert_path.clone());
                h2.server_key_path = Some(key_path.clone());
                Some(h2.build_tls_acceptor()?)
            }
            ServeMode::Cleartext => None,
        };

        let listener = TcpListener::bind(config.listen_addr.as_str())
            .await
            .map_err(|e| ServerError::BindError {
                address: config.listen_addr.clone(),
                reason: e.to_string(),
            })?;

        info!(
            "Tunnel gateway listening on {} (tls: {}, path: {}, backend: {}, web root: {})",
            listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| config.listen_addr.clone()),
            mode.is_tls(),
            config.tunnel_path,
            config.backend_addr,
            config
                .web_root()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string())
        );

        Ok(Self {
            config: Arc::new(config),
            listener,
            mode,
            tls_acceptor,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn mode(&self) -> &ServeMode {
        &self.mode
    }

    /// Serve until `shutdown` fires, then drain
    ///
    /// After the signal the listener is closed, every connection is asked to
    /// finish gracefully and in-flight tunnels get the signal's grace period
    /// before being torn down.
    ///
    /// Returns `Err(ServerError::IoError)` when the listener keeps failing
    /// (see [`AcceptFailures`]); connections are drained the same way first.
    pub async fn serve(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let tasks = TaskTracker::new();
        let router = build_router(&self.config, tasks.clone());
        let builder = self.config.h2.server_builder();
        let mut failures = AcceptFailures::new();
        let mut listener_error = None;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        failures.record_success();
                        debug!("Accepted connection from {}", peer_addr);
                        tasks.spawn(serve_connection(
                            stream,
                            peer_addr,
                            self.tls_acceptor.clone(),
                            builder.clone(),
                            router.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) if is_connection_error(&e) => {
                        debug!("Connection dropped before accept: {}", e);
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
        info!(
            "Stopped accepting connections, waiting for {} task(s)",
            tasks.len()
        );

        match tasks.drain(shutdown.grace()).await {
            DrainOutcome::Completed => info!("All connections closed"),
            DrainOutcome::Forced { remaining } => {
                warn!("Closed {} task(s) that outlived the grace period", remaining)
            }
        }

        match listener_error {
            Some(e) => {
                error!("Tunnel gateway stopped: listener keeps failing");
                Err(ServerError::IoError(e))
            }
            None => Ok(()),
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    tls_acceptor: Option<TlsAcceptor>,
    builder: auto::Builder<TokioExecutor>,
    router: Router,
    shutdown: ShutdownSignal,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
    }

    match tls_acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(tls_stream) => {
                debug!("TLS handshake completed with {}", peer_addr);
                drive_connection(tls_stream, peer_addr, &builder, router, shutdown).await
            }
            Err(e) => warn!("TLS handshake failed with {}: {}", peer_addr, e),
        },
        None => drive_connection(stream, peer_addr, &builder, router, shutdown).await,
    }
}

async fn drive_connection<I>(
    io: I,
    peer_addr: SocketAddr,
    builder: &auto::Builder<TokioExecutor>,
    router: Router,
    shutdown: ShutdownSignal,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(peer_addr));
        router.clone().oneshot(request)
    });

    let connection = builder.serve_connection(TokioIo::new(io), service);
    tokio::pin!(connection);

    let mut draining = false;
    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    debug!("Connection from {} ended with error: {}", peer_addr, e);
                }
                break;
            }
            _ = shutdown.triggered(), if !draining => {
                debug!("Closing connection from {}", peer_addr);
                draining = true;
                connection.as_mut().graceful_shutdown();
            }
        }
    }

    debug!("Connection from {} closed", peer_addr);
}
