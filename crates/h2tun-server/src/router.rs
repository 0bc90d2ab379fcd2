//! HTTP routing: the tunnel endpoint plus optional static files

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use h2tun_relay::TaskTracker;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::dialer::BackendDialer;
use crate::session::{display_addr, open_session};

struct TunnelState {
    dialer: BackendDialer,
    sessions: TaskTracker,
}

/// Build the gateway router
///
/// Requests to the tunnel path (any method) open a tunnel. Everything else is
/// served from the web root when one is configured, or answered with 404.
/// Sessions are spawned on `sessions` so that shutdown can wait for them.
pub fn build_router(config: &ServerConfig, sessions: TaskTracker) -> Router {
    let state = Arc::new(TunnelState {
        dialer: BackendDialer::new(config.backend_addr.clone(), config.dial_timeout),
        sessions,
    });

    let router = Router::new()
        .route(&config.tunnel_path, any(tunnel_entry))
        .with_state(state);

    let router = match config.web_root() {
        Some(web_root) => {
            debug!("Serving static files from {}", web_root.display());
            router.fallback_service(ServeDir::new(web_root))
        }
        None => router,
    };

    router.layer(TraceLayer::new_for_http())
}

async fn tunnel_entry(State(state): State<Arc<TunnelState>>, request: Request) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let (client, response) = match h2tun_transport_h2::accept(request) {
        Ok(accepted) => accepted,
        Err(e) => {
            warn!(
                "Failed creating full duplex connection from {}: {}",
                display_addr(remote_addr),
                e
            );
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    };

    let dialer = state.dialer.clone();
    state.sessions.spawn(async move {
        open_session(client, remote_addr, &dialer).await;
    });

    response.map(Body::new)
}
