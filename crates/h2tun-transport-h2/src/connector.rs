//! Client side of a full-duplex exchange

use http::{Method, Request, StatusCode, Uri};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::H2Config;
use crate::stream::H2Stream;
use crate::{TransportError, TransportResult};

/// Opens tunnel streams against an HTTP/2 server
///
/// Every call to [`H2Connector::connect`] uses a fresh HTTP/2 connection
/// carrying exactly one stream.
pub struct H2Connector {
    tls_connector: tokio_rustls::TlsConnector,
    config: Arc<H2Config>,
}

impl std::fmt::Debug for H2Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H2Connector")
            .field("insecure", &self.config.insecure_skip_verify)
            .finish()
    }
}

impl H2Connector {
    pub fn new(config: Arc<H2Config>) -> TransportResult<Self> {
        config.validate()?;

        let tls_connector = config.build_tls_connector()?;

        debug!("HTTP/2 connector created");

        Ok(Self {
            tls_connector,
            config,
        })
    }

    /// Open a tunnel stream at `uri`
    ///
    /// `http://` uses cleartext HTTP/2 with prior knowledge, `https://`
    /// negotiates HTTP/2 over TLS.
    pub async fn connect(&self, uri: &Uri) -> TransportResult<H2Stream> {
        let tls = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            other => {
                return Err(TransportError::ConfigurationError(format!(
                    "Unsupported tunnel URL scheme: {:?}",
                    other
                )))
            }
        };

        let host = uri
            .host()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
            .ok_or_else(|| {
                TransportError::ConfigurationError(format!("Tunnel URL has no host: {}", uri))
            })?;
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });

        debug!("Connecting to HTTP/2 server: {}:{}", host, port);

        let tcp_stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| TransportError::ConnectionError(format!("TCP connect failed: {}", e)))?;
        tcp_stream.set_nodelay(true)?;

        if tls {
            let dns_name = ServerName::try_from(host.to_string())
                .map_err(|e| TransportError::TlsError(format!("Invalid server name: {}", e)))?;

            let tls_stream = self
                .tls_connector
                .connect(dns_name, tcp_stream)
                .await
                .map_err(|e| TransportError::TlsError(format!("TLS handshake failed: {}", e)))?;

            self.open_stream(tls_stream, uri).await
        } else {
            self.open_stream(tcp_stream, uri).await
        }
    }

    async fn open_stream<T>(&self, io: T, uri: &Uri) -> TransportResult<H2Stream>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut builder = hyper::client::conn::http2::Builder::new(TokioExecutor::new());
        builder
            .timer(TokioTimer::new())
            .initial_stream_window_size(self.config.initial_window_size)
            .keep_alive_interval(self.config.keep_alive_interval);

        let (mut send_request, connection) = builder
            .handshake(TokioIo::new(io))
            .await
            .map_err(|e| TransportError::ConnectionError(format!("H2 handshake failed: {}", e)))?;

        // Drives the connection until the stream and the request handle are gone
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("HTTP/2 client connection ended: {}", e);
            }
        });

        let (writer, body) = H2Stream::outbound();
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri.clone())
            .body(body)
            .map_err(|e| TransportError::ProtocolError(e.to_string()))?;

        let response = send_request
            .send_request(request)
            .await
            .map_err(|e| TransportError::ConnectionError(format!("Tunnel request failed: {}", e)))?;

        if response.status() != StatusCode::OK {
            return Err(TransportError::Rejected(response.status()));
        }

        info!("HTTP/2 tunnel stream established to {}", uri);

        Ok(H2Stream::new(response.into_body(), writer))
    }
}
