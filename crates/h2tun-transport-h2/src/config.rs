//! HTTP/2 transport configuration

use crate::{TransportError, TransportResult};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use hyper_util::server::conn::auto;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// ALPN identifiers offered by TLS servers
const SERVER_ALPN: &[&str] = &["h2", "http/1.1"];

/// ALPN identifiers offered by TLS clients (tunnels need HTTP/2)
const CLIENT_ALPN: &[&str] = &["h2"];

/// HTTP/2-specific configuration
#[derive(Debug, Clone)]
pub struct H2Config {
    /// Server certificate path (for servers)
    pub server_cert_path: Option<PathBuf>,

    /// Server private key path (for servers)
    pub server_key_path: Option<PathBuf>,

    /// Keep-alive interval (PING frames)
    pub keep_alive_interval: Option<Duration>,

    /// Initial stream window size
    pub initial_window_size: u32,

    /// Maximum concurrent streams per connection
    pub max_concurrent_streams: u32,

    /// Skip server certificate verification (clients only)
    pub insecure_skip_verify: bool,
}

impl Default for H2Config {
    fn default() -> Self {
        Self {
            server_cert_path: None,
            server_key_path: None,
            keep_alive_interval: Some(Duration::from_secs(30)),
            initial_window_size: 1024 * 1024, // 1MB
            max_concurrent_streams: 1000,
            insecure_skip_verify: false,
        }
    }
}

impl H2Config {
    /// Create a client configuration with defaults
    pub fn client_default() -> Self {
        Self {
            max_concurrent_streams: 100,
            ..Default::default()
        }
    }

    /// Create a client configuration for local development (skip cert verification)
    pub fn client_insecure() -> Self {
        Self::client_default().with_insecure_skip_verify()
    }

    /// Create a server configuration with certificate paths
    pub fn server_tls(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            server_cert_path: Some(cert_path.into()),
            server_key_path: Some(key_path.into()),
            ..Default::default()
        }
    }

    /// Set custom keep-alive interval (`None` disables PING frames)
    pub fn with_keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Disable server certificate verification (INSECURE)
    pub fn with_insecure_skip_verify(mut self) -> Self {
        self.insecure_skip_verify = true;
        self
    }

    pub fn validate(&self) -> TransportResult<()> {
        if self.initial_window_size == 0 {
            return Err(TransportError::ConfigurationError(
                "Initial window size must be > 0".to_string(),
            ));
        }
        if self.max_concurrent_streams == 0 {
            return Err(TransportError::ConfigurationError(
                "Max concurrent streams must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the hyper connection builder used by servers
    ///
    /// Serves HTTP/1.1 and HTTP/2 on the same connection type; over
    /// cleartext TCP this is HTTP/2 with prior knowledge (h2c).
    pub fn server_builder(&self) -> auto::Builder<TokioExecutor> {
        let mut builder = auto::Builder::new(TokioExecutor::new());
        builder
            .http2()
            .timer(TokioTimer::new())
            .initial_stream_window_size(self.initial_window_size)
            .max_concurrent_streams(self.max_concurrent_streams)
            .keep_alive_interval(self.keep_alive_interval);
        builder
    }

    /// Build rustls TlsConnector for clients
    pub fn build_tls_connector(&self) -> TransportResult<tokio_rustls::TlsConnector> {
        ensure_crypto_provider();

        let mut client_crypto = if self.insecure_skip_verify {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(SkipVerification::new())
                .with_no_client_auth()
        } else {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        };

        client_crypto.alpn_protocols = alpn(CLIENT_ALPN);

        Ok(tokio_rustls::TlsConnector::from(Arc::new(client_crypto)))
    }

    /// Build rustls TlsAcceptor for servers
    pub fn build_tls_acceptor(&self) -> TransportResult<tokio_rustls::TlsAcceptor> {
        ensure_crypto_provider();

        let cert_path = self.server_cert_path.as_ref().ok_or_else(|| {
            TransportError::ConfigurationError("Server cert path required".to_string())
        })?;
        let key_path = self.server_key_path.as_ref().ok_or_else(|| {
            TransportError::ConfigurationError("Server key path required".to_string())
        })?;

        let certs = load_certs(cert_path)?;
        let key = load_private_key(key_path)?;

        let mut server_crypto = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| TransportError::TlsError(format!("Invalid cert/key: {}", e)))?;

        server_crypto.alpn_protocols = alpn(SERVER_ALPN);

        Ok(tokio_rustls::TlsAcceptor::from(Arc::new(server_crypto)))
    }
}

fn alpn(protocols: &[&str]) -> Vec<Vec<u8>> {
    protocols.iter().map(|p| p.as_bytes().to_vec()).collect()
}

// Initialize rustls crypto provider
static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("Rustls crypto provider already installed");
        }
    });
}

fn load_certs(path: &Path) -> TransportResult<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        TransportError::TlsError(format!(
            "Failed to open cert file {}: {}",
            path.display(),
            e
        ))
    })?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::TlsError(format!("Failed to parse certs: {}", e)))?;

    if certs.is_empty() {
        return Err(TransportError::TlsError(format!(
            "No certificates found in {}",
            path.display()
        )));
    }

    Ok(certs)
}

fn load_private_key(path: &Path) -> TransportResult<rustls::pki_types::PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| {
        TransportError::TlsError(format!("Failed to open key file {}: {}", path.display(), e))
    })?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TransportError::TlsError(format!("Failed to parse key: {}", e)))?
        .ok_or_else(|| TransportError::TlsError("No private key found".to_string()))
}

// Certificate verifier that skips verification (INSECURE)
#[derive(Debug)]
struct SkipVerification;

impl SkipVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_client_config_default() {
        let config = H2Config::client_default();
        assert_eq!(config.initial_window_size, 1024 * 1024);
        assert_eq!(config.max_concurrent_streams, 100);
        assert!(!config.insecure_skip_verify);
    }

    #[test]
    fn test_config_validation() {
        assert!(H2Config::client_default().validate().is_ok());

        let config = H2Config {
            initial_window_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_connector_builds() {
        assert!(H2Config::client_default().build_tls_connector().is_ok());
        assert!(H2Config::client_insecure().build_tls_connector().is_ok());
    }

    #[test]
    fn test_acceptor_requires_paths() {
        let err = H2Config::default().build_tls_acceptor().err().unwrap();
        assert!(matches!(err, TransportError::ConfigurationError(_)));
    }

    #[test]
    fn test_acceptor_missing_files() {
        let config = H2Config::server_tls("/nonexistent/cert.pem", "/nonexistent/key.pem");
        let err = config.build_tls_acceptor().err().unwrap();
        assert!(matches!(err, TransportError::TlsError(_)));
    }

    #[test]
    fn test_acceptor_rejects_empty_cert_file() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::File::create(&cert_path).unwrap();
        std::fs::File::create(&key_path).unwrap();

        let err = H2Config::server_tls(&cert_path, &key_path)
            .build_tls_acceptor()
            .err()
            .unwrap();
        assert!(err.to_string().contains("No certificates found"));
    }

    #[test]
    fn test_acceptor_from_self_signed_pair() {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::File::create(&cert_path)
            .unwrap()
            .write_all(certified.cert.pem().as_bytes())
            .unwrap();
        std::fs::File::create(&key_path)
            .unwrap()
            .write_all(certified.key_pair.serialize_pem().as_bytes())
            .unwrap();

        assert!(H2Config::server_tls(&cert_path, &key_path)
            .build_tls_acceptor()
            .is_ok());
    }
}
