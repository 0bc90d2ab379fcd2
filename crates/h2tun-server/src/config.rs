//! Gateway configuration

use h2tun_transport_h2::H2Config;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ServerError;

/// Route that carries tunnel streams unless configured otherwise
pub const DEFAULT_TUNNEL_PATH: &str = "/tunnel";

/// Upper bound on connecting to the backend
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// How the listener speaks to clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeMode {
    /// TLS with ALPN h2 and http/1.1
    Tls { cert_path: PathBuf, key_path: PathBuf },
    /// Plain TCP: HTTP/2 with prior knowledge, or HTTP/1.1
    Cleartext,
}

impl ServeMode {
    pub fn is_tls(&self) -> bool {
        matches!(self, ServeMode::Tls { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the gateway listens on (host:port)
    pub listen_addr: String,

    /// Backend every tunnel is connected to (host:port)
    pub backend_addr: String,

    /// Exact path that opens a tunnel
    pub tunnel_path: String,

    pub tls_key_path: Option<PathBuf>,
    pub tls_cert_path: Option<PathBuf>,

    /// Directory served for every other path
    pub web_root: Option<PathBuf>,

    pub dial_timeout: Duration,

    /// HTTP/2 settings applied to every accepted connection
    pub h2: H2Config,
}

impl ServerConfig {
    pub fn new(listen_addr: impl Into<String>, backend_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            backend_addr: backend_addr.into(),
            tunnel_path: DEFAULT_TUNNEL_PATH.to_string(),
            tls_key_path: None,
            tls_cert_path: None,
            web_root: None,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            h2: H2Config::default(),
        }
    }

    pub fn with_tunnel_path(mut self, path: impl Into<String>) -> Self {
        self.tunnel_path = path.into();
        self
    }

    /// Serve over TLS with the given key and certificate (PEM)
    pub fn with_tls(mut self, key_path: impl Into<PathBuf>, cert_path: impl Into<PathBuf>) -> Self {
        self.tls_key_path = Some(key_path.into());
        self.tls_cert_path = Some(cert_path.into());
        self
    }

    pub fn with_tls_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.tls_key_path = Some(key_path.into());
        self
    }

    pub fn with_tls_cert(mut self, cert_path: impl Into<PathBuf>) -> Self {
        self.tls_cert_path = Some(cert_path.into());
        self
    }

    pub fn with_web_root(mut self, web_root: impl Into<PathBuf>) -> Self {
        self.web_root = Some(web_root.into());
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_h2_config(mut self, h2: H2Config) -> Self {
        self.h2 = h2;
        self
    }

    /// TLS is used only when both the key and the certificate are given
    ///
    /// Empty paths count as absent.
    pub fn serve_mode(&self) -> ServeMode {
        match (present(&self.tls_cert_path), present(&self.tls_key_path)) {
            (Some(cert), Some(key)) => ServeMode::Tls {
                cert_path: cert.to_path_buf(),
                key_path: key.to_path_buf(),
            },
            _ => ServeMode::Cleartext,
        }
    }

    /// Describes a half-configured TLS setup, which falls back to cleartext
    pub fn partial_tls(&self) -> Option<&'static str> {
        match (present(&self.tls_cert_path), present(&self.tls_key_path)) {
            (Some(_), None) => Some("TLS certificate given without a key"),
            (None, Some(_)) => Some("TLS key given without a certificate"),
            _ => None,
        }
    }

    pub fn web_root(&self) -> Option<&Path> {
        present(&self.web_root)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.listen_addr.trim().is_empty() {
            return Err(ServerError::ConfigError(
                "Listen address is required".to_string(),
            ));
        }
        if self.backend_addr.trim().is_empty() {
            return Err(ServerError::ConfigError(
                "Backend address is required".to_string(),
            ));
        }
        if !self.tunnel_path.starts_with('/') {
            return Err(ServerError::ConfigError(format!(
                "Tunnel path must start with '/': {:?}",
                self.tunnel_path
            )));
        }
        if self.tunnel_path.contains(['{', '}', '*', ':']) {
            return Err(ServerError::ConfigError(format!(
                "Tunnel path must be a literal path: {:?}",
                self.tunnel_path
            )));
        }
        if self.dial_timeout.is_zero() {
            return Err(ServerError::ConfigError(
                "Dial timeout must be > 0".to_string(),
            ));
        }
        self.h2.validate()?;
        Ok(())
    }
}

fn present(path: &Option<PathBuf>) -> Option<&Path> {
    path.as_deref().filter(|p| !p.as_os_str().is_empty())
}
