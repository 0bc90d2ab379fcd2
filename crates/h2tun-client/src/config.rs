//! Tunnel client configuration

use h2tun_transport_h2::H2Config;
use http::Uri;

use crate::client::ClientError;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Local address accepting the TCP connections to forward (host:port)
    pub listen_addr: String,

    /// Gateway tunnel endpoint, e.g. `https://gateway.example.com/tunnel`
    pub tunnel_url: String,

    /// HTTP/2 and TLS settings for the gateway connection
    pub h2: H2Config,
}

impl ClientConfig {
    pub fn new(listen_addr: impl Into<String>, tunnel_url: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            tunnel_url: tunnel_url.into(),
            h2: H2Config::client_default(),
        }
    }

    /// Accept any gateway certificate (INSECURE, development only)
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.h2.insecure_skip_verify = insecure;
        self
    }

    pub fn with_h2_config(mut self, h2: H2Config) -> Self {
        self.h2 = h2;
        self
    }

    /// Parse and check the tunnel URL
    pub fn tunnel_uri(&self) -> Result<Uri, ClientError> {
        let uri: Uri = self
            .tunnel_url
            .parse()
            .map_err(|e| ClientError::ConfigError(format!("Invalid tunnel URL: {}", e)))?;

        match uri.scheme_str() {
            Some("http") | Some("https") => {}
            _ => {
                return Err(ClientError::ConfigError(format!(
                    "Tunnel URL must use http:// or https://: {}",
                    self.tunnel_url
                )))
            }
        }
        if uri.host().is_none() {
            return Err(ClientError::ConfigError(format!(
                "Tunnel URL has no host: {}",
                self.tunnel_url
            )));
        }

        Ok(uri)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.listen_addr.trim().is_empty() {
            return Err(ClientError::ConfigError(
                "Listen address is required".to_string(),
            ));
        }
        self.tunnel_uri()?;
        self.h2.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_urls() {
        let config = ClientConfig::new("127.0.0.1:2222", "https://gateway.example.com/tunnel");
        assert!(config.validate().is_ok());
        assert_eq!(config.tunnel_uri().unwrap().path(), "/tunnel");
        assert!(!config.h2.insecure_skip_verify);

        let config = ClientConfig::new("127.0.0.1:2222", "http://127.0.0.1:8080/t").with_insecure(true);
        assert!(config.validate().is_ok());
        assert!(config.h2.insecure_skip_verify);
    }

    #[test]
    fn test_invalid_urls() {
        for url in ["", "/tunnel", "ftp://host/tunnel", "not a url"] {
            let config = ClientConfig::new("127.0.0.1:2222", url);
            assert!(config.validate().is_err(), "{:?} should be rejected", url);
        }
    }

    #[test]
    fn test_listen_address_required() {
        let config = ClientConfig::new(" ", "https://gateway.example.com/tunnel");
        assert!(matches!(config.validate(), Err(ClientError::ConfigError(_))));
    }
}
