//! Backend connection setup

use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::DialError;

/// Opens a fresh TCP connection to the backend for every tunnel
#[derive(Debug, Clone)]
pub struct BackendDialer {
    address: String,
    timeout: Duration,
}

impl BackendDialer {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn dial(&self) -> Result<TcpStream, DialError> {
        let stream = self
            .bounded(TcpStream::connect(self.address.as_str()))
            .await?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on backend connection: {}", e);
        }

        debug!("Connected to backend {}", self.address);
        Ok(stream)
    }

    /// Run a connect attempt under the dial timeout
    async fn bounded<T, F>(&self, connect: F) -> Result<T, DialError>
    where
        F: Future<Output = io::Result<T>>,
    {
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(connected)) => Ok(connected),
            Ok(Err(source)) => Err(DialError::Connect {
                address: self.address.clone(),
                source,
            }),
            Err(_) => Err(DialError::Timeout {
                address: self.address.clone(),
                timeout: self.timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_dial_listening_backend() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dialer = BackendDialer::new(addr.to_string(), Duration::from_secs(5));
        let stream = dialer.dial().await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_dial_refused() {
        // Grab a free port, then close it
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dialer = BackendDialer::new(addr.to_string(), Duration::from_secs(5));
        let err = dialer.dial().await.unwrap_err();
        assert!(matches!(err, DialError::Connect { .. }));
        assert!(err.to_string().contains(&addr.to_string()));
    }

    #[tokio::test]
    async fn test_stalled_connect_times_out() {
        let dialer = BackendDialer::new("10.0.0.1:22", Duration::from_millis(50));

        let started = std::time::Instant::now();
        let err = dialer
            .bounded(std::future::pending::<io::Result<TcpStream>>())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DialError::Timeout { ref address, timeout }
                if address == "10.0.0.1:22" && timeout == Duration::from_millis(50)
        ));
        assert!(err.to_string().contains("Timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_connect_error_is_not_a_timeout() {
        let dialer = BackendDialer::new("backend:22", Duration::from_secs(5));

        let err = dialer
            .bounded(async {
                Err::<TcpStream, _>(io::Error::from(io::ErrorKind::ConnectionRefused))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DialError::Connect { .. }));
    }
}
