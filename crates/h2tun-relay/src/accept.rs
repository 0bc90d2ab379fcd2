//! Accept-loop error accounting

use std::io;
use std::time::Duration;

/// Pause after a failed accept() before trying again
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Consecutive listener failures tolerated before giving up (~10 s of backoff)
pub const MAX_CONSECUTIVE_ACCEPT_ERRORS: u32 = 100;

/// Decides when a failing listener should stop serving
///
/// Errors that only concern the connection being accepted (the peer reset
/// or aborted before accept returned) never count. Anything else, such as
/// running out of file descriptors, counts until a connection is accepted
/// again.
#[derive(Debug, Default)]
pub struct AcceptFailures {
    consecutive: u32,
}

impl AcceptFailures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Record a failed accept; returns `true` once the listener should stop
    pub fn record_failure(&mut self, error: &io::Error) -> bool {
        if is_connection_error(error) {
            return false;
        }

        self.consecutive += 1;
        self.consecutive >= MAX_CONSECUTIVE_ACCEPT_ERRORS
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// Errors caused by the peer rather than the listener
pub fn is_connection_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener_error() -> io::Error {
        io::Error::new(io::ErrorKind::Other, "Too many open files")
    }

    #[test]
    fn test_peer_errors_never_stop_the_listener() {
        let mut failures = AcceptFailures::new();
        for _ in 0..(MAX_CONSECUTIVE_ACCEPT_ERRORS * 2) {
            assert!(!failures.record_failure(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        }
        assert_eq!(failures.consecutive(), 0);
    }

    #[test]
    fn test_repeated_listener_errors_stop_the_listener() {
        let mut failures = AcceptFailures::new();
        for _ in 1..MAX_CONSECUTIVE_ACCEPT_ERRORS {
            assert!(!failures.record_failure(&listener_error()));
        }
        assert!(failures.record_failure(&listener_error()));
    }

    #[test]
    fn test_success_resets_the_count() {
        let mut failures = AcceptFailures::new();
        for _ in 1..MAX_CONSECUTIVE_ACCEPT_ERRORS {
            failures.record_failure(&listener_error());
        }
        failures.record_success();
        assert_eq!(failures.consecutive(), 0);
        assert!(!failures.record_failure(&listener_error()));
    }
}
