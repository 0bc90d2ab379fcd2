//! Bidirectional relay between a tunnel stream and a backend connection

use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const RELAY_BUFFER_SIZE: usize = 8192;

/// Why a relay ended: the first direction to finish decides
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The client stream reached end-of-stream
    ClientClosed,
    /// The backend connection reached end-of-stream
    BackendClosed,
    /// A read or write failed in one direction
    IoError(String),
}

/// Summary of a finished relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub outcome: RelayOutcome,
    pub client_to_backend: u64,
    pub backend_to_client: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToBackend => write!(f, "client->backend"),
            Direction::BackendToClient => write!(f, "backend->client"),
        }
    }
}

enum DirectionEnd {
    Eof,
    Error(io::Error),
    /// The paired direction finished first
    Stopped,
}

struct DirectionResult {
    direction: Direction,
    end: DirectionEnd,
    bytes: u64,
}

impl DirectionResult {
    fn outcome(&self) -> Option<RelayOutcome> {
        match (&self.end, self.direction) {
            (DirectionEnd::Eof, Direction::ClientToBackend) => Some(RelayOutcome::ClientClosed),
            (DirectionEnd::Eof, Direction::BackendToClient) => Some(RelayOutcome::BackendClosed),
            (DirectionEnd::Error(e), direction) => {
                Some(RelayOutcome::IoError(format!("{}: {}", direction, e)))
            }
            (DirectionEnd::Stopped, _) => None,
        }
    }
}

/// Relay bytes between `client` and `backend` until either side finishes
///
/// Each direction runs on its own task. When one direction sees EOF or an
/// error it shuts down its write side and stops the other direction, so a
/// half-open endpoint can never keep the session alive. Returns once both
/// directions are done; both endpoints are closed by then.
pub async fn bridge<C, B>(client: C, backend: B) -> RelayReport
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (backend_read, backend_write) = tokio::io::split(backend);
    let stop = CancellationToken::new();

    let mut directions = JoinSet::new();
    directions.spawn(relay_direction(
        Direction::BackendToClient,
        backend_read,
        client_write,
        stop.clone(),
    ));
    directions.spawn(relay_direction(
        Direction::ClientToBackend,
        client_read,
        backend_write,
        stop.clone(),
    ));

    let mut outcome = None;
    let mut client_to_backend = 0;
    let mut backend_to_client = 0;

    while let Some(joined) = directions.join_next().await {
        match joined {
            Ok(result) => {
                match result.direction {
                    Direction::ClientToBackend => client_to_backend = result.bytes,
                    Direction::BackendToClient => backend_to_client = result.bytes,
                }
                if outcome.is_none() {
                    outcome = result.outcome();
                }
            }
            Err(e) => {
                stop.cancel();
                outcome.get_or_insert(RelayOutcome::IoError(format!("relay task failed: {}", e)));
            }
        }
    }

    RelayReport {
        outcome: outcome.unwrap_or(RelayOutcome::ClientClosed),
        client_to_backend,
        backend_to_client,
    }
}

async fn relay_direction<R, W>(
    direction: Direction,
    mut reader: R,
    mut writer: W,
    stop: CancellationToken,
) -> DirectionResult
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut bytes = 0u64;

    let end = tokio::select! {
        end = copy_until_eof(&mut reader, &mut writer, &mut bytes) => end,
        _ = stop.cancelled() => DirectionEnd::Stopped,
    };

    match &end {
        DirectionEnd::Eof => debug!("{} reached EOF after {} bytes", direction, bytes),
        DirectionEnd::Error(e) => debug!("{} failed after {} bytes: {}", direction, bytes, e),
        DirectionEnd::Stopped => debug!("{} stopped after {} bytes", direction, bytes),
    }

    if let Err(e) = writer.shutdown().await {
        debug!("{} shutdown failed: {}", direction, e);
    }
    stop.cancel();

    DirectionResult {
        direction,
        end,
        bytes,
    }
}

async fn copy_until_eof<R, W>(reader: &mut R, writer: &mut W, bytes: &mut u64) -> DirectionEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; RELAY_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buffer).await {
            Ok(0) => return DirectionEnd::Eof,
            Ok(n) => n,
            Err(e) => return DirectionEnd::Error(e),
        };

        if let Err(e) = writer.write_all(&buffer[..n]).await {
            return DirectionEnd::Error(e);
        }
        if let Err(e) = writer.flush().await {
            return DirectionEnd::Error(e);
        }

        *bytes += n as u64;
    }
}
