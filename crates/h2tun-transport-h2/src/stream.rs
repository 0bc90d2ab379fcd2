//! HTTP/2 stream implementation

use bytes::Bytes;
use futures::future;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use http_body_util::{BodyStream, StreamBody};
use hyper::body::{Body, Frame};
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tokio_util::sync::PollSender;
use tracing::trace;

use crate::BoxError;

/// Number of chunks buffered towards the peer before writes start to wait
const OUTBOUND_QUEUE_DEPTH: usize = 16;

/// Largest chunk handed to the HTTP/2 layer in a single write
const MAX_CHUNK_SIZE: usize = 16 * 1024;

/// Body type carrying the bytes written into an [`H2Stream`]
pub type DuplexBody = StreamBody<BoxStream<'static, Result<Frame<Bytes>, io::Error>>>;

type InboundStream = BoxStream<'static, io::Result<Bytes>>;

/// One side of a full-duplex HTTP/2 exchange
///
/// Reads yield the DATA frames of the body coming from the peer. Writes are
/// queued into the body going to the peer; `shutdown()` ends that body.
pub struct H2Stream {
    reader: StreamReader<InboundStream, Bytes>,
    writer: PollSender<Bytes>,
    write_closed: bool,
}

impl std::fmt::Debug for H2Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H2Stream")
            .field("write_closed", &self.write_closed)
            .finish()
    }
}

impl H2Stream {
    /// Create the outgoing half: the writer end and the body the peer will receive
    pub(crate) fn outbound() -> (PollSender<Bytes>, DuplexBody) {
        let (tx, rx) = mpsc::channel::<Bytes>(OUTBOUND_QUEUE_DEPTH);

        let frames = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|data| (Ok::<_, io::Error>(Frame::data(data)), rx))
        })
        .boxed();

        (PollSender::new(tx), StreamBody::new(frames))
    }

    /// Assemble a stream from an incoming body and an outgoing writer
    pub(crate) fn new<B>(incoming: B, writer: PollSender<Bytes>) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self {
            reader: StreamReader::new(data_stream(incoming)),
            writer,
            write_closed: false,
        }
    }

    /// Whether the outgoing direction has been shut down
    pub fn is_write_closed(&self) -> bool {
        self.write_closed
    }
}

/// Flatten an HTTP body into its DATA payloads, skipping trailers
fn data_stream<B>(body: B) -> InboundStream
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    BodyStream::new(body)
        .map_err(io::Error::other)
        .try_filter_map(|frame| future::ready(Ok(frame.into_data().ok())))
        .boxed()
}

fn stream_closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "HTTP/2 stream closed")
}

impl AsyncRead for H2Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl AsyncWrite for H2Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.write_closed {
            return Poll::Ready(Err(stream_closed()));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        if ready!(this.writer.poll_reserve(cx)).is_err() {
            // Peer dropped the body
            this.write_closed = true;
            return Poll::Ready(Err(stream_closed()));
        }

        let len = buf.len().min(MAX_CHUNK_SIZE);
        this.writer
            .send_item(Bytes::copy_from_slice(&buf[..len]))
            .map_err(|_| stream_closed())?;

        trace!("Queued {} bytes on HTTP/2 stream", len);
        Poll::Ready(Ok(len))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Queued chunks are drained by the HTTP/2 connection task
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.write_closed {
            this.writer.close();
            this.write_closed = true;
        }
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::{BodyExt, Full};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_reads_incoming_body() {
        let (writer, _body) = H2Stream::outbound();
        let mut stream = H2Stream::new(Full::new(Bytes::from_static(b"hello")), writer);

        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn test_writes_become_body_frames() {
        let (writer, body) = H2Stream::outbound();
        let mut stream = H2Stream::new(Full::new(Bytes::new()), writer);

        stream.write_all(b"PING").await.unwrap();
        stream.write_all(b"PONG").await.unwrap();
        stream.shutdown().await.unwrap();
        assert!(stream.is_write_closed());

        let collected = BodyExt::collect(body).await.unwrap().to_bytes();
        assert_eq!(&collected[..], b"PINGPONG");
    }

    #[tokio::test]
    async fn test_write_after_shutdown_fails() {
        let (writer, _body) = H2Stream::outbound();
        let mut stream = H2Stream::new(Full::new(Bytes::new()), writer);

        stream.shutdown().await.unwrap();
        let err = stream.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_write_fails_when_peer_body_dropped() {
        let (writer, body) = H2Stream::outbound();
        let mut stream = H2Stream::new(Full::new(Bytes::new()), writer);

        drop(body);
        let err = stream.write_all(b"nobody listening").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_large_writes_are_chunked() {
        let (writer, body) = H2Stream::outbound();
        let mut stream = H2Stream::new(Full::new(Bytes::new()), writer);

        let payload = vec![7u8; MAX_CHUNK_SIZE * 3 + 11];
        let expected = payload.clone();
        let reader = tokio::spawn(async move { BodyExt::collect(body).await.unwrap().to_bytes() });

        stream.write_all(&payload).await.unwrap();
        stream.shutdown().await.unwrap();

        let collected = reader.await.unwrap();
        assert_eq!(collected.len(), expected.len());
        assert_eq!(&collected[..], &expected[..]);
    }
}
