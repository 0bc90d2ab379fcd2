//! Server side of a full-duplex exchange

use bytes::Bytes;
use http::{Request, Response, StatusCode, Version};
use hyper::body::Body;
use tracing::debug;

use crate::stream::{DuplexBody, H2Stream};
use crate::{BoxError, TransportError, TransportResult};

/// Turn an inbound HTTP/2 request into a bidirectional stream
///
/// The returned response must be handed back to the HTTP server as-is: its
/// body carries everything written into the stream. The request body becomes
/// the read side of the stream.
///
/// Only HTTP/2 can keep the request body open while the response streams,
/// so any other protocol version is rejected with
/// [`TransportError::NotHttp2`].
pub fn accept<B>(request: Request<B>) -> TransportResult<(H2Stream, Response<DuplexBody>)>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    if request.version() != Version::HTTP_2 {
        return Err(TransportError::NotHttp2(request.version()));
    }

    debug!(
        "Accepting full-duplex stream: {} {}",
        request.method(),
        request.uri()
    );

    let (writer, body) = H2Stream::outbound();
    let stream = H2Stream::new(request.into_body(), writer);

    let response = Response::builder()
        .status(StatusCode::OK)
        .body(body)
        .map_err(|e| TransportError::ProtocolError(e.to_string()))?;

    Ok((stream, response))
}
