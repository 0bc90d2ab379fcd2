//! Full-duplex exchange between `H2Connector` and `accept` over real sockets

use bytes::Bytes;
use h2tun_transport_h2::{accept, H2Config, H2Connector, TransportError};
use http::{Request, Response, StatusCode, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const WAIT: Duration = Duration::from_secs(5);

type TestBody = UnsyncBoxBody<Bytes, io::Error>;

async fn handle(request: Request<Incoming>) -> Result<Response<TestBody>, Infallible> {
    if request.uri().path() != "/tunnel" {
        let body = Empty::<Bytes>::new()
            .map_err(|never| match never {})
            .boxed_unsync();
        let mut response = Response::new(body);
        *response.status_mut() = StatusCode::NOT_FOUND;
        return Ok(response);
    }

    let (stream, response) = accept(request).expect("HTTP/2 request");

    // Echo everything back, then end the response body
    tokio::spawn(async move {
        let (mut read, mut write) = tokio::io::split(stream);
        let _ = tokio::io::copy(&mut read, &mut write).await;
        let _ = write.shutdown().await;
    });

    Ok(response.map(|body| body.boxed_unsync()))
}

async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(socket), service_fn(handle))
                    .await;
            });
        }
    });

    addr
}

fn connector() -> H2Connector {
    H2Connector::new(Arc::new(H2Config::client_default())).unwrap()
}

#[tokio::test]
async fn test_echo_over_cleartext_h2() {
    let addr = echo_server().await;
    let uri: Uri = format!("http://{}/tunnel", addr).parse().unwrap();

    let mut stream = tokio::time::timeout(WAIT, connector().connect(&uri))
        .await
        .unwrap()
        .unwrap();

    stream.write_all(b"PING").await.unwrap();
    let mut buf = [0u8; 4];
    tokio::time::timeout(WAIT, stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"PING");

    // Large payloads are split into chunks and arrive intact
    let payload: Vec<u8> = (0..200_000).map(|i| (i % 253) as u8).collect();
    let expected = payload.clone();
    let (mut read, mut write) = tokio::io::split(stream);
    let writer = tokio::spawn(async move {
        write.write_all(&payload).await.unwrap();
        write.shutdown().await.unwrap();
    });

    let mut received = Vec::new();
    tokio::time::timeout(WAIT, read.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, expected);
    writer.await.unwrap();
}

#[tokio::test]
async fn test_non_200_response_is_rejected() {
    let addr = echo_server().await;
    let uri: Uri = format!("http://{}/elsewhere", addr).parse().unwrap();

    let err = tokio::time::timeout(WAIT, connector().connect(&uri))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, TransportError::Rejected(StatusCode::NOT_FOUND)));
}
