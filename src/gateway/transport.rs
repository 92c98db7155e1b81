//! Minimal outbound HTTP transport: one connection per call.
//!
//! The audit webhook, health probes, and the retry orchestrator all need to
//! issue occasional outbound requests, but none of them benefit from a
//! pooled, long-lived client — connection pooling and HTTPS termination are
//! explicitly out of scope for this crate. This module does the same
//! handshake-per-call [`client`](crate::client) does, just without the
//! `client` feature's TLS machinery, and folds request + response read into
//! a single call.

use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::BodyExt;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

/// Errors that can occur issuing a one-shot outbound request.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect to {0} failed: {1}")]
    Connect(String, #[source] std::io::Error),
    #[error("handshake failed: {0}")]
    Handshake(#[source] hyper::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Request(#[source] hyper::Error),
}

/// Issues a single HTTP/1.1 request over a fresh TCP connection to
/// `host:port`, waiting at most `timeout` for the whole exchange
/// (connect + handshake + request + response body).
pub async fn send_once(
    host: &str,
    port: u16,
    req: Request<Bytes>,
    timeout: Duration,
) -> Result<Response<Bytes>, TransportError> {
    tokio::time::timeout(timeout, send_once_inner(host, port, req))
        .await
        .map_err(|_| TransportError::Timeout(timeout))?
}

async fn send_once_inner(
    host: &str,
    port: u16,
    req: Request<Bytes>,
) -> Result<Response<Bytes>, TransportError> {
    let addr = format!("{host}:{port}");
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| TransportError::Connect(addr, e))?;
    let io = TokioIo::new(stream);

    let (mut sender, conn) = http1::handshake::<_, http_body_util::Full<Bytes>>(io)
        .await
        .map_err(TransportError::Handshake)?;
    tokio::spawn(async move {
        if let Err(err) = conn.await {
            tracing::debug!(error = %err, "gateway transport connection closed with error");
        }
    });

    let (parts, body) = req.into_parts();
    let req = Request::from_parts(parts, http_body_util::Full::new(body));
    let resp = sender
        .send_request(req)
        .await
        .map_err(TransportError::Request)?;
    let (parts, body) = resp.into_parts();
    let collected = body
        .collect()
        .await
        .map_err(TransportError::Request)?
        .to_bytes();
    Ok(Response::from_parts(parts, collected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tokio::net::TcpListener;

    async fn spawn_echo_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);
            let service = hyper::service::service_fn(|_req: Request<hyper::body::Incoming>| async move {
                Ok::<_, Infallible>(Response::new(http_body_util::Full::new(Bytes::from_static(
                    b"ok",
                ))))
            });
            let _ = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service)
                .await;
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn sends_request_and_reads_response_body() {
        let (addr, _handle) = spawn_echo_server().await;
        let req = Request::builder()
            .method("GET")
            .uri("/")
            .header("host", addr.to_string())
            .body(Bytes::new())
            .unwrap();
        let resp = send_once(&addr.ip().to_string(), addr.port(), req, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.into_body(), Bytes::from_static(b"ok"));
    }

    #[tokio::test]
    async fn timeout_fires_when_nothing_listens() {
        let req = Request::builder()
            .method("GET")
            .uri("/")
            .body(Bytes::new())
            .unwrap();
        let result = send_once("10.255.255.1", 9, req, Duration::from_millis(50)).await;
        assert!(result.is_err());
    }
}
