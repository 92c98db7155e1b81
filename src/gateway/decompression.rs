//! Decompression (§4.10): request body `Content-Encoding` unwrapping with a
//! configurable byte limit against zip-bomb bodies.
//!
//! The host framework's own [`crate::plugins::compression`] only compresses
//! *outbound* responses; this is the inbound mirror. Since the gateway
//! already buffers the whole body once to derive cache keys/signatures
//! elsewhere in the chain, decompression here also works off a fully
//! buffered input rather than true streaming — the byte limit is enforced
//! by capping how much the decoder is allowed to produce, which is what
//! matters for the zip-bomb threat model regardless of how the input side
//! is read.

use std::io::Read;
use std::sync::Arc;

use http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use http_body_util::BodyExt;

use crate::body::TakoBody;
use crate::gateway::types::{GatewayNext, GatewayRequest};
use crate::types::Response;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algorithm {
    Gzip,
    Deflate,
    Brotli,
    Zstd,
}

impl Algorithm {
    fn from_header(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Some(Algorithm::Gzip),
            "deflate" => Some(Algorithm::Deflate),
            "br" => Some(Algorithm::Brotli),
            "zstd" => Some(Algorithm::Zstd),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub enabled: Vec<Algorithm>,
    pub max_decompressed_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: vec![Algorithm::Gzip, Algorithm::Deflate, Algorithm::Brotli, Algorithm::Zstd],
            max_decompressed_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Default)]
pub struct ConfigBuilder(Config);

impl ConfigBuilder {
    pub fn new() -> Self {
        Self(Config::default())
    }

    pub fn enabled(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.0.enabled = algorithms;
        self
    }

    pub fn max_decompressed_bytes(mut self, n: usize) -> Self {
        self.0.max_decompressed_bytes = n;
        self
    }

    pub fn build(self) -> Config {
        self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecompressionError {
    #[error("decompressed body exceeds the configured byte limit")]
    TooLarge,
    #[error("malformed compressed body: {0}")]
    Malformed(String),
}

/// Reads at most `limit + 1` bytes from `reader`; if the cap is hit, returns
/// [`DecompressionError::TooLarge`] instead of silently truncating.
fn read_bounded(mut reader: impl Read, limit: usize) -> Result<Vec<u8>, DecompressionError> {
    let mut out = Vec::with_capacity(limit.min(64 * 1024));
    let mut chunk = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut chunk).map_err(|e| DecompressionError::Malformed(e.to_string()))?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
        if out.len() > limit {
            return Err(DecompressionError::TooLarge);
        }
    }
    Ok(out)
}

fn decompress(algorithm: Algorithm, input: &[u8], limit: usize) -> Result<Vec<u8>, DecompressionError> {
    match algorithm {
        Algorithm::Gzip => read_bounded(flate2::read::GzDecoder::new(input), limit),
        Algorithm::Deflate => read_bounded(flate2::read::DeflateDecoder::new(input), limit),
        Algorithm::Brotli => read_bounded(brotli::Decompressor::new(input, 4096), limit),
        Algorithm::Zstd => {
            let decoder = zstd::stream::read::Decoder::new(input).map_err(|e| DecompressionError::Malformed(e.to_string()))?;
            read_bounded(decoder, limit)
        }
    }
}

fn bad_request(message: &str) -> Response {
    hyper::Response::builder()
        .status(http::StatusCode::BAD_REQUEST)
        .body(TakoBody::from(format!("{{\"error\":{{\"message\":\"{message}\"}}}}")))
        .unwrap()
}

/// Builds the named middleware slot for request decompression (§4.10).
/// Only fires when `Content-Encoding` names an enabled algorithm; otherwise
/// the request passes through untouched.
pub fn middleware(config: Arc<Config>) -> crate::gateway::types::BoxGatewayMiddleware {
    Arc::new(move |req: GatewayRequest, next: GatewayNext| {
        let config = config.clone();
        Box::pin(async move {
            let Some(algorithm) = req
                .headers()
                .get(CONTENT_ENCODING)
                .and_then(|v| v.to_str().ok())
                .and_then(Algorithm::from_header)
                .filter(|a| config.enabled.contains(a))
            else {
                return next.run(req).await;
            };

            let (mut parts, body) = req.into_parts();
            let compressed = match body.collect().await {
                Ok(c) => c.to_bytes(),
                Err(_) => return bad_request("failed to read request body"),
            };

            match decompress(algorithm, &compressed, config.max_decompressed_bytes) {
                Ok(decompressed) => {
                    parts.headers.remove(CONTENT_ENCODING);
                    parts.headers.remove(CONTENT_LENGTH);
                    let req = http::Request::from_parts(parts, TakoBody::from(decompressed));
                    next.run(req).await
                }
                Err(DecompressionError::TooLarge) => bad_request("decompressed body exceeds limit"),
                Err(DecompressionError::Malformed(msg)) => bad_request(&format!("malformed compressed body: {msg}")),
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::pipeline::wrap;
    use crate::gateway::types::BoxGatewayHandler;
    use std::io::Write;

    fn gzip_bytes(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn echo_endpoint() -> BoxGatewayHandler {
        Arc::new(|req| {
            Box::pin(async move {
                let (_, body) = req.into_parts();
                let bytes = body.collect().await.unwrap().to_bytes();
                hyper::Response::builder().status(200).body(TakoBody::from(bytes)).unwrap()
            })
        })
    }

    fn mk_req(body: Vec<u8>, encoding: &str) -> GatewayRequest {
        http::Request::builder()
            .method(http::Method::POST)
            .uri("/x")
            .header(CONTENT_ENCODING, encoding)
            .body(TakoBody::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn gzip_body_is_decompressed_before_reaching_backend() {
        let compressed = gzip_bytes(b"hello world");
        let mw = middleware(Arc::new(Config::default()));
        let pipeline = wrap(vec![mw], echo_endpoint());
        let resp = pipeline(mk_req(compressed, "gzip")).await;
        assert_eq!(resp.status(), 200);
        let (_, body) = resp.into_parts();
        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hello world");
    }

    #[tokio::test]
    async fn oversized_decompressed_body_returns_400() {
        let compressed = gzip_bytes(&vec![b'a'; 10_000]);
        let cfg = ConfigBuilder::new().max_decompressed_bytes(100).build();
        let mw = middleware(Arc::new(cfg));
        let pipeline = wrap(vec![mw], echo_endpoint());
        let resp = pipeline(mk_req(compressed, "gzip")).await;
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn unrecognized_encoding_passes_through_untouched() {
        let mw = middleware(Arc::new(Config::default()));
        let pipeline = wrap(vec![mw], echo_endpoint());
        let resp = pipeline(mk_req(b"plain".to_vec(), "identity")).await;
        assert_eq!(resp.status(), 200);
        let (_, body) = resp.into_parts();
        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"plain");
    }
}
