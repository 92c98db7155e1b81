//! Inbound Signature Verifier (§4.9): HMAC/RSA verification of a canonical
//! signing string, with timestamp freshness and optional key-id pinning.
//!
//! The canonical string (§6, bit-exact) is
//! `{method}\n{path+query}\n{unix_ts}\n{hex_sha256_body}`. The body is read,
//! hashed, then restored via a fresh [`TakoBody`] so downstream policies
//! still see it — the same buffer-then-replay technique
//! [`crate::gateway::idempotency`] and [`crate::gateway::graphql`] use.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use rsa::pkcs1v15::VerifyingKey as Pkcs1VerifyingKey;
use rsa::pss::VerifyingKey as PssVerifyingKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};

use crate::body::TakoBody;
use crate::gateway::types::{GatewayNext, GatewayRequest};
use crate::types::Response;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algorithm {
    HmacSha256,
    RsaSha256,
    RsaPssSha256,
}

impl Algorithm {
    fn wire_name(self) -> &'static str {
        match self {
            Algorithm::HmacSha256 => "hmac-sha256",
            Algorithm::RsaSha256 => "rsa-sha256",
            Algorithm::RsaPssSha256 => "rsa-pss-sha256",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("hmac secret must be at least 32 bytes after base64 decoding")]
    HmacSecretTooShort,
    #[error("invalid base64 secret: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("invalid RSA public key: {0}")]
    InvalidRsaKey(#[from] rsa::pkcs8::spki::Error),
}

enum KeyMaterial {
    Hmac(Vec<u8>),
    Rsa(RsaPublicKey),
}

pub struct Config {
    pub algorithm: Algorithm,
    pub header_name: http::HeaderName,
    pub max_clock_skew: std::time::Duration,
    pub expected_key_id: Option<String>,
    pub key_id_header: http::HeaderName,
    pub shadow_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::HmacSha256,
            header_name: http::HeaderName::from_static("signature"),
            max_clock_skew: std::time::Duration::from_secs(300),
            expected_key_id: None,
            key_id_header: http::HeaderName::from_static("key-id"),
            shadow_mode: false,
        }
    }
}

pub struct ConfigBuilder(Config);

impl ConfigBuilder {
    pub fn new(algorithm: Algorithm) -> Self {
        Self(Config {
            algorithm,
            ..Config::default()
        })
    }

    pub fn header_name(mut self, name: http::HeaderName) -> Self {
        self.0.header_name = name;
        self
    }

    pub fn max_clock_skew(mut self, skew: std::time::Duration) -> Self {
        self.0.max_clock_skew = skew;
        self
    }

    pub fn expected_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.0.expected_key_id = Some(key_id.into());
        self
    }

    pub fn shadow_mode(mut self, enabled: bool) -> Self {
        self.0.shadow_mode = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.0
    }
}

/// Signature verifier: owns parsed/validated key material plus its config.
/// Construction-time checks (§4.9) reject undersized HMAC secrets or
/// unparseable RSA public keys before the route can even be built.
pub struct Verifier {
    config: Config,
    key: KeyMaterial,
}

impl Verifier {
    pub fn hmac(config: Config, base64_secret: &str) -> Result<Self, BuildError> {
        let secret = BASE64.decode(base64_secret)?;
        if secret.len() < 32 {
            return Err(BuildError::HmacSecretTooShort);
        }
        Ok(Self {
            config,
            key: KeyMaterial::Hmac(secret),
        })
    }

    pub fn rsa(config: Config, public_key_pem: &str) -> Result<Self, BuildError> {
        let key = RsaPublicKey::from_public_key_pem(public_key_pem)?;
        Ok(Self {
            config,
            key: KeyMaterial::Rsa(key),
        })
    }

    fn canonical_string(method: &http::Method, path_and_query: &str, ts: &str, body_hash_hex: &str) -> String {
        format!("{method}\n{path_and_query}\n{ts}\n{body_hash_hex}")
    }

    fn verify(&self, signing_string: &str, hex_sig: &str) -> bool {
        let Ok(sig_bytes) = hex::decode(hex_sig) else {
            return false;
        };
        match (&self.key, self.config.algorithm) {
            (KeyMaterial::Hmac(secret), Algorithm::HmacSha256) => {
                let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret) else {
                    return false;
                };
                mac.update(signing_string.as_bytes());
                mac.verify_slice(&sig_bytes).is_ok()
            }
            (KeyMaterial::Rsa(key), Algorithm::RsaSha256) => {
                let verifying_key = Pkcs1VerifyingKey::<Sha256>::new(key.clone());
                let Ok(sig) = rsa::pkcs1v15::Signature::try_from(sig_bytes.as_slice()) else {
                    return false;
                };
                verifying_key.verify(signing_string.as_bytes(), &sig).is_ok()
            }
            (KeyMaterial::Rsa(key), Algorithm::RsaPssSha256) => {
                let verifying_key = PssVerifyingKey::<Sha256>::new(key.clone());
                let Ok(sig) = rsa::pss::Signature::try_from(sig_bytes.as_slice()) else {
                    return false;
                };
                verifying_key.verify(signing_string.as_bytes(), &sig).is_ok()
            }
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("missing or invalid timestamp")]
    BadTimestamp,
    #[error("timestamp outside allowed skew")]
    TooOld,
    #[error("missing signature header")]
    MissingSignature,
    #[error("signature header algorithm prefix mismatch")]
    AlgorithmMismatch,
    #[error("key-id mismatch")]
    KeyIdMismatch,
    #[error("signature verification failed")]
    BadSignature,
}

fn unauthorized() -> Response {
    hyper::Response::builder()
        .status(http::StatusCode::UNAUTHORIZED)
        .body(TakoBody::from("{\"error\":{\"message\":\"signature verification failed\"}}"))
        .unwrap()
}

/// Builds the named middleware slot for inbound signature verification (§4.9).
pub fn middleware(verifier: Arc<Verifier>) -> crate::gateway::types::BoxGatewayMiddleware {
    Arc::new(move |req: GatewayRequest, next: GatewayNext| {
        let verifier = verifier.clone();
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let bytes = body.collect().await.map(|c| c.to_bytes()).unwrap_or_default();
            let body_hash_hex = hex::encode(Sha256::digest(&bytes));

            let result = check(&verifier, &parts, &body_hash_hex);
            let req = http::Request::from_parts(parts, TakoBody::from(bytes));

            match result {
                Ok(()) => next.run(req).await,
                Err(err) => {
                    if verifier.config.shadow_mode {
                        tracing::warn!(error = %err, "signature verification failed (shadow mode, passing through)");
                        next.run(req).await
                    } else {
                        tracing::warn!(error = %err, "signature verification failed");
                        unauthorized()
                    }
                }
            }
        })
    })
}

fn check(verifier: &Verifier, parts: &http::request::Parts, body_hash_hex: &str) -> Result<(), VerifyError> {
    if let Some(expected) = &verifier.config.expected_key_id {
        let actual = parts.headers.get(&verifier.config.key_id_header).and_then(|v| v.to_str().ok());
        if actual != Some(expected.as_str()) {
            return Err(VerifyError::KeyIdMismatch);
        }
    }

    let ts_header = parts
        .headers
        .get("x-signature-timestamp")
        .and_then(|v| v.to_str().ok())
        .ok_or(VerifyError::BadTimestamp)?;
    let ts: i64 = ts_header.parse().map_err(|_| VerifyError::BadTimestamp)?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
    if (now - ts).unsigned_abs() > verifier.config.max_clock_skew.as_secs() {
        return Err(VerifyError::TooOld);
    }

    let raw = parts
        .headers
        .get(&verifier.config.header_name)
        .and_then(|v| v.to_str().ok())
        .ok_or(VerifyError::MissingSignature)?;
    let expected_prefix = format!("{}=", verifier.config.algorithm.wire_name());
    let hex_sig = raw.strip_prefix(&expected_prefix).ok_or(VerifyError::AlgorithmMismatch)?;

    let path_and_query = match parts.uri.query() {
        Some(q) => format!("{}?{}", parts.uri.path(), q),
        None => parts.uri.path().to_string(),
    };
    let signing_string = Verifier::canonical_string(&parts.method, &path_and_query, ts_header, body_hash_hex);

    if verifier.verify(&signing_string, hex_sig) {
        Ok(())
    } else {
        Err(VerifyError::BadSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::pipeline::wrap;
    use crate::gateway::types::BoxGatewayHandler;

    fn sign(secret: &[u8], method: &str, path: &str, ts: &str, body: &[u8]) -> String {
        let body_hash = hex::encode(Sha256::digest(body));
        let signing_string = format!("{method}\n{path}\n{ts}\n{body_hash}");
        let mut mac = Hmac::<Sha256>::new_from_slice(secret).unwrap();
        mac.update(signing_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn now_str() -> String {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs().to_string()
    }

    fn mk_req(ts: &str, sig_hex: &str, body: &'static str) -> GatewayRequest {
        http::Request::builder()
            .method(http::Method::POST)
            .uri("/payments")
            .header("x-signature-timestamp", ts)
            .header("signature", format!("hmac-sha256={sig_hex}"))
            .body(TakoBody::from(body))
            .unwrap()
    }

    fn ok_endpoint() -> BoxGatewayHandler {
        Arc::new(|_req| Box::pin(async move { hyper::Response::builder().status(200).body(TakoBody::empty()).unwrap() }))
    }

    #[test]
    fn hmac_secret_too_short_rejected_at_construction() {
        let short = BASE64.encode(vec![1u8; 10]);
        let err = Verifier::hmac(Config::default(), &short).unwrap_err();
        assert!(matches!(err, BuildError::HmacSecretTooShort));
    }

    #[tokio::test]
    async fn valid_signature_passes_through() {
        let secret = vec![7u8; 32];
        let b64 = BASE64.encode(&secret);
        let verifier = Arc::new(Verifier::hmac(Config::default(), &b64).unwrap());
        let ts = now_str();
        let sig = sign(&secret, "POST", "/payments", &ts, b"hello");
        let mw = middleware(verifier);
        let pipeline = wrap(vec![mw], ok_endpoint());
        let resp = pipeline(mk_req(&ts, &sig, "hello")).await;
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn tampered_body_fails() {
        let secret = vec![7u8; 32];
        let b64 = BASE64.encode(&secret);
        let verifier = Arc::new(Verifier::hmac(Config::default(), &b64).unwrap());
        let ts = now_str();
        let sig = sign(&secret, "POST", "/payments", &ts, b"hello");
        let mw = middleware(verifier);
        let pipeline = wrap(vec![mw], ok_endpoint());
        let resp = pipeline(mk_req(&ts, &sig, "tampered")).await;
        assert_eq!(resp.status(), 401);
    }

    #[tokio::test]
    async fn stale_timestamp_rejected() {
        let secret = vec![7u8; 32];
        let b64 = BASE64.encode(&secret);
        let verifier = Arc::new(Verifier::hmac(Config::default(), &b64).unwrap());
        let old_ts = (SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() - 10_000).to_string();
        let sig = sign(&secret, "POST", "/payments", &old_ts, b"hello");
        let mw = middleware(verifier);
        let pipeline = wrap(vec![mw], ok_endpoint());
        let resp = pipeline(mk_req(&old_ts, &sig, "hello")).await;
        assert_eq!(resp.status(), 401);
    }

    #[tokio::test]
    async fn shadow_mode_passes_through_despite_failure() {
        let secret = vec![7u8; 32];
        let b64 = BASE64.encode(&secret);
        let cfg = ConfigBuilder::new(Algorithm::HmacSha256).shadow_mode(true).build();
        let verifier = Arc::new(Verifier::hmac(cfg, &b64).unwrap());
        let ts = now_str();
        let mw = middleware(verifier);
        let pipeline = wrap(vec![mw], ok_endpoint());
        let resp = pipeline(mk_req(&ts, "deadbeef", "hello")).await;
        assert_eq!(resp.status(), 200);
    }
}
