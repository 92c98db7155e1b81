//! HTTP-based [`RemoteBackend`] implementation for the remote cache store
//! (§4.3), reached over [`crate::gateway::transport`].
//!
//! The wire protocol is deliberately simple and REST-shaped so it can sit in
//! front of any key-value service an embedding application already runs:
//! `GET {base_path}/{key}`, `PUT {base_path}/{key}` with an `X-TTL-Ms`
//! header, `DELETE {base_path}/{key}`, and `GET {base_path}?prefix=&cursor=&batch=`
//! returning a JSON `{"keys": [...], "next_cursor": "..."}` for scans.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, StatusCode};
use serde::Deserialize;

use crate::gateway::cache::store::RemoteBackend;
use crate::gateway::transport::send_once;

#[derive(Deserialize)]
struct ScanResponse {
    keys: Vec<String>,
    next_cursor: Option<String>,
}

/// A [`RemoteBackend`] that speaks a small REST convention to a single host.
pub struct HttpRemoteBackend {
    host: String,
    port: u16,
    base_path: String,
    single_op_timeout: Duration,
    scan_timeout: Duration,
}

impl HttpRemoteBackend {
    pub fn new(host: impl Into<String>, port: u16, base_path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            base_path: base_path.into(),
            single_op_timeout: Duration::from_millis(100),
            scan_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeouts(mut self, single_op: Duration, scan: Duration) -> Self {
        self.single_op_timeout = single_op;
        self.scan_timeout = scan;
        self
    }

    fn key_path(&self, key: &str) -> String {
        format!("{}/{}", self.base_path, urlencoding::encode(key))
    }
}

#[async_trait]
impl RemoteBackend for HttpRemoteBackend {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Bytes>> {
        let req = Request::builder()
            .method("GET")
            .uri(self.key_path(key))
            .header("host", &self.host)
            .body(Bytes::new())?;
        let resp = send_once(&self.host, self.port, req, self.single_op_timeout).await?;
        match resp.status() {
            StatusCode::OK => Ok(Some(resp.into_body())),
            StatusCode::NOT_FOUND => Ok(None),
            other => Err(anyhow::anyhow!("unexpected status {other} from remote cache get")),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> anyhow::Result<()> {
        let req = Request::builder()
            .method("PUT")
            .uri(self.key_path(key))
            .header("host", &self.host)
            .header("x-ttl-ms", ttl.as_millis().to_string())
            .body(value)?;
        let resp = send_once(&self.host, self.port, req, self.single_op_timeout).await?;
        if !resp.status().is_success() {
            anyhow::bail!("unexpected status {} from remote cache set", resp.status());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let req = Request::builder()
            .method("DELETE")
            .uri(self.key_path(key))
            .header("host", &self.host)
            .body(Bytes::new())?;
        let resp = send_once(&self.host, self.port, req, self.single_op_timeout).await?;
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            anyhow::bail!("unexpected status {} from remote cache delete", resp.status());
        }
        Ok(())
    }

    async fn scan(
        &self,
        prefix: &str,
        cursor: Option<String>,
        batch: usize,
    ) -> anyhow::Result<(Vec<String>, Option<String>)> {
        let cursor_qs = cursor
            .map(|c| format!("&cursor={}", urlencoding::encode(&c)))
            .unwrap_or_default();
        let uri = format!(
            "{}?prefix={}&batch={}{}",
            self.base_path,
            urlencoding::encode(prefix),
            batch,
            cursor_qs
        );
        let req = Request::builder()
            .method("GET")
            .uri(uri)
            .header("host", &self.host)
            .body(Bytes::new())?;
        let resp = send_once(&self.host, self.port, req, self.scan_timeout).await?;
        if !resp.status().is_success() {
            anyhow::bail!("unexpected status {} from remote cache scan", resp.status());
        }
        let parsed: ScanResponse = serde_json::from_slice(resp.body())?;
        Ok((parsed.keys, parsed.next_cursor))
    }
}
