//! Idempotency (§4.5): at-most-once replay plus in-flight coalescing for
//! configured methods, keyed by a caller-provided header and optionally
//! scoped by tenant/client.
//!
//! Grounded on the host framework's `DashMap`-backed request-deduplication
//! shape (`InFlight` / `Completed` entries, a background janitor task, a
//! SHA-1 payload signature to detect key reuse with a different body). This
//! version operates on [`GatewayRequest`] so the buffered body can be
//! replayed through the rest of the pipeline, and adds tenant/client key
//! scoping plus a configurable enforce-or-pass-through policy for a missing
//! header.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use http::{HeaderName, HeaderValue, Method, StatusCode, header::CONTENT_TYPE};
use http_body_util::BodyExt;
use sha1::{Digest, Sha1};
use tokio::sync::Notify;
use tokio::time::timeout;

use crate::body::TakoBody;
use crate::gateway::types::{GatewayNext, GatewayRequest};
use crate::types::Response;

#[derive(Clone, Copy, Debug)]
pub enum Scope {
    KeyOnly,
    MethodAndPath,
}

#[derive(Clone)]
pub struct Config {
    pub header: HeaderName,
    pub methods: Vec<Method>,
    pub ttl: Duration,
    pub scope: Scope,
    pub enforce: bool,
    pub tenant_header: Option<HeaderName>,
    pub client_header: Option<HeaderName>,
    pub inflight_wait_timeout: Option<Duration>,
    pub max_cached_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            header: HeaderName::from_static("idempotency-key"),
            methods: vec![Method::POST, Method::PUT, Method::PATCH],
            ttl: Duration::from_secs(86400),
            scope: Scope::MethodAndPath,
            enforce: false,
            tenant_header: None,
            client_header: None,
            inflight_wait_timeout: None,
            max_cached_body_bytes: 1024 * 1024,
        }
    }
}

#[derive(Default)]
pub struct ConfigBuilder(Config);

impl ConfigBuilder {
    pub fn new() -> Self {
        Self(Config::default())
    }

    pub fn header(mut self, h: HeaderName) -> Self {
        self.0.header = h;
        self
    }

    pub fn methods(mut self, m: Vec<Method>) -> Self {
        self.0.methods = m;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.0.ttl = ttl;
        self
    }

    pub fn scope(mut self, s: Scope) -> Self {
        self.0.scope = s;
        self
    }

    pub fn enforce(mut self, enforce: bool) -> Self {
        self.0.enforce = enforce;
        self
    }

    pub fn tenant_header(mut self, h: HeaderName) -> Self {
        self.0.tenant_header = Some(h);
        self
    }

    pub fn client_header(mut self, h: HeaderName) -> Self {
        self.0.client_header = Some(h);
        self
    }

    pub fn inflight_wait_timeout(mut self, t: Duration) -> Self {
        self.0.inflight_wait_timeout = Some(t);
        self
    }

    pub fn max_cached_body_bytes(mut self, n: usize) -> Self {
        self.0.max_cached_body_bytes = n;
        self
    }

    pub fn build(self) -> Config {
        self.0
    }
}

#[derive(Clone)]
struct CachedResponse {
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Bytes,
}

#[derive(Clone)]
struct Completed {
    payload_sig: [u8; 20],
    cached: Arc<CachedResponse>,
    expires_at: Instant,
}

enum Entry {
    InFlight {
        payload_sig: [u8; 20],
        notify: Arc<Notify>,
    },
    Completed(Completed),
}

impl Clone for Entry {
    fn clone(&self) -> Self {
        match self {
            Entry::InFlight { payload_sig, notify } => Entry::InFlight {
                payload_sig: *payload_sig,
                notify: notify.clone(),
            },
            Entry::Completed(c) => Entry::Completed(c.clone()),
        }
    }
}

/// Store backing the in-flight barrier and completed-response cache. The
/// barrier is independent of any particular request task's lifetime (§9):
/// dropping the task that registered it does not drop the `Notify`, since
/// the map holds its own `Arc` clone.
pub struct Store {
    entries: Arc<DashMap<String, Entry>>,
    janitor_started: AtomicBool,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            janitor_started: AtomicBool::new(false),
        }
    }

    fn spawn_janitor(&self, ttl: Duration) {
        if self.janitor_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let entries = self.entries.clone();
        let interval = ttl.max(Duration::from_secs(60)).min(Duration::from_secs(3600));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                let now = Instant::now();
                entries.retain(|_, v| match v {
                    Entry::Completed(c) => c.expires_at > now,
                    Entry::InFlight { .. } => true,
                });
            }
        });
    }
}

fn scoped_key(cfg: &Config, key: &str, req: &GatewayRequest) -> String {
    let mut scoped = match cfg.scope {
        Scope::KeyOnly => key.to_string(),
        Scope::MethodAndPath => format!("{}|{}|{}", key, req.method(), req.uri().path()),
    };
    if let Some(h) = &cfg.tenant_header
        && let Some(v) = req.headers().get(h).and_then(|v| v.to_str().ok())
    {
        scoped = format!("{scoped}|tenant={v}");
    }
    if let Some(h) = &cfg.client_header
        && let Some(v) = req.headers().get(h).and_then(|v| v.to_str().ok())
    {
        scoped = format!("{scoped}|client={v}");
    }
    scoped
}

fn payload_signature(parts: &http::request::Parts, body: &Bytes) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(parts.method.as_str().as_bytes());
    hasher.update(parts.uri.path().as_bytes());
    if let Some(ct) = parts.headers.get(CONTENT_TYPE) {
        hasher.update(ct.as_bytes());
    }
    hasher.update(body);
    hasher.finalize().into()
}

fn conflict() -> Response {
    hyper::Response::builder()
        .status(StatusCode::CONFLICT)
        .body(TakoBody::empty())
        .unwrap()
}

fn build_response_from_cache(c: &CachedResponse) -> Response {
    let mut builder = hyper::Response::builder().status(c.status);
    for (name, value) in &c.headers {
        builder = builder.header(name, value);
    }
    builder
        .header("x-idempotent-replayed", "true")
        .body(TakoBody::from(c.body.clone()))
        .unwrap()
}

/// Hop-by-hop headers and anything length-specific are dropped; everything
/// else (notably `content-type`, `location`, and `x-*`) is kept.
fn filter_headers(src: &http::HeaderMap) -> Vec<(HeaderName, HeaderValue)> {
    const EXCLUDE: &[&str] = &[
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailer",
        "transfer-encoding",
        "upgrade",
        "content-length",
    ];
    src.iter()
        .filter(|(name, _)| !EXCLUDE.contains(&name.as_str().to_ascii_lowercase().as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Builds the named middleware slot for idempotency (§4.5).
pub fn middleware(config: Config, store: Arc<Store>) -> crate::gateway::types::BoxGatewayMiddleware {
    store.spawn_janitor(config.ttl);
    Arc::new(move |req: GatewayRequest, next: GatewayNext| {
        let config = config.clone();
        let store = store.clone();
        Box::pin(async move { handle(req, next, config, store).await })
    })
}

async fn handle(req: GatewayRequest, next: GatewayNext, config: Config, store: Arc<Store>) -> Response {
    if !config.methods.iter().any(|m| m == req.method()) {
        return next.run(req).await;
    }

    let key = req
        .headers()
        .get(&config.header)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_default();
    if key.is_empty() {
        if config.enforce {
            return hyper::Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(TakoBody::empty())
                .unwrap();
        }
        return next.run(req).await;
    }

    let scoped = scoped_key(&config, &key, &req);
    let (parts, body) = req.into_parts();
    let body_bytes = body.collect().await.map(|c| c.to_bytes()).unwrap_or_default();
    let sig = payload_signature(&parts, &body_bytes);
    let req = http::Request::from_parts(parts, TakoBody::from(body_bytes));

    if let Some(entry) = store.entries.get(&scoped).map(|e| e.clone()) {
        match entry {
            Entry::Completed(c) => {
                if c.payload_sig != sig {
                    return conflict();
                }
                return build_response_from_cache(&c.cached);
            }
            Entry::InFlight { payload_sig, notify } => {
                if payload_sig != sig {
                    return conflict();
                }
                match config.inflight_wait_timeout {
                    Some(d) => {
                        let _ = timeout(d, notify.notified()).await;
                    }
                    None => notify.notified().await,
                }
                match store.entries.get(&scoped).map(|e| e.clone()) {
                    Some(Entry::Completed(c)) if c.payload_sig == sig => build_response_from_cache(&c.cached),
                    Some(Entry::Completed(_)) => conflict(),
                    // Barrier closed without a stored response (cancellation, or
                    // the originator's body exceeded `max_cached_body_bytes`) —
                    // per §4.5 step 2 / §9 Open Question 1, the waiter proceeds
                    // as a fresh originator rather than being rejected.
                    _ => originate(req, next, &config, &store, scoped, sig).await,
                }
            }
        }
    } else {
        originate(req, next, &config, &store, scoped, sig).await
    }
}

/// Registers a fresh in-flight barrier for `scoped`, invokes the terminal
/// handler, and stores (or discards, if oversized) the result, signaling
/// any waiters either way. Shared by the "no existing entry" path and by a
/// waiter that observes its barrier close without a response.
async fn originate(
    req: GatewayRequest,
    next: GatewayNext,
    config: &Config,
    store: &Store,
    scoped: String,
    sig: [u8; 20],
) -> Response {
    let notify = Arc::new(Notify::new());
    store.entries.insert(
        scoped.clone(),
        Entry::InFlight {
            payload_sig: sig,
            notify: notify.clone(),
        },
    );

    let resp = next.run(req).await;
    let (parts, resp_body) = resp.into_parts();
    let collected = resp_body.collect().await.map(|c| c.to_bytes()).unwrap_or_default();

    if collected.len() > config.max_cached_body_bytes {
        store.entries.remove(&scoped);
        notify.notify_waiters();
        return hyper::Response::from_parts(parts, TakoBody::from(collected));
    }

    let cached = Arc::new(CachedResponse {
        status: parts.status,
        headers: filter_headers(&parts.headers),
        body: collected.clone(),
    });
    store.entries.insert(
        scoped,
        Entry::Completed(Completed {
            payload_sig: sig,
            cached,
            expires_at: Instant::now() + config.ttl,
        }),
    );
    notify.notify_waiters();
    hyper::Response::from_parts(parts, TakoBody::from(collected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::pipeline::{wrap};
    use crate::gateway::types::{BoxGatewayHandler};
    use std::sync::atomic::AtomicUsize;

    fn mk_req(method: Method, key: Option<&str>) -> GatewayRequest {
        let mut builder = http::Request::builder().method(method).uri("/orders");
        if let Some(k) = key {
            builder = builder.header("idempotency-key", k);
        }
        builder.body(TakoBody::from("{}")).unwrap()
    }

    fn counting_endpoint() -> (BoxGatewayHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handler: BoxGatewayHandler = Arc::new(move |_req| {
            let c = c.clone();
            Box::pin(async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                hyper::Response::builder()
                    .status(200)
                    .body(TakoBody::from(format!("call-{n}")))
                    .unwrap()
            })
        });
        (handler, count)
    }

    #[tokio::test]
    async fn missing_key_passes_through_when_not_enforced() {
        let store = Arc::new(Store::new());
        let mw = middleware(Config::default(), store);
        let (endpoint, count) = counting_endpoint();
        let pipeline = wrap(vec![mw], endpoint);
        let resp = pipeline(mk_req(Method::POST, None)).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_key_rejected_when_enforced() {
        let store = Arc::new(Store::new());
        let cfg = ConfigBuilder::new().enforce(true).build();
        let mw = middleware(cfg, store);
        let (endpoint, _count) = counting_endpoint();
        let pipeline = wrap(vec![mw], endpoint);
        let resp = pipeline(mk_req(Method::POST, None)).await;
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn replays_cached_response_for_repeated_key() {
        let store = Arc::new(Store::new());
        let mw = middleware(Config::default(), store.clone());
        let (endpoint, count) = counting_endpoint();
        let pipeline = wrap(vec![mw], endpoint);

        let first = pipeline(mk_req(Method::POST, Some("abc"))).await;
        assert_eq!(first.status(), 200);

        let mw2 = middleware(Config::default(), store);
        let pipeline2 = wrap(vec![mw2], {
            let count = count.clone();
            Arc::new(move |_req| {
                let count = count.clone();
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    hyper::Response::builder().status(200).body(TakoBody::from("should-not-run")).unwrap()
                })
            })
        });
        let second = pipeline2(mk_req(Method::POST, Some("abc"))).await;
        assert_eq!(second.headers().get("x-idempotent-replayed").unwrap(), "true");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_payload_same_key_conflicts() {
        let store = Arc::new(Store::new());
        let mw = middleware(Config::default(), store.clone());
        let (endpoint, _count) = counting_endpoint();
        let pipeline = wrap(vec![mw], endpoint);
        let _ = pipeline(mk_req(Method::POST, Some("k1"))).await;

        let mw2 = middleware(Config::default(), store);
        let (endpoint2, _count2) = counting_endpoint();
        let pipeline2 = wrap(vec![mw2], endpoint2);
        let mut differing = mk_req(Method::POST, Some("k1"));
        *differing.body_mut() = TakoBody::from("{\"different\":true}");
        let resp = pipeline2(differing).await;
        assert_eq!(resp.status(), 409);
    }

    #[tokio::test]
    async fn waiter_proceeds_after_barrier_closes_without_a_stored_response() {
        // The originator's response body exceeds `max_cached_body_bytes`, so
        // its barrier closes without storing anything (§4.5). A concurrent
        // waiter on the same key must re-run the terminal handler itself
        // (Proceed), not be rejected with 409.
        let store = Arc::new(Store::new());
        let cfg = ConfigBuilder::new().max_cached_body_bytes(4).build();
        let count = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let endpoint: BoxGatewayHandler = {
            let count = count.clone();
            let release = release.clone();
            Arc::new(move |_req| {
                let count = count.clone();
                let release = release.clone();
                Box::pin(async move {
                    let n = count.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        // Hold the originator open until the waiter has had a
                        // chance to observe the in-flight barrier.
                        release.notified().await;
                    }
                    hyper::Response::builder()
                        .status(200)
                        .body(TakoBody::from("oversized-response-body"))
                        .unwrap()
                })
            })
        };
        let pipeline = Arc::new(wrap(vec![middleware(cfg, store)], endpoint));

        let originator = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline(mk_req(Method::POST, Some("k1"))).await })
        };
        // Give the originator task a chance to register its in-flight barrier.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let waiter = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline(mk_req(Method::POST, Some("k1"))).await })
        };
        // Give the waiter a chance to observe the in-flight entry and start
        // waiting on its barrier before we let the originator finish.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        release.notify_waiters();

        let originator_resp = originator.await.unwrap();
        let waiter_resp = waiter.await.unwrap();

        assert_eq!(originator_resp.status(), 200);
        assert_eq!(waiter_resp.status(), 200);
        assert!(!waiter_resp.headers().contains_key("x-idempotent-replayed"));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
