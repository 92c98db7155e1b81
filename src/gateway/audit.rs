//! Audit Logger (§4.7): bounded async batching of per-request audit entries
//! to a webhook, with sampling, capture limits, and retry-with-backoff
//! delivery.
//!
//! Grounded on the same "bounded channel + background worker" shape the host
//! framework's [`crate::plugins::rate_limiter`] uses for its replenishment
//! task, and on [`crate::gateway::transport`] for the outbound POST.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use http::Method;
use http_body_util::BodyExt;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::body::TakoBody;
use crate::gateway::transport::{TransportError, send_once};
use crate::gateway::types::{GatewayNext, GatewayRequest};
use crate::types::Response;

/// A single audit record, shaped per §6's webhook payload.
#[derive(Serialize, Clone)]
pub struct AuditEntry {
    pub timestamp: String,
    pub request_id: String,
    pub route_id: String,
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub client_ip: String,
    pub status_code: u16,
    pub duration_ns: u128,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
}

#[derive(Clone)]
pub struct Config {
    pub route_id: String,
    pub webhook_host: String,
    pub webhook_port: u16,
    pub webhook_path: String,
    pub webhook_headers: Vec<(String, String)>,
    pub queue_size: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub capture_request_body: bool,
    pub capture_response_body: bool,
    pub max_captured_body_bytes: usize,
    pub sample_rate: f64,
    pub method_allowlist: Option<Vec<Method>>,
    pub status_allowlist: Option<Vec<u16>>,
}

impl Config {
    pub fn new(route_id: impl Into<String>, webhook_host: impl Into<String>, webhook_port: u16, webhook_path: impl Into<String>) -> Self {
        Self {
            route_id: route_id.into(),
            webhook_host: webhook_host.into(),
            webhook_port,
            webhook_path: webhook_path.into(),
            webhook_headers: Vec::new(),
            queue_size: 1000,
            batch_size: 10,
            flush_interval: Duration::from_secs(5),
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            capture_request_body: false,
            capture_response_body: false,
            max_captured_body_bytes: 64 * 1024,
            sample_rate: 1.0,
            method_allowlist: None,
            status_allowlist: None,
        }
    }
}

#[derive(Default)]
pub struct ConfigBuilder(Option<Config>);

impl ConfigBuilder {
    pub fn new(route_id: impl Into<String>, webhook_host: impl Into<String>, webhook_port: u16, webhook_path: impl Into<String>) -> Self {
        Self(Some(Config::new(route_id, webhook_host, webhook_port, webhook_path)))
    }

    fn cfg(&mut self) -> &mut Config {
        self.0.as_mut().expect("ConfigBuilder used after build")
    }

    pub fn queue_size(mut self, n: usize) -> Self {
        self.cfg().queue_size = n;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.cfg().batch_size = n;
        self
    }

    pub fn flush_interval(mut self, d: Duration) -> Self {
        self.cfg().flush_interval = d;
        self
    }

    pub fn capture_request_body(mut self, enabled: bool, max_bytes: usize) -> Self {
        self.cfg().capture_request_body = enabled;
        self.cfg().max_captured_body_bytes = max_bytes;
        self
    }

    pub fn capture_response_body(mut self, enabled: bool) -> Self {
        self.cfg().capture_response_body = enabled;
        self
    }

    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.cfg().sample_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn method_allowlist(mut self, methods: Vec<Method>) -> Self {
        self.cfg().method_allowlist = Some(methods);
        self
    }

    pub fn status_allowlist(mut self, statuses: Vec<u16>) -> Self {
        self.cfg().status_allowlist = Some(statuses);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cfg().webhook_headers.push((name.into(), value.into()));
        self
    }

    pub fn build(mut self) -> Config {
        self.0.take().expect("ConfigBuilder used after build")
    }
}

/// Counters exposed for an embedding app to export without a metrics dependency.
#[derive(Default)]
pub struct AuditStats {
    pub enqueued: AtomicU64,
    pub dropped: AtomicU64,
    pub flushed_batches: AtomicU64,
    pub delivery_errors: AtomicU64,
}

/// The audit logger: a bounded producer handle plus a background worker
/// that batches and delivers entries. Constructed once per route.
pub struct AuditLogger {
    tx: mpsc::Sender<AuditEntry>,
    stats: Arc<AuditStats>,
    config: Config,
}

impl AuditLogger {
    /// Spawns the background batching/delivery worker and returns a handle.
    pub fn spawn(config: Config) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.queue_size);
        let stats = Arc::new(AuditStats::default());
        let worker_config = config.clone();
        let worker_stats = stats.clone();
        tokio::spawn(worker_loop(worker_config, rx, worker_stats));
        Arc::new(Self { tx, stats, config })
    }

    pub fn stats(&self) -> &AuditStats {
        &self.stats
    }

    fn sampled(&self) -> bool {
        if self.config.sample_rate >= 1.0 {
            return true;
        }
        if self.config.sample_rate <= 0.0 {
            return false;
        }
        rand::random::<f64>() < self.config.sample_rate
    }

    fn allowed(&self, method: &Method, status: u16) -> bool {
        if let Some(methods) = &self.config.method_allowlist
            && !methods.iter().any(|m| m == method)
        {
            return false;
        }
        if let Some(statuses) = &self.config.status_allowlist
            && !statuses.contains(&status)
        {
            return false;
        }
        true
    }

    /// Non-blocking enqueue; overflow increments the dropped counter instead
    /// of applying backpressure to the request.
    fn enqueue(&self, entry: AuditEntry) {
        match self.tx.try_send(entry) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

async fn worker_loop(config: Config, mut rx: mpsc::Receiver<AuditEntry>, stats: Arc<AuditStats>) {
    let mut batch = Vec::with_capacity(config.batch_size);
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_entry = rx.recv() => {
                match maybe_entry {
                    Some(entry) => {
                        batch.push(entry);
                        if batch.len() >= config.batch_size {
                            flush(&config, &mut batch, &stats).await;
                        }
                    }
                    None => {
                        // Channel closed: drain whatever is left, flush, and exit.
                        flush(&config, &mut batch, &stats).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(&config, &mut batch, &stats).await;
            }
        }
    }
}

async fn flush(config: &Config, batch: &mut Vec<AuditEntry>, stats: &Arc<AuditStats>) {
    if batch.is_empty() {
        return;
    }
    let payload = std::mem::take(batch);
    let body = match serde_json::to_vec(&payload) {
        Ok(b) => b,
        Err(err) => {
            tracing::warn!(error = %err, "audit batch serialization failed, dropping batch");
            stats.delivery_errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    let mut attempt = 0u32;
    let mut backoff = config.initial_backoff;
    loop {
        let mut builder = http::Request::builder()
            .method("POST")
            .uri(&config.webhook_path)
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(http::header::HOST, &config.webhook_host);
        for (name, value) in &config.webhook_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let req = match builder.body(bytes::Bytes::from(body.clone())) {
            Ok(r) => r,
            Err(_) => return,
        };

        match send_once(&config.webhook_host, config.webhook_port, req, Duration::from_secs(10)).await {
            Ok(resp) if resp.status().is_success() => {
                stats.flushed_batches.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Ok(resp) if resp.status().is_client_error() => {
                // 4xx is a terminal failure, no retry.
                tracing::warn!(status = %resp.status(), "audit webhook rejected batch");
                stats.delivery_errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Ok(resp) => {
                tracing::debug!(status = %resp.status(), attempt, "audit webhook delivery failed, retrying");
            }
            Err(TransportError::Timeout(_)) | Err(_) => {
                tracing::debug!(attempt, "audit webhook transport error, retrying");
            }
        }

        attempt += 1;
        if attempt > config.max_retries {
            stats.delivery_errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff *= 2;
    }
}

fn client_ip(req: &GatewayRequest) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .map(str::to_string)
        .or_else(|| req.extensions().get::<std::net::SocketAddr>().map(|a| a.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn truncate(bytes: &[u8], max: usize) -> String {
    let end = bytes.len().min(max);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Builds the named middleware slot for audit logging (§4.7). Request/response
/// capture happens inline (this policy already buffers both to compute
/// `duration_ns`); the actual webhook delivery is fully asynchronous via the
/// logger's background worker.
pub fn middleware(logger: Arc<AuditLogger>) -> crate::gateway::types::BoxGatewayMiddleware {
    Arc::new(move |req: GatewayRequest, next: GatewayNext| {
        let logger = logger.clone();
        Box::pin(async move {
            let start = std::time::Instant::now();
            let method = req.method().clone();
            let path = req.uri().path().to_string();
            let query = req.uri().query().map(str::to_string);
            let ip = client_ip(&req);
            let request_id = req
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            let (parts, body) = req.into_parts();
            let req_bytes = body.collect().await.map(|c| c.to_bytes()).unwrap_or_default();
            let captured_request_body = if logger.config.capture_request_body {
                Some(truncate(&req_bytes, logger.config.max_captured_body_bytes))
            } else {
                None
            };
            let req = http::Request::from_parts(parts, TakoBody::from(req_bytes));

            let resp: Response = next.run(req).await;
            let duration = start.elapsed();
            let (resp_parts, resp_body) = resp.into_parts();
            let resp_bytes = resp_body.collect().await.map(|c| c.to_bytes()).unwrap_or_default();
            let status = resp_parts.status.as_u16();

            if logger.sampled() && logger.allowed(&method, status) {
                let captured_response_body = if logger.config.capture_response_body {
                    Some(truncate(&resp_bytes, logger.config.max_captured_body_bytes))
                } else {
                    None
                };
                logger.enqueue(AuditEntry {
                    timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
                    request_id,
                    route_id: logger.config.route_id.clone(),
                    method: method.to_string(),
                    path,
                    query,
                    client_ip: ip,
                    status_code: status,
                    duration_ns: duration.as_nanos(),
                    duration_ms: duration.as_secs_f64() * 1000.0,
                    request_body: captured_request_body,
                    response_body: captured_response_body,
                });
            }

            hyper::Response::from_parts(resp_parts, TakoBody::from(resp_bytes))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::pipeline::wrap;
    use crate::gateway::types::BoxGatewayHandler;
    use std::convert::Infallible;
    use tokio::net::TcpListener;

    #[derive(serde::Deserialize)]
    struct AuditEntryLike {
        #[allow(dead_code)]
        method: String,
    }

    async fn spawn_collecting_webhook() -> (std::net::SocketAddr, Arc<tokio::sync::Mutex<Vec<Vec<AuditEntryLike>>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received: Arc<tokio::sync::Mutex<Vec<Vec<AuditEntryLike>>>> = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let received2 = received.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(x) => x,
                    Err(_) => return,
                };
                let io = hyper_util::rt::TokioIo::new(stream);
                let received = received2.clone();
                tokio::spawn(async move {
                    let received = received.clone();
                    let service = hyper::service::service_fn(move |req: http::Request<hyper::body::Incoming>| {
                        let received = received.clone();
                        async move {
                            let bytes = http_body_util::BodyExt::collect(req.into_body()).await.unwrap().to_bytes();
                            let batch: Vec<AuditEntryLike> = serde_json::from_slice(&bytes).unwrap_or_default();
                            received.lock().await.push(batch);
                            Ok::<_, Infallible>(http::Response::builder().status(200).body(http_body_util::Full::new(bytes::Bytes::new())).unwrap())
                        }
                    });
                    let _ = hyper::server::conn::http1::Builder::new().serve_connection(io, service).await;
                });
            }
        });
        (addr, received)
    }

    fn mk_req() -> GatewayRequest {
        http::Request::builder().method(Method::GET).uri("/x").body(TakoBody::empty()).unwrap()
    }

    #[tokio::test]
    async fn flushes_batch_on_size_threshold() {
        let (addr, received) = spawn_collecting_webhook().await;
        let cfg = ConfigBuilder::new("route-1", addr.ip().to_string(), addr.port(), "/audit")
            .batch_size(2)
            .flush_interval(Duration::from_secs(60))
            .build();
        let logger = AuditLogger::spawn(cfg);
        let endpoint: BoxGatewayHandler = Arc::new(|_req| Box::pin(async move { hyper::Response::builder().status(200).body(TakoBody::empty()).unwrap() }));
        let pipeline = wrap(vec![middleware(logger.clone())], endpoint);

        let _ = pipeline(mk_req()).await;
        let _ = pipeline(mk_req()).await;

        for _ in 0..50 {
            if !received.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let batches = received.lock().await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[tokio::test]
    async fn dropped_counter_increments_on_overflow() {
        let cfg = Config::new("route-1", "10.255.255.1", 9, "/audit");
        let mut cfg = cfg;
        cfg.queue_size = 1;
        cfg.flush_interval = Duration::from_secs(600);
        let logger = AuditLogger::spawn(cfg);
        logger.enqueue(AuditEntry {
            timestamp: "t".into(),
            request_id: "r".into(),
            route_id: "route".into(),
            method: "GET".into(),
            path: "/x".into(),
            query: None,
            client_ip: "1.2.3.4".into(),
            status_code: 200,
            duration_ns: 0,
            duration_ms: 0.0,
            request_body: None,
            response_body: None,
        });
        logger.enqueue(AuditEntry {
            timestamp: "t".into(),
            request_id: "r2".into(),
            route_id: "route".into(),
            method: "GET".into(),
            path: "/x".into(),
            query: None,
            client_ip: "1.2.3.4".into(),
            status_code: 200,
            duration_ns: 0,
            duration_ms: 0.0,
            request_body: None,
            response_body: None,
        });
        assert!(logger.stats().dropped.load(Ordering::Relaxed) >= 1);
    }
}
