//! Health Checker (§4.16): a per-backend probe loop with hysteresis state
//! transitions, run as a long-lived background task the same way the host
//! framework runs its own background work (see [`crate::signals`] for the
//! shutdown-signal task shape this borrows from).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::Notify;

use crate::gateway::transport;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Healthy,
    Unhealthy,
    Unknown,
}

#[derive(Clone, Debug)]
pub enum ProbeKind {
    Http { method: http::Method, path: String },
    Tcp,
}

#[derive(Clone, Debug)]
pub struct ExpectedStatus {
    pub lo: u16,
    pub hi: u16,
}

impl ExpectedStatus {
    /// Parses `N`, `Nxx`, or `N-M`, each validated to the range [100, 599]
    /// with `lo <= hi`.
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        if let Some(prefix) = spec.strip_suffix("xx") {
            let digit: u16 = prefix.parse().ok()?;
            if !(1..=5).contains(&digit) {
                return None;
            }
            let lo = digit * 100;
            let hi = lo + 99;
            return Self::validated(lo, hi);
        }
        if let Some((lo, hi)) = spec.split_once('-') {
            let lo: u16 = lo.trim().parse().ok()?;
            let hi: u16 = hi.trim().parse().ok()?;
            return Self::validated(lo, hi);
        }
        let n: u16 = spec.parse().ok()?;
        Self::validated(n, n)
    }

    fn validated(lo: u16, hi: u16) -> Option<Self> {
        if (100..=599).contains(&lo) && (100..=599).contains(&hi) && lo <= hi {
            Some(Self { lo, hi })
        } else {
            None
        }
    }

    fn matches(&self, status: u16) -> bool {
        status >= self.lo && status <= self.hi
    }
}

#[derive(Clone)]
pub struct BackendConfig {
    pub url_label: String,
    pub host: String,
    pub port: u16,
    pub probe: ProbeKind,
    pub interval: Duration,
    pub timeout: Duration,
    pub expected_status: ExpectedStatus,
    pub healthy_after: u32,
    pub unhealthy_after: u32,
}

impl PartialEq for BackendConfig {
    fn eq(&self, other: &Self) -> bool {
        self.url_label == other.url_label
            && self.host == other.host
            && self.port == other.port
            && self.interval == other.interval
            && self.timeout == other.timeout
            && self.healthy_after == other.healthy_after
            && self.unhealthy_after == other.unhealthy_after
            && matches!(
                (&self.probe, &other.probe),
                (ProbeKind::Tcp, ProbeKind::Tcp)
                    | (ProbeKind::Http { method: m1, path: p1 }, ProbeKind::Http { method: m2, path: p2 })
                        if m1 == m2 && p1 == p2
            )
            && self.expected_status.lo == other.expected_status.lo
            && self.expected_status.hi == other.expected_status.hi
    }
}

#[derive(Clone, Serialize)]
pub struct BackendState {
    pub url: String,
    pub status: Status,
    pub latency_ns: u64,
    pub error: Option<String>,
    pub timestamp: u64,
}

struct Tracked {
    config: BackendConfig,
    state: RwLock<BackendState>,
    consecutive_successes: AtomicU64,
    consecutive_failures: AtomicU64,
    stop: Arc<Notify>,
}

pub type OnChange = Arc<dyn Fn(&str, Status) + Send + Sync>;

/// Owns every tracked backend's probe loop. Cheaply `Clone`-able: internal
/// state lives behind `Arc`s, matching the shared-resource model described
/// for the rest of the pipeline's background work.
pub struct HealthChecker {
    backends: Arc<RwLock<HashMap<String, Arc<Tracked>>>>,
    on_change: Option<OnChange>,
}

impl HealthChecker {
    pub fn new(on_change: Option<OnChange>) -> Self {
        Self {
            backends: Arc::new(RwLock::new(HashMap::new())),
            on_change,
        }
    }

    /// Adds a backend and starts its probe loop. Equivalent to `Update` for
    /// a backend that doesn't yet exist.
    pub fn add(self: &Arc<Self>, config: BackendConfig) {
        self.start(config);
    }

    /// Compares `config` field-for-field against the existing entry; a
    /// no-op on equality, otherwise tears down the old loop and starts a
    /// fresh one.
    pub fn update(self: &Arc<Self>, config: BackendConfig) {
        let existing = self.backends.read().get(&config.url_label).map(|t| t.config.clone());
        if existing.as_ref() == Some(&config) {
            return;
        }
        self.remove(&config.url_label);
        self.start(config);
    }

    pub fn remove(&self, url_label: &str) {
        if let Some(tracked) = self.backends.write().remove(url_label) {
            tracked.stop.notify_waiters();
        }
    }

    fn start(self: &Arc<Self>, config: BackendConfig) {
        let stop = Arc::new(Notify::new());
        let tracked = Arc::new(Tracked {
            state: RwLock::new(BackendState {
                url: config.url_label.clone(),
                status: Status::Unknown,
                latency_ns: 0,
                error: None,
                timestamp: now_secs(),
            }),
            consecutive_successes: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            stop,
            config,
        });

        self.backends.write().insert(tracked.config.url_label.clone(), tracked.clone());

        let checker = self.clone();
        let loop_tracked = tracked.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(loop_tracked.config.interval);
            loop {
                tokio::select! {
                    _ = loop_tracked.stop.notified() => break,
                    _ = ticker.tick() => {
                        checker.probe_once(&loop_tracked).await;
                    }
                }
            }
        });
    }

    async fn probe_once(&self, tracked: &Arc<Tracked>) {
        let start = std::time::Instant::now();
        let result = match &tracked.config.probe {
            ProbeKind::Tcp => tcp_probe(&tracked.config).await,
            ProbeKind::Http { method, path } => http_probe(&tracked.config, method, path).await,
        };
        let latency_ns = start.elapsed().as_nanos() as u64;

        let (success, error) = match result {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e)),
        };

        let previous_status = tracked.state.read().status;
        let new_status = if success {
            tracked.consecutive_failures.store(0, Ordering::SeqCst);
            let successes = tracked.consecutive_successes.fetch_add(1, Ordering::SeqCst) + 1;
            if previous_status == Status::Healthy || successes >= tracked.config.healthy_after as u64 {
                Status::Healthy
            } else {
                previous_status
            }
        } else {
            tracked.consecutive_successes.store(0, Ordering::SeqCst);
            let failures = tracked.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            if previous_status == Status::Unhealthy || failures >= tracked.config.unhealthy_after as u64 {
                Status::Unhealthy
            } else {
                previous_status
            }
        };

        {
            let mut state = tracked.state.write();
            state.status = new_status;
            state.latency_ns = latency_ns;
            state.error = error;
            state.timestamp = now_secs();
        }

        if new_status != previous_status {
            tracing::debug!(backend = %tracked.config.url_label, ?previous_status, ?new_status, "health: backend transitioned");
            if let Some(on_change) = &self.on_change {
                let on_change = on_change.clone();
                let url = tracked.config.url_label.clone();
                tokio::spawn(async move {
                    on_change(&url, new_status);
                });
            }
        }
    }

    /// Returns the §6 Health State JSON shape for every tracked backend.
    pub fn snapshot(&self) -> Vec<BackendState> {
        self.backends.read().values().map(|t| t.state.read().clone()).collect()
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

async fn tcp_probe(config: &BackendConfig) -> Result<(), String> {
    tokio::time::timeout(config.timeout, TcpStream::connect((config.host.as_str(), config.port)))
        .await
        .map_err(|_| "tcp dial timed out".to_string())?
        .map_err(|e| e.to_string())?;
    Ok(())
}

async fn http_probe(config: &BackendConfig, method: &http::Method, path: &str) -> Result<(), String> {
    let req = http::Request::builder()
        .method(method.clone())
        .uri(path)
        .header(http::header::HOST, &config.host)
        .body(Bytes::new())
        .map_err(|e| e.to_string())?;

    let resp = transport::send_once(&config.host, config.port, req, config.timeout).await.map_err(|e| e.to_string())?;

    if config.expected_status.matches(resp.status().as_u16()) {
        Ok(())
    } else {
        Err(format!("unexpected status {}", resp.status()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn expected_status_parses_all_forms() {
        assert!(ExpectedStatus::parse("200").unwrap().matches(200));
        assert!(ExpectedStatus::parse("2xx").unwrap().matches(250));
        assert!(!ExpectedStatus::parse("2xx").unwrap().matches(301));
        assert!(ExpectedStatus::parse("200-299").unwrap().matches(204));
        assert!(ExpectedStatus::parse("600").is_none());
        assert!(ExpectedStatus::parse("300-200").is_none());
    }

    #[tokio::test]
    async fn tcp_probe_succeeds_against_open_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut buf = [0u8; 16];
                    let _ = stream.read(&mut buf).await;
                });
            }
        });

        let config = BackendConfig {
            url_label: "tcp-backend".to_string(),
            host: addr.ip().to_string(),
            port: addr.port(),
            probe: ProbeKind::Tcp,
            interval: Duration::from_millis(10),
            timeout: Duration::from_secs(1),
            expected_status: ExpectedStatus::parse("200").unwrap(),
            healthy_after: 1,
            unhealthy_after: 1,
        };
        assert!(tcp_probe(&config).await.is_ok());
    }

    #[tokio::test]
    async fn hysteresis_requires_consecutive_successes_and_failures() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let status_code = Arc::new(std::sync::atomic::AtomicU16::new(200));
        let status_for_server = status_code.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else { break };
                let code = status_for_server.load(Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    let body = format!("HTTP/1.1 {code} X\r\ncontent-length: 0\r\n\r\n");
                    let _ = stream.write_all(body.as_bytes()).await;
                });
            }
        });

        let transitions = Arc::new(AtomicUsize::new(0));
        let transitions_cb = transitions.clone();
        let on_change: OnChange = Arc::new(move |_url, _status| {
            transitions_cb.fetch_add(1, Ordering::SeqCst);
        });

        let checker = Arc::new(HealthChecker::new(Some(on_change)));
        let config = BackendConfig {
            url_label: "http-backend".to_string(),
            host: addr.ip().to_string(),
            port: addr.port(),
            probe: ProbeKind::Http {
                method: http::Method::GET,
                path: "/health".to_string(),
            },
            interval: Duration::from_millis(20),
            timeout: Duration::from_secs(1),
            expected_status: ExpectedStatus::parse("2xx").unwrap(),
            healthy_after: 2,
            unhealthy_after: 3,
        };
        checker.add(config);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(checker.snapshot()[0].status, Status::Healthy);

        status_code.store(500, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(checker.snapshot()[0].status, Status::Unhealthy);

        assert_eq!(transitions.load(Ordering::SeqCst), 2);
    }
}
