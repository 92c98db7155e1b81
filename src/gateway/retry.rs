//! Retry Orchestrator (§4.17): bounded retries with exponential backoff and
//! jitter, a rolling-window retry budget, and optional request hedging.
//! Backoff/jitter shape follows the same `min(initial * multiplier^n, max)`
//! curve the host framework's reconnect logic in [`crate::client`] uses.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode};
use parking_lot::Mutex;
use rand::Rng;

use crate::gateway::transport::{self, TransportError};

#[derive(Clone)]
pub struct Config {
    pub retryable_methods: Vec<Method>,
    pub retryable_statuses: Vec<StatusCode>,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub jitter: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retryable_methods: vec![Method::GET, Method::HEAD, Method::OPTIONS],
            retryable_statuses: vec![StatusCode::BAD_GATEWAY, StatusCode::SERVICE_UNAVAILABLE, StatusCode::GATEWAY_TIMEOUT],
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: Duration::from_millis(20),
        }
    }
}

#[derive(Default)]
pub struct ConfigBuilder(Config);

impl ConfigBuilder {
    pub fn new() -> Self {
        Self(Config::default())
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.0.max_attempts = n;
        self
    }

    pub fn backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.0.initial_backoff = initial;
        self.0.max_backoff = max;
        self.0.multiplier = multiplier;
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.0.jitter = jitter;
        self
    }

    pub fn retryable_statuses(mut self, statuses: Vec<StatusCode>) -> Self {
        self.0.retryable_statuses = statuses;
        self
    }

    pub fn retryable_methods(mut self, methods: Vec<Method>) -> Self {
        self.0.retryable_methods = methods;
        self
    }

    pub fn build(self) -> Config {
        self.0
    }
}

fn backoff_for(config: &Config, attempt: u32) -> Duration {
    let base_ms = config.initial_backoff.as_millis() as f64 * config.multiplier.powi(attempt as i32 - 1);
    let capped_ms = base_ms.min(config.max_backoff.as_millis() as f64);
    let jitter_ms = if config.jitter.is_zero() {
        0
    } else {
        rand::thread_rng().gen_range(0..=config.jitter.as_millis() as u64)
    };
    Duration::from_millis(capped_ms as u64) + Duration::from_millis(jitter_ms)
}

/// Rolling-window token bookkeeping: `allow()` returns true while
/// `retries / requests <= ratio` or `retries_per_second <= min_retries_per_s`.
pub struct RetryBudget {
    ratio: f64,
    min_retries_per_s: f64,
    window: Duration,
    state: Mutex<BudgetWindow>,
    exhausted: AtomicU64,
}

struct BudgetWindow {
    window_start: std::time::Instant,
    requests: u64,
    retries: u64,
}

impl RetryBudget {
    pub fn new(ratio: f64, min_retries_per_s: f64, window: Duration) -> Self {
        Self {
            ratio,
            min_retries_per_s,
            window,
            state: Mutex::new(BudgetWindow {
                window_start: std::time::Instant::now(),
                requests: 0,
                retries: 0,
            }),
            exhausted: AtomicU64::new(0),
        }
    }

    pub fn exhausted_count(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }

    fn roll_if_needed(&self, state: &mut BudgetWindow) {
        if state.window_start.elapsed() >= self.window {
            state.window_start = std::time::Instant::now();
            state.requests = 0;
            state.retries = 0;
        }
    }

    pub fn record_request(&self) {
        let mut state = self.state.lock();
        self.roll_if_needed(&mut state);
        state.requests += 1;
    }

    /// Returns whether a retry may proceed. Callers should call this
    /// before issuing the retry and call [`Self::record_retry`] after a
    /// retry is actually allowed and attempted.
    pub fn allow(&self) -> bool {
        let state = self.state.lock();
        let min_floor = self.min_retries_per_s * self.window.as_secs_f64();
        let by_ratio = (state.retries as f64) <= self.ratio * (state.requests as f64);
        let by_floor = (state.retries as f64) <= min_floor;
        by_ratio || by_floor
    }

    pub fn record_retry(&self) {
        let mut state = self.state.lock();
        self.roll_if_needed(&mut state);
        state.retries += 1;
    }

    pub fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Clone)]
pub struct HedgeConfig {
    pub max_requests: u32,
    pub delay: Duration,
}

pub struct HedgeOutcome {
    pub response: Result<http::Response<Bytes>, TransportError>,
    pub winner_index: usize,
}

/// Issues up to `hedge.max_requests` staggered parallel attempts against
/// the same backend; the first non-error response wins. Intended for
/// idempotent requests only — callers are responsible for that guarantee.
pub async fn hedge(
    host: Arc<str>,
    port: u16,
    build_request: impl Fn() -> http::Request<Bytes> + Send + Sync + 'static,
    timeout: Duration,
    hedge: HedgeConfig,
) -> HedgeOutcome {
    let (tx, mut rx) = tokio::sync::mpsc::channel(hedge.max_requests as usize);
    let build_request = Arc::new(build_request);

    for i in 0..hedge.max_requests {
        let host = host.clone();
        let tx = tx.clone();
        let build_request = build_request.clone();
        tokio::spawn(async move {
            if i > 0 {
                tokio::time::sleep(hedge.delay * i).await;
            }
            let req = build_request();
            let result = transport::send_once(&host, port, req, timeout).await;
            let _ = tx.send((i as usize, result)).await;
        });
    }
    drop(tx);

    let mut last_err = None;
    while let Some((i, result)) = rx.recv().await {
        match result {
            Ok(resp) => {
                return HedgeOutcome {
                    response: Ok(resp),
                    winner_index: i,
                };
            }
            Err(e) => last_err = Some((i, e)),
        }
    }
    let (winner_index, err) = last_err.unwrap_or((0, TransportError::Timeout(timeout)));
    HedgeOutcome {
        response: Err(err),
        winner_index,
    }
}

pub struct RetryOrchestrator {
    config: Config,
    budget: Option<Arc<RetryBudget>>,
}

impl RetryOrchestrator {
    pub fn new(config: Config, budget: Option<Arc<RetryBudget>>) -> Self {
        Self { config, budget }
    }

    fn eligible(&self, method: &Method, status: Option<StatusCode>, had_transport_error: bool) -> bool {
        if !self.config.retryable_methods.contains(method) {
            return false;
        }
        had_transport_error || status.is_some_and(|s| self.config.retryable_statuses.contains(&s))
    }

    /// Drives a single logical request through up to `max_attempts` tries.
    /// `send` performs one transport round-trip given the attempt number
    /// (1-based); it is called at least once regardless of budget state.
    pub async fn execute<F, Fut>(&self, method: &Method, send: F) -> Result<http::Response<Bytes>, TransportError>
    where
        F: Fn(u32) -> Fut,
        Fut: std::future::Future<Output = Result<http::Response<Bytes>, TransportError>>,
    {
        if let Some(budget) = &self.budget {
            budget.record_request();
        }

        let mut attempt = 1;
        let mut last = send(attempt).await;

        loop {
            let (status, transport_err) = match &last {
                Ok(resp) => (Some(resp.status()), false),
                Err(_) => (None, true),
            };

            if attempt >= self.config.max_attempts || !self.eligible(method, status, transport_err) {
                return last;
            }

            if let Some(budget) = &self.budget
                && !budget.allow()
            {
                budget.record_exhausted();
                return last;
            }

            if let Some(budget) = &self.budget {
                budget.record_retry();
            }

            tokio::time::sleep(backoff_for(&self.config, attempt)).await;
            attempt += 1;
            last = send(attempt).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn retries_on_retryable_status_then_succeeds() {
        let cfg = ConfigBuilder::new().max_attempts(3).backoff(Duration::from_millis(1), Duration::from_millis(10), 2.0).jitter(Duration::ZERO).build();
        let orchestrator = RetryOrchestrator::new(cfg, None);
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_cb = attempts.clone();

        let result = orchestrator
            .execute(&Method::GET, |n| {
                let attempts_cb = attempts_cb.clone();
                async move {
                    attempts_cb.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Ok(http::Response::builder().status(StatusCode::BAD_GATEWAY).body(Bytes::new()).unwrap())
                    } else {
                        Ok(http::Response::builder().status(StatusCode::OK).body(Bytes::new()).unwrap())
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap().status(), StatusCode::OK);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_method_returns_first_response() {
        let cfg = Config::default();
        let orchestrator = RetryOrchestrator::new(cfg, None);
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_cb = attempts.clone();

        let result = orchestrator
            .execute(&Method::POST, |_n| {
                let attempts_cb = attempts_cb.clone();
                async move {
                    attempts_cb.fetch_add(1, Ordering::SeqCst);
                    Ok(http::Response::builder().status(StatusCode::BAD_GATEWAY).body(Bytes::new()).unwrap())
                }
            })
            .await;

        assert_eq!(result.unwrap().status(), StatusCode::BAD_GATEWAY);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn budget_exhaustion_stops_retrying_and_returns_last_response() {
        let cfg = ConfigBuilder::new().max_attempts(10).backoff(Duration::from_millis(1), Duration::from_millis(5), 2.0).jitter(Duration::ZERO).build();
        let budget = Arc::new(RetryBudget::new(0.0, 0.0, Duration::from_secs(60)));
        let orchestrator = RetryOrchestrator::new(cfg, Some(budget.clone()));
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_cb = attempts.clone();

        let _ = orchestrator
            .execute(&Method::GET, |_n| {
                let attempts_cb = attempts_cb.clone();
                async move {
                    attempts_cb.fetch_add(1, Ordering::SeqCst);
                    Ok(http::Response::builder().status(StatusCode::BAD_GATEWAY).body(Bytes::new()).unwrap())
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(budget.exhausted_count(), 1);
    }

    #[tokio::test]
    async fn hedging_returns_first_responder_and_winner_index() {
        async fn spawn_echo(delay: Duration, status: u16) -> std::net::SocketAddr {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                let Ok((mut stream, _)) = listener.accept().await else { return };
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                tokio::time::sleep(delay).await;
                let resp = format!("HTTP/1.1 {status} X\r\ncontent-length: 0\r\n\r\n");
                let _ = stream.write_all(resp.as_bytes()).await;
            });
            addr
        }

        let addr = spawn_echo(Duration::from_millis(10), 200).await;
        let host: Arc<str> = Arc::from(addr.ip().to_string().as_str());
        let outcome = hedge(
            host,
            addr.port(),
            || http::Request::builder().method(Method::GET).uri("/x").body(Bytes::new()).unwrap(),
            Duration::from_secs(2),
            HedgeConfig {
                max_requests: 2,
                delay: Duration::from_millis(200),
            },
        )
        .await;

        assert_eq!(outcome.winner_index, 0);
        assert_eq!(outcome.response.unwrap().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn hedging_ignores_a_faster_error_and_waits_for_a_later_success() {
        // First accepted connection (the unstaggered attempt) closes with no
        // response at all, which fails fast as a transport error. Second
        // accepted connection (the staggered attempt) answers 200 a little
        // later. The winning response must still be the 200, not the error.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                tokio::time::sleep(Duration::from_millis(20)).await;
                let _ = stream.write_all(b"HTTP/1.1 200 X\r\ncontent-length: 0\r\n\r\n").await;
            }
        });

        let host: Arc<str> = Arc::from(addr.ip().to_string().as_str());
        let outcome = hedge(
            host,
            addr.port(),
            || http::Request::builder().method(Method::GET).uri("/x").body(Bytes::new()).unwrap(),
            Duration::from_secs(2),
            HedgeConfig {
                max_requests: 2,
                delay: Duration::from_millis(10),
            },
        )
        .await;

        assert_eq!(outcome.response.unwrap().status(), StatusCode::OK);
        assert_eq!(outcome.winner_index, 1);
    }
}
