//! Cost / Budget (§4.11): per-consumer request cost accounting against a
//! fixed-window budget, modeled the same way the host framework's token
//! bucket rate limiter tracks per-IP state
//! ([`crate::plugins::rate_limiter`]) — a `DashMap` keyed by consumer, one
//! entry per key, mutated under its own lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use http::Method;
use parking_lot::Mutex;

use crate::body::TakoBody;
use crate::gateway::types::{GatewayNext, GatewayRequest};
use crate::types::Response;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BudgetAction {
    Reject,
    LogOnly,
}

#[derive(Clone)]
pub enum KeyFn {
    Ip,
    ClientId(http::HeaderName),
    Header(http::HeaderName),
}

#[derive(Clone)]
pub struct BudgetConfig {
    pub limit: u64,
    pub window: Duration,
    pub action: BudgetAction,
    pub key_fn: KeyFn,
}

#[derive(Clone)]
pub struct Config {
    pub default_cost: u64,
    pub method_cost_overrides: HashMap<Method, u64>,
    pub budget: Option<BudgetConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_cost: 1,
            method_cost_overrides: HashMap::new(),
            budget: None,
        }
    }
}

#[derive(Default)]
pub struct ConfigBuilder(Config);

impl ConfigBuilder {
    pub fn new() -> Self {
        Self(Config::default())
    }

    pub fn default_cost(mut self, cost: u64) -> Self {
        self.0.default_cost = cost;
        self
    }

    pub fn method_cost(mut self, method: Method, cost: u64) -> Self {
        self.0.method_cost_overrides.insert(method, cost);
        self
    }

    pub fn budget(mut self, limit: u64, window: Duration, action: BudgetAction, key_fn: KeyFn) -> Self {
        self.0.budget = Some(BudgetConfig {
            limit,
            window,
            action,
            key_fn,
        });
        self
    }

    pub fn build(self) -> Config {
        self.0
    }
}

struct Bucket {
    cost: u64,
    window_start_secs: u64,
}

pub struct CostTracker {
    config: Config,
    buckets: DashMap<String, Mutex<Bucket>>,
    rejections: AtomicU64,
}

impl CostTracker {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
            rejections: AtomicU64::new(0),
        }
    }

    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    fn cost_for(&self, method: &Method) -> u64 {
        self.config.method_cost_overrides.get(method).copied().unwrap_or(self.config.default_cost)
    }

    fn consumer_key(&self, key_fn: &KeyFn, req: &GatewayRequest) -> String {
        match key_fn {
            KeyFn::Ip => req
                .extensions()
                .get::<std::net::SocketAddr>()
                .map(|a| a.ip().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            KeyFn::ClientId(header) | KeyFn::Header(header) => req
                .headers()
                .get(header)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }

    fn window_start(now_secs: u64, window: Duration) -> u64 {
        let window_secs = window.as_secs().max(1);
        now_secs - (now_secs % window_secs)
    }

    /// Returns `(cost, Option<(allowed, retry_after_secs)>)`. `None` for the
    /// budget outcome means no budget is configured at all.
    fn check(&self, req: &GatewayRequest) -> (u64, Option<(bool, u64)>) {
        let cost = self.cost_for(req.method());
        let Some(budget) = &self.config.budget else {
            return (cost, None);
        };
        let key = self.consumer_key(&budget.key_fn, req);
        let now_secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let window_start = Self::window_start(now_secs, budget.window);
        let window_secs = budget.window.as_secs().max(1);

        let entry = self.buckets.entry(key).or_insert_with(|| {
            Mutex::new(Bucket {
                cost: 0,
                window_start_secs: window_start,
            })
        });
        let mut bucket = entry.lock();
        if bucket.window_start_secs != window_start {
            bucket.cost = 0;
            bucket.window_start_secs = window_start;
        }

        let would_exceed = bucket.cost + cost > budget.limit;
        if would_exceed {
            let retry_after = (window_start + window_secs).saturating_sub(now_secs).max(1);
            if budget.action == BudgetAction::LogOnly {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                bucket.cost += cost;
                return (cost, Some((true, retry_after)));
            }
            self.rejections.fetch_add(1, Ordering::Relaxed);
            return (cost, Some((false, retry_after)));
        }

        bucket.cost += cost;
        (cost, Some((true, 0)))
    }
}

/// Builds the named middleware slot for cost/budget tracking (§4.11).
pub fn middleware(tracker: Arc<CostTracker>) -> crate::gateway::types::BoxGatewayMiddleware {
    Arc::new(move |req: GatewayRequest, next: GatewayNext| {
        let tracker = tracker.clone();
        Box::pin(async move {
            let (cost, outcome) = tracker.check(&req);

            let allowed = match outcome {
                Some((allowed, _)) => allowed,
                None => true,
            };

            if !allowed {
                let retry_after = outcome.map(|(_, r)| r).unwrap_or(1);
                return hyper::Response::builder()
                    .status(http::StatusCode::TOO_MANY_REQUESTS)
                    .header("x-request-cost", cost.to_string())
                    .header(http::header::RETRY_AFTER, retry_after.to_string())
                    .body(TakoBody::from("{\"error\":{\"message\":\"cost budget exceeded\"}}"))
                    .unwrap();
            }

            let resp = next.run(req).await;
            let (mut parts, body) = resp.into_parts();
            if let Ok(v) = http::HeaderValue::from_str(&cost.to_string()) {
                parts.headers.insert("x-request-cost", v);
            }
            hyper::Response::from_parts(parts, body)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::pipeline::wrap;
    use crate::gateway::types::BoxGatewayHandler;

    fn mk_req(ip: &str) -> GatewayRequest {
        let mut req = http::Request::builder().method(Method::GET).uri("/x").body(TakoBody::empty()).unwrap();
        req.extensions_mut().insert(std::net::SocketAddr::new(ip.parse().unwrap(), 1234));
        req
    }

    fn ok_endpoint() -> BoxGatewayHandler {
        Arc::new(|_req| Box::pin(async move { hyper::Response::builder().status(200).body(TakoBody::empty()).unwrap() }))
    }

    #[tokio::test]
    async fn first_request_allowed_second_rejected() {
        let cfg = ConfigBuilder::new()
            .default_cost(3)
            .budget(5, Duration::from_secs(3600), BudgetAction::Reject, KeyFn::Ip)
            .build();
        let tracker = Arc::new(CostTracker::new(cfg));
        let mw = middleware(tracker);
        let pipeline = wrap(vec![mw], ok_endpoint());

        let first = pipeline(mk_req("1.2.3.4")).await;
        assert_eq!(first.status(), 200);
        assert_eq!(first.headers().get("x-request-cost").unwrap(), "3");

        let second = pipeline(mk_req("1.2.3.4")).await;
        assert_eq!(second.status(), 429);
        assert_eq!(second.headers().get("x-request-cost").unwrap(), "3");
        assert!(second.headers().get(http::header::RETRY_AFTER).is_some());
    }

    #[tokio::test]
    async fn different_consumers_have_independent_buckets() {
        let cfg = ConfigBuilder::new()
            .default_cost(3)
            .budget(5, Duration::from_secs(3600), BudgetAction::Reject, KeyFn::Ip)
            .build();
        let tracker = Arc::new(CostTracker::new(cfg));
        let mw = middleware(tracker);
        let pipeline = wrap(vec![mw], ok_endpoint());

        let a = pipeline(mk_req("1.1.1.1")).await;
        let b = pipeline(mk_req("2.2.2.2")).await;
        assert_eq!(a.status(), 200);
        assert_eq!(b.status(), 200);
    }

    #[tokio::test]
    async fn log_only_still_invokes_backend() {
        let cfg = ConfigBuilder::new()
            .default_cost(3)
            .budget(5, Duration::from_secs(3600), BudgetAction::LogOnly, KeyFn::Ip)
            .build();
        let tracker = Arc::new(CostTracker::new(cfg));
        let mw = middleware(tracker.clone());
        let pipeline = wrap(vec![mw], ok_endpoint());

        let _ = pipeline(mk_req("9.9.9.9")).await;
        let second = pipeline(mk_req("9.9.9.9")).await;
        assert_eq!(second.status(), 200);
        assert_eq!(tracker.rejections(), 1);
    }
}
