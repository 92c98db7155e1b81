//! Request metrics plugin: counts requests and latency by route and status class.
//!
//! The counters themselves are always compiled in (a handful of atomics cost
//! nothing). Exporting them to Prometheus or OpenTelemetry is gated behind the
//! `metrics-prometheus` / `metrics-opentelemetry` features so that pulling in
//! either backend is opt-in.
//!
//! # Examples
//!
//! ```rust
//! use gateway_core::plugins::metrics::MetricsPlugin;
//! use gateway_core::router::Router;
//!
//! let mut router = Router::new();
//! router.plugin(MetricsPlugin::new());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use anyhow::Result;
use dashmap::DashMap;

use crate::{middleware::Next, plugins::TakoPlugin, router::Router, types::Request};

/// Per-route request counters, keyed by `"{method} {path}"`.
#[derive(Default)]
struct RouteCounters {
    total: AtomicU64,
    status_2xx: AtomicU64,
    status_4xx: AtomicU64,
    status_5xx: AtomicU64,
    other: AtomicU64,
    duration_micros_sum: AtomicU64,
}

/// In-process request metrics collected from every request that passes through
/// the router's global middleware chain.
#[derive(Clone, Default)]
pub struct Metrics {
    routes: Arc<DashMap<String, RouteCounters>>,
}

/// Point-in-time counters for a single route.
#[derive(Debug, Clone, Copy)]
pub struct RouteSnapshot {
    pub total: u64,
    pub status_2xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
    pub other: u64,
    pub mean_duration_micros: u64,
}

impl Metrics {
    fn record(&self, route: &str, status: u16, elapsed_micros: u64) {
        let counters = self.routes.entry(route.to_string()).or_default();
        counters.total.fetch_add(1, Ordering::Relaxed);
        match status {
            200..=299 => counters.status_2xx.fetch_add(1, Ordering::Relaxed),
            400..=499 => counters.status_4xx.fetch_add(1, Ordering::Relaxed),
            500..=599 => counters.status_5xx.fetch_add(1, Ordering::Relaxed),
            _ => counters.other.fetch_add(1, Ordering::Relaxed),
        };
        counters
            .duration_micros_sum
            .fetch_add(elapsed_micros, Ordering::Relaxed);
    }

    /// Returns a snapshot of the counters for a single route, if any requests
    /// have been recorded for it.
    pub fn snapshot(&self, route: &str) -> Option<RouteSnapshot> {
        let counters = self.routes.get(route)?;
        let total = counters.total.load(Ordering::Relaxed);
        Some(RouteSnapshot {
            total,
            status_2xx: counters.status_2xx.load(Ordering::Relaxed),
            status_4xx: counters.status_4xx.load(Ordering::Relaxed),
            status_5xx: counters.status_5xx.load(Ordering::Relaxed),
            other: counters.other.load(Ordering::Relaxed),
            mean_duration_micros: if total == 0 {
                0
            } else {
                counters.duration_micros_sum.load(Ordering::Relaxed) / total
            },
        })
    }

    /// Returns every tracked route name.
    pub fn routes(&self) -> Vec<String> {
        self.routes.iter().map(|e| e.key().clone()).collect()
    }
}

/// Collects request counts and latency per route and exposes them to an
/// external collector via [`Metrics::snapshot`].
pub struct MetricsPlugin {
    metrics: Metrics,
}

impl Default for MetricsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsPlugin {
    pub fn new() -> Self {
        Self {
            metrics: Metrics::default(),
        }
    }

    /// Returns a cloneable handle to the underlying counters, e.g. to wire up
    /// a `/metrics` scrape endpoint.
    pub fn handle(&self) -> Metrics {
        self.metrics.clone()
    }
}

impl TakoPlugin for MetricsPlugin {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn setup(&self, router: &Router) -> Result<()> {
        let metrics = self.metrics.clone();
        router.middleware(move |req: Request, next: Next| {
            let metrics = metrics.clone();
            let route = format!("{} {}", req.method(), req.uri().path());
            async move {
                let start = Instant::now();
                let res = next.run(req).await;
                let elapsed = start.elapsed().as_micros() as u64;
                metrics.record(&route, res.status().as_u16(), elapsed);
                res
            }
        });
        Ok(())
    }
}

#[cfg(feature = "metrics-prometheus")]
pub mod prometheus_export {
    use super::Metrics;

    /// Renders the collected counters in Prometheus text exposition format.
    pub fn render(metrics: &Metrics) -> String {
        let mut out = String::new();
        out.push_str("# TYPE http_requests_total counter\n");
        for route in metrics.routes() {
            if let Some(snap) = metrics.snapshot(&route) {
                out.push_str(&format!(
                    "http_requests_total{{route=\"{route}\"}} {}\n",
                    snap.total
                ));
            }
        }
        out
    }
}

#[cfg(feature = "metrics-opentelemetry")]
pub mod otel_export {
    use super::Metrics;
    use opentelemetry::KeyValue;
    use opentelemetry::metrics::Meter;

    /// Records the current snapshot of every route as OpenTelemetry observable
    /// gauges against the given [`Meter`].
    pub fn record_once(meter: &Meter, metrics: &Metrics) {
        let counter = meter.u64_counter("http_requests_total").build();
        for route in metrics.routes() {
            if let Some(snap) = metrics.snapshot(&route) {
                counter.add(snap.total, &[KeyValue::new("route", route)]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_status_class_buckets() {
        let metrics = Metrics::default();
        metrics.record("GET /x", 200, 100);
        metrics.record("GET /x", 404, 50);
        metrics.record("GET /x", 500, 200);

        let snap = metrics.snapshot("GET /x").unwrap();
        assert_eq!(snap.total, 3);
        assert_eq!(snap.status_2xx, 1);
        assert_eq!(snap.status_4xx, 1);
        assert_eq!(snap.status_5xx, 1);
        assert_eq!(snap.mean_duration_micros, 350 / 3);
    }

    #[test]
    fn unknown_route_has_no_snapshot() {
        let metrics = Metrics::default();
        assert!(metrics.snapshot("GET /missing").is_none());
    }
}
