//! Maintenance mode (§4.13): a single atomic flag gating every request
//! behind a configured bypass list. The flag lives behind an `Arc` so an
//! admin surface elsewhere in the process can flip it at runtime without
//! touching the pipeline itself — the same shape the host framework uses
//! for its [`crate::signals`] shutdown flag.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use globset::{Glob, GlobSet, GlobSetBuilder};
use ipnet::IpNet;

use crate::body::TakoBody;
use crate::gateway::types::{GatewayNext, GatewayRequest};
use crate::types::Response;

/// Cheap, cloneable handle to the maintenance flag. Intended to be shared
/// between the pipeline middleware and whatever admin surface an embedding
/// application exposes.
#[derive(Clone)]
pub struct Handle(Arc<AtomicBool>);

impl Handle {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn enable(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid exclude path glob {0:?}: {1}")]
    InvalidGlob(String, globset::Error),
    #[error("invalid exclude IP or CIDR {0:?}: {1}")]
    InvalidIp(String, String),
}

pub struct Config {
    pub exclude_paths: Vec<String>,
    pub exclude_ips: Vec<String>,
    pub response_status: u16,
    pub response_body: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exclude_paths: Vec::new(),
            exclude_ips: Vec::new(),
            response_status: 503,
            response_body: "{\"error\":{\"message\":\"service under maintenance\"}}".to_string(),
        }
    }
}

#[derive(Default)]
pub struct ConfigBuilder(Config);

impl ConfigBuilder {
    pub fn new() -> Self {
        Self(Config::default())
    }

    pub fn exclude_path(mut self, glob: impl Into<String>) -> Self {
        self.0.exclude_paths.push(glob.into());
        self
    }

    pub fn exclude_ip(mut self, ip_or_cidr: impl Into<String>) -> Self {
        self.0.exclude_ips.push(ip_or_cidr.into());
        self
    }

    pub fn response(mut self, status: u16, body: impl Into<String>) -> Self {
        self.0.response_status = status;
        self.0.response_body = body.into();
        self
    }

    pub fn build(self) -> Config {
        self.0
    }
}

enum IpRule {
    Exact(IpAddr),
    Net(IpNet),
}

impl IpRule {
    fn contains(&self, ip: &IpAddr) -> bool {
        match self {
            IpRule::Exact(addr) => addr == ip,
            IpRule::Net(net) => net.contains(ip),
        }
    }
}

pub struct MaintenancePolicy {
    handle: Handle,
    exclude_paths: GlobSet,
    exclude_ips: Vec<IpRule>,
    response_status: http::StatusCode,
    response_body: String,
    blocked: std::sync::atomic::AtomicU64,
}

impl MaintenancePolicy {
    pub fn new(handle: Handle, config: Config) -> Result<Self, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.exclude_paths {
            let glob = Glob::new(pattern).map_err(|e| ConfigError::InvalidGlob(pattern.clone(), e))?;
            builder.add(glob);
        }
        let exclude_paths = builder.build().map_err(|e| ConfigError::InvalidGlob("<set>".to_string(), e))?;

        let mut exclude_ips = Vec::new();
        for entry in &config.exclude_ips {
            if let Ok(net) = entry.parse::<IpNet>() {
                exclude_ips.push(IpRule::Net(net));
            } else if let Ok(addr) = entry.parse::<IpAddr>() {
                exclude_ips.push(IpRule::Exact(addr));
            } else {
                return Err(ConfigError::InvalidIp(entry.clone(), "not a valid IP address or CIDR".to_string()));
            }
        }

        let response_status = http::StatusCode::from_u16(config.response_status).unwrap_or(http::StatusCode::SERVICE_UNAVAILABLE);

        Ok(Self {
            handle,
            exclude_paths,
            exclude_ips,
            response_status,
            response_body: config.response_body,
            blocked: std::sync::atomic::AtomicU64::new(0),
        })
    }

    pub fn blocked_count(&self) -> u64 {
        self.blocked.load(Ordering::Relaxed)
    }

    fn bypassed(&self, req: &GatewayRequest) -> bool {
        if self.exclude_paths.is_match(req.uri().path()) {
            return true;
        }
        if let Some(addr) = req.extensions().get::<std::net::SocketAddr>() {
            let ip = addr.ip();
            if self.exclude_ips.iter().any(|rule| rule.contains(&ip)) {
                return true;
            }
        }
        false
    }
}

/// Builds the named middleware slot for maintenance-mode gating (§4.13).
pub fn middleware(policy: Arc<MaintenancePolicy>) -> crate::gateway::types::BoxGatewayMiddleware {
    Arc::new(move |req: GatewayRequest, next: GatewayNext| {
        let policy = policy.clone();
        Box::pin(async move {
            if !policy.handle.is_enabled() || policy.bypassed(&req) {
                return next.run(req).await;
            }

            policy.blocked.fetch_add(1, Ordering::Relaxed);
            let resp: Response = hyper::Response::builder()
                .status(policy.response_status)
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(TakoBody::from(policy.response_body.clone()))
                .unwrap();
            resp
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::pipeline::wrap;
    use crate::gateway::types::BoxGatewayHandler;

    fn ok_endpoint() -> BoxGatewayHandler {
        Arc::new(|_req| Box::pin(async move { hyper::Response::builder().status(200).body(TakoBody::empty()).unwrap() }))
    }

    fn mk_req(path: &str, ip: Option<&str>) -> GatewayRequest {
        let mut req = http::Request::builder().method(http::Method::GET).uri(path).body(TakoBody::empty()).unwrap();
        if let Some(ip) = ip {
            req.extensions_mut().insert(std::net::SocketAddr::new(ip.parse().unwrap(), 1234));
        }
        req
    }

    #[tokio::test]
    async fn disabled_flag_passes_everything_through() {
        let handle = Handle::new(false);
        let policy = Arc::new(MaintenancePolicy::new(handle, Config::default()).unwrap());
        let pipeline = wrap(vec![middleware(policy)], ok_endpoint());
        let resp = pipeline(mk_req("/anything", None)).await;
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn enabled_flag_blocks_with_503_json() {
        let handle = Handle::new(true);
        let policy = Arc::new(MaintenancePolicy::new(handle, Config::default()).unwrap());
        let pipeline = wrap(vec![middleware(policy)], ok_endpoint());
        let resp = pipeline(mk_req("/anything", None)).await;
        assert_eq!(resp.status(), 503);
    }

    #[tokio::test]
    async fn exclude_path_glob_bypasses_maintenance() {
        let handle = Handle::new(true);
        let cfg = ConfigBuilder::new().exclude_path("/healthz").build();
        let policy = Arc::new(MaintenancePolicy::new(handle, cfg).unwrap());
        let pipeline = wrap(vec![middleware(policy)], ok_endpoint());
        let resp = pipeline(mk_req("/healthz", None)).await;
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn exclude_cidr_bypasses_maintenance() {
        let handle = Handle::new(true);
        let cfg = ConfigBuilder::new().exclude_ip("10.0.0.0/8").build();
        let policy = Arc::new(MaintenancePolicy::new(handle, cfg).unwrap());
        let pipeline = wrap(vec![middleware(policy)], ok_endpoint());

        let bypassed = pipeline(mk_req("/x", Some("10.1.2.3"))).await;
        assert_eq!(bypassed.status(), 200);

        let blocked = pipeline(mk_req("/x", Some("1.2.3.4"))).await;
        assert_eq!(blocked.status(), 503);
    }

    #[tokio::test]
    async fn handle_toggles_behavior_live() {
        let handle = Handle::new(false);
        let policy = Arc::new(MaintenancePolicy::new(handle.clone(), Config::default()).unwrap());
        let pipeline = wrap(vec![middleware(policy.clone())], ok_endpoint());

        assert_eq!(pipeline(mk_req("/x", None)).await.status(), 200);
        handle.enable();
        assert_eq!(pipeline(mk_req("/x", None)).await.status(), 503);
        assert_eq!(policy.blocked_count(), 1);
    }
}
