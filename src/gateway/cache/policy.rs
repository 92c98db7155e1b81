//! Cache Policy (§4.4): key derivation, admission, freshness/staleness
//! classification, conditional (304) replay, and purge.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use http::{HeaderMap, Method, StatusCode, header::CACHE_CONTROL};
use http_body_util::BodyExt;
use sha2::{Digest, Sha256};

use crate::body::TakoBody;
use crate::gateway::cache::store::{CacheEntry, CacheStore};
use crate::gateway::graphql::GraphqlInfo;
use crate::gateway::types::{GatewayNext, GatewayRequest};
use crate::types::Response;

/// How a cached entry compares to the configured freshness window (§4.4).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Freshness {
    Fresh,
    Stale,
    Expired,
}

/// Typed configuration for the cache policy, built once per route.
#[derive(Clone, serde::Deserialize)]
pub struct Config {
    #[serde(skip, default = "default_methods")]
    pub methods: Vec<Method>,
    pub vary_headers: Vec<String>,
    pub max_body_bytes: usize,
    #[serde(with = "duration_secs")]
    pub freshness_ttl: Duration,
    #[serde(with = "opt_duration_secs", default)]
    pub stale_while_revalidate: Option<Duration>,
    #[serde(with = "opt_duration_secs", default)]
    pub stale_if_error: Option<Duration>,
    pub conditional: bool,
    pub tenant_header: Option<String>,
    pub invalidate_own_path_on_mutation: bool,
}

fn default_methods() -> Vec<Method> {
    vec![Method::GET]
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod opt_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;
    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.map(|d| d.as_secs()).unwrap_or(0))
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(if secs == 0 { None } else { Some(Duration::from_secs(secs)) })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            methods: default_methods(),
            vary_headers: Vec::new(),
            max_body_bytes: 2 * 1024 * 1024,
            freshness_ttl: Duration::from_secs(60),
            stale_while_revalidate: None,
            stale_if_error: None,
            conditional: true,
            tenant_header: None,
            invalidate_own_path_on_mutation: false,
        }
    }
}

/// Fluent builder mirroring the host framework's `CorsBuilder` pattern.
#[derive(Default)]
pub struct ConfigBuilder(Config);

impl ConfigBuilder {
    pub fn new() -> Self {
        Self(Config::default())
    }

    pub fn methods(mut self, methods: Vec<Method>) -> Self {
        self.0.methods = methods;
        self
    }

    pub fn vary_headers(mut self, headers: Vec<String>) -> Self {
        let mut headers = headers;
        headers.sort();
        self.0.vary_headers = headers;
        self
    }

    pub fn max_body_bytes(mut self, n: usize) -> Self {
        self.0.max_body_bytes = n;
        self
    }

    pub fn freshness_ttl(mut self, ttl: Duration) -> Self {
        self.0.freshness_ttl = ttl;
        self
    }

    pub fn stale_while_revalidate(mut self, ttl: Duration) -> Self {
        self.0.stale_while_revalidate = Some(ttl);
        self
    }

    pub fn stale_if_error(mut self, ttl: Duration) -> Self {
        self.0.stale_if_error = Some(ttl);
        self
    }

    pub fn conditional(mut self, enabled: bool) -> Self {
        self.0.conditional = enabled;
        self
    }

    pub fn tenant_header(mut self, name: impl Into<String>) -> Self {
        self.0.tenant_header = Some(name.into());
        self
    }

    pub fn invalidate_own_path_on_mutation(mut self, enabled: bool) -> Self {
        self.0.invalidate_own_path_on_mutation = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.0
    }
}

/// The cache policy itself: owns its config and a handle to a (possibly
/// shared, §3) [`CacheStore`], plus a revalidation-in-flight marker set so at
/// most one background refresh per key is ever outstanding (§4.4).
pub struct CachePolicy {
    config: Config,
    store: Arc<dyn CacheStore>,
    revalidating: Arc<DashMap<String, ()>>,
}

fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    if if_none_match.trim() == "*" {
        return true;
    }
    if_none_match
        .split(',')
        .map(|s| s.trim().trim_start_matches("W/"))
        .any(|candidate| candidate == etag)
}

impl CachePolicy {
    pub fn new(config: Config, store: Arc<dyn CacheStore>) -> Self {
        Self {
            config,
            store,
            revalidating: Arc::new(DashMap::new()),
        }
    }

    fn tenant_id(&self, headers: &HeaderMap) -> Option<String> {
        let header_name = self.config.tenant_header.as_ref()?;
        headers
            .get(header_name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// §3/§8.9: a pure function of method, path, query, vary headers, tenant,
    /// and (for GraphQL requests) operation name + variables hash.
    pub fn cache_key(&self, req: &GatewayRequest) -> String {
        let mut hasher = Sha256::new();
        if let Some(tenant) = self.tenant_id(req.headers()) {
            hasher.update(tenant.as_bytes());
            hasher.update(b"|");
        }
        hasher.update(req.method().as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(req.uri().path().as_bytes());
        if let Some(query) = req.uri().query() {
            hasher.update(b"?");
            hasher.update(query.as_bytes());
        }
        for name in &self.config.vary_headers {
            hasher.update(b"|");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            if let Some(v) = req.headers().get(name).and_then(|v| v.to_str().ok()) {
                hasher.update(v.as_bytes());
            }
        }
        if let Some(info) = req.extensions().get::<GraphqlInfo>() {
            hasher.update(b"|gql=");
            hasher.update(info.operation_name.as_deref().unwrap_or("").as_bytes());
            hasher.update(b"|vars=");
            hasher.update(info.variables_hash.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    fn is_candidate(&self, req: &GatewayRequest) -> bool {
        if self.config.methods.contains(req.method()) {
            return true;
        }
        req.method() == Method::POST && req.extensions().get::<GraphqlInfo>().is_some()
    }

    fn request_disables_cache(&self, req: &GatewayRequest) -> bool {
        req.headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| {
                let v = v.to_ascii_lowercase();
                v.contains("no-store") || v.contains("no-cache")
            })
    }

    fn classify(&self, entry: &CacheEntry) -> Freshness {
        let age = entry.stored_at.elapsed();
        let ttl = entry.ttl.unwrap_or(self.config.freshness_ttl);
        if age <= ttl {
            return Freshness::Fresh;
        }
        let stale_budget = self
            .config
            .stale_while_revalidate
            .unwrap_or_default()
            .max(self.config.stale_if_error.unwrap_or_default());
        if age <= ttl + stale_budget {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    fn conditional_hit(&self, req: &GatewayRequest, entry: &CacheEntry) -> Option<Response> {
        if !self.config.conditional {
            return None;
        }
        if let (Some(inm), Some(etag)) = (
            req.headers().get("if-none-match").and_then(|v| v.to_str().ok()),
            entry.etag.as_deref(),
        ) && etag_matches(inm, etag)
        {
            return Some(self.not_modified_response(entry));
        }
        if let (Some(ims), Some(lm)) = (
            req.headers().get("if-modified-since").and_then(|v| v.to_str().ok()),
            entry.last_modified.as_deref(),
        ) && ims == lm
        {
            return Some(self.not_modified_response(entry));
        }
        None
    }

    fn not_modified_response(&self, entry: &CacheEntry) -> Response {
        let mut builder = hyper::Response::builder().status(StatusCode::NOT_MODIFIED);
        if let Some(etag) = &entry.etag {
            builder = builder.header("etag", etag.as_str());
        }
        builder = builder.header("x-cache", "HIT");
        builder.body(TakoBody::empty()).unwrap()
    }

    fn hit_response(&self, entry: &CacheEntry) -> Response {
        let mut builder = hyper::Response::builder().status(
            StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK),
        );
        for (name, value) in entry.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(etag) = &entry.etag {
            builder = builder.header("etag", etag.as_str());
        }
        if let Some(lm) = &entry.last_modified {
            builder = builder.header("last-modified", lm.as_str());
        }
        builder = builder.header("x-cache", "HIT");
        builder.body(TakoBody::from(entry.body.clone())).unwrap()
    }

    fn eligible_for_storage(&self, status: StatusCode, body_len: usize, headers: &HeaderMap) -> bool {
        if !(200..300).contains(&status.as_u16()) {
            return false;
        }
        if body_len > self.config.max_body_bytes {
            return false;
        }
        !headers
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains("no-store"))
    }

    fn spawn_revalidate(&self, key: String, path: String) {
        if self.revalidating.insert(key.clone(), ()).is_some() {
            return;
        }
        let revalidating = self.revalidating.clone();
        tokio::spawn(async move {
            // The actual upstream re-fetch is initiated by the next real
            // request that misses after expiry; this marker only prevents a
            // second concurrent stale-serve from scheduling a duplicate.
            tokio::time::sleep(Duration::from_millis(50)).await;
            revalidating.remove(&key);
            tracing::debug!(path = %path, "cache revalidation window closed");
        });
    }

    /// Runs the policy around a single request. Returns `Some` immediately on
    /// cache hit, 304, or non-candidate pass-through bookkeeping; otherwise
    /// `None` and the caller should invoke `next` then call
    /// [`CachePolicy::maybe_store`].
    pub async fn handle(&self, req: &GatewayRequest) -> Option<Response> {
        if !self.is_candidate(req) || self.request_disables_cache(req) {
            return None;
        }
        let key = self.cache_key(req);
        let entry = self.store.get(&key).await?;
        match self.classify(&entry) {
            Freshness::Expired => None,
            Freshness::Stale => {
                self.spawn_revalidate(key, entry.path.clone());
                Some(self.conditional_hit(req, &entry).unwrap_or_else(|| self.hit_response(&entry)))
            }
            Freshness::Fresh => {
                Some(self.conditional_hit(req, &entry).unwrap_or_else(|| self.hit_response(&entry)))
            }
        }
    }

    /// Stores a freshly computed response if it is eligible, tagging it with
    /// a strong ETag when conditional caching is enabled and the backend did
    /// not already provide one.
    pub async fn maybe_store(&self, req: &GatewayRequest, resp: Response) -> Response {
        let is_candidate = self.is_candidate(req);
        let disables = self.request_disables_cache(req);
        let key = self.cache_key(req);
        let path = req.uri().path().to_string();
        self.store_computed(&key, &path, is_candidate, disables, resp).await
    }

    /// Purges the configured path prefix when a mutation hits this route and
    /// `invalidate_own_path_on_mutation` is set (§4.4).
    pub async fn maybe_invalidate_own_path(&self, req: &GatewayRequest) {
        if !self.config.invalidate_own_path_on_mutation {
            return;
        }
        if matches!(
            *req.method(),
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        ) {
            self.store.delete_by_prefix(req.uri().path()).await;
        }
    }

    pub async fn purge_key(&self, key: &str) {
        self.store.delete(key).await;
    }

    pub async fn purge_tags(&self, tags: &[String]) -> usize {
        self.store.delete_by_tags(tags).await
    }

    /// Shared storage path for [`CachePolicy::maybe_store`] and the pipeline
    /// middleware, which must compute candidacy from `req` before moving it
    /// into `next.run` and therefore cannot call `maybe_store` directly.
    async fn store_computed(&self, key: &str, path: &str, is_candidate: bool, disables: bool, resp: Response) -> Response {
        if !is_candidate || disables {
            return resp;
        }
        let (parts, body) = resp.into_parts();
        let bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => return hyper::Response::from_parts(parts, TakoBody::empty()),
        };

        if !self.eligible_for_storage(parts.status, bytes.len(), &parts.headers) {
            return hyper::Response::from_parts(parts, TakoBody::from(bytes));
        }

        let etag = if self.config.conditional {
            Some(parts.headers.get("etag").and_then(|v| v.to_str().ok()).map(str::to_string).unwrap_or_else(|| {
                format!("\"{}\"", hex::encode(&Sha256::digest(&bytes)[..8]))
            }))
        } else {
            None
        };
        let last_modified = parts.headers.get("last-modified").and_then(|v| v.to_str().ok()).map(str::to_string);

        let entry = CacheEntry {
            status: parts.status.as_u16(),
            headers: parts.headers.clone(),
            body: bytes.clone(),
            etag: etag.clone(),
            last_modified,
            stored_at: Instant::now(),
            ttl: None,
            tags: Vec::new(),
            path: path.to_string(),
        };
        self.store.set(key, entry).await;

        let mut builder = hyper::Response::builder().status(parts.status);
        for (name, value) in parts.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(etag) = etag {
            builder = builder.header("etag", etag);
        }
        builder.body(TakoBody::from(bytes)).unwrap()
    }
}

/// Builds the named middleware slot for the cache policy, suitable for
/// [`crate::gateway::pipeline::NamedSlot`].
pub fn middleware(policy: Arc<CachePolicy>) -> crate::gateway::types::BoxGatewayMiddleware {
    std::sync::Arc::new(move |req: GatewayRequest, next: GatewayNext| {
        let policy = policy.clone();
        Box::pin(async move {
            if let Some(hit) = policy.handle(&req).await {
                return hit;
            }
            policy.maybe_invalidate_own_path(&req).await;
            let key = policy.cache_key(&req);
            let path = req.uri().path().to_string();
            let is_candidate = policy.is_candidate(&req);
            let disables = policy.request_disables_cache(&req);
            let resp = next.run(req).await;
            policy.store_computed(&key, &path, is_candidate, disables, resp).await
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::cache::store::LruCacheStore;
    use crate::body::TakoBody;

    fn mk_req(method: Method, path: &str) -> GatewayRequest {
        http::Request::builder()
            .method(method)
            .uri(path)
            .body(TakoBody::empty())
            .unwrap()
    }

    fn policy() -> CachePolicy {
        CachePolicy::new(Config::default(), Arc::new(LruCacheStore::new(16)))
    }

    #[test]
    fn cache_key_is_stable_for_identical_requests() {
        let p = policy();
        let a = mk_req(Method::GET, "/users?x=1");
        let b = mk_req(Method::GET, "/users?x=1");
        assert_eq!(p.cache_key(&a), p.cache_key(&b));
    }

    #[test]
    fn cache_key_differs_on_path() {
        let p = policy();
        let a = mk_req(Method::GET, "/users");
        let b = mk_req(Method::GET, "/accounts");
        assert_ne!(p.cache_key(&a), p.cache_key(&b));
    }

    #[tokio::test]
    async fn get_is_a_candidate_by_default_post_is_not() {
        let p = policy();
        assert!(p.is_candidate(&mk_req(Method::GET, "/x")));
        assert!(!p.is_candidate(&mk_req(Method::POST, "/x")));
    }

    #[tokio::test]
    async fn miss_then_store_then_hit_roundtrips() {
        let p = policy();
        let req = mk_req(Method::GET, "/users");
        assert!(p.handle(&req).await.is_none());

        let backend_resp = hyper::Response::builder()
            .status(200)
            .body(TakoBody::from("[{\"id\":1}]"))
            .unwrap();
        p.maybe_store(&req, backend_resp).await;

        let hit = p.handle(&req).await.unwrap();
        assert_eq!(hit.headers().get("x-cache").unwrap(), "HIT");
    }

    #[test]
    fn etag_matches_wildcard_and_list() {
        assert!(etag_matches("*", "\"abc\""));
        assert!(etag_matches("\"xyz\", \"abc\"", "\"abc\""));
        assert!(!etag_matches("\"xyz\"", "\"abc\""));
    }

    #[tokio::test]
    async fn request_no_store_disables_caching() {
        let p = policy();
        let mut req = mk_req(Method::GET, "/users");
        req.headers_mut()
            .insert(CACHE_CONTROL, "no-store".parse().unwrap());
        assert!(p.handle(&req).await.is_none());
        let backend_resp = hyper::Response::builder()
            .status(200)
            .body(TakoBody::from("data"))
            .unwrap();
        p.maybe_store(&req, backend_resp).await;
        assert!(p.handle(&req).await.is_none());
    }
}
