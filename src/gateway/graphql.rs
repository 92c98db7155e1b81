//! GraphQL Parser (§4.6): APQ resolution plus lightweight AST analysis for
//! depth/complexity/introspection enforcement.
//!
//! This is deliberately not the host framework's [`crate::graphql`] module —
//! that one wires a full `async-graphql` executor (and subscriptions) behind
//! the `async-graphql` feature. The gateway only ever needs to look *at* a
//! GraphQL document well enough to cost it and decide whether to let it
//! through; it never resolves a query. `async-graphql-parser` gives us the
//! AST for that without pulling in an executor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_graphql_parser::types::{ExecutableDocument, OperationType, Selection, SelectionSet};
use dashmap::DashMap;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::body::TakoBody;
use crate::gateway::error::graphql_error_response;
use crate::gateway::types::{GatewayNext, GatewayRequest};
use crate::types::Response;

/// Extension inserted onto a [`GatewayRequest`] once the document has been
/// parsed, so downstream policies (notably the cache key, §4.4) can read the
/// operation shape without re-parsing the body.
#[derive(Clone, Debug)]
pub struct GraphqlInfo {
    pub operation_name: Option<String>,
    pub operation_type: GqlOperationType,
    pub depth: usize,
    pub complexity: usize,
    pub introspection: bool,
    pub variables_hash: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GqlOperationType {
    Query,
    Mutation,
    Subscription,
}

impl From<OperationType> for GqlOperationType {
    fn from(t: OperationType) -> Self {
        match t {
            OperationType::Query => GqlOperationType::Query,
            OperationType::Mutation => GqlOperationType::Mutation,
            OperationType::Subscription => GqlOperationType::Subscription,
        }
    }
}

/// The wire shape of a single GraphQL-over-HTTP request body.
#[derive(Deserialize, Serialize, Clone, Default)]
pub struct GraphqlBody {
    pub query: Option<String>,
    #[serde(default)]
    pub variables: serde_json::Value,
    #[serde(rename = "operationName")]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub extensions: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum GraphqlPolicyError {
    #[error("persisted query not found")]
    PersistedQueryNotFound,
    #[error("persisted query hash mismatch")]
    PersistedQueryHashMismatch,
    #[error("query exceeds max depth")]
    TooDeep,
    #[error("query exceeds max complexity")]
    TooComplex,
    #[error("introspection is disabled")]
    IntrospectionDisabled,
    #[error("operation rate limit exceeded")]
    RateLimited,
    #[error("batching is disabled")]
    BatchingDisabled,
    #[error("batch exceeds size limit")]
    BatchTooLarge,
    #[error("invalid GraphQL request body: {0}")]
    InvalidBody(String),
}

impl GraphqlPolicyError {
    fn status(&self) -> http::StatusCode {
        use GraphqlPolicyError::*;
        match self {
            PersistedQueryNotFound => http::StatusCode::OK,
            IntrospectionDisabled => http::StatusCode::FORBIDDEN,
            RateLimited => http::StatusCode::TOO_MANY_REQUESTS,
            PersistedQueryHashMismatch | TooDeep | TooComplex | BatchingDisabled | BatchTooLarge | InvalidBody(_) => {
                http::StatusCode::BAD_REQUEST
            }
        }
    }

    /// §6: APQ misses are reported with the literal string `PersistedQueryNotFound`.
    fn message(&self) -> String {
        match self {
            GraphqlPolicyError::PersistedQueryNotFound => "PersistedQueryNotFound".to_string(),
            other => other.to_string(),
        }
    }

    pub fn into_response(self) -> Response {
        graphql_error_response(self.status(), &self.message())
    }
}

/// How a batched request is handled once admitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchMode {
    PassThrough,
    Split,
}

#[derive(Clone)]
pub struct Config {
    pub max_depth: Option<usize>,
    pub max_complexity: Option<usize>,
    pub introspection_enabled: bool,
    pub apq_enabled: bool,
    pub apq_cache_size: usize,
    pub batching_enabled: bool,
    pub max_batch_size: usize,
    pub batch_mode: BatchMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_depth: None,
            max_complexity: None,
            introspection_enabled: true,
            apq_enabled: false,
            apq_cache_size: 1000,
            batching_enabled: false,
            max_batch_size: 10,
            batch_mode: BatchMode::PassThrough,
        }
    }
}

#[derive(Default)]
pub struct ConfigBuilder(Config);

impl ConfigBuilder {
    pub fn new() -> Self {
        Self(Config::default())
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.0.max_depth = Some(depth);
        self
    }

    pub fn max_complexity(mut self, complexity: usize) -> Self {
        self.0.max_complexity = Some(complexity);
        self
    }

    pub fn introspection_enabled(mut self, enabled: bool) -> Self {
        self.0.introspection_enabled = enabled;
        self
    }

    pub fn apq(mut self, enabled: bool, cache_size: usize) -> Self {
        self.0.apq_enabled = enabled;
        self.0.apq_cache_size = cache_size;
        self
    }

    pub fn batching(mut self, enabled: bool, max_size: usize, mode: BatchMode) -> Self {
        self.0.batching_enabled = enabled;
        self.0.max_batch_size = max_size;
        self.0.batch_mode = mode;
        self
    }

    pub fn build(self) -> Config {
        self.0
    }
}

struct ApqEntry {
    query: String,
}

/// Persisted-query registry. A simple bounded map is enough here: unlike the
/// response cache this never needs eviction telemetry, just a size cap.
struct ApqStore {
    entries: DashMap<String, ApqEntry>,
    max_size: usize,
}

impl ApqStore {
    fn new(max_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_size,
        }
    }

    fn get(&self, hash: &str) -> Option<String> {
        self.entries.get(hash).map(|e| e.query.clone())
    }

    fn register(&self, hash: String, query: String) {
        if self.entries.len() >= self.max_size && !self.entries.contains_key(&hash) {
            // Best-effort: drop an arbitrary entry rather than growing unbounded.
            if let Some(evict) = self.entries.iter().next().map(|e| e.key().clone()) {
                self.entries.remove(&evict);
            }
        }
        self.entries.insert(hash, ApqEntry { query });
    }
}

/// Per-operation-type token bucket, reset on a fixed window.
struct OperationBucket {
    count: usize,
    window_start: Instant,
}

pub struct GraphqlPolicy {
    config: Config,
    apq: ApqStore,
    buckets: Mutex<std::collections::HashMap<&'static str, OperationBucket>>,
    operation_limits: std::collections::HashMap<&'static str, (usize, Duration)>,
}

impl GraphqlPolicy {
    pub fn new(config: Config) -> Self {
        let apq = ApqStore::new(config.apq_cache_size);
        Self {
            config,
            apq,
            buckets: Mutex::new(std::collections::HashMap::new()),
            operation_limits: std::collections::HashMap::new(),
        }
    }

    pub fn with_operation_limit(mut self, op: &'static str, limit: usize, window: Duration) -> Self {
        self.operation_limits.insert(op, (limit, window));
        self
    }

    fn op_key(op: GqlOperationType) -> &'static str {
        match op {
            GqlOperationType::Query => "query",
            GqlOperationType::Mutation => "mutation",
            GqlOperationType::Subscription => "subscription",
        }
    }

    fn check_bucket(&self, op: GqlOperationType) -> bool {
        let key = Self::op_key(op);
        let Some((limit, window)) = self.operation_limits.get(key).copied() else {
            return true;
        };
        let mut buckets = self.buckets.lock();
        let now = Instant::now();
        let bucket = buckets.entry(key).or_insert_with(|| OperationBucket {
            count: 0,
            window_start: now,
        });
        if now.duration_since(bucket.window_start) >= window {
            bucket.count = 0;
            bucket.window_start = now;
        }
        if bucket.count >= limit {
            return false;
        }
        bucket.count += 1;
        true
    }

    /// Resolves the effective query text, handling APQ lookup/registration.
    /// Returns the query string, or an error response shape on APQ failure.
    fn resolve_query(&self, body: &GraphqlBody) -> Result<String, GraphqlPolicyError> {
        let persisted_hash = body
            .extensions
            .as_ref()
            .and_then(|e| e.get("persistedQuery"))
            .and_then(|p| p.get("sha256Hash"))
            .and_then(|h| h.as_str())
            .map(str::to_string);

        match (&body.query, persisted_hash) {
            (Some(query), Some(hash)) => {
                let actual = hex::encode(Sha256::digest(query.as_bytes()));
                if actual != hash {
                    return Err(GraphqlPolicyError::PersistedQueryHashMismatch);
                }
                self.apq.register(hash, query.clone());
                Ok(query.clone())
            }
            (Some(query), None) => Ok(query.clone()),
            (None, Some(hash)) => self
                .apq
                .get(&hash)
                .ok_or(GraphqlPolicyError::PersistedQueryNotFound),
            (None, None) => Err(GraphqlPolicyError::PersistedQueryNotFound),
        }
    }

    /// Parses and walks the document, producing a [`GraphqlInfo`] or an
    /// enforcement error.
    fn analyze(&self, query: &str, operation_name: Option<&str>, variables: &serde_json::Value) -> Result<GraphqlInfo, GraphqlPolicyError> {
        let doc: ExecutableDocument = async_graphql_parser::parse_query(query)
            .map_err(|e| GraphqlPolicyError::InvalidBody(e.to_string()))?;

        let mut depth = 0usize;
        let mut complexity = 0usize;
        let mut introspection = false;
        let mut op_type = GqlOperationType::Query;

        for (_, op) in doc.operations.iter() {
            op_type = op.node.ty.into();
            let (d, c) = analyze_selection_set(&op.node.selection_set.node, &doc, 1);
            depth = depth.max(d);
            complexity += c;
            introspection = introspection || has_root_introspection_field(&op.node.selection_set.node);
        }
        for (_, frag) in doc.fragments.iter() {
            let (d, c) = analyze_selection_set(&frag.node.selection_set.node, &doc, 1);
            depth = depth.max(d);
            let _ = c;
        }

        if let Some(max_depth) = self.config.max_depth
            && depth > max_depth
        {
            return Err(GraphqlPolicyError::TooDeep);
        }
        if let Some(max_complexity) = self.config.max_complexity
            && complexity > max_complexity
        {
            return Err(GraphqlPolicyError::TooComplex);
        }
        if introspection && !self.config.introspection_enabled {
            return Err(GraphqlPolicyError::IntrospectionDisabled);
        }
        if !self.check_bucket(op_type) {
            return Err(GraphqlPolicyError::RateLimited);
        }

        let mut hasher = Sha256::new();
        hasher.update(variables.to_string().as_bytes());
        let variables_hash = hex::encode(hasher.finalize());

        Ok(GraphqlInfo {
            operation_name: operation_name.map(str::to_string),
            operation_type: op_type,
            depth,
            complexity,
            introspection,
            variables_hash,
        })
    }

    /// Runs the full parse/APQ/analysis pipeline on a single GraphQL body,
    /// returning the info to attach to the request, the (possibly APQ
    /// resolved) query text to re-marshal into the replayed body, or an
    /// enforcement error response.
    fn process_one(&self, mut body: GraphqlBody) -> Result<(GraphqlInfo, GraphqlBody), GraphqlPolicyError> {
        let query = self.resolve_query(&body)?;
        let info = self.analyze(&query, body.operation_name.as_deref(), &body.variables)?;
        body.query = Some(query);
        Ok((info, body))
    }
}

fn is_introspection_field(name: &str) -> bool {
    name.starts_with("__")
}

/// Whether any *direct* field of this selection set is an introspection
/// field. Per §4.6, introspection is a property of the operation's root
/// selection set only — a field named `__typename` nested under a regular
/// field is ordinary GraphQL, not introspection.
fn has_root_introspection_field(set: &SelectionSet) -> bool {
    set.items.iter().any(|selection| match &selection.node {
        Selection::Field(field) => is_introspection_field(field.node.name.node.as_str()),
        Selection::InlineFragment(_) | Selection::FragmentSpread(_) => false,
    })
}

/// Walks a selection set, returning `(max_depth, complexity)`. Fragment
/// spreads are not followed — each fragment is measured independently
/// elsewhere, per §4.6.
fn analyze_selection_set(set: &SelectionSet, _doc: &ExecutableDocument, current_depth: usize) -> (usize, usize) {
    let mut max_depth = current_depth;
    let mut complexity = 0usize;

    for selection in &set.items {
        match &selection.node {
            Selection::Field(field) => {
                if field.node.selection_set.node.items.is_empty() {
                    complexity += 1;
                } else {
                    let (d, c) = analyze_selection_set(&field.node.selection_set.node, _doc, current_depth + 1);
                    max_depth = max_depth.max(d);
                    complexity += 1 + c;
                }
            }
            Selection::InlineFragment(frag) => {
                let (d, c) = analyze_selection_set(&frag.node.selection_set.node, _doc, current_depth + 1);
                max_depth = max_depth.max(d);
                complexity += c;
            }
            Selection::FragmentSpread(_) => {
                complexity += 1;
            }
        }
    }
    (max_depth, complexity)
}

async fn read_body_bytes(req: GatewayRequest) -> (http::request::Parts, bytes::Bytes) {
    let (parts, body) = req.into_parts();
    let bytes = body
        .collect()
        .await
        .map(|c| c.to_bytes())
        .unwrap_or_default();
    (parts, bytes)
}

/// Builds the named middleware slot for the GraphQL policy (§4.6).
///
/// Activates only on `POST` requests with a JSON content type; anything else
/// passes straight through.
pub fn middleware(policy: Arc<GraphqlPolicy>) -> crate::gateway::types::BoxGatewayMiddleware {
    Arc::new(move |req: GatewayRequest, next: GatewayNext| {
        let policy = policy.clone();
        Box::pin(async move {
            let is_json_post = req.method() == http::Method::POST
                && req
                    .headers()
                    .get(http::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|v| v.starts_with("application/json"));
            if !is_json_post {
                return next.run(req).await;
            }

            let (parts, bytes) = read_body_bytes(req).await;
            let value: serde_json::Value = match serde_json::from_slice(&bytes) {
                Ok(v) => v,
                Err(e) => return GraphqlPolicyError::InvalidBody(e.to_string()).into_response(),
            };

            if let serde_json::Value::Array(items) = value {
                return handle_batch(&policy, parts, items, next).await;
            }

            let body: GraphqlBody = match serde_json::from_value(value) {
                Ok(b) => b,
                Err(e) => return GraphqlPolicyError::InvalidBody(e.to_string()).into_response(),
            };

            let (info, resolved) = match policy.process_one(body) {
                Ok(pair) => pair,
                Err(e) => return e.into_response(),
            };

            let mut req = http::Request::from_parts(parts, TakoBody::from(serde_json::to_vec(&resolved).unwrap_or_default()));
            req.extensions_mut().insert(info);
            next.run(req).await
        })
    })
}

async fn handle_batch(
    policy: &Arc<GraphqlPolicy>,
    parts: http::request::Parts,
    items: Vec<serde_json::Value>,
    next: GatewayNext,
) -> Response {
    if !policy.config.batching_enabled {
        return GraphqlPolicyError::BatchingDisabled.into_response();
    }
    if items.len() > policy.config.max_batch_size {
        return GraphqlPolicyError::BatchTooLarge.into_response();
    }

    let mut resolved = Vec::with_capacity(items.len());
    for item in items {
        let body: GraphqlBody = match serde_json::from_value(item) {
            Ok(b) => b,
            Err(e) => return GraphqlPolicyError::InvalidBody(e.to_string()).into_response(),
        };
        match policy.process_one(body) {
            Ok((_, resolved_body)) => resolved.push(resolved_body),
            Err(e) => return e.into_response(),
        }
    }

    match policy.config.batch_mode {
        BatchMode::PassThrough => {
            let body_bytes = serde_json::to_vec(&resolved).unwrap_or_default();
            let req = http::Request::from_parts(parts, TakoBody::from(body_bytes));
            next.run(req).await
        }
        BatchMode::Split => {
            let mut responses = Vec::with_capacity(resolved.len());
            for item in resolved {
                let single_parts = clone_parts(&parts);
                let body_bytes = serde_json::to_vec(&item).unwrap_or_default();
                let req = http::Request::from_parts(single_parts, TakoBody::from(body_bytes));
                let resp = next.clone().run(req).await;
                let (_, body) = resp.into_parts();
                let bytes = body.collect().await.map(|c| c.to_bytes()).unwrap_or_default();
                let value: serde_json::Value =
                    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
                responses.push(value);
            }
            let body_bytes = serde_json::to_vec(&responses).unwrap_or_default();
            hyper::Response::builder()
                .status(http::StatusCode::OK)
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(TakoBody::from(body_bytes))
                .unwrap()
        }
    }
}

fn clone_parts(parts: &http::request::Parts) -> http::request::Parts {
    let mut builder = http::Request::builder().method(parts.method.clone()).uri(parts.uri.clone()).version(parts.version);
    for (name, value) in parts.headers.iter() {
        builder = builder.header(name, value);
    }
    builder.body(()).unwrap().into_parts().0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_policy() -> GraphqlPolicy {
        GraphqlPolicy::new(Config::default())
    }

    #[test]
    fn depth_counts_nested_fields() {
        let policy = mk_policy();
        let info = policy
            .analyze("{ a { b { c } } }", None, &serde_json::Value::Null)
            .unwrap();
        assert_eq!(info.depth, 3);
    }

    #[test]
    fn introspection_field_detected() {
        let policy = mk_policy();
        let info = policy
            .analyze("{ __schema { types { name } } }", None, &serde_json::Value::Null)
            .unwrap();
        assert!(info.introspection);
    }

    #[test]
    fn nested_typename_is_not_introspection() {
        let policy = mk_policy();
        let info = policy
            .analyze("{ user { __typename } }", None, &serde_json::Value::Null)
            .unwrap();
        assert!(!info.introspection);
    }

    #[test]
    fn complexity_counts_field_and_children() {
        let policy = mk_policy();
        let info = policy
            .analyze("{ a b { c } }", None, &serde_json::Value::Null)
            .unwrap();
        // a: leaf = 1. b: has child c (leaf=1) => 1 + 1 = 2. total = 3.
        assert_eq!(info.complexity, 3);
    }

    #[test]
    fn max_depth_enforced() {
        let mut cfg = Config::default();
        cfg.max_depth = Some(1);
        let policy = GraphqlPolicy::new(cfg);
        let err = policy
            .analyze("{ a { b } }", None, &serde_json::Value::Null)
            .unwrap_err();
        assert!(matches!(err, GraphqlPolicyError::TooDeep));
    }

    #[test]
    fn introspection_disabled_rejects() {
        let mut cfg = Config::default();
        cfg.introspection_enabled = false;
        let policy = GraphqlPolicy::new(cfg);
        let err = policy
            .analyze("{ __typename }", None, &serde_json::Value::Null)
            .unwrap_err();
        assert!(matches!(err, GraphqlPolicyError::IntrospectionDisabled));
    }

    #[test]
    fn apq_miss_without_query_is_not_found() {
        let policy = mk_policy();
        let body = GraphqlBody {
            query: None,
            variables: serde_json::Value::Null,
            operation_name: None,
            extensions: Some(serde_json::json!({"persistedQuery": {"sha256Hash": "deadbeef"}})),
        };
        let err = policy.resolve_query(&body).unwrap_err();
        assert!(matches!(err, GraphqlPolicyError::PersistedQueryNotFound));
    }

    #[test]
    fn apq_registers_then_resolves_by_hash() {
        let policy = mk_policy();
        let query = "{ a }".to_string();
        let hash = hex::encode(Sha256::digest(query.as_bytes()));
        let register = GraphqlBody {
            query: Some(query.clone()),
            variables: serde_json::Value::Null,
            operation_name: None,
            extensions: Some(serde_json::json!({"persistedQuery": {"sha256Hash": hash.clone()}})),
        };
        policy.resolve_query(&register).unwrap();

        let lookup = GraphqlBody {
            query: None,
            variables: serde_json::Value::Null,
            operation_name: None,
            extensions: Some(serde_json::json!({"persistedQuery": {"sha256Hash": hash}})),
        };
        assert_eq!(policy.resolve_query(&lookup).unwrap(), query);
    }

    #[test]
    fn apq_hash_mismatch_rejected() {
        let policy = mk_policy();
        let body = GraphqlBody {
            query: Some("{ a }".to_string()),
            variables: serde_json::Value::Null,
            operation_name: None,
            extensions: Some(serde_json::json!({"persistedQuery": {"sha256Hash": "wrong"}})),
        };
        let err = policy.resolve_query(&body).unwrap_err();
        assert!(matches!(err, GraphqlPolicyError::PersistedQueryHashMismatch));
    }
}
