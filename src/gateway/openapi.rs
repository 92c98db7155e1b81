//! OpenAPI Validator (§4.15): request/response validation against a spec
//! document loaded once and shared across every route that binds to it,
//! the same "compile once, reuse everywhere" shape the host framework uses
//! for its JWT decoding keys in [`crate::middleware::jwt_auth`].
//!
//! Schema compilation goes through the `jsonschema` crate (already in the
//! dependency tree); authentication is deliberately out of scope here since
//! the pipeline has dedicated auth middleware elsewhere.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use http_body_util::BodyExt;
use serde_json::Value;

use crate::body::TakoBody;
use crate::gateway::types::{GatewayNext, GatewayRequest};
use crate::types::Response;

#[derive(Debug, thiserror::Error)]
pub enum OpenApiError {
    #[error("failed to parse OpenAPI document: {0}")]
    InvalidDocument(String),
    #[error("no operation found for {method} {path}")]
    UnknownOperation { method: String, path: String },
    #[error("failed to compile schema: {0}")]
    SchemaCompile(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationMode {
    Strict,
    LogOnly,
}

/// One bound operation: the request/response schemas extracted from an
/// OpenAPI `paths.<path>.<method>` entry.
struct Operation {
    request_body_schema: Option<Value>,
    responses: HashMap<String, Value>,
}

/// A spec document loaded once and indexed by `operationId` and by
/// `(method, path-template)` so a route can bind either way.
pub struct OpenApiSpec {
    by_operation_id: HashMap<String, Operation>,
    by_method_path: HashMap<(Method, String), Operation>,
}

impl OpenApiSpec {
    /// Parses a raw OpenAPI 3.x JSON document. YAML documents should be
    /// converted to JSON by the caller before this is reached.
    pub fn parse(document: &str) -> Result<Self, OpenApiError> {
        let doc: Value = serde_json::from_str(document).map_err(|e| OpenApiError::InvalidDocument(e.to_string()))?;
        let mut by_operation_id = HashMap::new();
        let mut by_method_path = HashMap::new();

        let paths = doc.get("paths").and_then(Value::as_object).ok_or_else(|| OpenApiError::InvalidDocument("missing paths object".to_string()))?;

        for (path_template, methods) in paths {
            let Some(methods) = methods.as_object() else { continue };
            for (method_str, op) in methods {
                let Ok(method) = Method::from_bytes(method_str.to_ascii_uppercase().as_bytes()) else { continue };

                let request_body_schema = op
                    .get("requestBody")
                    .and_then(|b| b.get("content"))
                    .and_then(|c| c.get("application/json"))
                    .and_then(|c| c.get("schema"))
                    .cloned();

                let responses = op
                    .get("responses")
                    .and_then(Value::as_object)
                    .map(|responses| {
                        responses
                            .iter()
                            .filter_map(|(status, resp)| {
                                let schema = resp.get("content").and_then(|c| c.get("application/json")).and_then(|c| c.get("schema")).cloned();
                                schema.map(|s| (status.clone(), s))
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                let operation = Operation {
                    request_body_schema,
                    responses,
                };

                if let Some(op_id) = op.get("operationId").and_then(Value::as_str) {
                    by_operation_id.insert(
                        op_id.to_string(),
                        Operation {
                            request_body_schema: operation.request_body_schema.clone(),
                            responses: operation.responses.clone(),
                        },
                    );
                }

                by_method_path.insert((method, router_template(path_template)), operation);
            }
        }

        Ok(Self {
            by_operation_id,
            by_method_path,
        })
    }

    fn operation(&self, operation_id: Option<&str>, method: &Method, path: &str) -> Option<&Operation> {
        if let Some(id) = operation_id
            && let Some(op) = self.by_operation_id.get(id)
        {
            return Some(op);
        }
        self.by_method_path.get(&(method.clone(), path.to_string()))
    }

    /// Enumerates `(router_path, method, is_prefix)` for every operation in
    /// the document, translating OpenAPI's `{x}` template syntax to the
    /// router's `:x` param syntax.
    pub fn auto_routes(&self) -> Vec<(String, Method, bool)> {
        self.by_method_path
            .keys()
            .map(|(method, path)| {
                let is_prefix = path.contains(':');
                (path.clone(), method.clone(), is_prefix)
            })
            .collect()
    }
}

/// Converts `/users/{id}/posts/{postId}` to `/users/:id/posts/:postId`.
fn router_template(openapi_path: &str) -> String {
    let mut out = String::with_capacity(openapi_path.len());
    let mut chars = openapi_path.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '{' {
            out.push(':');
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                out.push(c);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Clone)]
pub struct Config {
    pub operation_id: Option<String>,
    pub request_mode: ValidationMode,
    pub response_mode: Option<ValidationMode>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            operation_id: None,
            request_mode: ValidationMode::Strict,
            response_mode: None,
        }
    }
}

#[derive(Default)]
pub struct ConfigBuilder(Config);

impl ConfigBuilder {
    pub fn new() -> Self {
        Self(Config::default())
    }

    pub fn operation_id(mut self, id: impl Into<String>) -> Self {
        self.0.operation_id = Some(id.into());
        self
    }

    pub fn request_mode(mut self, mode: ValidationMode) -> Self {
        self.0.request_mode = mode;
        self
    }

    pub fn validate_responses(mut self, mode: ValidationMode) -> Self {
        self.0.response_mode = Some(mode);
        self
    }

    pub fn build(self) -> Config {
        self.0
    }
}

pub struct OpenApiPolicy {
    spec: Arc<OpenApiSpec>,
    config: Config,
}

fn validate_json(schema: &Value, instance: &Value) -> Result<(), Vec<String>> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(e) => return Err(vec![e.to_string()]),
    };
    let errors: Vec<String> = validator.iter_errors(instance).map(|e| e.to_string()).collect();
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn validation_error_response(errors: &[String]) -> Response {
    let body = serde_json::json!({ "error": { "message": "request failed schema validation", "details": errors } });
    hyper::Response::builder()
        .status(http::StatusCode::BAD_REQUEST)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(TakoBody::from(body.to_string()))
        .unwrap()
}

impl OpenApiPolicy {
    pub fn new(spec: Arc<OpenApiSpec>, config: Config) -> Self {
        Self { spec, config }
    }

    async fn validate_request(&self, req: GatewayRequest) -> Result<GatewayRequest, Option<Response>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let Some(operation) = self.spec.operation(self.config.operation_id.as_deref(), &method, &path) else {
            return Ok(req);
        };

        let Some(schema) = &operation.request_body_schema else {
            return Ok(req);
        };

        let (parts, body) = req.into_parts();
        let bytes = match body.collect().await {
            Ok(c) => c.to_bytes(),
            Err(_) => return Err(Some(validation_error_response(&["failed to read request body".to_string()]))),
        };

        let instance: Value = if bytes.is_empty() {
            Value::Null
        } else {
            match serde_json::from_slice(&bytes) {
                Ok(v) => v,
                Err(e) => {
                    let rebuilt = http::Request::from_parts(parts, TakoBody::from(bytes));
                    if self.config.request_mode == ValidationMode::LogOnly {
                        tracing::warn!(error = %e, "openapi: request body is not valid JSON, log_only mode");
                        return Ok(rebuilt);
                    }
                    return Err(Some(validation_error_response(&[format!("invalid JSON body: {e}")])));
                }
            }
        };

        let rebuilt = http::Request::from_parts(parts, TakoBody::from(bytes));

        if let Err(errors) = validate_json(schema, &instance) {
            if self.config.request_mode == ValidationMode::LogOnly {
                tracing::warn!(?errors, "openapi: request failed schema validation, log_only mode");
                return Ok(rebuilt);
            }
            return Err(Some(validation_error_response(&errors)));
        }

        Ok(rebuilt)
    }

    async fn validate_response(&self, req_method: &Method, req_path: &str, resp: Response) -> Response {
        let Some(response_mode) = self.config.response_mode else {
            return resp;
        };
        let Some(operation) = self.spec.operation(self.config.operation_id.as_deref(), req_method, req_path) else {
            return resp;
        };
        let Some(schema) = operation.responses.get(&resp.status().as_u16().to_string()) else {
            return resp;
        };

        let (parts, body) = resp.into_parts();
        let bytes = match body.collect().await {
            Ok(c) => c.to_bytes(),
            Err(_) => return hyper::Response::from_parts(parts, TakoBody::empty()),
        };

        let instance: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        if let Err(errors) = validate_json(schema, &instance) {
            tracing::warn!(?errors, "openapi: response failed schema validation");
            if response_mode == ValidationMode::Strict {
                return validation_error_response(&errors);
            }
        }

        hyper::Response::from_parts(parts, TakoBody::from(bytes))
    }
}

/// Builds the named middleware slot for OpenAPI request/response validation (§4.15).
pub fn middleware(policy: Arc<OpenApiPolicy>) -> crate::gateway::types::BoxGatewayMiddleware {
    Arc::new(move |req: GatewayRequest, next: GatewayNext| {
        let policy = policy.clone();
        Box::pin(async move {
            let method = req.method().clone();
            let path = req.uri().path().to_string();

            let req = match policy.validate_request(req).await {
                Ok(req) => req,
                Err(Some(resp)) => return resp,
                Err(None) => unreachable!(),
            };

            let resp = next.run(req).await;
            policy.validate_response(&method, &path, resp).await
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::pipeline::wrap;
    use crate::gateway::types::BoxGatewayHandler;

    fn spec_doc() -> &'static str {
        r#"{
            "openapi": "3.0.0",
            "paths": {
                "/users/{id}": {
                    "post": {
                        "operationId": "createUser",
                        "requestBody": {
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "required": ["name"],
                                        "properties": { "name": { "type": "string" } }
                                    }
                                }
                            }
                        },
                        "responses": {
                            "200": {
                                "content": {
                                    "application/json": {
                                        "schema": {
                                            "type": "object",
                                            "required": ["id"],
                                            "properties": { "id": { "type": "number" } }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }"#
    }

    fn echo_endpoint(body: &'static str) -> BoxGatewayHandler {
        Arc::new(move |_req| Box::pin(async move { hyper::Response::builder().status(200).body(TakoBody::from(body)).unwrap() }))
    }

    #[tokio::test]
    async fn router_template_translates_braces() {
        assert_eq!(router_template("/users/{id}/posts/{postId}"), "/users/:id/posts/:postId");
    }

    #[tokio::test]
    async fn valid_request_body_passes_through() {
        let spec = Arc::new(OpenApiSpec::parse(spec_doc()).unwrap());
        let cfg = ConfigBuilder::new().operation_id("createUser").build();
        let policy = Arc::new(OpenApiPolicy::new(spec, cfg));
        let pipeline = wrap(vec![middleware(policy)], echo_endpoint(r#"{"id":1}"#));

        let req = http::Request::builder()
            .method(Method::POST)
            .uri("/users/:id")
            .body(TakoBody::from(r#"{"name":"ada"}"#))
            .unwrap();
        let resp = pipeline(req).await;
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn invalid_request_body_rejected_strict() {
        let spec = Arc::new(OpenApiSpec::parse(spec_doc()).unwrap());
        let cfg = ConfigBuilder::new().operation_id("createUser").build();
        let policy = Arc::new(OpenApiPolicy::new(spec, cfg));
        let pipeline = wrap(vec![middleware(policy)], echo_endpoint(r#"{"id":1}"#));

        let req = http::Request::builder().method(Method::POST).uri("/users/:id").body(TakoBody::from(r#"{}"#)).unwrap();
        let resp = pipeline(req).await;
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn log_only_mode_passes_invalid_body_through() {
        let spec = Arc::new(OpenApiSpec::parse(spec_doc()).unwrap());
        let cfg = ConfigBuilder::new().operation_id("createUser").request_mode(ValidationMode::LogOnly).build();
        let policy = Arc::new(OpenApiPolicy::new(spec, cfg));
        let pipeline = wrap(vec![middleware(policy)], echo_endpoint(r#"{"id":1}"#));

        let req = http::Request::builder().method(Method::POST).uri("/users/:id").body(TakoBody::from(r#"{}"#)).unwrap();
        let resp = pipeline(req).await;
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn invalid_response_body_rejected_when_response_validation_strict() {
        let spec = Arc::new(OpenApiSpec::parse(spec_doc()).unwrap());
        let cfg = ConfigBuilder::new().operation_id("createUser").validate_responses(ValidationMode::Strict).build();
        let policy = Arc::new(OpenApiPolicy::new(spec, cfg));
        let pipeline = wrap(vec![middleware(policy)], echo_endpoint(r#"{"nope":true}"#));

        let req = http::Request::builder()
            .method(Method::POST)
            .uri("/users/:id")
            .body(TakoBody::from(r#"{"name":"ada"}"#))
            .unwrap();
        let resp = pipeline(req).await;
        assert_eq!(resp.status(), 400);
    }
}
