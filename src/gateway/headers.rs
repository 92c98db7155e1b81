//! CDN & Security Headers (§4.12): deterministic, precomputed response
//! header injection. Both header sets are built once at route-build time
//! (mirroring how [`crate::plugins::cors`] precomputes its header values
//! rather than reformatting them per-request) and applied verbatim to every
//! response.

use std::sync::Arc;
use std::time::Duration;

use http::{HeaderName, HeaderValue, header::CACHE_CONTROL};

use crate::gateway::types::{GatewayNext, GatewayRequest};
use crate::types::Response;

#[derive(Clone)]
pub enum Expires {
    /// Rendered to an HTTP-date `Duration` from now, at apply time.
    In(Duration),
    /// Passed through verbatim (already an HTTP-date).
    At(String),
}

#[derive(Clone, Default)]
pub struct CdnConfig {
    pub cache_control_directives: Vec<String>,
    pub stale_while_revalidate: Option<Duration>,
    pub stale_if_error: Option<Duration>,
    pub vary: Vec<String>,
    pub surrogate_control: Option<String>,
    pub surrogate_key: Option<String>,
    pub expires: Option<Expires>,
    pub override_backend_cache_control: bool,
}

impl CdnConfig {
    fn cache_control_value(&self) -> Option<String> {
        if self.cache_control_directives.is_empty() && self.stale_while_revalidate.is_none() && self.stale_if_error.is_none() {
            return None;
        }
        let mut parts = self.cache_control_directives.clone();
        if let Some(swr) = self.stale_while_revalidate {
            parts.push(format!("stale-while-revalidate={}", swr.as_secs()));
        }
        if let Some(sie) = self.stale_if_error {
            parts.push(format!("stale-if-error={}", sie.as_secs()));
        }
        Some(parts.join(", "))
    }
}

#[derive(Clone)]
pub struct SecurityConfig {
    pub content_type_options_nosniff: bool,
    pub strict_transport_security: Option<String>,
    pub content_security_policy: Option<String>,
    pub x_frame_options: Option<String>,
    pub referrer_policy: Option<String>,
    pub permissions_policy: Option<String>,
    pub cross_origin_opener_policy: Option<String>,
    pub cross_origin_embedder_policy: Option<String>,
    pub cross_origin_resource_policy: Option<String>,
    pub custom: Vec<(String, String)>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            content_type_options_nosniff: true,
            strict_transport_security: None,
            content_security_policy: None,
            x_frame_options: None,
            referrer_policy: None,
            permissions_policy: None,
            cross_origin_opener_policy: None,
            cross_origin_embedder_policy: None,
            cross_origin_resource_policy: None,
            custom: Vec::new(),
        }
    }
}

/// Resolved, ready-to-apply header list; computed once at build time from a
/// [`CdnConfig`]/[`SecurityConfig`] pair so the per-request path is just a
/// loop over `(HeaderName, HeaderValue)`.
pub struct HeaderPolicy {
    cdn: CdnConfig,
    static_headers: Vec<(HeaderName, HeaderValue)>,
}

impl HeaderPolicy {
    pub fn new(cdn: CdnConfig, security: SecurityConfig) -> Self {
        let mut static_headers = Vec::new();

        if security.content_type_options_nosniff {
            static_headers.push((HeaderName::from_static("x-content-type-options"), HeaderValue::from_static("nosniff")));
        }
        push_opt(&mut static_headers, "strict-transport-security", security.strict_transport_security);
        push_opt(&mut static_headers, "content-security-policy", security.content_security_policy);
        push_opt(&mut static_headers, "x-frame-options", security.x_frame_options);
        push_opt(&mut static_headers, "referrer-policy", security.referrer_policy);
        push_opt(&mut static_headers, "permissions-policy", security.permissions_policy);
        push_opt(&mut static_headers, "cross-origin-opener-policy", security.cross_origin_opener_policy);
        push_opt(&mut static_headers, "cross-origin-embedder-policy", security.cross_origin_embedder_policy);
        push_opt(&mut static_headers, "cross-origin-resource-policy", security.cross_origin_resource_policy);
        for (name, value) in security.custom {
            push_opt(&mut static_headers, &name, Some(value));
        }

        if !cdn.vary.is_empty() {
            static_headers.push((http::header::VARY, HeaderValue::from_str(&cdn.vary.join(", ")).unwrap_or(HeaderValue::from_static(""))));
        }
        push_opt(&mut static_headers, "surrogate-control", cdn.surrogate_control.clone());
        push_opt(&mut static_headers, "surrogate-key", cdn.surrogate_key.clone());

        Self { cdn, static_headers }
    }

    fn apply(&self, parts: &mut http::response::Parts) {
        for (name, value) in &self.static_headers {
            parts.headers.insert(name.clone(), value.clone());
        }

        if let Some(cc) = self.cdn.cache_control_value() {
            let already_set = parts.headers.contains_key(CACHE_CONTROL);
            if !already_set || self.cdn.override_backend_cache_control {
                if let Ok(v) = HeaderValue::from_str(&cc) {
                    parts.headers.insert(CACHE_CONTROL, v);
                }
            }
        }

        if let Some(expires) = &self.cdn.expires {
            let value = match expires {
                Expires::In(d) => httpdate::fmt_http_date(std::time::SystemTime::now() + *d),
                Expires::At(s) => s.clone(),
            };
            if let Ok(v) = HeaderValue::from_str(&value) {
                parts.headers.insert("expires", v);
            }
        }
    }
}

fn push_opt(list: &mut Vec<(HeaderName, HeaderValue)>, name: &str, value: Option<String>) {
    if let Some(v) = value
        && let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::from_str(&v))
    {
        list.push((name, value));
    }
}

/// Minimal RFC 7231 HTTP-date formatter, avoiding a dependency on a crate
/// dedicated to this one format — chrono's UTC formatting already covers it.
mod httpdate {
    use std::time::SystemTime;

    pub fn fmt_http_date(time: SystemTime) -> String {
        let datetime: chrono::DateTime<chrono::Utc> = time.into();
        datetime.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
    }
}

/// Builds the named middleware slot for CDN + security header injection (§4.12).
pub fn middleware(policy: Arc<HeaderPolicy>) -> crate::gateway::types::BoxGatewayMiddleware {
    Arc::new(move |req: GatewayRequest, next: GatewayNext| {
        let policy = policy.clone();
        Box::pin(async move {
            let resp: Response = next.run(req).await;
            let (mut parts, body) = resp.into_parts();
            policy.apply(&mut parts);
            hyper::Response::from_parts(parts, body)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::TakoBody;
    use crate::gateway::pipeline::wrap;
    use crate::gateway::types::BoxGatewayHandler;

    fn ok_endpoint() -> BoxGatewayHandler {
        Arc::new(|_req| Box::pin(async move { hyper::Response::builder().status(200).body(TakoBody::empty()).unwrap() }))
    }

    fn mk_req() -> GatewayRequest {
        http::Request::builder().method(http::Method::GET).uri("/x").body(TakoBody::empty()).unwrap()
    }

    #[tokio::test]
    async fn default_security_headers_applied() {
        let policy = Arc::new(HeaderPolicy::new(CdnConfig::default(), SecurityConfig::default()));
        let pipeline = wrap(vec![middleware(policy)], ok_endpoint());
        let resp = pipeline(mk_req()).await;
        assert_eq!(resp.headers().get("x-content-type-options").unwrap(), "nosniff");
    }

    #[tokio::test]
    async fn cdn_cache_control_built_from_directives_and_stale_windows() {
        let cdn = CdnConfig {
            cache_control_directives: vec!["public".to_string(), "max-age=60".to_string()],
            stale_while_revalidate: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let policy = Arc::new(HeaderPolicy::new(cdn, SecurityConfig::default()));
        let pipeline = wrap(vec![middleware(policy)], ok_endpoint());
        let resp = pipeline(mk_req()).await;
        let cc = resp.headers().get(CACHE_CONTROL).unwrap().to_str().unwrap();
        assert!(cc.contains("public"));
        assert!(cc.contains("stale-while-revalidate=30"));
    }

    #[tokio::test]
    async fn override_flag_controls_replacement_of_backend_cache_control() {
        fn backend_with_cc() -> BoxGatewayHandler {
            Arc::new(|_req| {
                Box::pin(async move {
                    hyper::Response::builder().status(200).header(CACHE_CONTROL, "private").body(TakoBody::empty()).unwrap()
                })
            })
        }

        let cdn = CdnConfig {
            cache_control_directives: vec!["public".to_string()],
            override_backend_cache_control: false,
            ..Default::default()
        };
        let policy = Arc::new(HeaderPolicy::new(cdn.clone(), SecurityConfig::default()));
        let pipeline = wrap(vec![middleware(policy)], backend_with_cc());
        let resp = pipeline(mk_req()).await;
        assert_eq!(resp.headers().get(CACHE_CONTROL).unwrap(), "private");

        let cdn_override = CdnConfig {
            override_backend_cache_control: true,
            ..cdn
        };
        let policy2 = Arc::new(HeaderPolicy::new(cdn_override, SecurityConfig::default()));
        let pipeline2 = wrap(vec![middleware(policy2)], backend_with_cc());
        let resp2 = pipeline2(mk_req()).await;
        assert_eq!(resp2.headers().get(CACHE_CONTROL).unwrap(), "public");
    }
}
