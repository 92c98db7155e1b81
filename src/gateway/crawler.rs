//! AI-Crawler Detector (§4.8): a cheap user-agent pre-screen followed by
//! ordered pattern matching and per-path action resolution.
//!
//! The common case (no AI crawler) must stay fast: a single lowercase pass
//! over the UA plus a keyword substring check, mirroring the host
//! framework's own "cheap check before expensive check" shape in
//! [`crate::plugins::rate_limiter`]'s bucket lookup. Path allow/disallow
//! lists reuse [`globset`], already a crate dependency for the static file
//! and OpenAPI route matchers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use globset::{Glob, GlobSet, GlobSetBuilder};
use http::StatusCode;

use crate::body::TakoBody;
use crate::gateway::types::{GatewayNext, GatewayRequest};
use crate::types::Response;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Allow,
    Monitor,
    Block,
}

/// A UA substring or set of substrings identifying one crawler. Treated as
/// "the compiled pattern" of §3 — AI-crawler UA strings are stable literal
/// tokens (`GPTBot`, `CCBot`, ...) rather than a need for full regex.
#[derive(Clone)]
pub struct Pattern {
    tokens: Vec<String>,
}

impl Pattern {
    pub fn new(tokens: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tokens: tokens.into_iter().map(|t| t.into().to_ascii_lowercase()).collect(),
        }
    }

    fn matches(&self, lowercase_ua: &str) -> bool {
        self.tokens.iter().any(|t| lowercase_ua.contains(t.as_str()))
    }
}

pub struct CrawlerRule {
    pub name: String,
    pub pattern: Pattern,
    pub default_action: Action,
    pub disallow_paths: Option<GlobSet>,
    pub allow_paths: Option<GlobSet>,
}

fn build_globset(patterns: &[String]) -> Option<GlobSet> {
    if patterns.is_empty() {
        return None;
    }
    let mut builder = GlobSetBuilder::new();
    for p in patterns {
        if let Ok(glob) = Glob::new(p) {
            builder.add(glob);
        }
    }
    builder.build().ok()
}

pub struct CrawlerRuleSpec {
    pub name: String,
    pub tokens: Vec<String>,
    pub default_action: Action,
    pub disallow_paths: Vec<String>,
    pub allow_paths: Vec<String>,
}

impl CrawlerRuleSpec {
    pub fn new(name: impl Into<String>, tokens: Vec<&str>, default_action: Action) -> Self {
        Self {
            name: name.into(),
            tokens: tokens.into_iter().map(str::to_string).collect(),
            default_action,
            disallow_paths: Vec::new(),
            allow_paths: Vec::new(),
        }
    }

    pub fn disallow(mut self, paths: Vec<&str>) -> Self {
        self.disallow_paths = paths.into_iter().map(str::to_string).collect();
        self
    }

    pub fn allow(mut self, paths: Vec<&str>) -> Self {
        self.allow_paths = paths.into_iter().map(str::to_string).collect();
        self
    }

    fn build(self) -> CrawlerRule {
        CrawlerRule {
            name: self.name,
            pattern: Pattern::new(self.tokens),
            default_action: self.default_action,
            disallow_paths: build_globset(&self.disallow_paths),
            allow_paths: build_globset(&self.allow_paths),
        }
    }
}

/// The builtin catalogue: well-known AI-crawler user agents. Registration
/// order matters (§9: first-match-wins is a deliberate contract).
fn builtin_rules() -> Vec<CrawlerRuleSpec> {
    vec![
        CrawlerRuleSpec::new("GPTBot", vec!["gptbot"], Action::Block),
        CrawlerRuleSpec::new("ChatGPT-User", vec!["chatgpt-user"], Action::Block),
        CrawlerRuleSpec::new("Google-Extended", vec!["google-extended"], Action::Monitor),
        CrawlerRuleSpec::new("CCBot", vec!["ccbot"], Action::Block),
        CrawlerRuleSpec::new("anthropic-ai", vec!["anthropic-ai", "claudebot"], Action::Monitor),
        CrawlerRuleSpec::new("PerplexityBot", vec!["perplexitybot"], Action::Block),
        CrawlerRuleSpec::new("Bytespider", vec!["bytespider"], Action::Block),
    ]
}

/// Per-crawler counters (§3). [`Detector::total_counters`] holds the same
/// shape aggregated across every crawler.
#[derive(Default)]
pub struct CrawlerCounters {
    pub requests: AtomicU64,
    pub blocked: AtomicU64,
    pub allowed: AtomicU64,
    pub monitored: AtomicU64,
}

#[derive(Clone)]
pub struct Config {
    pub expose_headers: bool,
    pub block_status: StatusCode,
    pub block_body: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            expose_headers: true,
            block_status: StatusCode::FORBIDDEN,
            block_body: "{\"error\":{\"message\":\"AI crawler blocked\"}}".to_string(),
        }
    }
}

pub struct Detector {
    config: Config,
    custom: Vec<CrawlerRule>,
    builtin: Vec<CrawlerRule>,
    keywords: Vec<String>,
    counters: HashMap<String, CrawlerCounters>,
    total: CrawlerCounters,
}

pub struct DetectorBuilder {
    config: Config,
    custom: Vec<CrawlerRuleSpec>,
}

impl DetectorBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            custom: Vec::new(),
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn custom_rule(mut self, rule: CrawlerRuleSpec) -> Self {
        self.custom.push(rule);
        self
    }

    pub fn build(self) -> Detector {
        let custom: Vec<CrawlerRule> = self.custom.into_iter().map(CrawlerRuleSpec::build).collect();
        let builtin: Vec<CrawlerRule> = builtin_rules().into_iter().map(CrawlerRuleSpec::build).collect();

        let mut keywords = Vec::new();
        for rule in custom.iter().chain(builtin.iter()) {
            keywords.extend(rule.pattern.tokens.iter().cloned());
        }

        let mut counters = HashMap::new();
        for rule in custom.iter().chain(builtin.iter()) {
            counters.insert(rule.name.clone(), CrawlerCounters::default());
        }

        Detector {
            config: self.config,
            custom,
            builtin,
            keywords,
            counters,
            total: CrawlerCounters::default(),
        }
    }
}

impl Default for DetectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Detection<'a> {
    pub rule: &'a CrawlerRule,
    pub action: Action,
}

impl Detector {
    /// Stage 1 of §4.8: a single lowercase pass, then a keyword substring
    /// pre-screen. Only on a hit do we walk the ordered rule lists.
    fn classify<'a>(&'a self, user_agent: &str) -> Option<&'a CrawlerRule> {
        let lowered = user_agent.to_ascii_lowercase();
        if !self.keywords.iter().any(|k| lowered.contains(k.as_str())) {
            return None;
        }
        self.custom
            .iter()
            .chain(self.builtin.iter())
            .find(|rule| rule.pattern.matches(&lowered))
    }

    fn resolve_action(&self, rule: &CrawlerRule, path: &str) -> Action {
        if let Some(allow) = &rule.allow_paths {
            if allow.is_match(path) {
                return rule.default_action;
            }
            return Action::Block;
        }
        if let Some(disallow) = &rule.disallow_paths
            && disallow.is_match(path)
        {
            return Action::Block;
        }
        rule.default_action
    }

    pub fn detect(&self, user_agent: &str, path: &str) -> Option<(String, Action)> {
        let rule = self.classify(user_agent)?;
        let action = self.resolve_action(rule, path);
        Some((rule.name.clone(), action))
    }

    fn record(&self, name: &str, action: Action) {
        let Some(counters) = self.counters.get(name) else {
            return;
        };
        counters.requests.fetch_add(1, Ordering::Relaxed);
        self.total.requests.fetch_add(1, Ordering::Relaxed);
        match action {
            Action::Allow => {
                counters.allowed.fetch_add(1, Ordering::Relaxed);
                self.total.allowed.fetch_add(1, Ordering::Relaxed);
            }
            Action::Monitor => {
                counters.monitored.fetch_add(1, Ordering::Relaxed);
                self.total.monitored.fetch_add(1, Ordering::Relaxed);
            }
            Action::Block => {
                counters.blocked.fetch_add(1, Ordering::Relaxed);
                self.total.blocked.fetch_add(1, Ordering::Relaxed);
            }
        };
    }

    pub fn counters(&self, name: &str) -> Option<(u64, u64, u64, u64)> {
        self.counters.get(name).map(|c| {
            (
                c.requests.load(Ordering::Relaxed),
                c.blocked.load(Ordering::Relaxed),
                c.allowed.load(Ordering::Relaxed),
                c.monitored.load(Ordering::Relaxed),
            )
        })
    }

    /// Requests/blocked/allowed/monitored summed across every crawler.
    pub fn total_counters(&self) -> (u64, u64, u64, u64) {
        (
            self.total.requests.load(Ordering::Relaxed),
            self.total.blocked.load(Ordering::Relaxed),
            self.total.allowed.load(Ordering::Relaxed),
            self.total.monitored.load(Ordering::Relaxed),
        )
    }
}

fn block_response(config: &Config, crawler_name: &str) -> Response {
    let mut builder = hyper::Response::builder()
        .status(config.block_status)
        .header(http::header::CONTENT_TYPE, "application/json");
    if config.expose_headers {
        builder = builder.header("x-ai-crawler-blocked", crawler_name);
    }
    builder.body(TakoBody::from(config.block_body.clone())).unwrap()
}

/// Builds the named middleware slot for AI-crawler detection (§4.8).
pub fn middleware(detector: Arc<Detector>) -> crate::gateway::types::BoxGatewayMiddleware {
    Arc::new(move |req: GatewayRequest, next: GatewayNext| {
        let detector = detector.clone();
        Box::pin(async move {
            let ua = req.headers().get(http::header::USER_AGENT).and_then(|v| v.to_str().ok()).unwrap_or("");
            let path = req.uri().path().to_string();

            let Some((name, action)) = detector.detect(ua, &path) else {
                return next.run(req).await;
            };
            detector.record(&name, action);

            match action {
                Action::Block => block_response(&detector.config, &name),
                Action::Monitor => {
                    let resp = next.run(req).await;
                    if detector.config.expose_headers {
                        let (mut parts, body) = resp.into_parts();
                        if let Ok(v) = http::HeaderValue::from_str(&name) {
                            parts.headers.insert("x-ai-crawler-detected", v);
                        }
                        hyper::Response::from_parts(parts, body)
                    } else {
                        resp
                    }
                }
                Action::Allow => next.run(req).await,
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::pipeline::wrap;
    use crate::gateway::types::BoxGatewayHandler;

    fn mk_req(ua: &str, path: &str) -> GatewayRequest {
        http::Request::builder()
            .method(http::Method::GET)
            .uri(path)
            .header(http::header::USER_AGENT, ua)
            .body(TakoBody::empty())
            .unwrap()
    }

    fn ok_endpoint() -> BoxGatewayHandler {
        Arc::new(|_req| Box::pin(async move { hyper::Response::builder().status(200).body(TakoBody::empty()).unwrap() }))
    }

    #[test]
    fn no_keyword_match_returns_none() {
        let detector = DetectorBuilder::new().build();
        assert!(detector.detect("Mozilla/5.0 normal browser", "/x").is_none());
    }

    #[test]
    fn builtin_gptbot_blocks_by_default() {
        let detector = DetectorBuilder::new().build();
        let (name, action) = detector.detect("Mozilla/5.0 GPTBot/1.0", "/x").unwrap();
        assert_eq!(name, "GPTBot");
        assert_eq!(action, Action::Block);
    }

    #[test]
    fn allow_paths_grant_default_action_elsewhere_blocks() {
        let detector = DetectorBuilder::new()
            .custom_rule(CrawlerRuleSpec::new("custom", vec!["testbot"], Action::Allow).allow(vec!["/public/*"]))
            .build();
        let (_, action) = detector.detect("testbot/1.0", "/public/page").unwrap();
        assert_eq!(action, Action::Allow);
        let (_, blocked) = detector.detect("testbot/1.0", "/private/page").unwrap();
        assert_eq!(blocked, Action::Block);
    }

    #[test]
    fn disallow_paths_force_block_even_for_monitor_default() {
        let detector = DetectorBuilder::new()
            .custom_rule(CrawlerRuleSpec::new("custom", vec!["testbot"], Action::Monitor).disallow(vec!["/secret/*"]))
            .build();
        let (_, action) = detector.detect("testbot/1.0", "/secret/data").unwrap();
        assert_eq!(action, Action::Block);
        let (_, action2) = detector.detect("testbot/1.0", "/public").unwrap();
        assert_eq!(action2, Action::Monitor);
    }

    #[test]
    fn custom_pattern_wins_over_builtin_overlap() {
        let detector = DetectorBuilder::new()
            .custom_rule(CrawlerRuleSpec::new("custom-gpt", vec!["gptbot"], Action::Allow))
            .build();
        let (name, action) = detector.detect("GPTBot", "/x").unwrap();
        assert_eq!(name, "custom-gpt");
        assert_eq!(action, Action::Allow);
    }

    #[tokio::test]
    async fn blocked_request_never_reaches_backend() {
        let detector = Arc::new(DetectorBuilder::new().build());
        let mw = middleware(detector);
        let pipeline = wrap(vec![mw], ok_endpoint());
        let resp = pipeline(mk_req("CCBot/2.0", "/x")).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn monitor_passes_through_and_tags_header() {
        let detector = Arc::new(DetectorBuilder::new().build());
        let mw = middleware(detector);
        let pipeline = wrap(vec![mw], ok_endpoint());
        let resp = pipeline(mk_req("anthropic-ai/1.0", "/x")).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers().get("x-ai-crawler-detected").unwrap(), "anthropic-ai");
    }

    #[tokio::test]
    async fn total_counters_aggregate_across_crawlers() {
        let detector = Arc::new(DetectorBuilder::new().build());
        let mw = middleware(detector.clone());
        let pipeline = wrap(vec![mw], ok_endpoint());

        let _ = pipeline(mk_req("CCBot/2.0", "/x")).await;
        let _ = pipeline(mk_req("anthropic-ai/1.0", "/x")).await;
        let _ = pipeline(mk_req("GPTBot/1.0", "/x")).await;

        let (requests, blocked, allowed, monitored) = detector.total_counters();
        assert_eq!(requests, 3);
        assert_eq!(blocked, 2);
        assert_eq!(allowed, 0);
        assert_eq!(monitored, 1);

        let (ccbot_requests, ..) = detector.counters("CCBot").unwrap();
        assert_eq!(ccbot_requests, 1);
    }
}
