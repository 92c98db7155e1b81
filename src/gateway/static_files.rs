//! Static Files (§4.14): safe directory serving as a pipeline policy rather
//! than a standalone handler. Path resolution and MIME detection are lifted
//! straight from [`crate::r#static::ServeDir`]; this module adds `..`
//! rejection up front, directory-index lookup, an optional directory
//! listing, and a policy-level `Cache-Control` override that `ServeDir`
//! doesn't have.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use http::StatusCode;
use tokio::fs;

use crate::body::TakoBody;
use crate::gateway::types::{GatewayNext, GatewayRequest};
use crate::types::Response;

#[derive(Clone)]
pub struct Config {
    pub root: PathBuf,
    pub index_file: String,
    pub directory_listing: bool,
    pub cache_control: Option<String>,
}

impl Config {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index_file: "index.html".to_string(),
            directory_listing: false,
            cache_control: None,
        }
    }
}

#[derive(Default)]
pub struct ConfigBuilder(Option<Config>);

impl ConfigBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self(Some(Config::new(root)))
    }

    fn cfg(&mut self) -> &mut Config {
        self.0.as_mut().expect("ConfigBuilder used after build()")
    }

    pub fn index_file(mut self, name: impl Into<String>) -> Self {
        self.cfg().index_file = name.into();
        self
    }

    pub fn directory_listing(mut self, enabled: bool) -> Self {
        self.cfg().directory_listing = enabled;
        self
    }

    pub fn cache_control(mut self, value: impl Into<String>) -> Self {
        self.cfg().cache_control = Some(value.into());
        self
    }

    pub fn build(mut self) -> Config {
        self.0.take().expect("ConfigBuilder used after build()")
    }
}

pub struct StaticFilesPolicy {
    config: Config,
}

fn clean_path(req_path: &str) -> Option<PathBuf> {
    if req_path.contains("..") {
        return None;
    }
    let rel = req_path.trim_start_matches('/');
    Some(PathBuf::from(rel))
}

impl StaticFilesPolicy {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    async fn serve_file(&self, path: &Path) -> Option<Response> {
        let contents = fs::read(path).await.ok()?;
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let mut builder = hyper::Response::builder().status(StatusCode::OK).header(http::header::CONTENT_TYPE, mime.to_string());
        if let Some(cc) = &self.config.cache_control {
            builder = builder.header(http::header::CACHE_CONTROL, cc.as_str());
        }
        Some(builder.body(TakoBody::from(contents)).unwrap())
    }

    async fn listing(&self, dir: &Path, req_path: &str) -> Response {
        let mut entries = Vec::new();
        if let Ok(mut read_dir) = fs::read_dir(dir).await {
            while let Ok(Some(entry)) = read_dir.next_entry().await {
                if let Some(name) = entry.file_name().to_str() {
                    entries.push(name.to_string());
                }
            }
        }
        entries.sort();
        let base = req_path.trim_end_matches('/');
        let links: String = entries
            .iter()
            .map(|name| format!("<li><a href=\"{base}/{name}\">{name}</a></li>"))
            .collect();
        let body = format!("<html><body><ul>{links}</ul></body></html>");
        hyper::Response::builder()
            .status(StatusCode::OK)
            .header(http::header::CONTENT_TYPE, "text/html; charset=utf-8")
            .body(TakoBody::from(body))
            .unwrap()
    }

    async fn handle(&self, req_path: &str) -> Response {
        let Some(rel) = clean_path(req_path) else {
            return not_found();
        };
        let resolved = self.config.root.join(&rel);

        match fs::metadata(&resolved).await {
            Ok(meta) if meta.is_file() => self.serve_file(&resolved).await.unwrap_or_else(not_found),
            Ok(meta) if meta.is_dir() => {
                let index_path = resolved.join(&self.config.index_file);
                if let Some(resp) = self.serve_file(&index_path).await {
                    return resp;
                }
                if self.config.directory_listing {
                    self.listing(&resolved, req_path).await
                } else {
                    forbidden()
                }
            }
            _ => not_found(),
        }
    }
}

fn not_found() -> Response {
    hyper::Response::builder().status(StatusCode::NOT_FOUND).body(TakoBody::from("not found")).unwrap()
}

fn forbidden() -> Response {
    hyper::Response::builder().status(StatusCode::FORBIDDEN).body(TakoBody::from("directory listing disabled")).unwrap()
}

/// Builds the named middleware slot for static file serving (§4.14). Treated
/// as a terminal policy: it never calls `next`, serving directly from disk.
pub fn middleware(policy: Arc<StaticFilesPolicy>) -> crate::gateway::types::BoxGatewayMiddleware {
    Arc::new(move |req: GatewayRequest, _next: GatewayNext| {
        let policy = policy.clone();
        Box::pin(async move { policy.handle(req.uri().path()).await })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("hello.txt"), b"hi").await.unwrap();
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();
        tokio::fs::write(dir.path().join("sub").join("index.html"), b"<p>index</p>").await.unwrap();
        dir
    }

    #[tokio::test]
    async fn serves_existing_file_with_mime() {
        let dir = write_tree().await;
        let policy = StaticFilesPolicy::new(Config::new(dir.path()));
        let resp = policy.handle("/hello.txt").await;
        assert_eq!(resp.status(), 200);
        assert!(resp.headers().get(http::header::CONTENT_TYPE).unwrap().to_str().unwrap().starts_with("text/plain"));
    }

    #[tokio::test]
    async fn directory_serves_index_file() {
        let dir = write_tree().await;
        let policy = StaticFilesPolicy::new(Config::new(dir.path()));
        let resp = policy.handle("/sub").await;
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn missing_file_returns_404() {
        let dir = write_tree().await;
        let policy = StaticFilesPolicy::new(Config::new(dir.path()));
        let resp = policy.handle("/nope.txt").await;
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn dotdot_path_is_rejected() {
        let dir = write_tree().await;
        let policy = StaticFilesPolicy::new(Config::new(dir.path()));
        let resp = policy.handle("/../Cargo.toml").await;
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn directory_without_index_is_403_when_listing_disabled() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("empty")).await.unwrap();
        let policy = StaticFilesPolicy::new(Config::new(dir.path()));
        let resp = policy.handle("/empty").await;
        assert_eq!(resp.status(), 403);
    }

    #[tokio::test]
    async fn directory_listing_enabled_returns_html() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("empty")).await.unwrap();
        tokio::fs::write(dir.path().join("empty").join("a.txt"), b"a").await.unwrap();
        let cfg = ConfigBuilder::new(dir.path()).directory_listing(true).build();
        let policy = StaticFilesPolicy::new(cfg);
        let resp = policy.handle("/empty").await;
        assert_eq!(resp.status(), 200);
    }
}
