//! Cache Store: a pluggable key → entry store with TTL, LRU eviction, and a
//! tag/prefix index.
//!
//! Two implementations are provided: [`LruCacheStore`], a bounded in-process
//! LRU guarded by a single lock (mirroring how the host framework guards its
//! own rate-limiter bucket map — see [`crate::plugins::rate_limiter`]), and
//! [`RemoteCacheStore`], a fail-open client for an external key/value service
//! reached over the host framework's own minimal hyper client
//! ([`crate::client`]).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// A cached HTTP response plus the bookkeeping the cache policy needs.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub stored_at: Instant,
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    pub path: String,
}

/// Aggregate store statistics, exposed to an embedding app as plain atomics
/// (§10.6: no metrics backend dependency lives in this crate).
#[derive(Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    /// Hit/miss/eviction counters, for an embedding app that wants more than
    /// the `Stats` operation's contracted shape.
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.evictions.load(Ordering::Relaxed),
        )
    }
}

/// Result of the `Stats` operation (§3: `Cache Store`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheStoreStats {
    pub size: usize,
    pub max_size: usize,
    pub evictions: u64,
}

/// Capability contract shared by both store backends (§3: `Cache Store`).
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<CacheEntry>;
    async fn set(&self, key: &str, entry: CacheEntry);
    async fn set_with_tags(&self, key: &str, entry: CacheEntry, tags: &[String]);
    async fn delete(&self, key: &str);
    async fn delete_by_prefix(&self, prefix: &str) -> usize;
    async fn delete_by_tags(&self, tags: &[String]) -> usize;
    async fn purge(&self);
    fn stats(&self) -> CacheStoreStats;
}

struct LruInner {
    lru: LruCache<String, CacheEntry>,
    tag_to_keys: HashMap<String, HashSet<String>>,
    key_to_tags: HashMap<String, Vec<String>>,
    /// path -> set of cache keys derived from a request to that path, used by
    /// the cache policy's glob-based purge (§4.4).
    path_to_keys: HashMap<String, HashSet<String>>,
}

/// Bounded in-process LRU implementing §4.2.
pub struct LruCacheStore {
    inner: Mutex<LruInner>,
    max_size: usize,
    stats: CacheStats,
}

impl LruCacheStore {
    pub fn new(max_size: usize) -> Self {
        let cap = NonZeroUsize::new(max_size.max(1)).unwrap();
        Self {
            inner: Mutex::new(LruInner {
                lru: LruCache::new(cap),
                tag_to_keys: HashMap::new(),
                key_to_tags: HashMap::new(),
                path_to_keys: HashMap::new(),
            }),
            max_size,
            stats: CacheStats::default(),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Removes `key` from the tag and path reverse indexes. Called both from
    /// explicit deletes and from the LRU's own eviction path so invariant (a)
    /// in §3 (every indexed tag refers to a live key) always holds.
    fn unindex(inner: &mut LruInner, key: &str) {
        if let Some(tags) = inner.key_to_tags.remove(key) {
            for tag in tags {
                if let Some(set) = inner.tag_to_keys.get_mut(&tag) {
                    set.remove(key);
                    if set.is_empty() {
                        inner.tag_to_keys.remove(&tag);
                    }
                }
            }
        }
        for set in inner.path_to_keys.values_mut() {
            set.remove(key);
        }
    }

    fn is_expired(entry: &CacheEntry) -> bool {
        match entry.ttl {
            Some(ttl) => entry.stored_at.elapsed() > ttl,
            None => false,
        }
    }

    fn insert_with_tags(&self, key: &str, entry: CacheEntry, tags: &[String]) {
        let mut inner = self.inner.lock();

        // §4.2: a Set that replaces an existing key first cleans the
        // previous tag entries, then installs the new ones.
        if inner.lru.contains(key) {
            Self::unindex(&mut inner, key);
        }

        let path = entry.path.clone();
        let evicted = inner.lru.push(key.to_string(), entry);
        if let Some((evicted_key, _)) = evicted
            && evicted_key != key
        {
            Self::unindex(&mut inner, &evicted_key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }

        if !tags.is_empty() {
            inner.key_to_tags.insert(key.to_string(), tags.to_vec());
            for tag in tags {
                inner
                    .tag_to_keys
                    .entry(tag.clone())
                    .or_default()
                    .insert(key.to_string());
            }
        }
        inner
            .path_to_keys
            .entry(path)
            .or_default()
            .insert(key.to_string());
    }
}

#[async_trait]
impl CacheStore for LruCacheStore {
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut inner = self.inner.lock();
        match inner.lru.get(key).cloned() {
            Some(entry) if !Self::is_expired(&entry) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Some(_) => {
                // expired: behaves as a miss (§3 invariant c), drop it now.
                inner.lru.pop(key);
                Self::unindex(&mut inner, key);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, key: &str, entry: CacheEntry) {
        self.insert_with_tags(key, entry, &[]);
    }

    async fn set_with_tags(&self, key: &str, entry: CacheEntry, tags: &[String]) {
        self.insert_with_tags(key, entry, tags);
    }

    async fn delete(&self, key: &str) {
        let mut inner = self.inner.lock();
        inner.lru.pop(key);
        Self::unindex(&mut inner, key);
    }

    async fn delete_by_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.inner.lock();
        let matching: Vec<String> = inner
            .lru
            .iter()
            .map(|(k, _)| k.clone())
            .filter(|k| k.starts_with(prefix))
            .collect();
        for key in &matching {
            inner.lru.pop(key);
            Self::unindex(&mut inner, key);
        }
        matching.len()
    }

    async fn delete_by_tags(&self, tags: &[String]) -> usize {
        let mut inner = self.inner.lock();
        let mut keys: HashSet<String> = HashSet::new();
        for tag in tags {
            if let Some(set) = inner.tag_to_keys.get(tag) {
                keys.extend(set.iter().cloned());
            }
        }
        for key in &keys {
            inner.lru.pop(key);
            Self::unindex(&mut inner, key);
        }
        keys.len()
    }

    async fn purge(&self) {
        let mut inner = self.inner.lock();
        inner.lru.clear();
        inner.tag_to_keys.clear();
        inner.key_to_tags.clear();
        inner.path_to_keys.clear();
    }

    fn stats(&self) -> CacheStoreStats {
        let (_, _, evictions) = self.stats.snapshot();
        CacheStoreStats {
            size: self.inner.lock().lru.len(),
            max_size: self.max_size,
            evictions,
        }
    }
}

/// Remote key-value cache store (§4.3). Fails open: any transport error is
/// treated as a miss and logged at warning level, never propagated.
///
/// Wire format and transport are left to a pluggable [`RemoteBackend`] so the
/// gateway core doesn't hard-code a specific KV protocol; see
/// [`crate::gateway::cache::remote_http`] for an HTTP-based implementation
/// grounded in the host framework's own client.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Bytes>>;
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
    /// Cursor-based scan: returns up to `batch` keys starting after `cursor`,
    /// plus the next cursor (`None` when exhausted).
    async fn scan(&self, prefix: &str, cursor: Option<String>, batch: usize) -> anyhow::Result<(Vec<String>, Option<String>)>;
}

pub struct RemoteCacheStore<B: RemoteBackend> {
    backend: B,
    key_prefix: String,
    freshness_ttl: Duration,
    max_stale: Duration,
    stats: CacheStats,
}

impl<B: RemoteBackend> RemoteCacheStore<B> {
    pub fn new(backend: B, key_prefix: impl Into<String>, freshness_ttl: Duration, max_stale: Duration) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.into(),
            freshness_ttl,
            max_stale,
            stats: CacheStats::default(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn encode(entry: &CacheEntry) -> Bytes {
        #[derive(serde::Serialize)]
        struct Wire<'a> {
            status: u16,
            headers: Vec<(String, String)>,
            body: &'a [u8],
            etag: Option<&'a str>,
            last_modified: Option<&'a str>,
            stored_at_unix_ms: u64,
            ttl_ms: Option<u64>,
            tags: &'a [String],
            path: &'a str,
        }
        let headers = entry
            .headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let wire = Wire {
            status: entry.status,
            headers,
            body: &entry.body,
            etag: entry.etag.as_deref(),
            last_modified: entry.last_modified.as_deref(),
            stored_at_unix_ms: 0,
            ttl_ms: entry.ttl.map(|d| d.as_millis() as u64),
            tags: &entry.tags,
            path: &entry.path,
        };
        Bytes::from(serde_json::to_vec(&wire).unwrap_or_default())
    }

    fn decode(bytes: &[u8]) -> Option<CacheEntry> {
        #[derive(serde::Deserialize)]
        struct Wire {
            status: u16,
            headers: Vec<(String, String)>,
            body: Vec<u8>,
            etag: Option<String>,
            last_modified: Option<String>,
            ttl_ms: Option<u64>,
            tags: Vec<String>,
            path: String,
        }
        let wire: Wire = serde_json::from_slice(bytes).ok()?;
        let mut headers = HeaderMap::new();
        for (k, v) in wire.headers {
            if let (Ok(name), Ok(value)) = (
                http::header::HeaderName::try_from(k),
                http::header::HeaderValue::try_from(v),
            ) {
                headers.insert(name, value);
            }
        }
        Some(CacheEntry {
            status: wire.status,
            headers,
            body: Bytes::from(wire.body),
            etag: wire.etag,
            last_modified: wire.last_modified,
            stored_at: Instant::now(),
            ttl: wire.ttl_ms.map(Duration::from_millis),
            tags: wire.tags,
            path: wire.path,
        })
    }
}

#[async_trait]
impl<B: RemoteBackend> CacheStore for RemoteCacheStore<B> {
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        match self.backend.get(&self.full_key(key)).await {
            Ok(Some(bytes)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Self::decode(&bytes)
            }
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, key, "remote cache store get failed, treating as miss");
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, key: &str, entry: CacheEntry) {
        let ttl = self.freshness_ttl + self.max_stale;
        let full_key = self.full_key(key);
        if let Err(err) = self.backend.set(&full_key, Self::encode(&entry), ttl).await {
            tracing::warn!(error = %err, key = %full_key, "remote cache store set failed");
        }
    }

    async fn set_with_tags(&self, key: &str, entry: CacheEntry, _tags: &[String]) {
        // Tag indexing for the remote backend is left to the backend's own
        // prefix convention (`gw:cache:bucket:{name}:{hash}`, §6); this core
        // only guarantees the primary value round-trips.
        self.set(key, entry).await;
    }

    async fn delete(&self, key: &str) {
        let full_key = self.full_key(key);
        if let Err(err) = self.backend.delete(&full_key).await {
            tracing::warn!(error = %err, key = %full_key, "remote cache store delete failed");
        }
    }

    async fn delete_by_prefix(&self, prefix: &str) -> usize {
        let full_prefix = self.full_key(prefix);
        let mut cursor = None;
        let mut count = 0usize;
        loop {
            match self.backend.scan(&full_prefix, cursor.clone(), 100).await {
                Ok((keys, next)) => {
                    for key in &keys {
                        let _ = self.backend.delete(key).await;
                    }
                    count += keys.len();
                    match next {
                        Some(c) => cursor = Some(c),
                        None => break,
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, prefix = %full_prefix, "remote cache scan failed");
                    break;
                }
            }
        }
        count
    }

    async fn delete_by_tags(&self, _tags: &[String]) -> usize {
        // No tag reverse-index exists remotely in this core; tag-based purge
        // against the remote backend is a documented gap (see DESIGN.md).
        0
    }

    async fn purge(&self) {
        self.delete_by_prefix("").await;
    }

    fn stats(&self) -> CacheStoreStats {
        let (_, _, evictions) = self.stats.snapshot();
        // The remote backend owns entry lifetime; this core keeps no local
        // count of what's stored there and enforces no bound on it.
        CacheStoreStats {
            size: 0,
            max_size: usize::MAX,
            evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> CacheEntry {
        CacheEntry {
            status: 200,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"hello"),
            etag: None,
            last_modified: None,
            stored_at: Instant::now(),
            ttl: None,
            tags: vec![],
            path: path.to_string(),
        }
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let store = LruCacheStore::new(10);
        store.set("k1", entry("/users")).await;
        let got = store.get("k1").await.unwrap();
        assert_eq!(got.body, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn expired_entry_behaves_as_miss() {
        let store = LruCacheStore::new(10);
        let mut e = entry("/users");
        e.ttl = Some(Duration::from_millis(1));
        store.set("k1", e).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get("k1").await.is_none());
    }

    #[tokio::test]
    async fn lru_never_exceeds_max_size() {
        let store = LruCacheStore::new(2);
        store.set("k1", entry("/a")).await;
        store.set("k2", entry("/b")).await;
        store.set("k3", entry("/c")).await;
        let stats = store.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.size, 2);
        assert_eq!(stats.max_size, 2);
        assert!(store.get("k1").await.is_none());
        assert!(store.get("k2").await.is_some());
        assert!(store.get("k3").await.is_some());
    }

    #[tokio::test]
    async fn delete_by_tags_removes_keys_and_cleans_index() {
        let store = LruCacheStore::new(10);
        store
            .set_with_tags("k1", entry("/a"), &["users".to_string()])
            .await;
        store
            .set_with_tags("k2", entry("/b"), &["users".to_string(), "admin".to_string()])
            .await;
        store.set_with_tags("k3", entry("/c"), &["other".to_string()]).await;

        let removed = store.delete_by_tags(&["users".to_string()]).await;
        assert_eq!(removed, 2);
        assert!(store.get("k1").await.is_none());
        assert!(store.get("k2").await.is_none());
        assert!(store.get("k3").await.is_some());

        // invariant: no surviving key references the purged tag
        let inner = store.inner.lock();
        assert!(!inner.tag_to_keys.contains_key("users"));
    }

    #[tokio::test]
    async fn delete_by_prefix_matches_opaque_keys() {
        let store = LruCacheStore::new(10);
        store.set("routeA:aaa", entry("/a")).await;
        store.set("routeA:bbb", entry("/b")).await;
        store.set("routeB:ccc", entry("/c")).await;
        let removed = store.delete_by_prefix("routeA:").await;
        assert_eq!(removed, 2);
        assert!(store.get("routeB:ccc").await.is_some());
    }

    #[tokio::test]
    async fn replacing_a_key_cleans_previous_tags_first() {
        let store = LruCacheStore::new(10);
        store
            .set_with_tags("k1", entry("/a"), &["old".to_string()])
            .await;
        store
            .set_with_tags("k1", entry("/a"), &["new".to_string()])
            .await;
        assert_eq!(store.delete_by_tags(&["old".to_string()]).await, 0);
        assert_eq!(store.delete_by_tags(&["new".to_string()]).await, 1);
    }
}
