//! Cache generations and the cache store seam.

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::fetch::{FetchRequest, FetchResponse};
use crate::ServiceWorkerError;

/// Name of one generation of cached assets (e.g. `daily-bible-v2`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheGeneration(String);

impl CacheGeneration {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheGeneration {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request key (URL without fragment).
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: i64,
}

impl CacheEntry {
    /// Capture a network response for storage under the request's key.
    pub fn from_response(request: &FetchRequest, response: &FetchResponse) -> Self {
        Self {
            url: request.cache_key(),
            method: request.method.clone(),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            cached_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// One generation's entries.
#[derive(Debug, Clone)]
pub struct Cache {
    /// Cache name.
    pub name: CacheGeneration,

    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    pub fn new(name: CacheGeneration) -> Self {
        Self {
            name,
            entries: HashMap::new(),
        }
    }

    /// Match a request key.
    pub fn match_request(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.url.clone(), entry);
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Request keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Persistent cache storage (the `caches` global).
///
/// Every operation is atomic with respect to the others; handlers running
/// concurrently never observe a half-written generation.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// All generation names, in a stable order.
    async fn keys(&self) -> Vec<CacheGeneration>;

    async fn has(&self, name: &CacheGeneration) -> bool;

    /// Delete a whole generation. Returns whether it existed.
    async fn delete(&self, name: &CacheGeneration) -> bool;

    /// Store one entry, creating the generation if needed.
    async fn put(&self, name: &CacheGeneration, entry: CacheEntry) -> Result<(), ServiceWorkerError>;

    /// Store a batch of entries in one step: either all land or none do.
    async fn put_all(
        &self,
        name: &CacheGeneration,
        entries: Vec<CacheEntry>,
    ) -> Result<(), ServiceWorkerError>;

    /// Look a request key up across every generation.
    async fn match_request(&self, key: &str) -> Option<CacheEntry>;

    /// Entry count of a generation, `None` if absent.
    async fn entry_count(&self, name: &CacheGeneration) -> Option<usize>;
}

/// In-memory [`CacheStore`].
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<CacheGeneration, Cache>>,
    lookups: AtomicUsize,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a generation with entries, replacing any previous content.
    pub fn with_generation(mut self, name: &str, entries: Vec<CacheEntry>) -> Self {
        let name = CacheGeneration::new(name);
        let mut cache = Cache::new(name.clone());
        for entry in entries {
            cache.put(entry);
        }
        self.caches.get_mut().insert(name, cache);
        self
    }

    /// Number of `match_request` calls served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Snapshot of one generation.
    pub async fn snapshot(&self, name: &CacheGeneration) -> Option<Cache> {
        self.caches.read().await.get(name).cloned()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStorage {
    async fn keys(&self) -> Vec<CacheGeneration> {
        let mut names: Vec<CacheGeneration> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn has(&self, name: &CacheGeneration) -> bool {
        self.caches.read().await.contains_key(name)
    }

    async fn delete(&self, name: &CacheGeneration) -> bool {
        let removed = self.caches.write().await.remove(name).is_some();
        if removed {
            debug!(cache = %name, "Deleted cache generation");
        }
        removed
    }

    async fn put(&self, name: &CacheGeneration, entry: CacheEntry) -> Result<(), ServiceWorkerError> {
        trace!(cache = %name, url = %entry.url, "Cache put");
        self.caches
            .write()
            .await
            .entry(name.clone())
            .or_insert_with(|| Cache::new(name.clone()))
            .put(entry);
        Ok(())
    }

    async fn put_all(
        &self,
        name: &CacheGeneration,
        entries: Vec<CacheEntry>,
    ) -> Result<(), ServiceWorkerError> {
        let mut caches = self.caches.write().await;
        let cache = caches
            .entry(name.clone())
            .or_insert_with(|| Cache::new(name.clone()));
        let count = entries.len();
        for entry in entries {
            cache.put(entry);
        }
        debug!(cache = %name, count, "Cached batch");
        Ok(())
    }

    async fn match_request(&self, key: &str) -> Option<CacheEntry> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let caches = self.caches.read().await;
        let mut names: Vec<&CacheGeneration> = caches.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| caches.get(name))
            .find_map(|cache| cache.match_request(key).cloned())
    }

    async fn entry_count(&self, name: &CacheGeneration) -> Option<usize> {
        self.caches.read().await.get(name).map(Cache::len)
    }
}
