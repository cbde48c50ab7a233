//! Fetch interception: request/response types, the network seam, and the
//! two fallback policies.

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheGeneration, CacheStore};
use crate::ServiceWorkerError;

// ==================== Fetch Event ====================

/// An intercepted request from a controlled page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Request URL.
    pub url: Url,

    /// Request method.
    pub method: String,

    /// Request headers.
    pub headers: HashMap<String, String>,

    /// Requesting client ID.
    pub client_id: Option<String>,

    /// Is navigation request.
    pub is_navigation: bool,

    /// Request body, for non-GET calls.
    pub body: Option<Vec<u8>>,
}

impl FetchRequest {
    pub fn new(method: impl Into<String>, url: Url) -> Self {
        Self {
            url,
            method: method.into(),
            headers: HashMap::new(),
            client_id: None,
            is_navigation: false,
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: Url, body: Vec<u8>) -> Self {
        Self {
            body: Some(body),
            ..Self::new("POST", url)
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Mark as a top-level page navigation.
    pub fn navigation(mut self) -> Self {
        self.is_navigation = true;
        self
    }

    /// Key used for cache lookups: the URL with any fragment dropped.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.into()
    }

    /// Only GET requests are matched against or written to the cache.
    pub fn is_cacheable(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }
}

/// Response handed back to the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// Status code.
    pub status: u16,

    /// Status text.
    pub status_text: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Whether served from cache.
    pub from_cache: bool,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            status_text: status_text(status).to_string(),
            headers: HashMap::new(),
            body: body.into(),
            from_cache: false,
        }
    }

    /// A `200 OK` response.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, body)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Create a response from a cache entry.
    pub fn from_cache(entry: &CacheEntry) -> Self {
        Self {
            status: entry.status,
            status_text: status_text(entry.status).to_string(),
            headers: entry.headers.clone(),
            body: entry.body.clone(),
            from_cache: true,
        }
    }

    /// 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    }
}

// ==================== Network ====================

/// The network underneath the worker (`fetch()` inside the worker scope).
///
/// An `Err` means the request never produced a response (offline, DNS, reset).
/// HTTP error statuses are still `Ok`.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ServiceWorkerError>;
}

/// Scripted network: fixed responses per URL plus an online switch.
///
/// Unknown URLs answer `404`; when offline every request fails.
#[derive(Debug)]
pub struct StaticNetwork {
    routes: RwLock<HashMap<String, FetchResponse>>,
    online: AtomicBool,
    requests: AtomicUsize,
}

impl Default for StaticNetwork {
    fn default() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            online: AtomicBool::new(true),
            requests: AtomicUsize::new(0),
        }
    }
}

impl StaticNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, url: &str, response: FetchResponse) -> Self {
        self.routes.get_mut().insert(url.to_string(), response);
        self
    }

    pub async fn set_route(&self, url: &str, response: FetchResponse) {
        self.routes.write().await.insert(url.to_string(), response);
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Requests attempted, including failed ones.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Network for StaticNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ServiceWorkerError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.online.load(Ordering::SeqCst) {
            return Err(ServiceWorkerError::Network(format!(
                "offline: {}",
                request.url
            )));
        }
        let routes = self.routes.read().await;
        Ok(routes
            .get(&request.cache_key())
            .cloned()
            .unwrap_or_else(|| FetchResponse::new(404, Vec::new())))
    }
}

// ==================== Policy ====================

/// How intercepted fetches combine the cache and the network.
///
/// One policy is in force per deployed configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchPolicy {
    /// Serve from cache when present, otherwise go to the network.
    CacheFirst,
    /// Go to the network; fall back to the cache only when it fails.
    #[default]
    NetworkFirst,
}

/// Answer an intercepted fetch under `policy`.
///
/// With `runtime_cache` set, successful GET network responses are written to
/// that generation.
pub async fn respond(
    policy: FetchPolicy,
    request: &FetchRequest,
    caches: &dyn CacheStore,
    network: &dyn Network,
    runtime_cache: Option<&CacheGeneration>,
) -> Result<FetchResponse, ServiceWorkerError> {
    match policy {
        FetchPolicy::CacheFirst => cache_first(request, caches, network, runtime_cache).await,
        FetchPolicy::NetworkFirst => network_first(request, caches, network, runtime_cache).await,
    }
}

async fn cache_first(
    request: &FetchRequest,
    caches: &dyn CacheStore,
    network: &dyn Network,
    runtime_cache: Option<&CacheGeneration>,
) -> Result<FetchResponse, ServiceWorkerError> {
    if request.is_cacheable() {
        if let Some(entry) = caches.match_request(&request.cache_key()).await {
            trace!(url = %request.url, "Cache hit");
            return Ok(FetchResponse::from_cache(&entry));
        }
    }

    trace!(url = %request.url, "Cache miss, going to network");
    let response = network.fetch(request).await?;
    store_runtime(request, &response, caches, runtime_cache).await;
    Ok(response)
}

async fn network_first(
    request: &FetchRequest,
    caches: &dyn CacheStore,
    network: &dyn Network,
    runtime_cache: Option<&CacheGeneration>,
) -> Result<FetchResponse, ServiceWorkerError> {
    match network.fetch(request).await {
        Ok(response) => {
            store_runtime(request, &response, caches, runtime_cache).await;
            Ok(response)
        }
        Err(err) => {
            if request.is_cacheable() {
                if let Some(entry) = caches.match_request(&request.cache_key()).await {
                    warn!(url = %request.url, error = %err, "Network failed, serving cached copy");
                    return Ok(FetchResponse::from_cache(&entry));
                }
            }
            debug!(url = %request.url, error = %err, "Network failed with no cached copy");
            Err(err)
        }
    }
}

async fn store_runtime(
    request: &FetchRequest,
    response: &FetchResponse,
    caches: &dyn CacheStore,
    runtime_cache: Option<&CacheGeneration>,
) {
    let Some(name) = runtime_cache else {
        return;
    };
    if !request.is_cacheable() || !response.is_success() {
        return;
    }
    if let Err(err) = caches
        .put(name, CacheEntry::from_response(request, response))
        .await
    {
        warn!(url = %request.url, error = %err, "Runtime cache write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;

    fn url(path: &str) -> Url {
        Url::parse("https://localhost/").unwrap().join(path).unwrap()
    }

    fn cached(path: &str, body: &[u8]) -> CacheEntry {
        CacheEntry {
            url: url(path).to_string(),
            method: "GET".to_string(),
            status: 200,
            headers: HashMap::new(),
            body: body.to_vec(),
            cached_at: 0,
        }
    }

    #[test]
    fn test_cache_key_drops_fragment() {
        let request = FetchRequest::get(url("/index.html#today"));
        assert_eq!(request.cache_key(), "https://localhost/index.html");
    }

    #[test]
    fn test_only_get_is_cacheable() {
        assert!(FetchRequest::get(url("/")).is_cacheable());
        assert!(!FetchRequest::post(url("/rpc"), b"{}".to_vec()).is_cacheable());
    }

    #[tokio::test]
    async fn test_network_first_prefers_network() {
        let caches = MemoryCacheStorage::new()
            .with_generation("v1", vec![cached("/app.js", b"stale")]);
        let network = StaticNetwork::new().with_route(url("/app.js").as_str(), FetchResponse::ok("fresh"));

        let response = respond(
            FetchPolicy::NetworkFirst,
            &FetchRequest::get(url("/app.js")),
            &caches,
            &network,
            None,
        )
        .await
        .unwrap();

        assert_eq!(response.body, b"fresh");
        assert!(!response.from_cache);
        assert_eq!(caches.lookup_count(), 0);
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_cache() {
        let caches = MemoryCacheStorage::new()
            .with_generation("v1", vec![cached("/app.js", b"stale")]);
        let network = StaticNetwork::new();
        network.set_online(false);

        let response = respond(
            FetchPolicy::NetworkFirst,
            &FetchRequest::get(url("/app.js")),
            &caches,
            &network,
            None,
        )
        .await
        .unwrap();

        assert_eq!(response.body, b"stale");
        assert!(response.from_cache);
    }

    #[tokio::test]
    async fn test_network_first_fails_without_cache() {
        let caches = MemoryCacheStorage::new();
        let network = StaticNetwork::new();
        network.set_online(false);

        let result = respond(
            FetchPolicy::NetworkFirst,
            &FetchRequest::get(url("/app.js")),
            &caches,
            &network,
            None,
        )
        .await;

        assert!(matches!(result, Err(ServiceWorkerError::Network(_))));
    }

    #[tokio::test]
    async fn test_network_first_passes_http_errors_through() {
        let caches = MemoryCacheStorage::new()
            .with_generation("v1", vec![cached("/gone", b"old")]);
        let network = StaticNetwork::new();

        let response = respond(
            FetchPolicy::NetworkFirst,
            &FetchRequest::get(url("/gone")),
            &caches,
            &network,
            None,
        )
        .await
        .unwrap();

        assert_eq!(response.status, 404);
        assert!(!response.from_cache);
    }

    #[tokio::test]
    async fn test_cache_first_skips_network_on_hit() {
        let caches = MemoryCacheStorage::new()
            .with_generation("v1", vec![cached("/style.css", b"cached")]);
        let network = StaticNetwork::new();

        let response = respond(
            FetchPolicy::CacheFirst,
            &FetchRequest::get(url("/style.css")),
            &caches,
            &network,
            None,
        )
        .await
        .unwrap();

        assert!(response.from_cache);
        assert_eq!(network.request_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_first_miss_does_not_write_back() {
        let caches = MemoryCacheStorage::new();
        let network = StaticNetwork::new().with_route(url("/new.js").as_str(), FetchResponse::ok("net"));

        let response = respond(
            FetchPolicy::CacheFirst,
            &FetchRequest::get(url("/new.js")),
            &caches,
            &network,
            None,
        )
        .await
        .unwrap();

        assert_eq!(response.body, b"net");
        assert!(caches.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_runtime_cache_stores_successful_gets() {
        let caches = MemoryCacheStorage::new();
        let network = StaticNetwork::new().with_route(url("/feed").as_str(), FetchResponse::ok("[]"));
        let generation = CacheGeneration::new("v2");

        respond(
            FetchPolicy::NetworkFirst,
            &FetchRequest::get(url("/feed")),
            &caches,
            &network,
            Some(&generation),
        )
        .await
        .unwrap();
        respond(
            FetchPolicy::NetworkFirst,
            &FetchRequest::get(url("/missing")),
            &caches,
            &network,
            Some(&generation),
        )
        .await
        .unwrap();

        assert_eq!(caches.entry_count(&generation).await, Some(1));
    }
}
