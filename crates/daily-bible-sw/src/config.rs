//! Worker configuration.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::CacheGeneration;
use crate::fetch::FetchPolicy;
use crate::notification::{NotificationAction, NotificationData, NotificationOptions};
use crate::push::PushMessage;
use crate::ServiceWorkerError;

const DEFAULT_ORIGIN: &str = "https://localhost/";

/// Worker configuration, fixed for the life of a deployed worker version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// The current cache generation. Every other generation is purged on activate.
    pub cache_name: CacheGeneration,

    /// The worker's origin. Unset means `https://localhost/`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<Url>,

    /// Fetch and store `precache_assets` during install.
    pub precache_enabled: bool,

    /// Asset paths, resolved against `origin`.
    pub precache_assets: Vec<String>,

    /// Fetch interception policy.
    pub fetch_policy: FetchPolicy,

    /// Store successful GET network responses in the current generation.
    pub runtime_caching: bool,

    /// Notification appearance.
    pub notification: NotificationConfig,
}

/// How push notifications look.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub action: NotificationAction,
    /// Shown when a push payload is missing or malformed.
    pub default_message: PushMessage,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name: CacheGeneration::new("daily-bible-v2"),
            origin: None,
            precache_enabled: false,
            precache_assets: ["/", "/index.html", "/style.css", "/app.js", "/icon-192.png"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fetch_policy: FetchPolicy::NetworkFirst,
            runtime_caching: false,
            notification: NotificationConfig::default(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            icon: "/icon-192.png".to_string(),
            badge: "/icon-72.png".to_string(),
            vibrate: vec![100, 50, 100],
            action: NotificationAction {
                action: "open".to_string(),
                title: "立即查看".to_string(),
            },
            default_message: PushMessage::default(),
        }
    }
}

impl NotificationConfig {
    /// Options for a notification showing `message`.
    pub fn options_for(&self, message: &PushMessage) -> NotificationOptions {
        NotificationOptions {
            body: message.body.clone(),
            icon: self.icon.clone(),
            badge: self.badge.clone(),
            vibrate: self.vibrate.clone(),
            data: NotificationData {
                url: message.url.clone(),
            },
            actions: vec![self.action.clone()],
        }
    }
}

impl WorkerConfig {
    /// Parse a JSON configuration. Absent keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ServiceWorkerError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ServiceWorkerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the worker relies on.
    pub fn validate(&self) -> Result<(), ServiceWorkerError> {
        if self.cache_name.as_str().trim().is_empty() {
            return Err(ServiceWorkerError::Config(
                "cache_name must not be empty".to_string(),
            ));
        }
        let origin = self.origin()?;
        if origin.cannot_be_a_base() {
            return Err(ServiceWorkerError::Config(format!(
                "origin {} cannot resolve paths",
                origin
            )));
        }
        for asset in &self.precache_assets {
            self.resolve(asset)?;
        }
        Ok(())
    }

    /// The configured origin, or the local default.
    pub fn origin(&self) -> Result<Url, ServiceWorkerError> {
        match &self.origin {
            Some(origin) => Ok(origin.clone()),
            None => Ok(Url::parse(DEFAULT_ORIGIN)?),
        }
    }

    /// Resolve a path or URL against the worker origin.
    pub fn resolve(&self, path: &str) -> Result<Url, ServiceWorkerError> {
        Ok(self.origin()?.join(path)?)
    }

    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_cache_name(mut self, name: &str) -> Self {
        self.cache_name = CacheGeneration::new(name);
        self
    }

    pub fn with_precache(mut self, assets: &[&str]) -> Self {
        self.precache_enabled = true;
        self.precache_assets = assets.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }

    pub fn with_runtime_caching(mut self, enabled: bool) -> Self {
        self.runtime_caching = enabled;
        self
    }
}
