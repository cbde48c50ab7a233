//! # Daily Bible Service Worker
//!
//! The service worker behind the Daily Bible PWA, expressed as an event
//! dispatcher over injected host services so it runs without a browser.
//!
//! ## Features
//!
//! - **Lifecycle**: install (skip-waiting, optional pre-cache), activate
//!   (purge stale cache generations, claim clients)
//! - **Fetch interception**: network-first with cache fallback, or cache-first
//! - **Push**: payload parsing with a fixed fallback message, notification display
//! - **Notification click**: focus an open window of the origin or open a new one
//! - **Registration**: idempotent re-registration of an unchanged script
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (navigator.serviceWorker)
//!     │
//!     └── ServiceWorkerRegistration
//!             ├── installing / waiting / active (ServiceWorker)
//!             └── ServiceWorkerGlobalScope ── handle(WorkerEvent)
//!                     │
//!                     └── WorkerHost
//!                             ├── CacheStore   (caches)
//!                             ├── Network      (fetch)
//!                             ├── ClientHost   (clients)
//!                             └── Notifier     (registration.showNotification)
//! ```

use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod container;
pub mod fetch;
pub mod notification;
pub mod push;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheGeneration, CacheStore, MemoryCacheStorage};
pub use clients::{
    Client, ClientHost, ClientMatchOptions, ClientType, MemoryClients, VisibilityState,
};
pub use config::{NotificationConfig, WorkerConfig};
pub use container::{
    ContainerEvent, RegisterOutcome, ServiceWorker, ServiceWorkerContainer, ServiceWorkerId,
    ServiceWorkerRegistration, ServiceWorkerState,
};
pub use fetch::{FetchPolicy, FetchRequest, FetchResponse, Network, StaticNetwork};
pub use notification::{
    MemoryNotifier, NotificationAction, NotificationData, NotificationId, NotificationOptions,
    NotificationPermission, NotificationRecord, Notifier,
};
pub use push::PushMessage;
pub use worker::{
    ActivateOutcome, EventHandle, EventOutcome, InstallOutcome, NotificationClickEvent,
    PushEvent, ServiceWorkerGlobalScope, WorkerEvent, WorkerHost,
};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerError {
    /// A pre-cached asset could not be fetched; the install is abandoned.
    #[error("Install failed fetching {url}: {reason}")]
    InstallAssetFetch { url: String, reason: String },

    /// Push payload was absent or not a conforming JSON object.
    #[error("Push payload parse failed: {0}")]
    PushPayloadParse(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Notification display failed: {0}")]
    NotificationDisplay(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Registration failed: {0}")]
    Registration(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Config error: {0}")]
    Config(String),

    /// The host dropped the event before the handler finished.
    #[error("Event handler cancelled")]
    Cancelled,
}

impl From<url::ParseError> for ServiceWorkerError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<ServiceWorkerError> for daily_bible_common::AppError {
    fn from(err: ServiceWorkerError) -> Self {
        use daily_bible_common::AppError;
        match err {
            ServiceWorkerError::Network(msg) => AppError::network(msg),
            ServiceWorkerError::Cache(msg) => AppError::cache(msg),
            ServiceWorkerError::NotificationDisplay(msg) => AppError::notification(msg),
            ServiceWorkerError::Config(msg) => AppError::config(msg),
            ServiceWorkerError::InvalidUrl(msg) => AppError::InvalidArgument(msg),
            ServiceWorkerError::Cancelled => AppError::Cancelled,
            other => AppError::worker_with_source("service worker", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daily_bible_common::AppError;

    #[test]
    fn test_error_into_app_error() {
        let err: AppError = ServiceWorkerError::Network("offline".into()).into();
        assert_eq!(err.category(), "network");

        let err: AppError = ServiceWorkerError::Cancelled.into();
        assert!(matches!(err, AppError::Cancelled));

        let err: AppError = ServiceWorkerError::InstallAssetFetch {
            url: "https://localhost/app.js".into(),
            reason: "offline".into(),
        }
        .into();
        assert_eq!(err.category(), "worker");
    }
}
