//! # Daily Bible API
//!
//! REST collaborators of the Daily Bible PWA. The backend is a hosted
//! PostgREST surface; every call carries the anonymous `apikey` header.
//!
//! ## Surfaces
//!
//! - **Content**: latest devotional entries, aggregate stats, view/play counters
//! - **Subscription**: persisting Web Push subscriptions, subscribe button state
//! - **Network**: an HTTP implementation of the service worker's network seam

use thiserror::Error;

pub mod config;
pub mod content;
pub mod network;
pub mod rest;
pub mod subscription;

pub use config::ApiConfig;
pub use content::{format_count, ContentClient, DevotionalEntry, EntryId, Stats};
pub use network::HttpNetwork;
pub use rest::RestClient;
pub use subscription::{
    decode_application_server_key, PermissionState, PushManager, PushSubscription, SubscribeState,
    SubscriptionClient, SubscriptionKeys, SubscriptionManager,
};

/// Errors from the backend clients.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Missing configuration: {0}")]
    MissingConfig(&'static str),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned status {status}")]
    Status { endpoint: String, status: u16 },

    #[error("Invalid application server key: {0}")]
    InvalidKey(String),

    #[error("Notification permission not granted")]
    PermissionDenied,

    #[error("Push messaging not supported")]
    Unsupported,
}

impl From<ApiError> for daily_bible_common::AppError {
    fn from(err: ApiError) -> Self {
        use daily_bible_common::AppError;
        match err {
            ApiError::MissingConfig(key) => AppError::config(format!("missing {}", key)),
            ApiError::InvalidUrl(e) => AppError::config_with_source("invalid backend URL", e),
            other => AppError::api_with_source("backend request", other),
        }
    }
}
