//! # Daily Bible Common
//!
//! Shared error types and logging configuration for the Daily Bible client crates.
//!
//! ## Features
//!
//! - Unified error type with per-layer categories
//! - Logging configuration and setup

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the Daily Bible client.
///
/// Crate-local errors (`ServiceWorkerError`, `ApiError`) convert into this type
/// at the binary boundary.
#[derive(Error, Debug)]
pub enum AppError {
    /// Service worker lifecycle errors.
    #[error("Worker error: {message}")]
    Worker {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Cache storage errors.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Network errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Notification display errors.
    #[error("Notification error: {message}")]
    Notification {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Backend REST errors.
    #[error("API error: {message}")]
    Api {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Cancelled operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl AppError {
    /// Create a worker error with source.
    pub fn worker_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Worker {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a notification error.
    pub fn notification(message: impl Into<String>) -> Self {
        Self::Notification {
            message: message.into(),
            source: None,
        }
    }

    /// Create an API error with source.
    pub fn api_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Api {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether a page could expect this failure to clear on its own.
    ///
    /// Nothing here retries; the platform re-runs installation on its own schedule.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Network { .. } | AppError::Api { .. } | AppError::Io(_)
        )
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Worker { .. } => "worker",
            AppError::Cache { .. } => "cache",
            AppError::Network { .. } => "network",
            AppError::Notification { .. } => "notification",
            AppError::Api { .. } => "api",
            AppError::Config { .. } => "config",
            AppError::Io(_) => "io",
            AppError::Cancelled => "cancelled",
            AppError::InvalidArgument(_) => "invalid_argument",
        }
    }
}
