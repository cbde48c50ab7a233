//! OS-level notifications shown by the worker.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::ServiceWorkerError;

/// Unique identifier for a shown notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A button on the notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    /// Identifier reported back on click.
    pub action: String,
    /// Label shown to the user.
    pub title: String,
}

/// Data attached to the notification for the click handler.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: String,
}

/// Options passed to `showNotification`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Vibration pattern in milliseconds.
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

/// A notification currently on screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: NotificationId,
    pub title: String,
    pub options: NotificationOptions,
}

impl NotificationRecord {
    /// Navigation target stored on the notification.
    pub fn target_url(&self) -> &str {
        &self.options.data.url
    }
}

/// Notification permission as granted by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationPermission {
    #[default]
    Granted,
    Denied,
}

/// Displays and dismisses notifications (`registration.showNotification`).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Show a notification; resolves once it is on screen.
    async fn show(
        &self,
        title: &str,
        options: NotificationOptions,
    ) -> Result<NotificationRecord, ServiceWorkerError>;

    /// Dismiss a notification. Returns whether it was showing.
    async fn close(&self, id: NotificationId) -> bool;

    /// Notifications currently showing.
    async fn get_notifications(&self) -> Vec<NotificationRecord>;
}

/// In-memory [`Notifier`].
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    permission: NotificationPermission,
    shown: RwLock<Vec<NotificationRecord>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_permission(permission: NotificationPermission) -> Self {
        Self {
            permission,
            shown: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn show(
        &self,
        title: &str,
        options: NotificationOptions,
    ) -> Result<NotificationRecord, ServiceWorkerError> {
        if self.permission == NotificationPermission::Denied {
            return Err(ServiceWorkerError::NotificationDisplay(
                "permission denied".to_string(),
            ));
        }

        let record = NotificationRecord {
            id: NotificationId::new(),
            title: title.to_string(),
            options,
        };
        info!(id = record.id.raw(), title = %record.title, "Notification shown");
        self.shown.write().await.push(record.clone());
        Ok(record)
    }

    async fn close(&self, id: NotificationId) -> bool {
        let mut shown = self.shown.write().await;
        let before = shown.len();
        shown.retain(|n| n.id != id);
        let closed = shown.len() != before;
        if closed {
            debug!(id = id.raw(), "Notification closed");
        }
        closed
    }

    async fn get_notifications(&self) -> Vec<NotificationRecord> {
        self.shown.read().await.clone()
    }
}
