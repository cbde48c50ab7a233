//! The worker's global scope: one dispatcher over a closed set of events.
//!
//! Handlers keep no state between events. Everything they need comes from the
//! event, the configuration, or the injected [`WorkerHost`].

use std::sync::Arc;

use futures::future::try_join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheGeneration};
use crate::clients::{Client, ClientHost, ClientMatchOptions, ClientType};
use crate::config::WorkerConfig;
use crate::fetch::{self, FetchRequest, FetchResponse, Network};
use crate::notification::{NotificationRecord, Notifier};
use crate::push::PushMessage;
use crate::{CacheStore, ServiceWorkerError};

// ==================== Events ====================

/// A push delivered by the platform's push service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushEvent {
    /// Raw payload, absent for a data-less push.
    pub data: Option<Vec<u8>>,
}

impl PushEvent {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(data.into()),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// A click on a notification body or one of its actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationClickEvent {
    pub notification: NotificationRecord,
    /// Action identifier, `None` for a click on the body.
    pub action: Option<String>,
}

/// Events the platform delivers to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(FetchRequest),
    Push(PushEvent),
    NotificationClick(NotificationClickEvent),
}

impl WorkerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerEvent::Install => "install",
            WorkerEvent::Activate => "activate",
            WorkerEvent::Fetch(_) => "fetch",
            WorkerEvent::Push(_) => "push",
            WorkerEvent::NotificationClick(_) => "notificationclick",
        }
    }
}

/// Result of a completed install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    /// The worker asked to activate without waiting for old clients to close.
    pub skip_waiting: bool,
    /// Number of assets stored in the current generation.
    pub precached: usize,
}

/// Result of a completed activate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateOutcome {
    /// Stale generations removed.
    pub deleted: Vec<CacheGeneration>,
    /// Clients newly brought under control.
    pub claimed: usize,
}

/// What handling an event produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Installed(InstallOutcome),
    Activated(ActivateOutcome),
    Responded(FetchResponse),
    NotificationShown(NotificationRecord),
    ClientFocused(Client),
    WindowOpened(Client),
}

// ==================== Host ====================

/// Platform services the worker runs against.
#[derive(Clone)]
pub struct WorkerHost {
    pub caches: Arc<dyn CacheStore>,
    pub network: Arc<dyn Network>,
    pub clients: Arc<dyn ClientHost>,
    pub notifier: Arc<dyn Notifier>,
}

impl WorkerHost {
    pub fn new(
        caches: Arc<dyn CacheStore>,
        network: Arc<dyn Network>,
        clients: Arc<dyn ClientHost>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            caches,
            network,
            clients,
            notifier,
        }
    }
}

impl std::fmt::Debug for WorkerHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHost").finish_non_exhaustive()
    }
}

// ==================== Global Scope ====================

/// The running worker script (`self` inside `sw.js`).
#[derive(Debug)]
pub struct ServiceWorkerGlobalScope {
    config: Arc<WorkerConfig>,
    host: WorkerHost,
    /// Registration scope; pages under it are claimed on activate.
    scope: Option<Url>,
}

impl ServiceWorkerGlobalScope {
    /// A worker scoped to the whole origin.
    pub fn new(config: Arc<WorkerConfig>, host: WorkerHost) -> Self {
        Self {
            config,
            host,
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: Url) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// The registration scope, or the config origin when none was given.
    pub fn scope(&self) -> Result<Url, ServiceWorkerError> {
        match &self.scope {
            Some(scope) => Ok(scope.clone()),
            None => self.config.origin(),
        }
    }

    /// Handle one event to completion.
    #[instrument(skip_all, fields(event = event.name(), cache = %self.config.cache_name))]
    pub async fn handle(&self, event: WorkerEvent) -> Result<EventOutcome, ServiceWorkerError> {
        match event {
            WorkerEvent::Install => self.on_install().await.map(EventOutcome::Installed),
            WorkerEvent::Activate => self.on_activate().await.map(EventOutcome::Activated),
            WorkerEvent::Fetch(request) => self.on_fetch(&request).await.map(EventOutcome::Responded),
            WorkerEvent::Push(push) => self.on_push(push).await.map(EventOutcome::NotificationShown),
            WorkerEvent::NotificationClick(click) => self.on_notification_click(click).await,
        }
    }

    /// Run an event on the runtime and return the handle the host waits on
    /// before treating the event as handled.
    pub fn spawn_event(self: &Arc<Self>, event: WorkerEvent) -> EventHandle {
        let name = event.name();
        let scope = Arc::clone(self);
        let task = tokio::spawn(async move { scope.handle(event).await });
        EventHandle { name, task }
    }

    async fn on_install(&self) -> Result<InstallOutcome, ServiceWorkerError> {
        if !self.config.precache_enabled {
            info!("Installing without pre-cache");
            return Ok(InstallOutcome {
                skip_waiting: true,
                precached: 0,
            });
        }

        let requests = self
            .config
            .precache_assets
            .iter()
            .map(|asset| self.config.resolve(asset).map(FetchRequest::get))
            .collect::<Result<Vec<_>, _>>()?;

        let entries = try_join_all(requests.iter().map(|request| self.precache_one(request))).await?;
        let precached = entries.len();
        self.host
            .caches
            .put_all(&self.config.cache_name, entries)
            .await?;

        info!(precached, "Install complete");
        Ok(InstallOutcome {
            skip_waiting: true,
            precached,
        })
    }

    async fn precache_one(&self, request: &FetchRequest) -> Result<CacheEntry, ServiceWorkerError> {
        let failed = |reason: String| ServiceWorkerError::InstallAssetFetch {
            url: request.url.to_string(),
            reason,
        };

        let response = self
            .host
            .network
            .fetch(request)
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !response.is_success() {
            return Err(failed(format!("status {}", response.status)));
        }
        debug!(url = %request.url, "Pre-cached asset");
        Ok(CacheEntry::from_response(request, &response))
    }

    async fn on_activate(&self) -> Result<ActivateOutcome, ServiceWorkerError> {
        let current = &self.config.cache_name;
        let caches = &self.host.caches;

        let purge = async {
            let mut deleted = Vec::new();
            for name in caches.keys().await {
                if &name != current && caches.delete(&name).await {
                    info!(stale = %name, "Deleted old cache");
                    deleted.push(name);
                }
            }
            Ok::<_, ServiceWorkerError>(deleted)
        };
        let scope = self.scope()?;
        let claim = self.host.clients.claim(&scope);

        let (deleted, claimed) = tokio::try_join!(purge, claim)?;
        info!(deleted = deleted.len(), claimed, "Activated");
        Ok(ActivateOutcome { deleted, claimed })
    }

    async fn on_fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ServiceWorkerError> {
        let runtime_cache = self
            .config
            .runtime_caching
            .then_some(&self.config.cache_name);
        fetch::respond(
            self.config.fetch_policy,
            request,
            self.host.caches.as_ref(),
            self.host.network.as_ref(),
            runtime_cache,
        )
        .await
    }

    async fn on_push(&self, push: PushEvent) -> Result<NotificationRecord, ServiceWorkerError> {
        let notification = &self.config.notification;
        let message = PushMessage::resolve(push.data.as_deref(), &notification.default_message);
        let options = notification.options_for(&message);
        self.host.notifier.show(&message.title, options).await
    }

    async fn on_notification_click(
        &self,
        click: NotificationClickEvent,
    ) -> Result<EventOutcome, ServiceWorkerError> {
        let notification = click.notification;
        self.host.notifier.close(notification.id).await;
        debug!(action = ?click.action, "Notification clicked");

        let options = ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        };
        let windows = self.host.clients.match_all(&options).await;
        let origin = self.config.origin()?;
        if let Some(window) = windows.iter().find(|c| c.is_same_origin(&origin)) {
            let focused = self.host.clients.focus(&window.id).await?;
            return Ok(EventOutcome::ClientFocused(focused));
        }

        let target = match notification.target_url() {
            "" => "/",
            url => url,
        };
        let url = self.config.resolve(target)?;
        let opened = self.host.clients.open_window(&url).await?;
        Ok(EventOutcome::WindowOpened(opened))
    }
}

// ==================== Event Handle ====================

/// Keeps an event alive until its handler settles (`event.waitUntil`).
#[derive(Debug)]
pub struct EventHandle {
    name: &'static str,
    task: JoinHandle<Result<EventOutcome, ServiceWorkerError>>,
}

impl EventHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Cancel the handler. A later `wait_until` reports `Cancelled`.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the handler. Cancellation counts as handler failure.
    pub async fn wait_until(self) -> Result<EventOutcome, ServiceWorkerError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => {
                warn!(event = self.name, "Event handler cancelled");
                Err(ServiceWorkerError::Cancelled)
            }
            Err(err) => Err(ServiceWorkerError::State(format!(
                "{} handler panicked: {}",
                self.name, err
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::clients::MemoryClients;
    use crate::fetch::StaticNetwork;
    use crate::notification::MemoryNotifier;

    fn scope(config: WorkerConfig) -> Arc<ServiceWorkerGlobalScope> {
        let host = WorkerHost::new(
            Arc::new(MemoryCacheStorage::new()),
            Arc::new(StaticNetwork::new()),
            Arc::new(MemoryClients::new()),
            Arc::new(MemoryNotifier::new()),
        );
        Arc::new(ServiceWorkerGlobalScope::new(Arc::new(config), host))
    }

    #[test]
    fn test_event_names() {
        assert_eq!(WorkerEvent::Install.name(), "install");
        assert_eq!(WorkerEvent::Push(PushEvent::empty()).name(), "push");
    }

    #[tokio::test]
    async fn test_install_without_precache_touches_nothing() {
        let worker = scope(WorkerConfig::default());
        let outcome = worker.handle(WorkerEvent::Install).await.unwrap();
        assert_eq!(
            outcome,
            EventOutcome::Installed(InstallOutcome {
                skip_waiting: true,
                precached: 0
            })
        );
    }

    #[tokio::test]
    async fn test_spawned_push_resolves_after_display() {
        let worker = scope(WorkerConfig::default());
        let handle = worker.spawn_event(WorkerEvent::Push(PushEvent::empty()));
        assert_eq!(handle.name(), "push");

        match handle.wait_until().await.unwrap() {
            EventOutcome::NotificationShown(record) => {
                assert_eq!(record.title, "📖 每日靈修");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
