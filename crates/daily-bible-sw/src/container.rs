//! Registration container (`navigator.serviceWorker`): registers the worker
//! script and walks each new version through install and activate.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::WorkerConfig;
use crate::worker::{EventOutcome, ServiceWorkerGlobalScope, WorkerEvent, WorkerHost};
use crate::ServiceWorkerError;

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Script fetched, not yet installing.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

// ==================== Service Worker ====================

/// One version of the worker script.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    pub id: ServiceWorkerId,
    pub script_url: Url,
    pub state: ServiceWorkerState,
    /// Script source, compared byte-for-byte on re-registration.
    pub script: String,
    pub state_changed_at: Instant,
    global: Arc<ServiceWorkerGlobalScope>,
}

impl ServiceWorker {
    fn new(script_url: Url, script: String, global: Arc<ServiceWorkerGlobalScope>) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            script_url,
            state: ServiceWorkerState::Parsed,
            script,
            state_changed_at: Instant::now(),
            global,
        }
    }

    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    /// Activating or activated: events are delivered to it.
    pub fn is_serving(&self) -> bool {
        matches!(
            self.state,
            ServiceWorkerState::Activating | ServiceWorkerState::Activated
        )
    }

    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }

    /// The running script this worker version dispatches events to.
    pub fn global(&self) -> &Arc<ServiceWorkerGlobalScope> {
        &self.global
    }

    fn runs(&self, script_url: &Url, script: &str) -> bool {
        !self.is_redundant() && &self.script_url == script_url && self.script == script
    }
}

// ==================== Registration ====================

/// A service worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    pub scope: Url,
    pub installing: Option<ServiceWorker>,
    pub waiting: Option<ServiceWorker>,
    pub active: Option<ServiceWorker>,
}

impl ServiceWorkerRegistration {
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    pub fn get_active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    /// Newest non-redundant worker.
    fn newest(&self) -> Option<&ServiceWorker> {
        self.installing
            .as_ref()
            .or(self.waiting.as_ref())
            .or(self.active.as_ref())
    }

    /// No version in any slot.
    fn is_empty(&self) -> bool {
        self.newest().is_none()
    }

    /// Transition installing to waiting.
    fn install_complete(&mut self) {
        if let Some(mut worker) = self.installing.take() {
            worker.set_state(ServiceWorkerState::Installed);
            self.waiting = Some(worker);
        }
    }

    /// Promote the waiting worker. Returns the retired active version.
    fn promote_waiting(&mut self) -> Option<ServiceWorker> {
        let mut worker = self.waiting.take()?;
        worker.set_state(ServiceWorkerState::Activating);
        self.active.replace(worker).map(|mut old| {
            old.set_state(ServiceWorkerState::Redundant);
            debug!(old = ?old.id, "Previous worker now redundant");
            old
        })
    }

    /// Unregister (mark every version redundant).
    fn unregister(&mut self) {
        for mut worker in [
            self.active.take(),
            self.waiting.take(),
            self.installing.take(),
        ]
        .into_iter()
        .flatten()
        {
            worker.set_state(ServiceWorkerState::Redundant);
        }
    }
}

/// Result of `register()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The same script is already registered; nothing ran.
    Unchanged(ServiceWorkerId),
    /// A new version installed and activated.
    Activated(ServiceWorkerId),
}

impl RegisterOutcome {
    pub fn worker_id(&self) -> ServiceWorkerId {
        match self {
            Self::Unchanged(id) | Self::Activated(id) => *id,
        }
    }
}

// ==================== Container ====================

/// Notifications to the hosting page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    StateChange {
        registration_scope: String,
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    UpdateFound {
        registration_scope: String,
    },
    ControllerChange {
        registration_scope: String,
        claimed: usize,
    },
}

/// The page-side registry of workers (`navigator.serviceWorker`).
///
/// Each registered version brings its own [`WorkerConfig`], so an update can
/// move to a new cache generation. The registry lock is never held while a
/// lifecycle event runs; the active version keeps serving while its
/// successor installs.
pub struct ServiceWorkerContainer {
    registrations: RwLock<HashMap<String, ServiceWorkerRegistration>>,
    host: WorkerHost,
    event_tx: mpsc::UnboundedSender<ContainerEvent>,
}

impl ServiceWorkerContainer {
    pub fn new(host: WorkerHost) -> (Self, mpsc::UnboundedReceiver<ContainerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                registrations: RwLock::new(HashMap::new()),
                host,
                event_tx,
            },
            event_rx,
        )
    }

    fn emit(&self, event: ContainerEvent) {
        // The page may have stopped listening.
        let _ = self.event_tx.send(event);
    }

    fn emit_state(&self, scope: &str, worker: &ServiceWorker) {
        self.emit(ContainerEvent::StateChange {
            registration_scope: scope.to_string(),
            worker_id: worker.id,
            new_state: worker.state,
        });
    }

    /// Register `script` at `script_url`, running with `config`.
    ///
    /// Byte-identical re-registration returns `Unchanged` without running any
    /// lifecycle event. Otherwise the new version installs, skips waiting and
    /// activates. An install failure leaves the previous version in control.
    pub async fn register(
        &self,
        script_url: &str,
        script: &str,
        config: WorkerConfig,
    ) -> Result<RegisterOutcome, ServiceWorkerError> {
        let script_url = Url::parse(script_url)
            .map_err(|e| ServiceWorkerError::Registration(e.to_string()))?;
        config.validate()?;
        let scope = scope_for(&script_url);
        let scope_str = scope.to_string();

        let (id, global) = {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .entry(scope_str.clone())
                .or_insert_with(|| ServiceWorkerRegistration::new(scope.clone()));

            if let Some(current) = registration.newest() {
                if current.runs(&script_url, script) {
                    debug!(scope = %scope_str, "Script unchanged, registration is a no-op");
                    return Ok(RegisterOutcome::Unchanged(current.id));
                }
            }

            if let Some(mut superseded) = registration.installing.take() {
                superseded.set_state(ServiceWorkerState::Redundant);
                self.emit_state(&scope_str, &superseded);
            }

            let global = Arc::new(
                ServiceWorkerGlobalScope::new(Arc::new(config), self.host.clone())
                    .with_scope(scope.clone()),
            );
            let mut worker = ServiceWorker::new(script_url, script.to_string(), Arc::clone(&global));
            worker.set_state(ServiceWorkerState::Installing);
            self.emit(ContainerEvent::UpdateFound {
                registration_scope: scope_str.clone(),
            });
            self.emit_state(&scope_str, &worker);
            info!(scope = %scope_str, worker = ?worker.id, "Installing new worker");

            let id = worker.id;
            registration.installing = Some(worker);
            (id, global)
        };

        let installed = match global.spawn_event(WorkerEvent::Install).wait_until().await {
            Ok(EventOutcome::Installed(outcome)) => Ok(outcome.skip_waiting),
            Ok(other) => Err(ServiceWorkerError::State(format!(
                "unexpected install outcome {:?}",
                other
            ))),
            Err(err) => Err(err),
        };

        {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .get_mut(&scope_str)
                .filter(|r| r.installing.as_ref().map(|w| w.id) == Some(id))
                .ok_or_else(|| {
                    ServiceWorkerError::State(format!("worker {:?} was superseded", id))
                })?;

            let skip_waiting = match installed {
                Ok(skip_waiting) => skip_waiting,
                Err(err) => {
                    if let Some(mut failed) = registration.installing.take() {
                        failed.set_state(ServiceWorkerState::Redundant);
                        self.emit_state(&scope_str, &failed);
                    }
                    if registration.is_empty() {
                        registrations.remove(&scope_str);
                    }
                    warn!(scope = %scope_str, error = %err, "Install failed");
                    return Err(err);
                }
            };

            registration.install_complete();
            if let Some(waiting) = registration.waiting.as_ref() {
                self.emit_state(&scope_str, waiting);
            }
            if !skip_waiting {
                return Err(ServiceWorkerError::State(
                    "worker installed without skip-waiting".to_string(),
                ));
            }
            if let Some(retired) = registration.promote_waiting() {
                self.emit_state(&scope_str, &retired);
            }
        }

        let claimed = match global.spawn_event(WorkerEvent::Activate).wait_until().await {
            Ok(EventOutcome::Activated(outcome)) => outcome.claimed,
            Ok(_) => 0,
            Err(err) => {
                // A rejected activate still leaves the worker active.
                warn!(scope = %scope_str, error = %err, "Activate handler failed");
                0
            }
        };

        {
            let mut registrations = self.registrations.write().await;
            let active = registrations
                .get_mut(&scope_str)
                .and_then(|r| r.active.as_mut())
                .filter(|w| w.id == id)
                .ok_or_else(|| {
                    ServiceWorkerError::State(format!("worker {:?} was superseded", id))
                })?;
            active.set_state(ServiceWorkerState::Activated);
            self.emit_state(&scope_str, active);
        }
        self.emit(ContainerEvent::ControllerChange {
            registration_scope: scope_str.clone(),
            claimed,
        });
        info!(scope = %scope_str, worker = ?id, claimed, "Worker activated");

        Ok(RegisterOutcome::Activated(id))
    }

    /// Scope of the registration controlling `url`, if any.
    pub async fn get_registration(&self, url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        let registrations = self.registrations.read().await;
        registrations
            .keys()
            .filter(|scope| url.as_str().starts_with(scope.as_str()))
            .max_by_key(|scope| scope.len())
            .cloned()
    }

    /// All registration scopes.
    pub async fn get_registrations(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self.registrations.read().await.keys().cloned().collect();
        scopes.sort();
        scopes
    }

    /// The active worker for `scope`.
    pub async fn controller(&self, scope: &str) -> Option<ServiceWorker> {
        self.registrations
            .read()
            .await
            .get(scope)
            .and_then(|r| r.get_active().cloned())
    }

    /// Deliver an event to the active worker of `scope` and wait for it.
    ///
    /// A worker still running its activate handler already receives events.
    pub async fn dispatch(
        &self,
        scope: &str,
        event: WorkerEvent,
    ) -> Result<EventOutcome, ServiceWorkerError> {
        let worker = self
            .controller(scope)
            .await
            .filter(ServiceWorker::is_serving)
            .ok_or_else(|| ServiceWorkerError::State(format!("no active worker for {}", scope)))?;
        worker.global().spawn_event(event).wait_until().await
    }

    /// Re-check `scope` against freshly fetched script bytes and their config.
    pub async fn update(
        &self,
        scope: &str,
        script: &str,
        config: WorkerConfig,
    ) -> Result<RegisterOutcome, ServiceWorkerError> {
        let script_url = self
            .registrations
            .read()
            .await
            .get(scope)
            .and_then(|r| r.newest())
            .map(|worker| worker.script_url.to_string())
            .ok_or_else(|| {
                ServiceWorkerError::Registration(format!("no registration for {}", scope))
            })?;
        self.register(&script_url, script, config).await
    }

    /// Unregister a scope.
    pub async fn unregister(&self, scope: &str) -> bool {
        match self.registrations.write().await.remove(scope) {
            Some(mut registration) => {
                registration.unregister();
                info!(scope, "Unregistered");
                true
            }
            None => false,
        }
    }
}

/// Default scope: the directory holding the script.
fn scope_for(script_url: &Url) -> Url {
    let mut scope = script_url.clone();
    let dir = script_url
        .path()
        .rsplit_once('/')
        .map(|(dir, _)| format!("{}/", dir))
        .unwrap_or_else(|| "/".to_string());
    scope.set_path(&dir);
    scope.set_query(None);
    scope.set_fragment(None);
    scope
}
