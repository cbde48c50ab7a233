//! Clients API: the pages and windows of the worker's origin.

use async_trait::async_trait;
use hashbrown::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::ServiceWorkerError;

/// A client (open page).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Visibility state.
    pub visibility_state: VisibilityState,

    /// Whether focused.
    pub focused: bool,

    /// Whether this worker controls the client.
    pub controlled: bool,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    All,
}

/// Visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
    Hidden,
    Visible,
}

impl Client {
    /// A top-level window at `url`, not yet controlled.
    pub fn window(id: impl Into<String>, url: Url) -> Self {
        Self {
            id: id.into(),
            url,
            client_type: ClientType::Window,
            visibility_state: VisibilityState::Hidden,
            focused: false,
            controlled: false,
        }
    }

    /// Whether the client's URL shares `origin`'s scheme, host and port.
    pub fn is_same_origin(&self, origin: &Url) -> bool {
        self.url.origin() == origin.origin()
    }
}

/// Options for `clients.matchAll()`.
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Access to the origin's clients (`self.clients`).
#[async_trait]
pub trait ClientHost: Send + Sync {
    /// Clients matching the options, in a stable order.
    async fn match_all(&self, options: &ClientMatchOptions) -> Vec<Client>;

    /// Bring a window client to the foreground.
    async fn focus(&self, id: &str) -> Result<Client, ServiceWorkerError>;

    /// Open a new top-level window.
    async fn open_window(&self, url: &Url) -> Result<Client, ServiceWorkerError>;

    /// Take control of every client under `scope`. Returns how many were claimed.
    async fn claim(&self, scope: &Url) -> Result<usize, ServiceWorkerError>;
}

/// In-memory [`ClientHost`].
#[derive(Debug, Default)]
pub struct MemoryClients {
    clients: RwLock<HashMap<String, Client>>,
}

impl MemoryClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.clients.get_mut().insert(client.id.clone(), client);
        self
    }

    pub async fn add(&self, client: Client) {
        self.clients.write().await.insert(client.id.clone(), client);
    }

    pub async fn remove(&self, id: &str) -> Option<Client> {
        self.clients.write().await.remove(id)
    }

    pub async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }
}

#[async_trait]
impl ClientHost for MemoryClients {
    async fn match_all(&self, options: &ClientMatchOptions) -> Vec<Client> {
        let mut matched: Vec<Client> = self
            .clients
            .read()
            .await
            .values()
            .filter(|c| options.include_uncontrolled || c.controlled)
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    async fn focus(&self, id: &str) -> Result<Client, ServiceWorkerError> {
        let mut clients = self.clients.write().await;
        let client = clients
            .get(id)
            .ok_or_else(|| ServiceWorkerError::Client(format!("no client {}", id)))?;
        if client.client_type != ClientType::Window {
            return Err(ServiceWorkerError::Client(
                "Can only focus window clients".to_string(),
            ));
        }

        for other in clients.values_mut() {
            other.focused = false;
        }
        let client = clients
            .get_mut(id)
            .ok_or_else(|| ServiceWorkerError::Client(format!("no client {}", id)))?;
        client.focused = true;
        client.visibility_state = VisibilityState::Visible;
        debug!(client = %client.id, url = %client.url, "Client focused");
        Ok(client.clone())
    }

    async fn open_window(&self, url: &Url) -> Result<Client, ServiceWorkerError> {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = format!("window-{}", COUNTER.fetch_add(1, Ordering::Relaxed));

        let mut clients = self.clients.write().await;
        for other in clients.values_mut() {
            other.focused = false;
        }
        let client = Client {
            focused: true,
            visibility_state: VisibilityState::Visible,
            ..Client::window(id.clone(), url.clone())
        };
        info!(client = %id, url = %url, "Opened window");
        clients.insert(id, client.clone());
        Ok(client)
    }

    async fn claim(&self, scope: &Url) -> Result<usize, ServiceWorkerError> {
        let mut claimed = 0;
        for client in self.clients.write().await.values_mut() {
            if client.url.as_str().starts_with(scope.as_str()) && !client.controlled {
                client.controlled = true;
                claimed += 1;
            }
        }
        Ok(claimed)
    }
}
