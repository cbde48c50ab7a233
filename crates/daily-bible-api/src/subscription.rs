//! Push subscription persistence and the subscribe button's state.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::rest::RestClient;
use crate::ApiError;

const SUBSCRIBERS: &str = "rest/v1/push_subscribers";

/// Encryption keys of a Web Push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// `PushSubscription.toJSON()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    #[serde(rename = "expirationTime", default)]
    pub expiration_time: Option<i64>,
    pub keys: SubscriptionKeys,
}

#[derive(Serialize)]
struct SubscriberRow<'a> {
    subscription: &'a PushSubscription,
}

/// Persists subscriptions for the daily push sender.
#[derive(Debug, Clone)]
pub struct SubscriptionClient {
    rest: RestClient,
}

impl SubscriptionClient {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    pub async fn save(&self, subscription: &PushSubscription) -> Result<(), ApiError> {
        self.rest
            .post_json(
                SUBSCRIBERS,
                &SubscriberRow { subscription },
                Some("return=minimal"),
            )
            .await?;
        info!(endpoint = %subscription.endpoint, "Subscription saved");
        Ok(())
    }

    /// The configured VAPID key, decoded.
    pub fn application_server_key(&self) -> Result<Vec<u8>, ApiError> {
        self.rest.config().application_server_key()
    }
}

/// The browser's push service (`registration.pushManager`).
#[async_trait]
pub trait PushManager: Send + Sync {
    /// Create a user-visible subscription bound to `application_server_key`.
    async fn subscribe(&self, application_server_key: &[u8])
        -> Result<PushSubscription, ApiError>;
}

/// Decode a URL-safe base64 VAPID public key; trailing padding is optional.
pub fn decode_application_server_key(key: &str) -> Result<Vec<u8>, ApiError> {
    URL_SAFE_NO_PAD
        .decode(key.trim().trim_end_matches('='))
        .map_err(|e| ApiError::InvalidKey(e.to_string()))
}

// ==================== Button State ====================

/// Notification permission as answered by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    Default,
}

/// State of the subscribe button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscribeState {
    #[default]
    Default,
    Subscribed,
    Loading,
    Unsupported,
}

impl SubscribeState {
    /// State at page load.
    pub fn initial(push_supported: bool, has_subscription: bool) -> Self {
        match (push_supported, has_subscription) {
            (false, _) => Self::Unsupported,
            (true, true) => Self::Subscribed,
            (true, false) => Self::Default,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Default => "訂閱通知",
            Self::Subscribed => "已訂閱",
            Self::Loading => "處理中...",
            Self::Unsupported => "不支援",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::Default => "🔔",
            Self::Subscribed => "✓",
            Self::Loading => "⏳",
            Self::Unsupported => "⚠️",
        }
    }

    /// Whether the button accepts clicks.
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Default | Self::Subscribed)
    }
}

/// Drives the subscribe/unsubscribe flow and tracks the button state.
#[derive(Debug)]
pub struct SubscriptionManager {
    client: SubscriptionClient,
    state: SubscribeState,
}

impl SubscriptionManager {
    pub fn new(client: SubscriptionClient, initial: SubscribeState) -> Self {
        Self {
            client,
            state: initial,
        }
    }

    pub fn state(&self) -> SubscribeState {
        self.state
    }

    /// Persist `subscription` once permission is granted.
    ///
    /// A failed save restores the state held before the attempt; a refused
    /// permission always lands on `Default`.
    pub async fn subscribe(
        &mut self,
        permission: PermissionState,
        subscription: &PushSubscription,
    ) -> Result<SubscribeState, ApiError> {
        let settled = self.begin(permission)?;
        let saved = self.client.save(subscription).await;
        self.settle(settled, saved)
    }

    /// Subscribe through `push` with the configured VAPID key, then persist.
    pub async fn subscribe_with(
        &mut self,
        permission: PermissionState,
        push: &dyn PushManager,
    ) -> Result<SubscribeState, ApiError> {
        let settled = self.begin(permission)?;
        let saved = async {
            let key = self.client.application_server_key()?;
            let subscription = push.subscribe(&key).await?;
            self.client.save(&subscription).await
        }
        .await;
        self.settle(settled, saved)
    }

    fn begin(&mut self, permission: PermissionState) -> Result<SubscribeState, ApiError> {
        if self.state == SubscribeState::Unsupported {
            return Err(ApiError::Unsupported);
        }
        let settled = self.state;
        self.state = SubscribeState::Loading;

        if permission != PermissionState::Granted {
            self.state = SubscribeState::Default;
            return Err(ApiError::PermissionDenied);
        }
        Ok(settled)
    }

    fn settle(
        &mut self,
        settled: SubscribeState,
        saved: Result<(), ApiError>,
    ) -> Result<SubscribeState, ApiError> {
        match saved {
            Ok(()) => {
                self.state = SubscribeState::Subscribed;
                Ok(self.state)
            }
            Err(err) => {
                error!(error = %err, "Subscription error");
                self.state = settled;
                Err(err)
            }
        }
    }

    /// Record a local unsubscribe; the backend row is left for the sender to prune.
    pub fn unsubscribe(&mut self) -> SubscribeState {
        if self.state != SubscribeState::Unsupported {
            self.state = SubscribeState::Default;
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_key_with_and_without_padding() {
        let raw = [4u8, 1, 2, 3, 250, 251];
        let encoded = URL_SAFE_NO_PAD.encode(raw);
        assert_eq!(decode_application_server_key(&encoded).unwrap(), raw);
        assert_eq!(
            decode_application_server_key(&format!("{}==", encoded)).unwrap(),
            raw
        );
        assert!(matches!(
            decode_application_server_key("not base64!"),
            Err(ApiError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_initial_state() {
        assert_eq!(SubscribeState::initial(false, true), SubscribeState::Unsupported);
        assert_eq!(SubscribeState::initial(true, true), SubscribeState::Subscribed);
        assert_eq!(SubscribeState::initial(true, false), SubscribeState::Default);
    }

    #[test]
    fn test_button_enabled() {
        assert!(SubscribeState::Default.is_enabled());
        assert!(SubscribeState::Subscribed.is_enabled());
        assert!(!SubscribeState::Loading.is_enabled());
        assert!(!SubscribeState::Unsupported.is_enabled());
        assert_eq!(SubscribeState::Loading.label(), "處理中...");
    }

    #[tokio::test]
    async fn test_unsupported_never_subscribes() {
        let rest = RestClient::new(
            crate::ApiConfig::new("http://127.0.0.1:9/", "anon").unwrap(),
        )
        .unwrap();
        let mut manager =
            SubscriptionManager::new(SubscriptionClient::new(rest), SubscribeState::Unsupported);
        let sub = PushSubscription {
            endpoint: "https://push.example/x".into(),
            expiration_time: None,
            keys: SubscriptionKeys {
                p256dh: "p".into(),
                auth: "a".into(),
            },
        };
        assert!(matches!(
            manager.subscribe(PermissionState::Granted, &sub).await,
            Err(ApiError::Unsupported)
        ));
        assert_eq!(manager.unsubscribe(), SubscribeState::Unsupported);
    }

    #[test]
    fn test_subscription_json_shape() {
        let subscription = PushSubscription {
            endpoint: "https://push.example/abc".into(),
            expiration_time: None,
            keys: SubscriptionKeys {
                p256dh: "p".into(),
                auth: "a".into(),
            },
        };
        let json = serde_json::to_value(SubscriberRow {
            subscription: &subscription,
        })
        .unwrap();
        assert_eq!(json["subscription"]["endpoint"], "https://push.example/abc");
        assert!(json["subscription"]["expirationTime"].is_null());
        assert_eq!(json["subscription"]["keys"]["auth"], "a");
    }
}
