//! Push payload parsing.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::ServiceWorkerError;

/// The message a push event resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub url: String,
}

impl Default for PushMessage {
    fn default() -> Self {
        Self {
            title: "📖 每日靈修".to_string(),
            body: "今天的靈修已經準備好了！".to_string(),
            url: "/".to_string(),
        }
    }
}

/// Wire shape of a push payload. Every field is optional.
#[derive(Debug, Deserialize)]
struct PushPayload {
    title: Option<String>,
    body: Option<String>,
    url: Option<String>,
}

impl PushMessage {
    /// Parse a payload strictly.
    ///
    /// The payload must be a JSON object whose present fields are strings.
    /// Missing fields, and an empty `url`, take their value from `fallback`.
    pub fn parse(payload: Option<&[u8]>, fallback: &PushMessage) -> Result<Self, ServiceWorkerError> {
        let bytes =
            payload.ok_or_else(|| ServiceWorkerError::PushPayloadParse("no payload".into()))?;
        let parsed: PushPayload = serde_json::from_slice(bytes)
            .map_err(|e| ServiceWorkerError::PushPayloadParse(e.to_string()))?;

        Ok(Self {
            title: parsed.title.unwrap_or_else(|| fallback.title.clone()),
            body: parsed.body.unwrap_or_else(|| fallback.body.clone()),
            url: parsed
                .url
                .filter(|url| !url.is_empty())
                .unwrap_or_else(|| fallback.url.clone()),
        })
    }

    /// Parse a payload, degrading to `fallback` on any failure.
    pub fn resolve(payload: Option<&[u8]>, fallback: &PushMessage) -> Self {
        match Self::parse(payload, fallback) {
            Ok(message) => message,
            Err(err) => {
                if payload.is_some() {
                    error!(error = %err, "Error parsing push data");
                } else {
                    debug!("Push event without payload, using default message");
                }
                fallback.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed_payload() {
        let payload: &[u8] = br#"{"title":"T","body":"B","url":"/x"}"#;
        let message = PushMessage::resolve(Some(payload), &PushMessage::default());
        assert_eq!(
            message,
            PushMessage {
                title: "T".into(),
                body: "B".into(),
                url: "/x".into(),
            }
        );
    }

    #[test]
    fn test_unparseable_payloads_use_default() {
        let fallback = PushMessage::default();
        let payloads: [&[u8]; 5] = [b"", b"not json", b"[1,2]", b"\"hello\"", br#"{"title":5}"#];
        for payload in payloads {
            assert_eq!(PushMessage::resolve(Some(payload), &fallback), fallback);
        }
        assert_eq!(PushMessage::resolve(None, &fallback), fallback);
    }

    #[test]
    fn test_absent_payload_is_a_parse_error() {
        assert!(matches!(
            PushMessage::parse(None, &PushMessage::default()),
            Err(ServiceWorkerError::PushPayloadParse(_))
        ));
    }

    #[test]
    fn test_missing_fields_take_fallback_values() {
        let payload: &[u8] = br#"{"title":"Advent","url":""}"#;
        let message = PushMessage::resolve(Some(payload), &PushMessage::default());
        assert_eq!(message.title, "Advent");
        assert_eq!(message.body, "今天的靈修已經準備好了！");
        assert_eq!(message.url, "/");
    }

    #[test]
    fn test_default_message() {
        let message = PushMessage::default();
        assert_eq!(message.title, "📖 每日靈修");
        assert_eq!(message.url, "/");
    }
}
