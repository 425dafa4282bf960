//! LINE Messaging API adapter.
//!
//! - `LineClient`: pushes text messages via the Messaging API push endpoint
//! - webhook payload types for inbound events
//! - `verify_line_signature`: checks the `x-line-signature` header

use axum::http::HeaderMap;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

pub const DEFAULT_LINE_API_BASE_URL: &str = "https://api.line.me";

/// Client for the LINE Messaging API push endpoint.
#[derive(Debug, Clone)]
pub struct LineClient {
    access_token: Option<String>,
    api_base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum LineSendError {
    #[error("LINE API token not configured")]
    NotConfigured,
    #[error("HTTP request failed: {0}")]
    Transport(String),
    #[error("LINE API returned {status}: {detail}")]
    Api { status: u16, detail: String },
}

impl LineClient {
    /// `api_base_url` comes from config so tests can point the client at a
    /// local server.
    pub fn new(access_token: Option<String>, api_base_url: impl Into<String>) -> Self {
        Self {
            access_token: access_token.filter(|token| !token.trim().is_empty()),
            api_base_url: api_base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn push_url(&self) -> String {
        format!(
            "{}/v2/bot/message/push",
            self.api_base_url.trim_end_matches('/')
        )
    }

    /// Push one text message to a user. Fail-once: no retry, no timeout
    /// override; the caller decides what a failure means.
    pub async fn push_text(&self, to: &str, text: &str) -> Result<(), LineSendError> {
        let Some(token) = self.access_token.as_deref() else {
            return Err(LineSendError::NotConfigured);
        };

        let request = LinePushRequest {
            to: to.to_string(),
            messages: vec![LineTextMessage {
                message_type: "text".to_string(),
                text: text.to_string(),
            }],
        };

        let response = self
            .client
            .post(self.push_url())
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|err| LineSendError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let detail = response.text().await.unwrap_or_default();
            return Err(LineSendError::Api { status, detail });
        }
        Ok(())
    }
}

/// Verify the `x-line-signature` header: base64 of the HMAC-SHA256 of the raw
/// request body under the channel secret. A missing/empty secret disables
/// verification (local development).
pub fn verify_line_signature(
    secret: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), &'static str> {
    let Some(secret) = secret.filter(|value| !value.trim().is_empty()) else {
        return Ok(());
    };
    let signature = headers
        .get("x-line-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or("missing_signature")?;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| "bad_secret")?;
    mac.update(body);
    let expected = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
    if expected != signature {
        return Err("invalid_signature");
    }
    Ok(())
}

// ============================================================================
// LINE-specific wire types
// ============================================================================

/// Request body for the push endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct LinePushRequest {
    pub to: String,
    pub messages: Vec<LineTextMessage>,
}

/// One text message object.
#[derive(Debug, Clone, Serialize)]
pub struct LineTextMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub text: String,
}

/// Webhook request body.
#[derive(Debug, Clone, Deserialize)]
pub struct LineWebhookPayload {
    /// Bot user id the events were sent to
    pub destination: Option<String>,
    /// Batch of events; may be empty (LINE sends verification pings)
    #[serde(default)]
    pub events: Vec<LineWebhookEvent>,
}

/// One webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct LineWebhookEvent {
    /// Event kind: "message", "follow", "unfollow", ...
    #[serde(rename = "type")]
    pub event_type: String,
    /// Present for message events
    pub message: Option<LineEventMessage>,
    /// Sender of the event
    pub source: Option<LineEventSource>,
    /// Event time (Unix milliseconds)
    pub timestamp: Option<i64>,
    /// Token for the reply endpoint; unused here, pushes go out instead
    #[serde(rename = "replyToken")]
    pub reply_token: Option<String>,
}

/// Message content of a message event.
#[derive(Debug, Clone, Deserialize)]
pub struct LineEventMessage {
    /// Content kind: "text", "sticker", "image", ...
    #[serde(rename = "type")]
    pub message_type: String,
    /// Message id
    pub id: Option<String>,
    /// Text body, present when `message_type` is "text"
    pub text: Option<String>,
}

/// Source of an event.
#[derive(Debug, Clone, Deserialize)]
pub struct LineEventSource {
    /// "user", "group", or "room"
    #[serde(rename = "type")]
    pub source_type: Option<String>,
    /// Sending user id
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    /// Group id for group sources
    #[serde(rename = "groupId")]
    pub group_id: Option<String>,
}

impl LineWebhookEvent {
    /// Extract (sender user id, text) when this is a text message event.
    pub fn text_message(&self) -> Option<(&str, &str)> {
        if self.event_type != "message" {
            return None;
        }
        let message = self.message.as_ref()?;
        if message.message_type != "text" {
            return None;
        }
        let text = message.text.as_deref()?;
        let user_id = self.source.as_ref()?.user_id.as_deref()?;
        Some((user_id, text))
    }
}
