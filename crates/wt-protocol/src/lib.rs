// wt-protocol: Wire types shared by the webhook tester server and its clients.
//
// Live-stream messages use a top-level `type` field for discriminated
// deserialization.  Captured events keep the field names the browser viewer
// has always used (`webhook_id` is the channel, `timestamp` the capture time).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Captured requests
// ---------------------------------------------------------------------------

/// How the body of a captured request was decoded.
///
/// The decoded value itself lives in [`CapturedEvent::body`]; the kind tells a
/// client how to read it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyKind {
    /// `application/json`; `null` when the payload did not parse.
    Json,
    /// `application/x-www-form-urlencoded`, flattened to a string map.
    Form,
    /// `multipart/form-data`: `{"form_data": {...}, "files": {...}}`.
    Multipart,
    /// Anything else that decoded as UTF-8.
    Text,
    /// Undecodable bytes; the body is a `<Binary data: N bytes>` placeholder.
    Binary,
}

impl BodyKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Form => "form",
            Self::Multipart => "multipart",
            Self::Text => "text",
            Self::Binary => "binary",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "json" => Some(Self::Json),
            "form" => Some(Self::Form),
            "multipart" => Some(Self::Multipart),
            "text" => Some(Self::Text),
            "binary" => Some(Self::Binary),
            _ => None,
        }
    }
}

/// One persisted inbound call to a channel URL.
///
/// Immutable once written except for `is_read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedEvent {
    /// Monotonically increasing store id.
    pub id: i64,
    pub owner_id: i64,
    /// Channel id chosen by the caller.
    pub webhook_id: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body_kind: BodyKind,
    pub body: serde_json::Value,
    pub query_params: BTreeMap<String, String>,
    /// Capture time (UTC).
    pub timestamp: DateTime<Utc>,
    /// Forwarded-for, then real-ip, then transport peer.
    pub client_ip: Option<String>,
    pub is_read: bool,
}

// ---------------------------------------------------------------------------
// Live stream messages (server -> viewer)
// ---------------------------------------------------------------------------

/// A message pushed to a live-stream viewer.
///
/// Serialized as the JSON payload of one `data: <json>\n\n` frame:
///
/// ```json
/// { "type": "new_webhook", "webhook_id": "orders", "data": { ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum StreamMessage {
    /// First frame on every stream, sent once the subscriber is registered.
    Connected,
    /// Sent after an idle period with no other traffic.
    Heartbeat,
    /// The viewer is watching the channel that received traffic.
    NewWebhook {
        webhook_id: String,
        data: CapturedEvent,
    },
    /// Some channel of the account received traffic.
    NewNotification {
        webhook_id: String,
        data: CapturedEvent,
    },
    /// All unread events were marked read; `count` is what remains unread.
    NotificationsCleared { count: u64 },
    /// A captured event was deleted.
    WebhookDeleted { webhook_id: String, request_id: i64 },
}

impl StreamMessage {
    /// The `type` tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Heartbeat => "heartbeat",
            Self::NewWebhook { .. } => "new_webhook",
            Self::NewNotification { .. } => "new_notification",
            Self::NotificationsCleared { .. } => "notifications_cleared",
            Self::WebhookDeleted { .. } => "webhook_deleted",
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// HTTP error envelope used by all non-2xx JSON responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
