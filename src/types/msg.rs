use serde::{Deserialize, Serialize};

/// Protocol version advertised in handshake responses.
pub const VERSION: &str = "1.0";

/// Minimum protocol version the server will interoperate with.
pub const MINIMUM_VERSION: &str = "1.0";

/// Default polling interval advertised to clients, in milliseconds.
pub const DEFAULT_INTERVAL: u64 = 0;

/// The only connection type this server negotiates.
pub const LONG_POLLING: &str = "long-polling";

/// A Bayeux protocol message, inbound or outbound.
///
/// Inbound batches deserialize into these; the server answers each with
/// another `MetaMessage` carrying `successful` and, where applicable,
/// `advice`. Fields the server does not interpret round-trip untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetaMessage {
    /// The channel the message addresses, e.g. `/meta/handshake` or a
    /// publish target like `/foo/bar`.
    pub channel: String,
    /// Protocol version (handshake).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Minimum protocol version the peer will accept (handshake).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_version: Option<String>,
    /// Connection types the peer supports (handshake).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub supported_connection_types: Vec<String>,
    /// The client identity issued at handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Server guidance on reconnect behavior.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,
    /// Connection type selected for this connect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    /// Client-assigned message id, echoed back in the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Optional timestamp, uninterpreted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Publish payload; a non-meta channel with non-empty data is a publish.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Whether the request succeeded. Always serialized.
    pub successful: bool,
    /// Subscription pattern (subscribe/unsubscribe).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
    /// Error text when `successful` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Extension payload, uninterpreted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<serde_json::Value>,
}

impl MetaMessage {
    /// A response skeleton echoing the request's channel, client id, and
    /// message id.
    pub fn response_to(req: &Self) -> Self {
        Self {
            channel: req.channel.clone(),
            client_id: req.client_id.clone(),
            id: req.id.clone(),
            ..Default::default()
        }
    }

    /// The client id, or `""` when absent.
    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or_default()
    }
}

/// An event delivered to a subscriber, serialized ahead of the response
/// section of a long-poll reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    /// The channel the event was published to.
    pub channel: String,
    /// The event payload.
    pub data: String,
    /// Optional message id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Publisher identity, when authenticated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// Reconnect guidance attached to handshake and connect responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Advice {
    /// `"retry"` to keep polling, `"handshake"` to start over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<String>,
    /// How long the server may hold a poll open, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// How long the client should pause between polls, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
}

impl Advice {
    /// Advice telling the client to keep polling with the given hold budget.
    pub fn retry(timeout_ms: u64) -> Self {
        Self {
            reconnect: Some("retry".into()),
            timeout: Some(timeout_ms),
            interval: Some(DEFAULT_INTERVAL),
        }
    }

    /// Advice telling the client its identity is gone and it must
    /// re-handshake.
    pub fn rehandshake(timeout_ms: u64) -> Self {
        Self {
            reconnect: Some("handshake".into()),
            timeout: Some(timeout_ms),
            interval: Some(DEFAULT_INTERVAL),
        }
    }
}
