//! Price service WebSocket message types.
//!
//! The client subscribes to a list of feed ids and then receives one
//! `price_update` message per feed whenever a new attestation is published.

use serde::{Deserialize, Serialize};

// ============================================================================
// Client -> Server
// ============================================================================

/// Outgoing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        ids: Vec<String>,
        verbose: bool,
        binary: bool,
        allow_out_of_order: bool,
        ignore_invalid_price_ids: bool,
    },
    Unsubscribe {
        ids: Vec<String>,
    },
}

impl ClientMessage {
    /// Subscribe request for parsed price updates (no binary payload).
    pub fn subscribe(ids: Vec<String>) -> Self {
        ClientMessage::Subscribe {
            ids,
            verbose: false,
            binary: false,
            allow_out_of_order: false,
            ignore_invalid_price_ids: false,
        }
    }

    pub fn unsubscribe(ids: Vec<String>) -> Self {
        ClientMessage::Unsubscribe { ids }
    }
}

// ============================================================================
// Server -> Client
// ============================================================================

/// Incoming message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Acknowledgement of a subscribe or unsubscribe request.
    Response(ResponsePayload),
    /// A new attestation for one subscribed feed.
    PriceUpdate { price_feed: RpcPriceFeed },
}

/// Body of a `response` message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResponsePayload {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl ResponsePayload {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Price feed as sent by the price service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RpcPriceFeed {
    /// Feed id, hex without prefix.
    pub id: String,
    pub price: RpcPrice,
    #[serde(default)]
    pub ema_price: Option<RpcPrice>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    /// Signed update payload, present when subscribed with `binary: true`.
    #[serde(default)]
    pub vaa: Option<String>,
}

/// Price component. Mantissas arrive as decimal strings to survive JSON number limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RpcPrice {
    pub price: String,
    pub conf: String,
    pub expo: i32,
    pub publish_time: i64,
}
