//! WebSocket client for the off-chain price service.
//!
//! Provides:
//! - Automatic reconnection with exponential backoff and resubscription
//! - Heartbeat monitoring (ping after silence, timeout detection)
//! - Channel-based delivery of parsed price updates

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;

pub use connection::{backoff_delay, ConnectionConfig, ConnectionManager, ConnectionState};
pub use error::{WsError, WsResult};
pub use message::{ClientMessage, ResponsePayload, RpcPrice, RpcPriceFeed, ServerMessage};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
