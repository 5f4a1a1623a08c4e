//! Price service connection manager.
//!
//! Handles connection lifecycle, automatic reconnection with exponential
//! backoff, and resubscription of every configured feed after reconnection.
//! Parsed `price_update` payloads are forwarded on an mpsc channel.

use crate::error::{WsError, WsResult};
use crate::heartbeat::{SilenceWatchdog, WatchdogAction};
use crate::message::{ClientMessage, RpcPriceFeed, ServerMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL (e.g., "wss://hermes.pyth.network/ws").
    pub url: String,
    /// Feed ids to subscribe to, hex without prefix.
    pub feed_ids: Vec<String>,
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub reconnect_max_delay_ms: u64,
    /// Upper bound of the random jitter added to each backoff delay.
    pub reconnect_jitter_ms: u64,
    /// Send a ping after this much silence.
    pub heartbeat_interval_ms: u64,
    /// Give up on the connection if nothing arrives this long after a ping.
    pub heartbeat_timeout_ms: u64,
    /// How long to wait for the subscription acknowledgement.
    pub subscribe_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            feed_ids: Vec::new(),
            max_reconnect_attempts: 0, // Infinite
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 60000,
            reconnect_jitter_ms: 1000,
            heartbeat_interval_ms: 30000,
            heartbeat_timeout_ms: 10000,
            subscribe_timeout_ms: 10000,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

/// Price service connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    watchdog: SilenceWatchdog,
    update_tx: mpsc::Sender<RpcPriceFeed>,
    reconnect_count: AtomicU32,
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, update_tx: mpsc::Sender<RpcPriceFeed>) -> Self {
        Self::with_shutdown_token(config, update_tx, CancellationToken::new())
    }

    /// Create a manager that stops when `shutdown_token` is cancelled.
    pub fn with_shutdown_token(
        config: ConnectionConfig,
        update_tx: mpsc::Sender<RpcPriceFeed>,
        shutdown_token: CancellationToken,
    ) -> Self {
        let watchdog = SilenceWatchdog::new(
            Duration::from_millis(config.heartbeat_interval_ms),
            Duration::from_millis(config.heartbeat_timeout_ms),
        );
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            watchdog,
            update_tx,
            reconnect_count: AtomicU32::new(0),
            shutdown_token,
        }
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Shared view of the connection state for health monitoring.
    pub fn state_handle(&self) -> Arc<RwLock<ConnectionState>> {
        self.state.clone()
    }

    /// Consecutive failed connection attempts since the last successful connect.
    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    /// Signal graceful shutdown.
    pub fn shutdown(&self) {
        info!("ConnectionManager shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Connect and run the message loop until shutdown or retry exhaustion.
    pub async fn run(&self) -> WsResult<()> {
        loop {
            if self.is_shutdown() {
                info!("Shutdown requested, exiting connect loop");
                *self.state.write() = ConnectionState::Disconnected;
                return Ok(());
            }

            *self.state.write() = ConnectionState::Connecting;

            match self.try_connect().await {
                Ok(()) => {
                    info!("Price service connection closed");
                }
                Err(WsError::ReceiverDropped) => {
                    info!("Update receiver dropped, stopping price service client");
                    *self.state.write() = ConnectionState::Disconnected;
                    return Err(WsError::ReceiverDropped);
                }
                Err(e) => {
                    error!(error = %e, "Price service connection error");
                }
            }

            if self.is_shutdown() {
                info!("Shutdown requested after disconnect, not reconnecting");
                *self.state.write() = ConnectionState::Disconnected;
                return Ok(());
            }

            // A session that reached Connected resets the counter in try_connect.
            let attempt = self.reconnect_count.load(Ordering::Relaxed) + 1;
            self.reconnect_count.store(attempt, Ordering::Relaxed);

            if self.config.max_reconnect_attempts > 0
                && attempt >= self.config.max_reconnect_attempts
            {
                error!(attempt, "Max reconnection attempts reached");
                *self.state.write() = ConnectionState::Disconnected;
                return Err(WsError::ConnectionFailed(
                    "Max reconnection attempts reached".to_string(),
                ));
            }

            *self.state.write() = ConnectionState::Reconnecting;

            let delay = self.calculate_backoff_delay(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    *self.state.write() = ConnectionState::Disconnected;
                    return Ok(());
                }
            }
        }
    }

    async fn try_connect(&self) -> WsResult<()> {
        info!(url = %self.config.url, "Connecting to price service");

        let (ws_stream, _response) =
            connect_async_tls_with_config(&self.config.url, None, true, None).await?;
        let (mut write, mut read) = ws_stream.split();

        *self.state.write() = ConnectionState::Connected;
        info!("Price service connected");

        self.subscribe(&mut write, &mut read).await?;
        self.reconnect_count.store(0, Ordering::Relaxed);
        self.watchdog.reset();

        loop {
            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(?e, "Failed to send Close frame during shutdown");
                    }
                    *self.state.write() = ConnectionState::Disconnected;
                    return Ok(());
                }

                msg = read.next() => {
                    self.handle_frame(msg, &mut write).await?;
                }

                () = self.watchdog.tick() => match self.watchdog.check() {
                    WatchdogAction::Idle => {}
                    WatchdogAction::SendPing => {
                        write.send(Message::Ping(Vec::new())).await?;
                        self.watchdog.record_ping();
                        debug!("Sent heartbeat ping");
                    }
                    WatchdogAction::TimedOut => {
                        error!(
                            silent_ms = self.watchdog.silent_for().as_millis() as u64,
                            "Heartbeat timeout"
                        );
                        return Err(WsError::HeartbeatTimeout);
                    }
                },
            }
        }
    }

    /// Send the subscribe request and wait for its acknowledgement.
    ///
    /// Updates that arrive before the ack are forwarded as usual.
    async fn subscribe(&self, write: &mut WsSink, read: &mut WsSource) -> WsResult<()> {
        let request = ClientMessage::subscribe(self.config.feed_ids.clone());
        write
            .send(Message::Text(serde_json::to_string(&request)?))
            .await?;
        info!(count = self.config.feed_ids.len(), "Subscription sent");

        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.config.subscribe_timeout_ms);

        loop {
            let frame = tokio::select! {
                frame = read.next() => frame,
                () = tokio::time::sleep_until(deadline) => {
                    return Err(WsError::ConnectionFailed(
                        "Timed out waiting for subscription response".to_string(),
                    ));
                }
                () = self.shutdown_token.cancelled() => return Ok(()),
            };

            match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                    Ok(ServerMessage::Response(resp)) if resp.is_success() => {
                        info!("Subscription acknowledged");
                        return Ok(());
                    }
                    Ok(ServerMessage::Response(resp)) => {
                        let reason = resp.error.unwrap_or_else(|| resp.status.clone());
                        error!(%reason, "Subscription rejected");
                        return Err(WsError::SubscriptionRejected(reason));
                    }
                    Ok(ServerMessage::PriceUpdate { price_feed }) => {
                        self.forward(price_feed).await?;
                    }
                    Err(e) => warn!(error = %e, "Ignoring unrecognised message"),
                },
                Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = close_details(frame);
                    warn!(code, %reason, "Closed during subscription");
                    return Err(WsError::ConnectionClosed { code, reason });
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(WsError::ConnectionClosed {
                        code: 1006,
                        reason: "Stream ended during subscription".to_string(),
                    });
                }
            }
        }
    }

    async fn handle_frame(
        &self,
        msg: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
        write: &mut WsSink,
    ) -> WsResult<()> {
        match msg {
            Some(Ok(Message::Text(text))) => {
                self.watchdog.record_frame();
                self.handle_text_message(&text).await
            }
            Some(Ok(Message::Ping(data))) => {
                self.watchdog.record_frame();
                write.send(Message::Pong(data)).await?;
                Ok(())
            }
            Some(Ok(Message::Pong(_))) => {
                debug!("Received pong");
                self.watchdog.record_frame();
                Ok(())
            }
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = close_details(frame);
                warn!(code, %reason, "Price service closed the connection");
                Err(WsError::ConnectionClosed { code, reason })
            }
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) => {
                error!(?e, "WebSocket read error");
                Err(e.into())
            }
            None => {
                warn!("WebSocket stream ended");
                Err(WsError::ConnectionClosed {
                    code: 1006,
                    reason: "Stream ended".to_string(),
                })
            }
        }
    }

    async fn handle_text_message(&self, text: &str) -> WsResult<()> {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(ServerMessage::PriceUpdate { price_feed }) => self.forward(price_feed).await,
            Ok(ServerMessage::Response(resp)) => {
                if !resp.is_success() {
                    warn!(error = ?resp.error, "Price service reported an error");
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Ignoring unrecognised message");
                Ok(())
            }
        }
    }

    async fn forward(&self, feed: RpcPriceFeed) -> WsResult<()> {
        self.update_tx
            .send(feed)
            .await
            .map_err(|_| WsError::ReceiverDropped)
    }

    fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        backoff_delay(
            attempt,
            self.config.reconnect_base_delay_ms,
            self.config.reconnect_max_delay_ms,
        ) + Duration::from_millis(rand_jitter(self.config.reconnect_jitter_ms))
    }
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped at `max_ms`.
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    // attempt=1 -> base, attempt=2 -> 2*base, attempt=3 -> 4*base
    let exponent = attempt.saturating_sub(1).min(10);
    let delay = base_ms.saturating_mul(1u64 << exponent);
    Duration::from_millis(delay.min(max_ms))
}

/// Random jitter in `0..=max_ms`.
fn rand_jitter(max_ms: u64) -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    if max_ms == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos) % (max_ms + 1)
}

fn close_details(
    frame: Option<tokio_tungstenite::tungstenite::protocol::CloseFrame<'_>>,
) -> (u16, String) {
    frame
        .map(|f| (f.code.into(), f.reason.to_string()))
        .unwrap_or((1000, "Normal close".to_string()))
}
