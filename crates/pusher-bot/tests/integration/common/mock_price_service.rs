//! Mock price service for integration tests.
//!
//! Provides a local WebSocket server that can:
//! - Accept connections and acknowledge (or reject) subscriptions
//! - Stream scripted `price_update` frames after the acknowledgement
//! - Close the connection after the script to exercise reconnects
//! - Record received messages

use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// How the server answers a subscribe request.
#[derive(Debug, Clone)]
pub enum SubscribeReply {
    Accept,
    Reject(String),
}

#[derive(Debug, Clone)]
pub struct ServerScript {
    pub reply: SubscribeReply,
    /// Frames sent after a successful acknowledgement.
    pub updates: Vec<String>,
    /// Send a Close frame once the updates are out.
    pub close_after_updates: bool,
}

impl ServerScript {
    pub fn streaming(updates: Vec<String>) -> Self {
        Self {
            reply: SubscribeReply::Accept,
            updates,
            close_after_updates: false,
        }
    }
}

/// A mock price service for testing.
pub struct MockPriceService {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
}

impl MockPriceService {
    /// Start a server that accepts subscriptions and streams `updates`.
    pub async fn start(updates: Vec<String>) -> Self {
        Self::start_with(ServerScript::streaming(updates)).await
    }

    /// Start a new server on an available port.
    pub async fn start_with(script: ServerScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));
        let connections: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let messages_clone = messages.clone();
        let connections_clone = connections.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let messages = messages_clone.clone();
                        let connections = connections_clone.clone();
                        tokio::spawn(handle_connection(stream, script.clone(), messages, connections));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            messages,
            connections,
        }
    }

    /// Get the server's WebSocket URL.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Get the number of connections received.
    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    /// Get all received messages.
    pub async fn received_messages(&self) -> Vec<String> {
        self.messages.lock().await.iter().cloned().collect()
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    script: ServerScript,
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
) {
    {
        let mut count = connections.lock().await;
        *count += 1;
    }

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                {
                    let mut msgs = messages.lock().await;
                    msgs.push_back(text.clone());
                }

                let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&text) else {
                    continue;
                };
                if parsed.get("type") != Some(&serde_json::json!("subscribe")) {
                    continue;
                }

                match &script.reply {
                    SubscribeReply::Accept => {
                        let ack = serde_json::json!({"type": "response", "status": "success"});
                        let _ = write.send(Message::Text(ack.to_string())).await;
                        for update in &script.updates {
                            let _ = write.send(Message::Text(update.clone())).await;
                        }
                        if script.close_after_updates {
                            let _ = write.send(Message::Close(None)).await;
                            return;
                        }
                    }
                    SubscribeReply::Reject(reason) => {
                        let nack = serde_json::json!({
                            "type": "response",
                            "status": "error",
                            "error": reason
                        });
                        let _ = write.send(Message::Text(nack.to_string())).await;
                    }
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockPriceService::start(Vec::new()).await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        server.shutdown().await;
    }
}
