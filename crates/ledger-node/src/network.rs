use futures_util::stream::{SplitSink, StreamExt};
use ledger_common::{next_message, send_message, LedgerError, Message};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message as TungMessage;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type WsSink = SplitSink<WebSocketStream<TcpStream>, TungMessage>;
type SharedSink = Arc<Mutex<WsSink>>;

/// Request side of a node service. Every returned message is sent back in order.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Vec<Message>;
}

/// Websocket listeners of one node process plus the commit event subscribers
/// they share. Any listener accepts `Subscribe`.
#[derive(Clone, Default)]
pub struct NodeNetwork {
    subscribers: Arc<RwLock<HashMap<Uuid, SharedSink>>>,
}

impl NodeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends `message` to every subscriber, forgetting those that went away.
    pub async fn broadcast(&self, message: Message) {
        let mut subscribers = self.subscribers.write().await;
        let mut disconnected = Vec::new();

        for (session_id, sink) in subscribers.iter() {
            if let Err(e) = send_message(&mut *sink.lock().await, &message, None).await {
                warn!("Failed to send to subscriber {}: {}", session_id, e);
                disconnected.push(*session_id);
            }
        }

        for session_id in disconnected {
            subscribers.remove(&session_id);
            info!("Session with ID {:?} terminated", session_id);
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Binds `address` and serves `handler` on every accepted connection.
    /// Returns the bound address, so port 0 may be used.
    pub async fn listen(
        &self,
        address: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SocketAddr, LedgerError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| LedgerError::NetworkError(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| LedgerError::NetworkError(e.to_string()))?;

        let network = self.clone();
        tokio::spawn(async move {
            while let Ok((stream, remote)) = listener.accept().await {
                let network = network.clone();
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws_stream) => network.serve(ws_stream, handler).await,
                        Err(e) => warn!("Websocket handshake with {} failed: {}", remote, e),
                    }
                });
            }
        });

        info!("WebSocket server listening on {}", local_addr);
        Ok(local_addr)
    }

    async fn serve(&self, ws_stream: WebSocketStream<TcpStream>, handler: Arc<dyn MessageHandler>) {
        let session_id = Uuid::new_v4();
        let (write, mut read) = ws_stream.split();
        let sink: SharedSink = Arc::new(Mutex::new(write));

        while let Some(message) = next_message(&mut read).await {
            let replies = match message {
                Ok(Message::Subscribe) => {
                    self.subscribers
                        .write()
                        .await
                        .insert(session_id, Arc::clone(&sink));
                    debug!("Session {} subscribed to commit events", session_id);
                    vec![Message::Subscribed]
                }
                Ok(message) => handler.handle(message).await,
                Err(e) => {
                    warn!("Session {} sent an unreadable message: {}", session_id, e);
                    break;
                }
            };
            let mut sink = sink.lock().await;
            for reply in &replies {
                if let Err(e) = send_message(&mut *sink, reply, None).await {
                    warn!("Failed to reply on session {}: {}", session_id, e);
                    break;
                }
            }
        }

        self.subscribers.write().await.remove(&session_id);
        debug!("Session {} closed", session_id);
    }
}
