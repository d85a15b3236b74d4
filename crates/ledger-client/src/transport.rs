use crate::endpoint::Endpoint;
use async_trait::async_trait;
use futures_util::StreamExt;
use ledger_common::{next_message, send_message, LedgerError, Message};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// One transport channel to a remote endpoint.
#[async_trait]
pub trait Channel: Send {
    /// `false` once the channel observed a fault or the remote side closed it.
    fn is_active(&self) -> bool;
    async fn send(&mut self, message: Message) -> Result<(), LedgerError>;
    async fn recv(&mut self) -> Result<Message, LedgerError>;
    /// A forced close drops the stream without the close handshake.
    async fn close(&mut self, force: bool);
}

#[async_trait]
pub trait ChannelBuilder: Send + Sync {
    async fn build(&self, endpoint: &Endpoint) -> Result<Box<dyn Channel>, LedgerError>;
}

/// Builds websocket channels carrying bincode encoded messages.
#[derive(Debug, Clone, Default)]
pub struct WsChannelBuilder;

#[async_trait]
impl ChannelBuilder for WsChannelBuilder {
    async fn build(&self, endpoint: &Endpoint) -> Result<Box<dyn Channel>, LedgerError> {
        let options = endpoint.options();
        let mut config = WebSocketConfig::default();
        config.max_message_size = options.max_message_size;

        let connect = connect_async_with_config(endpoint.url(), Some(config), true);
        let (ws, _) = timeout(options.connect_timeout, connect)
            .await
            .map_err(|_| {
                LedgerError::connection(
                    endpoint.url(),
                    format!("timed out after {:?}", options.connect_timeout),
                )
            })?
            .map_err(|e| LedgerError::connection(endpoint.url(), e))?;

        debug!(
            "Opened channel to {} ({}, tls: {})",
            endpoint.name(),
            endpoint.url(),
            endpoint.is_tls()
        );
        Ok(Box::new(WsChannel {
            url: endpoint.url().to_string(),
            ws,
            max_message_size: options.max_message_size,
            close_timeout: options.close_timeout,
            active: true,
        }))
    }
}

pub struct WsChannel {
    url: String,
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    max_message_size: Option<usize>,
    close_timeout: std::time::Duration,
    active: bool,
}

impl WsChannel {
    /// Marks the channel broken and names the endpoint in the error.
    fn fault(&mut self, reason: impl ToString) -> LedgerError {
        self.active = false;
        LedgerError::connection(&self.url, reason)
    }
}

#[async_trait]
impl Channel for WsChannel {
    fn is_active(&self) -> bool {
        self.active
    }

    async fn send(&mut self, message: Message) -> Result<(), LedgerError> {
        match send_message(&mut self.ws, &message, self.max_message_size).await {
            Err(LedgerError::NetworkError(reason)) => Err(self.fault(reason)),
            result => result,
        }
    }

    async fn recv(&mut self) -> Result<Message, LedgerError> {
        match next_message(&mut self.ws).await {
            Some(Ok(message)) => Ok(message),
            Some(Err(LedgerError::NetworkError(reason))) => Err(self.fault(reason)),
            Some(Err(e)) => Err(e),
            None => Err(self.fault("stream closed by remote")),
        }
    }

    async fn close(&mut self, force: bool) {
        self.active = false;
        if force {
            return;
        }
        let handshake = async {
            self.ws.close(None).await?;
            // drain until the remote acknowledges the close frame
            while let Some(frame) = self.ws.next().await {
                frame?;
            }
            Ok::<(), tokio_tungstenite::tungstenite::Error>(())
        };
        match timeout(self.close_timeout, handshake).await {
            Ok(Ok(())) => debug!("Closed channel to {}", self.url),
            Ok(Err(e)) => debug!("Channel to {} closed with error: {}", self.url, e),
            Err(_) => warn!(
                "Channel to {} did not close within {:?}, dropping it",
                self.url, self.close_timeout
            ),
        }
    }
}
