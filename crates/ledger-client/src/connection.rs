use crate::endpoint::Endpoint;
use crate::transport::{Channel, ChannelBuilder};
use ledger_common::{LedgerError, Message};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// What the caller wants after each reply of an exchange.
pub enum Reply<T> {
    Done(T),
    More,
}

struct ConnectionState {
    handle: Option<Box<dyn Channel>>,
    shutdown: bool,
}

/// Owns the single transport channel to one endpoint.
///
/// The channel is created lazily and replaced whenever it is found broken.
/// Any failed exchange discards it, so the next call always starts from a fresh
/// channel. Nothing is retried inside a call. The lock is held for the whole
/// exchange, which serializes callers and keeps `shutdown` from closing a channel
/// that is in use.
pub struct ConnectionManager {
    endpoint: Endpoint,
    builder: Arc<dyn ChannelBuilder>,
    state: Mutex<ConnectionState>,
    channels_built: AtomicU64,
}

impl ConnectionManager {
    pub fn new(endpoint: Endpoint, builder: Arc<dyn ChannelBuilder>) -> Self {
        ConnectionManager {
            endpoint,
            builder,
            state: Mutex::new(ConnectionState {
                handle: None,
                shutdown: false,
            }),
            channels_built: AtomicU64::new(0),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn name(&self) -> &str {
        self.endpoint.name()
    }

    /// Number of channels constructed over the lifetime of the manager.
    pub fn channels_built(&self) -> u64 {
        self.channels_built.load(Ordering::SeqCst)
    }

    pub async fn is_shutdown(&self) -> bool {
        self.state.lock().await.shutdown
    }

    /// Sends `message` and feeds every reply to `on_reply` until it returns `Reply::Done`.
    ///
    /// The exchange must finish within the endpoint's `request_timeout`. An error from
    /// the transport or from `on_reply`, or running out of time, discards the channel.
    /// So does dropping the returned future, since the channel is only put back once
    /// the exchange completed.
    pub async fn exchange<T, F>(&self, message: Message, mut on_reply: F) -> Result<T, LedgerError>
    where
        F: FnMut(Message) -> Result<Reply<T>, LedgerError> + Send,
        T: Send,
    {
        let mut state = self.state.lock().await;
        let mut channel = self.take_active_channel(&mut state).await?;

        let kind = message.kind();
        let limit = self.endpoint.options().request_timeout;
        let exchange = async {
            channel.send(message).await?;
            loop {
                if let Reply::Done(value) = on_reply(channel.recv().await?)? {
                    return Ok(value);
                }
            }
        };
        let result: Result<T, LedgerError> = match timeout(limit, exchange).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::connection(
                self.endpoint.url(),
                format!("{} sent no reply within {:?}", self.name(), limit),
            )),
        };

        match &result {
            Ok(_) => state.handle = Some(channel),
            Err(e) => {
                warn!(
                    "{} request to {} failed, discarding channel: {}",
                    kind,
                    self.name(),
                    e
                );
                channel.close(true).await;
            }
        }
        result
    }

    /// Single request, single reply.
    pub async fn request(&self, message: Message) -> Result<Message, LedgerError> {
        self.exchange(message, |reply| Ok(Reply::Done(reply))).await
    }

    /// Tears down the channel and refuses every later call. Safe to call repeatedly.
    pub async fn shutdown(&self, force: bool) {
        let mut state = self.state.lock().await;
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        if let Some(mut channel) = state.handle.take() {
            channel.close(force).await;
        }
        info!("Connection to {} shut down (force: {})", self.name(), force);
    }

    async fn take_active_channel(
        &self,
        state: &mut ConnectionState,
    ) -> Result<Box<dyn Channel>, LedgerError> {
        if state.shutdown {
            return Err(LedgerError::AlreadyShutdown {
                name: self.name().to_string(),
            });
        }

        match state.handle.take() {
            Some(channel) if channel.is_active() => Ok(channel),
            stale => {
                if let Some(mut broken) = stale {
                    debug!("Channel to {} is no longer active, replacing it", self.name());
                    broken.close(true).await;
                }
                let channel = self.builder.build(&self.endpoint).await?;
                self.channels_built.fetch_add(1, Ordering::SeqCst);
                Ok(channel)
            }
        }
    }
}
