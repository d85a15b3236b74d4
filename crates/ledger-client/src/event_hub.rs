use crate::endpoint::Endpoint;
use crate::orderer::unexpected;
use crate::transport::{Channel, ChannelBuilder, WsChannelBuilder};
use async_trait::async_trait;
use ledger_common::{CommitEvent, LedgerError, Message};
use tracing::{info, warn};

/// Source of commit notifications consumed by the commit waiter.
#[async_trait]
pub trait EventSource: Send {
    /// `None` means the stream ended and will not produce anything else.
    async fn next_event(&mut self) -> Option<Result<CommitEvent, LedgerError>>;

    async fn close(&mut self) {}
}

/// Long lived subscription to the commit events of one event hub.
///
/// There is no reconnect: a dropped stream is reported to every waiter.
pub struct EventHub {
    endpoint: Endpoint,
    channel: Box<dyn Channel>,
    ended: bool,
}

impl EventHub {
    pub async fn connect(endpoint: Endpoint) -> Result<Self, LedgerError> {
        Self::connect_with(endpoint, &WsChannelBuilder).await
    }

    pub async fn connect_with(
        endpoint: Endpoint,
        builder: &dyn ChannelBuilder,
    ) -> Result<Self, LedgerError> {
        let mut channel = builder.build(&endpoint).await?;
        channel.send(Message::Subscribe).await?;
        match channel.recv().await? {
            Message::Subscribed => {}
            other => {
                channel.close(true).await;
                return Err(unexpected(endpoint.name(), "Subscribed", &other));
            }
        }
        info!("Subscribed to commit events of {}", endpoint.name());
        Ok(EventHub {
            endpoint,
            channel,
            ended: false,
        })
    }

    pub fn name(&self) -> &str {
        self.endpoint.name()
    }
}

#[async_trait]
impl EventSource for EventHub {
    async fn next_event(&mut self) -> Option<Result<CommitEvent, LedgerError>> {
        if self.ended {
            return None;
        }
        loop {
            match self.channel.recv().await {
                Ok(Message::Commit(event)) => return Some(Ok(event)),
                Ok(other) => warn!(
                    "Ignoring {} message from event hub {}",
                    other.kind(),
                    self.endpoint.name()
                ),
                Err(e) => {
                    self.ended = true;
                    return Some(Err(e));
                }
            }
        }
    }

    async fn close(&mut self) {
        self.ended = true;
        self.channel.close(false).await;
    }
}
