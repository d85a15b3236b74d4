use crate::connection::{ConnectionManager, Reply};
use crate::endpoint::Endpoint;
use crate::transport::{ChannelBuilder, WsChannelBuilder};
use ledger_common::{
    Acknowledgment, DeliverRequest, DeliverResponse, LedgerError, Message, SubmissionEnvelope,
};
use std::sync::Arc;
use tracing::debug;

/// Client side of one ordering service node.
pub struct Orderer {
    connection: ConnectionManager,
}

impl Orderer {
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_builder(endpoint, Arc::new(WsChannelBuilder))
    }

    pub fn with_builder(endpoint: Endpoint, builder: Arc<dyn ChannelBuilder>) -> Self {
        Orderer {
            connection: ConnectionManager::new(endpoint, builder),
        }
    }

    pub fn name(&self) -> &str {
        self.connection.name()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Broadcasts an envelope and returns the orderer's synchronous answer.
    ///
    /// A rejecting acknowledgment is a valid reply and keeps the channel open.
    pub async fn submit(
        &self,
        envelope: &SubmissionEnvelope,
    ) -> Result<Acknowledgment, LedgerError> {
        debug!(
            "Orderer.submit name: {}, url: {}, tx: {}",
            self.name(),
            self.connection.endpoint().url(),
            envelope.tx_id
        );
        let name = self.name();
        self.connection
            .exchange(Message::Broadcast(envelope.clone()), |reply| match reply {
                Message::BroadcastResponse(ack) => Ok(Reply::Done(ack)),
                other => Err(unexpected(name, "BroadcastResponse", &other)),
            })
            .await
    }

    /// Pulls ledger blocks. The returned list always ends with the stream status.
    pub async fn deliver_query(
        &self,
        request: DeliverRequest,
    ) -> Result<Vec<DeliverResponse>, LedgerError> {
        debug!(
            "Orderer.deliver_query name: {}, url: {}, {:?}",
            self.name(),
            self.connection.endpoint().url(),
            request
        );
        let name = self.name();
        let mut responses = Vec::new();
        self.connection
            .exchange(Message::Deliver(request), |reply| match reply {
                Message::DeliverResponse(response) => {
                    let last = response.is_terminal();
                    responses.push(response);
                    Ok(if last { Reply::Done(()) } else { Reply::More })
                }
                other => Err(unexpected(name, "DeliverResponse", &other)),
            })
            .await?;
        Ok(responses)
    }

    pub async fn shutdown(&self, force: bool) {
        self.connection.shutdown(force).await
    }
}

pub(crate) fn unexpected(service: &str, expected: &str, got: &Message) -> LedgerError {
    LedgerError::ProtocolViolation(format!(
        "{} sent {}, expected {}",
        service,
        got.kind(),
        expected
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::{fake_manager, Script};
    use ledger_common::{Block, BroadcastStatus, DeliverStatus, SeekPosition};

    fn orderer() -> (Orderer, Arc<crate::connection::tests::FakeNetwork>) {
        let (connection, network) = fake_manager("orderer0");
        (Orderer { connection }, network)
    }

    fn envelope() -> SubmissionEnvelope {
        SubmissionEnvelope {
            tx_id: "tx1".to_string(),
            creator: vec![1; 32],
            payload: vec![1, 2, 3],
            endorsements: vec![],
            signature: vec![0; 64],
        }
    }

    #[tokio::test]
    async fn rejected_ack_is_returned_and_channel_kept() {
        let (orderer, network) = orderer();
        let nack = Acknowledgment::rejected(BroadcastStatus::BadRequest, "bad envelope");
        network.script(Script::Reply(vec![Message::BroadcastResponse(nack.clone())]));
        network.script(Script::Reply(vec![Message::BroadcastResponse(Acknowledgment::success())]));

        assert_eq!(orderer.submit(&envelope()).await, Ok(nack));
        assert_eq!(orderer.submit(&envelope()).await, Ok(Acknowledgment::success()));
        assert_eq!(orderer.connection().channels_built(), 1);
    }

    #[tokio::test]
    async fn unexpected_reply_discards_channel() {
        let (orderer, network) = orderer();
        network.script(Script::Reply(vec![Message::Subscribed]));
        network.script(Script::Reply(vec![Message::BroadcastResponse(Acknowledgment::success())]));

        assert_eq!(
            orderer.submit(&envelope()).await,
            Err(LedgerError::ProtocolViolation(
                "orderer0 sent Subscribed, expected BroadcastResponse".to_string()
            ))
        );
        assert!(orderer.submit(&envelope()).await.is_ok());
        assert_eq!(orderer.connection().channels_built(), 2);
    }

    #[tokio::test]
    async fn deliver_collects_blocks_until_status() {
        let (orderer, network) = orderer();
        let block = |number| Block {
            number,
            previous_hash: vec![],
            data_hash: vec![],
            transactions: vec![],
        };
        network.script(Script::Reply(vec![
            Message::DeliverResponse(DeliverResponse::Block(block(0))),
            Message::DeliverResponse(DeliverResponse::Block(block(1))),
            Message::DeliverResponse(DeliverResponse::Status(DeliverStatus::Success)),
        ]));

        let responses = orderer
            .deliver_query(DeliverRequest {
                start: SeekPosition::Oldest,
                stop: SeekPosition::Newest,
            })
            .await
            .unwrap();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[1], DeliverResponse::Block(block(1)));
        assert!(responses[2].is_terminal());
    }

    #[tokio::test]
    async fn calls_after_shutdown_fail() {
        let (orderer, _network) = orderer();
        orderer.shutdown(true).await;
        orderer.shutdown(true).await;
        assert_eq!(
            orderer.submit(&envelope()).await,
            Err(LedgerError::AlreadyShutdown {
                name: "orderer0".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn silent_orderer_does_not_block_graceful_shutdown() {
        let (orderer, network) = orderer();
        let orderer = Arc::new(orderer);
        network.script(Script::Hang);

        let submit = {
            let orderer = Arc::clone(&orderer);
            tokio::spawn(async move { orderer.submit(&envelope()).await })
        };
        tokio::task::yield_now().await;
        orderer.shutdown(false).await;

        assert!(matches!(
            submit.await.unwrap(),
            Err(LedgerError::ConnectionError { .. })
        ));
        assert!(orderer.connection().is_shutdown().await);
        assert_eq!(*network.closed.lock().unwrap(), vec![true]);
    }
}
