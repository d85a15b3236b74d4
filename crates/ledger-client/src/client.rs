use crate::commit_waiter::CommitWaiter;
use crate::endorsement::{EndorsementCollector, EndorsementSet};
use crate::endpoint::Endpoint;
use crate::event_hub::{EventHub, EventSource};
use crate::orderer::Orderer;
use crate::peer::{Endorser, Peer};
use crate::submitter::TransactionSubmitter;
use lazy_static::lazy_static;
use ledger_common::{
    Block, ChaincodeId, Crypto, DeliverRequest, DeliverResponse, DeliverStatus, LedgerError,
    SeekPosition, SignedProposal, TransactionId, TransientMap,
};
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
    static ref PROPOSALS_SENT: IntCounter =
        IntCounter::new("proposals_sent_total", "Total proposals sent for endorsement").unwrap();
    static ref ENDORSEMENTS_REJECTED: IntCounter = IntCounter::new(
        "endorsements_rejected_total",
        "Total endorsement responses rejected"
    )
    .unwrap();
    static ref TX_SUBMITTED: IntCounter = IntCounter::new(
        "tx_submitted_total",
        "Total transactions accepted by the orderer"
    )
    .unwrap();
    static ref TX_COMMITTED: IntCounter =
        IntCounter::new("tx_committed_total", "Total transactions committed as valid").unwrap();
    static ref TX_INVALID: IntCounter =
        IntCounter::new("tx_invalid_total", "Total transactions committed as invalid").unwrap();
    static ref COMMIT_TIMEOUTS: IntCounter =
        IntCounter::new("commit_timeouts_total", "Total commit waits that timed out").unwrap();
}

static METRICS: Once = Once::new();

pub fn init_metrics() {
    METRICS.call_once(|| {
        let counters: [&IntCounter; 6] = [
            &PROPOSALS_SENT,
            &ENDORSEMENTS_REJECTED,
            &TX_SUBMITTED,
            &TX_COMMITTED,
            &TX_INVALID,
            &COMMIT_TIMEOUTS,
        ];
        for counter in counters {
            if let Err(e) = REGISTRY.register(Box::new(counter.clone())) {
                warn!("Failed to register metric: {}", e);
            }
        }
    });
}

/// Renders the client metrics in the prometheus text format.
pub fn gather_metrics() -> Result<String, LedgerError> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| LedgerError::SerializationError(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| LedgerError::SerializationError(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub chaincode: ChaincodeId,
    /// Per peer bound on a proposal round trip.
    pub proposal_timeout: Duration,
    /// Default bound on waiting for a commit event.
    pub commit_timeout: Duration,
}

/// Where the client finds the network it talks to.
#[derive(Debug, Clone)]
pub struct NetworkEndpoints {
    pub peers: Vec<Endpoint>,
    pub orderer: Endpoint,
    pub event_hub: Endpoint,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvokeRequest {
    pub function: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub transient: TransientMap,
    /// Overrides the configured commit timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvokeResult {
    pub tx_id: TransactionId,
    pub block_number: u64,
    /// Chaincode response payload of the first endorser.
    pub payload: Vec<u8>,
}

/// Endorse, order and wait: the whole submission pipeline behind one handle.
pub struct LedgerClient {
    crypto: Arc<Crypto>,
    config: ClientConfig,
    peers: Vec<Arc<dyn Endorser>>,
    orderer: Arc<Orderer>,
    collector: EndorsementCollector,
    submitter: TransactionSubmitter,
    commit_waiter: CommitWaiter,
    waiter_task: Mutex<Option<JoinHandle<()>>>,
}

impl LedgerClient {
    pub fn new<E>(
        crypto: Arc<Crypto>,
        config: ClientConfig,
        peers: Vec<Arc<dyn Endorser>>,
        orderer: Arc<Orderer>,
        events: E,
    ) -> Self
    where
        E: EventSource + 'static,
    {
        init_metrics();
        let (commit_waiter, waiter_task) = CommitWaiter::start(events);
        LedgerClient {
            submitter: TransactionSubmitter::new(
                Arc::clone(&crypto),
                Arc::clone(&orderer),
                commit_waiter.clone(),
            ),
            collector: EndorsementCollector::new(config.proposal_timeout),
            crypto,
            config,
            peers,
            orderer,
            commit_waiter,
            waiter_task: Mutex::new(Some(waiter_task)),
        }
    }

    /// Subscribes to the event hub. Peer and orderer channels open on first use.
    pub async fn connect(
        crypto: Arc<Crypto>,
        config: ClientConfig,
        endpoints: NetworkEndpoints,
    ) -> Result<Self, LedgerError> {
        let events = EventHub::connect(endpoints.event_hub).await?;
        let peers = endpoints
            .peers
            .into_iter()
            .map(|endpoint| Arc::new(Peer::new(endpoint)) as Arc<dyn Endorser>)
            .collect();
        let orderer = Arc::new(Orderer::new(endpoints.orderer));
        info!(
            "Client connected, submitting as {}",
            hex::encode(crypto.public_key_bytes())
        );
        Ok(Self::new(crypto, config, peers, orderer, events))
    }

    pub fn orderer(&self) -> &Orderer {
        &self.orderer
    }

    pub fn new_proposal(
        &self,
        function: &str,
        args: Vec<String>,
        transient: TransientMap,
    ) -> Result<Arc<SignedProposal>, LedgerError> {
        let proposal = self.crypto.generate_proposal(
            self.config.chaincode.clone(),
            function,
            args,
            transient,
        );
        Ok(Arc::new(self.crypto.sign_proposal(proposal)?))
    }

    async fn endorse(&self, proposal: Arc<SignedProposal>) -> Result<EndorsementSet, LedgerError> {
        PROPOSALS_SENT.inc();
        let set = self.collector.collect(proposal, &self.peers).await?;
        if let Err(e) = set.ensure_endorsed() {
            ENDORSEMENTS_REJECTED.inc_by(set.rejected.len() as u64);
            warn!("Endorsement of {} failed: {}", set.tx_id(), e);
            return Err(e);
        }
        Ok(set)
    }

    /// Runs a state changing transaction and waits until it is committed as valid.
    pub async fn invoke(&self, request: InvokeRequest) -> Result<InvokeResult, LedgerError> {
        let max_wait = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.commit_timeout);
        let proposal = self.new_proposal(&request.function, request.args, request.transient)?;
        let set = self.endorse(proposal).await?;
        let payload = set
            .accepted
            .first()
            .map(|r| r.response.payload.clone())
            .unwrap_or_default();

        let pending = self.submitter.submit(&set).await?;
        TX_SUBMITTED.inc();

        let outcome = match pending.wait(max_wait).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if matches!(e, LedgerError::Timeout { .. }) {
                    COMMIT_TIMEOUTS.inc();
                }
                return Err(e);
            }
        };
        if !outcome.is_valid() {
            TX_INVALID.inc();
            return Err(LedgerError::TransactionInvalid {
                tx_id: outcome.tx_id,
                code: outcome.validation_code,
                block_number: outcome.block_number,
            });
        }
        TX_COMMITTED.inc();
        info!(
            "Transaction {} committed in block {}",
            outcome.tx_id, outcome.block_number
        );
        Ok(InvokeResult {
            tx_id: outcome.tx_id,
            block_number: outcome.block_number,
            payload,
        })
    }

    /// Evaluates a proposal on every peer without ordering it.
    pub async fn query(&self, function: &str, args: Vec<String>) -> Result<Vec<u8>, LedgerError> {
        let proposal = self.new_proposal(function, args, TransientMap::new())?;
        self.endorse(proposal).await?.consistent_payload()
    }

    /// Reads committed blocks from the orderer.
    pub async fn deliver_blocks(
        &self,
        start: SeekPosition,
        stop: SeekPosition,
    ) -> Result<Vec<Block>, LedgerError> {
        let mut blocks = Vec::new();
        for response in self
            .orderer
            .deliver_query(DeliverRequest { start, stop })
            .await?
        {
            match response {
                DeliverResponse::Block(block) => blocks.push(block),
                DeliverResponse::Status(DeliverStatus::Success) => {}
                DeliverResponse::Status(status) => {
                    return Err(LedgerError::ProtocolViolation(format!(
                        "deliver from {} ended with {:?}",
                        self.orderer.name(),
                        status
                    )))
                }
            }
        }
        Ok(blocks)
    }

    /// Closes every channel and stops the commit waiter. Safe to call twice.
    pub async fn shutdown(&self, force: bool) {
        self.orderer.shutdown(force).await;
        for peer in &self.peers {
            peer.shutdown(force).await;
        }
        self.commit_waiter.shutdown();
        if let Some(task) = self.waiter_task.lock().await.take() {
            if let Err(e) = task.await {
                error!("Commit waiter task failed: {}", e);
            }
        }
        info!("Client shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit_waiter::tests::{event, ChannelSource};
    use crate::connection::tests::{FakeBuilder, FakeNetwork, Script};
    use crate::endorsement::tests::{chaincode, endorsing_peer, MockNoopEndorser};
    use crate::endpoint::EndpointOptions;
    use ledger_common::{
        Acknowledgment, ChaincodeResponse, CommitEvent, EndorsementStatus, Message,
        ProposalResponse, ValidationCode,
    };
    use tokio::sync::mpsc;

    type Events = mpsc::UnboundedSender<Result<CommitEvent, LedgerError>>;

    fn client(peers: Vec<MockNoopEndorser>) -> (LedgerClient, Arc<FakeNetwork>, Events) {
        let network = Arc::new(FakeNetwork::default());
        let endpoint =
            Endpoint::new("orderer0", "ws://127.0.0.1:7050", EndpointOptions::default()).unwrap();
        let orderer = Arc::new(Orderer::with_builder(
            endpoint,
            Arc::new(FakeBuilder {
                network: Arc::clone(&network),
            }),
        ));
        let (events, rx) = mpsc::unbounded_channel();
        let config = ClientConfig {
            chaincode: chaincode(),
            proposal_timeout: Duration::from_secs(5),
            commit_timeout: Duration::from_secs(30),
        };
        let peers = peers
            .into_iter()
            .map(|p| Arc::new(p) as Arc<dyn Endorser>)
            .collect();
        let client = LedgerClient::new(
            Arc::new(Crypto::generate()),
            config,
            peers,
            orderer,
            ChannelSource { rx },
        );
        (client, network, events)
    }

    fn declining_peer(name: &'static str) -> MockNoopEndorser {
        let mut peer = MockNoopEndorser::new();
        peer.expect_name().return_const(name.to_string());
        peer.expect_process_proposal().returning(move |_| {
            Ok(ProposalResponse {
                peer: name.to_string(),
                status: EndorsementStatus::Failure(500),
                message: "Incorrect number of arguments".to_string(),
                payload: vec![],
                endorsement: None,
                response: ChaincodeResponse::error("Incorrect number of arguments"),
            })
        });
        peer
    }

    fn invoke_move() -> InvokeRequest {
        InvokeRequest {
            function: "move".to_string(),
            args: vec!["a".into(), "b".into(), "100".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn single_rejection_means_orderer_is_never_contacted() {
        let (client, network, _events) =
            client(vec![endorsing_peer("peer0", b""), declining_peer("peer1")]);

        let result = client.invoke(invoke_move()).await;
        match result {
            Err(LedgerError::EndorsementRejected {
                peer,
                accepted,
                rejected,
                ..
            }) => {
                assert_eq!(peer, "peer1");
                assert_eq!((accepted, rejected), (1, 1));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(client.orderer().connection().channels_built(), 0);
        assert!(network.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invoke_waits_for_valid_commit() {
        let (client, network, events) =
            client(vec![endorsing_peer("peer0", b"ok"), endorsing_peer("peer1", b"ok")]);
        network.script(Script::Reply(vec![Message::BroadcastResponse(Acknowledgment::success())]));

        let invoke = client.invoke(invoke_move());
        let feed = async {
            // The envelope is known once the orderer saw it.
            let tx_id = loop {
                tokio::task::yield_now().await;
                let sent = network.sent.lock().unwrap();
                if let Some(Message::Broadcast(envelope)) = sent.first() {
                    break envelope.tx_id.clone();
                }
            };
            events.send(Ok(event(&tx_id, ValidationCode::Valid, 7))).unwrap();
        };
        let (result, ()) = tokio::join!(invoke, feed);

        let result = result.unwrap();
        assert_eq!(result.block_number, 7);
        assert_eq!(result.payload, b"ok".to_vec());
    }

    #[tokio::test]
    async fn invalid_commit_is_an_error() {
        let (client, network, events) = client(vec![endorsing_peer("peer0", b"")]);
        network.script(Script::Reply(vec![Message::BroadcastResponse(Acknowledgment::success())]));

        let invoke = client.invoke(invoke_move());
        let feed = async {
            let tx_id = loop {
                tokio::task::yield_now().await;
                let sent = network.sent.lock().unwrap();
                if let Some(Message::Broadcast(envelope)) = sent.first() {
                    break envelope.tx_id.clone();
                }
            };
            events
                .send(Ok(event(&tx_id, ValidationCode::MvccReadConflict, 2)))
                .unwrap();
        };
        let (result, ()) = tokio::join!(invoke, feed);

        assert!(matches!(
            result,
            Err(LedgerError::TransactionInvalid {
                code: ValidationCode::MvccReadConflict,
                block_number: 2,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn invoke_times_out_with_request_override() {
        let (client, network, _events) = client(vec![endorsing_peer("peer0", b"")]);
        network.script(Script::Reply(vec![Message::BroadcastResponse(Acknowledgment::success())]));

        let result = client
            .invoke(InvokeRequest {
                timeout_ms: Some(1000),
                ..invoke_move()
            })
            .await;
        assert!(matches!(
            result,
            Err(LedgerError::Timeout { elapsed_ms: 1000, .. })
        ));
    }

    #[tokio::test]
    async fn query_returns_agreed_payload() {
        let (client, network, _events) =
            client(vec![endorsing_peer("peer0", b"300"), endorsing_peer("peer1", b"300")]);
        let payload = client.query("query", vec!["b".into()]).await.unwrap();
        assert_eq!(payload, b"300".to_vec());
        assert!(network.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_fails_later_calls() {
        let (client, _network, _events) = client(vec![endorsing_peer("peer0", b"")]);
        client.shutdown(false).await;
        client.shutdown(true).await;

        assert!(matches!(
            client.deliver_blocks(SeekPosition::Oldest, SeekPosition::Newest).await,
            Err(LedgerError::AlreadyShutdown { .. })
        ));
    }

    #[test]
    fn metrics_render_counter_names() {
        init_metrics();
        PROPOSALS_SENT.inc();
        let text = gather_metrics().unwrap();
        assert!(text.contains("proposals_sent_total"));
    }
}
