use async_trait::async_trait;
use ledger_common::{
    encode, Acknowledgment, BroadcastStatus, ChaincodeId, ChaincodeResponse, Crypto,
    DeliverRequest, DeliverResponse, DeliverStatus, Endorsement, EndorsementStatus, LedgerError,
    Message, ProposalResponse, ProposalResponsePayload, SignedProposal, SubmissionEnvelope,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub mod chaincode;
pub mod ledger;
pub mod network;

use chaincode::{Chaincode, ChaincodeStub};
use ledger::Ledger;
use network::{MessageHandler, NodeNetwork};

/// A peer that simulates proposals against the shared ledger and signs the result.
pub struct EndorsingPeer {
    name: String,
    crypto: Crypto,
    chaincode_id: ChaincodeId,
    chaincode: Arc<dyn Chaincode>,
    ledger: Arc<RwLock<Ledger>>,
}

impl EndorsingPeer {
    pub fn new(
        name: impl Into<String>,
        crypto: Crypto,
        chaincode_id: ChaincodeId,
        chaincode: Arc<dyn Chaincode>,
        ledger: Arc<RwLock<Ledger>>,
    ) -> Self {
        EndorsingPeer {
            name: name.into(),
            crypto,
            chaincode_id,
            chaincode,
            ledger,
        }
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.crypto.public_key_bytes()
    }

    fn failure(&self, status: u32, message: impl Into<String>) -> ProposalResponse {
        let message = message.into();
        ProposalResponse {
            peer: self.name.clone(),
            status: EndorsementStatus::Failure(status),
            response: ChaincodeResponse::error(message.clone()),
            message,
            payload: Vec::new(),
            endorsement: None,
        }
    }

    pub async fn process_proposal(&self, signed: &SignedProposal) -> ProposalResponse {
        let proposal = &signed.proposal;
        if let Err(e) = Crypto::verify_proposal(signed) {
            warn!("{} refused proposal {}: {}", self.name, proposal.tx_id, e);
            return self.failure(403, e.to_string());
        }
        if proposal.chaincode != self.chaincode_id {
            return self.failure(
                404,
                format!("Chaincode {} is not installed", proposal.chaincode.name),
            );
        }

        let (response, rwset) = {
            let ledger = self.ledger.read().await;
            let mut stub = ChaincodeStub::new(
                ledger.state(),
                &proposal.function,
                &proposal.args,
                &proposal.transient,
            );
            let response = self.chaincode.invoke(&mut stub);
            (response, stub.into_rwset())
        };
        if !response.is_ok() {
            debug!("{} chaincode error for {}: {}", self.name, proposal.tx_id, response.message);
            let status = u32::try_from(response.status).unwrap_or(500);
            return ProposalResponse {
                peer: self.name.clone(),
                status: EndorsementStatus::Failure(status),
                message: response.message.clone(),
                payload: Vec::new(),
                endorsement: None,
                response,
            };
        }

        let payload = match encode(&ProposalResponsePayload {
            tx_id: proposal.tx_id.clone(),
            chaincode: proposal.chaincode.clone(),
            rwset,
            response: response.clone(),
        }) {
            Ok(payload) => payload,
            Err(e) => return self.failure(500, e.to_string()),
        };
        ProposalResponse {
            peer: self.name.clone(),
            status: EndorsementStatus::Success,
            message: String::new(),
            endorsement: Some(Endorsement {
                endorser: self.crypto.public_key_bytes(),
                signature: self.crypto.sign(&payload).to_bytes().to_vec(),
            }),
            payload,
            response,
        }
    }
}

#[async_trait]
impl MessageHandler for EndorsingPeer {
    async fn handle(&self, message: Message) -> Vec<Message> {
        match message {
            Message::Proposal(signed) => {
                vec![Message::ProposalResponse(self.process_proposal(&signed).await)]
            }
            other => {
                warn!("{} received unexpected {} message", self.name, other.kind());
                Vec::new()
            }
        }
    }
}

/// Single node ordering service: one block per accepted envelope.
pub struct SoloOrderer {
    ledger: Arc<RwLock<Ledger>>,
    network: NodeNetwork,
}

impl SoloOrderer {
    pub fn new(ledger: Arc<RwLock<Ledger>>, network: NodeNetwork) -> Self {
        SoloOrderer { ledger, network }
    }

    /// The block is cut before the acknowledgment goes out; the commit event
    /// follows asynchronously.
    pub async fn broadcast(&self, envelope: SubmissionEnvelope) -> Acknowledgment {
        if envelope.tx_id.is_empty() || envelope.payload.is_empty() {
            return Acknowledgment::rejected(BroadcastStatus::BadRequest, "empty envelope");
        }
        let event = match self.ledger.write().await.commit(&envelope) {
            Ok(event) => event,
            Err(e) => {
                warn!("Failed to cut block for {}: {}", envelope.tx_id, e);
                return Acknowledgment::rejected(BroadcastStatus::InternalError, e.to_string());
            }
        };
        let network = self.network.clone();
        tokio::spawn(async move {
            network.broadcast(Message::Commit(event)).await;
        });
        Acknowledgment::success()
    }

    pub async fn deliver(&self, request: DeliverRequest) -> Vec<DeliverResponse> {
        match self.ledger.read().await.blocks(request.start, request.stop) {
            Ok(blocks) => blocks
                .into_iter()
                .map(DeliverResponse::Block)
                .chain(std::iter::once(DeliverResponse::Status(DeliverStatus::Success)))
                .collect(),
            Err(status) => vec![DeliverResponse::Status(status)],
        }
    }
}

#[async_trait]
impl MessageHandler for SoloOrderer {
    async fn handle(&self, message: Message) -> Vec<Message> {
        match message {
            Message::Broadcast(envelope) => {
                vec![Message::BroadcastResponse(self.broadcast(envelope).await)]
            }
            Message::Deliver(request) => self
                .deliver(request)
                .await
                .into_iter()
                .map(Message::DeliverResponse)
                .collect(),
            other => {
                warn!("Orderer received unexpected {} message", other.kind());
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DevNetworkConfig {
    /// Host the listeners bind; every service gets an ephemeral port.
    pub host: String,
    pub peers: usize,
    pub genesis: Vec<(String, String)>,
    /// Peer identities are derived from this seed.
    pub seed: [u8; 32],
    pub chaincode: ChaincodeId,
}

/// A whole network in one process: endorsing peers, a solo orderer and the
/// event hub, all backed by one ledger.
pub struct DevNetwork {
    pub peer_urls: Vec<(String, String)>,
    pub orderer_url: String,
    pub event_hub_url: String,
    network: NodeNetwork,
    ledger: Arc<RwLock<Ledger>>,
}

impl DevNetwork {
    pub async fn start(config: DevNetworkConfig) -> Result<Self, LedgerError> {
        if config.peers == 0 {
            return Err(LedgerError::ConfigError("At least one peer is required".to_string()));
        }
        let identities = (0..config.peers)
            .map(|i| Crypto::from_secret_key(&derive_seed(&config.seed, i)))
            .collect::<Result<Vec<_>, _>>()?;
        let ledger = Arc::new(RwLock::new(Ledger::new(
            &config.genesis,
            identities.iter().map(Crypto::public_key_bytes).collect(),
        )?));
        let network = NodeNetwork::new();
        let address = format!("{}:0", config.host);

        let mut peer_urls = Vec::new();
        for (i, crypto) in identities.into_iter().enumerate() {
            let name = format!("peer{}", i);
            let peer = EndorsingPeer::new(
                name.as_str(),
                crypto,
                config.chaincode.clone(),
                Arc::new(chaincode::ExampleChaincode),
                Arc::clone(&ledger),
            );
            let local = network.listen(&address, Arc::new(peer)).await?;
            peer_urls.push((name, format!("ws://{}", local)));
        }
        let orderer = SoloOrderer::new(Arc::clone(&ledger), network.clone());
        let orderer_url = format!("ws://{}", network.listen(&address, Arc::new(orderer)).await?);
        let event_hub_url = peer_urls[0].1.clone();

        info!(
            "Development network up: {} peers, orderer at {}",
            peer_urls.len(),
            orderer_url
        );
        Ok(DevNetwork {
            peer_urls,
            orderer_url,
            event_hub_url,
            network,
            ledger,
        })
    }

    pub fn ledger(&self) -> &Arc<RwLock<Ledger>> {
        &self.ledger
    }

    pub fn network(&self) -> &NodeNetwork {
        &self.network
    }
}

fn derive_seed(base: &[u8; 32], index: usize) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(base);
    hasher.update((index as u64).to_le_bytes());
    hasher.finalize().into()
}
