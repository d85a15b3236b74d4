use crate::peer::Endorser;
use futures_util::future::join_all;
use ledger_common::{
    decode, ChaincodeResponse, Crypto, Endorsement, EndorsementStatus, LedgerError,
    ProposalResponse, ProposalResponsePayload, SignedProposal, TransactionId,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Status reported for peers that could not be asked at all.
pub const UNREACHABLE_STATUS: u32 = 503;

/// One peer's answer to a proposal, as judged by this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndorsementResponse {
    pub peer: String,
    pub status: EndorsementStatus,
    pub message: String,
    pub payload: Vec<u8>,
    pub endorsement: Option<Endorsement>,
    pub response: ChaincodeResponse,
    /// The endorsement signature covers `payload` and the payload belongs to the proposal.
    pub verified: bool,
}

impl EndorsementResponse {
    fn from_reply(peer: &str, tx_id: &TransactionId, reply: ProposalResponse) -> Self {
        let verified = match &reply.endorsement {
            Some(endorsement) => verify(tx_id, &reply.payload, endorsement),
            None => false,
        };
        if !verified && reply.status.is_success() {
            warn!("Endorsement from {} for {} failed verification", peer, tx_id);
        }
        EndorsementResponse {
            peer: peer.to_string(),
            status: reply.status,
            message: reply.message,
            payload: reply.payload,
            endorsement: reply.endorsement,
            response: reply.response,
            verified,
        }
    }

    fn from_failure(peer: &str, error: &LedgerError) -> Self {
        EndorsementResponse {
            peer: peer.to_string(),
            status: EndorsementStatus::Failure(UNREACHABLE_STATUS),
            message: error.to_string(),
            payload: Vec::new(),
            endorsement: None,
            response: ChaincodeResponse::error(error.to_string()),
            verified: false,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status.is_success() && self.verified
    }
}

fn verify(tx_id: &TransactionId, payload: &[u8], endorsement: &Endorsement) -> bool {
    if Crypto::verify_raw(payload, &endorsement.signature, &endorsement.endorser).is_err() {
        return false;
    }
    match decode::<ProposalResponsePayload>(payload) {
        Ok(decoded) => decoded.tx_id == *tx_id,
        Err(_) => false,
    }
}

/// Responses to one proposal, split by whether they can be submitted.
#[derive(Debug, Clone)]
pub struct EndorsementSet {
    pub proposal: Arc<SignedProposal>,
    pub accepted: Vec<EndorsementResponse>,
    pub rejected: Vec<EndorsementResponse>,
}

impl EndorsementSet {
    pub fn tx_id(&self) -> &TransactionId {
        &self.proposal.proposal.tx_id
    }

    /// Zero tolerance: a single rejection aborts, reporting the first one.
    pub fn ensure_endorsed(&self) -> Result<(), LedgerError> {
        match self.rejected.first() {
            Some(first) => Err(LedgerError::EndorsementRejected {
                peer: first.peer.clone(),
                message: first.message.clone(),
                verified: first.verified,
                accepted: self.accepted.len(),
                rejected: self.rejected.len(),
            }),
            None if self.accepted.is_empty() => Err(LedgerError::NoResponses),
            None => Ok(()),
        }
    }

    /// The chaincode payload every accepted peer agreed on.
    pub fn consistent_payload(&self) -> Result<Vec<u8>, LedgerError> {
        self.agreed(|r| &r.response.payload, "payloads")
            .map(|first| first.response.payload.clone())
    }

    /// The signed proposal response payload shared by every accepted endorsement.
    ///
    /// Endorsements over different simulation results cannot go into one envelope.
    pub fn endorsed_payload(&self) -> Result<&[u8], LedgerError> {
        self.agreed(|r| &r.payload, "simulation results")
            .map(|first| first.payload.as_slice())
    }

    fn agreed<F>(&self, field: F, what: &str) -> Result<&EndorsementResponse, LedgerError>
    where
        F: Fn(&EndorsementResponse) -> &Vec<u8>,
    {
        let first = self.accepted.first().ok_or(LedgerError::NoResponses)?;
        let differing: Vec<&str> = self
            .accepted
            .iter()
            .filter(|r| field(r) != field(first))
            .map(|r| r.peer.as_str())
            .collect();
        if !differing.is_empty() {
            return Err(LedgerError::InconsistentResponses(format!(
                "{} returned different {} than {}",
                differing.join(", "),
                what,
                first.peer
            )));
        }
        Ok(first)
    }
}

/// Sends a proposal to every peer at once and judges the answers.
#[derive(Debug, Clone)]
pub struct EndorsementCollector {
    proposal_timeout: Duration,
}

impl EndorsementCollector {
    pub fn new(proposal_timeout: Duration) -> Self {
        EndorsementCollector { proposal_timeout }
    }

    pub async fn collect(
        &self,
        proposal: Arc<SignedProposal>,
        peers: &[Arc<dyn Endorser>],
    ) -> Result<EndorsementSet, LedgerError> {
        if peers.is_empty() {
            return Err(LedgerError::NoResponses);
        }
        let tx_id = proposal.proposal.tx_id.clone();
        debug!("Sending proposal {} to {} peers", tx_id, peers.len());

        let responses = join_all(peers.iter().map(|peer| {
            let proposal = Arc::clone(&proposal);
            let tx_id = &tx_id;
            async move {
                let reply = timeout(self.proposal_timeout, peer.process_proposal(&proposal))
                    .await
                    .unwrap_or_else(|_| {
                        Err(LedgerError::NetworkError(format!(
                            "no proposal response within {:?}",
                            self.proposal_timeout
                        )))
                    });
                match reply {
                    Ok(reply) => EndorsementResponse::from_reply(peer.name(), tx_id, reply),
                    Err(e) => {
                        warn!("Peer {} failed to process proposal {}: {}", peer.name(), tx_id, e);
                        EndorsementResponse::from_failure(peer.name(), &e)
                    }
                }
            }
        }))
        .await;

        let (accepted, rejected): (Vec<_>, Vec<_>) =
            responses.into_iter().partition(EndorsementResponse::is_accepted);
        info!(
            "Received {} proposal responses for {}. Successful+verified: {}. Failed: {}",
            peers.len(),
            tx_id,
            accepted.len(),
            rejected.len()
        );
        Ok(EndorsementSet {
            proposal,
            accepted,
            rejected,
        })
    }
}
