use crate::connection::{ConnectionManager, Reply};
use crate::endpoint::Endpoint;
use crate::orderer::unexpected;
use crate::transport::{ChannelBuilder, WsChannelBuilder};
use async_trait::async_trait;
use ledger_common::{LedgerError, Message, ProposalResponse, SignedProposal};
use std::sync::Arc;

/// Anything able to evaluate a proposal and answer with an endorsement.
#[async_trait]
pub trait Endorser: Send + Sync {
    fn name(&self) -> &str;
    async fn process_proposal(
        &self,
        proposal: &SignedProposal,
    ) -> Result<ProposalResponse, LedgerError>;

    async fn shutdown(&self, _force: bool) {}
}

/// Endorsing peer reached over its own managed connection.
pub struct Peer {
    connection: ConnectionManager,
}

impl Peer {
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_builder(endpoint, Arc::new(WsChannelBuilder))
    }

    pub fn with_builder(endpoint: Endpoint, builder: Arc<dyn ChannelBuilder>) -> Self {
        Peer {
            connection: ConnectionManager::new(endpoint, builder),
        }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }
}

#[async_trait]
impl Endorser for Peer {
    fn name(&self) -> &str {
        self.connection.name()
    }

    async fn process_proposal(
        &self,
        proposal: &SignedProposal,
    ) -> Result<ProposalResponse, LedgerError> {
        let name = self.connection.name();
        self.connection
            .exchange(Message::Proposal(proposal.clone()), |reply| match reply {
                Message::ProposalResponse(response) => Ok(Reply::Done(response)),
                other => Err(unexpected(name, "ProposalResponse", &other)),
            })
            .await
    }

    async fn shutdown(&self, force: bool) {
        self.connection.shutdown(force).await
    }
}
