use crate::commit_waiter::{CommitOutcome, CommitSubscription, CommitWaiter};
use crate::endorsement::EndorsementSet;
use crate::orderer::Orderer;
use ledger_common::{Crypto, LedgerError, SubmissionEnvelope, TransactionId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A transaction accepted by the orderer whose commit has not been seen yet.
pub struct PendingCommit {
    pub tx_id: TransactionId,
    subscription: CommitSubscription,
}

impl PendingCommit {
    pub async fn wait(self, max_wait: Duration) -> Result<CommitOutcome, LedgerError> {
        self.subscription.wait(max_wait).await
    }
}

/// Turns an endorsed proposal into a signed envelope and hands it to the orderer.
pub struct TransactionSubmitter {
    crypto: Arc<Crypto>,
    orderer: Arc<Orderer>,
    commit_waiter: CommitWaiter,
}

impl TransactionSubmitter {
    pub fn new(crypto: Arc<Crypto>, orderer: Arc<Orderer>, commit_waiter: CommitWaiter) -> Self {
        TransactionSubmitter {
            crypto,
            orderer,
            commit_waiter,
        }
    }

    /// The set is expected to be filtered already: every accepted response goes in,
    /// so all of them must have signed the same simulation result.
    pub async fn submit(
        &self,
        endorsements: &EndorsementSet,
    ) -> Result<PendingCommit, LedgerError> {
        let payload = endorsements.endorsed_payload()?.to_vec();
        let tx_id = endorsements.tx_id().clone();

        // Registered before broadcast so the commit event cannot slip past.
        let subscription = self.commit_waiter.register(&tx_id)?;

        let envelope = self.envelope(&tx_id, payload, endorsements)?;
        debug!(
            "Submitting {} with {} endorsements to {}",
            tx_id,
            envelope.endorsements.len(),
            self.orderer.name()
        );
        let ack = self.orderer.submit(&envelope).await?;
        if !ack.is_success() {
            warn!(
                "Orderer {} rejected {}: {:?} {}",
                self.orderer.name(),
                tx_id,
                ack.status,
                ack.info
            );
            return Err(LedgerError::OrderingRejected {
                orderer: self.orderer.name().to_string(),
                tx_id,
                status: ack.status,
                info: ack.info,
            });
        }
        info!("Transaction {} accepted by {}", tx_id, self.orderer.name());
        Ok(PendingCommit {
            tx_id,
            subscription,
        })
    }

    fn envelope(
        &self,
        tx_id: &TransactionId,
        payload: Vec<u8>,
        endorsements: &EndorsementSet,
    ) -> Result<SubmissionEnvelope, LedgerError> {
        let signature = self
            .crypto
            .sign(&Crypto::envelope_signing_bytes(tx_id, &payload)?)
            .to_bytes()
            .to_vec();
        Ok(SubmissionEnvelope {
            tx_id: tx_id.clone(),
            creator: self.crypto.public_key_bytes(),
            payload,
            endorsements: endorsements
                .accepted
                .iter()
                .filter_map(|r| r.endorsement.clone())
                .collect(),
            signature,
        })
    }
}
