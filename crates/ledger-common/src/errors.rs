use crate::types::{BroadcastStatus, TransactionId, ValidationCode};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectionError { endpoint: String, reason: String },
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("{name} was shutdown")]
    AlreadyShutdown { name: String },
    #[error("No endorsement responses received")]
    NoResponses,
    #[error(
        "Not enough endorsers: {accepted} accepted, {rejected} rejected. \
         Peer {peer} failed with: {message}. Was verified: {verified}"
    )]
    EndorsementRejected {
        peer: String,
        message: String,
        verified: bool,
        accepted: usize,
        rejected: usize,
    },
    #[error("Endorsement responses are inconsistent: {0}")]
    InconsistentResponses(String),
    #[error("Orderer {orderer} rejected transaction {tx_id} with {status:?}: {info}")]
    OrderingRejected {
        orderer: String,
        tx_id: TransactionId,
        status: BroadcastStatus,
        info: String,
    },
    #[error("Transaction {tx_id} not committed within {elapsed_ms}ms")]
    Timeout { tx_id: TransactionId, elapsed_ms: u128 },
    #[error("Commit event stream failed while waiting for {tx_id}: {reason}")]
    StreamFailure { tx_id: TransactionId, reason: String },
    #[error("Transaction {tx_id} was committed in block {block_number} as invalid: {code:?}")]
    TransactionInvalid {
        tx_id: TransactionId,
        code: ValidationCode,
        block_number: u64,
    },
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },
}

impl LedgerError {
    pub fn connection(endpoint: &str, reason: impl ToString) -> Self {
        LedgerError::ConnectionError {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }
}
