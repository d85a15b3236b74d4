use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hex encoded sha256 of the proposal nonce and creator key.
pub type TransactionId = String;

pub type TransientMap = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Encode, Decode)]
pub struct ChaincodeId {
    pub name: String,
    pub version: String,
}

/// A requested ledger change, created once per invocation attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub struct Proposal {
    pub tx_id: TransactionId,
    pub chaincode: ChaincodeId,
    pub function: String,
    pub args: Vec<String>,
    /// Handed to the chaincode but never written to the ledger.
    pub transient: TransientMap,
    pub creator: Vec<u8>,
    pub nonce: Vec<u8>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub struct SignedProposal {
    pub proposal: Proposal,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub enum EndorsementStatus {
    Success,
    Failure(u32),
}

impl EndorsementStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, EndorsementStatus::Success)
    }
}

/// Application level result of a chaincode invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub struct ChaincodeResponse {
    pub status: i32,
    pub message: String,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl ChaincodeResponse {
    pub const OK: i32 = 200;
    pub const ERROR: i32 = 500;

    pub fn ok(payload: Vec<u8>) -> Self {
        ChaincodeResponse {
            status: Self::OK,
            message: String::new(),
            payload,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ChaincodeResponse {
            status: Self::ERROR,
            message: message.into(),
            payload: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status < 400
    }
}

/// Position of the last write to a key: block number and index inside the block.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Encode, Decode,
)]
pub struct Version {
    pub block: u64,
    pub tx: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub struct KvRead {
    pub key: String,
    pub version: Option<Version>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub struct KvWrite {
    pub key: String,
    /// `None` deletes the key.
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub struct ReadWriteSet {
    pub reads: Vec<KvRead>,
    pub writes: Vec<KvWrite>,
}

/// The bytes a peer signs when endorsing a proposal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub struct ProposalResponsePayload {
    pub tx_id: TransactionId,
    pub chaincode: ChaincodeId,
    pub rwset: ReadWriteSet,
    pub response: ChaincodeResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub struct Endorsement {
    pub endorser: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Peer reply to a proposal as it travels on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub struct ProposalResponse {
    pub peer: String,
    pub status: EndorsementStatus,
    pub message: String,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub endorsement: Option<Endorsement>,
    pub response: ChaincodeResponse,
}

/// Accepted endorsements combined into the payload routed to the orderer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub struct SubmissionEnvelope {
    pub tx_id: TransactionId,
    pub creator: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub endorsements: Vec<Endorsement>,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub enum BroadcastStatus {
    Success,
    BadRequest,
    Forbidden,
    NotFound,
    ServiceUnavailable,
    InternalError,
}

/// Synchronous reply of the orderer to a broadcast envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub struct Acknowledgment {
    pub status: BroadcastStatus,
    pub info: String,
}

impl Acknowledgment {
    pub fn success() -> Self {
        Acknowledgment {
            status: BroadcastStatus::Success,
            info: String::new(),
        }
    }

    pub fn rejected(status: BroadcastStatus, info: impl Into<String>) -> Self {
        Acknowledgment {
            status,
            info: info.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == BroadcastStatus::Success
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Encode, Decode)]
pub enum ValidationCode {
    Valid,
    EndorsementPolicyFailure,
    MvccReadConflict,
    BadPayload,
    DuplicateTxId,
    BadCreatorSignature,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub struct CommitEvent {
    pub tx_id: TransactionId,
    pub validation_code: ValidationCode,
    pub block_number: u64,
}

impl CommitEvent {
    pub fn is_valid(&self) -> bool {
        self.validation_code == ValidationCode::Valid
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub struct TransactionRecord {
    pub tx_id: TransactionId,
    pub validation_code: ValidationCode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub struct Block {
    pub number: u64,
    pub previous_hash: Vec<u8>,
    pub data_hash: Vec<u8>,
    pub transactions: Vec<TransactionRecord>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub enum SeekPosition {
    Oldest,
    Newest,
    Specified(u64),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub struct DeliverRequest {
    pub start: SeekPosition,
    pub stop: SeekPosition,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub enum DeliverStatus {
    Success,
    NotFound,
    BadRequest,
}

/// One element of a deliver stream. The stream always ends with a `Status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub enum DeliverResponse {
    Block(Block),
    Status(DeliverStatus),
}

impl DeliverResponse {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliverResponse::Status(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Encode, Decode)]
pub enum Message {
    Proposal(SignedProposal),
    ProposalResponse(ProposalResponse),
    Broadcast(SubmissionEnvelope),
    BroadcastResponse(Acknowledgment),
    Deliver(DeliverRequest),
    DeliverResponse(DeliverResponse),
    Subscribe,
    Subscribed,
    Commit(CommitEvent),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Proposal(_) => "Proposal",
            Message::ProposalResponse(_) => "ProposalResponse",
            Message::Broadcast(_) => "Broadcast",
            Message::BroadcastResponse(_) => "BroadcastResponse",
            Message::Deliver(_) => "Deliver",
            Message::DeliverResponse(_) => "DeliverResponse",
            Message::Subscribe => "Subscribe",
            Message::Subscribed => "Subscribed",
            Message::Commit(_) => "Commit",
        }
    }
}
