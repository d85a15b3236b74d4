pub mod client;
pub mod commit_waiter;
pub mod connection;
pub mod endorsement;
pub mod endpoint;
pub mod event_hub;
pub mod orderer;
pub mod peer;
pub mod rest_api;
pub mod submitter;
pub mod transport;

pub use client::{ClientConfig, InvokeRequest, InvokeResult, LedgerClient, NetworkEndpoints};
pub use commit_waiter::{CommitOutcome, CommitSubscription, CommitWaiter};
pub use connection::ConnectionManager;
pub use endorsement::{EndorsementCollector, EndorsementResponse, EndorsementSet};
pub use endpoint::{Endpoint, EndpointOptions};
pub use event_hub::{EventHub, EventSource};
pub use orderer::Orderer;
pub use peer::{Endorser, Peer};
pub use submitter::{PendingCommit, TransactionSubmitter};
