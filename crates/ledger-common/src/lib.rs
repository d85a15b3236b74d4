pub mod crypto;
pub mod errors;
pub mod network;
pub mod types;

pub use crypto::Crypto;
pub use errors::LedgerError;
pub use network::{decode, encode, next_message, send_message};
pub use types::*;
