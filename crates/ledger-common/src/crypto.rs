use crate::errors::LedgerError;
use crate::network::encode;
use crate::types::{
    ChaincodeId, Proposal, SignedProposal, SubmissionEnvelope, TransactionId, TransientMap,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey as PublicKey};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct Crypto {
    public_key: PublicKey,
    signing_key: SigningKey,
}

impl Crypto {
    pub fn from_secret_key(secret_key: &[u8; 32]) -> Result<Self, LedgerError> {
        let signing_key = SigningKey::from_bytes(secret_key);
        let public_key = signing_key.verifying_key();
        Ok(Crypto {
            public_key,
            signing_key,
        })
    }

    /// Parses a 64 character hex seed.
    pub fn from_hex_seed(seed: &str) -> Result<Self, LedgerError> {
        let bytes = hex::decode(seed).map_err(|e| LedgerError::ConfigError(e.to_string()))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|_| {
            LedgerError::ConfigError("Seed must be 32 bytes (64 hex characters)".to_string())
        })?;
        Self::from_secret_key(&seed)
    }

    pub fn generate() -> Self {
        let signing_key = SigningKey::from_bytes(&rand::random::<[u8; 32]>());
        Crypto {
            public_key: signing_key.verifying_key(),
            signing_key,
        }
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key.to_bytes().to_vec()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn pubkey_from_bytes(bytes: &[u8]) -> Result<PublicKey, LedgerError> {
        let bytes: &[u8; 32] = bytes.try_into().map_err(|_| {
            LedgerError::SerializationError("Failed to deserialize public key".to_string())
        })?;
        PublicKey::from_bytes(bytes).map_err(|_| {
            LedgerError::SerializationError("Failed to deserialize public key".to_string())
        })
    }

    pub fn verify(
        message: &[u8],
        signature: &Signature,
        public_key: &PublicKey,
    ) -> Result<(), LedgerError> {
        public_key
            .verify(message, signature)
            .map_err(|_| LedgerError::InvalidSignature)
    }

    /// Verifies a signature when both the key and the signature come off the wire.
    pub fn verify_raw(
        message: &[u8],
        signature: &[u8],
        public_key: &[u8],
    ) -> Result<(), LedgerError> {
        let public_key = Self::pubkey_from_bytes(public_key)?;
        let signature =
            Signature::from_slice(signature).map_err(|_| LedgerError::InvalidSignature)?;
        Self::verify(message, &signature, &public_key)
    }

    pub fn transaction_id(nonce: &[u8], creator: &[u8]) -> TransactionId {
        let mut hasher = Sha256::new();
        hasher.update(nonce);
        hasher.update(creator);
        hex::encode(hasher.finalize())
    }

    pub fn generate_proposal(
        &self,
        chaincode: ChaincodeId,
        function: impl Into<String>,
        args: Vec<String>,
        transient: TransientMap,
    ) -> Proposal {
        let nonce = rand::random::<[u8; 24]>().to_vec();
        let creator = self.public_key_bytes();
        Proposal {
            tx_id: Self::transaction_id(&nonce, &creator),
            chaincode,
            function: function.into(),
            args,
            transient,
            creator,
            nonce,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }

    pub fn sign_proposal(&self, proposal: Proposal) -> Result<SignedProposal, LedgerError> {
        let signature = self.sign(&encode(&proposal)?).to_bytes().to_vec();
        Ok(SignedProposal {
            proposal,
            signature,
        })
    }

    pub fn verify_proposal(signed: &SignedProposal) -> Result<(), LedgerError> {
        let proposal = &signed.proposal;
        if Self::transaction_id(&proposal.nonce, &proposal.creator) != proposal.tx_id {
            return Err(LedgerError::ProtocolViolation(format!(
                "Transaction id {} does not match nonce and creator",
                proposal.tx_id
            )));
        }
        Self::verify_raw(&encode(proposal)?, &signed.signature, &proposal.creator)
    }

    pub fn envelope_signing_bytes(
        tx_id: &TransactionId,
        payload: &[u8],
    ) -> Result<Vec<u8>, LedgerError> {
        encode(&(tx_id, payload))
    }

    pub fn verify_envelope(envelope: &SubmissionEnvelope) -> Result<(), LedgerError> {
        let message = Self::envelope_signing_bytes(&envelope.tx_id, &envelope.payload)?;
        Self::verify_raw(&message, &envelope.signature, &envelope.creator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chaincode() -> ChaincodeId {
        ChaincodeId {
            name: "example_cc".to_string(),
            version: "1".to_string(),
        }
    }

    #[test]
    fn proposal_tx_id_is_bound_to_nonce_and_creator() {
        let crypto = Crypto::from_secret_key(&[7u8; 32]).unwrap();
        let proposal = crypto.generate_proposal(chaincode(), "invoke", vec![], TransientMap::new());
        assert_eq!(proposal.tx_id.len(), 64);
        assert_eq!(
            proposal.tx_id,
            Crypto::transaction_id(&proposal.nonce, &crypto.public_key_bytes())
        );

        let other = crypto.generate_proposal(chaincode(), "invoke", vec![], TransientMap::new());
        assert_ne!(proposal.tx_id, other.tx_id);
    }

    #[test]
    fn signed_proposal_verifies_and_detects_tampering() {
        let crypto = Crypto::generate();
        let proposal = crypto.generate_proposal(
            chaincode(),
            "invoke",
            vec!["move".into(), "a".into(), "b".into(), "100".into()],
            TransientMap::new(),
        );
        let mut signed = crypto.sign_proposal(proposal).unwrap();
        assert!(Crypto::verify_proposal(&signed).is_ok());

        signed.proposal.args[3] = "1000".to_string();
        assert_eq!(
            Crypto::verify_proposal(&signed),
            Err(LedgerError::InvalidSignature)
        );
    }

    #[test]
    fn hex_seed_must_be_32_bytes() {
        assert!(Crypto::from_hex_seed(&"00".repeat(32)).is_ok());
        assert!(matches!(
            Crypto::from_hex_seed("abcd"),
            Err(LedgerError::ConfigError(_))
        ));
    }
}
