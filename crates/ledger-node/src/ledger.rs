use ledger_common::{
    decode, encode, Block, CommitEvent, Crypto, DeliverStatus, KvWrite, LedgerError,
    ProposalResponsePayload, ReadWriteSet, SeekPosition, SubmissionEnvelope, TransactionId,
    TransactionRecord, ValidationCode, Version,
};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    pub value: Vec<u8>,
    pub version: Version,
}

/// Current value of every key together with the version that wrote it.
#[derive(Debug, Clone, Default)]
pub struct WorldState {
    entries: BTreeMap<String, VersionedValue>,
}

impl WorldState {
    /// Genesis values carry version `(0, 0)`.
    pub fn genesis(values: &[(String, String)]) -> Self {
        let entries = values
            .iter()
            .map(|(key, value)| {
                (
                    key.clone(),
                    VersionedValue {
                        value: value.clone().into_bytes(),
                        version: Version { block: 0, tx: 0 },
                    },
                )
            })
            .collect();
        WorldState { entries }
    }

    pub fn get(&self, key: &str) -> Option<&VersionedValue> {
        self.entries.get(key)
    }

    fn version(&self, key: &str) -> Option<Version> {
        self.entries.get(key).map(|e| e.version)
    }

    fn apply(&mut self, writes: &[KvWrite], version: Version) {
        for write in writes {
            match &write.value {
                Some(value) => {
                    self.entries.insert(
                        write.key.clone(),
                        VersionedValue {
                            value: value.clone(),
                            version,
                        },
                    );
                }
                None => {
                    self.entries.remove(&write.key);
                }
            }
        }
    }
}

/// Block store and world state of the development network.
pub struct Ledger {
    state: WorldState,
    blocks: Vec<Block>,
    committed: HashSet<TransactionId>,
    endorsers: HashSet<Vec<u8>>,
}

impl Ledger {
    /// Creates the ledger with an empty genesis block. Only signatures of
    /// `endorsers` count towards the endorsement policy.
    pub fn new(
        genesis: &[(String, String)],
        endorsers: HashSet<Vec<u8>>,
    ) -> Result<Self, LedgerError> {
        let genesis_block = Self::make_block(0, Vec::new(), Vec::new())?;
        Ok(Ledger {
            state: WorldState::genesis(genesis),
            blocks: vec![genesis_block],
            committed: HashSet::new(),
            endorsers,
        })
    }

    pub fn state(&self) -> &WorldState {
        &self.state
    }

    pub fn height(&self) -> u64 {
        self.blocks.len() as u64
    }

    /// Decides the validation code of an envelope against the current state.
    pub fn validate(
        &self,
        envelope: &SubmissionEnvelope,
    ) -> (ValidationCode, Option<ReadWriteSet>) {
        if self.committed.contains(&envelope.tx_id) {
            return (ValidationCode::DuplicateTxId, None);
        }
        if Crypto::verify_envelope(envelope).is_err() {
            return (ValidationCode::BadCreatorSignature, None);
        }
        let payload: ProposalResponsePayload = match decode(&envelope.payload) {
            Ok(payload) => payload,
            Err(_) => return (ValidationCode::BadPayload, None),
        };
        if payload.tx_id != envelope.tx_id {
            return (ValidationCode::BadPayload, None);
        }
        if envelope.endorsements.is_empty()
            || envelope.endorsements.iter().any(|e| {
                !self.endorsers.contains(&e.endorser)
                    || Crypto::verify_raw(&envelope.payload, &e.signature, &e.endorser).is_err()
            })
        {
            return (ValidationCode::EndorsementPolicyFailure, None);
        }
        if payload
            .rwset
            .reads
            .iter()
            .any(|read| self.state.version(&read.key) != read.version)
        {
            return (ValidationCode::MvccReadConflict, None);
        }
        (ValidationCode::Valid, Some(payload.rwset))
    }

    /// Validates the envelope and cuts a block holding just this transaction.
    /// Invalid transactions are recorded too, without touching the state.
    pub fn commit(&mut self, envelope: &SubmissionEnvelope) -> Result<CommitEvent, LedgerError> {
        let (validation_code, rwset) = self.validate(envelope);
        let number = self.height();
        let previous_hash = self
            .blocks
            .last()
            .map(Self::header_hash)
            .transpose()?
            .unwrap_or_default();
        let block = Self::make_block(
            number,
            previous_hash,
            vec![TransactionRecord {
                tx_id: envelope.tx_id.clone(),
                validation_code,
            }],
        )?;

        if let Some(rwset) = rwset {
            self.state
                .apply(&rwset.writes, Version { block: number, tx: 0 });
        }
        if validation_code != ValidationCode::DuplicateTxId {
            self.committed.insert(envelope.tx_id.clone());
        }
        self.blocks.push(block);
        info!(
            "Committed block {} with {} as {:?}",
            number, envelope.tx_id, validation_code
        );
        Ok(CommitEvent {
            tx_id: envelope.tx_id.clone(),
            validation_code,
            block_number: number,
        })
    }

    /// Blocks from `start` to `stop`, both inclusive.
    pub fn blocks(
        &self,
        start: SeekPosition,
        stop: SeekPosition,
    ) -> Result<Vec<Block>, DeliverStatus> {
        let newest = self.height() - 1;
        let resolve = |position| match position {
            SeekPosition::Oldest => 0,
            SeekPosition::Newest => newest,
            SeekPosition::Specified(number) => number,
        };
        let (start, stop) = (resolve(start), resolve(stop));
        if start > stop {
            return Err(DeliverStatus::BadRequest);
        }
        if stop > newest {
            return Err(DeliverStatus::NotFound);
        }
        debug!("Delivering blocks {}..={}", start, stop);
        Ok(self.blocks[start as usize..=stop as usize].to_vec())
    }

    fn make_block(
        number: u64,
        previous_hash: Vec<u8>,
        transactions: Vec<TransactionRecord>,
    ) -> Result<Block, LedgerError> {
        Ok(Block {
            number,
            previous_hash,
            data_hash: Sha256::digest(encode(&transactions)?).to_vec(),
            transactions,
        })
    }

    pub fn header_hash(block: &Block) -> Result<Vec<u8>, LedgerError> {
        let header = encode(&(block.number, &block.previous_hash, &block.data_hash))?;
        Ok(Sha256::digest(header).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_common::{ChaincodeId, ChaincodeResponse, Endorsement, KvRead};

    struct Fixture {
        client: Crypto,
        peers: Vec<Crypto>,
        ledger: Ledger,
    }

    fn fixture() -> Fixture {
        let peers = vec![Crypto::generate(), Crypto::generate()];
        let ledger = Ledger::new(
            &[("a".to_string(), "500".to_string()), ("b".to_string(), "200".to_string())],
            peers.iter().map(Crypto::public_key_bytes).collect(),
        )
        .unwrap();
        Fixture {
            client: Crypto::generate(),
            peers,
            ledger,
        }
    }

    fn move_rwset(version: Option<Version>) -> ReadWriteSet {
        ReadWriteSet {
            reads: vec![
                KvRead { key: "a".into(), version },
                KvRead { key: "b".into(), version },
            ],
            writes: vec![
                KvWrite { key: "a".into(), value: Some(b"400".to_vec()) },
                KvWrite { key: "b".into(), value: Some(b"300".to_vec()) },
            ],
        }
    }

    impl Fixture {
        fn envelope(
            &self,
            tx_id: &str,
            rwset: ReadWriteSet,
            endorsers: &[&Crypto],
        ) -> SubmissionEnvelope {
            let payload = encode(&ProposalResponsePayload {
                tx_id: tx_id.to_string(),
                chaincode: ChaincodeId {
                    name: "example_cc".into(),
                    version: "1".into(),
                },
                rwset,
                response: ChaincodeResponse::ok(vec![]),
            })
            .unwrap();
            let signing = Crypto::envelope_signing_bytes(&tx_id.to_string(), &payload).unwrap();
            SubmissionEnvelope {
                tx_id: tx_id.to_string(),
                creator: self.client.public_key_bytes(),
                signature: self.client.sign(&signing).to_bytes().to_vec(),
                endorsements: endorsers
                    .iter()
                    .map(|peer| Endorsement {
                        endorser: peer.public_key_bytes(),
                        signature: peer.sign(&payload).to_bytes().to_vec(),
                    })
                    .collect(),
                payload,
            }
        }
    }

    #[test]
    fn valid_transaction_updates_state_and_chains_block() {
        let mut f = fixture();
        let genesis = Some(Version { block: 0, tx: 0 });
        let envelope = f.envelope("tx1", move_rwset(genesis), &[&f.peers[0], &f.peers[1]]);

        let event = f.ledger.commit(&envelope).unwrap();
        assert_eq!(event.validation_code, ValidationCode::Valid);
        assert_eq!(event.block_number, 1);
        assert_eq!(f.ledger.state().get("b").unwrap().value, b"300".to_vec());
        assert_eq!(f.ledger.state().get("b").unwrap().version, Version { block: 1, tx: 0 });

        let blocks = f.ledger.blocks(SeekPosition::Oldest, SeekPosition::Newest).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].previous_hash, Ledger::header_hash(&blocks[0]).unwrap());
    }

    #[test]
    fn stale_read_is_an_mvcc_conflict() {
        let mut f = fixture();
        let genesis = Some(Version { block: 0, tx: 0 });
        let first = f.envelope("tx1", move_rwset(genesis), &[&f.peers[0]]);
        let second = f.envelope("tx2", move_rwset(genesis), &[&f.peers[0]]);

        assert!(f.ledger.commit(&first).unwrap().is_valid());
        let event = f.ledger.commit(&second).unwrap();
        assert_eq!(event.validation_code, ValidationCode::MvccReadConflict);
        assert_eq!(f.ledger.state().get("a").unwrap().value, b"400".to_vec());
        assert_eq!(f.ledger.height(), 3);
    }

    #[test]
    fn duplicate_and_forged_envelopes_are_invalid() {
        let mut f = fixture();
        let genesis = Some(Version { block: 0, tx: 0 });
        let envelope = f.envelope("tx1", move_rwset(genesis), &[&f.peers[0]]);
        f.ledger.commit(&envelope).unwrap();
        assert_eq!(f.ledger.validate(&envelope).0, ValidationCode::DuplicateTxId);

        let mut forged = f.envelope("tx2", move_rwset(genesis), &[&f.peers[0]]);
        forged.signature = f.peers[0].sign(b"something else").to_bytes().to_vec();
        assert_eq!(f.ledger.validate(&forged).0, ValidationCode::BadCreatorSignature);

        let outsider = Crypto::generate();
        let unknown = f.envelope("tx3", move_rwset(genesis), &[&outsider]);
        assert_eq!(f.ledger.validate(&unknown).0, ValidationCode::EndorsementPolicyFailure);

        let unendorsed = f.envelope("tx4", move_rwset(genesis), &[]);
        assert_eq!(f.ledger.validate(&unendorsed).0, ValidationCode::EndorsementPolicyFailure);

        let mut mismatched = f.envelope("tx5", move_rwset(genesis), &[&f.peers[0]]);
        mismatched.tx_id = "tx6".to_string();
        let signing =
            Crypto::envelope_signing_bytes(&mismatched.tx_id, &mismatched.payload).unwrap();
        mismatched.signature = f.client.sign(&signing).to_bytes().to_vec();
        assert_eq!(f.ledger.validate(&mismatched).0, ValidationCode::BadPayload);
    }

    #[test]
    fn block_ranges_are_checked() {
        let f = fixture();
        assert_eq!(
            f.ledger.blocks(SeekPosition::Specified(0), SeekPosition::Specified(5)),
            Err(DeliverStatus::NotFound)
        );
        assert_eq!(
            f.ledger.blocks(SeekPosition::Newest, SeekPosition::Specified(0)).map(|b| b.len()),
            Ok(1)
        );
        let mut f = fixture();
        let genesis = Some(Version { block: 0, tx: 0 });
        let envelope = f.envelope("tx1", move_rwset(genesis), &[&f.peers[0]]);
        f.ledger.commit(&envelope).unwrap();
        assert_eq!(
            f.ledger.blocks(SeekPosition::Newest, SeekPosition::Oldest),
            Err(DeliverStatus::BadRequest)
        );
    }
}
