use crate::ledger::WorldState;
use ledger_common::{ChaincodeResponse, KvRead, KvWrite, ReadWriteSet, TransientMap, Version};
use std::collections::BTreeMap;

/// Smart contract logic run by endorsing peers.
pub trait Chaincode: Send + Sync {
    fn invoke(&self, stub: &mut ChaincodeStub<'_>) -> ChaincodeResponse;
}

/// Execution context of one proposal. Reads hit a state snapshot and are
/// recorded with their version; writes are only buffered.
pub struct ChaincodeStub<'a> {
    state: &'a WorldState,
    function: String,
    args: Vec<String>,
    transient: &'a TransientMap,
    reads: BTreeMap<String, Option<Version>>,
    writes: BTreeMap<String, Option<Vec<u8>>>,
}

impl<'a> ChaincodeStub<'a> {
    pub fn new(
        state: &'a WorldState,
        function: &str,
        args: &[String],
        transient: &'a TransientMap,
    ) -> Self {
        ChaincodeStub {
            state,
            function: function.to_string(),
            args: args.to_vec(),
            transient,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
        }
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn transient(&self, key: &str) -> Option<&[u8]> {
        self.transient.get(key).map(Vec::as_slice)
    }

    /// Own buffered writes win over the snapshot and are not recorded as reads.
    pub fn get_state(&mut self, key: &str) -> Option<Vec<u8>> {
        if let Some(pending) = self.writes.get(key) {
            return pending.clone();
        }
        let entry = self.state.get(key);
        self.reads
            .entry(key.to_string())
            .or_insert_with(|| entry.map(|e| e.version));
        entry.map(|e| e.value.clone())
    }

    pub fn put_state(&mut self, key: &str, value: Vec<u8>) {
        self.writes.insert(key.to_string(), Some(value));
    }

    pub fn del_state(&mut self, key: &str) {
        self.writes.insert(key.to_string(), None);
    }

    pub fn into_rwset(self) -> ReadWriteSet {
        ReadWriteSet {
            reads: self
                .reads
                .into_iter()
                .map(|(key, version)| KvRead { key, version })
                .collect(),
            writes: self
                .writes
                .into_iter()
                .map(|(key, value)| KvWrite { key, value })
                .collect(),
        }
    }
}

/// Asset transfer between named accounts holding integer balances.
///
/// Accepts the operation either as the function name or, with function
/// `invoke`, as the first argument.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExampleChaincode;

impl ExampleChaincode {
    fn init(stub: &mut ChaincodeStub<'_>, args: &[String]) -> ChaincodeResponse {
        if args.is_empty() || args.len() % 2 != 0 {
            return ChaincodeResponse::error(
                "Incorrect number of arguments. Expecting key/value pairs",
            );
        }
        for pair in args.chunks(2) {
            if pair[1].parse::<i64>().is_err() {
                return ChaincodeResponse::error(format!("Expecting integer value for {}", pair[0]));
            }
            stub.put_state(&pair[0], pair[1].clone().into_bytes());
        }
        ChaincodeResponse::ok(Vec::new())
    }

    fn transfer(stub: &mut ChaincodeStub<'_>, args: &[String]) -> ChaincodeResponse {
        let [from, to, amount] = args else {
            return ChaincodeResponse::error("Incorrect number of arguments. Expecting 3");
        };
        let amount = match amount.parse::<i64>() {
            Ok(amount) if amount >= 0 => amount,
            _ => {
                return ChaincodeResponse::error(
                    "Invalid transaction amount, expecting a non negative integer",
                )
            }
        };
        let from_balance = match Self::balance(stub, from) {
            Ok(balance) => balance,
            Err(response) => return response,
        };
        let to_balance = match Self::balance(stub, to) {
            Ok(balance) => balance,
            Err(response) => return response,
        };
        if from_balance < amount {
            return ChaincodeResponse::error(format!("Insufficient funds in {}", from));
        }
        stub.put_state(from, (from_balance - amount).to_string().into_bytes());
        stub.put_state(to, (to_balance + amount).to_string().into_bytes());
        let result = stub.transient("result").map(<[u8]>::to_vec).unwrap_or_default();
        ChaincodeResponse::ok(result)
    }

    fn query(stub: &mut ChaincodeStub<'_>, args: &[String]) -> ChaincodeResponse {
        let [key] = args else {
            return ChaincodeResponse::error(
                "Incorrect number of arguments. Expecting name of the person to query",
            );
        };
        match stub.get_state(key) {
            Some(value) => ChaincodeResponse::ok(value),
            None => ChaincodeResponse::error(format!("Nil amount for {}", key)),
        }
    }

    fn delete(stub: &mut ChaincodeStub<'_>, args: &[String]) -> ChaincodeResponse {
        let [key] = args else {
            return ChaincodeResponse::error("Incorrect number of arguments. Expecting 1");
        };
        stub.del_state(key);
        ChaincodeResponse::ok(Vec::new())
    }

    fn balance(stub: &mut ChaincodeStub<'_>, key: &str) -> Result<i64, ChaincodeResponse> {
        let value = stub
            .get_state(key)
            .ok_or_else(|| ChaincodeResponse::error(format!("Entity {} not found", key)))?;
        String::from_utf8_lossy(&value)
            .parse()
            .map_err(|_| ChaincodeResponse::error(format!("Corrupt balance for {}", key)))
    }
}

impl Chaincode for ExampleChaincode {
    fn invoke(&self, stub: &mut ChaincodeStub<'_>) -> ChaincodeResponse {
        let (op, args) = match (stub.function(), stub.args()) {
            ("invoke", [op, rest @ ..]) => (op.clone(), rest.to_vec()),
            ("invoke", []) => return ChaincodeResponse::error("Missing operation argument"),
            (function, args) => (function.to_string(), args.to_vec()),
        };
        match op.as_str() {
            "init" => Self::init(stub, &args),
            "move" => Self::transfer(stub, &args),
            "query" => Self::query(stub, &args),
            "delete" => Self::delete(stub, &args),
            other => ChaincodeResponse::error(format!("Unknown operation {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> WorldState {
        WorldState::genesis(&[
            ("a".to_string(), "500".to_string()),
            ("b".to_string(), "200".to_string()),
        ])
    }

    fn run(state: &WorldState, function: &str, args: &[&str]) -> (ChaincodeResponse, ReadWriteSet) {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let transient = TransientMap::new();
        let mut stub = ChaincodeStub::new(state, function, &args, &transient);
        let response = ExampleChaincode.invoke(&mut stub);
        (response, stub.into_rwset())
    }

    #[test]
    fn move_records_versions_read_and_new_balances() {
        let state = state();
        let (response, rwset) = run(&state, "invoke", &["move", "a", "b", "100"]);
        assert!(response.is_ok());
        assert_eq!(
            rwset.reads,
            vec![
                KvRead { key: "a".into(), version: Some(Version { block: 0, tx: 0 }) },
                KvRead { key: "b".into(), version: Some(Version { block: 0, tx: 0 }) },
            ]
        );
        assert_eq!(
            rwset.writes,
            vec![
                KvWrite { key: "a".into(), value: Some(b"400".to_vec()) },
                KvWrite { key: "b".into(), value: Some(b"300".to_vec()) },
            ]
        );
    }

    #[test]
    fn move_returns_transient_result() {
        let state = state();
        let args = vec!["a".to_string(), "b".to_string(), "1".to_string()];
        let mut transient = TransientMap::new();
        transient.insert("result".to_string(), b":)".to_vec());
        let mut stub = ChaincodeStub::new(&state, "move", &args, &transient);
        assert_eq!(ExampleChaincode.invoke(&mut stub).payload, b":)".to_vec());
    }

    #[test]
    fn query_reads_without_writing() {
        let state = state();
        let (response, rwset) = run(&state, "query", &["b"]);
        assert_eq!(response.payload, b"200".to_vec());
        assert_eq!(rwset.reads.len(), 1);
        assert!(rwset.writes.is_empty());
    }

    #[test]
    fn bad_arguments_are_errors() {
        let state = state();
        assert!(!run(&state, "move", &["a", "b"]).0.is_ok());
        assert!(!run(&state, "move", &["a", "b", "-5"]).0.is_ok());
        assert!(!run(&state, "move", &["a", "b", "1000"]).0.is_ok());
        assert!(!run(&state, "move", &["a", "zz", "1"]).0.is_ok());
        assert!(!run(&state, "query", &["nobody"]).0.is_ok());
        assert!(!run(&state, "invoke", &[]).0.is_ok());
        assert!(!run(&state, "burn", &["a"]).0.is_ok());
    }

    #[test]
    fn delete_then_read_sees_the_deletion() {
        let state = state();
        let args = vec!["a".to_string()];
        let transient = TransientMap::new();
        let mut stub = ChaincodeStub::new(&state, "delete", &args, &transient);
        assert!(ExampleChaincode.invoke(&mut stub).is_ok());
        assert_eq!(stub.get_state("a"), None);
        assert_eq!(
            stub.into_rwset().writes,
            vec![KvWrite { key: "a".into(), value: None }]
        );
    }
}
