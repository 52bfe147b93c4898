//! Validating-mode transaction verification.
//!
//! A validating notary re-executes contracts over the transitively resolved
//! dependency graph before committing. Contracts stay opaque predicates
//! behind [`ContractVerifier`]; dependency bytes arrive through the
//! [`TransactionResolver`] side channel. Verification results are cached by
//! transaction id: the id commits to the full contents, so a dependency
//! that verified once never needs re-execution.

use crate::error::NotaryError;
use crate::messages::SignedTransaction;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use vigil_merkle::{PublicKey, SecureHash, TransactionState, WireTransaction};

/// Side channel for fetching dependency transactions on demand.
pub trait TransactionResolver: Send + Sync {
    fn resolve(&self, tx_id: &SecureHash) -> Option<SignedTransaction>;
}

/// Simple in-memory resolver for tests and local deployments.
#[derive(Default)]
pub struct InMemoryResolver {
    txs: Mutex<HashMap<SecureHash, SignedTransaction>>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        InMemoryResolver::default()
    }

    pub fn add(&self, stx: SignedTransaction) {
        self.txs
            .lock()
            .expect("resolver lock")
            .insert(stx.id(), stx);
    }
}

impl TransactionResolver for InMemoryResolver {
    fn resolve(&self, tx_id: &SecureHash) -> Option<SignedTransaction> {
        self.txs.lock().expect("resolver lock").get(tx_id).cloned()
    }
}

/// A transaction together with the states its inputs point at.
pub struct ResolvedTransaction<'a> {
    pub tx: &'a WireTransaction,
    pub input_states: Vec<TransactionState>,
}

/// An opaque contract predicate, keyed by contract id.
pub trait ContractVerifier: Send + Sync {
    fn verify(&self, tx: &ResolvedTransaction<'_>) -> Result<(), String>;
}

/// Contract predicates known to this notary.
#[derive(Default)]
pub struct ContractRegistry {
    verifiers: HashMap<SecureHash, Arc<dyn ContractVerifier>>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        ContractRegistry::default()
    }

    pub fn register(&mut self, contract: SecureHash, verifier: Arc<dyn ContractVerifier>) {
        self.verifiers.insert(contract, verifier);
    }

    pub fn get(&self, contract: &SecureHash) -> Option<&Arc<dyn ContractVerifier>> {
        self.verifiers.get(contract)
    }
}

/// A contract that accepts everything; for flows whose point is the notary
/// interaction rather than contract logic.
pub struct AcceptAll;

impl ContractVerifier for AcceptAll {
    fn verify(&self, _tx: &ResolvedTransaction<'_>) -> Result<(), String> {
        Ok(())
    }
}

pub struct TransactionValidator {
    resolver: Arc<dyn TransactionResolver>,
    contracts: ContractRegistry,
    verified: Mutex<HashSet<SecureHash>>,
}

impl TransactionValidator {
    pub fn new(resolver: Arc<dyn TransactionResolver>, contracts: ContractRegistry) -> Self {
        TransactionValidator {
            resolver,
            contracts,
            verified: Mutex::new(HashSet::new()),
        }
    }

    /// Full validating-mode check: signature completeness, then contract
    /// re-execution over the resolved graph.
    pub fn validate(
        &self,
        stx: &SignedTransaction,
        notary_key: &PublicKey,
    ) -> Result<(), NotaryError> {
        let missing = stx.missing_signatures(notary_key);
        if !missing.is_empty() {
            return Err(NotaryError::SignaturesMissing(missing));
        }
        self.verify_contracts(&stx.tx)
            .map_err(NotaryError::TransactionInvalid)
    }

    fn verify_contracts(&self, tx: &WireTransaction) -> Result<(), String> {
        let mut input_states = Vec::with_capacity(tx.inputs().len());
        for input in tx.inputs() {
            let dep = self
                .resolver
                .resolve(&input.tx_id)
                .ok_or_else(|| format!("unresolved dependency {}", input.tx_id))?;
            self.verify_dependency(&dep)?;
            let state = dep
                .tx
                .outputs()
                .get(input.index as usize)
                .ok_or_else(|| format!("dangling reference {}", input))?
                .clone();
            input_states.push(state);
        }

        let contract_ids: BTreeSet<SecureHash> = input_states
            .iter()
            .map(|s| s.contract)
            .chain(tx.outputs().iter().map(|s| s.contract))
            .collect();

        let resolved = ResolvedTransaction { tx, input_states };
        for contract in contract_ids {
            let verifier = self
                .contracts
                .get(&contract)
                .ok_or_else(|| format!("unknown contract {}", contract))?;
            verifier
                .verify(&resolved)
                .map_err(|e| format!("contract {} rejected: {}", contract, e))?;
        }
        Ok(())
    }

    fn verify_dependency(&self, dep: &SignedTransaction) -> Result<(), String> {
        let id = dep.id();
        if self.verified.lock().expect("verified cache").contains(&id) {
            return Ok(());
        }
        self.verify_contracts(&dep.tx)?;
        self.verified.lock().expect("verified cache").insert(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vigil_merkle::{Command, NotaryId, PrivacySalt, StateRef, TransactionBuilder};

    struct CountingContract {
        calls: AtomicUsize,
        accept: bool,
    }

    impl ContractVerifier for CountingContract {
        fn verify(&self, _tx: &ResolvedTransaction<'_>) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.accept {
                Ok(())
            } else {
                Err("rejected".into())
            }
        }
    }

    fn notary() -> NotaryId {
        NotaryId([7u8; 32])
    }

    fn contract_id() -> SecureHash {
        SecureHash::hash(b"counting-contract")
    }

    fn state() -> TransactionState {
        TransactionState {
            data: vec![1],
            contract: contract_id(),
            notary: notary(),
            participants: vec![[2u8; 32]],
            encumbrance: None,
        }
    }

    fn issuance(salt: u8) -> SignedTransaction {
        let tx = TransactionBuilder::new()
            .add_output(state())
            .add_command(Command {
                payload: b"issue".to_vec(),
                signers: vec![],
            })
            .notary(notary())
            .build(PrivacySalt([salt; 32]))
            .unwrap();
        SignedTransaction {
            tx,
            signatures: vec![],
        }
    }

    fn spend_of(dep: &SignedTransaction, salt: u8) -> SignedTransaction {
        let tx = TransactionBuilder::new()
            .add_input(StateRef::new(dep.id(), 0))
            .add_output(state())
            .add_command(Command {
                payload: b"move".to_vec(),
                signers: vec![],
            })
            .notary(notary())
            .build(PrivacySalt([salt; 32]))
            .unwrap();
        SignedTransaction {
            tx,
            signatures: vec![],
        }
    }

    fn validator(accept: bool) -> (TransactionValidator, Arc<InMemoryResolver>, Arc<CountingContract>) {
        let resolver = Arc::new(InMemoryResolver::new());
        let contract = Arc::new(CountingContract {
            calls: AtomicUsize::new(0),
            accept,
        });
        let mut registry = ContractRegistry::new();
        registry.register(contract_id(), contract.clone());
        (
            TransactionValidator::new(resolver.clone(), registry),
            resolver,
            contract,
        )
    }

    #[test]
    fn test_unresolved_dependency_rejected() {
        let (validator, _resolver, _) = validator(true);
        let dep = issuance(1);
        let spend = spend_of(&dep, 2);
        let err = validator.validate(&spend, &[9u8; 32]).unwrap_err();
        assert!(matches!(err, NotaryError::TransactionInvalid(reason) if reason.contains("unresolved")));
    }

    #[test]
    fn test_contract_rejection_maps_to_invalid() {
        let (validator, resolver, _) = validator(false);
        let dep = issuance(1);
        resolver.add(dep.clone());
        let spend = spend_of(&dep, 2);
        let err = validator.validate(&spend, &[9u8; 32]).unwrap_err();
        assert!(matches!(err, NotaryError::TransactionInvalid(reason) if reason.contains("rejected")));
    }

    #[test]
    fn test_dependency_verified_once() {
        let (validator, resolver, contract) = validator(true);
        let dep = issuance(1);
        resolver.add(dep.clone());

        validator.validate(&spend_of(&dep, 2), &[9u8; 32]).unwrap();
        let first_pass = contract.calls.load(Ordering::SeqCst);

        validator.validate(&spend_of(&dep, 3), &[9u8; 32]).unwrap();
        let second_pass = contract.calls.load(Ordering::SeqCst);

        // the dependency contributes one verification total; only the new
        // top-level transaction is re-executed on the second call
        assert_eq!(second_pass - first_pass, 1);
    }
}
