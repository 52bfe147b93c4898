//! Notary-change protocol.
//!
//! Re-points states at a new notary without changing anything else. The
//! change transaction consumes each state under its current notary and
//! reissues it at the same output index with only the notary field
//! rewritten, so encumbrance references (output `i` points at output `j`
//! by index) stay valid. Every participant of every state must sign; the
//! *old* notary notarises the change.

use crate::error::NotaryError;
use crate::messages::{
    CommitRequest, CommitResponse, NotarySignature, SignedTransaction, TransactionSignature,
};
use crate::service::notarisation_view;
use thiserror::Error;
use vigil_merkle::{
    Command, MalformedTransactionError, NotaryId, PrivacySalt, PublicKey, SecureHash,
    SignatureBytes, StateRef, TransactionBuilder, TransactionState, WireTransaction,
};
use vigil_uniqueness::verify_signature;

/// Failure to replace a state's notary.
#[derive(Debug, Error)]
pub enum StateReplacementError {
    #[error("no states to reassign")]
    NoStates,

    #[error("states are spread over more than one notary")]
    MixedNotaries,

    #[error("state is already assigned to the requested notary")]
    AlreadyAssigned,

    #[error("participant {} refused to sign", hex::encode(&.0[..8]))]
    Refused(PublicKey),

    #[error(transparent)]
    Malformed(#[from] MalformedTransactionError),

    #[error("notarisation failed: {0}")]
    Notarisation(NotaryError),
}

/// Holder of participant keys, asked to approve a reassignment. `None`
/// means refusal.
pub trait ParticipantSigner: Send + Sync {
    fn sign(&self, key: &PublicKey, tx_id: &SecureHash) -> Option<SignatureBytes>;
}

/// Build the change transaction: inputs in the given order, outputs at the
/// same indices with only the notary rewritten.
pub fn build_notary_change(
    states: &[(StateRef, TransactionState)],
    new_notary: NotaryId,
    salt: PrivacySalt,
) -> Result<WireTransaction, StateReplacementError> {
    let (_, first) = states.first().ok_or(StateReplacementError::NoStates)?;
    let old_notary = first.notary;
    if states.iter().any(|(_, s)| s.notary != old_notary) {
        return Err(StateReplacementError::MixedNotaries);
    }
    if old_notary == new_notary {
        return Err(StateReplacementError::AlreadyAssigned);
    }

    let mut participants: Vec<PublicKey> = Vec::new();
    for (_, state) in states {
        for key in &state.participants {
            if !participants.contains(key) {
                participants.push(*key);
            }
        }
    }

    let mut builder = TransactionBuilder::new();
    for (state_ref, state) in states {
        builder = builder.add_input(*state_ref).add_output(TransactionState {
            notary: new_notary,
            ..state.clone()
        });
    }
    let tx = builder
        .add_command(Command {
            payload: b"notary-change".to_vec(),
            signers: participants,
        })
        .notary(old_notary)
        .build(salt)?;
    Ok(tx)
}

/// Run the whole protocol: build, collect participant signatures, have the
/// old notary notarise. Returns the signed change transaction and the
/// notary's signatures; after this the states live under the new notary at
/// `(change_tx_id, original position)`.
pub fn run_notary_change(
    states: &[(StateRef, TransactionState)],
    new_notary: NotaryId,
    signer: &dyn ParticipantSigner,
    notarise: impl FnOnce(CommitRequest) -> CommitResponse,
    salt: PrivacySalt,
) -> Result<(SignedTransaction, Vec<NotarySignature>), StateReplacementError> {
    let tx = build_notary_change(states, new_notary, salt)?;
    let id = tx.id();

    let mut signatures = Vec::new();
    for key in tx.required_signers() {
        let signature = signer
            .sign(&key, &id)
            .ok_or(StateReplacementError::Refused(key))?;
        if !verify_signature(&key, id.as_bytes(), &signature) {
            return Err(StateReplacementError::Refused(key));
        }
        signatures.push(TransactionSignature { key, signature });
    }

    tracing::info!(tx_id = %id, states = states.len(), new_notary = %new_notary, "requesting notary change");
    let response = notarise(CommitRequest::NonValidating {
        filtered_tx: notarisation_view(&tx),
    });
    match response {
        CommitResponse::Ok {
            signatures: notary_signatures,
        } => Ok((SignedTransaction { tx, signatures }, notary_signatures)),
        CommitResponse::Err(error) => Err(StateReplacementError::Notarisation(error)),
    }
}

/// Demo/test participant key holder.
pub struct KeyRing {
    keys: Vec<vigil_uniqueness::SchnorrKeyPair>,
}

impl KeyRing {
    pub fn new(keys: Vec<vigil_uniqueness::SchnorrKeyPair>) -> Self {
        KeyRing { keys }
    }
}

impl ParticipantSigner for KeyRing {
    fn sign(&self, key: &PublicKey, tx_id: &SecureHash) -> Option<SignatureBytes> {
        self.keys
            .iter()
            .find(|k| k.public_key() == *key)
            .map(|k| k.sign(tx_id.as_bytes()))
    }
}
