//! Protocol messages and signature containers.

use crate::error::NotaryError;
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use std::collections::BTreeSet;
use vigil_merkle::{
    FilteredTransaction, PublicKey, SecureHash, SignatureBytes, WireTransaction,
};
use vigil_uniqueness::{threshold, Party, ThresholdSignature};

/// A participant's Schnorr signature over a transaction id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignature {
    pub key: PublicKey,
    #[serde(with = "BigArray")]
    pub signature: SignatureBytes,
}

impl TransactionSignature {
    pub fn verify(&self, tx_id: &SecureHash) -> bool {
        threshold::verify_signature(&self.key, tx_id.as_bytes(), &self.signature)
    }
}

/// A fully assembled transaction plus the signatures collected so far.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub tx: WireTransaction,
    pub signatures: Vec<TransactionSignature>,
}

impl SignedTransaction {
    pub fn id(&self) -> SecureHash {
        self.tx.id()
    }

    /// Keys from the command signer lists without a valid signature here.
    /// The notary's own key is exempt: its signature is what the request
    /// is asking for.
    pub fn missing_signatures(&self, exempt: &PublicKey) -> Vec<PublicKey> {
        let id = self.id();
        let signed: BTreeSet<PublicKey> = self
            .signatures
            .iter()
            .filter(|s| s.verify(&id))
            .map(|s| s.key)
            .collect();
        self.tx
            .required_signers()
            .into_iter()
            .filter(|key| key != exempt && !signed.contains(key))
            .collect()
    }
}

/// The notary's proof of uniqueness-plus-timewindow over a transaction id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NotarySignature {
    /// Single-node notary key.
    Single {
        key: PublicKey,
        #[serde(with = "BigArray")]
        signature: SignatureBytes,
    },
    /// Aggregated replica quorum.
    Threshold(ThresholdSignature),
}

impl NotarySignature {
    /// The identity key this signature speaks for.
    pub fn signer(&self) -> PublicKey {
        match self {
            NotarySignature::Single { key, .. } => *key,
            NotarySignature::Threshold(t) => t.group_key,
        }
    }

    pub fn verify(&self, tx_id: &SecureHash) -> bool {
        match self {
            NotarySignature::Single { key, signature } => {
                threshold::verify_signature(key, tx_id.as_bytes(), signature)
            }
            NotarySignature::Threshold(t) => t.verify(tx_id.as_bytes()).unwrap_or(false),
        }
    }
}

/// What a client submits for notarisation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CommitRequest {
    /// Partial view: the notary sees inputs, notary and time window, never
    /// the contract contents.
    NonValidating { filtered_tx: FilteredTransaction },
    /// Full transaction for contract re-execution.
    Validating { signed_tx: SignedTransaction },
}

impl CommitRequest {
    pub fn tx_id(&self) -> SecureHash {
        match self {
            CommitRequest::NonValidating { filtered_tx } => filtered_tx.id(),
            CommitRequest::Validating { signed_tx } => signed_tx.id(),
        }
    }
}

/// A request as carried over the session transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub requester: Party,
    pub request: CommitRequest,
}

/// Exactly one of these per request: a signature list or a typed error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CommitResponse {
    Ok { signatures: Vec<NotarySignature> },
    Err(NotaryError),
}
