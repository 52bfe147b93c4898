//! Error types for transaction construction and proof verification.

use crate::hash::SecureHash;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    #[error("cannot build a merkle tree over zero leaves")]
    EmptyLeaves,
}

/// Structural violations detected while assembling a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum MalformedTransactionError {
    #[error("no component groups")]
    NoGroups,

    #[error("duplicate component group index {0}")]
    DuplicateGroupIndex(u32),

    #[error("component group {0} is present but empty")]
    EmptyGroup(u32),

    #[error("component group {0} holds at most one element, got {1}")]
    SingletonGroupOverflow(u32, usize),

    #[error("component {index} of group {group} failed to decode: {reason}")]
    InvalidComponent {
        group: u32,
        index: u32,
        reason: String,
    },

    #[error("signer list count {signers} does not match command count {commands}")]
    SignerCountMismatch { signers: usize, commands: usize },

    #[error("signer list {0} disagrees with the signers carried by command {0}")]
    SignerListMismatch(u32),
}

/// Failures while verifying a filtered transaction or a visibility claim.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FilteredTransactionError {
    #[error("filtered transaction {id} failed verification: {reason}")]
    Verification { id: SecureHash, reason: String },

    #[error("component visibility check failed for {id}: {reason}")]
    ComponentVisibility { id: SecureHash, reason: String },
}

impl FilteredTransactionError {
    pub fn verification(id: SecureHash, reason: impl Into<String>) -> Self {
        FilteredTransactionError::Verification {
            id,
            reason: reason.into(),
        }
    }

    pub fn visibility(id: SecureHash, reason: impl Into<String>) -> Self {
        FilteredTransactionError::ComponentVisibility {
            id,
            reason: reason.into(),
        }
    }
}
