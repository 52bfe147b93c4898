//! Core types of the uniqueness contract.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use vigil_merkle::{PublicKey, SecureHash, StateRef, TimeWindow};

/// The party asking for a commit. Recorded as evidence alongside each spent
/// input; never part of the conflict decision.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    pub key: PublicKey,
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Record of the first spend of a state: which transaction consumed it, at
/// which input position, on whose request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumingTx {
    pub tx_id: SecureHash,
    pub input_index: u32,
    pub requester: Party,
}

/// Inputs already consumed by a *different* transaction, keyed by the
/// contested state. Ordered so the map serializes deterministically.
pub type Conflict = BTreeMap<StateRef, ConsumingTx>;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum UniquenessError {
    /// One or more inputs were spent by another transaction. Nothing was
    /// recorded.
    #[error("{} input(s) already consumed", .0.len())]
    Conflict(Conflict),

    /// A replica quorum judged the request outside its time window. Only
    /// the replicated provider produces this; a single-node notary checks
    /// the clock before it ever calls commit.
    #[error("request at {at} outside time window {window:?}")]
    TimeWindowInvalid { at: u64, window: TimeWindow },

    /// Storage failed after bounded retries.
    #[error("uniqueness storage unavailable: {0}")]
    Storage(String),

    /// The replicated cluster could not reach a decision this round.
    #[error("no cluster decision: {0}")]
    ClusterUnavailable(String),
}

/// What a successful commit hands back to the caller.
#[derive(Clone, Debug, PartialEq)]
pub enum CommitProof {
    /// The inputs are recorded; the caller signs the transaction itself.
    Recorded,
    /// Replicated commit: the cluster already produced an aggregated
    /// threshold signature over the transaction id.
    Signed(crate::threshold::ThresholdSignature),
}

/// At-most-once consumption of ledger states.
///
/// `commit` is atomic (a conflict records nothing) and idempotent: retrying
/// with the same `tx_id` succeeds, retrying the same inputs under a
/// different `tx_id` reports the full conflict map.
pub trait UniquenessProvider: Send + Sync {
    fn commit(
        &self,
        inputs: &[StateRef],
        tx_id: SecureHash,
        requester: &Party,
        time_window: Option<TimeWindow>,
    ) -> Result<CommitProof, UniquenessError>;
}
