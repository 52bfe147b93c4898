//! Uniqueness providers for the vigil notarisation subsystem.
//!
//! The contract is small: given a transaction id and its inputs, record the
//! first spend of every input or report exactly which transaction got there
//! first. Two implementations honour it:
//!
//! - [`PersistentUniquenessProvider`]: one node, one sqlite-backed
//!   append-only table, a mutex around each read-then-write commit.
//! - [`BftUniquenessProvider`]: `3f + 1` replicas agree on command order,
//!   apply the same state machine independently, and answer with partial
//!   Schnorr signatures that aggregate into the notary's signature once
//!   `2f + 1` of them match.
//!
//! The threshold-signature primitives, the deterministic replica command
//! codec, the trusted-clock abstraction and the commit-event queue live
//! here too.

pub mod cluster;
pub mod codec;
pub mod events;
pub mod persistent;
pub mod replica;
pub mod threshold;
pub mod time;
pub mod types;

pub use cluster::{
    BftUniquenessProvider, ClusterConfig, ClusterConfigError, ClusterReplica, Coordinator,
    LyingReplica, ReplicaAddress, ReplicaTransport, VoteLog,
};
pub use codec::{CommandCodecError, CommitCommand};
pub use events::{CommitEvent, CommitEventQueue};
pub use persistent::PersistentUniquenessProvider;
pub use replica::{Replica, ReplicaError, ReplicaOutcome, ReplicaReply};
pub use threshold::{
    deal_shares, lagrange_coefficients, verify_aggregate, verify_partial, verify_signature,
    Contribution, SchnorrKeyPair, SecretShare, ThresholdError, ThresholdSignature,
    CONTRIBUTION_BYTES,
};
pub use time::{Clock, ManualClock, SystemClock};
pub use types::{CommitProof, Conflict, ConsumingTx, Party, UniquenessError, UniquenessProvider};
