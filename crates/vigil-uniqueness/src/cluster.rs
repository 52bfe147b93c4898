//! Replicated uniqueness: coordination and client-side aggregation.
//!
//! A cluster of `n = 3f + 1` replicas tolerates `f` Byzantine members. The
//! coordinator sequences command bytes and collects echo votes on the
//! command digest; once `2f + 1` replicas agree on the ordering the command
//! is delivered everywhere and each replica answers with a partial
//! signature or a typed rejection. The client keeps only partial signatures
//! that verify against the published share keys, so a lying replica's bytes
//! never poison the aggregate, and trusts a rejection only once `f + 1`
//! replicas report the same one.

use crate::codec::CommitCommand;
use crate::replica::{Replica, ReplicaError, ReplicaOutcome, ReplicaReply};
use crate::threshold::{verify_partial, Contribution, SecretShare, ThresholdSignature};
use crate::types::{CommitProof, Conflict, Party, UniquenessError, UniquenessProvider};
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use vigil_merkle::{PublicKey, SecureHash, StateRef, TimeWindow};

/// Statically configured replica endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaAddress {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for ReplicaAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterConfigError {
    #[error("cluster size {0} is not 3f + 1 for any f >= 1")]
    BadSize(usize),
    #[error("expected {expected} replica addresses, got {got}")]
    AddressCountMismatch { expected: usize, got: usize },
    #[error("invalid group or share key encoding")]
    BadKey,
}

/// Static description of a replica cluster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub addresses: Vec<ReplicaAddress>,
    pub group_key: PublicKey,
    /// Compressed public key shares, entry `i` belonging to share index
    /// `i + 1`.
    pub public_shares: Vec<PublicKey>,
}

impl ClusterConfig {
    pub fn new(
        addresses: Vec<ReplicaAddress>,
        group_key: PublicKey,
        public_shares: Vec<PublicKey>,
    ) -> Result<Self, ClusterConfigError> {
        let n = public_shares.len();
        if n < 4 || (n - 1) % 3 != 0 {
            return Err(ClusterConfigError::BadSize(n));
        }
        if addresses.len() != n {
            return Err(ClusterConfigError::AddressCountMismatch {
                expected: n,
                got: addresses.len(),
            });
        }
        Ok(ClusterConfig {
            addresses,
            group_key,
            public_shares,
        })
    }

    pub fn size(&self) -> usize {
        self.public_shares.len()
    }

    /// Tolerated Byzantine replicas.
    pub fn f(&self) -> usize {
        (self.size() - 1) / 3
    }

    /// Votes and matching signatures required: `2f + 1`.
    pub fn quorum(&self) -> usize {
        2 * self.f() + 1
    }
}

/// One cluster member as the coordinator sees it: an ordering voter plus a
/// command executor. Remote members answer `None` when unreachable.
pub trait ClusterReplica: Send + Sync {
    fn index(&self) -> u32;
    fn vote(&self, seq: u64, digest: SecureHash) -> Option<SecureHash>;
    fn deliver(&self, seq: u64, command_bytes: &[u8]) -> Option<ReplicaReply>;
}

impl ClusterReplica for Replica {
    fn index(&self) -> u32 {
        Replica::index(self)
    }

    fn vote(&self, _seq: u64, digest: SecureHash) -> Option<SecureHash> {
        Some(digest)
    }

    fn deliver(&self, _seq: u64, command_bytes: &[u8]) -> Option<ReplicaReply> {
        Some(self.process(command_bytes))
    }
}

/// Deliberately Byzantine member for fault-injection tests: votes for a
/// digest of its own invention and signs with a key it made up.
pub struct LyingReplica {
    index: u32,
}

impl LyingReplica {
    pub fn new(index: u32) -> Self {
        LyingReplica { index }
    }
}

impl ClusterReplica for LyingReplica {
    fn index(&self) -> u32 {
        self.index
    }

    fn vote(&self, seq: u64, _digest: SecureHash) -> Option<SecureHash> {
        Some(SecureHash::hash(&seq.to_le_bytes()))
    }

    fn deliver(&self, _seq: u64, command_bytes: &[u8]) -> Option<ReplicaReply> {
        let forged = SecretShare::new(self.index, Scalar::from(41u32));
        let payload = SecureHash::hash(command_bytes);
        Some(ReplicaReply {
            index: self.index,
            outcome: ReplicaOutcome::Signature(
                forged.contribute(&mut rand::rngs::OsRng, payload.as_bytes()),
            ),
        })
    }
}

/// Duplicate-free vote tally for one `(seq, digest)` pair.
pub struct VoteLog {
    quorum: usize,
    votes: HashMap<(u64, SecureHash), BTreeSet<u32>>,
}

impl VoteLog {
    pub fn new(quorum: usize) -> Self {
        VoteLog {
            quorum,
            votes: HashMap::new(),
        }
    }

    /// Record a vote; true once the pair has reached quorum.
    pub fn add_vote(&mut self, seq: u64, digest: SecureHash, replica: u32) -> bool {
        let entry = self.votes.entry((seq, digest)).or_default();
        entry.insert(replica);
        entry.len() >= self.quorum
    }
}

/// Hands command bytes to the cluster and returns every reply received.
pub trait ReplicaTransport: Send + Sync {
    fn submit(&self, command_bytes: &[u8]) -> Result<Vec<ReplicaReply>, UniquenessError>;
}

/// Sequences commands and runs the echo-vote round over a replica set.
pub struct Coordinator {
    replicas: Vec<Box<dyn ClusterReplica>>,
    quorum: usize,
    next_seq: AtomicU64,
}

impl Coordinator {
    pub fn new(replicas: Vec<Box<dyn ClusterReplica>>, quorum: usize) -> Self {
        Coordinator {
            replicas,
            quorum,
            next_seq: AtomicU64::new(0),
        }
    }
}

impl ReplicaTransport for Coordinator {
    fn submit(&self, command_bytes: &[u8]) -> Result<Vec<ReplicaReply>, UniquenessError> {
        let digest = SecureHash::hash(command_bytes);
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);

        let mut log = VoteLog::new(self.quorum);
        let mut agreed = false;
        for replica in &self.replicas {
            match replica.vote(seq, digest) {
                Some(voted) if voted == digest => {
                    agreed |= log.add_vote(seq, digest, replica.index());
                }
                Some(other) => {
                    tracing::warn!(replica = replica.index(), seq, voted = %other, "divergent vote");
                }
                None => {
                    tracing::warn!(replica = replica.index(), seq, "replica unreachable for vote");
                }
            }
        }
        if !agreed {
            return Err(UniquenessError::ClusterUnavailable(format!(
                "ordering round {} did not reach quorum",
                seq
            )));
        }

        let replies: Vec<ReplicaReply> = self
            .replicas
            .iter()
            .filter_map(|replica| replica.deliver(seq, command_bytes))
            .collect();
        Ok(replies)
    }
}

/// Client half of the replicated provider: submits, filters Byzantine
/// replies, aggregates a quorum of partial signatures.
pub struct BftUniquenessProvider<T: ReplicaTransport> {
    transport: T,
    config: ClusterConfig,
    share_points: Vec<RistrettoPoint>,
}

impl<T: ReplicaTransport> BftUniquenessProvider<T> {
    pub fn new(config: ClusterConfig, transport: T) -> Result<Self, ClusterConfigError> {
        let share_points = config
            .public_shares
            .iter()
            .map(|bytes| {
                CompressedRistretto(*bytes)
                    .decompress()
                    .ok_or(ClusterConfigError::BadKey)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BftUniquenessProvider {
            transport,
            config,
            share_points,
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    fn valid_contribution(&self, reply_index: u32, contribution: &Contribution, payload: &[u8]) -> bool {
        if contribution.index != reply_index {
            return false;
        }
        let position = contribution.index as usize;
        if position == 0 || position > self.share_points.len() {
            return false;
        }
        verify_partial(&self.share_points[position - 1], contribution, payload)
    }
}

impl<T: ReplicaTransport> UniquenessProvider for BftUniquenessProvider<T> {
    fn commit(
        &self,
        inputs: &[StateRef],
        tx_id: SecureHash,
        requester: &Party,
        time_window: Option<TimeWindow>,
    ) -> Result<CommitProof, UniquenessError> {
        let command = CommitCommand {
            tx_id,
            inputs: inputs.to_vec(),
            requester: requester.clone(),
            time_window,
        };
        let replies = self.transport.submit(&command.encode())?;

        let payload = tx_id.as_bytes();
        let quorum = self.config.quorum();
        let trusted = self.config.f() + 1;

        let mut contributions: Vec<Contribution> = Vec::new();
        let mut conflicts: HashMap<Vec<u8>, (usize, Conflict)> = HashMap::new();
        let mut window_rejections: usize = 0;
        let mut last_window_rejection: Option<(u64, TimeWindow)> = None;

        for reply in replies {
            match reply.outcome {
                ReplicaOutcome::Signature(contribution) => {
                    if self.valid_contribution(reply.index, &contribution, payload) {
                        if contributions.iter().all(|c| c.index != contribution.index) {
                            contributions.push(contribution);
                        }
                    } else {
                        tracing::warn!(replica = reply.index, %tx_id, "discarding invalid partial signature");
                    }
                }
                ReplicaOutcome::Rejected(ReplicaError::Conflict(conflict)) => {
                    let key = bincode::serialize(&conflict)
                        .map_err(|e| UniquenessError::Storage(e.to_string()))?;
                    let entry = conflicts.entry(key).or_insert((0, conflict));
                    entry.0 += 1;
                }
                ReplicaOutcome::Rejected(ReplicaError::TimeWindowInvalid { at, window }) => {
                    window_rejections += 1;
                    last_window_rejection = Some((at, window));
                }
                ReplicaOutcome::Rejected(error) => {
                    tracing::warn!(replica = reply.index, %tx_id, %error, "replica rejection");
                }
            }
        }

        if contributions.len() >= quorum {
            contributions.truncate(quorum);
            let signature = ThresholdSignature {
                group_key: self.config.group_key,
                threshold: quorum as u32,
                contributions,
            };
            // every partial verified individually, so this cannot fail for
            // an honestly dealt key set
            match signature.verify(payload) {
                Ok(true) => return Ok(CommitProof::Signed(signature)),
                _ => {
                    return Err(UniquenessError::ClusterUnavailable(
                        "aggregate signature failed verification".into(),
                    ))
                }
            }
        }

        if let Some((_, (count, conflict))) = conflicts
            .into_iter()
            .max_by_key(|(_, (count, _))| *count)
        {
            if count >= trusted {
                return Err(UniquenessError::Conflict(conflict));
            }
        }
        if window_rejections >= trusted {
            if let Some((at, window)) = last_window_rejection {
                return Err(UniquenessError::TimeWindowInvalid { at, window });
            }
        }

        Err(UniquenessError::ClusterUnavailable(
            "no signature quorum and no trusted rejection".into(),
        ))
    }
}
