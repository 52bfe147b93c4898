//! One replica of the replicated uniqueness state machine.
//!
//! A replica owns its own append-only spend table and a share of the notary
//! key. Time windows are judged against the replica's clock when a request
//! arrives, before any agreement; the uniqueness decision itself is a pure
//! function of the agreed command sequence, so every honest replica ends up
//! with the same table.

use crate::codec::CommitCommand;
use crate::threshold::{Contribution, SecretShare};
use crate::time::Clock;
use crate::types::{Conflict, ConsumingTx};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use vigil_merkle::{StateRef, TimeWindow};
use vigil_store::{AppendOnlyMap, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ReplicaError {
    #[error("{} input(s) already consumed", .0.len())]
    Conflict(Conflict),

    #[error("request at {at} outside time window {window:?}")]
    TimeWindowInvalid { at: u64, window: TimeWindow },

    #[error("command rejected: {0}")]
    BadCommand(String),

    #[error("replica storage failure: {0}")]
    Storage(String),
}

/// What one replica answers for one agreed command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReplicaOutcome {
    /// Commit applied; partial signature over the transaction id.
    Signature(Contribution),
    Rejected(ReplicaError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaReply {
    pub index: u32,
    pub outcome: ReplicaOutcome,
}

pub struct Replica {
    share: SecretShare,
    map: AppendOnlyMap<String, ConsumingTx>,
    clock: Arc<dyn Clock>,
}

/// Composite key of the replicated spend table.
fn spend_key(state: &StateRef) -> String {
    format!("{}:{}", state.tx_id, state.index)
}

impl Replica {
    pub fn new(
        share: SecretShare,
        map: AppendOnlyMap<String, ConsumingTx>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Replica { share, map, clock }
    }

    pub fn open(
        path: impl AsRef<Path>,
        share: SecretShare,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        Ok(Replica::new(
            share,
            AppendOnlyMap::open(path, "replica_uniqueness")?,
            clock,
        ))
    }

    pub fn in_memory(share: SecretShare, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Ok(Replica::new(
            share,
            AppendOnlyMap::in_memory("replica_uniqueness")?,
            clock,
        ))
    }

    pub fn index(&self) -> u32 {
        self.share.index
    }

    /// Pre-agreement admission check; the only place the clock is read.
    pub fn validate(&self, command: &CommitCommand) -> Result<(), ReplicaError> {
        if let Some(window) = command.time_window {
            let at = self.clock.now_millis();
            if !window.contains(at) {
                return Err(ReplicaError::TimeWindowInvalid { at, window });
            }
        }
        Ok(())
    }

    /// Apply an agreed command to the spend table and, on success, produce
    /// a partial signature over the transaction id.
    pub fn apply(&self, command: &CommitCommand) -> ReplicaOutcome {
        let applied = self.map.transaction(|tx| {
            let mut conflict = Conflict::new();
            for input in &command.inputs {
                if let Some(existing) = tx.get(&spend_key(input))? {
                    if existing.tx_id != command.tx_id {
                        conflict.insert(*input, existing);
                    }
                }
            }
            if !conflict.is_empty() {
                return Ok(Err(conflict));
            }
            for (position, input) in command.inputs.iter().enumerate() {
                tx.insert_new(
                    spend_key(input),
                    ConsumingTx {
                        tx_id: command.tx_id,
                        input_index: position as u32,
                        requester: command.requester.clone(),
                    },
                )?;
            }
            Ok(Ok(()))
        });

        match applied {
            Ok(Ok(())) => {
                tracing::debug!(replica = self.index(), tx_id = %command.tx_id, "commit applied");
                ReplicaOutcome::Signature(
                    self.share.contribute(&mut OsRng, command.tx_id.as_bytes()),
                )
            }
            Ok(Err(conflict)) => {
                tracing::debug!(replica = self.index(), tx_id = %command.tx_id, "commit conflicts");
                ReplicaOutcome::Rejected(ReplicaError::Conflict(conflict))
            }
            Err(e) => {
                tracing::error!(replica = self.index(), error = %e, "replica storage failure");
                ReplicaOutcome::Rejected(ReplicaError::Storage(e.to_string()))
            }
        }
    }

    /// Full request path: decode, admission-check, apply.
    pub fn process(&self, command_bytes: &[u8]) -> ReplicaReply {
        let outcome = match CommitCommand::decode(command_bytes) {
            Err(e) => ReplicaOutcome::Rejected(ReplicaError::BadCommand(e.to_string())),
            Ok(command) => match self.validate(&command) {
                Err(e) => ReplicaOutcome::Rejected(e),
                Ok(()) => self.apply(&command),
            },
        };
        ReplicaReply {
            index: self.index(),
            outcome,
        }
    }

    /// Spend-table lookup, for tests and operator tooling.
    pub fn consumer_of(&self, state: &StateRef) -> Result<Option<ConsumingTx>, StoreError> {
        self.map.get(&spend_key(state))
    }
}
