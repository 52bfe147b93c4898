//! Single-node persistent uniqueness provider.
//!
//! One mutex serialises every read-then-multi-write critical section; the
//! reads and writes of a single commit run inside one durable transaction.
//! Conflicts are detected in full before anything is written, so a losing
//! commit records nothing. Stored consumers never change, which is what
//! makes client retries safe.

use crate::events::{CommitEvent, CommitEventQueue};
use crate::types::{CommitProof, Conflict, ConsumingTx, Party, UniquenessError, UniquenessProvider};
use std::path::Path;
use std::sync::{Arc, Mutex};
use vigil_merkle::{SecureHash, StateRef, TimeWindow};
use vigil_store::{AppendOnlyMap, StoreError};

const MAX_TRANSIENT_RETRIES: usize = 3;
const EVENT_QUEUE_CAPACITY: usize = 256;

pub struct PersistentUniquenessProvider {
    map: AppendOnlyMap<StateRef, ConsumingTx>,
    guard: Mutex<()>,
    events: Arc<CommitEventQueue>,
}

impl PersistentUniquenessProvider {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self::with_map(AppendOnlyMap::open(path, "uniqueness")?))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::with_map(AppendOnlyMap::in_memory("uniqueness")?))
    }

    fn with_map(map: AppendOnlyMap<StateRef, ConsumingTx>) -> Self {
        PersistentUniquenessProvider {
            map,
            guard: Mutex::new(()),
            events: Arc::new(CommitEventQueue::new(EVENT_QUEUE_CAPACITY)),
        }
    }

    /// Queue of successful-commit notifications; drop-oldest on overflow.
    pub fn events(&self) -> Arc<CommitEventQueue> {
        Arc::clone(&self.events)
    }

    /// Look a single state up; test and diagnostic aid.
    pub fn consumer_of(&self, state: &StateRef) -> Result<Option<ConsumingTx>, StoreError> {
        self.map.get(state)
    }

    /// `Ok(Ok(n))` committed with `n` freshly recorded rows (zero on an
    /// idempotent retry), `Ok(Err(conflict))` rejected without writing.
    fn try_commit(
        &self,
        inputs: &[StateRef],
        tx_id: SecureHash,
        requester: &Party,
    ) -> Result<Result<usize, Conflict>, StoreError> {
        self.map.transaction(|tx| {
            let mut conflict = Conflict::new();
            for input in inputs {
                if let Some(existing) = tx.get(input)? {
                    if existing.tx_id != tx_id {
                        conflict.insert(*input, existing);
                    }
                }
            }
            if !conflict.is_empty() {
                return Ok(Err(conflict));
            }
            let mut recorded = 0;
            for (position, input) in inputs.iter().enumerate() {
                // a row that already exists carries the same tx_id, so the
                // no-op insert keeps retries idempotent
                if tx.insert_new(
                    *input,
                    ConsumingTx {
                        tx_id,
                        input_index: position as u32,
                        requester: requester.clone(),
                    },
                )? {
                    recorded += 1;
                }
            }
            Ok(Ok(recorded))
        })
    }
}

impl UniquenessProvider for PersistentUniquenessProvider {
    fn commit(
        &self,
        inputs: &[StateRef],
        tx_id: SecureHash,
        requester: &Party,
        _time_window: Option<TimeWindow>,
    ) -> Result<CommitProof, UniquenessError> {
        let _guard = self.guard.lock().expect("uniqueness guard");

        let mut attempt = 0;
        loop {
            match self.try_commit(inputs, tx_id, requester) {
                Ok(Ok(recorded)) => {
                    tracing::info!(%tx_id, inputs = inputs.len(), requester = %requester, "inputs committed");
                    if recorded > 0 {
                        self.events.publish(CommitEvent {
                            tx_id,
                            input_count: inputs.len(),
                        });
                    }
                    return Ok(CommitProof::Recorded);
                }
                Ok(Err(conflict)) => {
                    tracing::warn!(%tx_id, conflicts = conflict.len(), "commit rejected");
                    return Err(UniquenessError::Conflict(conflict));
                }
                Err(e) if e.is_transient() && attempt < MAX_TRANSIENT_RETRIES => {
                    attempt += 1;
                    tracing::warn!(%tx_id, attempt, error = %e, "transient storage failure, retrying");
                }
                Err(e) if e.is_transient() => {
                    return Err(UniquenessError::Storage(e.to_string()));
                }
                Err(e) => {
                    // An uncommittable uniqueness log cannot be tolerated:
                    // continuing could answer requests from a log that no
                    // longer reflects what was promised.
                    tracing::error!(%tx_id, error = %e, "fatal uniqueness storage failure, aborting");
                    std::process::abort();
                }
            }
        }
    }
}
