//! Commit notifications.
//!
//! Subscribers poll-drain a bounded queue; when nobody keeps up the oldest
//! events are dropped rather than blocking the committer.

use std::collections::VecDeque;
use std::sync::Mutex;
use vigil_merkle::SecureHash;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitEvent {
    pub tx_id: SecureHash,
    pub input_count: usize,
}

pub struct CommitEventQueue {
    inner: Mutex<VecDeque<CommitEvent>>,
    capacity: usize,
}

impl CommitEventQueue {
    pub fn new(capacity: usize) -> Self {
        CommitEventQueue {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn publish(&self, event: CommitEvent) {
        let mut queue = self.inner.lock().expect("event queue lock");
        if queue.len() == self.capacity {
            queue.pop_front();
            tracing::debug!("commit event queue full, dropping oldest");
        }
        queue.push_back(event);
    }

    /// Take everything currently queued.
    pub fn drain(&self) -> Vec<CommitEvent> {
        self.inner
            .lock()
            .expect("event queue lock")
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("event queue lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
