//! FIFO queue of pending update records
//!
//! The producer appends from any thread at any time, including while a
//! drain tick runs. Records come out in exactly the order they went in.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chunkstage_cache::UpdateRecord;
use parking_lot::{Condvar, Mutex};

struct QueueState {
    records: VecDeque<UpdateRecord>,
    /// Total records ever appended
    enqueued: u64,
    /// Set by `wake` so a waiter that has not blocked yet returns at once
    interrupted: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    not_empty: Condvar,
}

/// Thread-safe FIFO of update records.
///
/// Clones share the same queue, so the producer side can hold its own clone.
///
/// # Example
///
/// ```
/// use chunkstage_cache::{TierState, UpdateRecord};
/// use chunkstage_scheduler::UpdateQueue;
///
/// let queue = UpdateQueue::new();
/// let producer = queue.clone();
///
/// producer.push(UpdateRecord::create(1, "c1", TierState::FastTier, 64));
/// producer.push(UpdateRecord::expire(1, "c1"));
///
/// assert_eq!(queue.pop().unwrap().target, TierState::FastTier);
/// assert_eq!(queue.pop().unwrap().target, TierState::Expired);
/// assert!(queue.pop().is_none());
/// ```
#[derive(Clone)]
pub struct UpdateQueue {
    shared: Arc<Shared>,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    records: VecDeque::new(),
                    enqueued: 0,
                    interrupted: false,
                }),
                not_empty: Condvar::new(),
            }),
        }
    }

    /// Append a record at the tail
    pub fn push(&self, record: UpdateRecord) {
        let mut state = self.shared.state.lock();
        state.records.push_back(record);
        state.enqueued += 1;
        drop(state);

        self.shared.not_empty.notify_all();
    }

    /// Append several records, keeping their relative order
    pub fn extend<I: IntoIterator<Item = UpdateRecord>>(&self, records: I) {
        let mut state = self.shared.state.lock();
        for record in records {
            state.records.push_back(record);
            state.enqueued += 1;
        }
        drop(state);

        self.shared.not_empty.notify_all();
    }

    /// Remove the record at the head
    pub fn pop(&self) -> Option<UpdateRecord> {
        self.shared.state.lock().records.pop_front()
    }

    /// Copy of the record at the head
    pub fn peek(&self) -> Option<UpdateRecord> {
        self.shared.state.lock().records.front().cloned()
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total records appended since creation
    pub fn enqueued(&self) -> u64 {
        self.shared.state.lock().enqueued
    }

    /// Block until the queue is non-empty, `timeout` passes, or
    /// [`UpdateQueue::wake`] is called.
    ///
    /// Returns true if records are pending.
    pub fn wait_for_records(&self, timeout: Duration) -> bool {
        let mut state = self.shared.state.lock();
        if state.records.is_empty() && !state.interrupted {
            self.shared.not_empty.wait_for(&mut state, timeout);
        }
        state.interrupted = false;
        !state.records.is_empty()
    }

    /// Interrupt a current or upcoming [`UpdateQueue::wait_for_records`]
    pub fn wake(&self) {
        self.shared.state.lock().interrupted = true;
        self.shared.not_empty.notify_all();
    }
}

impl Default for UpdateQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UpdateQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateQueue").field("len", &self.len()).finish()
    }
}
