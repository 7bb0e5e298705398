// Transactions that arrive before their sender's key or their parents are
// known wait here. The queue is a bounded ring: it doubles when saturated,
// halves when mostly empty, and sheds arrivals once the hard cap is hit.

use crate::core::Transaction;
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

/// Capacity floor the queue never shrinks below
const MIN_CAPACITY: usize = 8;
/// Hard cap; arrivals beyond this are dropped
const MAX_CAPACITY: usize = 1024;

/// A transaction waiting on its sender's key or its ancestors, together
/// with what is needed to retry it
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    pub transaction: Transaction,
    pub peer: Uuid,
    pub signature: String,
}

struct QueueState {
    entries: VecDeque<PendingTransaction>,
    capacity: usize,
}

pub struct OrphanQueue {
    inner: Mutex<QueueState>,
}

impl Default for OrphanQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OrphanQueue {
    pub fn new() -> OrphanQueue {
        OrphanQueue {
            inner: Mutex::new(QueueState {
                entries: VecDeque::with_capacity(MIN_CAPACITY),
                capacity: MIN_CAPACITY,
            }),
        }
    }

    /// Enqueue a pending transaction, growing the ring if it is full.
    /// Returns false when the hard cap forces the arrival to be dropped.
    pub fn push(&self, entry: PendingTransaction) -> bool {
        let mut state = self
            .inner
            .lock()
            .expect("Failed to acquire lock on orphan queue - this should never happen");

        if state.entries.len() >= state.capacity {
            if state.capacity < MAX_CAPACITY {
                state.capacity = (state.capacity * 2).min(MAX_CAPACITY);
                debug!("Orphan queue grew to {} entries", state.capacity);
            } else {
                warn!(
                    "Orphan queue is saturated at {} entries, dropping transaction `{}`",
                    MAX_CAPACITY,
                    entry.transaction.get_hash()
                );
                return false;
            }
        }

        state.entries.push_back(entry);
        true
    }

    /// Take every currently queued entry for one retry pass. Entries that
    /// still cannot be applied are expected to be pushed back.
    pub fn drain_generation(&self) -> Vec<PendingTransaction> {
        let mut state = self
            .inner
            .lock()
            .expect("Failed to acquire lock on orphan queue - this should never happen");
        state.entries.drain(..).collect()
    }

    /// Halve the ring when less than half of it is in use, down to the
    /// capacity floor
    pub fn shrink_if_wasteful(&self) {
        let mut state = self
            .inner
            .lock()
            .expect("Failed to acquire lock on orphan queue - this should never happen");
        while state.capacity > MIN_CAPACITY && state.entries.len() < state.capacity / 2 {
            state.capacity /= 2;
            debug!("Orphan queue shrank to {} entries", state.capacity);
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("Failed to acquire lock on orphan queue - this should never happen")
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tag: u64) -> PendingTransaction {
        let tx = Transaction::new(vec![format!("parent-{tag}")], vec![], vec![], 1).unwrap();
        PendingTransaction {
            transaction: tx,
            peer: Uuid::new_v4(),
            signature: String::new(),
        }
    }

    #[test]
    fn test_push_and_drain() {
        let queue = OrphanQueue::new();
        assert!(queue.is_empty());

        assert!(queue.push(entry(1)));
        assert!(queue.push(entry(2)));
        assert_eq!(queue.len(), 2);

        let drained = queue.drain_generation();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_grows_past_the_floor() {
        let queue = OrphanQueue::new();
        for i in 0..(MIN_CAPACITY as u64 * 4) {
            assert!(queue.push(entry(i)));
        }
        assert_eq!(queue.len(), MIN_CAPACITY * 4);
    }

    #[test]
    fn test_drops_at_the_hard_cap() {
        let queue = OrphanQueue::new();
        for i in 0..(MAX_CAPACITY as u64) {
            assert!(queue.push(entry(i)));
        }
        // The ring is full and cannot grow further
        assert!(!queue.push(entry(9999)));
        assert_eq!(queue.len(), MAX_CAPACITY);
    }

    #[test]
    fn test_shrinks_when_mostly_empty() {
        let queue = OrphanQueue::new();
        for i in 0..64 {
            queue.push(entry(i));
        }
        queue.drain_generation();
        queue.shrink_if_wasteful();

        // Refilling to the floor must still work without dropping
        for i in 0..(MIN_CAPACITY as u64) {
            assert!(queue.push(entry(i)));
        }
    }
}
