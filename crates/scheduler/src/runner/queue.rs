use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::{ExecutionContext, Owner};

/// Anything the pump can hand to an executor: tasks and recipe steps.
pub(crate) trait Dispatch: Send + Sync {
    fn id(&self) -> u64;
    fn owner(&self) -> &Owner;
    fn context(&self) -> ExecutionContext;
    fn next_execution_time(&self) -> u64;
    /// Terminal units are dropped by the pump without dispatch.
    fn is_terminal(&self) -> bool;
    fn cancel(&self);
    fn run(self: Arc<Self>);
}

struct Entry {
    due: u64,
    seq: u64,
    unit: Arc<dyn Dispatch>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

/// Result of asking the queue for its next due unit.
pub(crate) enum Popped {
    Due(Arc<dyn Dispatch>),
    Discarded,
    NotDue,
}

/// Time-ordered ready queue.
///
/// Many threads may push (periodic tasks re-enqueue themselves from worker
/// threads); only the pump thread pops. Entries with equal due ticks pop in
/// insertion order.
#[derive(Default)]
pub(crate) struct ReadyQueue {
    heap: Mutex<BinaryHeap<Reverse<Entry>>>,
    seq: AtomicU64,
}

impl ReadyQueue {
    fn lock(&self) -> MutexGuard<'_, BinaryHeap<Reverse<Entry>>> {
        self.heap.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn push(&self, unit: Arc<dyn Dispatch>) {
        let entry = Entry {
            due: unit.next_execution_time(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            unit,
        };
        self.lock().push(Reverse(entry));
    }

    /// Pop the head if it is terminal or due at `now`.
    pub(crate) fn pop_due(&self, now: u64) -> Popped {
        let mut heap = self.lock();
        let Some(Reverse(head)) = heap.peek() else {
            return Popped::NotDue;
        };
        if head.unit.is_terminal() {
            heap.pop();
            Popped::Discarded
        } else if head.due <= now {
            match heap.pop() {
                Some(Reverse(entry)) => Popped::Due(entry.unit),
                None => Popped::NotDue,
            }
        } else {
            Popped::NotDue
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Remove terminal entries and cancel every queued async unit.
    ///
    /// Called once the worker pool is closed. Sync entries stay so the host
    /// can still pump them. Removed units are dropped after the lock is
    /// released. Returns the number of entries removed.
    pub(crate) fn purge_for_shutdown(&self) -> usize {
        let removed: Vec<Arc<dyn Dispatch>> = {
            let mut heap = self.lock();
            let (keep, purge): (Vec<_>, Vec<_>) = std::mem::take(&mut *heap)
                .into_iter()
                .partition(|Reverse(entry)| {
                    !entry.unit.is_terminal() && !entry.unit.context().is_async()
                });
            *heap = keep.into_iter().collect();
            purge.into_iter().map(|Reverse(entry)| entry.unit).collect()
        };
        for unit in &removed {
            unit.cancel();
        }
        removed.len()
    }
}
