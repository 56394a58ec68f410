use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::types::{Owner, StalledTask};

struct Slot {
    task_id: u64,
    owner: Owner,
    worker: Option<String>,
    started: Option<Instant>,
}

#[derive(Default)]
struct State {
    next_ticket: u64,
    active: HashMap<u64, Slot>,
}

/// Tracks async work handed to the worker pool until it returns.
#[derive(Default)]
pub(crate) struct InFlight {
    state: Mutex<State>,
    drained: Condvar,
}

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register work about to be spawned on the pool.
    pub(crate) fn submit(self: &Arc<Self>, task_id: u64, owner: &Owner) -> InFlightTicket {
        let mut state = self.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.active.insert(
            ticket,
            Slot {
                task_id,
                owner: owner.clone(),
                worker: None,
                started: None,
            },
        );
        InFlightTicket {
            tracker: Arc::clone(self),
            ticket,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().active.len()
    }

    /// Wait up to `timeout` for all tracked work to finish.
    pub(crate) fn wait_drained(&self, timeout: Duration) -> Result<(), Vec<StalledTask>> {
        let (state, _) = self
            .drained
            .wait_timeout_while(self.lock(), timeout, |s| !s.active.is_empty())
            .unwrap_or_else(|e| e.into_inner());
        if state.active.is_empty() {
            return Ok(());
        }
        let mut stalled: Vec<StalledTask> = state
            .active
            .values()
            .map(|slot| StalledTask {
                task_id: slot.task_id,
                owner: slot.owner.clone(),
                worker: slot.worker.clone(),
                running_for: slot.started.map(|s| s.elapsed()),
            })
            .collect();
        stalled.sort_by_key(|s| s.task_id);
        Err(stalled)
    }
}

/// Membership of one unit in [`InFlight`]; removed on drop.
pub(crate) struct InFlightTicket {
    tracker: Arc<InFlight>,
    ticket: u64,
}

impl InFlightTicket {
    /// Record the current worker thread as running this unit.
    pub(crate) fn start(&self) {
        let worker = std::thread::current().name().map(str::to_string);
        let mut state = self.tracker.lock();
        if let Some(slot) = state.active.get_mut(&self.ticket) {
            slot.worker = worker;
            slot.started = Some(Instant::now());
        }
    }
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        let mut state = self.tracker.lock();
        state.active.remove(&self.ticket);
        if state.active.is_empty() {
            self.tracker.drained.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn empty_tracker_is_drained() {
        let tracker = Arc::new(InFlight::default());
        assert!(tracker.wait_drained(Duration::ZERO).is_ok());
    }

    #[test]
    fn drop_releases_waiters() {
        let tracker = Arc::new(InFlight::default());
        let ticket = tracker.submit(7, &Owner::new("test"));
        assert_eq!(tracker.len(), 1);

        let t = thread::spawn(move || {
            ticket.start();
            thread::sleep(Duration::from_millis(20));
            drop(ticket);
        });
        assert!(tracker.wait_drained(Duration::from_secs(5)).is_ok());
        assert_eq!(tracker.len(), 0);
        t.join().unwrap();
    }

    #[test]
    fn timeout_reports_stalled_workers() {
        let tracker = Arc::new(InFlight::default());
        let ticket = tracker.submit(42, &Owner::new("slow"));
        let handle = thread::Builder::new()
            .name("blocked-worker".into())
            .spawn(move || {
                ticket.start();
                thread::sleep(Duration::from_millis(200));
                drop(ticket);
            })
            .unwrap();

        thread::sleep(Duration::from_millis(20));
        let stalled = tracker.wait_drained(Duration::from_millis(10)).unwrap_err();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].task_id, 42);
        assert_eq!(stalled[0].owner.name(), "slow");
        assert_eq!(stalled[0].worker.as_deref(), Some("blocked-worker"));
        assert!(stalled[0].running_for.is_some());
        handle.join().unwrap();
    }
}
