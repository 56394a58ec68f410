use std::sync::Arc;

use tracing::debug;

use crate::types::{ExecutionContext, PumpReport};

use super::queue::{Dispatch, Popped};
use super::Scheduler;

impl Scheduler {
    /// Dispatch every entry that is due at the current tick.
    ///
    /// Must be called once per host tick, always from the same thread. Entries
    /// leave in non-decreasing due order; cancelled entries are dropped without
    /// dispatch. The pass ends at the first entry that is not yet due.
    pub fn pump(&self) -> PumpReport {
        let shared = &self.shared;
        let now = shared.now();
        let mut report = PumpReport {
            tick: now,
            ..PumpReport::default()
        };

        loop {
            let unit = match shared.queue.pop_due(now) {
                Popped::Due(unit) => unit,
                Popped::Discarded => {
                    report.discarded += 1;
                    continue;
                }
                Popped::NotDue => break,
            };

            match unit.context() {
                ExecutionContext::Async if shared.is_shutdown() => {
                    debug!(task_id = unit.id(), owner = %unit.owner(), "worker pool closed, cancelling async task");
                    unit.cancel();
                    report.discarded += 1;
                    continue;
                }
                ExecutionContext::Async => {
                    if self.dispatch_async(&unit) {
                        self.record_dispatch(&*unit);
                        report.dispatched_async += 1;
                    } else {
                        unit.cancel();
                        report.discarded += 1;
                    }
                }
                ExecutionContext::Sync => {
                    self.record_dispatch(&*unit);
                    shared.sync_executor.post(Box::new(move || unit.run()));
                    report.dispatched_sync += 1;
                }
            }
        }

        let depth = shared.queue.len();
        let in_flight = shared.in_flight.len();
        if let Ok(mut m) = shared.metrics.write() {
            m.record_pump(&report, depth, in_flight);
        }
        if report.dispatched() > 0 || report.discarded > 0 {
            debug!(
                tick = now,
                dispatched_sync = report.dispatched_sync,
                dispatched_async = report.dispatched_async,
                discarded = report.discarded,
                "pump pass"
            );
        }
        report
    }

    /// Hand `unit` to the worker pool. False once the pool has been released.
    fn dispatch_async(&self, unit: &Arc<dyn Dispatch>) -> bool {
        let pool = self.shared.lock_pool();
        let Some(pool) = pool.as_ref() else {
            return false;
        };
        let ticket = self.shared.in_flight.submit(unit.id(), unit.owner());
        let unit = Arc::clone(unit);
        pool.spawn(move || {
            ticket.start();
            unit.run();
            drop(ticket);
        });
        true
    }

    fn record_dispatch(&self, unit: &dyn Dispatch) {
        if let Ok(mut m) = self.shared.metrics.write() {
            m.record_dispatch(unit.owner(), unit.context());
        }
    }
}
