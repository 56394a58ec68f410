use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{ExecutionContext, Owner, PumpReport};

/// Scheduler operational counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Units handed to the sync executor.
    pub dispatched_sync: u64,
    /// Units handed to the worker pool.
    pub dispatched_async: u64,
    /// Dispatches by owner name.
    pub dispatched_by_owner: HashMap<String, u64>,
    /// Task and recipe failures by owner name.
    pub failures_by_owner: HashMap<String, u64>,
    /// Cancelled entries dropped by the pump.
    pub discarded: u64,
    /// Periodic re-enqueues.
    pub rescheduled: u64,
    /// Entries in the ready queue after the last pump.
    pub queue_depth: usize,
    /// Async units submitted to the pool and not yet returned.
    pub in_flight_async: usize,
    pub pumps: u64,
    pub last_pump_tick: Option<u64>,
    pub last_pump_at: Option<DateTime<Utc>>,
}

impl SchedulerMetrics {
    pub fn record_dispatch(&mut self, owner: &Owner, context: ExecutionContext) {
        match context {
            ExecutionContext::Sync => self.dispatched_sync += 1,
            ExecutionContext::Async => self.dispatched_async += 1,
        }
        *self
            .dispatched_by_owner
            .entry(owner.name().to_string())
            .or_default() += 1;
    }

    pub fn record_failure(&mut self, owner: &Owner) {
        *self
            .failures_by_owner
            .entry(owner.name().to_string())
            .or_default() += 1;
    }

    pub fn record_reschedule(&mut self) {
        self.rescheduled += 1;
    }

    /// Fold in the outcome of one pump pass.
    pub fn record_pump(&mut self, report: &PumpReport, queue_depth: usize, in_flight: usize) {
        self.pumps += 1;
        self.discarded += report.discarded as u64;
        self.queue_depth = queue_depth;
        self.in_flight_async = in_flight;
        self.last_pump_tick = Some(report.tick);
        self.last_pump_at = Some(Utc::now());
    }

    pub fn total_failures(&self) -> u64 {
        self.failures_by_owner.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_dispatch_by_context_and_owner() {
        let mut m = SchedulerMetrics::default();
        let owner = Owner::new("plugin");
        m.record_dispatch(&owner, ExecutionContext::Sync);
        m.record_dispatch(&owner, ExecutionContext::Async);
        m.record_dispatch(&owner, ExecutionContext::Async);

        assert_eq!(m.dispatched_sync, 1);
        assert_eq!(m.dispatched_async, 2);
        assert_eq!(m.dispatched_by_owner["plugin"], 3);
    }

    #[test]
    fn record_failures() {
        let mut m = SchedulerMetrics::default();
        m.record_failure(&Owner::new("a"));
        m.record_failure(&Owner::new("a"));
        m.record_failure(&Owner::new("b"));

        assert_eq!(m.failures_by_owner["a"], 2);
        assert_eq!(m.total_failures(), 3);
    }

    #[test]
    fn record_pump_updates_gauges() {
        let mut m = SchedulerMetrics::default();
        let report = PumpReport {
            tick: 12,
            dispatched_sync: 1,
            dispatched_async: 0,
            discarded: 2,
        };
        m.record_pump(&report, 5, 1);

        assert_eq!(m.pumps, 1);
        assert_eq!(m.discarded, 2);
        assert_eq!(m.queue_depth, 5);
        assert_eq!(m.in_flight_async, 1);
        assert_eq!(m.last_pump_tick, Some(12));
        assert!(m.last_pump_at.is_some());
    }

    #[test]
    fn default_metrics() {
        let m = SchedulerMetrics::default();
        assert_eq!(m.dispatched_sync, 0);
        assert_eq!(m.pumps, 0);
        assert!(m.last_pump_tick.is_none());
        assert!(m.dispatched_by_owner.is_empty());
    }
}
