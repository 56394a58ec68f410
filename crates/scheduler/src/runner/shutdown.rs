use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::types::ShutdownStatus;

use super::Scheduler;

impl Scheduler {
    /// Stop handing work to the pool and wait up to `timeout` for in-flight
    /// async work to return.
    ///
    /// On timeout every worker still running scheduler work is logged with the
    /// owner and task it is stuck on; shutdown proceeds regardless. Either way
    /// the worker pool is released and queued async or cancelled entries are
    /// purged, so their threads exit once idle.
    pub fn shutdown(&self, timeout: Duration) -> ShutdownStatus {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            warn!("Scheduler shutdown requested more than once");
            return match self.shared.in_flight.wait_drained(Duration::ZERO) {
                Ok(()) => ShutdownStatus::Drained,
                Err(stalled) => ShutdownStatus::TimedOut { stalled },
            };
        }

        info!(timeout = ?timeout, in_flight = self.shared.in_flight.len(), "Shutting down scheduler");
        let status = self.wait_for_workers(timeout);
        self.release_workers();
        status
    }

    fn wait_for_workers(&self, timeout: Duration) -> ShutdownStatus {
        match self.shared.in_flight.wait_drained(timeout) {
            Ok(()) => {
                info!("Scheduler stopped");
                ShutdownStatus::Drained
            }
            Err(stalled) => {
                error!(
                    count = stalled.len(),
                    "Timed out waiting for the scheduler workers to finish"
                );
                for task in &stalled {
                    error!(
                        worker = task.worker.as_deref().unwrap_or("<not started>"),
                        owner = %task.owner,
                        task_id = task.task_id,
                        running_for = ?task.running_for,
                        "Worker may be blocked, possibly the reason for the slow shutdown"
                    );
                }
                ShutdownStatus::TimedOut { stalled }
            }
        }
    }

    fn release_workers(&self) {
        let pool = self.shared.lock_pool().take();
        let purged = self.shared.queue.purge_for_shutdown();
        debug!(purged, released = pool.is_some(), "Worker pool released");
        drop(pool);
    }

    /// [`shutdown`](Scheduler::shutdown) with the configured timeout.
    pub fn shutdown_with_default_timeout(&self) -> ShutdownStatus {
        self.shutdown(self.shared.config.shutdown_timeout())
    }
}
