use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tickloom_core::SchedulerConfig;
use tracing::{error, info, trace};

use crate::error::{SchedulerError, TaskError};
use crate::executor::{ErrorReporter, SyncExecutor, TracingReporter};
use crate::metrics::SchedulerMetrics;
use crate::recipe::RecipeBuilder;
use crate::synchronizer::TaskSynchronizer;
use crate::task::TaskBuilder;
use crate::time::TimeSource;
use crate::types::{ExecutionContext, Owner};

use super::in_flight::InFlight;
use super::queue::{Dispatch, ReadyQueue};

/// State shared by the scheduler handle, its tasks and its workers.
pub(crate) struct Shared {
    pub(crate) config: SchedulerConfig,
    pub(crate) queue: ReadyQueue,
    /// Taken out (and its threads released) by shutdown.
    pub(crate) pool: Mutex<Option<rayon::ThreadPool>>,
    pub(crate) live_workers: Arc<AtomicUsize>,
    pub(crate) sync_executor: Arc<dyn SyncExecutor>,
    pub(crate) time: Arc<dyn TimeSource>,
    pub(crate) reporter: Arc<dyn ErrorReporter>,
    pub(crate) metrics: RwLock<SchedulerMetrics>,
    pub(crate) in_flight: Arc<InFlight>,
    pub(crate) shutdown: AtomicBool,
    next_id: AtomicU64,
}

impl Shared {
    pub(crate) fn now(&self) -> u64 {
        self.time.current_ticks()
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn enqueue(&self, unit: Arc<dyn Dispatch>) {
        trace!(
            task_id = unit.id(),
            owner = %unit.owner(),
            context = %unit.context(),
            due = unit.next_execution_time(),
            "task enqueued"
        );
        self.queue.push(unit);
    }

    pub(crate) fn lock_pool(&self) -> MutexGuard<'_, Option<rayon::ThreadPool>> {
        self.pool.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn report_failure(&self, owner: &Owner, task_id: u64, error: &TaskError) {
        if let Ok(mut m) = self.metrics.write() {
            m.record_failure(owner);
        }
        let reported = catch_unwind(AssertUnwindSafe(|| self.reporter.report(owner, task_id, error)));
        if let Err(payload) = reported {
            error!(
                owner = %owner,
                task_id,
                error = %error,
                reporter_panic = %TaskError::from_panic(payload),
                "Error reporter panicked while reporting a task failure"
            );
        }
    }

    pub(crate) fn record_reschedule(&self) {
        if let Ok(mut m) = self.metrics.write() {
            m.record_reschedule();
        }
    }
}

/// The plugin task scheduler.
///
/// Cheap to clone; every clone drives the same queue and worker pool. The
/// host calls [`pump`](Scheduler::pump) once per tick from a single thread
/// and [`shutdown`](Scheduler::shutdown) once during teardown.
#[derive(Clone)]
pub struct Scheduler {
    pub(super) shared: Arc<Shared>,
}

impl Scheduler {
    /// Create a scheduler that logs task failures through `tracing`.
    pub fn new(
        config: SchedulerConfig,
        time: Arc<dyn TimeSource>,
        sync_executor: Arc<dyn SyncExecutor>,
    ) -> Result<Self, SchedulerError> {
        Self::with_reporter(config, time, sync_executor, Arc::new(TracingReporter))
    }

    /// Create a scheduler with a custom failure sink.
    pub fn with_reporter(
        config: SchedulerConfig,
        time: Arc<dyn TimeSource>,
        sync_executor: Arc<dyn SyncExecutor>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let workers = config.resolved_parallelism();
        let prefix = config.worker_name_prefix.clone();
        let live_workers = Arc::new(AtomicUsize::new(0));
        let (started, exited) = (Arc::clone(&live_workers), Arc::clone(&live_workers));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(move |i| format!("{}{}", prefix, i))
            .start_handler(move |_| {
                started.fetch_add(1, Ordering::SeqCst);
            })
            .exit_handler(move |_| {
                exited.fetch_sub(1, Ordering::SeqCst);
            })
            .panic_handler(|payload| {
                error!(error = %TaskError::from_panic(payload), "Scheduler worker job panicked");
            })
            .build()?;

        info!("Scheduler starting with {} workers", workers);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                queue: ReadyQueue::default(),
                pool: Mutex::new(Some(pool)),
                live_workers,
                sync_executor,
                time,
                reporter,
                metrics: RwLock::new(SchedulerMetrics::default()),
                in_flight: Arc::new(InFlight::default()),
                shutdown: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// Task builder for the sync context; switch with [`TaskBuilder::asynchronous`].
    pub fn schedule(&self, owner: &Owner) -> TaskBuilder {
        self.schedule_sync(owner)
    }

    pub fn schedule_sync(&self, owner: &Owner) -> TaskBuilder {
        TaskBuilder::new(Arc::clone(&self.shared), owner.clone(), ExecutionContext::Sync)
    }

    pub fn schedule_async(&self, owner: &Owner) -> TaskBuilder {
        TaskBuilder::new(Arc::clone(&self.shared), owner.clone(), ExecutionContext::Async)
    }

    /// Start a multi-stage pipeline seeded with `seed`.
    pub fn recipe<V: Send + 'static>(&self, owner: &Owner, seed: V) -> RecipeBuilder<V> {
        RecipeBuilder::new(Arc::clone(&self.shared), owner.clone(), seed)
    }

    /// Per-owner helper for one-off sync/async calls on a value.
    pub fn synchronizer(&self, owner: &Owner) -> TaskSynchronizer {
        TaskSynchronizer::new(self.clone(), owner.clone())
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn current_ticks(&self) -> u64 {
        self.shared.now()
    }

    /// Entries currently waiting in the ready queue, cancelled ones included.
    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.len()
    }

    /// Async units on the worker pool that have not returned yet.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Worker threads currently alive. Drops to zero after shutdown.
    pub fn live_workers(&self) -> usize {
        self.shared.live_workers.load(Ordering::SeqCst)
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        match self.shared.metrics.read() {
            Ok(m) => m.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }
}
