//! Integration tests driving the scheduler from a dedicated host thread.
//!
//! The host thread owns the tick loop: it advances the clock, pumps the
//! scheduler and drains sync work, the way an embedding application would.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tickloom_scheduler::{
    ClockTimeSource, HostQueue, ManualTimeSource, Owner, Scheduler, SchedulerConfig, TaskError,
    TickUnit, TimeSource,
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Host loop running on its own thread until stopped.
struct HostLoop {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<String>>,
}

impl HostLoop {
    fn start(
        scheduler: Scheduler,
        host: Arc<HostQueue>,
        manual: Option<Arc<ManualTimeSource>>,
        tick: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let thread = thread::Builder::new()
            .name("host-loop".into())
            .spawn(move || {
                while !flag.load(Ordering::SeqCst) {
                    if let Some(time) = &manual {
                        time.advance(1);
                    }
                    scheduler.pump();
                    host.run_pending();
                    thread::sleep(tick);
                }
                host.run_pending();
                thread::current().name().unwrap_or_default().to_string()
            })
            .expect("spawn host loop");
        Self {
            stop,
            thread: Some(thread),
        }
    }

    fn stop(mut self) -> String {
        self.stop.store(true, Ordering::SeqCst);
        self.thread
            .take()
            .map(|t| t.join().expect("host loop panicked"))
            .unwrap_or_default()
    }
}

fn config(parallelism: usize, ticks_per_second: u32) -> SchedulerConfig {
    SchedulerConfig {
        parallelism,
        ticks_per_second,
        ..SchedulerConfig::default()
    }
}

#[test]
fn synchronizer_round_trips_through_host_thread() {
    let time = Arc::new(ManualTimeSource::new(0));
    let host = Arc::new(HostQueue::new());
    let scheduler = Scheduler::new(config(2, 60), time.clone(), host.clone()).unwrap();
    let host_loop = HostLoop::start(scheduler.clone(), host, Some(time), Duration::from_millis(1));

    let sync = scheduler.synchronizer(&Owner::new("commands"));
    let on_host = sync.run_sync((), |_| thread::current().name().map(str::to_string));
    let doubled = sync.run_async(21, |n: i32| n * 2);

    assert_eq!(on_host.get_timeout(TIMEOUT).unwrap().as_deref(), Some("host-loop"));
    assert_eq!(doubled.get_timeout(TIMEOUT), Ok(42));

    assert!(scheduler.shutdown(TIMEOUT).is_drained());
    assert_eq!(host_loop.stop(), "host-loop");
}

#[test]
fn periodic_async_task_never_overlaps_itself() {
    let time = Arc::new(ManualTimeSource::new(0));
    let host = Arc::new(HostQueue::new());
    let scheduler = Scheduler::new(config(4, 60), time.clone(), host.clone()).unwrap();
    let owner = Owner::new("sampler");

    let overlap = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::new();
    let mut counters = Vec::new();
    for _ in 0..4 {
        let running = Arc::new(AtomicBool::new(false));
        let runs = Arc::new(AtomicUsize::new(0));
        let (overlap, r) = (overlap.clone(), runs.clone());
        let handle = scheduler
            .schedule_async(&owner)
            .repeat(1)
            .execute(move || {
                if running.swap(true, Ordering::SeqCst) {
                    overlap.store(true, Ordering::SeqCst);
                }
                // Longer than a tick so the next occurrence would be due mid-run.
                thread::sleep(Duration::from_millis(3));
                r.fetch_add(1, Ordering::SeqCst);
                running.store(false, Ordering::SeqCst);
            });
        handles.push(handle);
        counters.push(runs);
    }

    let host_loop = HostLoop::start(scheduler.clone(), host, Some(time), Duration::from_millis(1));
    thread::sleep(Duration::from_millis(150));
    for handle in &handles {
        handle.cancel();
    }
    assert!(scheduler.shutdown(TIMEOUT).is_drained());
    host_loop.stop();

    assert!(!overlap.load(Ordering::SeqCst));
    for runs in &counters {
        assert!(runs.load(Ordering::SeqCst) >= 2);
    }
}

#[test]
fn clock_time_source_honours_wall_clock_delay() {
    let time = Arc::new(ClockTimeSource::new(100));
    let host = Arc::new(HostQueue::new());
    let scheduler = Scheduler::new(config(2, 100), time.clone(), host.clone()).unwrap();

    let submitted_at = Instant::now();
    let start_tick = time.current_ticks();
    let handle = scheduler
        .schedule(&Owner::new("timer"))
        .delay_in(50, TickUnit::Millis)
        .supply(Instant::now);
    let due = handle.next_execution_time();
    assert!(due >= start_tick + 5 && due <= start_tick + 6, "due at {due}");

    let host_loop = HostLoop::start(scheduler.clone(), host, None, Duration::from_millis(2));
    let ran_at = handle.get_timeout(TIMEOUT).unwrap();
    scheduler.shutdown(TIMEOUT);
    host_loop.stop();

    assert!(ran_at.duration_since(submitted_at) >= Duration::from_millis(30));
}

#[test]
fn handle_reports_timeout_while_host_is_idle() {
    let time = Arc::new(ManualTimeSource::new(0));
    let host = Arc::new(HostQueue::new());
    let scheduler = Scheduler::new(config(1, 60), time, host).unwrap();

    let handle = scheduler.schedule(&Owner::new("idle")).supply(|| 1);
    assert_eq!(handle.get_timeout(Duration::from_millis(20)), Err(TaskError::Timeout));
    assert!(!handle.is_done());
    assert_eq!(scheduler.pending_tasks(), 1);
}
