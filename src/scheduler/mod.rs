//! Job scheduling capability.
//!
//! The framework submits two kinds of jobs — queries and reconstructions —
//! and is otherwise indifferent to where they run. The serial scheduler
//! runs jobs inline on the submitting thread, which is what tagged
//! deletion requires; the pooled scheduler dispatches onto a rayon thread
//! pool. Both keep per-kind counters so callers can observe queueing and
//! run times.

pub mod oneshot;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Query,
    Reconstruction,
}

/// Counters for one job kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobKindMetrics {
    pub scheduled: u64,
    pub completed: u64,
    /// Total time jobs of this kind spent queued before running.
    pub queue_nanos: u64,
    /// Total time jobs of this kind spent running.
    pub run_nanos: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerMetrics {
    pub queries: JobKindMetrics,
    pub reconstructions: JobKindMetrics,
}

#[derive(Debug, Default)]
struct KindCounters {
    scheduled: AtomicU64,
    completed: AtomicU64,
    queue_nanos: AtomicU64,
    run_nanos: AtomicU64,
}

impl KindCounters {
    fn snapshot(&self) -> JobKindMetrics {
        JobKindMetrics {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            queue_nanos: self.queue_nanos.load(Ordering::Relaxed),
            run_nanos: self.run_nanos.load(Ordering::Relaxed),
        }
    }

    fn record(&self, queued: Instant, started: Instant) {
        self.queue_nanos.fetch_add(
            started.duration_since(queued).as_nanos() as u64,
            Ordering::Relaxed,
        );
        self.run_nanos
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct Counters {
    queries: KindCounters,
    reconstructions: KindCounters,
}

impl Counters {
    fn kind(&self, kind: JobKind) -> &KindCounters {
        match kind {
            JobKind::Query => &self.queries,
            JobKind::Reconstruction => &self.reconstructions,
        }
    }

    fn snapshot(&self) -> SchedulerMetrics {
        SchedulerMetrics {
            queries: self.queries.snapshot(),
            reconstructions: self.reconstructions.snapshot(),
        }
    }
}

pub trait Scheduler: Send + Sync + Sized + 'static {
    /// Whether jobs run inline on the submitting thread. Tagged deletion
    /// is only sound on a serial scheduler, checked at construction.
    const SERIAL: bool;

    fn with_threads(thread_cnt: usize) -> anyhow::Result<Self>;

    fn schedule(&self, kind: JobKind, job: Job);

    /// Drain in-flight jobs and stop accepting asynchronous work.
    fn shutdown(&self);

    fn metrics(&self) -> SchedulerMetrics;
}

/// Runs every job inline on the calling thread.
#[derive(Debug, Default)]
pub struct SerialScheduler {
    counters: Counters,
}

impl Scheduler for SerialScheduler {
    const SERIAL: bool = true;

    fn with_threads(_thread_cnt: usize) -> anyhow::Result<Self> {
        Ok(Self::default())
    }

    fn schedule(&self, kind: JobKind, job: Job) {
        let counters = self.counters.kind(kind);
        counters.scheduled.fetch_add(1, Ordering::Relaxed);
        let queued = Instant::now();
        job();
        counters.record(queued, queued);
    }

    fn shutdown(&self) {}

    fn metrics(&self) -> SchedulerMetrics {
        self.counters.snapshot()
    }
}

/// Dispatches jobs onto a dedicated rayon thread pool.
pub struct PoolScheduler {
    pool: rayon::ThreadPool,
    counters: Arc<Counters>,
    in_flight: Arc<InFlight>,
    stopping: AtomicBool,
}

#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    drained: Condvar,
}

impl InFlight {
    fn enter(&self) {
        *self.count.lock() += 1;
    }

    fn exit(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    fn wait_for_drain(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.drained.wait(&mut count);
        }
    }
}

impl Scheduler for PoolScheduler {
    const SERIAL: bool = false;

    fn with_threads(thread_cnt: usize) -> anyhow::Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(thread_cnt.max(1))
            .thread_name(|i| format!("dynamize-worker-{i}"))
            .build()?;
        Ok(Self {
            pool,
            counters: Arc::new(Counters::default()),
            in_flight: Arc::new(InFlight::default()),
            stopping: AtomicBool::new(false),
        })
    }

    fn schedule(&self, kind: JobKind, job: Job) {
        let counters = self.counters.kind(kind);
        counters.scheduled.fetch_add(1, Ordering::Relaxed);
        let queued = Instant::now();

        if self.stopping.load(Ordering::Acquire) {
            // Late submissions still run, just inline on the caller.
            job();
            self.counters.kind(kind).record(queued, queued);
            return;
        }

        self.in_flight.enter();
        let counters = Arc::clone(&self.counters);
        let in_flight = Arc::clone(&self.in_flight);
        self.pool.spawn(move || {
            let started = Instant::now();
            job();
            counters.kind(kind).record(queued, started);
            in_flight.exit();
        });
    }

    fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        self.in_flight.wait_for_drain();
    }

    fn metrics(&self) -> SchedulerMetrics {
        self.counters.snapshot()
    }
}

impl Drop for PoolScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
