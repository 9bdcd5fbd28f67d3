//! The dynamic extension facade.
//!
//! Ties the pieces together: writes append to the buffer and trip a
//! background reconstruction at the low watermark; reconstruction clones
//! the active epoch, restructures the clone, flushes the buffer into it,
//! and advances the epoch register; queries run as scheduled jobs against
//! a pinned epoch. At most one reconstruction is in flight at a time,
//! guarded by a CAS flag that also backs the next-slot-empty precondition
//! of epoch cloning.

mod options;

pub use options::{DeletePolicy, ExtensionOptions, LayoutPolicy, OptionsError};

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;

use crate::buffer::MutableBuffer;
use crate::epoch::{Epoch, EpochCoordinator};
use crate::policy::{BsmPolicy, LevelingPolicy, ReconstructionPolicy, TieringPolicy};
use crate::query::Query;
use crate::record::Record;
use crate::scheduler::{oneshot, JobKind, Scheduler, SchedulerMetrics, SerialScheduler};
use crate::shard::Shard;
use crate::structure::ExtensionStructure;

/// Per-level counters reported by [`DynamicExtension::metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelMetrics {
    pub shard_count: usize,
    pub record_count: usize,
    pub tombstone_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ExtensionMetrics {
    pub record_count: usize,
    pub tombstone_count: usize,
    pub buffered_records: usize,
    pub height: usize,
    pub memory_usage: usize,
    pub aux_memory_usage: usize,
    pub levels: Vec<LevelMetrics>,
    pub scheduler: SchedulerMetrics,
    pub last_reconstruction_error: Option<String>,
}

/// Pending query result; `wait` blocks until the job delivers.
pub struct QueryTicket<T> {
    ticket: oneshot::Ticket<anyhow::Result<T>>,
}

impl<T> QueryTicket<T> {
    pub fn wait(self) -> anyhow::Result<T> {
        self.ticket
            .wait()
            .unwrap_or_else(|| Err(anyhow::anyhow!("query job dropped without a result")))
    }

    pub fn try_take(&self) -> Option<anyhow::Result<T>> {
        self.ticket.try_take()
    }
}

/// A dynamized index over shard type `S` answering queries of type `Q`.
///
/// The scheduler parameter selects between inline (serial) and thread-pool
/// execution of background jobs; tagged deletion requires the serial
/// scheduler and is rejected at construction otherwise.
pub struct DynamicExtension<R, S, Q, Sched = SerialScheduler>
where
    R: Record,
    S: Shard<R>,
    Q: Query<R, S>,
    Sched: Scheduler,
{
    inner: Arc<Inner<R, S, Sched>>,
    _query: PhantomData<fn() -> Q>,
}

struct Inner<R, S, Sched>
where
    R: Record,
    S: Shard<R>,
    Sched: Scheduler,
{
    options: ExtensionOptions,
    buffer: Arc<MutableBuffer<R>>,
    epochs: EpochCoordinator<R, S>,
    scheduler: Sched,
    policy: Box<dyn ReconstructionPolicy<R, S>>,
    reconstruction_scheduled: AtomicBool,
    last_reconstruction_error: Mutex<Option<String>>,
}

impl<R, S, Q, Sched> DynamicExtension<R, S, Q, Sched>
where
    R: Record,
    S: Shard<R>,
    Q: Query<R, S>,
    Sched: Scheduler,
{
    pub fn new(options: ExtensionOptions) -> anyhow::Result<Self> {
        options
            .validate(Sched::SERIAL)
            .context("invalid extension options")?;

        let buffer = Arc::new(MutableBuffer::new(
            options.buffer_low_watermark,
            options.buffer_high_watermark,
        ));
        let policy: Box<dyn ReconstructionPolicy<R, S>> = match options.layout {
            LayoutPolicy::Tiering => Box::new(TieringPolicy::new(
                options.scale_factor,
                options.buffer_high_watermark,
            )),
            LayoutPolicy::Leveling => Box::new(LevelingPolicy::new(
                options.scale_factor,
                options.buffer_high_watermark,
            )),
            LayoutPolicy::BentleySaxe => {
                Box::new(BsmPolicy::new(options.buffer_high_watermark))
            }
        };
        let scheduler = Sched::with_threads(options.thread_cnt).context("build scheduler")?;
        let initial = Epoch::new(0, ExtensionStructure::new(), Arc::clone(&buffer), 0);

        Ok(Self {
            inner: Arc::new(Inner {
                options,
                buffer,
                epochs: EpochCoordinator::new(initial),
                scheduler,
                policy,
                reconstruction_scheduled: AtomicBool::new(false),
                last_reconstruction_error: Mutex::new(None),
            }),
            _query: PhantomData,
        })
    }

    /// Insert a record. Returns false when the buffer is at its high
    /// watermark; retry once the in-flight flush completes. An accepted
    /// record is visible to every query pinned after this call returns.
    pub fn insert(&self, rec: R) -> bool {
        self.internal_append(rec, false)
    }

    /// Erase a record. Under tombstone deletion this appends a cancelling
    /// tombstone and shares insert's retry semantics. Under tagging it
    /// point-looks the record up and tags it in place: false means the
    /// record was not found, and the call should not be retried.
    pub fn erase(&self, rec: R) -> bool {
        match self.inner.options.delete_policy {
            DeletePolicy::Tombstone => self.internal_append(rec, true),
            DeletePolicy::Tagging => {
                // Snapshot the buffer range up front: a record racing from
                // the buffer into the structure stays covered one way or
                // the other.
                let view = self.inner.buffer.view();

                let hit = {
                    let epoch = self.inner.epochs.pin();
                    let found = epoch.structure().tagged_delete(&rec);
                    drop(epoch);
                    found || view.delete_record(&rec)
                };
                drop(view);

                if hit {
                    self.enforce_delete_invariant();
                }
                hit
            }
        }
    }

    /// Schedule `parms` for asynchronous execution against a consistent
    /// snapshot and return a ticket for the result.
    pub fn query(&self, parms: Q::Parameters) -> QueryTicket<Q::Result> {
        let (promise, ticket) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        self.inner.scheduler.schedule(
            JobKind::Query,
            Box::new(move || {
                promise.set(Ok(Inner::run_query::<Q>(&inner, &parms)));
            }),
        );
        QueryTicket { ticket }
    }

    /// Records in the framework, tombstones and tagged records included.
    pub fn record_count(&self) -> usize {
        let epoch = self.inner.epochs.pin();
        let count = epoch.buffered_record_count() + epoch.structure().record_count();
        count
    }

    pub fn tombstone_count(&self) -> usize {
        let epoch = self.inner.epochs.pin();
        let count = self.inner.buffer.tombstone_count() + epoch.structure().tombstone_count();
        count
    }

    /// Number of levels, empty levels included, the buffer excluded.
    pub fn height(&self) -> usize {
        self.inner.epochs.pin().structure().height()
    }

    pub fn memory_usage(&self) -> usize {
        let epoch = self.inner.epochs.pin();
        let usage = self.inner.buffer.memory_usage() + epoch.structure().memory_usage();
        usage
    }

    pub fn aux_memory_usage(&self) -> usize {
        let epoch = self.inner.epochs.pin();
        let usage = self.inner.buffer.aux_memory_usage() + epoch.structure().aux_memory_usage();
        usage
    }

    pub fn metrics(&self) -> ExtensionMetrics {
        let epoch = self.inner.epochs.pin();
        let structure = epoch.structure();
        ExtensionMetrics {
            record_count: epoch.buffered_record_count() + structure.record_count(),
            tombstone_count: self.inner.buffer.tombstone_count() + structure.tombstone_count(),
            buffered_records: epoch.buffered_record_count(),
            height: structure.height(),
            memory_usage: self.inner.buffer.memory_usage() + structure.memory_usage(),
            aux_memory_usage: self.inner.buffer.aux_memory_usage()
                + structure.aux_memory_usage(),
            levels: structure
                .levels()
                .iter()
                .map(|level| LevelMetrics {
                    shard_count: level.shard_count(),
                    record_count: level.record_count(),
                    tombstone_count: level.tombstone_count(),
                })
                .collect(),
            scheduler: self.inner.scheduler.metrics(),
            last_reconstruction_error: self.inner.last_reconstruction_error.lock().clone(),
        }
    }

    /// Flatten the buffer and every level into one new shard owned by the
    /// caller. With `await_reconstruction` set, waits out any in-flight
    /// epoch transition first.
    pub fn create_static_shard(&self, await_reconstruction: bool) -> anyhow::Result<S> {
        if await_reconstruction {
            self.await_next_epoch();
        }

        let epoch = self.inner.epochs.pin();
        let mut parts: Vec<S> = Vec::new();
        {
            let structure = epoch.structure();
            for level in structure.levels().iter().rev() {
                if let Some(combined) = level.combined_shard()? {
                    parts.push(combined);
                }
            }
        }

        // Hold the buffer view only as long as the copy-out takes.
        {
            let view = epoch.buffer_view();
            if view.record_count() > 0 {
                parts.push(S::build(&view)?);
            }
        }

        let refs: Vec<&S> = parts.iter().collect();
        S::merge(&refs)
    }

    /// Block until no epoch transition is in flight.
    pub fn await_next_epoch(&self) {
        self.inner.epochs.await_next_epoch();
    }

    /// Whether every level currently satisfies the tombstone-proportion
    /// bound.
    pub fn validate_tombstone_proportion(&self) -> bool {
        self.inner
            .epochs
            .pin()
            .structure()
            .validate_tombstone_proportion(self.inner.options.max_delete_proportion)
    }

    pub fn scheduler_metrics(&self) -> SchedulerMetrics {
        self.inner.scheduler.metrics()
    }

    fn internal_append(&self, rec: R, tombstone: bool) -> bool {
        if self.inner.buffer.is_at_low_watermark()
            && self
                .inner
                .reconstruction_scheduled
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            Inner::schedule_reconstruction(&self.inner);
        }

        self.inner.buffer.append(rec, tombstone)
    }

    /// Compact levels until the tombstone-proportion bound holds again.
    /// Compactions run against the active epoch and do not advance it.
    fn enforce_delete_invariant(&self) {
        loop {
            let epoch = self.inner.epochs.pin();
            let tasks = epoch
                .structure()
                .compaction_tasks(self.inner.options.max_delete_proportion);
            if tasks.is_empty() {
                return;
            }

            let (promise, ticket) = oneshot::channel();
            let inner = Arc::clone(&self.inner);
            drop(epoch);
            self.inner.scheduler.schedule(
                JobKind::Reconstruction,
                Box::new(move || {
                    let epoch = inner.epochs.pin();
                    let mut result = Ok(());
                    {
                        let mut structure = epoch.structure_mut();
                        for task in tasks.iter() {
                            if let Err(err) = structure.perform_reconstruction(task) {
                                result = Err(err);
                                break;
                            }
                        }
                    }
                    promise.set(result);
                }),
            );

            match ticket.wait() {
                Some(Ok(())) => {}
                Some(Err(err)) => {
                    *self.inner.last_reconstruction_error.lock() = Some(format!("{err:#}"));
                    return;
                }
                None => return,
            }
        }
    }
}

impl<R, S, Sched> Inner<R, S, Sched>
where
    R: Record,
    S: Shard<R>,
    Sched: Scheduler,
{
    fn schedule_reconstruction(inner: &Arc<Self>) {
        let epoch = inner.epochs.create_next_epoch();
        let tasks = {
            let structure = epoch.structure();
            inner
                .policy
                .reconstruction_tasks(&structure, inner.options.buffer_high_watermark)
        };
        let job_inner = Arc::clone(inner);
        inner.scheduler.schedule(
            JobKind::Reconstruction,
            Box::new(move || {
                let result = Self::run_reconstruction(&job_inner, &epoch, || {
                    let mut structure = epoch.structure_mut();
                    for task in tasks.iter() {
                        structure.perform_reconstruction(task)?;
                    }
                    Ok(())
                });
                if let Err(err) = result {
                    // The failed snapshot is discarded so a later flush can
                    // start over from the live epoch.
                    job_inner.epochs.clear_next();
                    *job_inner.last_reconstruction_error.lock() = Some(format!("{err:#}"));
                }
                job_inner
                    .reconstruction_scheduled
                    .store(false, Ordering::Release);
            }),
        );
    }

    fn run_reconstruction(
        inner: &Arc<Self>,
        epoch: &Arc<Epoch<R, S>>,
        merges: impl FnOnce() -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        merges()?;

        // Take the view after the merges so the flush drains as much of
        // the buffer as possible in one go.
        let view = epoch.buffer_view();
        let new_head = view.tail();
        {
            let mut structure = epoch.structure_mut();
            structure.perform_flush(&inner.policy.flush_task(), &view)?;
        }
        drop(view);

        inner.epochs.advance(new_head);
        Ok(())
    }

    fn run_query<Q: Query<R, S>>(inner: &Arc<Self>, parms: &Q::Parameters) -> Q::Result {
        let epoch = inner.epochs.pin();

        let mut buffer_query = Q::local_preproc_buffer(epoch.buffer_view(), parms);
        let (shards, mut locals) = epoch.structure().local_queries::<Q>(parms);
        Q::distribute_query(parms, &mut locals, &mut buffer_query);

        let mut output = Q::Result::default();
        loop {
            let mut results = Vec::with_capacity(locals.len() + 1);
            let buffer_result = Q::local_query_buffer(&buffer_query);
            let mut hit = Q::EARLY_ABORT && !Q::local_result_is_empty(&buffer_result);
            results.push(buffer_result);

            if !hit {
                for (shard, local) in shards.iter().zip(locals.iter()) {
                    let result = Q::local_query(shard, local);
                    hit = Q::EARLY_ABORT && !Q::local_result_is_empty(&result);
                    results.push(result);
                    if hit {
                        break;
                    }
                }
            }

            Q::combine(results, parms, &mut output);
            if !Q::repeat(parms, &mut output, &mut locals, &mut buffer_query) {
                break;
            }
        }

        output
    }
}

impl<R, S, Q, Sched> Drop for DynamicExtension<R, S, Q, Sched>
where
    R: Record,
    S: Shard<R>,
    Q: Query<R, S>,
    Sched: Scheduler,
{
    fn drop(&mut self) {
        self.inner.epochs.await_next_epoch();
        self.inner.scheduler.shutdown();
    }
}
