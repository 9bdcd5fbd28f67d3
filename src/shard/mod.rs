//! Shard capability contract.
//!
//! A shard is an immutable, bulk-built index over a set of wrapped
//! records. The framework builds shards from buffer views on flush and
//! from other shards on merge, and otherwise only needs counts, memory
//! accounting, and point lookup; anything richer (ordered access, weights)
//! is an extension trait required by the queries that use it.
//!
//! The one crack in immutability is the delete tag: `point_lookup` hands
//! back the stored envelope, whose tag bit can be set in place. Tagged
//! deletion is restricted to the serial scheduler at configuration time.

pub mod isam;

pub use isam::IsamShard;

use crate::buffer::BufferView;
use crate::record::{KeyedRecord, Record, WeightedRecord, Wrapped};

pub trait Shard<R: Record>: Sized + Send + Sync + 'static {
    /// Bulk-build from the records of a buffer view. Construction may fail
    /// (allocation, degenerate input); the error propagates through the
    /// scheduling job that requested it.
    fn build(view: &BufferView<R>) -> anyhow::Result<Self>;

    /// Build by merging other shards, cancelling tombstone/victim pairs
    /// and dropping tagged records along the way.
    fn merge(shards: &[&Self]) -> anyhow::Result<Self>;

    /// Number of stored records, tombstones and tagged records included.
    fn record_count(&self) -> usize;

    fn tombstone_count(&self) -> usize;

    /// Bytes used for records and the primary index structure.
    fn memory_usage(&self) -> usize;

    /// Bytes used for auxiliary structures (filters, hash tables, ...).
    fn aux_memory_usage(&self) -> usize {
        0
    }

    /// Find a stored record equal to `rec`. With `prefilter` set, a
    /// tombstone filter miss may short-circuit to `None`.
    fn point_lookup(&self, rec: &R, prefilter: bool) -> Option<&Wrapped<R>>;
}

/// Random access by key order, required by range queries.
pub trait OrderedShard<R: KeyedRecord>: Shard<R> {
    /// Index of the first record with key `>= key`.
    fn lower_bound(&self, key: &R::Key) -> usize;

    fn record_at(&self, idx: usize) -> Option<&Wrapped<R>>;

    fn records(&self) -> &[Wrapped<R>];
}

/// Aggregate weight access, required by weighted sampling queries.
pub trait WeightedShard<R: WeightedRecord>: Shard<R> {
    fn total_weight(&self) -> f64;
}
