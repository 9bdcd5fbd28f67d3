//! `dynamize` turns a static, bulk-built index structure into a dynamic
//! one supporting concurrent inserts, deletes, and user-defined queries.
//!
//! This crate is the coordination core of a Bentley–Saxe style
//! decomposition, adapted for in-memory workloads:
//! - Writes accumulate in a bounded mutable buffer with lock-free append.
//! - At the low watermark the buffer is compiled into an immutable shard
//!   and merged into a leveled hierarchy (tiering, leveling, or strict
//!   Bentley–Saxe layout).
//! - Deletes are tombstones cancelled during merges, or in-place tags
//!   under the serial scheduler.
//! - Queries fan out over a pinned epoch — a consistent (structure,
//!   buffer, head) snapshot — while reconstructions run in the background
//!   against a shallow clone.
//!
//! Shards, queries, and the scheduler are capabilities: anything
//! satisfying [`shard::Shard`], [`query::Query`], and
//! [`scheduler::Scheduler`] plugs in. [`shard::IsamShard`] and
//! [`query::RangeQuery`] ship as the reference pair.

pub mod bloom;
pub mod buffer;
pub mod epoch;
pub mod extension;
pub mod policy;
pub mod query;
pub mod record;
pub mod scheduler;
pub mod shard;
pub mod structure;

pub use buffer::{BufferView, MutableBuffer};
pub use extension::{
    DeletePolicy, DynamicExtension, ExtensionMetrics, ExtensionOptions, LayoutPolicy,
    LevelMetrics, OptionsError, QueryTicket,
};
pub use query::{Query, RangeParams, RangeQuery};
pub use record::{KeyedRecord, Pair, Record, WeightedPair, WeightedRecord, Wrapped};
pub use scheduler::{JobKind, PoolScheduler, Scheduler, SchedulerMetrics, SerialScheduler};
pub use shard::{IsamShard, OrderedShard, Shard, WeightedShard};
