//! Reconstruction planning.
//!
//! A policy inspects a structure snapshot and emits the reconstruction
//! tasks that make room for an incoming flush. Tasks are ordered deepest
//! target first so that by the time a shallower merge runs, its target
//! level has already been drained by the step before it.

mod bsm;
mod leveling;
mod tiering;

pub use bsm::BsmPolicy;
pub use leveling::LevelingPolicy;
pub use tiering::TieringPolicy;

use crate::record::Record;
use crate::shard::Shard;
use crate::structure::ExtensionStructure;

/// Which shards of a level participate in a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardSlot {
    /// Every shard currently on the level.
    All,
    /// A single shard by index.
    At(usize),
}

/// A merge input: either the mutable buffer or shards of a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceId {
    Buffer,
    Level { level: usize, shards: ShardSlot },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructionKind {
    /// Empty the buffer into level 0.
    Flush,
    /// Merge shards across levels.
    Merge,
    /// Add a shard to a level without merging.
    Append,
    /// Merge a level's shards in place to restore the delete invariant.
    Compact,
}

#[derive(Debug, Clone)]
pub struct ReconstructionTask {
    pub sources: Vec<SourceId>,
    pub target: usize,
    pub reccnt: usize,
    pub kind: ReconstructionKind,
}

impl ReconstructionTask {
    pub fn new(target: usize, kind: ReconstructionKind) -> Self {
        Self {
            sources: Vec::new(),
            target,
            reccnt: 0,
            kind,
        }
    }

    pub fn add_source(&mut self, source: SourceId, reccnt: usize) {
        self.sources.push(source);
        self.reccnt += reccnt;
    }
}

/// An ordered batch of reconstruction tasks.
#[derive(Debug, Clone, Default)]
pub struct ReconstructionVector {
    tasks: Vec<ReconstructionTask>,
    total_reccnt: usize,
}

impl ReconstructionVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: ReconstructionTask) {
        self.total_reccnt += task.reccnt;
        self.tasks.push(task);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReconstructionTask> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn total_reccnt(&self) -> usize {
        self.total_reccnt
    }
}

pub trait ReconstructionPolicy<R: Record, S: Shard<R>>: Send + Sync {
    /// Plan the merges that make room for `incoming` records arriving at
    /// level 0, growing the structure when every level is at capacity.
    fn reconstruction_tasks(
        &self,
        structure: &ExtensionStructure<R, S>,
        incoming: usize,
    ) -> ReconstructionVector;

    /// The task that empties the buffer into level 0.
    fn flush_task(&self) -> ReconstructionTask;
}

/// Level capacity shared by the capacity-driven policies.
fn level_capacity(buffer_size: usize, scale_factor: usize, level: usize) -> usize {
    buffer_size * scale_factor.pow(level as u32 + 1)
}
