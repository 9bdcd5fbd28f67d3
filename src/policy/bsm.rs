//! Bentley–Saxe layout: binary decomposition, whole-prefix collapses.

use crate::policy::{
    level_capacity, ReconstructionKind, ReconstructionPolicy, ReconstructionTask,
    ReconstructionVector, ShardSlot, SourceId,
};
use crate::record::Record;
use crate::shard::Shard;
use crate::structure::ExtensionStructure;

/// The scale factor is fixed at 2, giving the classical geometric sequence
/// of sub-indexes. A reconstruction collapses every populated level from 0
/// up to the shallowest level that can absorb them into a single shard at
/// that level.
pub struct BsmPolicy {
    buffer_size: usize,
}

/// Bentley–Saxe only works with a doubling sequence.
pub const BSM_SCALE_FACTOR: usize = 2;

impl BsmPolicy {
    pub fn new(buffer_size: usize) -> Self {
        Self { buffer_size }
    }

    fn capacity(&self, level: usize) -> usize {
        level_capacity(self.buffer_size, BSM_SCALE_FACTOR, level)
    }
}

impl<R: Record, S: Shard<R>> ReconstructionPolicy<R, S> for BsmPolicy {
    fn reconstruction_tasks(
        &self,
        structure: &ExtensionStructure<R, S>,
        incoming: usize,
    ) -> ReconstructionVector {
        // Shallowest level that can hold its own records plus everything
        // arriving from above; inclusive comparison, unlike leveling.
        let mut target = structure.height();
        for i in 0..structure.height() {
            let reccnt = structure.level(i).map_or(0, |l| l.record_count());
            if reccnt + incoming <= self.capacity(i) {
                target = i;
                break;
            }
        }

        let mut tasks = ReconstructionVector::new();
        if target == 0 {
            // The flush's merge into level 0 is the whole reconstruction.
            return tasks;
        }

        let mut task = ReconstructionTask::new(target, ReconstructionKind::Merge);
        for level in 0..=target.min(structure.height().saturating_sub(1)) {
            let reccnt = structure.level(level).map_or(0, |l| l.record_count());
            if reccnt > 0 {
                task.add_source(
                    SourceId::Level {
                        level,
                        shards: ShardSlot::All,
                    },
                    reccnt,
                );
            }
        }
        if !task.sources.is_empty() {
            tasks.push(task);
        }
        tasks
    }

    fn flush_task(&self) -> ReconstructionTask {
        let mut task = ReconstructionTask::new(0, ReconstructionKind::Flush);
        task.add_source(SourceId::Buffer, self.buffer_size);
        task
    }
}
