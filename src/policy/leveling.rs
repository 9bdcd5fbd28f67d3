//! Leveling layout: one shard per level, merged down on overflow.

use crate::policy::{
    level_capacity, ReconstructionKind, ReconstructionPolicy, ReconstructionTask,
    ReconstructionVector, ShardSlot, SourceId,
};
use crate::record::Record;
use crate::shard::Shard;
use crate::structure::ExtensionStructure;

/// A level overflows when its record count plus the records about to
/// arrive reaches `buffer_size * scale_factor^(level+1)`. Reconstruction
/// walks from the shallowest level with room back down to level 1, merging
/// each level into the one below it; the flush then merges the buffer with
/// whatever remains at level 0.
pub struct LevelingPolicy {
    scale_factor: usize,
    buffer_size: usize,
}

impl LevelingPolicy {
    pub fn new(scale_factor: usize, buffer_size: usize) -> Self {
        Self {
            scale_factor,
            buffer_size,
        }
    }

    fn capacity(&self, level: usize) -> usize {
        level_capacity(self.buffer_size, self.scale_factor, level)
    }
}

impl<R: Record, S: Shard<R>> ReconstructionPolicy<R, S> for LevelingPolicy {
    fn reconstruction_tasks(
        &self,
        structure: &ExtensionStructure<R, S>,
        incoming: usize,
    ) -> ReconstructionVector {
        // The records pushed into each level are the full contents of the
        // level above it, so the carried count updates as we descend.
        let mut incoming = incoming;
        let mut target = structure.height();
        for i in 0..structure.height() {
            let reccnt = structure.level(i).map_or(0, |l| l.record_count());
            if reccnt + incoming < self.capacity(i) {
                target = i;
                break;
            }
            incoming = reccnt;
        }

        let mut tasks = ReconstructionVector::new();
        for level in (1..=target).rev() {
            let source_reccnt = structure
                .level(level - 1)
                .map_or(0, |l| l.record_count());
            let target_reccnt = structure.level(level).map_or(0, |l| l.record_count());

            let mut task = ReconstructionTask::new(level, ReconstructionKind::Merge);
            task.add_source(
                SourceId::Level {
                    level: level - 1,
                    shards: ShardSlot::All,
                },
                source_reccnt,
            );
            if target_reccnt > 0 {
                task.add_source(
                    SourceId::Level {
                        level,
                        shards: ShardSlot::All,
                    },
                    target_reccnt,
                );
            }
            tasks.push(task);
        }
        tasks
    }

    fn flush_task(&self) -> ReconstructionTask {
        let mut task = ReconstructionTask::new(0, ReconstructionKind::Merge);
        task.add_source(SourceId::Buffer, self.buffer_size);
        task
    }
}
