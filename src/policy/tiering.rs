//! Tiering layout: levels accumulate shards and merge down in bulk.

use crate::policy::{
    ReconstructionKind, ReconstructionPolicy, ReconstructionTask, ReconstructionVector, ShardSlot,
    SourceId,
};
use crate::record::Record;
use crate::shard::Shard;
use crate::structure::ExtensionStructure;

/// A level is full once it holds `scale_factor` shards; reconstruction
/// merges each full level's shards into a single shard appended to the
/// level below it.
pub struct TieringPolicy {
    scale_factor: usize,
    buffer_size: usize,
}

impl TieringPolicy {
    pub fn new(scale_factor: usize, buffer_size: usize) -> Self {
        Self {
            scale_factor,
            buffer_size,
        }
    }
}

impl<R: Record, S: Shard<R>> ReconstructionPolicy<R, S> for TieringPolicy {
    fn reconstruction_tasks(
        &self,
        structure: &ExtensionStructure<R, S>,
        _incoming: usize,
    ) -> ReconstructionVector {
        // Shallowest level with room for one more shard; grow if none.
        let target = (0..structure.height())
            .find(|&i| {
                structure
                    .level(i)
                    .is_some_and(|l| l.shard_count() < self.scale_factor)
            })
            .unwrap_or(structure.height());

        let mut tasks = ReconstructionVector::new();
        for level in (1..=target).rev() {
            let reccnt = structure
                .level(level - 1)
                .map_or(0, |l| l.record_count());
            let mut task = ReconstructionTask::new(level, ReconstructionKind::Merge);
            task.add_source(
                SourceId::Level {
                    level: level - 1,
                    shards: ShardSlot::All,
                },
                reccnt,
            );
            tasks.push(task);
        }
        tasks
    }

    fn flush_task(&self) -> ReconstructionTask {
        let mut task = ReconstructionTask::new(0, ReconstructionKind::Append);
        task.add_source(SourceId::Buffer, self.buffer_size);
        task
    }
}
