//! The leveled shard hierarchy.
//!
//! An extension structure is an ordered list of levels, indexed from 0
//! (closest to the buffer). Cloning is shallow: the clone owns its level
//! list but shares the underlying shards, so a clone can be restructured
//! by reconstructions without disturbing the original. The only mutation
//! that crosses a clone boundary is the delete tag on a shared shard,
//! which is why tagging is confined to the serial scheduler.

mod level;

pub use level::InternalLevel;

use anyhow::Context;
use std::sync::Arc;

use crate::buffer::BufferView;
use crate::policy::{
    ReconstructionKind, ReconstructionTask, ReconstructionVector, ShardSlot, SourceId,
};
use crate::query::Query;
use crate::record::Record;
use crate::shard::Shard;

pub struct ExtensionStructure<R: Record, S: Shard<R>> {
    levels: Vec<InternalLevel<R, S>>,
}

impl<R: Record, S: Shard<R>> Default for ExtensionStructure<R, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record, S: Shard<R>> ExtensionStructure<R, S> {
    pub fn new() -> Self {
        Self { levels: Vec::new() }
    }

    /// Number of levels, populated or not.
    pub fn height(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, idx: usize) -> Option<&InternalLevel<R, S>> {
        self.levels.get(idx)
    }

    pub fn levels(&self) -> &[InternalLevel<R, S>] {
        &self.levels
    }

    pub fn record_count(&self) -> usize {
        self.levels.iter().map(|l| l.record_count()).sum()
    }

    pub fn tombstone_count(&self) -> usize {
        self.levels.iter().map(|l| l.tombstone_count()).sum()
    }

    pub fn memory_usage(&self) -> usize {
        self.levels.iter().map(|l| l.memory_usage()).sum()
    }

    pub fn aux_memory_usage(&self) -> usize {
        self.levels.iter().map(|l| l.aux_memory_usage()).sum()
    }

    /// Shallow copy: new level list, shared shards.
    pub fn shallow_clone(&self) -> Self {
        Self {
            levels: self.levels.iter().map(|l| l.clone_level()).collect(),
        }
    }

    /// Tag the first live record equal to `rec`, walking levels from the
    /// shallowest down. The caller falls back to the buffer on a miss.
    pub fn tagged_delete(&self, rec: &R) -> bool {
        self.levels.iter().any(|level| level.delete_record(rec))
    }

    /// Apply one planned merge: gather the source shards, merge them into
    /// a new shard, drop the sources from their levels, and append the
    /// result to the target level (growing the structure when the target
    /// is one past the end).
    pub fn perform_reconstruction(&mut self, task: &ReconstructionTask) -> anyhow::Result<()> {
        let mut inputs: Vec<Arc<S>> = Vec::new();
        for source in &task.sources {
            let SourceId::Level { level, shards } = source else {
                continue;
            };
            let level = self
                .levels
                .get(*level)
                .with_context(|| format!("reconstruction source level {level} out of range"))?;
            match shards {
                ShardSlot::All => inputs.extend(level.shards().iter().cloned()),
                ShardSlot::At(idx) => {
                    let shard = level
                        .shard(*idx)
                        .with_context(|| format!("source shard {idx} out of range"))?;
                    inputs.push(Arc::clone(shard));
                }
            }
        }

        if inputs.is_empty() {
            return Ok(());
        }

        let refs: Vec<&S> = inputs.iter().map(Arc::as_ref).collect();
        let merged = S::merge(&refs).context("merge reconstruction sources")?;

        for source in &task.sources {
            let SourceId::Level { level, shards } = source else {
                continue;
            };
            match shards {
                ShardSlot::All => self.levels[*level].truncate(),
                ShardSlot::At(idx) => self.levels[*level].remove(*idx),
            }
        }

        if task.target == self.levels.len() {
            self.levels.push(InternalLevel::new(task.target));
        }
        self.levels[task.target].append(Arc::new(merged));
        Ok(())
    }

    /// Empty a buffer view into level 0. An `Append` flush adds the buffer
    /// shard as-is; any other kind merges it with level 0's current
    /// contents so the level keeps a single shard.
    pub fn perform_flush(
        &mut self,
        task: &ReconstructionTask,
        view: &BufferView<R>,
    ) -> anyhow::Result<()> {
        if view.record_count() == 0 {
            return Ok(());
        }

        let buffer_shard = S::build(view).context("build shard from buffer")?;
        if self.levels.is_empty() {
            self.levels.push(InternalLevel::new(0));
        }

        match task.kind {
            ReconstructionKind::Append => {
                self.levels[0].append(Arc::new(buffer_shard));
            }
            _ => {
                let mut inputs: Vec<Arc<S>> = self.levels[0].shards().to_vec();
                inputs.push(Arc::new(buffer_shard));
                let refs: Vec<&S> = inputs.iter().map(Arc::as_ref).collect();
                let merged = S::merge(&refs).context("merge buffer into level 0")?;
                self.levels[0].truncate();
                self.levels[0].append(Arc::new(merged));
            }
        }
        Ok(())
    }

    /// Build the per-shard local queries for a fan-out, shallowest level
    /// first, oldest shard first within a level.
    pub fn local_queries<Q: Query<R, S>>(
        &self,
        parms: &Q::Parameters,
    ) -> (Vec<Arc<S>>, Vec<Q::LocalQuery>) {
        let mut shards = Vec::new();
        let mut locals = Vec::new();
        for level in &self.levels {
            for shard in level.shards() {
                locals.push(Q::local_preproc(shard, parms));
                shards.push(Arc::clone(shard));
            }
        }
        (shards, locals)
    }

    /// Whether every level's tombstone proportion is within `max_prop`.
    pub fn validate_tombstone_proportion(&self, max_prop: f64) -> bool {
        self.levels
            .iter()
            .all(|l| l.tombstone_proportion() <= max_prop)
    }

    #[cfg(test)]
    pub(crate) fn push_level(&mut self, level: InternalLevel<R, S>) {
        self.levels.push(level);
    }

    /// One in-place compaction task per level over its tombstone bound.
    pub fn compaction_tasks(&self, max_prop: f64) -> ReconstructionVector {
        let mut tasks = ReconstructionVector::new();
        for level in &self.levels {
            if level.tombstone_proportion() > max_prop {
                let mut task =
                    ReconstructionTask::new(level.level_no(), ReconstructionKind::Compact);
                task.add_source(
                    SourceId::Level {
                        level: level.level_no(),
                        shards: ShardSlot::All,
                    },
                    level.record_count(),
                );
                tasks.push(task);
            }
        }
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MutableBuffer;
    use crate::record::Pair;
    use crate::shard::IsamShard;

    type Rec = Pair<u64, u32>;
    type Structure = ExtensionStructure<Rec, IsamShard<Rec>>;

    fn shard_of(keys: &[u64]) -> Arc<IsamShard<Rec>> {
        let buffer = Arc::new(MutableBuffer::new(1, keys.len().max(1)));
        for &key in keys {
            buffer.append(Pair::new(key, 0), false);
        }
        Arc::new(IsamShard::build(&buffer.view()).unwrap())
    }

    fn structure_with_levels(levels: &[&[&[u64]]]) -> Structure {
        let mut structure = Structure::new();
        for (idx, shards) in levels.iter().enumerate() {
            let mut level = InternalLevel::new(idx);
            for keys in shards.iter() {
                level.append(shard_of(keys));
            }
            structure.levels.push(level);
        }
        structure
    }

    fn merge_all_task(source: usize, target: usize) -> ReconstructionTask {
        let mut task = ReconstructionTask::new(target, ReconstructionKind::Merge);
        task.add_source(
            SourceId::Level {
                level: source,
                shards: ShardSlot::All,
            },
            0,
        );
        task
    }

    #[test]
    fn reconstruction_moves_a_level_down() {
        let mut structure = structure_with_levels(&[&[&[1, 2], &[3, 4]]]);
        structure.perform_reconstruction(&merge_all_task(0, 1)).unwrap();

        assert_eq!(structure.height(), 2);
        assert_eq!(structure.level(0).unwrap().shard_count(), 0);
        assert_eq!(structure.level(1).unwrap().shard_count(), 1);
        assert_eq!(structure.level(1).unwrap().record_count(), 4);
    }

    #[test]
    fn reconstruction_merges_target_when_sourced() {
        let mut structure = structure_with_levels(&[&[&[1, 2]], &[&[3, 4]]]);
        let mut task = merge_all_task(0, 1);
        task.add_source(
            SourceId::Level {
                level: 1,
                shards: ShardSlot::All,
            },
            0,
        );
        structure.perform_reconstruction(&task).unwrap();

        assert_eq!(structure.level(0).unwrap().shard_count(), 0);
        assert_eq!(structure.level(1).unwrap().shard_count(), 1);
        assert_eq!(structure.level(1).unwrap().record_count(), 4);
    }

    #[test]
    fn empty_sources_are_a_no_op() {
        let mut structure = structure_with_levels(&[&[]]);
        structure.perform_reconstruction(&merge_all_task(0, 1)).unwrap();
        assert_eq!(structure.height(), 1);
    }

    #[test]
    fn append_flush_stacks_shards() {
        let buffer = Arc::new(MutableBuffer::new(1, 8));
        for key in [1u64, 2] {
            buffer.append(Pair::new(key, 0), false);
        }

        let mut structure = structure_with_levels(&[&[&[5, 6]]]);
        let task = ReconstructionTask::new(0, ReconstructionKind::Append);
        structure.perform_flush(&task, &buffer.view()).unwrap();

        assert_eq!(structure.level(0).unwrap().shard_count(), 2);
        assert_eq!(structure.record_count(), 4);
    }

    #[test]
    fn merge_flush_keeps_one_shard() {
        let buffer = Arc::new(MutableBuffer::new(1, 8));
        for key in [1u64, 2] {
            buffer.append(Pair::new(key, 0), false);
        }

        let mut structure = structure_with_levels(&[&[&[5, 6]]]);
        let task = ReconstructionTask::new(0, ReconstructionKind::Merge);
        structure.perform_flush(&task, &buffer.view()).unwrap();

        assert_eq!(structure.level(0).unwrap().shard_count(), 1);
        assert_eq!(structure.record_count(), 4);
    }

    #[test]
    fn clone_restructures_independently() {
        let structure = structure_with_levels(&[&[&[1, 2], &[3, 4]]]);
        let mut clone = structure.shallow_clone();
        clone.perform_reconstruction(&merge_all_task(0, 1)).unwrap();

        assert_eq!(structure.height(), 1);
        assert_eq!(structure.level(0).unwrap().shard_count(), 2);
        assert_eq!(clone.height(), 2);
    }

    #[test]
    fn tagged_delete_walks_levels_in_order() {
        let structure = structure_with_levels(&[&[&[1]], &[&[1]]]);
        assert!(structure.tagged_delete(&Pair::new(1, 0)));

        let first = structure.level(0).unwrap().shard(0).unwrap();
        assert!(first.point_lookup(&Pair::new(1, 0), false).unwrap().is_deleted());
        let second = structure.level(1).unwrap().shard(0).unwrap();
        assert!(!second.point_lookup(&Pair::new(1, 0), false).unwrap().is_deleted());
    }

    #[test]
    fn compaction_tasks_cover_levels_over_bound() {
        let buffer = Arc::new(MutableBuffer::new(1, 4));
        buffer.append(Pair::new(1u64, 0u32), true);
        let ts_shard = Arc::new(IsamShard::build(&buffer.view()).unwrap());

        let mut structure = structure_with_levels(&[&[&[2, 3]]]);
        let mut tombstone_level = InternalLevel::new(1);
        tombstone_level.append(ts_shard);
        structure.levels.push(tombstone_level);

        assert!(!structure.validate_tombstone_proportion(0.5));
        let tasks = structure.compaction_tasks(0.5);
        assert_eq!(tasks.len(), 1);
        let task = tasks.iter().next().unwrap();
        assert_eq!(task.target, 1);
        assert_eq!(task.kind, ReconstructionKind::Compact);
    }
}
