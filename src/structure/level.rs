//! A single level of the shard hierarchy.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::record::Record;
use crate::shard::Shard;

/// An ordered run of shards at one level. Under leveling a level holds at
/// most one shard; under tiering it accumulates up to the scale factor.
/// Shards are shared: a cloned level references the same shard objects as
/// its parent until one of them reconstructs past them.
pub struct InternalLevel<R: Record, S: Shard<R>> {
    level_no: usize,
    shards: Vec<Arc<S>>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record, S: Shard<R>> InternalLevel<R, S> {
    pub fn new(level_no: usize) -> Self {
        Self {
            level_no,
            shards: Vec::new(),
            _record: PhantomData,
        }
    }

    pub fn level_no(&self) -> usize {
        self.level_no
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shards(&self) -> &[Arc<S>] {
        &self.shards
    }

    pub fn shard(&self, idx: usize) -> Option<&Arc<S>> {
        self.shards.get(idx)
    }

    pub fn append(&mut self, shard: Arc<S>) {
        self.shards.push(shard);
    }

    pub fn truncate(&mut self) {
        self.shards.clear();
    }

    pub fn remove(&mut self, idx: usize) {
        self.shards.remove(idx);
    }

    pub fn record_count(&self) -> usize {
        self.shards.iter().map(|s| s.record_count()).sum()
    }

    pub fn tombstone_count(&self) -> usize {
        self.shards.iter().map(|s| s.tombstone_count()).sum()
    }

    pub fn memory_usage(&self) -> usize {
        self.shards.iter().map(|s| s.memory_usage()).sum()
    }

    pub fn aux_memory_usage(&self) -> usize {
        self.shards.iter().map(|s| s.aux_memory_usage()).sum()
    }

    /// Fraction of the level's records that are tombstones.
    pub fn tombstone_proportion(&self) -> f64 {
        let tombstones = self.tombstone_count();
        let records = self.record_count();
        if records == 0 {
            0.0
        } else {
            tombstones as f64 / records as f64
        }
    }

    /// Merge every shard of the level into a single new shard, leaving the
    /// level itself untouched.
    pub fn combined_shard(&self) -> anyhow::Result<Option<S>> {
        if self.shards.is_empty() {
            return Ok(None);
        }
        let refs: Vec<&S> = self.shards.iter().map(Arc::as_ref).collect();
        S::merge(&refs).map(Some)
    }

    /// Tag the first live match, scanning shards oldest to newest.
    pub fn delete_record(&self, rec: &R) -> bool {
        for shard in &self.shards {
            if let Some(w) = shard.point_lookup(rec, false) {
                w.set_delete();
                return true;
            }
        }
        false
    }

    /// A new level sharing this level's shard references.
    pub fn clone_level(&self) -> Self {
        Self {
            level_no: self.level_no,
            shards: self.shards.clone(),
            _record: PhantomData,
        }
    }
}
