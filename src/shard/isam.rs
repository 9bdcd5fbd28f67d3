//! Sorted-array shard.
//!
//! The reference shard implementation: a sorted run of wrapped records
//! with binary-search lower bounds and a bloom filter over tombstone keys.
//! Bulk construction sorts the buffer's records; merge construction runs a
//! k-way heap merge over already-sorted inputs. Both cancel a tombstone
//! against the live record it lands next to and drop tagged records, so a
//! delete's space is reclaimed the first time it participates in a
//! reconstruction.

use std::collections::BinaryHeap;

use crate::bloom::{BloomFilter, TOMBSTONE_FPR};
use crate::buffer::BufferView;
use crate::record::{KeyedRecord, WeightedRecord, Wrapped};
use crate::shard::{OrderedShard, Shard, WeightedShard};

pub struct IsamShard<R: KeyedRecord> {
    data: Vec<Wrapped<R>>,
    tombstones: usize,
    total_weight: f64,
    tombstone_filter: BloomFilter,
}

impl<R: KeyedRecord> IsamShard<R> {
    fn from_sorted(sorted: Vec<Wrapped<R>>, expected_tombstones: usize) -> Self {
        let tombstone_filter = BloomFilter::new(TOMBSTONE_FPR, expected_tombstones);
        let mut data = Vec::with_capacity(sorted.len());
        let mut tombstones = 0;
        let mut total_weight = 0.0;

        let mut i = 0;
        while i < sorted.len() {
            let w = &sorted[i];
            // A live record immediately followed by its tombstone: both
            // annihilate.
            if !w.is_tombstone()
                && sorted
                    .get(i + 1)
                    .is_some_and(|n| n.is_tombstone() && n.record() == w.record())
            {
                i += 2;
                continue;
            }
            if w.is_deleted() {
                i += 1;
                continue;
            }

            if w.is_tombstone() {
                tombstones += 1;
                tombstone_filter.insert(&w.record().key());
            } else {
                total_weight += w.record().weight();
            }
            data.push(w.rebased());
            i += 1;
        }

        Self {
            data,
            tombstones,
            total_weight,
            tombstone_filter,
        }
    }
}

/// Heap entry for the k-way merge; ties between sources break by source
/// index so the merge is deterministic.
struct MergeHead<'a, R: KeyedRecord> {
    w: &'a Wrapped<R>,
    src: usize,
    idx: usize,
}

impl<R: KeyedRecord> PartialEq for MergeHead<'_, R> {
    fn eq(&self, other: &Self) -> bool {
        self.w == other.w && self.src == other.src
    }
}

impl<R: KeyedRecord> Eq for MergeHead<'_, R> {}

impl<R: KeyedRecord> PartialOrd for MergeHead<'_, R> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<R: KeyedRecord> Ord for MergeHead<'_, R> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed: BinaryHeap is a max-heap and the merge wants the
        // smallest envelope first.
        self.w
            .cmp(other.w)
            .then_with(|| self.src.cmp(&other.src))
            .reverse()
    }
}

fn push_next<'a, R: KeyedRecord>(
    heap: &mut BinaryHeap<MergeHead<'a, R>>,
    runs: &[&'a [Wrapped<R>]],
    src: usize,
    idx: usize,
) {
    if let Some(w) = runs[src].get(idx + 1) {
        heap.push(MergeHead {
            w,
            src,
            idx: idx + 1,
        });
    }
}

impl<R: KeyedRecord> Shard<R> for IsamShard<R> {
    fn build(view: &BufferView<R>) -> anyhow::Result<Self> {
        let mut sorted: Vec<Wrapped<R>> = view.iter().map(|w| (*w).clone()).collect();
        sorted.sort();
        Ok(Self::from_sorted(sorted, view.tombstone_count()))
    }

    fn merge(shards: &[&Self]) -> anyhow::Result<Self> {
        let total: usize = shards.iter().map(|s| s.record_count()).sum();
        let expected_tombstones: usize = shards.iter().map(|s| s.tombstone_count()).sum();
        let runs: Vec<&[Wrapped<R>]> = shards.iter().map(|s| s.data.as_slice()).collect();

        let mut heap: BinaryHeap<MergeHead<'_, R>> = BinaryHeap::with_capacity(runs.len());
        for (src, run) in runs.iter().enumerate() {
            if let Some(w) = run.first() {
                heap.push(MergeHead { w, src, idx: 0 });
            }
        }

        let mut out = Vec::with_capacity(total);
        while let Some(now) = heap.pop() {
            let cancels = !now.w.is_tombstone()
                && heap
                    .peek()
                    .is_some_and(|n| n.w.is_tombstone() && n.w.record() == now.w.record());
            if cancels {
                if let Some(ts) = heap.pop() {
                    push_next(&mut heap, &runs, ts.src, ts.idx);
                }
                push_next(&mut heap, &runs, now.src, now.idx);
                continue;
            }

            if !now.w.is_deleted() {
                out.push(now.w.clone());
            }
            push_next(&mut heap, &runs, now.src, now.idx);
        }

        Ok(Self::from_sorted(out, expected_tombstones))
    }

    fn record_count(&self) -> usize {
        self.data.len()
    }

    fn tombstone_count(&self) -> usize {
        self.tombstones
    }

    fn memory_usage(&self) -> usize {
        self.data.capacity() * std::mem::size_of::<Wrapped<R>>()
    }

    fn aux_memory_usage(&self) -> usize {
        self.tombstone_filter.memory_usage()
    }

    fn point_lookup(&self, rec: &R, prefilter: bool) -> Option<&Wrapped<R>> {
        if prefilter && !self.tombstone_filter.contains(&rec.key()) {
            return None;
        }

        let mut idx = self.lower_bound(&rec.key());
        while idx < self.data.len() && self.data[idx].record() < rec {
            idx += 1;
        }
        self.data.get(idx).filter(|w| w.record() == rec)
    }
}

impl<R: KeyedRecord> OrderedShard<R> for IsamShard<R> {
    fn lower_bound(&self, key: &R::Key) -> usize {
        self.data.partition_point(|w| w.record().key() < *key)
    }

    fn record_at(&self, idx: usize) -> Option<&Wrapped<R>> {
        self.data.get(idx)
    }

    fn records(&self) -> &[Wrapped<R>] {
        &self.data
    }
}

impl<R: KeyedRecord + WeightedRecord> WeightedShard<R> for IsamShard<R> {
    fn total_weight(&self) -> f64 {
        self.total_weight
    }
}
