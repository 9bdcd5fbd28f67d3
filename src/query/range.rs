//! Single-dimensional range query over ordered shards.

use std::collections::BinaryHeap;
use std::marker::PhantomData;

use crate::buffer::BufferView;
use crate::query::Query;
use crate::record::{KeyedRecord, Wrapped};
use crate::shard::OrderedShard;

/// Inclusive key range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeParams<K> {
    pub lower_bound: K,
    pub upper_bound: K,
}

pub struct RangeLocal<K> {
    start_idx: usize,
    parms: RangeParams<K>,
}

pub struct RangeBufferLocal<R: KeyedRecord> {
    view: BufferView<R>,
    parms: RangeParams<R::Key>,
}

/// Range query implementation for any ordered shard. Local queries skip
/// tagged records, and `combine` merge-sorts the per-shard runs while
/// cancelling tombstones against the live records they match.
pub struct RangeQuery<R, S> {
    _marker: PhantomData<fn() -> (R, S)>,
}

/// Merge-heap entry; ties between runs break by run index.
struct Head<'a, R: KeyedRecord> {
    w: &'a Wrapped<R>,
    src: usize,
    idx: usize,
}

impl<R: KeyedRecord> PartialEq for Head<'_, R> {
    fn eq(&self, other: &Self) -> bool {
        self.w == other.w && self.src == other.src
    }
}

impl<R: KeyedRecord> Eq for Head<'_, R> {}

impl<R: KeyedRecord> PartialOrd for Head<'_, R> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<R: KeyedRecord> Ord for Head<'_, R> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.w
            .cmp(other.w)
            .then_with(|| self.src.cmp(&other.src))
            .reverse()
    }
}

fn push_next<'a, R: KeyedRecord>(
    heap: &mut BinaryHeap<Head<'a, R>>,
    runs: &[&'a [Wrapped<R>]],
    src: usize,
    idx: usize,
) {
    if let Some(w) = runs[src].get(idx + 1) {
        heap.push(Head {
            w,
            src,
            idx: idx + 1,
        });
    }
}

impl<R, S> Query<R, S> for RangeQuery<R, S>
where
    R: KeyedRecord,
    S: OrderedShard<R>,
{
    type Parameters = RangeParams<R::Key>;
    type LocalQuery = RangeLocal<R::Key>;
    type BufferQuery = RangeBufferLocal<R>;
    type LocalResult = Vec<Wrapped<R>>;
    type Result = Vec<R>;

    const EARLY_ABORT: bool = false;
    const SKIP_DELETE_FILTER: bool = true;

    fn local_preproc(shard: &S, parms: &Self::Parameters) -> Self::LocalQuery {
        RangeLocal {
            start_idx: shard.lower_bound(&parms.lower_bound),
            parms: *parms,
        }
    }

    fn local_preproc_buffer(view: BufferView<R>, parms: &Self::Parameters) -> Self::BufferQuery {
        RangeBufferLocal {
            view,
            parms: *parms,
        }
    }

    fn distribute_query(
        _parms: &Self::Parameters,
        _locals: &mut [Self::LocalQuery],
        _buffer_query: &mut Self::BufferQuery,
    ) {
    }

    fn local_query(shard: &S, local: &Self::LocalQuery) -> Self::LocalResult {
        let records = shard.records();
        records[local.start_idx.min(records.len())..]
            .iter()
            .take_while(|w| w.record().key() <= local.parms.upper_bound)
            .filter(|w| !w.is_deleted())
            .cloned()
            .collect()
    }

    fn local_query_buffer(buffer_query: &Self::BufferQuery) -> Self::LocalResult {
        let parms = &buffer_query.parms;
        let mut result: Vec<Wrapped<R>> = buffer_query
            .view
            .iter()
            .filter(|w| {
                let key = w.record().key();
                key >= parms.lower_bound && key <= parms.upper_bound && !w.is_deleted()
            })
            .map(|w| (*w).clone())
            .collect();
        // The buffer is in append order; combine expects sorted runs.
        result.sort();
        result
    }

    fn combine(
        results: Vec<Self::LocalResult>,
        _parms: &Self::Parameters,
        output: &mut Self::Result,
    ) {
        let runs: Vec<&[Wrapped<R>]> = results.iter().map(Vec::as_slice).collect();

        let mut heap: BinaryHeap<Head<'_, R>> = BinaryHeap::with_capacity(runs.len());
        for (src, run) in runs.iter().enumerate() {
            if let Some(w) = run.first() {
                heap.push(Head { w, src, idx: 0 });
            }
        }

        output.reserve(runs.iter().map(|r| r.len()).sum());
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

            if !now.w.is_tombstone() {
                output.push(now.w.record().clone());
            }
            push_next(&mut heap, &runs, now.src, now.idx);
        }
    }

    fn local_result_is_empty(result: &Self::LocalResult) -> bool {
        result.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MutableBuffer;
    use crate::record::Pair;
    use crate::shard::{IsamShard, Shard};
    use std::sync::Arc;

    type Rec = Pair<u64, u32>;
    type Shard_ = IsamShard<Rec>;
    type Rq = RangeQuery<Rec, Shard_>;

    fn rec(key: u64) -> Rec {
        Pair::new(key, 0)
    }

    fn shard_of(keys: &[u64]) -> Shard_ {
        let buffer = Arc::new(MutableBuffer::new(1, keys.len().max(1)));
        for &key in keys {
            buffer.append(rec(key), false);
        }
        Shard_::build(&buffer.view()).unwrap()
    }

    fn parms(lo: u64, hi: u64) -> RangeParams<u64> {
        RangeParams {
            lower_bound: lo,
            upper_bound: hi,
        }
    }

    #[test]
    fn shard_query_respects_bounds() {
        let shard = shard_of(&[1, 3, 5, 7, 9]);
        let parms = parms(3, 7);
        let local = Rq::local_preproc(&shard, &parms);
        let result = Rq::local_query(&shard, &local);
        let keys: Vec<u64> = result.iter().map(|w| w.record().key).collect();
        assert_eq!(keys, vec![3, 5, 7]);
    }

    #[test]
    fn buffer_query_sorts_its_run() {
        let buffer = Arc::new(MutableBuffer::new(1, 8));
        for key in [9u64, 2, 7, 4] {
            buffer.append(rec(key), false);
        }
        let parms = parms(0, 10);
        let buffer_query = Rq::local_preproc_buffer(buffer.view(), &parms);
        let result = Rq::local_query_buffer(&buffer_query);
        let keys: Vec<u64> = result.iter().map(|w| w.record().key).collect();
        assert_eq!(keys, vec![2, 4, 7, 9]);
    }

    #[test]
    fn combine_merges_runs_in_order() {
        let a = shard_of(&[1, 4]);
        let b = shard_of(&[2, 3]);
        let parms = parms(0, 10);
        let results = vec![
            Rq::local_query(&a, &Rq::local_preproc(&a, &parms)),
            Rq::local_query(&b, &Rq::local_preproc(&b, &parms)),
        ];
        let mut output = Vec::new();
        Rq::combine(results, &parms, &mut output);
        let keys: Vec<u64> = output.iter().map(|r| r.key).collect();
        assert_eq!(keys, vec![1, 2, 3, 4]);
    }

    #[test]
    fn combine_cancels_tombstones_across_runs() {
        let live = shard_of(&[1, 2, 3]);

        let buffer = Arc::new(MutableBuffer::new(1, 2));
        buffer.append(rec(2), true);
        let deletes = Shard_::build(&buffer.view()).unwrap();

        let parms = parms(0, 10);
        let results = vec![
            Rq::local_query(&live, &Rq::local_preproc(&live, &parms)),
            Rq::local_query(&deletes, &Rq::local_preproc(&deletes, &parms)),
        ];
        let mut output = Vec::new();
        Rq::combine(results, &parms, &mut output);
        let keys: Vec<u64> = output.iter().map(|r| r.key).collect();
        assert_eq!(keys, vec![1, 3]);
    }

    #[test]
    fn tagged_records_are_invisible() {
        let shard = shard_of(&[1, 2, 3]);
        shard.point_lookup(&rec(2), false).unwrap().set_delete();

        let parms = parms(0, 10);
        let result = Rq::local_query(&shard, &Rq::local_preproc(&shard, &parms));
        let keys: Vec<u64> = result.iter().map(|w| w.record().key).collect();
        assert_eq!(keys, vec![1, 3]);
    }
}
