//! Query capability contract.
//!
//! A query type describes how a global question decomposes over an epoch
//! snapshot: a local query is preprocessed per shard, one more covers the
//! buffer view, `distribute_query` may rebalance work between them (e.g.
//! sample-size allocation), the local queries execute, and `combine`
//! folds the local results into the output. `repeat` lets a query iterate
//! against the same snapshot until it is satisfied; it never re-pins.

pub mod range;

pub use range::{RangeParams, RangeQuery};

use crate::buffer::BufferView;
use crate::record::Record;
use crate::shard::Shard;

pub trait Query<R: Record, S: Shard<R>>: 'static {
    type Parameters: Send + 'static;
    type LocalQuery: Send;
    type BufferQuery: Send;
    type LocalResult: Send;
    type Result: Default + Send + 'static;

    /// Stop executing local queries as soon as one produces a result.
    const EARLY_ABORT: bool = false;

    /// The query filters deleted records itself (in its local queries or
    /// `combine`); the framework performs no extra delete filtering.
    const SKIP_DELETE_FILTER: bool = false;

    fn local_preproc(shard: &S, parms: &Self::Parameters) -> Self::LocalQuery;

    /// The buffer query takes ownership of the view; dropping it releases
    /// the view's pin.
    fn local_preproc_buffer(view: BufferView<R>, parms: &Self::Parameters) -> Self::BufferQuery;

    /// Rebalance work across the local queries before execution.
    fn distribute_query(
        parms: &Self::Parameters,
        locals: &mut [Self::LocalQuery],
        buffer_query: &mut Self::BufferQuery,
    );

    fn local_query(shard: &S, local: &Self::LocalQuery) -> Self::LocalResult;

    fn local_query_buffer(buffer_query: &Self::BufferQuery) -> Self::LocalResult;

    /// Fold local results into the output, translating local record
    /// envelopes into the user-facing result type.
    fn combine(results: Vec<Self::LocalResult>, parms: &Self::Parameters, output: &mut Self::Result);

    /// Whether to run the local queries again against the same snapshot.
    fn repeat(
        _parms: &Self::Parameters,
        _output: &mut Self::Result,
        _locals: &mut [Self::LocalQuery],
        _buffer_query: &mut Self::BufferQuery,
    ) -> bool {
        false
    }

    /// Consulted by `EARLY_ABORT` to decide whether a local result counts
    /// as a hit.
    fn local_result_is_empty(_result: &Self::LocalResult) -> bool {
        true
    }
}
