//! Point-in-time view over a buffer's populated range.

use std::sync::Arc;

use crate::record::{Record, Wrapped};

use super::MutableBuffer;

/// A read-only snapshot of the buffer over `[head, tail)` as captured at
/// creation. The view keeps its head pinned in the buffer, which blocks
/// head advancement (and thus slot reuse) for its range until it is
/// dropped; release happens on every exit path of the holder.
#[derive(Debug)]
pub struct BufferView<R: Record> {
    buffer: Arc<MutableBuffer<R>>,
    head: u64,
    tail: u64,
}

impl<R: Record> BufferView<R> {
    pub(crate) fn new(buffer: Arc<MutableBuffer<R>>, head: u64, tail: u64) -> Self {
        Self { buffer, head, tail }
    }

    /// Record at offset `i` within the view, or `None` past the snapshot
    /// tail. In-range reads are well-defined even while appends continue
    /// past the view: a writer that reserved the slot but has not yet
    /// published is waited out.
    pub fn get(&self, i: usize) -> Option<Arc<Wrapped<R>>> {
        let pos = self.head + i as u64;
        (pos < self.tail)
            .then(|| self.buffer.load_published(pos))
            .flatten()
    }

    /// Records in the view, in append order.
    pub fn iter(&self) -> impl Iterator<Item = Arc<Wrapped<R>>> + '_ {
        (self.head..self.tail).filter_map(|pos| self.buffer.load_published(pos))
    }

    pub fn record_count(&self) -> usize {
        (self.tail - self.head) as usize
    }

    pub fn tombstone_count(&self) -> usize {
        self.iter().filter(|w| w.is_tombstone()).count()
    }

    /// Tag the first live record equal to `rec` within the snapshot range.
    pub fn delete_record(&self, rec: &R) -> bool {
        self.buffer.delete_record_in(self.head, self.tail, rec)
    }

    /// Whether a tombstone for `rec` may exist within the snapshot range.
    pub fn check_tombstone(&self, rec: &R) -> bool {
        self.buffer.check_tombstone_in(self.head, self.tail, rec)
    }

    pub fn head(&self) -> u64 {
        self.head
    }

    pub fn tail(&self) -> u64 {
        self.tail
    }
}

impl<R: Record> Drop for BufferView<R> {
    fn drop(&mut self) {
        self.buffer.release_view(self.head);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Pair;

    type Rec = Pair<u64, u32>;

    fn filled_buffer(n: u64) -> Arc<MutableBuffer<Rec>> {
        let buffer = Arc::new(MutableBuffer::new(4, 32));
        for key in 0..n {
            buffer.append(Pair::new(key, 0), false);
        }
        buffer
    }

    #[test]
    fn iter_yields_append_order() {
        let buffer = filled_buffer(6);
        let view = buffer.view();
        let keys: Vec<u64> = view.iter().map(|w| w.record().key).collect();
        assert_eq!(keys, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn delete_is_restricted_to_the_snapshot_range() {
        let buffer = filled_buffer(4);
        let view = buffer.view();
        buffer.append(Pair::new(9, 0), false);

        assert!(!view.delete_record(&Pair::new(9, 0)));
        assert!(view.delete_record(&Pair::new(2, 0)));
    }

    #[test]
    fn drop_releases_the_head_pin() {
        let buffer = filled_buffer(4);
        {
            let _view = buffer.view();
            assert!(!buffer.try_advance_head(4));
        }
        assert!(buffer.try_advance_head(4));
    }

    #[test]
    fn tombstone_count_covers_only_the_view() {
        let buffer = Arc::new(MutableBuffer::new(4, 32));
        buffer.append(Pair::new(1u64, 0u32), false);
        buffer.append(Pair::new(1, 0), true);
        let view = buffer.view();
        buffer.append(Pair::new(2, 0), true);
        assert_eq!(view.tombstone_count(), 1);
    }
}
