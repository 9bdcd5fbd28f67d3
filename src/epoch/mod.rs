//! Epoch-based version coordination.
//!
//! An epoch is the consistent snapshot a job runs against: a structure
//! snapshot, the shared buffer, and the buffer head offset below which
//! records have been evacuated into the structure. The coordinator keeps
//! three slots — previous, current, next — and moves epochs through them:
//! a reconstruction clones current into next, restructures it in the
//! background, and advances it into current once the buffer head can move.
//!
//! Pins are per-epoch counters taken under the slot lock; an epoch is
//! freed (its `Arc` dropped from the slots) only after retirement observes
//! zero pins, so a pinned epoch can never be torn down underneath a job.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::{BufferView, MutableBuffer};
use crate::record::Record;
use crate::shard::Shard;
use crate::structure::ExtensionStructure;

pub struct Epoch<R: Record, S: Shard<R>> {
    id: u64,
    structure: RwLock<ExtensionStructure<R, S>>,
    buffer: Arc<MutableBuffer<R>>,
    /// Buffer positions below this offset live in the structure snapshot.
    buffer_head: AtomicU64,
    pins: AtomicUsize,
}

impl<R: Record, S: Shard<R>> Epoch<R, S> {
    pub fn new(
        id: u64,
        structure: ExtensionStructure<R, S>,
        buffer: Arc<MutableBuffer<R>>,
        buffer_head: u64,
    ) -> Self {
        Self {
            id,
            structure: RwLock::new(structure),
            buffer,
            buffer_head: AtomicU64::new(buffer_head),
            pins: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn structure(&self) -> RwLockReadGuard<'_, ExtensionStructure<R, S>> {
        self.structure.read()
    }

    /// Exclusive access for the reconstruction job that owns this epoch
    /// while it sits in the next slot.
    pub fn structure_mut(&self) -> RwLockWriteGuard<'_, ExtensionStructure<R, S>> {
        self.structure.write()
    }

    pub fn buffer(&self) -> &Arc<MutableBuffer<R>> {
        &self.buffer
    }

    pub fn buffer_head(&self) -> u64 {
        self.buffer_head.load(Ordering::Acquire)
    }

    /// Records in the buffer that are not yet evacuated into this epoch's
    /// structure.
    pub fn buffered_record_count(&self) -> usize {
        self.buffer.tail().saturating_sub(self.buffer_head()) as usize
    }

    /// A view over the buffer range this epoch considers live.
    pub fn buffer_view(&self) -> BufferView<R> {
        self.buffer.view_from(self.buffer_head())
    }

    /// Shallow-copy this epoch under a new id.
    pub fn clone_epoch(&self, id: u64) -> Self {
        Self {
            id,
            structure: RwLock::new(self.structure.read().shallow_clone()),
            buffer: Arc::clone(&self.buffer),
            buffer_head: AtomicU64::new(self.buffer_head()),
            pins: AtomicUsize::new(0),
        }
    }

    /// Move the pinned buffer head forward, truncating the buffer. Fails
    /// while views still pin the old head; the coordinator spins on it.
    pub(crate) fn try_advance_buffer_head(&self, new_head: u64) -> bool {
        if !self.buffer.try_advance_head(new_head) {
            return false;
        }
        self.buffer_head.store(new_head, Ordering::Release);
        true
    }

    pub fn pin_count(&self) -> usize {
        self.pins.load(Ordering::Acquire)
    }

    fn add_pin(&self) {
        self.pins.fetch_add(1, Ordering::AcqRel);
    }

    fn release_pin(&self) {
        let old = self.pins.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0);
    }
}

/// A pinned epoch. Holding the guard keeps the epoch from being retired;
/// the pin is released when the guard drops, on every exit path.
pub struct EpochPin<R: Record, S: Shard<R>> {
    epoch: Arc<Epoch<R, S>>,
}

impl<R: Record, S: Shard<R>> std::ops::Deref for EpochPin<R, S> {
    type Target = Epoch<R, S>;

    fn deref(&self) -> &Self::Target {
        &self.epoch
    }
}

impl<R: Record, S: Shard<R>> Drop for EpochPin<R, S> {
    fn drop(&mut self) {
        self.epoch.release_pin();
    }
}

struct EpochSlots<R: Record, S: Shard<R>> {
    previous: Option<Arc<Epoch<R, S>>>,
    current: Option<Arc<Epoch<R, S>>>,
    next: Option<Arc<Epoch<R, S>>>,
}

/// The three-slot epoch register. All cross-thread coordination in the
/// framework funnels through this type.
pub struct EpochCoordinator<R: Record, S: Shard<R>> {
    slots: Mutex<EpochSlots<R, S>>,
    transition_cv: Condvar,
    epoch_count: AtomicU64,
}

impl<R: Record, S: Shard<R>> EpochCoordinator<R, S> {
    pub fn new(initial: Epoch<R, S>) -> Self {
        Self {
            slots: Mutex::new(EpochSlots {
                previous: None,
                current: Some(Arc::new(initial)),
                next: None,
            }),
            transition_cv: Condvar::new(),
            epoch_count: AtomicU64::new(0),
        }
    }

    /// Pin the active epoch. During the brief window of an advancement the
    /// current slot is empty and the pin falls back to the previous epoch,
    /// which is kept alive until its pins drain.
    pub fn pin(&self) -> EpochPin<R, S> {
        loop {
            {
                let slots = self.slots.lock();
                if let Some(epoch) = slots.current.as_ref().or(slots.previous.as_ref()) {
                    epoch.add_pin();
                    return EpochPin {
                        epoch: Arc::clone(epoch),
                    };
                }
            }
            std::hint::spin_loop();
        }
    }

    /// Clone the active epoch into the next slot. Requires that no other
    /// reconstruction is in flight (the next slot is empty).
    pub fn create_next_epoch(&self) -> Arc<Epoch<R, S>> {
        let id = self.epoch_count.fetch_add(1, Ordering::Relaxed) + 1;
        let current = self.pin();
        let next = Arc::new(current.clone_epoch(id));
        drop(current);

        let mut slots = self.slots.lock();
        debug_assert!(slots.next.is_none(), "reconstruction already in flight");
        slots.next = Some(Arc::clone(&next));
        next
    }

    /// Drop an installed next epoch without advancing; used when its
    /// reconstruction fails.
    pub fn clear_next(&self) {
        let mut slots = self.slots.lock();
        slots.next = None;
        self.transition_cv.notify_all();
    }

    /// Make the next epoch current:
    /// retire the previous epoch, move current to previous, wait for the
    /// buffer head to advance past the flushed prefix, install next, and
    /// wake anyone blocked on the transition.
    pub fn advance(&self, new_head: u64) {
        self.retire_previous();

        let next = {
            let slots = self.slots.lock();
            slots.next.clone()
        };
        let Some(next) = next else {
            return;
        };

        {
            let mut slots = self.slots.lock();
            slots.previous = slots.current.take();
        }

        // Queries against the old head are not preemptible; wait for them
        // to drain before the buffer reclaims their slots.
        while !next.try_advance_buffer_head(new_head) {
            std::hint::spin_loop();
        }

        let mut slots = self.slots.lock();
        slots.current = slots.next.take();
        self.transition_cv.notify_all();
    }

    /// Block until no epoch transition is in flight.
    pub fn await_next_epoch(&self) {
        let mut slots = self.slots.lock();
        while slots.next.is_some() {
            self.transition_cv.wait(&mut slots);
        }
    }

    fn retire_previous(&self) {
        loop {
            {
                let mut slots = self.slots.lock();
                match &slots.previous {
                    None => return,
                    Some(epoch) if epoch.pin_count() == 0 => {
                        slots.previous = None;
                        return;
                    }
                    _ => {}
                }
            }
            std::thread::sleep(Duration::from_micros(1));
        }
    }
}
