//! Lock-free bounded ring buffer with SPSC and MPMC access variants.
//!
//! A fixed-capacity circular queue of payload handles. The capacity is a
//! power of two chosen at construction; logical cursors increase
//! monotonically and are mapped to physical slots by bitmask, never by
//! raw pointer arithmetic.
//!
//! # Algorithm
//!
//! Two cursors are shared by all threads:
//!
//! - `head` - next logical index to produce into
//! - `tail` - next logical index to consume from
//!
//! `head - tail` is the occupancy and is kept in `[0, capacity - 1]`: one
//! slot position is permanently sacrificed so that full and empty are
//! distinguishable without extra state. Usable capacity is `capacity - 1`.
//!
//! The SPSC variant needs nothing else: the producer's release store of
//! `head` publishes the payload write to the consumer's acquire load.
//!
//! The MPMC variant is two-phase. A producer first reserves a logical
//! index by CAS on `head`, bounded by `tail + capacity - 1`; reservation
//! and publication are separate steps, so each slot carries a generation
//! marker distinguishing reserved-but-unwritten from written from
//! consumed. Slot `i` starts at generation `i`; publishing logical index
//! `p` moves it to `p + 1`; releasing it after consumption moves it to
//! `p + capacity`, handing the slot to the producer one lap ahead.
//!
//! # Progress
//!
//! No operation blocks on a mutex. Full and empty are ordinary refusals
//! with no side effects, letting callers retry at their own pace. The
//! short spins inside the MPMC paths wait only for a peer that has
//! already reserved the same slot to finish its fixed step sequence, so
//! they are bounded by that peer's progress. Liveness assumes every
//! thread that reserves an index eventually runs again; a reserving
//! thread that dies mid-operation stalls the slot forever.

use std::cell::UnsafeCell;
use std::hint;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

/// Construction-time contract violations.
///
/// Full and empty are never errors; the only fatal condition is a bad
/// capacity at construction, which is reported rather than coerced.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// Capacity must be a power of two strictly greater than 1.
    #[error("ring capacity must be a power of two greater than 1, got {0}")]
    InvalidCapacity(usize),
}

/// A single slot: generation marker plus payload cell.
///
/// The marker is only consulted by the MPMC paths; the SPSC paths order
/// payload hand-off entirely through the cursors.
#[repr(align(64))] // One slot per cache line to keep producers from false sharing.
struct Slot<T> {
    /// Generation marker.
    /// - `index` while the slot is free for lap `index / capacity`
    /// - `pos + 1` once the producer of logical index `pos` has published
    /// - `pos + capacity` once the consumer has read it back out
    seq: AtomicUsize,

    /// The payload handle stored in this slot.
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn new(seq: usize) -> Self {
        Self {
            seq: AtomicUsize::new(seq),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Produce cursor, padded onto its own cache line.
#[repr(align(64))]
struct ProduceCursor(AtomicUsize);

/// Consume cursor, padded onto its own cache line.
#[repr(align(64))]
struct ConsumeCursor(AtomicUsize);

/// Lock-free bounded queue of payload handles.
///
/// One buffer instance must be driven under a single access discipline
/// for its lifetime: either the SPSC methods (with their single-caller
/// contracts) or the MPMC methods. The SPSC paths do not maintain the
/// generation markers the MPMC paths rely on.
pub struct RingBuffer<T> {
    head: ProduceCursor,
    tail: ConsumeCursor,
    mask: usize,
    slots: Box<[Slot<T>]>,
}

// SAFETY: all cross-thread access to the cursors is atomic, and access
// to a payload cell is exclusive by protocol: SPSC hands cells off via
// release/acquire on the cursors, MPMC via reservation CAS plus the
// per-slot generation marker.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T: Send> RingBuffer<T> {
    /// Creates a ring with `capacity` slots, all empty, cursors at zero.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::InvalidCapacity`] unless `capacity` is a
    /// power of two strictly greater than 1. A bad capacity is never
    /// rounded up.
    pub fn with_capacity(capacity: usize) -> Result<Self, RingError> {
        if !capacity.is_power_of_two() || capacity < 2 {
            return Err(RingError::InvalidCapacity(capacity));
        }

        let slots = (0..capacity).map(Slot::new).collect();

        Ok(Self {
            head: ProduceCursor(AtomicUsize::new(0)),
            tail: ConsumeCursor(AtomicUsize::new(0)),
            mask: capacity - 1,
            slots,
        })
    }

    /// The constructor-supplied slot count (not the usable capacity).
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Occupancy at the instant of the call.
    ///
    /// Exact when no enqueue or dequeue is concurrently in flight;
    /// otherwise a point-in-time estimate.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        // Read tail first: head only grows, so this ordering can
        // overestimate but never wrap below zero.
        let tail = self.tail.0.load(Ordering::Acquire);
        let head = self.head.0.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    /// Attempts to enqueue under the single-producer discipline.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the ring is full (occupancy `capacity - 1`),
    /// with no slot modified.
    ///
    /// # Safety
    ///
    /// Caller must ensure:
    /// - at most one thread calls `enqueue_spsc` on this buffer at a time,
    ///   across the buffer's lifetime
    /// - the buffer is never also driven through the MPMC methods
    #[inline]
    pub unsafe fn enqueue_spsc(&self, item: T) -> Result<(), T> {
        let head = self.head.0.load(Ordering::Relaxed);
        // Acquire pairs with the consumer's release store of tail, so a
        // recycled slot is only overwritten after its read completed.
        let tail = self.tail.0.load(Ordering::Acquire);

        if head.wrapping_sub(tail) == self.mask {
            return Err(item);
        }

        // SAFETY: the occupancy check proves the consumer is done with
        // this slot, and the single-producer contract rules out any
        // competing writer. A plain store suffices; the release store of
        // head below publishes it.
        unsafe {
            (*self.slots[head & self.mask].value.get()).write(item);
        }

        self.head.0.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Attempts to dequeue under the single-consumer discipline.
    ///
    /// Returns `None` if the ring is empty.
    ///
    /// # Safety
    ///
    /// Caller must ensure:
    /// - at most one thread calls `dequeue_spsc` on this buffer at a time,
    ///   across the buffer's lifetime
    /// - the buffer is never also driven through the MPMC methods
    #[inline]
    pub unsafe fn dequeue_spsc(&self) -> Option<T> {
        let tail = self.tail.0.load(Ordering::Relaxed);
        // Acquire pairs with the producer's release store of head.
        let head = self.head.0.load(Ordering::Acquire);

        if tail == head {
            return None;
        }

        // SAFETY: tail != head proves the producer published this slot,
        // and the acquire load above makes its payload write visible.
        let item = unsafe { (*self.slots[tail & self.mask].value.get()).assume_init_read() };

        // Release so the producer's occupancy check cannot recycle the
        // slot before the read above is done.
        self.tail.0.store(tail.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    /// Attempts to enqueue with any number of concurrent producers.
    ///
    /// Two-phase: reserve a logical index by CAS on the produce cursor
    /// (bounded so occupancy never exceeds `capacity - 1`), then write
    /// the payload and publish it through the slot's generation marker.
    /// Consumers never observe a reserved-but-unwritten slot as ready.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the ring would overfill, with no
    /// reservation made and no slot modified.
    pub fn enqueue_mpmc(&self, item: T) -> Result<(), T> {
        let capacity = self.slots.len();

        let pos = loop {
            let head = self.head.0.load(Ordering::Relaxed);
            let tail = self.tail.0.load(Ordering::Acquire);

            // A stale tail can only under-report free space, so this
            // refusal is conservative, never unsound.
            if head.wrapping_sub(tail) >= capacity - 1 {
                return Err(item);
            }

            // The CAS re-validates head, so the bound above still holds
            // for the index we actually reserve.
            if self
                .head
                .0
                .compare_exchange_weak(
                    head,
                    head.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break head;
            }

            hint::spin_loop();
        };

        let slot = &self.slots[pos & self.mask];

        // The occupancy bound guarantees the consumer one lap behind has
        // at least reserved this slot; wait for it to finish releasing.
        while slot.seq.load(Ordering::Acquire) != pos {
            hint::spin_loop();
        }

        // SAFETY: the reservation CAS makes this producer the only
        // writer of logical index `pos`, and the marker check above
        // proves the previous generation's read has completed.
        unsafe {
            (*slot.value.get()).write(item);
        }

        // Publish: consumers spin on the marker, not the cursor.
        slot.seq.store(pos.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Attempts to dequeue with any number of concurrent consumers.
    ///
    /// Returns `None` immediately if no index could be reserved (the
    /// ring is currently empty). After reserving an index this spins
    /// until the producer that reserved the same index publishes it,
    /// bounded by that producer's own progress.
    pub fn dequeue_mpmc(&self) -> Option<T> {
        let pos = loop {
            let tail = self.tail.0.load(Ordering::Relaxed);
            let head = self.head.0.load(Ordering::Acquire);

            if tail == head {
                return None;
            }

            if self
                .tail
                .0
                .compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break tail;
            }

            hint::spin_loop();
        };

        let slot = &self.slots[pos & self.mask];
        let published = pos.wrapping_add(1);

        // tail < head at reservation time, so a producer owns this index
        // and will publish it.
        while slot.seq.load(Ordering::Acquire) != published {
            hint::spin_loop();
        }

        // SAFETY: the reservation CAS makes this consumer the only
        // reader of logical index `pos`, and the acquire load of the
        // marker makes the producer's payload write visible.
        let item = unsafe { (*slot.value.get()).assume_init_read() };

        // Hand the slot to the producer one lap ahead.
        slot.seq
            .store(pos.wrapping_add(self.slots.len()), Ordering::Release);
        Some(item)
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        // &mut self: no operation is in flight, so exactly the logical
        // indices in [tail, head) hold initialized payloads.
        let head = *self.head.0.get_mut();
        let mut tail = *self.tail.0.get_mut();

        while tail != head {
            // SAFETY: enqueued and never dequeued, hence initialized.
            unsafe {
                self.slots[tail & self.mask].value.get_mut().assume_init_drop();
            }
            tail = tail.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rejects_invalid_capacities() {
        for bad in [0usize, 1, 3, 6, 12, 100] {
            assert_eq!(
                RingBuffer::<u64>::with_capacity(bad).err(),
                Some(RingError::InvalidCapacity(bad)),
                "capacity {bad} should be rejected"
            );
        }
        for good in [2usize, 4, 8, 512, 1 << 20] {
            assert!(RingBuffer::<u64>::with_capacity(good).is_ok());
        }
    }

    #[test]
    fn capacity_reports_slot_count() {
        let ring = RingBuffer::<u64>::with_capacity(8).unwrap();
        assert_eq!(ring.capacity(), 8);
        assert_eq!(ring.size(), 0);
    }

    /// Scenario: capacity 8 holds exactly 7 items, and the 8th enqueue
    /// is refused without disturbing any of them.
    #[test]
    fn spsc_usable_capacity_is_one_less() {
        let ring = RingBuffer::with_capacity(8).unwrap();

        unsafe {
            for i in 0..7u64 {
                assert!(ring.enqueue_spsc(i).is_ok(), "enqueue {i} should fit");
            }
            assert_eq!(ring.enqueue_spsc(7), Err(7));
            assert_eq!(ring.size(), 7);

            for i in 0..7u64 {
                assert_eq!(ring.dequeue_spsc(), Some(i));
            }
            assert_eq!(ring.dequeue_spsc(), None);
        }
        assert_eq!(ring.size(), 0);
    }

    #[test]
    fn spsc_fifo_across_wraparound() {
        let ring = RingBuffer::with_capacity(4).unwrap();

        unsafe {
            for lap in 0..10u64 {
                for i in 0..3 {
                    assert!(ring.enqueue_spsc(lap * 10 + i).is_ok());
                }
                for i in 0..3 {
                    assert_eq!(ring.dequeue_spsc(), Some(lap * 10 + i));
                }
                assert_eq!(ring.dequeue_spsc(), None);
            }
        }
    }

    #[test]
    fn size_is_exact_at_quiescence() {
        let ring = RingBuffer::with_capacity(16).unwrap();

        unsafe {
            for i in 0..10u64 {
                ring.enqueue_spsc(i).unwrap();
            }
            assert_eq!(ring.size(), 10);
            for _ in 0..4 {
                ring.dequeue_spsc().unwrap();
            }
            assert_eq!(ring.size(), 6);
        }
    }

    #[test]
    fn mpmc_full_and_empty_are_refusals() {
        let ring = RingBuffer::with_capacity(4).unwrap();

        assert_eq!(ring.dequeue_mpmc(), None);

        for i in 0..3u64 {
            assert!(ring.enqueue_mpmc(i).is_ok());
        }
        assert_eq!(ring.enqueue_mpmc(99), Err(99));

        // The refusal left the contents intact.
        assert_eq!(ring.dequeue_mpmc(), Some(0));
        assert_eq!(ring.dequeue_mpmc(), Some(1));
        assert_eq!(ring.dequeue_mpmc(), Some(2));
        assert_eq!(ring.dequeue_mpmc(), None);
    }

    #[test]
    fn mpmc_single_thread_wraparound() {
        let ring = RingBuffer::with_capacity(4).unwrap();

        for lap in 0..20u64 {
            for i in 0..3 {
                assert!(ring.enqueue_mpmc(lap * 10 + i).is_ok());
            }
            for i in 0..3 {
                assert_eq!(ring.dequeue_mpmc(), Some(lap * 10 + i));
            }
        }
        assert_eq!(ring.size(), 0);
    }

    #[test]
    fn mpmc_concurrent_producers_deliver_everything_once() {
        let ring: Arc<RingBuffer<u64>> = Arc::new(RingBuffer::with_capacity(64).unwrap());
        let producers = 4u64;
        let per_producer = 500u64;

        let mut handles = Vec::new();
        for p in 0..producers {
            let ring = Arc::clone(&ring);
            handles.push(thread::spawn(move || {
                for i in 0..per_producer {
                    let mut value = p * 10_000 + i;
                    loop {
                        match ring.enqueue_mpmc(value) {
                            Ok(()) => break,
                            Err(returned) => {
                                value = returned;
                                thread::yield_now();
                            }
                        }
                    }
                }
            }));
        }

        let drained = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut seen = Vec::new();
                while seen.len() < (producers * per_producer) as usize {
                    match ring.dequeue_mpmc() {
                        Some(v) => seen.push(v),
                        None => thread::yield_now(),
                    }
                }
                seen
            })
        };

        for h in handles {
            h.join().unwrap();
        }
        let mut seen = drained.join().unwrap();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(
            seen.len(),
            (producers * per_producer) as usize,
            "every item delivered exactly once"
        );
        assert_eq!(ring.size(), 0);
    }

    #[test]
    fn drop_releases_undequeued_items() {
        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        {
            let ring = RingBuffer::with_capacity(8).unwrap();
            for _ in 0..5 {
                assert!(ring.enqueue_mpmc(Tracked(Arc::clone(&drops))).is_ok());
            }
            // Two dequeued here, three left for Drop.
            drop(ring.dequeue_mpmc());
            drop(ring.dequeue_mpmc());
            assert_eq!(drops.load(Ordering::Relaxed), 2);
        }
        assert_eq!(drops.load(Ordering::Relaxed), 5);
    }
}
