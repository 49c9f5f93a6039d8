//! The underlying ring storage and turn protocol for the MPMC queue.
//!
//! Each slot carries a `turn` counter that walks 0, 1, 2, 3, … over the
//! slot's lifetime:
//!
//! - `turn == 2 * lap`: empty, waiting for the producer holding a lap-`lap`
//!   ticket for this slot
//! - `turn == 2 * lap + 1`: full, waiting for the consumer holding a
//!   lap-`lap` ticket for this slot
//!
//! The acquire load of `turn` by the next owner synchronizes with the
//! release store by the previous owner; this is the only happens-before
//! edge protecting the element bytes.

use std::alloc::{Layout, alloc, dealloc};
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};

use crossbeam_utils::CachePadded;

use crate::Full;
use crate::sync::{AtomicUsize, Backoff, Ordering, UnsafeCell};

use super::QueueError;

/// A slot in the ring with its turn counter.
///
/// `value` holds a live element exactly while `turn` is odd.
#[repr(C)]
struct Slot<T> {
    turn: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// The backing storage for an MPMC queue.
///
/// Memory layout (one allocation, padded to the cache-line alignment so
/// adjacent allocations never share a line with the ring):
/// ```text
/// ┌───────────────────────────────────────────────────────┐
/// │ RingBuffer header                                     │
/// │   capacity, buffer, layout                            │
/// ├───────────────────────────────────────────────────────┤
/// │ head (cache-line padded) - next producer ticket       │
/// ├───────────────────────────────────────────────────────┤
/// │ tail (cache-line padded) - next consumer ticket       │
/// ├───────────────────────────────────────────────────────┤
/// │ Slot[0] (cache-line padded): { turn, value }          │
/// │ Slot[1] (cache-line padded): { turn, value }          │
/// │ ...                                                   │
/// └───────────────────────────────────────────────────────┘
/// ```
///
/// A ticket `k` maps to slot `k % capacity` on lap `k / capacity`. Capacity
/// is exact, not rounded to a power of two, so the mapping divides instead
/// of masking.
#[repr(C)]
pub(crate) struct RingBuffer<T> {
    // === Immutable configuration ===
    capacity: usize,
    buffer: *mut CachePadded<Slot<T>>,
    layout: Layout,

    // === Cache-line padded ticket counters ===
    /// Next ticket handed to a producer.
    head: CachePadded<AtomicUsize>,
    /// Next ticket handed to a consumer.
    tail: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Computes the memory layout for a ring with the given capacity.
    fn layout_for(capacity: usize) -> Result<(Layout, usize), QueueError> {
        let header = Layout::new::<Self>();
        let slots = Layout::array::<CachePadded<Slot<T>>>(capacity)
            .map_err(|_| QueueError::AllocationFailed)?;
        let (layout, buffer_offset) = header
            .extend(slots)
            .map_err(|_| QueueError::AllocationFailed)?;
        Ok((layout.pad_to_align(), buffer_offset))
    }

    /// Allocates and initializes a new ring.
    ///
    /// Every slot starts at turn 0 (empty, lap 0) with its storage
    /// uninitialized; both ticket counters start at 0.
    pub(crate) fn allocate(capacity: usize) -> Result<NonNull<Self>, QueueError> {
        if capacity == 0 {
            return Err(QueueError::ZeroCapacity);
        }
        let (layout, buffer_offset) = Self::layout_for(capacity)?;

        let ptr = unsafe { alloc(layout) };
        let Some(rb) = NonNull::new(ptr.cast::<Self>()) else {
            return Err(QueueError::AllocationFailed);
        };
        let buffer = unsafe { ptr.add(buffer_offset).cast::<CachePadded<Slot<T>>>() };

        unsafe {
            ptr::write(
                rb.as_ptr(),
                Self {
                    capacity,
                    buffer,
                    layout,
                    head: CachePadded::new(AtomicUsize::new(0)),
                    tail: CachePadded::new(AtomicUsize::new(0)),
                },
            );

            for i in 0..capacity {
                ptr::write(
                    buffer.add(i),
                    CachePadded::new(Slot {
                        turn: AtomicUsize::new(0),
                        value: UnsafeCell::new(MaybeUninit::uninit()),
                    }),
                );
            }
        }

        Ok(rb)
    }

    #[inline]
    fn slot(&self, ticket: usize) -> &CachePadded<Slot<T>> {
        // The ticket counters are monotonic, so ticket % capacity is always
        // in bounds of the slot array.
        unsafe { &*self.buffer.add(ticket % self.capacity) }
    }

    /// How many times the ring has been traversed to reach this ticket.
    #[inline]
    fn lap(&self, ticket: usize) -> usize {
        ticket / self.capacity
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of elements in the queue, sampled from the ticket counters.
    ///
    /// The two loads are not taken atomically together, so the result is
    /// only an approximation of a recent instant. Blocked consumers can
    /// advance `tail` past `head`, hence the saturation.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.saturating_sub(tail)
    }

    // === Producer operations ===

    /// Pushes a value, spinning until its slot becomes writable.
    pub(crate) fn push(&self, value: T) {
        let ticket = self.head.fetch_add(1, Ordering::Relaxed);
        let slot = self.slot(ticket);
        let expected = 2 * self.lap(ticket);

        let backoff = Backoff::new();
        while slot.turn.load(Ordering::Acquire) != expected {
            backoff.snooze();
        }

        // Safety: observing our expected turn means the lap-(L-1) consumer
        // is done with this slot and no other thread holds this ticket, so
        // we have exclusive access to the storage until we bump the turn.
        slot.value.with_mut(|p| unsafe {
            (*p).write(value);
        });
        slot.turn.store(expected + 1, Ordering::Release);
    }

    /// Attempts to push without waiting.
    ///
    /// Fails exactly when the queue was full at some moment during the
    /// call: the head slot is not ready for its producer turn and no other
    /// producer advanced `head` in the meantime.
    pub(crate) fn try_push(&self, value: T) -> Result<(), Full<T>> {
        let backoff = Backoff::new();
        let mut ticket = self.head.load(Ordering::Acquire);

        loop {
            let slot = self.slot(ticket);
            let expected = 2 * self.lap(ticket);

            if slot.turn.load(Ordering::Acquire) == expected {
                match self.head.compare_exchange(
                    ticket,
                    ticket + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: the CAS made us the unique owner of this
                        // ticket, and the turn check above showed the slot
                        // is empty and waiting for our lap.
                        slot.value.with_mut(|p| unsafe {
                            (*p).write(value);
                        });
                        slot.turn.store(expected + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => {
                        // Lost the race to another producer.
                        ticket = current;
                        backoff.spin();
                    }
                }
            } else {
                let prev = ticket;
                ticket = self.head.load(Ordering::Acquire);
                if ticket == prev {
                    return Err(Full(value));
                }
                backoff.spin();
            }
        }
    }

    // === Consumer operations ===

    /// Pops a value, spinning until its slot becomes readable.
    pub(crate) fn pop(&self) -> T {
        let ticket = self.tail.fetch_add(1, Ordering::Relaxed);
        let slot = self.slot(ticket);
        let expected = 2 * self.lap(ticket) + 1;

        let backoff = Backoff::new();
        while slot.turn.load(Ordering::Acquire) != expected {
            backoff.snooze();
        }

        // Safety: observing the odd turn for our lap means the matching
        // producer finished writing; the value is initialized and ours to
        // move out. Bumping the turn afterwards marks the storage vacated.
        let value = slot.value.with(|p| unsafe { (*p).assume_init_read() });
        slot.turn.store(expected + 1, Ordering::Release);
        value
    }

    /// Attempts to pop without waiting. Returns `None` exactly when the
    /// queue was empty at some moment during the call.
    pub(crate) fn try_pop(&self) -> Option<T> {
        let backoff = Backoff::new();
        let mut ticket = self.tail.load(Ordering::Acquire);

        loop {
            let slot = self.slot(ticket);
            let expected = 2 * self.lap(ticket) + 1;

            if slot.turn.load(Ordering::Acquire) == expected {
                match self.tail.compare_exchange(
                    ticket,
                    ticket + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: the CAS made us the unique owner of this
                        // ticket and the slot holds an initialized value.
                        let value = slot.value.with(|p| unsafe { (*p).assume_init_read() });
                        slot.turn.store(expected + 1, Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => {
                        // Lost the race to another consumer.
                        ticket = current;
                        backoff.spin();
                    }
                }
            } else {
                let prev = ticket;
                ticket = self.tail.load(Ordering::Acquire);
                if ticket == prev {
                    return None;
                }
                backoff.spin();
            }
        }
    }

    // === Lifecycle ===

    /// Drops any live elements and frees the ring.
    ///
    /// # Safety
    ///
    /// Callers must guarantee exclusive access: no concurrent operation may
    /// be in flight, and `this` must not be used afterwards.
    pub(crate) unsafe fn deallocate(this: NonNull<Self>) {
        let (capacity, buffer, layout) = {
            let inner = unsafe { this.as_ref() };
            (inner.capacity, inner.buffer, inner.layout)
        };

        for i in 0..capacity {
            let slot = unsafe { &*buffer.add(i) };
            // Odd turn: a producer published this slot and no consumer took it.
            if slot.turn.load(Ordering::Relaxed) % 2 == 1 {
                slot.value.with_mut(|p| unsafe {
                    (*p).assume_init_drop();
                });
            }
        }

        unsafe {
            for i in 0..capacity {
                ptr::drop_in_place(buffer.add(i));
            }
            ptr::drop_in_place(this.as_ptr());
            dealloc(this.as_ptr().cast(), layout);
        }
    }
}
