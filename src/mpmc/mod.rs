//! Multi-producer multi-consumer (MPMC) bounded queue.
//!
//! Any number of threads may push and pop concurrently; completed
//! operations observe strict FIFO order. Position in that order is decided
//! by two ticket counters: each push claims the next `head` ticket, each
//! pop the next `tail` ticket, and the consumer holding ticket `k` always
//! receives the element produced under ticket `k`. Per-slot turn counters
//! sequence the producers and consumers that map to the same slot across
//! laps of the ring.
//!
//! # Example
//!
//! ```
//! use relay_queue::mpmc::Queue;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let q = Arc::new(Queue::new(64));
//!
//! let producers: Vec<_> = (0..2)
//!     .map(|p| {
//!         let q = Arc::clone(&q);
//!         thread::spawn(move || {
//!             for i in 0..100u64 {
//!                 q.push(p * 1000 + i);
//!             }
//!         })
//!     })
//!     .collect();
//!
//! let consumer = {
//!     let q = Arc::clone(&q);
//!     thread::spawn(move || (0..200).map(|_| q.pop()).sum::<u64>())
//! };
//!
//! for handle in producers {
//!     handle.join().unwrap();
//! }
//! let sum = consumer.join().unwrap();
//! assert_eq!(sum, (0..100).sum::<u64>() * 2 + 1000 * 100);
//! ```
//!
//! # Performance Notes
//!
//! The hot path is branch-free aside from the turn check: a blocking
//! operation is one `fetch_add` plus one acquire spin on its slot's turn,
//! with the element bytes and the turn word on the same cache line. Head,
//! tail, and every slot live on distinct cache lines so producers and
//! consumers do not false-share.
//!
//! Blocking calls busy-wait (with an adaptive backoff) and cannot be
//! cancelled: once a ticket is claimed it must be served, so a higher-level
//! shutdown protocol has to drain the queue with sentinel values rather
//! than abandon a call in flight.

mod ring;

use std::fmt;
use std::ptr::NonNull;

use crate::Full;
use ring::RingBuffer;

/// A bounded lock-free MPMC queue.
///
/// The queue owns a fixed-capacity ring allocated on construction; it never
/// resizes. Share it between threads with [`Arc`](std::sync::Arc). Elements
/// only need to be [`Send`] — the queue takes ownership on push and hands it
/// back on pop.
///
/// Dropping the queue drops any elements still inside it.
pub struct Queue<T> {
    inner: NonNull<RingBuffer<T>>,
}

// Safety: the ring synchronizes all cross-thread access through its ticket
// counters and per-slot turns; T values move between threads, so T: Send.
unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T> Queue<T> {
    /// Creates a queue with space for exactly `capacity` elements.
    ///
    /// Capacity is taken as given, not rounded up to a power of two.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or the ring allocation fails. Use
    /// [`with_capacity`](Queue::with_capacity) to handle those as errors.
    ///
    /// # Example
    ///
    /// ```
    /// use relay_queue::mpmc::Queue;
    ///
    /// let q = Queue::<u32>::new(10);
    /// assert_eq!(q.capacity(), 10);
    /// ```
    pub fn new(capacity: usize) -> Self {
        match Self::with_capacity(capacity) {
            Ok(queue) => queue,
            Err(err) => panic!("failed to construct queue: {err}"),
        }
    }

    /// Creates a queue with space for exactly `capacity` elements, reporting
    /// construction failures instead of panicking.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ZeroCapacity`] if `capacity` is zero and
    /// [`QueueError::AllocationFailed`] if the ring cannot be allocated.
    ///
    /// # Example
    ///
    /// ```
    /// use relay_queue::mpmc::{Queue, QueueError};
    ///
    /// assert_eq!(
    ///     Queue::<u32>::with_capacity(0).unwrap_err(),
    ///     QueueError::ZeroCapacity,
    /// );
    /// ```
    pub fn with_capacity(capacity: usize) -> Result<Self, QueueError> {
        RingBuffer::allocate(capacity).map(|inner| Self { inner })
    }

    /// Pushes a value, waiting until a slot accepts it.
    ///
    /// This never fails: it spins until the consumer currently responsible
    /// for the claimed slot (if any) vacates it. The wait is bounded only by
    /// that consumer's progress.
    #[inline]
    pub fn push(&self, value: T) {
        self.ring().push(value)
    }

    /// Attempts to push a value without waiting.
    ///
    /// # Errors
    ///
    /// Returns `Err(Full(value))` — handing the value back — if the queue
    /// was full at some moment during the call. Contention with other
    /// producers alone never causes a failure, only retries.
    ///
    /// # Example
    ///
    /// ```
    /// use relay_queue::mpmc::Queue;
    ///
    /// let q = Queue::new(1);
    ///
    /// assert!(q.try_push(1).is_ok());
    /// let err = q.try_push(2).unwrap_err();
    /// assert_eq!(err.into_inner(), 2);
    /// ```
    #[inline]
    #[must_use = "try_push returns Err if full, which should be handled"]
    pub fn try_push(&self, value: T) -> Result<(), Full<T>> {
        self.ring().try_push(value)
    }

    /// Pops the next value in FIFO order, waiting until one is available.
    #[inline]
    pub fn pop(&self) -> T {
        self.ring().pop()
    }

    /// Attempts to pop without waiting.
    ///
    /// Returns `None` if the queue was empty at some moment during the
    /// call. Values come out in FIFO ticket order.
    ///
    /// # Example
    ///
    /// ```
    /// use relay_queue::mpmc::Queue;
    ///
    /// let q = Queue::new(4);
    /// assert_eq!(q.try_pop(), None);
    ///
    /// q.push(7);
    /// assert_eq!(q.try_pop(), Some(7));
    /// ```
    #[inline]
    pub fn try_pop(&self) -> Option<T> {
        self.ring().try_pop()
    }

    /// Returns the number of elements in the queue.
    ///
    /// The count is a snapshot of the two ticket counters and may be
    /// immediately stale under concurrency; it is exact while the queue is
    /// quiescent.
    #[inline]
    pub fn len(&self) -> usize {
        self.ring().len()
    }

    /// Returns `true` if the queue holds no elements.
    ///
    /// Same snapshot semantics as [`len`](Queue::len).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the capacity of the queue.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring().capacity()
    }

    #[inline]
    fn ring(&self) -> &RingBuffer<T> {
        // Safety: the pointer is valid from construction until Drop.
        unsafe { self.inner.as_ref() }
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        // Safety: &mut self guarantees no concurrent callers, and the
        // pointer is not used again.
        unsafe { RingBuffer::deallocate(self.inner) }
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Error returned by [`Queue::with_capacity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The requested capacity was zero.
    ZeroCapacity,
    /// The ring storage could not be allocated.
    AllocationFailed,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroCapacity => write!(f, "capacity must be non-zero"),
            Self::AllocationFailed => write!(f, "ring allocation failed"),
        }
    }
}

impl std::error::Error for QueueError {}
