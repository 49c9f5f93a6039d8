//! High-performance lock-free queues for latency-critical applications.
//!
//! `relay-queue` provides a bounded MPMC (multi-producer, multi-consumer)
//! queue that preserves strict FIFO order among completed operations while
//! admitting any number of concurrent producers and consumers.
//!
//! # Quick Start
//!
//! ```
//! use relay_queue::mpmc::Queue;
//!
//! let q = Queue::new(1024);
//!
//! q.push(42u64);
//! assert_eq!(q.pop(), 42);
//! ```
//!
//! # Design
//!
//! The queue is a fixed-capacity ring of cache-line-aligned slots. Each slot
//! carries its own *turn* counter that sequences the producers and consumers
//! targeting that slot; two cache-line-padded ticket counters hand out FIFO
//! positions. See the [`mpmc`] module docs for the full protocol.
//!
//! Blocking operations ([`push`](mpmc::Queue::push), [`pop`](mpmc::Queue::pop))
//! spin with an adaptive backoff until their slot is ready and never fail.
//! Non-blocking variants ([`try_push`](mpmc::Queue::try_push),
//! [`try_pop`](mpmc::Queue::try_pop)) return immediately when the queue is
//! full or empty.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, missing_debug_implementations)]

use core::fmt;

pub mod mpmc;
pub(crate) mod sync;

/// Error returned when pushing to a full queue.
///
/// Contains the value that could not be pushed, returning ownership to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full<T>(pub T);

impl<T> Full<T> {
    /// Returns the value that could not be pushed.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Display for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue is full")
    }
}

impl<T: fmt::Debug> std::error::Error for Full<T> {}
