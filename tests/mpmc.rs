//! Cross-thread integration tests for the MPMC queue.

#![cfg(not(loom))]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use relay_queue::mpmc::Queue;

// ============================================================================
// Lifecycle accounting
// ============================================================================

/// Element that tracks how many instances are alive.
#[derive(Debug)]
struct Token(Arc<AtomicUsize>);

impl Token {
    fn new(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(live))
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[test]
fn fill_drain_keeps_live_count_balanced() {
    let live = Arc::new(AtomicUsize::new(0));

    {
        let q = Queue::new(11);
        for _ in 0..10 {
            q.push(Token::new(&live));
        }
        assert_eq!(live.load(Ordering::Relaxed), 10);

        let held = q.pop();
        assert_eq!(live.load(Ordering::Relaxed), 10);

        q.push(Token::new(&live));
        drop(held);
        assert_eq!(live.load(Ordering::Relaxed), 10);
    }

    // Queue destruction drops every element still inside.
    assert_eq!(live.load(Ordering::Relaxed), 0);
}

// ============================================================================
// Blocking rendezvous
// ============================================================================

#[test]
fn blocked_consumers_wake_on_push() {
    let q = Arc::new(Queue::new(10));

    let consumers: Vec<_> = (0..2)
        .map(|_| {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop())
        })
        .collect();

    q.push(1);
    q.push(2);

    let mut received: Vec<i32> = consumers.into_iter().map(|h| h.join().unwrap()).collect();
    received.sort_unstable();
    assert_eq!(received, [1, 2]);
}

#[test]
fn spsc_blocking_preserves_fifo() {
    const COUNT: u64 = 10_000;

    let q = Arc::new(Queue::new(64));

    let producer = {
        let q = Arc::clone(&q);
        thread::spawn(move || {
            for i in 0..COUNT {
                q.push(i);
            }
        })
    };

    let consumer = {
        let q = Arc::clone(&q);
        thread::spawn(move || {
            for expected in 0..COUNT {
                assert_eq!(q.pop(), expected, "FIFO order violated");
            }
        })
    };

    producer.join().unwrap();
    consumer.join().unwrap();
}

// ============================================================================
// Conservation under contention
// ============================================================================

#[test]
fn fuzz_sum_is_conserved() {
    const NUM_OPS: u64 = 1000;
    const NUM_THREADS: u64 = 10;

    let q = Arc::new(Queue::new(NUM_THREADS as usize));
    let start = Arc::new(AtomicBool::new(false));
    let sum = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();

    for i in 0..NUM_THREADS {
        let q = Arc::clone(&q);
        let start = Arc::clone(&start);
        handles.push(thread::spawn(move || {
            while !start.load(Ordering::Acquire) {
                std::hint::spin_loop();
            }
            let mut j = i;
            while j < NUM_OPS {
                q.push(j);
                j += NUM_THREADS;
            }
        }));
    }

    for i in 0..NUM_THREADS {
        let q = Arc::clone(&q);
        let start = Arc::clone(&start);
        let sum = Arc::clone(&sum);
        handles.push(thread::spawn(move || {
            while !start.load(Ordering::Acquire) {
                std::hint::spin_loop();
            }
            let mut thread_sum = 0u64;
            let mut j = i;
            while j < NUM_OPS {
                thread_sum += q.pop();
                j += NUM_THREADS;
            }
            sum.fetch_add(thread_sum as usize, Ordering::Relaxed);
        }));
    }

    start.store(true, Ordering::Release);
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(sum.load(Ordering::Relaxed) as u64, NUM_OPS * (NUM_OPS - 1) / 2);
}

#[test]
fn multiset_is_conserved_across_producers_and_consumers() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: usize = 250;
    const TOTAL: usize = PRODUCERS * PER_PRODUCER;

    let q = Arc::new(Queue::new(32));
    let mut handles = Vec::new();

    for p in 0..PRODUCERS {
        let q = Arc::clone(&q);
        handles.push(thread::spawn(move || {
            for i in 0..PER_PRODUCER {
                q.push(p * PER_PRODUCER + i);
            }
        }));
    }

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                (0..TOTAL / CONSUMERS).map(|_| q.pop()).collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let mut received: Vec<usize> = consumers
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    received.sort_unstable();

    let expected: Vec<usize> = (0..TOTAL).collect();
    assert_eq!(received, expected);
}

#[test]
fn try_variants_lose_nothing_under_contention() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: usize = 500;
    const TOTAL: usize = PRODUCERS * PER_PRODUCER;

    let q = Arc::new(Queue::new(16));
    let consumed = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();

    for p in 0..PRODUCERS {
        let q = Arc::clone(&q);
        handles.push(thread::spawn(move || {
            for i in 0..PER_PRODUCER {
                let mut value = p * 10_000 + i;
                loop {
                    match q.try_push(value) {
                        Ok(()) => break,
                        Err(rejected) => {
                            value = rejected.into_inner();
                            std::hint::spin_loop();
                        }
                    }
                }
            }
        }));
    }

    for _ in 0..CONSUMERS {
        let q = Arc::clone(&q);
        let consumed = Arc::clone(&consumed);
        handles.push(thread::spawn(move || loop {
            if q.try_pop().is_some() {
                if consumed.fetch_add(1, Ordering::Relaxed) + 1 == TOTAL {
                    break;
                }
            } else if consumed.load(Ordering::Relaxed) >= TOTAL {
                break;
            } else {
                std::hint::spin_loop();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(consumed.load(Ordering::Relaxed), TOTAL);
    assert!(q.is_empty());
}

// ============================================================================
// Leak accounting under concurrency
// ============================================================================

#[test]
fn no_leaks_after_concurrent_churn_and_drop() {
    let live = Arc::new(AtomicUsize::new(0));

    {
        let q = Arc::new(Queue::new(8));
        let mut handles = Vec::new();

        for _ in 0..2 {
            let q = Arc::clone(&q);
            let live = Arc::clone(&live);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    q.push(Token::new(&live));
                }
            }));
        }

        for _ in 0..2 {
            let q = Arc::clone(&q);
            handles.push(thread::spawn(move || {
                // Drain slightly less than was pushed so the queue drop has
                // residual elements to clean up.
                for _ in 0..997 {
                    drop(q.pop());
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(live.load(Ordering::Relaxed), 6);
    }

    assert_eq!(live.load(Ordering::Relaxed), 0);
}
