//! Blocking queues
//!
//! Every producer/consumer edge in the pipeline runs over a
//! [`BlockingQueue`]: the decode scheduler pushes frame buffers into sink
//! queues, and consumer adapters push results into their info queues.
//!
//! Capacity is measured in *weight* rather than item count so that one
//! queue type serves both decoded audio (weight = frames) and encoded audio
//! (weight = bytes). The scheduler always uses the non-blocking
//! [`push`](BlockingQueue::push) — fullness is advisory there and enforced
//! by the playlist's fill-mode policy — while adapters use the blocking
//! [`put`](BlockingQueue::put) on their bounded result queues.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Weight of an item for capacity accounting
///
/// Defaults to 1 per item. Frame buffers weigh their frame count (decoded)
/// or byte size (encoded).
pub trait QueueWeight {
    /// Weight contributed to the queue while this item is enqueued
    fn weight(&self) -> usize {
        1
    }
}

/// Outcome of a queue or sink `get`
#[derive(Debug)]
pub enum GetResult<T> {
    /// An item was dequeued
    Ready(T),
    /// Non-blocking call and nothing is available
    NotReady,
    /// The producer finished or the queue was aborted; terminal
    End,
}

impl<T> GetResult<T> {
    /// The item, if ready
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(item) => Some(item),
            _ => None,
        }
    }

    /// True for the terminal `End` status
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    /// No further puts; drains remaining items then reports `End`
    Finished,
    /// Dropped everything; reports `End` immediately
    Aborted,
}

struct Inner<T> {
    items: VecDeque<T>,
    weight: usize,
    lifecycle: Lifecycle,
}

/// Thread-safe blocking queue with purge, flush and abort semantics
pub struct BlockingQueue<T> {
    inner: Mutex<Inner<T>>,
    capacity: Option<usize>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T: QueueWeight> BlockingQueue<T> {
    /// Create an unbounded queue
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Create a queue whose blocking `put` waits while the queued weight is
    /// at or above `capacity`
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                weight: 0,
                lifecycle: Lifecycle::Open,
            }),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Enqueue, blocking while the queue is at capacity
    ///
    /// Returns `false` if the queue was finished or aborted (the item is
    /// dropped).
    pub fn put(&self, item: T) -> bool {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.lifecycle != Lifecycle::Open {
                return false;
            }
            match self.capacity {
                Some(cap) if inner.weight >= cap => {
                    inner = self.not_full.wait(inner).unwrap();
                }
                _ => break,
            }
        }
        inner.weight += item.weight();
        inner.items.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Enqueue without ever blocking, regardless of capacity
    ///
    /// Returns `false` if the queue was finished or aborted.
    pub fn push(&self, item: T) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.lifecycle != Lifecycle::Open {
            return false;
        }
        inner.weight += item.weight();
        inner.items.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Dequeue one item
    ///
    /// With `block = false` this never waits: it returns
    /// [`GetResult::NotReady`] when the queue is empty but still open.
    /// After [`abort`](Self::abort) every call returns [`GetResult::End`].
    pub fn get(&self, block: bool) -> GetResult<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.items.pop_front() {
                inner.weight -= item.weight();
                self.not_full.notify_one();
                return GetResult::Ready(item);
            }
            if inner.lifecycle != Lifecycle::Open {
                return GetResult::End;
            }
            if !block {
                return GetResult::NotReady;
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Report availability without consuming
    ///
    /// With `block = true` this waits until an item is available or the
    /// queue ends; it returns `false` only on end.
    pub fn peek(&self, block: bool) -> bool {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if !inner.items.is_empty() {
                return true;
            }
            if inner.lifecycle != Lifecycle::Open || !block {
                return false;
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Remove and return all queued items matching the predicate
    pub fn purge(&self, mut predicate: impl FnMut(&T) -> bool) -> Vec<T> {
        let mut inner = self.inner.lock().unwrap();
        let mut kept = VecDeque::with_capacity(inner.items.len());
        let mut removed = Vec::new();
        while let Some(item) = inner.items.pop_front() {
            if predicate(&item) {
                inner.weight -= item.weight();
                removed.push(item);
            } else {
                kept.push_back(item);
            }
        }
        inner.items = kept;
        if !removed.is_empty() {
            self.not_full.notify_all();
        }
        removed
    }

    /// Drop all queued items, returning how many were dropped
    pub fn flush(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let count = inner.items.len();
        inner.items.clear();
        inner.weight = 0;
        if count > 0 {
            self.not_full.notify_all();
        }
        count
    }

    /// Abort: drop everything, wake all waiters with `End`, refuse further
    /// puts. Idempotent.
    pub fn abort(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.clear();
        inner.weight = 0;
        inner.lifecycle = Lifecycle::Aborted;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Graceful completion: refuse further puts, but let getters drain the
    /// remaining items before they observe `End`
    pub fn finish(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.lifecycle == Lifecycle::Open {
            inner.lifecycle = Lifecycle::Finished;
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Re-arm an aborted or finished queue (used on sink re-attach)
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.clear();
        inner.weight = 0;
        inner.lifecycle = Lifecycle::Open;
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    /// True if no items are queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total queued weight
    pub fn queued_weight(&self) -> usize {
        self.inner.lock().unwrap().weight
    }

    /// True if a capacity is configured and the queued weight has reached it
    pub fn is_full(&self) -> bool {
        match self.capacity {
            Some(cap) => self.inner.lock().unwrap().weight >= cap,
            None => false,
        }
    }
}

impl<T: QueueWeight> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    impl QueueWeight for i32 {}

    #[test]
    fn nonblocking_get_on_empty_returns_not_ready() {
        let queue: BlockingQueue<i32> = BlockingQueue::new();
        assert!(matches!(queue.get(false), GetResult::NotReady));
    }

    #[test]
    fn fifo_order() {
        let queue = BlockingQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.get(false).ready(), Some(1));
        assert_eq!(queue.get(false).ready(), Some(2));
        assert_eq!(queue.get(false).ready(), Some(3));
    }

    #[test]
    fn abort_is_terminal_and_idempotent() {
        let queue = BlockingQueue::new();
        queue.push(1);
        queue.abort();
        assert!(queue.get(true).is_end());
        assert!(queue.get(false).is_end());
        assert!(queue.get(true).is_end());
        assert!(!queue.push(2));
    }

    #[test]
    fn abort_wakes_blocked_getter() {
        let queue: Arc<BlockingQueue<i32>> = Arc::new(BlockingQueue::new());
        let q = Arc::clone(&queue);
        let handle = thread::spawn(move || q.get(true).is_end());
        thread::sleep(Duration::from_millis(50));
        queue.abort();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn finish_drains_before_end() {
        let queue = BlockingQueue::new();
        queue.push(7);
        queue.finish();
        assert_eq!(queue.get(true).ready(), Some(7));
        assert!(queue.get(true).is_end());
        assert!(!queue.push(8));
    }

    #[test]
    fn purge_removes_only_matching() {
        let queue = BlockingQueue::new();
        for n in 0..6 {
            queue.push(n);
        }
        let removed = queue.purge(|n| n % 2 == 0);
        assert_eq!(removed, vec![0, 2, 4]);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.get(false).ready(), Some(1));
    }

    #[test]
    fn flush_drops_everything() {
        let queue = BlockingQueue::new();
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.flush(), 2);
        assert!(matches!(queue.get(false), GetResult::NotReady));
    }

    #[test]
    fn bounded_put_blocks_until_drained() {
        let queue: Arc<BlockingQueue<i32>> = Arc::new(BlockingQueue::bounded(2));
        assert!(queue.put(1));
        assert!(queue.put(2));
        assert!(queue.is_full());

        let q = Arc::clone(&queue);
        let producer = thread::spawn(move || q.put(3));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get(true).ready(), Some(1));
        assert!(producer.join().unwrap());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn peek_reports_without_consuming() {
        let queue = BlockingQueue::new();
        assert!(!queue.peek(false));
        queue.push(5);
        assert!(queue.peek(false));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn reset_rearms_after_abort() {
        let queue = BlockingQueue::new();
        queue.abort();
        queue.reset();
        assert!(queue.push(9));
        assert_eq!(queue.get(false).ready(), Some(9));
    }
}
