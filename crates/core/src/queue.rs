use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

/// Result of attempting to dequeue.
///
/// # Example
/// ```rust
/// use vcam_core::prelude::{DoneQueue, RecvOutcome};
///
/// let done = DoneQueue::new();
/// match done.try_recv() {
///     RecvOutcome::Empty | RecvOutcome::Closed | RecvOutcome::Data(_) => {}
/// }
/// ```
#[derive(Debug, PartialEq, Eq)]
pub enum RecvOutcome<T> {
    /// Received value.
    Data(T),
    /// Queue has been closed and drained.
    Closed,
    /// Queue currently empty.
    Empty,
}

/// FIFO of buffer indices currently owned by the producer.
///
/// Guarded by its own lock so producer ticks never wait on control-path work.
///
/// # Example
/// ```rust
/// use vcam_core::prelude::ActiveQueue;
///
/// let q = ActiveQueue::new();
/// assert!(q.push(1));
/// assert!(!q.push(1));
/// assert!(q.push(0));
/// assert_eq!(q.pop(), Some(1));
/// assert_eq!(q.drain(), vec![0]);
/// ```
#[derive(Debug, Default)]
pub struct ActiveQueue {
    inner: Mutex<VecDeque<u32>>,
}

impl ActiveQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an index; returns `false` if it is already queued.
    pub fn push(&self, index: u32) -> bool {
        let mut q = self.inner.lock();
        if q.contains(&index) {
            return false;
        }
        q.push_back(index);
        true
    }

    /// Remove the oldest index.
    pub fn pop(&self) -> Option<u32> {
        self.inner.lock().pop_front()
    }

    /// Remove every queued index in FIFO order.
    pub fn drain(&self) -> Vec<u32> {
        self.inner.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct DoneInner {
    items: VecDeque<u32>,
    closed: bool,
}

/// Completion-ordered list of buffers handed back to the consumer, with a
/// condition variable for blocking retrieval.
///
/// # Example
/// ```rust
/// use vcam_core::prelude::{DoneQueue, RecvOutcome};
///
/// let done = DoneQueue::new();
/// done.push(2);
/// assert_eq!(done.try_recv(), RecvOutcome::Data(2));
/// done.close();
/// assert_eq!(done.recv(), RecvOutcome::Closed);
/// ```
pub struct DoneQueue {
    inner: Mutex<DoneInner>,
    ready: Condvar,
}

impl Default for DoneQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DoneQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DoneInner {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Append a completed index and wake one waiter.
    pub fn push(&self, index: u32) {
        self.inner.lock().items.push_back(index);
        self.ready.notify_one();
    }

    /// Attempt to receive without blocking.
    pub fn try_recv(&self) -> RecvOutcome<u32> {
        let mut inner = self.inner.lock();
        Self::take(&mut inner)
    }

    /// Block until a completion arrives or the queue is closed.
    pub fn recv(&self) -> RecvOutcome<u32> {
        let mut inner = self.inner.lock();
        loop {
            match Self::take(&mut inner) {
                RecvOutcome::Empty => self.ready.wait(&mut inner),
                other => return other,
            }
        }
    }

    /// Block for at most `timeout`; yields `Empty` when it elapses.
    pub fn recv_timeout(&self, timeout: Duration) -> RecvOutcome<u32> {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.recv_deadline(deadline),
            None => self.recv(),
        }
    }

    /// Block until `deadline`; spurious or unrelated wakeups do not extend it.
    pub fn recv_deadline(&self, deadline: Instant) -> RecvOutcome<u32> {
        let mut inner = self.inner.lock();
        loop {
            match Self::take(&mut inner) {
                RecvOutcome::Empty => {
                    if self.ready.wait_until(&mut inner, deadline).timed_out() {
                        return Self::take(&mut inner);
                    }
                }
                other => return other,
            }
        }
    }

    fn take(inner: &mut DoneInner) -> RecvOutcome<u32> {
        match inner.items.pop_front() {
            Some(index) => RecvOutcome::Data(index),
            None if inner.closed => RecvOutcome::Closed,
            None => RecvOutcome::Empty,
        }
    }

    /// Drop pending completions (pool release).
    pub fn clear(&self) {
        self.inner.lock().items.clear();
    }

    /// Close the queue; blocked receivers wake with `Closed` once drained.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
