use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::job::Job;

/// Thread-safe FIFO of pending jobs.
///
/// Any number of producers may [`enqueue`](Self::enqueue) concurrently; the
/// engine's processing loop is the only consumer. `len` and `is_empty` are
/// point-in-time readings and may be stale as soon as they return.
pub struct JobQueue<T> {
    jobs: Mutex<VecDeque<Job<T>>>,
}

impl<T> JobQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
        }
    }

    // A panicking job never runs under this lock, so a poisoned queue is still consistent.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Job<T>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a job to the tail.
    pub fn enqueue(&self, job: Job<T>) {
        self.lock().push_back(job);
    }

    /// Remove and return the head, or `None` when the queue is empty.
    pub fn dequeue(&self) -> Option<Job<T>> {
        self.lock().pop_front()
    }

    /// Remove up to `max` jobs from the head, oldest first.
    pub fn drain_up_to(&self, max: usize) -> Vec<Job<T>> {
        let mut jobs = self.lock();
        let n = jobs.len().min(max);
        jobs.drain(..n).collect()
    }

    /// Number of pending jobs.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no job is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<T> Default for JobQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JobQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue").field("len", &self.len()).finish()
    }
}
