#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use microbatch_engine::{BatchProcessor, Job, JobResult};

/// Runs jobs inline and records what each batch contained.
#[derive(Clone, Default)]
pub struct Recorder {
    batches: Arc<Mutex<Vec<Vec<u32>>>>,
    calls: Arc<Mutex<Vec<Instant>>>,
    in_flight: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
    delay: Duration,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn batches(&self) -> Vec<Vec<u32>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches().iter().map(Vec::len).collect()
    }

    pub fn flattened(&self) -> Vec<u32> {
        self.batches().into_iter().flatten().collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

impl BatchProcessor<u32> for Recorder {
    fn process(&self, batch: Vec<Job<u32>>) -> Vec<JobResult<u32>> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.calls.lock().unwrap().push(Instant::now());

        let results: Vec<JobResult<u32>> = batch.into_iter().map(|job| job()).collect();
        self.batches.lock().unwrap().push(
            results
                .iter()
                .map(|r| r.as_ref().copied().unwrap_or(u32::MAX))
                .collect(),
        );

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.in_flight.store(false, Ordering::SeqCst);
        results
    }
}

pub fn value(n: u32) -> Job<u32> {
    microbatch_engine::job(move || Ok(n))
}
