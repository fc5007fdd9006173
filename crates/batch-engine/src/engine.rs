use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::{Notify, broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::api::{BatchOutcome, BatchTrigger, EngineEvent, EngineState, StatusSnapshot};
use crate::config::{BatchConfig, ConfigError, TimingPolicy};
use crate::job::{BatchProcessor, Job, JobFailure, JobResult};
use crate::queue::JobQueue;

/// Failure to construct an engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The batching configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The engine must be created from within a tokio runtime.
    #[error("no tokio runtime is running")]
    NoRuntime,
}

/// Rejected submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// Shutdown has been requested; the job was not queued.
    #[error("engine is shutting down")]
    ShuttingDown,
}

/// Loop bookkeeping guarded by the lock that also serializes queue appends
/// against the loop's final emptiness check.
#[derive(Debug)]
struct Lifecycle {
    active: bool,
    closed: bool,
    drain_announced: bool,
    last_batch_started: Option<Instant>,
}

pub(crate) struct EngineInner<T> {
    pub(crate) cfg: BatchConfig,
    pub(crate) queue: JobQueue<T>,
    pub(crate) event_tx: broadcast::Sender<EngineEvent>,
    pub(crate) snapshot_rx: watch::Receiver<StatusSnapshot>,
    snapshot_tx: watch::Sender<StatusSnapshot>,
    processor: Arc<dyn BatchProcessor<T>>,
    outcome_tx: Option<mpsc::UnboundedSender<BatchOutcome<T>>>,
    lifecycle: Mutex<Lifecycle>,
    job_arrived: Notify,
    next_batch_id: AtomicU64,
    runtime: Handle,
}

impl<T: Send + 'static> EngineInner<T> {
    pub(crate) fn new(
        cfg: BatchConfig,
        processor: Arc<dyn BatchProcessor<T>>,
        outcome_tx: Option<mpsc::UnboundedSender<BatchOutcome<T>>>,
    ) -> Result<Arc<Self>, EngineError> {
        cfg.validate()?;
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let (event_tx, _) = broadcast::channel::<EngineEvent>(1024);
        let (snapshot_tx, snapshot_rx) = watch::channel(StatusSnapshot::initial());

        debug!(
            batch_size = cfg.batch_size,
            batch_timeout_ms = cfg.batch_timeout.as_millis() as u64,
            policy = ?cfg.policy,
            "micro-batcher created"
        );

        Ok(Arc::new(Self {
            cfg,
            queue: JobQueue::new(),
            event_tx,
            snapshot_rx,
            snapshot_tx,
            processor,
            outcome_tx,
            lifecycle: Mutex::new(Lifecycle {
                active: false,
                closed: false,
                drain_announced: false,
                last_batch_started: None,
            }),
            job_arrived: Notify::new(),
            next_batch_id: AtomicU64::new(1),
            runtime,
        }))
    }

    pub(crate) fn submit(self: &Arc<Self>, job: Job<T>) -> Result<(), SubmitError> {
        let start_loop = {
            let mut life = self.lock_lifecycle();
            if life.closed {
                return Err(SubmitError::ShuttingDown);
            }
            self.queue.enqueue(job);
            let start_loop = !life.active;
            life.active = true;
            self.snapshot_tx.send_modify(|s| {
                s.state = EngineState::Active;
                s.pending = self.queue.len();
            });
            start_loop
        };

        if start_loop {
            let inner = self.clone();
            self.runtime.spawn(async move { inner.run().await });
        } else {
            self.job_arrived.notify_one();
        }
        Ok(())
    }

    pub(crate) async fn shutdown(&self) {
        let first = {
            let mut life = self.lock_lifecycle();
            !std::mem::replace(&mut life.closed, true)
        };

        if first {
            info!(pending = self.queue.len(), "shutdown requested, draining");
            self.snapshot_tx.send_modify(|s| s.shutdown_requested = true);
            self.emit(EngineEvent::ShutdownRequested);
            // Cut short a partial batch that is waiting for more jobs.
            self.job_arrived.notify_one();
        }

        let mut rx = self.snapshot_rx.clone();
        // The sender lives as long as `self`, so this only returns once drained.
        let _ = rx.wait_for(StatusSnapshot::is_drained).await;

        // Whichever caller observes the drain first announces it, even if the
        // caller that requested shutdown stopped waiting.
        let announce = {
            let mut life = self.lock_lifecycle();
            !std::mem::replace(&mut life.drain_announced, true)
        };
        if announce {
            info!("drained");
            self.emit(EngineEvent::Drained);
        }
    }

    async fn run(self: Arc<Self>) {
        debug!("processing loop started");
        self.emit(EngineEvent::LoopStarted);

        loop {
            self.wait_for_frequency_slot().await;

            let started = Instant::now();
            let started_at_ms = Utc::now().timestamp_millis();

            if let Some((batch, trigger)) = self.collect_batch(started).await {
                self.lock_lifecycle().last_batch_started = Some(started);
                self.dispatch(batch, trigger, started_at_ms).await;
            }

            if self.try_go_idle() {
                break;
            }
        }

        debug!("processing loop idle");
        self.emit(EngineEvent::LoopIdle);
    }

    async fn wait_for_frequency_slot(&self) {
        if self.cfg.policy != TimingPolicy::FixedFrequency {
            return;
        }
        let last = self.lock_lifecycle().last_batch_started;
        if let Some(last) = last {
            tokio::time::sleep_until(deadline_after(last, self.cfg.batch_timeout)).await;
        }
    }

    /// Accumulate up to `batch_size` jobs, closing early once the time budget
    /// that began at `started` runs out or shutdown leaves nothing to wait for.
    /// `None` if the queue was already empty.
    async fn collect_batch(&self, started: Instant) -> Option<(Vec<Job<T>>, BatchTrigger)> {
        let batch_size = self.cfg.batch_size;
        let deadline = deadline_after(started, self.cfg.batch_timeout);
        let mut batch: Vec<Job<T>> = Vec::with_capacity(batch_size);

        loop {
            batch.extend(self.queue.drain_up_to(batch_size - batch.len()));
            self.publish_pending();

            if batch.len() >= batch_size {
                return Some((batch, BatchTrigger::Size));
            }
            if batch.is_empty() {
                return None;
            }
            if Instant::now() >= deadline {
                return Some((batch, BatchTrigger::Timeout));
            }
            if self.lock_lifecycle().closed {
                return Some((batch, BatchTrigger::Drain));
            }

            // A submit between the drain and this wait leaves a permit behind,
            // so the wakeup is not lost.
            let _ = tokio::time::timeout_at(deadline, self.job_arrived.notified()).await;
        }
    }

    async fn dispatch(&self, batch: Vec<Job<T>>, trigger: BatchTrigger, started_at_ms: i64) {
        let batch_id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        let size = batch.len();

        debug!(batch_id, size, ?trigger, "batch closed");
        self.emit(EngineEvent::BatchClosed {
            batch_id,
            size,
            trigger,
        });

        let processor = self.processor.clone();
        let processing_started = Instant::now();
        let results: Vec<JobResult<T>> =
            match tokio::task::spawn_blocking(move || processor.process(batch)).await {
                Ok(results) => results,
                Err(err) => {
                    let message = format!("batch {batch_id}: processor failed: {err}");
                    error!(batch_id, size, "{message}");
                    self.emit(EngineEvent::Error {
                        message: message.clone(),
                    });
                    (0..size).map(|_| Err(JobFailure::new(message.clone()))).collect()
                }
            };
        let elapsed = processing_started.elapsed();

        if results.len() != size {
            let message = format!(
                "batch {batch_id}: processor returned {} results for {size} jobs",
                results.len()
            );
            warn!(batch_id, size, returned = results.len(), "{message}");
            self.emit(EngineEvent::Warning { message });
        }

        let failed = results.iter().filter(|r| r.is_err()).count();
        let succeeded = results.len() - failed;
        self.snapshot_tx.send_modify(|s| {
            s.batches_processed += 1;
            s.jobs_processed += results.len() as u64;
            s.jobs_failed += failed as u64;
        });

        debug!(
            batch_id,
            succeeded,
            failed,
            elapsed_ms = elapsed.as_millis() as u64,
            "batch processed"
        );
        self.emit(EngineEvent::BatchProcessed {
            batch_id,
            size,
            succeeded,
            failed,
            elapsed_ms: elapsed.as_millis() as u64,
        });

        if let Some(tx) = &self.outcome_tx {
            let _ = tx.send(BatchOutcome {
                batch_id,
                trigger,
                started_at_ms,
                elapsed,
                results,
            });
        }
    }

    /// Leave the active state if nothing is queued. Holding the lifecycle lock
    /// makes the emptiness check and the flag change atomic with respect to
    /// `submit`.
    fn try_go_idle(&self) -> bool {
        let mut life = self.lock_lifecycle();
        if !self.queue.is_empty() {
            return false;
        }
        life.active = false;
        self.snapshot_tx.send_modify(|s| {
            s.state = EngineState::Idle;
            s.pending = 0;
        });
        true
    }
}

// Absurdly large timeouts saturate instead of overflowing `Instant`.
fn deadline_after(start: Instant, budget: Duration) -> Instant {
    start
        .checked_add(budget)
        .unwrap_or_else(|| start + Duration::from_secs(86_400 * 365 * 30))
}

impl<T> EngineInner<T> {
    // Nothing panics while the lock is held; recover rather than wedge the engine.
    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }

    fn publish_pending(&self) {
        self.snapshot_tx.send_modify(|s| s.pending = self.queue.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MicroBatcher;
    use crate::job::{InlineProcessor, job};

    fn cfg(batch_size: usize, timeout_ms: u64) -> BatchConfig {
        BatchConfig::new(batch_size, Duration::from_millis(timeout_ms))
    }

    #[test]
    fn construction_outside_a_runtime_fails() {
        let err = MicroBatcher::<u32>::new(cfg(2, 10), InlineProcessor).unwrap_err();
        assert!(matches!(err, EngineError::NoRuntime));
    }

    #[tokio::test]
    async fn zero_batch_size_fails_fast() {
        let err = MicroBatcher::<u32>::new(cfg(0, 10), InlineProcessor).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Config(ConfigError::InvalidBatchSize(0))
        ));
    }

    #[tokio::test]
    async fn shutdown_on_idle_engine_returns_promptly() {
        let batcher = MicroBatcher::<u32>::new(cfg(4, 1_000), InlineProcessor).unwrap();

        tokio::time::timeout(Duration::from_millis(200), batcher.shutdown())
            .await
            .expect("idle shutdown should not wait");

        assert!(batcher.snapshot().shutdown_requested);
        assert!(batcher.snapshot().is_drained());
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected_and_shutdown_is_idempotent() {
        let batcher = MicroBatcher::<u32>::new(cfg(4, 10), InlineProcessor).unwrap();
        batcher.shutdown().await;

        assert_eq!(
            batcher.submit(job(|| Ok(1))),
            Err(SubmitError::ShuttingDown)
        );
        assert_eq!(batcher.pending(), 0);

        tokio::time::timeout(Duration::from_millis(200), batcher.shutdown())
            .await
            .expect("second shutdown should return at once");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drained_is_announced_once_even_if_the_first_waiter_gives_up() {
        let processor = |batch: Vec<Job<u32>>| -> Vec<JobResult<u32>> {
            std::thread::sleep(Duration::from_millis(150));
            batch.into_iter().map(|job| job()).collect()
        };
        let batcher = MicroBatcher::new(cfg(1, 0), processor).unwrap();
        let mut events = batcher.subscribe();
        batcher.submit(job(|| Ok(1))).unwrap();

        let gave_up = tokio::time::timeout(Duration::from_millis(20), batcher.shutdown()).await;
        assert!(gave_up.is_err());

        tokio::time::timeout(Duration::from_secs(5), batcher.shutdown())
            .await
            .expect("second shutdown should finish once the batch is done");
        batcher.shutdown().await;

        let mut drained = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, EngineEvent::Drained) {
                drained += 1;
            }
        }
        assert_eq!(drained, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_cuts_a_partial_batch_short() {
        let (batcher, mut outcomes) =
            MicroBatcher::with_outcomes(cfg(10, 60_000), InlineProcessor).unwrap();
        for n in 0..3u32 {
            batcher.submit(job(move || Ok(n))).unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), batcher.shutdown())
            .await
            .expect("shutdown should not wait for the batch timeout");

        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome.trigger, BatchTrigger::Drain);
        assert_eq!(outcome.results, vec![Ok(0), Ok(1), Ok(2)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn processor_panic_fails_its_batch_and_the_loop_keeps_going() {
        let processor = |batch: Vec<Job<u32>>| -> Vec<JobResult<u32>> {
            let results: Vec<JobResult<u32>> = batch.into_iter().map(|job| job()).collect();
            if results.contains(&Ok(13)) {
                panic!("unlucky batch");
            }
            results
        };
        let (batcher, mut outcomes) = MicroBatcher::with_outcomes(cfg(1, 0), processor).unwrap();
        let mut events = batcher.subscribe();

        for n in [12u32, 13, 14] {
            batcher.submit(job(move || Ok(n))).unwrap();
        }
        batcher.shutdown().await;

        let first = outcomes.recv().await.unwrap();
        let second = outcomes.recv().await.unwrap();
        let third = outcomes.recv().await.unwrap();
        assert_eq!(first.results, vec![Ok(12)]);
        assert_eq!(second.results.len(), 1);
        assert!(second.results[0].is_err());
        assert_eq!(third.results, vec![Ok(14)]);

        let snapshot = batcher.snapshot();
        assert_eq!(snapshot.batches_processed, 3);
        assert_eq!(snapshot.jobs_failed, 1);

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, EngineEvent::Error { .. }) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn short_result_vector_is_reported() {
        let processor = |_batch: Vec<Job<u32>>| -> Vec<JobResult<u32>> { Vec::new() };
        let (batcher, mut outcomes) = MicroBatcher::with_outcomes(cfg(2, 0), processor).unwrap();
        let mut events = batcher.subscribe();

        batcher.submit(job(|| Ok(1))).unwrap();
        batcher.submit(job(|| Ok(2))).unwrap();
        batcher.shutdown().await;

        assert!(outcomes.recv().await.unwrap().results.is_empty());
        let mut warnings = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::Warning { message } = event {
                warnings.push(message);
            }
        }
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("0 results for 2 jobs"));
    }

    #[tokio::test]
    async fn job_failures_pass_through_untouched() {
        let (batcher, mut outcomes) =
            MicroBatcher::with_outcomes(cfg(3, 0), InlineProcessor).unwrap();
        let before_ms = Utc::now().timestamp_millis();

        batcher.submit(job(|| Ok(1u32))).unwrap();
        batcher
            .submit(job(|| Err(JobFailure::new("bad input"))))
            .unwrap();
        batcher.submit(job(|| Ok(3u32))).unwrap();
        batcher.shutdown().await;

        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome.trigger, BatchTrigger::Size);
        assert_eq!(
            outcome.results,
            vec![Ok(1), Err(JobFailure::new("bad input")), Ok(3)]
        );
        assert!((before_ms..=Utc::now().timestamp_millis()).contains(&outcome.started_at_ms));
        assert_eq!(batcher.snapshot().jobs_failed, 1);
        assert_eq!(batcher.snapshot().jobs_processed, 3);
    }
}
