//! Public API types for the in-process micro-batching engine.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::BatchConfig;
use crate::engine::{EngineError, EngineInner, SubmitError};
use crate::job::{BatchProcessor, Job, JobResult};

/// Why a batch was closed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchTrigger {
    /// The batch reached `batch_size` jobs.
    Size,
    /// The time budget elapsed first.
    Timeout,
    /// Shutdown was requested, so no further jobs could join the batch.
    Drain,
}

/// Whether a processing loop is running.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineState {
    /// No loop is running and the queue is empty.
    Idle,
    /// A loop is forming or processing batches.
    Active,
}

/// Engine event stream payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// A processing loop started (idle to active).
    LoopStarted,
    /// A batch was closed and is about to be processed.
    BatchClosed {
        /// Batch identifier (1-based, in formation order).
        batch_id: u64,
        /// Number of jobs in the batch.
        size: usize,
        /// Why the batch closed.
        trigger: BatchTrigger,
    },
    /// The processor returned for a batch.
    BatchProcessed {
        /// Batch identifier.
        batch_id: u64,
        /// Number of jobs in the batch.
        size: usize,
        /// Successful results.
        succeeded: usize,
        /// Failed results.
        failed: usize,
        /// Time spent inside the processor (milliseconds).
        elapsed_ms: u64,
    },
    /// The queue drained and the processing loop exited.
    LoopIdle,
    /// Shutdown was requested; new submissions are rejected from now on.
    ShutdownRequested,
    /// Shutdown finished draining.
    Drained,
    /// A warning from the engine.
    Warning {
        /// Warning message.
        message: String,
    },
    /// A non-fatal error from the engine.
    Error {
        /// Error message.
        message: String,
    },
}

/// Current engine state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Loop state.
    pub state: EngineState,
    /// Jobs waiting in the queue (advisory).
    pub pending: usize,
    /// Whether shutdown has been requested.
    pub shutdown_requested: bool,
    /// Batches handed to the processor so far.
    pub batches_processed: u64,
    /// Job results received so far.
    pub jobs_processed: u64,
    /// Job results that were failures.
    pub jobs_failed: u64,
}

impl StatusSnapshot {
    pub(crate) fn initial() -> Self {
        Self {
            state: EngineState::Idle,
            pending: 0,
            shutdown_requested: false,
            batches_processed: 0,
            jobs_processed: 0,
            jobs_failed: 0,
        }
    }

    /// Idle with nothing queued.
    pub fn is_drained(&self) -> bool {
        self.state == EngineState::Idle && self.pending == 0
    }
}

/// Results of one processed batch, positionally aligned with the submitted jobs.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    /// Batch identifier (1-based, in formation order).
    pub batch_id: u64,
    /// Why the batch closed.
    pub trigger: BatchTrigger,
    /// Wall-clock time the batch started accumulating (Unix milliseconds).
    pub started_at_ms: i64,
    /// Time spent inside the processor.
    pub elapsed: Duration,
    /// One result per job, in submission order.
    pub results: Vec<JobResult<T>>,
}

/// Handle to a micro-batching engine.
///
/// Cloning the handle is cheap; all clones feed the same queue.
pub struct MicroBatcher<T> {
    pub(crate) inner: Arc<EngineInner<T>>,
}

impl<T> Clone for MicroBatcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for MicroBatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicroBatcher")
            .field("config", &self.inner.cfg)
            .field("status", &*self.inner.snapshot_rx.borrow())
            .finish()
    }
}

impl<T: Send + 'static> MicroBatcher<T> {
    /// Create an engine on the current tokio runtime.
    ///
    /// Fails if the configuration is invalid or no runtime is running.
    pub fn new(
        config: BatchConfig,
        processor: impl BatchProcessor<T>,
    ) -> Result<Self, EngineError> {
        let inner = EngineInner::new(config, Arc::new(processor), None)?;
        Ok(Self { inner })
    }

    /// Like [`new`](Self::new), also returning the stream of batch results.
    pub fn with_outcomes(
        config: BatchConfig,
        processor: impl BatchProcessor<T>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<BatchOutcome<T>>), EngineError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = EngineInner::new(config, Arc::new(processor), Some(tx))?;
        Ok((Self { inner }, rx))
    }

    /// Queue a job; never waits for batching or processing.
    ///
    /// Returns [`SubmitError::ShuttingDown`] once [`shutdown`](Self::shutdown)
    /// has been called.
    pub fn submit(&self, job: Job<T>) -> Result<(), SubmitError> {
        self.inner.submit(job)
    }

    /// Stop accepting jobs and wait until every queued job has been processed.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}

impl<T> MicroBatcher<T> {
    /// Subscribe to the engine event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Get the latest engine snapshot.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.snapshot_rx.borrow().clone()
    }

    /// Configuration the engine was built with.
    pub fn config(&self) -> BatchConfig {
        self.inner.cfg
    }

    /// Jobs currently waiting in the queue.
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }
}
