//! Jobs, their results, and the processor contract.

/// Outcome of running one [`Job`].
pub type JobResult<T> = Result<T, JobFailure>;

/// A deferred, one-shot unit of work.
///
/// Jobs carry no identity; their position in submission order is the only
/// thing the engine tracks about them.
pub type Job<T> = Box<dyn FnOnce() -> JobResult<T> + Send + 'static>;

/// Box a closure into a [`Job`].
pub fn job<T, F>(f: F) -> Job<T>
where
    F: FnOnce() -> JobResult<T> + Send + 'static,
{
    Box::new(f)
}

/// Failure reported by a job (or on behalf of a job whose batch could not be processed).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct JobFailure {
    message: String,
}

impl JobFailure {
    /// Create a failure with a human-readable description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Failure description.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Consumes one batch of jobs and returns one result per job.
///
/// Implementations must return exactly `batch.len()` results, where element
/// `i` of the output belongs to element `i` of the input. The engine calls
/// `process` from a blocking-capable thread and never overlaps two calls.
pub trait BatchProcessor<T>: Send + Sync + 'static {
    /// Process a non-empty batch, in submission order.
    fn process(&self, batch: Vec<Job<T>>) -> Vec<JobResult<T>>;
}

impl<T, F> BatchProcessor<T> for F
where
    F: Fn(Vec<Job<T>>) -> Vec<JobResult<T>> + Send + Sync + 'static,
{
    fn process(&self, batch: Vec<Job<T>>) -> Vec<JobResult<T>> {
        self(batch)
    }
}

/// Runs every job of the batch in order on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineProcessor;

impl<T: 'static> BatchProcessor<T> for InlineProcessor {
    fn process(&self, batch: Vec<Job<T>>) -> Vec<JobResult<T>> {
        batch.into_iter().map(|job| job()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_processor_keeps_positions() {
        let batch: Vec<Job<u32>> = vec![
            job(|| Ok(1)),
            job(|| Err(JobFailure::new("boom"))),
            job(|| Ok(3)),
        ];

        let results = InlineProcessor.process(batch);

        assert_eq!(results, vec![Ok(1), Err(JobFailure::new("boom")), Ok(3)]);
    }

    #[test]
    fn closures_are_processors() {
        let halve = |batch: Vec<Job<u32>>| -> Vec<JobResult<u32>> {
            batch.into_iter().map(|job| job().map(|v| v / 2)).collect()
        };

        let results = halve.process(vec![job(|| Ok(8)), job(|| Ok(4))]);

        assert_eq!(results, vec![Ok(4), Ok(2)]);
    }

    #[test]
    fn failure_displays_its_message() {
        let failure = JobFailure::new("disk full");
        assert_eq!(failure.to_string(), "disk full");
        assert_eq!(failure.message(), "disk full");
    }
}
