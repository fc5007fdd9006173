#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! In-process micro-batching engine (job queue, dual-trigger batch formation, drain on shutdown).

/// Public API types for the engine crate.
pub mod api;

mod config;
mod engine;
mod job;
mod queue;

pub use api::{
    BatchOutcome, BatchTrigger, EngineEvent, EngineState, MicroBatcher, StatusSnapshot,
};
pub use config::{BatchConfig, ConfigError, TimingPolicy};
pub use engine::{EngineError, SubmitError};
pub use job::{BatchProcessor, InlineProcessor, Job, JobFailure, JobResult, job};
pub use queue::JobQueue;
