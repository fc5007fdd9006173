use std::time::Duration;

use microbatch_core::settings::{BatchSettings, PolicySetting};
use serde::{Deserialize, Serialize};

/// How the batch time budget is measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimingPolicy {
    /// A batch closes once `batch_timeout` has elapsed since it started accumulating.
    #[default]
    FixedTimeout,
    /// As [`FixedTimeout`](Self::FixedTimeout), and consecutive batches start at
    /// least `batch_timeout` apart.
    FixedFrequency,
}

impl From<PolicySetting> for TimingPolicy {
    fn from(value: PolicySetting) -> Self {
        match value {
            PolicySetting::FixedTimeout => TimingPolicy::FixedTimeout,
            PolicySetting::FixedFrequency => TimingPolicy::FixedFrequency,
        }
    }
}

/// Invalid batching configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Batch size must be at least 1.
    #[error("batch size must be positive (got {0})")]
    InvalidBatchSize(i64),
    /// Batch timeout must not be negative.
    #[error("batch timeout must not be negative (got {0} ms)")]
    NegativeTimeout(i64),
}

/// Fixed configuration of an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Maximum number of jobs per batch (size trigger).
    pub batch_size: usize,
    /// Time budget per batch (timeout trigger), or minimum spacing between
    /// batch starts under [`TimingPolicy::FixedFrequency`].
    pub batch_timeout: Duration,
    /// Timing policy.
    pub policy: TimingPolicy,
}

impl BatchConfig {
    /// Fixed-timeout configuration.
    pub fn new(batch_size: usize, batch_timeout: Duration) -> Self {
        Self {
            batch_size,
            batch_timeout,
            policy: TimingPolicy::FixedTimeout,
        }
    }

    /// Replace the timing policy.
    pub fn with_policy(mut self, policy: TimingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(0));
        }
        Ok(())
    }
}

impl TryFrom<&BatchSettings> for BatchConfig {
    type Error = ConfigError;

    fn try_from(settings: &BatchSettings) -> Result<Self, Self::Error> {
        if settings.batch_size <= 0 {
            return Err(ConfigError::InvalidBatchSize(settings.batch_size));
        }
        if settings.batch_timeout_ms < 0 {
            return Err(ConfigError::NegativeTimeout(settings.batch_timeout_ms));
        }
        let batch_size = usize::try_from(settings.batch_size)
            .map_err(|_| ConfigError::InvalidBatchSize(settings.batch_size))?;

        Ok(Self {
            batch_size,
            batch_timeout: Duration::from_millis(settings.batch_timeout_ms as u64),
            policy: settings.policy.into(),
        })
    }
}
