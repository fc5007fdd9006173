use clap::{Parser, ValueEnum};

use microbatch_core::settings::{BatchSettings, PolicySetting};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    /// Close a batch once the timeout has elapsed since it started (default).
    Timeout,
    /// Additionally start consecutive batches at least one timeout apart.
    Frequency,
}

impl From<PolicyArg> for PolicySetting {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::Timeout => PolicySetting::FixedTimeout,
            PolicyArg::Frequency => PolicySetting::FixedFrequency,
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "microbatch", version, about = "Micro-batching engine demo driver")]
pub struct Cli {
    /// Jobs per batch (overrides the settings file).
    #[arg(short = 'b', long, env = "MICROBATCH_BATCH_SIZE", allow_negative_numbers = true)]
    pub batch_size: Option<i64>,

    /// Batch timeout in milliseconds (overrides the settings file).
    #[arg(short = 't', long = "timeout-ms", env = "MICROBATCH_TIMEOUT_MS", allow_negative_numbers = true)]
    pub timeout_ms: Option<i64>,

    /// Timing policy (overrides the settings file).
    #[arg(long, env = "MICROBATCH_POLICY", value_enum)]
    pub policy: Option<PolicyArg>,

    /// Total number of jobs to submit.
    #[arg(short = 'n', long, default_value_t = 100)]
    pub jobs: u32,

    /// Number of concurrent producers sharing the submissions.
    #[arg(
        short = 'p',
        long,
        default_value_t = 4,
        value_parser = clap::value_parser!(u16).range(1..=256)
    )]
    pub producers: u16,

    /// Make every N-th job fail (0 disables failures).
    #[arg(long, default_value_t = 0)]
    pub fail_every: u32,

    /// How long each job sleeps when it runs.
    #[arg(long, default_value_t = 0)]
    pub job_delay_ms: u64,

    /// Pause between two submissions of the same producer.
    #[arg(long, default_value_t = 0)]
    pub submit_gap_ms: u64,

    /// Persist the effective batching settings before running.
    #[arg(long, default_value_t = false)]
    pub save_config: bool,

    #[arg(long, env = "MICROBATCH_NO_PROGRESS", default_value_t = false)]
    pub no_progress: bool,

    /// Emit logs as JSON lines.
    #[arg(long, env = "MICROBATCH_LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    /// Measure engine throughput with no-op jobs and exit.
    #[arg(long, default_value_t = false)]
    pub bench: bool,
}

impl Cli {
    /// Layer command-line overrides on top of stored settings.
    pub fn apply_overrides(&self, mut settings: BatchSettings) -> BatchSettings {
        if let Some(batch_size) = self.batch_size {
            settings.batch_size = batch_size;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            settings.batch_timeout_ms = timeout_ms;
        }
        if let Some(policy) = self.policy {
            settings.policy = policy.into();
        }
        settings
    }
}
