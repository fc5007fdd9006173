use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use microbatch_engine::{Job, JobFailure, MicroBatcher, job};

use crate::shutdown::ShutdownController;

#[derive(Debug, Clone, Copy)]
pub struct Workload {
    pub jobs: u32,
    pub producers: u16,
    pub fail_every: u32,
    pub job_delay: Duration,
    pub submit_gap: Duration,
}

fn should_fail(seq: u32, fail_every: u32) -> bool {
    fail_every > 0 && (seq + 1) % fail_every == 0
}

/// Number of jobs producer `idx` submits so that all producers add up to `total`.
fn producer_share(total: u32, producers: u32, idx: u32) -> u32 {
    let base = total / producers;
    let extra = u32::from(idx < total % producers);
    base + extra
}

pub fn demo_job(seq: u32, workload: &Workload) -> Job<String> {
    let fail = should_fail(seq, workload.fail_every);
    let delay = workload.job_delay;
    job(move || {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if fail {
            return Err(JobFailure::new(format!("job {seq} failed on purpose")));
        }
        Ok(format!("job {seq} done"))
    })
}

/// Spawn the producers; each task yields how many jobs it got accepted.
pub fn spawn_producers(
    batcher: &MicroBatcher<String>,
    workload: Workload,
    shutdown: Arc<ShutdownController>,
) -> JoinSet<u32> {
    let producers = u32::from(workload.producers.max(1));
    let mut set = JoinSet::new();

    for idx in 0..producers {
        let share = producer_share(workload.jobs, producers, idx);
        let batcher = batcher.clone();
        let shutdown = shutdown.clone();

        set.spawn(async move {
            let mut accepted = 0;
            for i in 0..share {
                if shutdown.is_stopping() {
                    break;
                }
                let seq = i * producers + idx;
                if let Err(err) = batcher.submit(demo_job(seq, &workload)) {
                    tracing::warn!(producer = idx, "submit rejected: {err}");
                    break;
                }
                accepted += 1;

                if workload.submit_gap.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(workload.submit_gap).await;
                }
            }
            accepted
        });
    }

    set
}
