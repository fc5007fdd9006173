use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use microbatch_engine::{BatchConfig, Job, JobResult, MicroBatcher, job};

use crate::format::{format_duration, format_number};

const BENCH_PRODUCERS: u32 = 4;

pub async fn run_benchmark(config: BatchConfig, jobs: u32) -> anyhow::Result<()> {
    let jobs = jobs.max(1);
    let calls = Arc::new(AtomicU64::new(0));

    let processor = {
        let calls = calls.clone();
        move |batch: Vec<Job<u64>>| -> Vec<JobResult<u64>> {
            calls.fetch_add(1, Ordering::Relaxed);
            batch.into_iter().map(|job| job()).collect()
        }
    };
    let batcher = MicroBatcher::new(config, processor)?;

    println!("Benchmark: {} jobs", format_number(u64::from(jobs)));
    println!(
        "Batch size: {}, timeout: {}, policy: {:?}",
        format_number(config.batch_size as u64),
        format_duration(config.batch_timeout),
        config.policy
    );

    let started_at = Instant::now();
    let mut producers = Vec::with_capacity(BENCH_PRODUCERS as usize);
    for p in 0..BENCH_PRODUCERS {
        let batcher = batcher.clone();
        producers.push(tokio::spawn(async move {
            let mut i = p;
            while i < jobs {
                let n = u64::from(i);
                batcher.submit(job(move || Ok(n)))?;
                i += BENCH_PRODUCERS;
            }
            anyhow::Ok(())
        }));
    }
    for producer in producers {
        match producer.await {
            Ok(res) => res?,
            Err(err) => anyhow::bail!("benchmark producer join error: {err}"),
        }
    }
    batcher.shutdown().await;

    let duration = started_at.elapsed();
    let batches = calls.load(Ordering::Relaxed);
    let secs = duration.as_secs_f64().max(f64::EPSILON);

    println!("Duration: {}", format_duration(duration));
    println!("Batches: {}", format_number(batches));
    println!("Throughput: {:.0} jobs/s, {:.0} batches/s", f64::from(jobs) / secs, batches as f64 / secs);
    Ok(())
}
