mod bench;
mod cli;
mod format;
mod logging;
mod shutdown;
mod ui;
mod workload;

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;

use microbatch_core::settings::{BatchSettings, load_settings, save_settings};
use microbatch_engine::{BatchConfig, InlineProcessor, MicroBatcher};

use crate::bench::run_benchmark;
use crate::cli::Cli;
use crate::format::{format_batch_line, format_duration, format_engine_event, format_number};
use crate::shutdown::{ShutdownController, ShutdownEvent, spawn_ctrl_c_handler};
use crate::ui::Ui;
use crate::workload::{Workload, spawn_producers};

fn print_line(ui: &Option<Ui>, line: &str) {
    match ui {
        Some(ui) => ui.println(line),
        None => println!("{line}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_json);

    let stored = match load_settings() {
        Ok(Some(settings)) => settings,
        Ok(None) => BatchSettings::default(),
        Err(err) => {
            tracing::warn!("failed to read settings (using defaults): {err:#}");
            BatchSettings::default()
        }
    };
    let settings = cli.apply_overrides(stored);
    let config = BatchConfig::try_from(&settings).context("invalid batching settings")?;

    if cli.save_config {
        let path = save_settings(&settings).context("save settings")?;
        tracing::info!(path = %path.display(), "settings saved");
    }

    if cli.bench {
        return run_benchmark(config, cli.jobs).await;
    }

    let (batcher, mut outcomes) = MicroBatcher::with_outcomes(config, InlineProcessor)?;
    let mut events = batcher.subscribe();

    let shutdown = Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_ctrl_c_handler(shutdown.clone(), shutdown_tx);

    let ui = if !cli.no_progress && std::io::stdout().is_terminal() {
        Some(Ui::new(u64::from(cli.jobs)))
    } else {
        None
    };

    print_line(
        &ui,
        &format!(
            "microbatch {} batch_size={} timeout={} policy={:?} jobs={} producers={}",
            env!("CARGO_PKG_VERSION"),
            config.batch_size,
            format_duration(config.batch_timeout),
            config.policy,
            cli.jobs,
            cli.producers,
        ),
    );

    let workload = Workload {
        jobs: cli.jobs,
        producers: cli.producers,
        fail_every: cli.fail_every,
        job_delay: Duration::from_millis(cli.job_delay_ms),
        submit_gap: Duration::from_millis(cli.submit_gap_ms),
    };

    let started_at = Instant::now();
    let mut producers = spawn_producers(&batcher, workload, shutdown.clone());
    let mut drain = {
        let batcher = batcher.clone();
        tokio::spawn(async move {
            let mut accepted = 0u64;
            while let Some(res) = producers.join_next().await {
                match res {
                    Ok(n) => accepted += u64::from(n),
                    Err(err) => tracing::error!("producer task join error: {err}"),
                }
            }
            batcher.shutdown().await;
            accepted
        })
    };

    let mut batches = 0u64;
    let mut processed = 0u64;
    let mut failed = 0u64;
    let mut record = |outcome: microbatch_engine::BatchOutcome<String>| {
        batches += 1;
        processed += outcome.results.len() as u64;
        failed += outcome.results.iter().filter(|r| r.is_err()).count() as u64;
        if let Some(ui) = &ui {
            ui.record_batch(outcome.results.len(), batches);
        }
        print_line(&ui, &format_batch_line(&outcome));
    };

    let accepted = loop {
        tokio::select! {
            ev_opt = shutdown_rx.recv() => {
                match ev_opt {
                    Some(ShutdownEvent::Graceful) => {
                        let msg = "Stop requested, draining queued jobs (press CTRL+C again to exit immediately).";
                        match &ui {
                            Some(ui) => ui.set_stop_message(msg),
                            None => eprintln!("{msg}"),
                        }
                    }
                    Some(ShutdownEvent::Immediate) => {
                        eprintln!("Stop requested again, exiting immediately.");
                        if let Some(ui) = &ui {
                            ui.freeze();
                        }
                        std::process::exit(130);
                    }
                    None => {}
                }
            }
            Some(outcome) = outcomes.recv() => record(outcome),
            ev = events.recv() => {
                match ev {
                    Ok(event) => {
                        if let Some(line) = format_engine_event(&event) {
                            print_line(&ui, &line);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "engine event stream lagged");
                    }
                    Err(RecvError::Closed) => {}
                }
            }
            res = &mut drain => {
                break res.context("drain task join error")?;
            }
        }
    };

    // Batches finished before the drain completed may still be buffered.
    while let Ok(outcome) = outcomes.try_recv() {
        record(outcome);
    }
    drop(record);
    while let Ok(event) = events.try_recv() {
        if let Some(line) = format_engine_event(&event) {
            print_line(&ui, &line);
        }
    }

    if let Some(ui) = &ui {
        ui.freeze();
    }

    println!(
        "Submitted {} jobs, processed {} in {} batches ({} failed) in {}",
        format_number(accepted),
        format_number(processed),
        format_number(batches),
        format_number(failed),
        format_duration(started_at.elapsed()),
    );
    Ok(())
}
