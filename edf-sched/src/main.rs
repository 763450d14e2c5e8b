/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

use edf_sched::config::TaskSetConfig;
use edf_sched::dispatcher::{Dispatcher, OverrunPolicy};
use edf_sched::recorder::{CsvSink, RunRecord, RunRecorder};

// ── CLI argument definition ───────────────────────────────────────────────────

/// EDF periodic task dispatcher.
///
/// Example:
///   edf-sched -c tasks.yaml -d 10000 -o records.csv --overrun-policy skip_missed
#[derive(Debug, Parser)]
#[command(
    name = "edf-sched",
    about = "Deadline-aware periodic EDF dispatcher",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML task-set file.  Without one the built-in demo set runs.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// How long to run, in milliseconds.  0 runs until Ctrl-C.
    #[arg(short = 'd', long = "duration-ms", default_value_t = 5_000)]
    duration_ms: u64,

    /// Write every run record to this CSV file.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Override the overrun policy from the task-set file (catch_up | skip_missed).
    #[arg(long = "overrun-policy")]
    overrun_policy: Option<OverrunPolicy>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("edf-sched starting up...");

    let cli = Cli::parse();

    info!(
        config         = ?cli.config,
        duration_ms    = cli.duration_ms,
        output         = ?cli.output,
        overrun_policy = ?cli.overrun_policy,
        "Configuration"
    );

    // ── Load task set ─────────────────────────────────────────────────────────
    let mut task_set = match &cli.config {
        Some(path) => match TaskSetConfig::load_from_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                error!("Failed to load task set: {:#}", e);
                process::exit(1);
            }
        },
        None => {
            warn!("No task-set file provided, using the built-in demo task set");
            TaskSetConfig::demo()
        }
    };
    if let Some(policy) = cli.overrun_policy {
        task_set.dispatcher.overrun_policy = policy;
    }

    // ── Recorder and sinks ────────────────────────────────────────────────────
    let recorder = Arc::new(RunRecorder::with_history_limit(task_set.history_limit));
    if let Some(path) = &cli.output {
        match CsvSink::create(path) {
            Ok(sink) => {
                info!("Writing run records to: {}", path.display());
                recorder.add_sink(Box::new(sink));
            }
            Err(e) => {
                error!("{:#}", e);
                process::exit(1);
            }
        }
    }

    // ── Dispatcher ────────────────────────────────────────────────────────────
    let mut dispatcher =
        Dispatcher::new(task_set.dispatcher.clone()).with_recorder(Arc::clone(&recorder));

    for spec in task_set.task_specs() {
        if let Err(e) = dispatcher.register(spec) {
            error!("{e}");
            process::exit(1);
        }
    }

    let follower = tokio::spawn(follow_records(dispatcher.subscribe()));

    if let Err(e) = dispatcher.start() {
        error!("Failed to start dispatcher: {e}");
        process::exit(1);
    }

    // ── Run until the duration elapses or Ctrl-C ──────────────────────────────
    let run_for = async {
        if cli.duration_ms == 0 {
            std::future::pending::<()>().await
        } else {
            tokio::time::sleep(Duration::from_millis(cli.duration_ms)).await
        }
    };
    tokio::select! {
        _ = run_for => info!("Run duration elapsed"),
        _ = tokio::signal::ctrl_c() => info!("Ctrl-C received"),
    }

    // stop() joins the dispatcher thread; keep it off the async workers.
    let stopped = tokio::task::spawn_blocking(move || dispatcher.stop()).await;
    follower.abort();

    print_summary(&recorder);

    match stopped {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("{e}");
            process::exit(1);
        }
        Err(e) => {
            error!("Shutdown task failed: {e}");
            process::exit(1);
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Logs one line per completed run as records arrive.
async fn follow_records(mut feed: broadcast::Receiver<RunRecord>) {
    loop {
        match feed.recv().await {
            Ok(r) => info!(
                task    = %r.task_name,
                seq     = r.seq,
                exec_us = u64::try_from(r.exec_duration.as_micros()).unwrap_or(u64::MAX),
                missed  = r.missed,
                failed  = r.failed,
                "run"
            ),
            Err(RecvError::Lagged(n)) => warn!("live feed fell behind, {n} record(s) not shown"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_summary(recorder: &RunRecorder) {
    let totals = recorder.all_totals();
    info!("Summary for {} task(s):", totals.len());
    for (name, t) in &totals {
        info!(
            "  [{name}]  runs={runs}  misses={misses}  failures={failures}  skipped={skipped}  \
             mean_exec={mean:?}  max_exec={max:?}  max_lateness={late:?}",
            runs = t.runs,
            misses = t.misses,
            failures = t.failures,
            skipped = t.skipped,
            mean = t.mean_exec(),
            max = t.max_exec,
            late = t.max_lateness,
        );
    }
}
