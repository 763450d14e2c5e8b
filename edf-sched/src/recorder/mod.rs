/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Run records and the recorder that collects them.
//!
//! Every dispatched instance produces exactly one [`RunRecord`].  The
//! dispatcher hands it to a shared [`RunRecorder`], which
//!
//! 1. updates exact per-task counters ([`TaskTotals`]),
//! 2. appends it to a bounded in-memory history,
//! 3. forwards it to every attached [`RecordSink`] (CSV file, …), and
//! 4. publishes it on a `tokio::sync::broadcast` channel for live
//!    subscribers.
//!
//! [`RunRecorder::record`] cannot fail and does not unwind.  Sink errors are
//! logged and swallowed, a panicking sink is detached, and a full subscriber
//! queue makes that subscriber lag, never the dispatcher wait.

mod csv_sink;

pub use csv_sink::CsvSink;

use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::warn;

use crate::clock::Timestamp;
use crate::dispatcher::panic_message;
use crate::task::TaskInstance;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Records kept in memory before the oldest are evicted.
pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

/// Per-subscriber queue depth of the broadcast channel.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1_024;

// ── RunRecord ─────────────────────────────────────────────────────────────────

/// Outcome of one executed task instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub task_name: String,
    pub seq: u64,
    pub release_time: Timestamp,
    pub absolute_deadline: Timestamp,
    pub exec_start: Timestamp,
    pub exec_end: Timestamp,
    pub exec_duration: Duration,

    /// `exec_end > absolute_deadline`.
    pub missed: bool,

    /// The workload returned an error or panicked.  Independent of `missed`.
    pub failed: bool,

    /// Rendered failure cause when `failed` is set.
    pub error: Option<String>,
}

impl RunRecord {
    pub fn new(
        instance: &TaskInstance,
        exec_start: Timestamp,
        exec_end: Timestamp,
        error: Option<String>,
    ) -> Self {
        Self {
            task_name: instance.name().to_string(),
            seq: instance.seq,
            release_time: instance.release_time,
            absolute_deadline: instance.absolute_deadline,
            exec_start,
            exec_end,
            exec_duration: exec_end - exec_start,
            missed: exec_end > instance.absolute_deadline,
            failed: error.is_some(),
            error,
        }
    }

    /// How far past its deadline the instance finished (zero if on time).
    pub fn lateness(&self) -> Duration {
        self.exec_end - self.absolute_deadline
    }

    /// Time the instance spent ready before it started.
    pub fn release_delay(&self) -> Duration {
        self.exec_start - self.release_time
    }
}

// ── TaskTotals ────────────────────────────────────────────────────────────────

/// Exact per-task counters since the recorder was created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskTotals {
    pub runs: u64,
    pub misses: u64,
    pub failures: u64,

    /// Releases dropped by the `skip_missed` overrun policy.
    pub skipped: u64,

    pub total_exec: Duration,
    pub max_exec: Duration,
    pub max_lateness: Duration,
}

impl TaskTotals {
    pub fn mean_exec(&self) -> Duration {
        match u32::try_from(self.runs) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_exec / n,
            Err(_) => Duration::from_secs_f64(self.total_exec.as_secs_f64() / self.runs as f64),
        }
    }

    fn add(&mut self, record: &RunRecord) {
        self.runs += 1;
        self.misses += u64::from(record.missed);
        self.failures += u64::from(record.failed);
        self.total_exec += record.exec_duration;
        self.max_exec = self.max_exec.max(record.exec_duration);
        self.max_lateness = self.max_lateness.max(record.lateness());
    }
}

// ── RecordSink ────────────────────────────────────────────────────────────────

/// Destination for run records outside the process (files, pipes, …).
///
/// Errors are reported back to the recorder, which logs them and carries on.
pub trait RecordSink: Send {
    fn write(&mut self, record: &RunRecord) -> anyhow::Result<()>;

    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

// ── RunRecorder ───────────────────────────────────────────────────────────────

struct History {
    records: VecDeque<Arc<RunRecord>>,
    limit: usize,
    totals: BTreeMap<String, TaskTotals>,
}

/// Append-only collector of [`RunRecord`]s, shared between the dispatcher
/// and readers.
///
/// History and sinks sit behind separate locks: sink I/O never holds up a
/// reader, and a reader only holds the history lock long enough to copy
/// `Arc`s.
pub struct RunRecorder {
    history: Mutex<History>,
    sinks: Mutex<Vec<Box<dyn RecordSink>>>,
    events: broadcast::Sender<RunRecord>,
}

impl RunRecorder {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Keep at most `limit` records in memory.  Counters are unaffected.
    pub fn with_history_limit(limit: usize) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_SUBSCRIBER_CAPACITY);
        Self {
            history: Mutex::new(History {
                records: VecDeque::new(),
                limit,
                totals: BTreeMap::new(),
            }),
            sinks: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Attach a sink.  It receives every record recorded from now on.
    pub fn add_sink(&self, sink: Box<dyn RecordSink>) {
        lock(&self.sinks).push(sink);
    }

    /// Live feed of records in completion order.
    pub fn subscribe(&self) -> broadcast::Receiver<RunRecord> {
        self.events.subscribe()
    }

    /// Store one record.  Never fails and never blocks on subscribers.
    ///
    /// The record is counted and retained before any sink sees it.  A sink
    /// that returns an error is logged and kept; a sink that panics is
    /// logged and detached.
    pub fn record(&self, record: RunRecord) {
        let record = Arc::new(record);
        {
            let mut history = lock(&self.history);
            history
                .totals
                .entry(record.task_name.clone())
                .or_default()
                .add(&record);

            if history.limit > 0 {
                if history.records.len() == history.limit {
                    history.records.pop_front();
                }
                history.records.push_back(Arc::clone(&record));
            }
        }

        self.write_sinks(&record);

        // Err only means nobody is subscribed.
        let _ = self.events.send(RunRecord::clone(&record));
    }

    fn write_sinks(&self, record: &RunRecord) {
        lock(&self.sinks).retain_mut(|sink| {
            match panic::catch_unwind(AssertUnwindSafe(|| sink.write(record))) {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    warn!(task = %record.task_name, seq = record.seq, "record sink write failed: {e:#}");
                    true
                }
                Err(payload) => {
                    warn!(
                        task = %record.task_name,
                        seq  = record.seq,
                        "record sink panicked, detaching it: {}",
                        panic_message(payload.as_ref())
                    );
                    false
                }
            }
        });
    }

    /// Count releases of `task` that were dropped without running.
    pub fn note_skipped(&self, task: &str, count: u64) {
        if count == 0 {
            return;
        }
        lock(&self.history)
            .totals
            .entry(task.to_string())
            .or_default()
            .skipped += count;
    }

    /// Flush every sink, logging failures.
    pub fn flush(&self) {
        lock(&self.sinks).retain_mut(|sink| {
            match panic::catch_unwind(AssertUnwindSafe(|| sink.flush())) {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    warn!("record sink flush failed: {e:#}");
                    true
                }
                Err(payload) => {
                    warn!(
                        "record sink panicked on flush, detaching it: {}",
                        panic_message(payload.as_ref())
                    );
                    false
                }
            }
        });
    }

    /// Number of attached sinks.
    pub fn sink_count(&self) -> usize {
        lock(&self.sinks).len()
    }

    // ── Read side ─────────────────────────────────────────────────────────────

    /// Retained records, oldest first.
    pub fn records(&self) -> Vec<RunRecord> {
        let retained: Vec<Arc<RunRecord>> = lock(&self.history).records.iter().cloned().collect();
        retained.iter().map(|r| RunRecord::clone(r)).collect()
    }

    /// Retained records of one task, oldest first.
    pub fn records_for(&self, task: &str) -> Vec<RunRecord> {
        let retained: Vec<Arc<RunRecord>> = lock(&self.history)
            .records
            .iter()
            .filter(|r| r.task_name == task)
            .cloned()
            .collect();
        retained.iter().map(|r| RunRecord::clone(r)).collect()
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        lock(&self.history).records.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.history).records.is_empty()
    }

    /// Total runs recorded since creation, including evicted ones.
    pub fn run_count(&self) -> u64 {
        lock(&self.history).totals.values().map(|t| t.runs).sum()
    }

    /// Deadline misses since creation.
    pub fn miss_count(&self) -> u64 {
        lock(&self.history).totals.values().map(|t| t.misses).sum()
    }

    /// Workload failures since creation.
    pub fn failure_count(&self) -> u64 {
        lock(&self.history).totals.values().map(|t| t.failures).sum()
    }

    pub fn totals(&self, task: &str) -> Option<TaskTotals> {
        lock(&self.history).totals.get(task).cloned()
    }

    /// Counters for every task that has recorded anything, sorted by name.
    pub fn all_totals(&self) -> BTreeMap<String, TaskTotals> {
        lock(&self.history).totals.clone()
    }
}

/// A panic while a lock was held must not take the recorder down with it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for RunRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RunRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (retained, limit) = {
            let history = lock(&self.history);
            (history.records.len(), history.limit)
        };
        f.debug_struct("RunRecorder")
            .field("retained", &retained)
            .field("history_limit", &limit)
            .field("sinks", &self.sink_count())
            .field("subscribers", &self.events.receiver_count())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
