/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Earliest-Deadline-First dispatcher.
//!
//! [`Dispatcher`] owns a table of registered [`TaskSpec`]s and runs them
//! periodically on a single execution context, always picking the released
//! instance with the nearest absolute deadline.  Every execution is timed on
//! the dispatcher's [`Clock`] and reported to a shared [`RunRecorder`].
//!
//! # State machine
//! ```text
//!            ┌──────────── release due ───────────┐
//!            ▼                                    │
//!  start ─► Idle ── ready set empty ──► Waiting ──┘
//!            │  ▲
//!  extract   │  │ record delivered
//!  min       ▼  │
//!           Running
//!
//!  shutdown / horizon reached / fatal error ─► Stopped
//! ```
//!
//! # Design decisions
//!
//! | Topic | Choice |
//! |---|---|
//! | Preemption | None.  A started workload runs to completion; `stop()` returns after it does |
//! | Release anchoring | `release_k = epoch + offset + k × period`, independent of completion time |
//! | Pending instances | At most one per task; overdue releases wait in the task's [`ReleaseClock`] |
//! | Overruns | Explicit [`OverrunPolicy`]: run every overdue release, or skip the ones already past their deadline |
//! | Tie-break | Equal deadlines run in ascending task-name order |
//! | Late registration | Funnelled through the control channel, drained at the top of each cycle |
//! | Workload errors / panics | Caught at the boundary, recorded with `failed = true`, loop continues |
//! | Panics in the loop itself | Caught in the loop; it stops with [`FatalReason::WorkerPanicked`] and state `Stopped` |
//!
//! # Example
//! ```rust,no_run
//! use std::time::Duration;
//! use edf_sched::dispatcher::{Dispatcher, DispatcherConfig};
//! use edf_sched::task::TaskSpec;
//!
//! let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
//! dispatcher.register(TaskSpec::new(
//!     "camera_capture",
//!     Duration::from_millis(100),
//!     Duration::from_millis(100),
//!     || -> anyhow::Result<()> { Ok(()) },
//! ))?;
//! dispatcher.start()?;
//! std::thread::sleep(Duration::from_secs(1));
//! dispatcher.stop()?;
//! println!("misses: {}", dispatcher.recorder().miss_count());
//! # Ok::<(), edf_sched::dispatcher::SchedulerError>(())
//! ```

pub mod error;
pub mod feasibility;

pub use error::{ConfigError, FatalReason, SchedulerError};

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, MonotonicClock, Timestamp, Wake};
use crate::ready::ReadySet;
use crate::recorder::{RunRecord, RunRecorder};
use crate::release::ReleaseClock;
use crate::task::{TaskInstance, TaskSpec};

use feasibility::{check_edf_density, edf_density, hyperperiod};

// ── Configuration ─────────────────────────────────────────────────────────────

/// What to do with releases that fall behind the ideal schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrunPolicy {
    /// Dispatch every overdue release in turn, each recorded (usually as a
    /// miss).  The task catches up once it runs faster than its period.
    #[default]
    CatchUp,

    /// Drop overdue releases whose absolute deadline has already passed; the
    /// next dispatched instance is the oldest one that can still make it.
    SkipMissed,
}

impl FromStr for OverrunPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "catch_up" | "catch-up" => Ok(OverrunPolicy::CatchUp),
            "skip_missed" | "skip-missed" => Ok(OverrunPolicy::SkipMissed),
            other => Err(format!(
                "unknown overrun policy '{other}' (valid: catch_up, skip_missed)"
            )),
        }
    }
}

impl fmt::Display for OverrunPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OverrunPolicy::CatchUp => "catch_up",
            OverrunPolicy::SkipMissed => "skip_missed",
        })
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub overrun_policy: OverrunPolicy,

    /// Name of the OS thread created by [`Dispatcher::start`].
    pub thread_name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            overrun_policy: OverrunPolicy::default(),
            thread_name: String::from("edf-dispatcher"),
        }
    }
}

// ── State ─────────────────────────────────────────────────────────────────────

/// Observable state of the dispatch loop.
///
/// A dispatcher that has never been started, or has been stopped, reports
/// `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatcherState {
    /// Between cycles: draining control messages and releasing instances.
    Idle = 0,
    /// Suspended until the next release (or a control message).
    Waiting = 1,
    /// A workload is executing.
    Running = 2,
    Stopped = 3,
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: DispatcherState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn get(&self) -> DispatcherState {
        match self.0.load(Ordering::Acquire) {
            0 => DispatcherState::Idle,
            1 => DispatcherState::Waiting,
            2 => DispatcherState::Running,
            _ => DispatcherState::Stopped,
        }
    }

    fn set(&self, state: DispatcherState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

// ── Control channel ───────────────────────────────────────────────────────────

/// Messages from the [`Dispatcher`] handle to its running loop.
enum Control {
    Register(Arc<TaskSpec>),
    Shutdown,
}

enum Flow {
    Continue,
    Stop,
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

struct Worker {
    control: Sender<Control>,
    handle: JoinHandle<Result<(), SchedulerError>>,
}

/// EDF dispatcher handle.
///
/// Lifecycle: `new → register* → start → (register*) → stop → (start …) → drop`.
/// Each `start()` (or `run_until()`) begins a fresh periodic schedule anchored
/// at the current time, so a restart has the same release cadence as the
/// first start.  Dropping a running dispatcher stops it.
pub struct Dispatcher<C: Clock = MonotonicClock> {
    clock: Arc<C>,
    config: DispatcherConfig,
    recorder: Arc<RunRecorder>,
    state: Arc<StateCell>,

    /// Registered tasks by name.  Only mutated through `&mut self`, so name
    /// uniqueness is checked synchronously even while the loop runs.
    tasks: BTreeMap<String, Arc<TaskSpec>>,

    worker: Option<Worker>,
}

impl Dispatcher<MonotonicClock> {
    /// Dispatcher on the real monotonic clock.
    pub fn new(config: DispatcherConfig) -> Self {
        Self::with_clock(Arc::new(MonotonicClock::new()), config)
    }
}

impl Default for Dispatcher<MonotonicClock> {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

impl<C: Clock> Dispatcher<C> {
    pub fn with_clock(clock: Arc<C>, config: DispatcherConfig) -> Self {
        Self {
            clock,
            config,
            recorder: Arc::new(RunRecorder::new()),
            state: Arc::new(StateCell::new(DispatcherState::Stopped)),
            tasks: BTreeMap::new(),
            worker: None,
        }
    }

    /// Report into `recorder` instead of a private default one.
    pub fn with_recorder(mut self, recorder: Arc<RunRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn clock(&self) -> &Arc<C> {
        &self.clock
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn recorder(&self) -> &Arc<RunRecorder> {
        &self.recorder
    }

    /// Live feed of run records in completion order.
    pub fn subscribe(&self) -> broadcast::Receiver<RunRecord> {
        self.recorder.subscribe()
    }

    pub fn state(&self) -> DispatcherState {
        self.state.get()
    }

    /// `true` while a loop started by [`start`](Self::start) is alive.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Registered task names in ascending order.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Add a task.
    ///
    /// Allowed before or while running.  On a running dispatcher the task's
    /// first release is `offset` after the loop picks the registration up.
    ///
    /// # Errors
    /// [`SchedulerError::Config`] if the spec is invalid or its name is taken.
    pub fn register(&mut self, spec: TaskSpec) -> Result<(), SchedulerError> {
        spec.validate()?;
        if self.tasks.contains_key(&spec.name) {
            return Err(ConfigError::DuplicateTask { task: spec.name }.into());
        }

        let spec = Arc::new(spec);
        info!(
            task        = %spec.name,
            period_us   = duration_us(spec.period),
            deadline_us = duration_us(spec.relative_deadline),
            offset_us   = duration_us(spec.offset),
            "task registered"
        );
        self.tasks.insert(spec.name.clone(), Arc::clone(&spec));

        if let Some(worker) = &self.worker {
            if worker.control.send(Control::Register(spec)).is_err() {
                warn!("dispatcher loop has exited; task takes effect on the next start");
            }
        }
        Ok(())
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Run the dispatch loop on a dedicated thread.
    ///
    /// # Errors
    /// * [`SchedulerError::AlreadyRunning`] if a loop is active (call
    ///   [`stop`](Self::stop) first, also after a fatal exit).
    /// * [`SchedulerError::Spawn`] if the thread cannot be created.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.worker.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let (control, inbox) = mpsc::channel();
        let engine = self.engine(inbox, None);
        let handle = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || engine.run())
            .map_err(SchedulerError::Spawn)?;

        self.worker = Some(Worker { control, handle });
        Ok(())
    }

    /// Request shutdown and wait for the loop to reach `Stopped`.
    ///
    /// A workload that is executing when this is called finishes first.
    /// Calling `stop()` on a dispatcher that is not running is a no-op.
    ///
    /// # Errors
    /// [`SchedulerError::Fatal`] if the loop had stopped on a broken
    /// invariant (or its thread panicked).
    pub fn stop(&mut self) -> Result<(), SchedulerError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        // Err means the loop already exited on its own; join reports why.
        let _ = worker.control.send(Control::Shutdown);

        match worker.handle.join() {
            Ok(result) => result,
            Err(payload) => {
                self.state.set(DispatcherState::Stopped);
                let reason = FatalReason::WorkerPanicked {
                    message: panic_message(payload.as_ref()),
                };
                error!(%reason, "dispatcher thread died");
                Err(SchedulerError::Fatal(reason))
            }
        }
    }

    /// Run the loop on the calling thread until every release before
    /// `horizon` has been dispatched.
    ///
    /// Instances released before the horizon run even if that takes the
    /// clock past it; nothing released at or after the horizon runs.
    pub fn run_until(&mut self, horizon: Timestamp) -> Result<(), SchedulerError> {
        if self.worker.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }
        // The sender must outlive the loop or it would read as a disconnect.
        let (_control, inbox) = mpsc::channel();
        self.engine(inbox, Some(horizon)).run()
    }

    /// [`run_until`](Self::run_until) `now + duration`.
    pub fn run_for(&mut self, duration: Duration) -> Result<(), SchedulerError> {
        let horizon = self.clock.now() + duration;
        self.run_until(horizon)
    }

    fn engine(&self, inbox: Receiver<Control>, horizon: Option<Timestamp>) -> Engine<C> {
        log_task_set(&self.tasks, self.config.overrun_policy);

        let epoch = self.clock.now();
        let slots = self
            .tasks
            .iter()
            .map(|(name, spec)| (name.clone(), Slot::new(Arc::clone(spec), epoch)))
            .collect();

        Engine {
            clock: Arc::clone(&self.clock),
            recorder: Arc::clone(&self.recorder),
            state: Arc::clone(&self.state),
            policy: self.config.overrun_policy,
            slots,
            ready: ReadySet::new(),
            inbox,
            horizon,
        }
    }
}

impl<C: Clock> Drop for Dispatcher<C> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.stop() {
                warn!("dispatcher stopped with error during drop: {e}");
            }
        }
    }
}

impl<C: Clock> fmt::Debug for Dispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("state", &self.state.get())
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .field("running", &self.is_running())
            .finish()
    }
}

// ── Engine (the loop itself) ──────────────────────────────────────────────────

/// Per-task loop state.
struct Slot {
    releases: ReleaseClock,

    /// An instance of this task is in the ready set or executing.
    pending: bool,
}

impl Slot {
    fn new(spec: Arc<TaskSpec>, epoch: Timestamp) -> Self {
        Self {
            releases: ReleaseClock::new(spec, epoch),
            pending: false,
        }
    }
}

/// Everything the loop mutates.  Owned by exactly one thread at a time.
struct Engine<C: Clock> {
    clock: Arc<C>,
    recorder: Arc<RunRecorder>,
    state: Arc<StateCell>,
    policy: OverrunPolicy,
    slots: BTreeMap<String, Slot>,
    ready: ReadySet,
    inbox: Receiver<Control>,
    horizon: Option<Timestamp>,
}

impl<C: Clock> Engine<C> {
    fn run(mut self) -> Result<(), SchedulerError> {
        info!(
            tasks   = self.slots.len(),
            policy  = %self.policy,
            horizon = ?self.horizon,
            "=== dispatcher started ==="
        );

        let result = match panic::catch_unwind(AssertUnwindSafe(|| self.cycle())) {
            Ok(result) => result,
            Err(payload) => Err(SchedulerError::Fatal(FatalReason::WorkerPanicked {
                message: panic_message(payload.as_ref()),
            })),
        };

        self.state.set(DispatcherState::Stopped);
        self.recorder.flush();

        match &result {
            Ok(()) => info!(
                runs     = self.recorder.run_count(),
                misses   = self.recorder.miss_count(),
                failures = self.recorder.failure_count(),
                "=== dispatcher stopped ==="
            ),
            Err(e) => error!("dispatcher stopped on fatal error: {e}"),
        }
        result
    }

    fn cycle(&mut self) -> Result<(), SchedulerError> {
        loop {
            self.state.set(DispatcherState::Idle);

            // 1. Control messages, then every release that has arrived.
            if let Flow::Stop = self.drain_inbox() {
                return Ok(());
            }
            let now = self.clock.now();
            self.release_due(now);

            // 2. Nothing ready: sleep until the next release.
            if self.ready.is_empty() {
                let target = match (self.next_release(), self.horizon) {
                    (Some(t), Some(h)) if t >= h => return Ok(()),
                    (None, Some(_)) => return Ok(()),
                    (next, _) => next,
                };

                self.state.set(DispatcherState::Waiting);
                let wake = match target {
                    Some(t) => self.clock.wait_until(t, &self.inbox),
                    // No tasks at all: only a control message can wake us.
                    None => match self.inbox.recv() {
                        Ok(msg) => Wake::Message(msg),
                        Err(_) => Wake::Disconnected,
                    },
                };
                match wake {
                    Wake::Deadline => {}
                    Wake::Message(msg) => {
                        if let Flow::Stop = self.apply(msg) {
                            return Ok(());
                        }
                    }
                    Wake::Disconnected => return Ok(()),
                }
                continue;
            }

            // 3. Earliest deadline first.
            let instance = self
                .ready
                .extract_min()
                .ok_or(SchedulerError::Fatal(FatalReason::ReadySetEmpty))?;

            // 4. Clock skew guard.
            if self.clock.now() < instance.release_time {
                self.state.set(DispatcherState::Waiting);
                loop {
                    match self.clock.wait_until(instance.release_time, &self.inbox) {
                        Wake::Deadline => break,
                        Wake::Message(msg) => {
                            if let Flow::Stop = self.apply(msg) {
                                return Ok(());
                            }
                        }
                        Wake::Disconnected => return Ok(()),
                    }
                }
            }

            // 5–7. Run, record, and free the task for its next release.
            self.execute(instance)?;
        }
    }

    fn drain_inbox(&mut self) -> Flow {
        loop {
            match self.inbox.try_recv() {
                Ok(msg) => {
                    if let Flow::Stop = self.apply(msg) {
                        return Flow::Stop;
                    }
                }
                Err(TryRecvError::Empty) => return Flow::Continue,
                Err(TryRecvError::Disconnected) => return Flow::Stop,
            }
        }
    }

    fn apply(&mut self, msg: Control) -> Flow {
        match msg {
            Control::Shutdown => {
                info!("shutdown requested");
                Flow::Stop
            }
            Control::Register(spec) => {
                let epoch = self.clock.now();
                info!(
                    task          = %spec.name,
                    first_release = %(epoch + spec.offset),
                    "task joined running dispatcher"
                );
                self.slots.insert(spec.name.clone(), Slot::new(spec, epoch));
                Flow::Continue
            }
        }
    }

    /// Insert the next instance of every idle task whose release has arrived.
    fn release_due(&mut self, now: Timestamp) {
        for (name, slot) in self.slots.iter_mut() {
            if slot.pending {
                continue;
            }

            if self.policy == OverrunPolicy::SkipMissed {
                let skipped = slot.releases.skip_missed(now);
                if skipped > 0 {
                    warn!(
                        task         = %name,
                        skipped,
                        next_release = %slot.releases.next_release(),
                        "dropped releases already past their deadline"
                    );
                    self.recorder.note_skipped(name, skipped);
                }
            }

            let next = slot.releases.next_release();
            if next > now || self.horizon.is_some_and(|h| next >= h) {
                continue;
            }
            if let Some(instance) = slot.releases.next() {
                debug!(
                    task     = %name,
                    seq      = instance.seq,
                    release  = %instance.release_time,
                    deadline = %instance.absolute_deadline,
                    "released"
                );
                self.ready.insert(instance);
                slot.pending = true;
            }
        }
    }

    /// Earliest upcoming release among tasks with nothing pending.
    fn next_release(&self) -> Option<Timestamp> {
        self.slots
            .values()
            .filter(|s| !s.pending)
            .map(|s| s.releases.next_release())
            .min()
    }

    fn execute(&mut self, instance: TaskInstance) -> Result<(), SchedulerError> {
        match self.slots.get(instance.name()) {
            None => {
                return Err(SchedulerError::Fatal(FatalReason::UnknownTask {
                    task: instance.name().to_string(),
                }))
            }
            Some(slot) if !slot.pending => {
                return Err(SchedulerError::Fatal(FatalReason::NotPending {
                    task: instance.name().to_string(),
                }))
            }
            Some(_) => {}
        }

        self.state.set(DispatcherState::Running);
        let workload = Arc::clone(&instance.task.workload);

        let exec_start = self.clock.now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| workload.run()));
        let exec_end = self.clock.now();

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(payload) => Some(format!(
                "workload panicked: {}",
                panic_message(payload.as_ref())
            )),
        };
        let record = RunRecord::new(&instance, exec_start, exec_end, error);

        if let Some(err) = &record.error {
            warn!(task = %record.task_name, seq = record.seq, error = %err, "workload failed");
        }
        if record.missed {
            warn!(
                task        = %record.task_name,
                seq         = record.seq,
                exec_us     = duration_us(record.exec_duration),
                lateness_us = duration_us(record.lateness()),
                "deadline miss"
            );
        } else {
            debug!(
                task     = %record.task_name,
                seq      = record.seq,
                exec_us  = duration_us(record.exec_duration),
                slack_us = duration_us(record.absolute_deadline - record.exec_end),
                "completed"
            );
        }

        self.recorder.record(record);

        if let Some(slot) = self.slots.get_mut(instance.name()) {
            slot.pending = false;
        }
        Ok(())
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn log_task_set(tasks: &BTreeMap<String, Arc<TaskSpec>>, policy: OverrunPolicy) {
    let specs = || tasks.values().map(Arc::as_ref);

    info!(
        task_count     = tasks.len(),
        hyperperiod_us = ?hyperperiod(specs()).map(duration_us),
        overrun_policy = %policy,
        "task set"
    );

    if let Some(density) = check_edf_density(specs()) {
        warn!(
            density,
            "declared EDF density exceeds 1.0, deadline misses are expected"
        );
    } else if let Some(density) = edf_density(specs()) {
        debug!(density, "declared task set is EDF-feasible");
    }
}

fn duration_us(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("non-string panic payload")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::recorder::RecordSink;
    use crate::workload::Workload;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;
    use std::time::Instant;

    // ── Test helpers ──────────────────────────────────────────────────────────

    fn sim() -> (Arc<ManualClock>, Dispatcher<ManualClock>) {
        sim_with(DispatcherConfig::default())
    }

    fn sim_with(config: DispatcherConfig) -> (Arc<ManualClock>, Dispatcher<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let dispatcher = Dispatcher::with_clock(Arc::clone(&clock), config);
        (clock, dispatcher)
    }

    /// Workload that "takes" `exec_ms` of virtual time.
    fn costs(clock: &Arc<ManualClock>, exec_ms: u64) -> impl Workload + 'static {
        let clock = Arc::clone(clock);
        move || -> anyhow::Result<()> {
            clock.advance(Duration::from_millis(exec_ms));
            Ok(())
        }
    }

    fn spec(name: &str, period_ms: u64, deadline_ms: u64, w: impl Workload + 'static) -> TaskSpec {
        TaskSpec::new(
            name,
            Duration::from_millis(period_ms),
            Duration::from_millis(deadline_ms),
            w,
        )
    }

    fn noop() -> anyhow::Result<()> {
        Ok(())
    }

    fn order(records: &[RunRecord]) -> Vec<&str> {
        records.iter().map(|r| r.task_name.as_str()).collect()
    }

    /// Every dispatched instance had the smallest (deadline, name) among all
    /// instances released by the time it started.
    fn assert_edf_order(records: &[RunRecord]) {
        for (i, r) in records.iter().enumerate() {
            for later in &records[i + 1..] {
                if later.release_time <= r.exec_start {
                    assert!(
                        (r.absolute_deadline, r.task_name.as_str())
                            <= (later.absolute_deadline, later.task_name.as_str()),
                        "{}#{} (deadline {}) ran before {}#{} (deadline {})",
                        r.task_name,
                        r.seq,
                        r.absolute_deadline,
                        later.task_name,
                        later.seq,
                        later.absolute_deadline,
                    );
                }
            }
        }
    }

    // ── Registration ──────────────────────────────────────────────────────────

    #[test]
    fn duplicate_name_is_rejected() {
        let (_, mut d) = sim();
        d.register(spec("camera", 100, 100, noop)).unwrap();
        let err = d.register(spec("camera", 50, 50, noop)).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Config(ConfigError::DuplicateTask { ref task }) if task == "camera"
        ));
        assert_eq!(d.task_count(), 1);
    }

    #[test]
    fn zero_period_is_rejected() {
        let (_, mut d) = sim();
        let err = d.register(spec("bad", 0, 10, noop)).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(d.task_count(), 0);
    }

    #[test]
    fn task_names_are_sorted() {
        let (_, mut d) = sim();
        d.register(spec("publish", 10, 10, noop)).unwrap();
        d.register(spec("audio", 10, 10, noop)).unwrap();
        assert_eq!(d.task_names().collect::<Vec<_>>(), vec!["audio", "publish"]);
    }

    // ── Release cadence ───────────────────────────────────────────────────────

    #[test]
    fn releases_are_spaced_by_exactly_one_period() {
        let (clock, mut d) = sim();
        d.register(spec("t", 10, 10, costs(&clock, 1))).unwrap();
        d.run_until(Timestamp::from_millis(1_000)).unwrap();

        let records = d.recorder().records();
        assert_eq!(records.len(), 100);
        for pair in records.windows(2) {
            assert_eq!(pair[1].release_time - pair[0].release_time, Duration::from_millis(10));
            assert_eq!(pair[1].seq, pair[0].seq + 1);
        }
        assert!(records.iter().all(|r| !r.missed && !r.failed));
        assert!(records.iter().all(|r| r.exec_start == r.release_time));
    }

    #[test]
    fn offset_delays_first_release() {
        let (_, mut d) = sim();
        d.register(spec("t", 10, 10, noop).with_offset(Duration::from_millis(4)))
            .unwrap();
        d.run_until(Timestamp::from_millis(30)).unwrap();
        let releases: Vec<Timestamp> =
            d.recorder().records().iter().map(|r| r.release_time).collect();
        assert_eq!(
            releases,
            vec![
                Timestamp::from_millis(4),
                Timestamp::from_millis(14),
                Timestamp::from_millis(24)
            ]
        );
    }

    #[test]
    fn late_completion_does_not_shift_later_releases() {
        // exec 15 > period 10: releases stay on the 10 ms grid.
        let (clock, mut d) = sim();
        d.register(spec("slow", 10, 10, costs(&clock, 15))).unwrap();
        d.run_until(Timestamp::from_millis(50)).unwrap();
        let releases: Vec<u64> = d
            .recorder()
            .records()
            .iter()
            .map(|r| r.release_time.as_micros() / 1_000)
            .collect();
        assert_eq!(releases, vec![0, 10, 20, 30, 40]);
    }

    // ── EDF selection ─────────────────────────────────────────────────────────

    #[test]
    fn simultaneous_releases_run_earliest_deadline_first() {
        let (clock, mut d) = sim();
        d.register(spec("x", 100, 30, costs(&clock, 1))).unwrap();
        d.register(spec("y", 100, 10, costs(&clock, 1))).unwrap();
        d.register(spec("z", 100, 20, costs(&clock, 1))).unwrap();
        d.run_until(Timestamp::from_millis(1)).unwrap();
        assert_eq!(order(&d.recorder().records()), vec!["y", "z", "x"]);
    }

    #[test]
    fn equal_deadlines_run_in_name_order() {
        let (clock, mut d) = sim();
        for name in ["bravo", "charlie", "alpha"] {
            d.register(spec(name, 100, 50, costs(&clock, 1))).unwrap();
        }
        d.run_until(Timestamp::from_millis(1)).unwrap();
        assert_eq!(
            order(&d.recorder().records()),
            vec!["alpha", "bravo", "charlie"]
        );
    }

    #[test]
    fn newly_released_instance_can_overtake_older_ready_work() {
        // "long" (deadline 100) and "filler" (deadline 200) are both ready at
        // t=0.  "long" runs 0..10; at t=10 "urgent" (offset 5, deadline 5+20)
        // has been released and must beat "filler".
        let (clock, mut d) = sim();
        d.register(spec("long", 1_000, 100, costs(&clock, 10))).unwrap();
        d.register(spec("filler", 1_000, 200, costs(&clock, 1))).unwrap();
        d.register(
            spec("urgent", 1_000, 20, costs(&clock, 1)).with_offset(Duration::from_millis(5)),
        )
        .unwrap();
        d.run_until(Timestamp::from_millis(100)).unwrap();
        assert_eq!(
            order(&d.recorder().records()),
            vec!["long", "urgent", "filler"]
        );
    }

    // ── Deadline misses ───────────────────────────────────────────────────────

    #[test]
    fn overrunning_deadline_is_flagged_missed() {
        let (clock, mut d) = sim();
        d.register(spec("inference", 100, 10, costs(&clock, 15))).unwrap();
        d.run_until(Timestamp::from_millis(1)).unwrap();
        let r = &d.recorder().records()[0];
        assert!(r.missed);
        assert!(!r.failed);
        assert_eq!(r.exec_duration, Duration::from_millis(15));
        assert_eq!(r.lateness(), Duration::from_millis(5));
        assert_eq!(d.recorder().miss_count(), 1);
    }

    #[test]
    fn finishing_exactly_on_the_deadline_is_a_hit() {
        let (clock, mut d) = sim();
        d.register(spec("capture", 100, 10, costs(&clock, 10))).unwrap();
        d.run_until(Timestamp::from_millis(1)).unwrap();
        assert!(!d.recorder().records()[0].missed);
    }

    // ── Failures ──────────────────────────────────────────────────────────────

    #[test]
    fn workload_errors_are_recorded_and_scheduling_continues() {
        let (clock, mut d) = sim();
        d.register(spec("flaky", 10, 10, || -> anyhow::Result<()> {
            anyhow::bail!("camera not found")
        }))
        .unwrap();
        d.register(spec("steady", 10, 10, costs(&clock, 1))).unwrap();
        d.run_until(Timestamp::from_millis(100)).unwrap();

        let flaky = d.recorder().records_for("flaky");
        assert_eq!(flaky.len(), 10, "failing task keeps being released");
        assert!(flaky.iter().all(|r| r.failed));
        assert_eq!(flaky[0].error.as_deref(), Some("camera not found"));

        let steady = d.recorder().records_for("steady");
        assert_eq!(steady.len(), 10);
        assert!(steady.iter().all(|r| !r.failed));
        assert_eq!(d.recorder().failure_count(), 10);
    }

    #[test]
    fn panicking_workload_is_contained() {
        let (_, mut d) = sim();
        d.register(spec("boom", 10, 10, || -> anyhow::Result<()> {
            panic!("tensor shape mismatch")
        }))
        .unwrap();
        d.run_until(Timestamp::from_millis(30)).unwrap();

        let records = d.recorder().records();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.failed));
        assert!(records[0]
            .error
            .as_deref()
            .unwrap()
            .contains("tensor shape mismatch"));
        assert_eq!(d.state(), DispatcherState::Stopped);
    }

    // ── End-to-end scenario ───────────────────────────────────────────────────

    #[test]
    fn camera_audio_inference_one_second_scenario() {
        // A: camera (100/100, 20 ms), B: audio (50/50, 10 ms),
        // C: inference (200/150, 180 ms) over one second of virtual time.
        let (clock, mut d) = sim();
        d.register(spec("A", 100, 100, costs(&clock, 20))).unwrap();
        d.register(spec("B", 50, 50, costs(&clock, 10))).unwrap();
        d.register(spec("C", 200, 150, costs(&clock, 180))).unwrap();
        d.run_for(Duration::from_secs(1)).unwrap();

        let rec = d.recorder();
        let records = rec.records();

        // Every release before the horizon ran exactly once.
        assert_eq!(rec.records_for("A").len(), 10);
        assert_eq!(rec.records_for("B").len(), 20);
        assert_eq!(rec.records_for("C").len(), 5);

        // At t=0 all three are ready: B (deadline 50) before A (100) before C (150).
        assert_eq!(order(&records[..3]), vec!["B", "A", "C"]);

        // C's cost exceeds its deadline: every instance misses.
        assert!(rec.records_for("C").iter().all(|r| r.missed));
        assert!(!records[0].missed && !records[1].missed);

        assert_edf_order(&records);
    }

    // ── Overrun policy ────────────────────────────────────────────────────────

    #[test]
    fn catch_up_runs_every_overdue_release() {
        let (clock, mut d) = sim();
        d.register(spec("slow", 10, 10, costs(&clock, 25))).unwrap();
        d.run_until(Timestamp::from_millis(100)).unwrap();
        let seqs: Vec<u64> = d.recorder().records().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, (0..10).collect::<Vec<_>>());
        assert_eq!(d.recorder().totals("slow").unwrap().skipped, 0);
    }

    #[test]
    fn skip_missed_drops_hopeless_releases() {
        let (clock, mut d) = sim_with(DispatcherConfig {
            overrun_policy: OverrunPolicy::SkipMissed,
            ..Default::default()
        });
        d.register(spec("slow", 10, 10, costs(&clock, 25))).unwrap();
        d.run_until(Timestamp::from_millis(100)).unwrap();

        let seqs: Vec<u64> = d.recorder().records().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![0, 2, 5, 7]);
        let totals = d.recorder().totals("slow").unwrap();
        assert_eq!(totals.runs, 4);
        assert_eq!(totals.skipped, 6);
    }

    #[test]
    fn overrun_policy_parses_from_str() {
        assert_eq!("catch_up".parse::<OverrunPolicy>(), Ok(OverrunPolicy::CatchUp));
        assert_eq!(
            "skip-missed".parse::<OverrunPolicy>(),
            Ok(OverrunPolicy::SkipMissed)
        );
        assert!("drop_all".parse::<OverrunPolicy>().is_err());
        assert_eq!(OverrunPolicy::SkipMissed.to_string(), "skip_missed");
    }

    // ── Restart ───────────────────────────────────────────────────────────────

    #[test]
    fn restart_resumes_the_same_cadence_as_a_fresh_start() {
        let (clock, mut d) = sim();
        d.register(
            spec("t", 30, 30, costs(&clock, 1)).with_offset(Duration::from_millis(5)),
        )
        .unwrap();

        d.run_for(Duration::from_millis(100)).unwrap();
        clock.advance(Duration::from_millis(17));
        let second_epoch = clock.now();
        d.run_for(Duration::from_millis(100)).unwrap();

        let records = d.recorder().records();
        let (first, second): (Vec<_>, Vec<_>) =
            records.iter().partition(|r| r.release_time < second_epoch);
        let first: Vec<Duration> = first
            .iter()
            .map(|r| r.release_time - Timestamp::ZERO)
            .collect();
        let second: Vec<Duration> = second
            .iter()
            .map(|r| r.release_time - second_epoch)
            .collect();

        assert_eq!(first.len(), 4);
        assert_eq!(first, second);
    }

    #[test]
    fn run_with_no_tasks_returns_immediately() {
        let (_, mut d) = sim();
        d.run_for(Duration::from_secs(10)).unwrap();
        assert!(d.recorder().is_empty());
        assert_eq!(d.state(), DispatcherState::Stopped);
    }

    // ── Threaded lifecycle (real clock) ───────────────────────────────────────

    fn wait_for_state(d: &Dispatcher, want: DispatcherState) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(2) {
            if d.state() == want {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn new_dispatcher_reports_stopped() {
        let d = Dispatcher::default();
        assert_eq!(d.state(), DispatcherState::Stopped);
        assert!(!d.is_running());
    }

    #[test]
    fn start_and_stop_on_real_clock() {
        let runs = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&runs);
        let mut d = Dispatcher::default();
        d.register(spec("tick", 5, 5, move || -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }))
        .unwrap();

        let mut feed = d.subscribe();
        d.start().unwrap();
        assert!(d.is_running());
        thread::sleep(Duration::from_millis(60));
        d.stop().unwrap();

        assert_eq!(d.state(), DispatcherState::Stopped);
        assert!(!d.is_running());

        let records = d.recorder().records();
        assert!(records.len() >= 3, "only {} runs in 60 ms", records.len());
        assert_eq!(records.len() as u64, runs.load(Ordering::Relaxed));
        for pair in records.windows(2) {
            assert_eq!(pair[1].release_time - pair[0].release_time, Duration::from_millis(5));
        }
        assert_eq!(feed.try_recv().unwrap().seq, 0);
    }

    #[test]
    fn stop_interrupts_wait_for_a_distant_release() {
        let mut d = Dispatcher::default();
        d.register(spec("hourly", 3_600_000, 1_000, noop).with_offset(Duration::from_secs(3_600)))
            .unwrap();
        d.start().unwrap();
        assert!(wait_for_state(&d, DispatcherState::Waiting));

        let t = Instant::now();
        d.stop().unwrap();
        assert!(t.elapsed() < Duration::from_secs(1));
        assert!(d.recorder().is_empty());
    }

    #[test]
    fn register_while_running_is_picked_up() {
        let mut d = Dispatcher::default();
        d.register(spec("first", 5, 5, noop)).unwrap();
        d.start().unwrap();
        thread::sleep(Duration::from_millis(20));

        d.register(spec("late", 5, 5, noop)).unwrap();
        let dup = d.register(spec("first", 5, 5, noop)).unwrap_err();
        assert!(matches!(dup, SchedulerError::Config(ConfigError::DuplicateTask { .. })));

        thread::sleep(Duration::from_millis(40));
        d.stop().unwrap();
        assert!(!d.recorder().records_for("late").is_empty());
        assert!(d.recorder().records_for("late")[0].release_time >= Timestamp::from_millis(20));
    }

    #[test]
    fn register_while_idle_waiting_with_no_tasks() {
        let mut d = Dispatcher::default();
        d.start().unwrap();
        assert!(wait_for_state(&d, DispatcherState::Waiting));
        d.register(spec("only", 5, 5, noop)).unwrap();
        thread::sleep(Duration::from_millis(30));
        d.stop().unwrap();
        assert!(!d.recorder().records_for("only").is_empty());
    }

    #[test]
    fn double_start_is_rejected() {
        let mut d = Dispatcher::default();
        d.start().unwrap();
        assert!(matches!(d.start(), Err(SchedulerError::AlreadyRunning)));
        assert!(matches!(
            d.run_for(Duration::from_millis(1)),
            Err(SchedulerError::AlreadyRunning)
        ));
        d.stop().unwrap();
    }

    #[test]
    fn stop_without_start_is_a_noop() {
        let mut d = Dispatcher::default();
        assert!(d.stop().is_ok());
    }

    #[test]
    fn can_restart_after_stop() {
        let mut d = Dispatcher::default();
        d.register(spec("t", 5, 5, noop)).unwrap();
        d.start().unwrap();
        thread::sleep(Duration::from_millis(15));
        d.stop().unwrap();
        let after_first = d.recorder().run_count();

        d.start().unwrap();
        thread::sleep(Duration::from_millis(15));
        d.stop().unwrap();
        assert!(d.recorder().run_count() > after_first);
    }

    #[test]
    fn dropping_a_running_dispatcher_stops_it() {
        let mut d = Dispatcher::default();
        d.register(spec("t", 5, 5, noop)).unwrap();
        d.start().unwrap();
        let recorder = Arc::clone(d.recorder());
        drop(d);
        let count = recorder.run_count();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(recorder.run_count(), count, "loop kept running after drop");
    }

    // ── Shutdown during execution and fatal exits ─────────────────────────────

    /// Clock whose timer has failed: every wait panics.
    struct BrokenTimer(ManualClock);

    impl Clock for BrokenTimer {
        fn now(&self) -> Timestamp {
            self.0.now()
        }

        fn wait_until<M>(&self, _deadline: Timestamp, _inbox: &Receiver<M>) -> Wake<M> {
            panic!("timer device lost")
        }
    }

    struct PanickingSink;

    impl RecordSink for PanickingSink {
        fn write(&mut self, _: &RunRecord) -> anyhow::Result<()> {
            panic!("sink exploded")
        }
    }

    #[test]
    fn stop_waits_for_the_running_workload() {
        let (started_tx, started_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let started = Mutex::new(started_tx);
        let gate = Mutex::new(gate_rx);

        let mut d = Dispatcher::default();
        d.register(spec("blocking", 5, 5, move || -> anyhow::Result<()> {
            let _ = started.lock().unwrap().send(());
            let _ = gate.lock().unwrap().recv();
            Ok(())
        }))
        .unwrap();
        d.start().unwrap();
        started_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("workload never started");
        assert_eq!(d.state(), DispatcherState::Running);

        let stopper = thread::spawn(move || {
            let result = d.stop();
            (d, result)
        });
        thread::sleep(Duration::from_millis(50));
        assert!(
            !stopper.is_finished(),
            "stop() returned while the workload was still executing"
        );

        gate_tx.send(()).unwrap();
        // A further instance would now return at once and show up below.
        drop(gate_tx);
        let (d, result) = stopper.join().unwrap();
        result.unwrap();

        assert_eq!(d.state(), DispatcherState::Stopped);
        let records = d.recorder().records();
        assert_eq!(records.len(), 1, "only the in-flight instance ran");
        assert_eq!(records[0].seq, 0);
        assert!(records[0].exec_duration >= Duration::from_millis(50));
    }

    #[test]
    fn panicking_sink_does_not_stop_the_loop() {
        let (clock, mut d) = sim();
        d.recorder().add_sink(Box::new(PanickingSink));
        d.register(spec("t", 10, 10, costs(&clock, 1))).unwrap();

        d.run_until(Timestamp::from_millis(50)).unwrap();

        assert_eq!(d.recorder().run_count(), 5);
        assert_eq!(d.recorder().len(), 5);
        assert_eq!(d.recorder().sink_count(), 0, "broken sink is detached");
        assert_eq!(d.state(), DispatcherState::Stopped);
    }

    #[test]
    fn panicking_sink_on_threaded_loop_keeps_dispatching() {
        let mut d = Dispatcher::default();
        d.recorder().add_sink(Box::new(PanickingSink));
        d.register(spec("t", 5, 5, noop)).unwrap();
        d.start().unwrap();
        thread::sleep(Duration::from_millis(40));
        d.stop().unwrap();
        assert!(d.recorder().run_count() >= 2);
    }

    #[test]
    fn loop_panic_is_fatal_from_run_until() {
        let clock = Arc::new(BrokenTimer(ManualClock::new()));
        let mut d = Dispatcher::with_clock(clock, DispatcherConfig::default());
        d.register(spec("t", 10, 10, noop).with_offset(Duration::from_millis(5)))
            .unwrap();

        let err = d.run_until(Timestamp::from_millis(100)).unwrap_err();

        assert!(err.is_fatal());
        assert!(matches!(
            err,
            SchedulerError::Fatal(FatalReason::WorkerPanicked { ref message })
                if message.contains("timer device lost")
        ));
        assert_eq!(d.state(), DispatcherState::Stopped);
        assert!(d.recorder().is_empty());
    }

    #[test]
    fn loop_panic_is_fatal_from_stop() {
        let clock = Arc::new(BrokenTimer(ManualClock::new()));
        let mut d = Dispatcher::with_clock(clock, DispatcherConfig::default());
        d.register(spec("t", 10, 10, noop).with_offset(Duration::from_millis(5)))
            .unwrap();
        d.start().unwrap();

        let start = Instant::now();
        while d.is_running() && start.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!d.is_running(), "loop should have exited on its own");
        assert_eq!(d.state(), DispatcherState::Stopped);

        let err = d.stop().unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Fatal(FatalReason::WorkerPanicked { .. })
        ));
        assert!(d.stop().is_ok(), "second stop is a no-op");
    }

    #[test]
    fn independent_dispatchers_coexist() {
        let (clock_a, mut a) = sim();
        let (clock_b, mut b) = sim();
        a.register(spec("t", 10, 10, costs(&clock_a, 1))).unwrap();
        b.register(spec("t", 20, 20, costs(&clock_b, 1))).unwrap();
        a.run_until(Timestamp::from_millis(100)).unwrap();
        b.run_until(Timestamp::from_millis(100)).unwrap();
        assert_eq!(a.recorder().len(), 10);
        assert_eq!(b.recorder().len(), 5);
    }
}
