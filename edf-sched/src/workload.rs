/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The job body abstraction and a few built-in workloads.
//!
//! A workload is anything that can be invoked with no arguments and can fail.
//! The dispatcher treats it as a black box: it only measures how long
//! [`Workload::run`] takes and whether it returned an error (or panicked).
//!
//! The built-ins exist so a task set can be exercised from a YAML file
//! without writing code:
//!
//! | Type | Behaviour |
//! |---|---|
//! | [`SleepWorkload`] | blocks the thread for a fixed time (I/O-bound job) |
//! | [`SpinWorkload`] | busy-loops for a fixed time (CPU-bound job) |
//! | [`CommandWorkload`] | runs an external program; non-zero exit is a failure |

use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

// ── Workload trait ────────────────────────────────────────────────────────────

/// A periodic job body.
///
/// Must be `Send + Sync` because the dispatcher may run it on its own thread
/// and the `TaskSpec` that owns it is shared.  Implementations that need mutable
/// state keep it behind interior mutability.
pub trait Workload: Send + Sync {
    /// Run the job once, to completion.
    fn run(&self) -> Result<()>;
}

impl<F> Workload for F
where
    F: Fn() -> Result<()> + Send + Sync,
{
    fn run(&self) -> Result<()> {
        self()
    }
}

// ── Failure injection ─────────────────────────────────────────────────────────

/// Counts invocations and reports whether the current one should fail.
///
/// `every == 0` disables failures; `every == 3` fails the 3rd, 6th, … call.
#[derive(Debug, Default)]
struct FailEvery {
    every: u32,
    calls: AtomicU64,
}

impl FailEvery {
    fn new(every: u32) -> Self {
        Self {
            every,
            calls: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> Option<u64> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        (self.every > 0 && n % u64::from(self.every) == 0).then_some(n)
    }
}

// ── SleepWorkload ─────────────────────────────────────────────────────────────

/// Blocks for a fixed duration.
#[derive(Debug)]
pub struct SleepWorkload {
    exec: Duration,
    fail: FailEvery,
}

impl SleepWorkload {
    pub fn new(exec: Duration) -> Self {
        Self {
            exec,
            fail: FailEvery::default(),
        }
    }

    /// Fail every `n`-th invocation (after doing the work).
    pub fn failing_every(mut self, n: u32) -> Self {
        self.fail = FailEvery::new(n);
        self
    }
}

impl Workload for SleepWorkload {
    fn run(&self) -> Result<()> {
        std::thread::sleep(self.exec);
        if let Some(n) = self.fail.tick() {
            bail!("injected failure on invocation {n}");
        }
        Ok(())
    }
}

// ── SpinWorkload ──────────────────────────────────────────────────────────────

/// Busy-loops for a fixed duration, keeping one core fully occupied.
#[derive(Debug)]
pub struct SpinWorkload {
    exec: Duration,
    fail: FailEvery,
}

impl SpinWorkload {
    pub fn new(exec: Duration) -> Self {
        Self {
            exec,
            fail: FailEvery::default(),
        }
    }

    pub fn failing_every(mut self, n: u32) -> Self {
        self.fail = FailEvery::new(n);
        self
    }
}

impl Workload for SpinWorkload {
    fn run(&self) -> Result<()> {
        let start = Instant::now();
        while start.elapsed() < self.exec {
            std::hint::spin_loop();
        }
        if let Some(n) = self.fail.tick() {
            bail!("injected failure on invocation {n}");
        }
        Ok(())
    }
}

// ── CommandWorkload ───────────────────────────────────────────────────────────

/// Runs an external program to completion, e.g. a capture tool.
///
/// Standard output and error are discarded.  A non-zero exit status or a
/// spawn failure is reported as a workload failure.
#[derive(Debug, Clone)]
pub struct CommandWorkload {
    program: String,
    args: Vec<String>,
}

impl CommandWorkload {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Workload for CommandWorkload {
    fn run(&self) -> Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("failed to spawn '{}'", self.program))?;

        if !status.success() {
            bail!("'{}' exited with {}", self.program, status);
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
