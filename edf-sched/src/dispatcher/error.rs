/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error types for the EDF dispatcher.
//!
//! Two error enums model the two failure layers:
//!
//! * [`ConfigError`]: a [`TaskSpec`](crate::task::TaskSpec) was rejected at
//!   registration.  Always surfaced synchronously by
//!   [`Dispatcher::register()`](super::Dispatcher::register).
//! * [`SchedulerError`]: top-level failure of a dispatcher operation.
//!   Only [`SchedulerError::Fatal`] ends a running loop.
//!
//! Workload failures and deadline misses are deliberately **not** errors
//! here: they are per-instance outcomes, reported through
//! [`RunRecord`](crate::recorder::RunRecord)s, and never escape the loop.

use thiserror::Error;

// ── Registration ──────────────────────────────────────────────────────────────

/// Why a task spec was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("task name must not be empty")]
    EmptyName,

    /// Another task with the same name is already registered.
    #[error("task '{task}' is already registered")]
    DuplicateTask { task: String },

    #[error("task '{task}' has a zero period")]
    ZeroPeriod { task: String },

    #[error("task '{task}' has a zero relative deadline")]
    ZeroDeadline { task: String },
}

// ── Fatal invariant violations ────────────────────────────────────────────────

/// Internal invariant that the dispatch loop found broken.
///
/// Any of these means the loop's own bookkeeping is inconsistent, so it stops
/// rather than continue on corrupt state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalReason {
    /// The ready set reported entries but yielded none.
    ReadySetEmpty,

    /// An instance was extracted for a task the loop does not know.
    UnknownTask { task: String },

    /// An instance completed for a task that had no pending instance.
    NotPending { task: String },

    /// The dispatcher thread itself panicked (outside any workload).
    WorkerPanicked { message: String },
}

impl std::fmt::Display for FatalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FatalReason::ReadySetEmpty => {
                write!(f, "ready set yielded no instance although it was not empty")
            }
            FatalReason::UnknownTask { task } => {
                write!(f, "dispatched an instance of unregistered task '{}'", task)
            }
            FatalReason::NotPending { task } => write!(
                f,
                "completed an instance of task '{}' that had no pending release",
                task
            ),
            FatalReason::WorkerPanicked { message } => {
                write!(f, "dispatcher thread panicked: {}", message)
            }
        }
    }
}

// ── Top-level dispatcher errors ───────────────────────────────────────────────

/// Error returned by [`Dispatcher`](super::Dispatcher) operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `register()` refused a task spec.
    #[error("invalid task configuration: {0}")]
    Config(#[from] ConfigError),

    /// `start()` or `run_until()` while the loop is already running.
    #[error("dispatcher is already running")]
    AlreadyRunning,

    /// The OS refused to create the dispatcher thread.
    #[error("failed to spawn dispatcher thread")]
    Spawn(#[source] std::io::Error),

    /// The loop stopped on an internal invariant violation.
    #[error("dispatcher stopped: {0}")]
    Fatal(FatalReason),
}

impl SchedulerError {
    /// `true` for errors caused by the caller's task configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(self, SchedulerError::Config(_))
    }

    /// `true` when the loop died on a broken invariant.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SchedulerError::Fatal(_))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
