/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Core task data structures for the EDF dispatcher.
//!
//! Two distinct types model the two sides of the dispatch pipeline:
//!
//! ```text
//! caller ──(TaskSpec)──► Dispatcher ──(ReleaseClock)──► TaskInstance ──(run)──► RunRecord
//!           ↑ immutable, registered once            ↑ one per release, ephemeral
//! ```
//!
//! # Ownership model
//! A `TaskSpec` is moved into the dispatcher at registration and shared from
//! then on as `Arc<TaskSpec>`.  Every `TaskInstance` carries a clone of that
//! `Arc`, so an instance can always reach its workload and parameters without
//! a table lookup, and the spec is never mutated after registration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Timestamp;
use crate::dispatcher::error::ConfigError;
use crate::workload::Workload;

// ── TaskSpec ──────────────────────────────────────────────────────────────────

/// Immutable description of one periodic job.
///
/// # Invariants
/// Checked by [`validate`](Self::validate) when the spec is registered:
/// * `name` is non-empty (uniqueness is checked by the dispatcher).
/// * `period > 0`.
/// * `relative_deadline > 0`.  A deadline longer than the period is allowed.
#[derive(Clone)]
pub struct TaskSpec {
    /// Unique task name within one dispatcher.
    pub name: String,

    /// Inter-release interval.
    pub period: Duration,

    /// Deadline measured from each release.
    pub relative_deadline: Duration,

    /// Delay of the first release after the dispatcher starts (or after the
    /// task is registered on a running dispatcher).
    pub offset: Duration,

    /// Declared cost estimate.  Only feeds the advisory feasibility check;
    /// actual execution time is always measured.
    pub expected_exec: Option<Duration>,

    /// The job body.
    pub workload: Arc<dyn Workload>,
}

impl TaskSpec {
    /// Create a spec with zero offset and no declared cost.
    pub fn new(
        name: impl Into<String>,
        period: Duration,
        relative_deadline: Duration,
        workload: impl Workload + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            period,
            relative_deadline,
            offset: Duration::ZERO,
            expected_exec: None,
            workload: Arc::new(workload),
        }
    }

    pub fn with_offset(mut self, offset: Duration) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_expected_exec(mut self, exec: Duration) -> Self {
        self.expected_exec = Some(exec);
        self
    }

    /// Check the per-spec invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.period.is_zero() {
            return Err(ConfigError::ZeroPeriod {
                task: self.name.clone(),
            });
        }
        if self.relative_deadline.is_zero() {
            return Err(ConfigError::ZeroDeadline {
                task: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Declared utilisation `expected_exec / period`, if a cost was declared.
    pub fn utilization(&self) -> Option<f64> {
        let exec = self.expected_exec?;
        if self.period.is_zero() {
            return None;
        }
        Some(exec.as_secs_f64() / self.period.as_secs_f64())
    }

    /// Declared density `expected_exec / min(period, relative_deadline)`.
    ///
    /// Equal to [`utilization`](Self::utilization) for implicit-deadline
    /// tasks; larger when the deadline is shorter than the period.
    pub fn density(&self) -> Option<f64> {
        let exec = self.expected_exec?;
        let window = self.period.min(self.relative_deadline);
        if window.is_zero() {
            return None;
        }
        Some(exec.as_secs_f64() / window.as_secs_f64())
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("period", &self.period)
            .field("relative_deadline", &self.relative_deadline)
            .field("offset", &self.offset)
            .field("expected_exec", &self.expected_exec)
            .finish_non_exhaustive()
    }
}

// ── TaskInstance ──────────────────────────────────────────────────────────────

/// One release of a periodic task.
///
/// Produced by a [`ReleaseClock`](crate::release::ReleaseClock), held in the
/// ready set until dispatched, and consumed when its
/// [`RunRecord`](crate::recorder::RunRecord) is built.
#[derive(Debug, Clone)]
pub struct TaskInstance {
    pub task: Arc<TaskSpec>,

    /// 0-based release index within the current dispatcher run.
    pub seq: u64,

    /// When this instance became eligible to run.
    pub release_time: Timestamp,

    /// `release_time + relative_deadline`.
    pub absolute_deadline: Timestamp,
}

impl TaskInstance {
    pub fn name(&self) -> &str {
        &self.task.name
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
