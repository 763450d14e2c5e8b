/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-task release sequence.
//!
//! A [`ReleaseClock`] is an infinite iterator of [`TaskInstance`]s for one
//! task.  Release `k` happens at `epoch + offset + k × period`, anchored to
//! the ideal periodic schedule: nothing about when an instance actually ran
//! feeds back into later release times.  Restarting a task's schedule means
//! building a new clock at a new epoch.

use std::sync::Arc;

use crate::clock::Timestamp;
use crate::task::{TaskInstance, TaskSpec};

#[derive(Debug, Clone)]
pub struct ReleaseClock {
    task: Arc<TaskSpec>,
    next_release: Timestamp,
    seq: u64,
}

impl ReleaseClock {
    /// First release at `epoch + task.offset`.
    pub fn new(task: Arc<TaskSpec>, epoch: Timestamp) -> Self {
        let next_release = epoch + task.offset;
        Self {
            task,
            next_release,
            seq: 0,
        }
    }

    pub fn task(&self) -> &Arc<TaskSpec> {
        &self.task
    }

    /// Release time of the instance the next call to `next()` will produce.
    pub fn next_release(&self) -> Timestamp {
        self.next_release
    }

    /// Absolute deadline of the next instance.
    pub fn next_deadline(&self) -> Timestamp {
        self.next_release + self.task.relative_deadline
    }

    /// Sequence number of the next instance.
    pub fn next_seq(&self) -> u64 {
        self.seq
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        self.next_release <= now
    }

    /// Drop every pending release whose absolute deadline is already at or
    /// before `now`.  Returns how many releases were skipped.
    ///
    /// Sequence numbers keep counting through skipped releases, so a gap in
    /// `seq` in the run records shows exactly which releases were dropped.
    pub fn skip_missed(&mut self, now: Timestamp) -> u64 {
        if self.next_deadline() > now {
            return 0;
        }
        // Releases k with release_k + D <= now, jumped over in one step.
        let period = self.task.period.as_nanos().max(1);
        let overdue = u128::from(now.as_nanos())
            - (u128::from(self.next_release.as_nanos())
                + self.task.relative_deadline.as_nanos());
        let skipped = u64::try_from(overdue / period + 1).unwrap_or(u64::MAX);

        let next = u128::from(self.next_release.as_nanos()) + u128::from(skipped) * period;
        self.next_release = Timestamp::from_nanos(u64::try_from(next).unwrap_or(u64::MAX));
        self.seq = self.seq.saturating_add(skipped);
        skipped
    }

    fn advance(&mut self) {
        self.next_release = self.next_release + self.task.period;
        self.seq += 1;
    }
}

impl Iterator for ReleaseClock {
    type Item = TaskInstance;

    /// Never returns `None`.
    fn next(&mut self) -> Option<TaskInstance> {
        let instance = TaskInstance {
            task: Arc::clone(&self.task),
            seq: self.seq,
            release_time: self.next_release,
            absolute_deadline: self.next_deadline(),
        };
        self.advance();
        Some(instance)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
