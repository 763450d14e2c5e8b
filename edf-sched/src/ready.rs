/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Deadline-ordered set of released, not yet dispatched instances.
//!
//! # Ordering policy
//! Instances are ordered by `absolute_deadline`, earliest first.  Equal
//! deadlines are broken by **ascending task name**, then by release time.
//! The tie-break is part of the contract: the same set of ready instances is
//! always extracted in the same order, which keeps dispatch sequences
//! reproducible across runs and platforms.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::clock::Timestamp;
use crate::task::TaskInstance;

/// Heap entry wrapping an instance with the EDF ordering.
#[derive(Debug)]
struct Ready(TaskInstance);

impl Ready {
    fn key(&self) -> (Timestamp, &str, Timestamp) {
        (self.0.absolute_deadline, self.0.name(), self.0.release_time)
    }
}

impl PartialEq for Ready {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Ready {}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Min-heap of ready instances keyed by absolute deadline.
///
/// Insert and extract are `O(log n)`.  The dispatcher keeps at most one
/// instance per task in here, so `n` is bounded by the number of tasks.
#[derive(Debug, Default)]
pub struct ReadySet {
    heap: BinaryHeap<Reverse<Ready>>,
}

impl ReadySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, instance: TaskInstance) {
        self.heap.push(Reverse(Ready(instance)));
    }

    /// Remove and return the instance with the earliest deadline.
    pub fn extract_min(&mut self) -> Option<TaskInstance> {
        self.heap.pop().map(|Reverse(Ready(instance))| instance)
    }

    /// Earliest absolute deadline currently in the set.
    pub fn peek_min_deadline(&self) -> Option<Timestamp> {
        self.heap.peek().map(|Reverse(r)| r.0.absolute_deadline)
    }

    /// Name of the task that [`extract_min`](Self::extract_min) would return.
    pub fn peek_min_task(&self) -> Option<&str> {
        self.heap.peek().map(|Reverse(r)| r.0.name())
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
