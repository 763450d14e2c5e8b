/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Monotonic time source for the dispatcher.
//!
//! All scheduling arithmetic is done on [`Timestamp`], a nanosecond offset
//! from the clock's own origin.  Two clocks are provided:
//!
//! * [`MonotonicClock`] – wall-clock behaviour backed by `std::time::Instant`.
//!   Waiting blocks the calling thread on the dispatcher's control inbox so a
//!   shutdown or registration message wakes it immediately.
//! * [`ManualClock`] – virtual time.  Waiting jumps time forward instead of
//!   sleeping, and workloads advance it explicitly to model their cost.  This
//!   makes scheduling tests fully deterministic.

use std::fmt;
use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};

// ── Timestamp ─────────────────────────────────────────────────────────────────

/// Point on a [`Clock`]'s monotonic timeline, in nanoseconds since its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The clock origin.
    pub const ZERO: Timestamp = Timestamp(0);

    /// The furthest representable point in time.
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    pub const fn from_nanos(nanos: u64) -> Self {
        Timestamp(nanos)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Timestamp(millis.saturating_mul(1_000_000))
    }

    /// Offset from the origin as a `Duration`.
    pub fn from_duration(d: Duration) -> Self {
        Timestamp(duration_to_nanos(d))
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub const fn as_micros(self) -> u64 {
        self.0 / 1_000
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_nanos(self.0)
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    pub fn checked_add(self, d: Duration) -> Option<Timestamp> {
        u64::try_from(d.as_nanos())
            .ok()
            .and_then(|n| self.0.checked_add(n))
            .map(Timestamp)
    }
}

/// Saturating: a timestamp never wraps past [`Timestamp::MAX`].
impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        self.checked_add(rhs).unwrap_or(Timestamp::MAX)
    }
}

/// Saturating: `a - b` is zero when `b` is later than `a`.
impl Sub for Timestamp {
    type Output = Duration;

    fn sub(self, rhs: Timestamp) -> Duration {
        self.saturating_duration_since(rhs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}ms", self.0 as f64 / 1_000_000.0)
    }
}

fn duration_to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

// ── Clock trait ───────────────────────────────────────────────────────────────

/// Result of [`Clock::wait_until`].
#[derive(Debug, PartialEq, Eq)]
pub enum Wake<M> {
    /// The requested deadline has been reached.
    Deadline,
    /// A message arrived on the inbox before the deadline.
    Message(M),
    /// Every sender of the inbox has been dropped.
    Disconnected,
}

/// Monotonic time source used by the dispatcher.
///
/// The wait primitive takes the dispatcher's control inbox so that a clock can
/// decide how "sleeping" interacts with incoming messages: the real clock
/// blocks on the channel with a timeout, the manual clock polls it once and
/// then jumps forward.
pub trait Clock: Send + Sync + 'static {
    /// Current time.  Never decreases.
    fn now(&self) -> Timestamp;

    /// Suspend until `deadline` or until a message is available on `inbox`,
    /// whichever comes first.
    fn wait_until<M>(&self, deadline: Timestamp, inbox: &Receiver<M>) -> Wake<M>;
}

// ── MonotonicClock ────────────────────────────────────────────────────────────

/// Real monotonic clock.  Its origin is the moment it was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_duration(self.origin.elapsed())
    }

    fn wait_until<M>(&self, deadline: Timestamp, inbox: &Receiver<M>) -> Wake<M> {
        loop {
            let now = self.now();
            if now >= deadline {
                return Wake::Deadline;
            }
            // recv_timeout falls back to a plain recv() when the deadline is
            // too far away to be represented as an Instant.
            match inbox.recv_timeout(deadline - now) {
                Ok(msg) => return Wake::Message(msg),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Wake::Disconnected,
            }
        }
    }
}

// ── ManualClock ───────────────────────────────────────────────────────────────

/// Virtual clock for deterministic runs.
///
/// Time only moves when [`advance`](Self::advance) / [`set`](Self::set) is
/// called or when the dispatcher waits on it.  Pair it with
/// `Dispatcher::run_until`; a threaded dispatcher on a manual clock races
/// through virtual time as fast as the workloads allow.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the clock at `start` instead of the origin.
    pub fn starting_at(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start.as_nanos()),
        }
    }

    /// Move time forward by `d`.
    pub fn advance(&self, d: Duration) {
        let step = duration_to_nanos(d);
        let _ = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                Some(t.saturating_add(step))
            });
    }

    /// Move time forward to `t`.  Setting an earlier time is ignored.
    pub fn set(&self, t: Timestamp) {
        self.now.fetch_max(t.as_nanos(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.load(Ordering::SeqCst))
    }

    fn wait_until<M>(&self, deadline: Timestamp, inbox: &Receiver<M>) -> Wake<M> {
        match inbox.try_recv() {
            Ok(msg) => Wake::Message(msg),
            Err(TryRecvError::Disconnected) => Wake::Disconnected,
            Err(TryRecvError::Empty) => {
                self.set(deadline);
                Wake::Deadline
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
