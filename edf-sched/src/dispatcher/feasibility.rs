/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Advisory schedulability analysis for a registered task set.
//!
//! # Status: warning only
//! The density test is **computed and logged** when the dispatcher starts.
//! It never rejects a task set: execution times on the edge host are measured,
//! not known, and the declared `expected_exec` values are estimates.
//!
//! # Theory
//! On a single execution context, EDF schedules any set of independent
//! periodic tasks whose **density** satisfies
//!
//! $$\Delta = \sum_{i=1}^{n} \frac{C_i}{\min(D_i, T_i)} \leq 1$$
//!
//! For implicit deadlines (`D = T`) this is the exact utilisation bound
//! `U ≤ 1`.  With constrained deadlines (`D < T`) it is sufficient but not
//! necessary, so exceeding it means "may miss", not "will miss".
//!
//! The **hyperperiod** (LCM of all periods) is the window after which the
//! release pattern repeats; it is logged to help pick a run length.

use std::time::Duration;

use crate::task::TaskSpec;

/// Sum of declared densities.
///
/// Tasks without an `expected_exec` contribute nothing.  Returns `None` if no
/// task declares a cost.
pub fn edf_density<'a>(specs: impl IntoIterator<Item = &'a TaskSpec>) -> Option<f64> {
    specs
        .into_iter()
        .filter_map(TaskSpec::density)
        .fold(None, |acc, d| Some(acc.unwrap_or(0.0) + d))
}

/// Returns `Some(density)` when the declared density exceeds `1.0`.
///
/// `None` means the set is provably EDF-schedulable under the declared costs
/// (or that no costs were declared).
pub fn check_edf_density<'a>(specs: impl IntoIterator<Item = &'a TaskSpec>) -> Option<f64> {
    edf_density(specs).filter(|&d| d > 1.0)
}

/// Least common multiple of all periods.
///
/// Returns `None` for an empty set, if any period is zero, or if the LCM
/// does not fit in a `Duration`.
pub fn hyperperiod<'a>(specs: impl IntoIterator<Item = &'a TaskSpec>) -> Option<Duration> {
    let mut acc: Option<u128> = None;
    for spec in specs {
        let p = spec.period.as_nanos();
        if p == 0 {
            return None;
        }
        acc = Some(match acc {
            None => p,
            Some(l) => (l / gcd(l, p)).checked_mul(p)?,
        });
    }
    let nanos = u64::try_from(acc?).ok()?;
    Some(Duration::from_nanos(nanos))
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

// ── Tests ─────────────────────────────────────────────────────────────────────
