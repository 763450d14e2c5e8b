/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! edf-sched – deadline-aware periodic task dispatcher
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── task.rs         – TaskSpec / TaskInstance
//! ├── workload.rs     – Workload trait + sleep / spin / command workloads
//! ├── clock.rs        – Timestamp, monotonic and manual clocks
//! ├── release.rs      – per-task periodic release generator
//! ├── ready.rs        – EDF ready set (min-heap on absolute deadline)
//! ├── dispatcher/     – dispatch loop, lifecycle, errors, feasibility check
//! ├── recorder/       – run records, per-task totals, CSV sink, live feed
//! └── config/         – YAML task-set configuration
//! ```

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod ready;
pub mod recorder;
pub mod release;
pub mod task;
pub mod workload;
