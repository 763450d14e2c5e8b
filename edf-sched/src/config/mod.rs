/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Task-set configuration loading.
//!
//! The expected YAML structure is:
//! ```yaml
//! dispatcher:
//!   overrun_policy: catch_up      # or skip_missed
//!   history_limit: 10000
//!   thread_name: edf-dispatcher
//! tasks:
//!   camera_capture:
//!     period_ms: 100
//!     deadline_ms: 100            # defaults to period_ms
//!     offset_ms: 0
//!     expected_exec_ms: 20
//!     workload: { kind: spin, exec_ms: 20 }
//!   publish:
//!     period_ms: 500
//!     workload: { kind: command, program: "/usr/bin/true" }
//! ```
//!
//! Every section except `tasks.<name>.period_ms` and `tasks.<name>.workload`
//! is optional.  A file with no tasks falls back to [`TaskSetConfig::demo`].

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::dispatcher::{DispatcherConfig, OverrunPolicy};
use crate::recorder::DEFAULT_HISTORY_LIMIT;
use crate::task::TaskSpec;
use crate::workload::{CommandWorkload, SleepWorkload, SpinWorkload};

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
#[derive(Debug, Deserialize)]
struct TaskSetFile {
    #[serde(default)]
    dispatcher: DispatcherSection,
    #[serde(default)]
    tasks: BTreeMap<String, TaskEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct DispatcherSection {
    #[serde(default)]
    overrun_policy: OverrunPolicy,
    history_limit: Option<usize>,
    thread_name: Option<String>,
}

/// Per-task fields as they appear in the YAML file.
#[derive(Debug, Deserialize)]
struct TaskEntry {
    period_ms: u64,
    deadline_ms: Option<u64>,
    #[serde(default)]
    offset_ms: u64,
    expected_exec_ms: Option<u64>,
    workload: WorkloadConfig,
}

// ── Public data structures ────────────────────────────────────────────────────

/// Which built-in workload a configured task runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkloadConfig {
    /// [`SleepWorkload`]: blocks for `exec_ms`.
    Sleep {
        exec_ms: u64,
        #[serde(default)]
        fail_every: u32,
    },
    /// [`SpinWorkload`]: busy-loops for `exec_ms`.
    Spin {
        exec_ms: u64,
        #[serde(default)]
        fail_every: u32,
    },
    /// [`CommandWorkload`]: runs an external program to completion.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl WorkloadConfig {
    fn describe(&self) -> String {
        match self {
            WorkloadConfig::Sleep { exec_ms, .. } => format!("sleep {exec_ms}ms"),
            WorkloadConfig::Spin { exec_ms, .. } => format!("spin {exec_ms}ms"),
            WorkloadConfig::Command { program, args } => {
                format!("command {program} {}", args.join(" "))
            }
        }
    }
}

/// One configured periodic task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskConfig {
    pub name: String,
    pub period: Duration,
    pub deadline: Duration,
    pub offset: Duration,
    pub expected_exec: Option<Duration>,
    pub workload: WorkloadConfig,
}

impl TaskConfig {
    /// Build the runnable [`TaskSpec`].  Validation happens at registration.
    pub fn to_spec(&self) -> TaskSpec {
        let spec = match &self.workload {
            WorkloadConfig::Sleep {
                exec_ms,
                fail_every,
            } => TaskSpec::new(
                self.name.clone(),
                self.period,
                self.deadline,
                SleepWorkload::new(Duration::from_millis(*exec_ms)).failing_every(*fail_every),
            ),
            WorkloadConfig::Spin {
                exec_ms,
                fail_every,
            } => TaskSpec::new(
                self.name.clone(),
                self.period,
                self.deadline,
                SpinWorkload::new(Duration::from_millis(*exec_ms)).failing_every(*fail_every),
            ),
            WorkloadConfig::Command { program, args } => TaskSpec::new(
                self.name.clone(),
                self.period,
                self.deadline,
                CommandWorkload::new(program.clone(), args.clone()),
            ),
        }
        .with_offset(self.offset);

        match self.expected_exec {
            Some(exec) => spec.with_expected_exec(exec),
            None => spec,
        }
    }
}

/// A loaded task set plus dispatcher settings.
#[derive(Debug, Clone)]
pub struct TaskSetConfig {
    pub dispatcher: DispatcherConfig,

    /// Capacity of the recorder's in-memory history.
    pub history_limit: usize,

    /// Tasks in ascending name order.
    pub tasks: Vec<TaskConfig>,
}

impl TaskSetConfig {
    /// The built-in three-task set: camera capture, audio feature extraction
    /// and an inference job whose cost exceeds its deadline.
    pub fn demo() -> Self {
        let task = |name: &str, period_ms, deadline_ms, exec_ms| TaskConfig {
            name: name.to_string(),
            period: Duration::from_millis(period_ms),
            deadline: Duration::from_millis(deadline_ms),
            offset: Duration::ZERO,
            expected_exec: Some(Duration::from_millis(exec_ms)),
            workload: WorkloadConfig::Spin {
                exec_ms,
                fail_every: 0,
            },
        };

        Self {
            dispatcher: DispatcherConfig::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            tasks: vec![
                task("audio_mfcc", 50, 50, 10),
                task("camera_capture", 100, 100, 20),
                task("inference", 200, 150, 180),
            ],
        }
    }

    /// Parses `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or if the YAML is
    /// structurally invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading task set from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: TaskSetFile = serde_yaml::from_str(yaml)?;

        if file.tasks.is_empty() {
            warn!("No tasks found in configuration, using the built-in demo task set");
            let mut demo = Self::demo();
            demo.dispatcher.overrun_policy = file.dispatcher.overrun_policy;
            if let Some(limit) = file.dispatcher.history_limit {
                demo.history_limit = limit;
            }
            if let Some(name) = file.dispatcher.thread_name {
                demo.dispatcher.thread_name = name;
            }
            return Ok(demo);
        }

        let mut dispatcher = DispatcherConfig {
            overrun_policy: file.dispatcher.overrun_policy,
            ..DispatcherConfig::default()
        };
        if let Some(name) = file.dispatcher.thread_name {
            dispatcher.thread_name = name;
        }

        let tasks: Vec<TaskConfig> = file
            .tasks
            .into_iter()
            .map(|(name, entry)| {
                let task = TaskConfig {
                    name,
                    period: Duration::from_millis(entry.period_ms),
                    deadline: Duration::from_millis(entry.deadline_ms.unwrap_or(entry.period_ms)),
                    offset: Duration::from_millis(entry.offset_ms),
                    expected_exec: entry.expected_exec_ms.map(Duration::from_millis),
                    workload: entry.workload,
                };
                debug!(
                    "  Task: {} | period: {:?} | deadline: {:?} | offset: {:?} | workload: {}",
                    task.name,
                    task.period,
                    task.deadline,
                    task.offset,
                    task.workload.describe(),
                );
                task
            })
            .collect();

        info!("Loaded {} task(s)", tasks.len());

        Ok(Self {
            dispatcher,
            history_limit: file
                .dispatcher
                .history_limit
                .unwrap_or(DEFAULT_HISTORY_LIMIT),
            tasks,
        })
    }

    /// Runnable specs for every configured task.
    pub fn task_specs(&self) -> Vec<TaskSpec> {
        self.tasks.iter().map(TaskConfig::to_spec).collect()
    }

    pub fn task(&self, name: &str) -> Option<&TaskConfig> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

impl Default for TaskSetConfig {
    fn default() -> Self {
        Self::demo()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
