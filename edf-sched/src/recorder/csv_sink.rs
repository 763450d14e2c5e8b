/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! CSV sink: one row per run record.
//!
//! Columns, all times in microseconds on the dispatcher's clock:
//!
//! ```text
//! task,seq,release_us,deadline_us,start_us,end_us,duration_us,missed,failed,error
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use super::{RecordSink, RunRecord};

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    task: &'a str,
    seq: u64,
    release_us: u64,
    deadline_us: u64,
    start_us: u64,
    end_us: u64,
    duration_us: u64,
    missed: bool,
    failed: bool,
    error: &'a str,
}

impl<'a> From<&'a RunRecord> for CsvRow<'a> {
    fn from(r: &'a RunRecord) -> Self {
        CsvRow {
            task: &r.task_name,
            seq: r.seq,
            release_us: r.release_time.as_micros(),
            deadline_us: r.absolute_deadline.as_micros(),
            start_us: r.exec_start.as_micros(),
            end_us: r.exec_end.as_micros(),
            duration_us: u64::try_from(r.exec_duration.as_micros()).unwrap_or(u64::MAX),
            missed: r.missed,
            failed: r.failed,
            error: r.error.as_deref().unwrap_or(""),
        }
    }
}

/// Writes run records as CSV rows to any writer (a file by default).
pub struct CsvSink<W: Write = File> {
    writer: csv::Writer<W>,
}

impl CsvSink<File> {
    /// Create (or truncate) `path` and write the header row on first record.
    pub fn create(path: &Path) -> Result<Self> {
        let writer = csv::Writer::from_path(path)
            .with_context(|| format!("Cannot create record file: {}", path.display()))?;
        Ok(Self { writer })
    }
}

impl<W: Write> CsvSink<W> {
    pub fn from_writer(inner: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(inner),
        }
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("failed to flush CSV writer: {}", e.error()))
    }
}

impl<W: Write + Send> RecordSink for CsvSink<W> {
    fn write(&mut self, record: &RunRecord) -> Result<()> {
        self.writer
            .serialize(CsvRow::from(record))
            .context("failed to write CSV row")
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("failed to flush CSV file")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
