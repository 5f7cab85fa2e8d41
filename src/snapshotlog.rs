// coati is an incremental backup tool
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! The per-run take-snapshot log.
//!
//! The log is a plain text file, append-only within a run and truncated
//! at run start. Each line carries a level tag: `[I]` info, `[C]` a
//! detected change, `[E]` an error. Lines without a tag pass the
//! `Changes` filter so that free text written by older runs stays
//! visible.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};

use crate::config::Config;

/// Filter applied when reading a snapshot log back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFilter {
    All,
    Changes,
    Errors,
}

/// Returns true if `line` passes `filter`.
pub fn filter_line(line: &str, filter: LogFilter) -> bool {
    match filter {
        LogFilter::All => true,
        LogFilter::Changes => !line.starts_with('[') || line.starts_with("[C]"),
        LogFilter::Errors => line.starts_with("[E]"),
    }
}

/// Filters a whole log, keeping line order.
pub fn filter_lines(content: &str, filter: LogFilter) -> String {
    content
        .lines()
        .filter(|line| filter_line(line, filter))
        .collect::<Vec<&str>>()
        .join("\n")
}

pub struct SnapshotLog {
    path: PathBuf,
    file: Option<File>,
}

impl SnapshotLog {
    pub fn new(cfg: &Arc<Config>) -> Self {
        Self {
            path: cfg.take_snapshot_log_file(),
            file: None,
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Truncates the log file and starts a fresh run.
    pub fn new_run(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create '{}'", parent.display()))?;
        }
        let file = File::create(&self.path)
            .with_context(|| format!("Could not create log file '{}'", self.path.display()))?;
        self.file = Some(file);
        Ok(())
    }

    /// Appends one line and flushes so the log stays readable while the
    /// run is still in progress.
    pub fn append(&mut self, line: &str) -> Result<()> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Could not create '{}'", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("Could not open log file '{}'", self.path.display()))?;
            self.file = Some(file);
        }

        let file = self.file.as_mut().ok_or_else(|| {
            anyhow::anyhow!("Log file '{}' is not open", self.path.display())
        })?;
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }

    /// The raw bytes written so far in this run.
    pub fn raw(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path)
            .with_context(|| format!("Could not read log file '{}'", self.path.display()))
    }

    /// The filtered log content.
    pub fn read(&self, filter: LogFilter) -> Result<String> {
        let content = String::from_utf8_lossy(&self.raw()?).into_owned();
        Ok(filter_lines(&content, filter))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn test_log(data_dir: &std::path::Path) -> SnapshotLog {
        let cfg = Config::new(data_dir.join("config"));
        cfg.set_data_path(data_dir);
        SnapshotLog::new(&Arc::new(cfg))
    }

    #[test]
    fn test_append_and_read() -> Result<()> {
        let tmp = tempdir()?;
        let mut log = test_log(tmp.path());

        log.new_run()?;
        log.append("foo bar")?;
        log.append("[I] 123")?;
        log.append("[C] baz")?;
        log.append("[E] bla")?;

        assert_eq!(
            log.read(LogFilter::All)?,
            "foo bar\n[I] 123\n[C] baz\n[E] bla"
        );
        assert_eq!(log.read(LogFilter::Changes)?, "foo bar\n[C] baz");
        assert_eq!(log.read(LogFilter::Errors)?, "[E] bla");

        Ok(())
    }

    #[test]
    fn test_new_run_truncates() -> Result<()> {
        let tmp = tempdir()?;
        let mut log = test_log(tmp.path());

        log.new_run()?;
        log.append("[I] old run")?;

        log.new_run()?;
        log.append("[I] new run")?;

        assert_eq!(log.read(LogFilter::All)?, "[I] new run");

        Ok(())
    }

    #[test]
    fn test_append_without_new_run() -> Result<()> {
        let tmp = tempdir()?;
        let mut log = test_log(tmp.path());

        log.append("[I] lazily opened")?;
        assert_eq!(log.read(LogFilter::All)?, "[I] lazily opened");

        Ok(())
    }
}
