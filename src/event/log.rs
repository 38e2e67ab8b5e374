//! The append-only event log store (`state/wu-events.jsonl`).
//!
//! One JSON event per line. Two write paths exist:
//!
//! - [`EventLog::append`] — a single event, serialized under a
//!   create-exclusive file lock (for writers outside a transaction).
//! - [`EventLog::stage_append`] — the transactional path: read the
//!   authoritative log, append, and write the result into a micro-worktree
//!   for the transactor to commit.
//!
//! [`EventLog::repair`] drops lines that fail to parse, fail schema
//! validation, or are git conflict markers. The original file is copied to
//! `<path>.backup-<ts>` before the rewrite, and the output is always a
//! strict subset of the valid input lines plus an ordered report of what was
//! removed.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::LumenError;
use crate::event::types::WuEvent;
use crate::layout::Layout;
use crate::lock::FileLock;

// ---------------------------------------------------------------------------
// EventLog
// ---------------------------------------------------------------------------

/// Handle to the on-disk event log.
#[derive(Clone, Debug)]
pub struct EventLog {
    path: PathBuf,
    lock_path: PathBuf,
    lock_stale: Duration,
}

impl EventLog {
    /// Open the event log described by `layout`.
    #[must_use]
    pub fn new(layout: &Layout, lock_stale: Duration) -> Self {
        Self {
            path: layout.events_file(),
            lock_path: layout.events_lock_file(),
            lock_stale,
        }
    }

    /// The log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event under the log's file lock.
    ///
    /// # Errors
    /// Fails if the lock stays contended or the write fails.
    pub fn append(&self, event: &WuEvent) -> Result<(), LumenError> {
        let _guard = FileLock::acquire(&self.lock_path, self.lock_stale)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(f, "{}", to_line(event)?)?;
        f.flush()?;
        debug!(wu = %event.wu_id, "appended event");
        Ok(())
    }

    /// Transactional append: copy the authoritative log plus `event` into
    /// `worktree`, returning the repo-relative path for the commit file
    /// list. The authoritative file itself is not touched.
    ///
    /// # Errors
    /// Fails on I/O or serialization errors.
    pub fn stage_append(&self, worktree: &Path, event: &WuEvent) -> Result<PathBuf, LumenError> {
        let rel = Layout::events_rel();
        let dst = worktree.join(&rel);
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(&to_line(event)?);
        contents.push('\n');
        std::fs::write(&dst, contents)?;
        Ok(rel)
    }

    /// Replay the log, strictly. Line order is preserved so per-WU timestamp
    /// ties break by file offset.
    ///
    /// # Errors
    /// Any malformed or schema-invalid line is an error naming the line
    /// number; run repair to drop bad lines.
    pub fn read_all(&self) -> Result<Vec<WuEvent>, LumenError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut events = Vec::new();
        for (i, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let event = WuEvent::from_json_line(line).map_err(|e| LumenError::Internal {
                detail: format!(
                    "event log line {} is invalid ({e}); the log needs repair",
                    i + 1
                ),
            })?;
            events.push(event);
        }
        Ok(events)
    }

    /// Scan the log and drop invalid lines.
    ///
    /// With `dry_run`, reports what would be removed without touching the
    /// file. Otherwise the original is first copied to `<path>.backup-<ts>`
    /// and the log is rewritten atomically with only the valid lines.
    ///
    /// # Errors
    /// Fails on I/O errors; an absent log is an empty (clean) report.
    pub fn repair(&self, dry_run: bool) -> Result<RepairReport, LumenError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RepairReport::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut kept = Vec::new();
        let mut removed = Vec::new();
        for (i, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if is_conflict_marker(line) {
                removed.push(RemovedLine {
                    line_no: i + 1,
                    content: line.to_owned(),
                    reason: RemoveReason::ConflictMarker,
                });
                continue;
            }
            match WuEvent::from_json_line(line) {
                Ok(_) => kept.push(line),
                Err(_) => {
                    let reason = if serde_json::from_str::<serde_json::Value>(line).is_ok() {
                        RemoveReason::SchemaInvalid
                    } else {
                        RemoveReason::Malformed
                    };
                    removed.push(RemovedLine {
                        line_no: i + 1,
                        content: line.to_owned(),
                        reason,
                    });
                }
            }
        }

        let mut report = RepairReport {
            kept: kept.len(),
            removed,
            backup: None,
        };
        if report.removed.is_empty() || dry_run {
            return Ok(report);
        }

        let backup = PathBuf::from(format!(
            "{}.backup-{}",
            self.path.display(),
            Utc::now().format("%Y%m%dT%H%M%S%3f")
        ));
        std::fs::copy(&self.path, &backup)?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        for line in &kept {
            writeln!(tmp, "{line}")?;
        }
        tmp.flush()?;
        tmp.persist(&self.path)
            .map_err(|e| LumenError::Io(e.error))?;

        info!(
            removed = report.removed.len(),
            kept = report.kept,
            backup = %backup.display(),
            "repaired event log"
        );
        report.backup = Some(backup);
        Ok(report)
    }
}

fn to_line(event: &WuEvent) -> Result<String, LumenError> {
    event.to_json_line().map_err(|e| LumenError::Internal {
        detail: format!("event serialization failed: {e}"),
    })
}

fn is_conflict_marker(line: &str) -> bool {
    line.starts_with("<<<<<<<") || line.starts_with("=======") || line.starts_with(">>>>>>>")
}

// ---------------------------------------------------------------------------
// RepairReport
// ---------------------------------------------------------------------------

/// Why a line was dropped during repair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoveReason {
    /// Not valid JSON at all.
    Malformed,
    /// Valid JSON that is not a valid event (unknown type, bad fields).
    SchemaInvalid,
    /// A git conflict marker line.
    ConflictMarker,
}

impl fmt::Display for RemoveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Malformed => "malformed JSON",
            Self::SchemaInvalid => "schema-invalid event",
            Self::ConflictMarker => "git conflict marker",
        };
        f.write_str(s)
    }
}

/// One dropped line, in file order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemovedLine {
    /// 1-based line number in the original file.
    pub line_no: usize,
    /// The dropped content, verbatim.
    pub content: String,
    /// Why it was dropped.
    pub reason: RemoveReason,
}

/// Outcome of a repair pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Valid lines retained.
    pub kept: usize,
    /// Dropped lines, ordered by original line number.
    pub removed: Vec<RemovedLine>,
    /// Where the pre-repair file was copied, when a rewrite happened.
    pub backup: Option<PathBuf>,
}

impl RepairReport {
    /// `true` if nothing needed to change.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.removed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
