//! Durable progress checkpoint.
//!
//! The checkpoint is a pretty-printed JSON document rewritten in full on every
//! change (temp file, fsync, rename, fsync of the directory). A document that
//! exists but cannot be parsed, or that violates the offset/status invariant,
//! is reported as corrupt instead of being treated as a fresh start.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CheckpointError;

/// Lifecycle of a job as seen across invocations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    NotStarted,
    Running,
    Interrupted,
    Completed,
}

impl RunStatus {
    /// Whether a record in this state carries a resume offset.
    pub fn has_offset(self) -> bool {
        matches!(self, RunStatus::Running | RunStatus::Interrupted)
    }
}

/// The persisted checkpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgressRecord {
    pub status: RunStatus,
    pub total_songs: u64,
    pub processed: u64,
    /// Next catalog index to fetch. Null exactly when not started or completed.
    pub last_offset: Option<u64>,
    pub success_count: u64,
    pub lyrics_found: u64,
    pub library_id: Option<String>,
    pub updated_at: Option<String>,
    /// Most recent failures, oldest first.
    pub errors: Vec<String>,
}

impl ProgressRecord {
    /// Checks that `last_offset` is present exactly for running/interrupted.
    pub fn validate(&self) -> Result<(), String> {
        match (self.status.has_offset(), self.last_offset) {
            (true, None) => Err(format!("status {:?} requires last_offset", self.status)),
            (false, Some(offset)) => Err(format!(
                "status {:?} must not carry last_offset (found {})",
                self.status, offset
            )),
            _ => Ok(()),
        }
    }

    /// Offset to resume from, if this record describes an unfinished run.
    pub fn resume_offset(&self) -> Option<u64> {
        if self.status.has_offset() {
            self.last_offset
        } else {
            None
        }
    }

    pub fn push_error(&mut self, message: String, capacity: usize) {
        self.errors.push(message);
        let excess = self.errors.len().saturating_sub(capacity);
        if excess > 0 {
            self.errors.drain(..excess);
        }
    }
}

/// Sink for per-item failure messages.
pub trait ErrorLog {
    fn log_error(&mut self, message: &str);
}

impl ErrorLog for Vec<String> {
    fn log_error(&mut self, message: &str) {
        self.push(message.to_string());
    }
}

/// Owns the checkpoint file and the in-memory record. Single writer.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    error_capacity: usize,
    record: ProgressRecord,
}

impl ProgressStore {
    /// Loads the checkpoint at `path`, or starts from a default record.
    pub fn open(path: impl Into<PathBuf>, error_capacity: usize) -> Result<Self, CheckpointError> {
        let path = path.into();
        let record = Self::load(&path)?;
        Ok(Self {
            path,
            error_capacity: error_capacity.max(1),
            record,
        })
    }

    /// Reads a checkpoint without taking ownership of it.
    pub fn load(path: &Path) -> Result<ProgressRecord, CheckpointError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ProgressRecord::default()),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let corrupt = |reason: String| CheckpointError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };
        let record: ProgressRecord =
            serde_json::from_str(&raw).map_err(|e| corrupt(e.to_string()))?;
        record.validate().map_err(corrupt)?;
        Ok(record)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &ProgressRecord {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut ProgressRecord {
        &mut self.record
    }

    /// Replaces the record and persists it.
    pub fn save(&mut self, record: ProgressRecord) -> Result<(), CheckpointError> {
        self.record = record;
        self.flush()
    }

    /// Persists the in-memory record, fully overwriting the file.
    pub fn flush(&mut self) -> Result<(), CheckpointError> {
        self.record.updated_at = Some(timestamp());
        if let Err(reason) = self.record.validate() {
            // Saving an inconsistent record would make the next load fail.
            return Err(CheckpointError::Corrupt {
                path: self.path.clone(),
                reason,
            });
        }
        let data = serde_json::to_string_pretty(&self.record)?;
        write_atomic(&self.path, data.as_bytes()).map_err(|source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Appends a timestamped message, keeps the newest entries and persists.
    pub fn record_error(&mut self, message: &str) -> Result<(), CheckpointError> {
        let entry = format!("{}: {}", timestamp(), message);
        self.record.push_error(entry, self.error_capacity);
        self.flush()
    }
}

impl ErrorLog for ProgressStore {
    fn log_error(&mut self, message: &str) {
        if let Err(e) = self.record_error(message) {
            warn!(error = %e, "failed to persist error log entry");
        }
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "checkpoint".to_string());
    path.with_file_name(format!("{name}.tmp"))
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = temp_path(path);
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    if let Some(parent) = parent {
        fsync_dir(parent)?;
    }
    Ok(())
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
