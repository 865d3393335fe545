//! Append-only attendance log.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("attendance log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("identity {0:?} cannot be written to the log")]
    InvalidIdentity(String),
}

/// Receives one call per accepted verification.
pub trait AttendanceRecorder: Send + Sync {
    fn record(&self, identity: &str, at: NaiveDateTime) -> Result<(), AttendanceError>;
}

/// One persisted attendance line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub identity: String,
    pub date: String,
    pub time: String,
}

/// CSV attendance log: `name,YYYY-MM-DD,HH:MM:SS` per line.
///
/// Each record is a single `write_all` on an append-mode handle, taken under
/// the log's mutex, so concurrent recorders never interleave lines.
pub struct CsvAttendanceLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CsvAttendanceLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every well-formed record. A missing file is an empty log.
    pub fn read_records(&self) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(AttendanceError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        Ok(contents.lines().filter_map(parse_line).collect())
    }
}

fn format_line(identity: &str, at: NaiveDateTime) -> String {
    format!(
        "{identity},{},{}\n",
        at.format("%Y-%m-%d"),
        at.format("%H:%M:%S")
    )
}

fn parse_line(line: &str) -> Option<AttendanceRecord> {
    let mut parts = line.trim().split(',');
    let identity = parts.next()?;
    let date = parts.next()?;
    let time = parts.next()?;
    Some(AttendanceRecord {
        identity: identity.to_string(),
        date: date.to_string(),
        time: time.to_string(),
    })
}

impl AttendanceRecorder for CsvAttendanceLog {
    fn record(&self, identity: &str, at: NaiveDateTime) -> Result<(), AttendanceError> {
        if identity.is_empty() || identity.contains([',', '\n', '\r']) {
            return Err(AttendanceError::InvalidIdentity(identity.to_string()));
        }

        let line = format_line(identity, at);
        let io_err = |source: std::io::Error| AttendanceError::Io {
            path: self.path.clone(),
            source,
        };

        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(line.as_bytes()).map_err(io_err)?;

        tracing::info!(identity, path = %self.path.display(), "attendance recorded");
        Ok(())
    }
}
