//! Attendance log: one `Name,Date,Time` row per person per day.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum LogWriteError {
    #[error("attendance log {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("failed to lock attendance log {path}: {source}")]
    Lock { path: PathBuf, source: std::io::Error },
    #[error("attendance log {path} is malformed: {source}")]
    Csv { path: PathBuf, source: csv::Error },
}

/// A first sighting of `name` on `date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Time")]
    pub time: String,
}

impl AttendanceEvent {
    pub fn at(name: &str, now: NaiveDateTime) -> Self {
        Self {
            name: name.to_string(),
            date: now.format(DATE_FORMAT).to_string(),
            time: now.format(TIME_FORMAT).to_string(),
        }
    }

    fn same_day(&self, other: &AttendanceEvent) -> bool {
        self.name == other.name && self.date == other.date
    }
}

pub trait AttendanceLog {
    /// Append `event` unless a row with the same name and date exists.
    ///
    /// The check and the append happen as one step. Returns whether a row
    /// was written.
    fn record_if_absent(&mut self, event: &AttendanceEvent) -> Result<bool, LogWriteError>;

    /// Every row, in file order.
    fn entries(&self) -> Result<Vec<AttendanceEvent>, LogWriteError>;

    /// Rows for a single day.
    fn entries_on(&self, date: NaiveDate) -> Result<Vec<AttendanceEvent>, LogWriteError> {
        let date = date.format(DATE_FORMAT).to_string();
        Ok(self.entries()?.into_iter().filter(|e| e.date == date).collect())
    }
}

/// CSV file log shared safely between threads and processes through an
/// exclusive `flock` held across each check-and-append.
#[derive(Debug, Clone)]
pub struct CsvAttendanceLog {
    path: PathBuf,
}

impl CsvAttendanceLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> LogWriteError {
        LogWriteError::Io { path: self.path.clone(), source }
    }

    fn csv_err(&self, source: csv::Error) -> LogWriteError {
        LogWriteError::Csv { path: self.path.clone(), source }
    }

    fn read_rows(&self, file: &File) -> Result<Vec<AttendanceEvent>, LogWriteError> {
        let mut reader = csv::Reader::from_reader(file);
        reader
            .deserialize()
            .collect::<Result<Vec<AttendanceEvent>, _>>()
            .map_err(|e| self.csv_err(e))
    }

    /// Add the missing newline when another tool saved the file without one,
    /// so the next row starts on its own line.
    fn terminate_last_row(&self, file: &File) -> Result<(), LogWriteError> {
        let mut last = [0u8; 1];
        let mut reader = file;
        reader.seek(SeekFrom::End(-1)).map_err(|e| self.io_err(e))?;
        reader.read_exact(&mut last).map_err(|e| self.io_err(e))?;
        if last[0] != b'\n' {
            let mut writer = file;
            writer.write_all(b"\n").map_err(|e| self.io_err(e))?;
        }
        Ok(())
    }
}

impl AttendanceLog for CsvAttendanceLog {
    fn record_if_absent(&mut self, event: &AttendanceEvent) -> Result<bool, LogWriteError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        let _lock = FileLock::exclusive(&file)
            .map_err(|source| LogWriteError::Lock { path: self.path.clone(), source })?;

        (&file).seek(SeekFrom::Start(0)).map_err(|e| self.io_err(e))?;
        if self.read_rows(&file)?.iter().any(|row| row.same_day(event)) {
            return Ok(false);
        }

        let empty = file.metadata().map_err(|e| self.io_err(e))?.len() == 0;
        if !empty {
            self.terminate_last_row(&file)?;
        }
        let mut writer = csv::WriterBuilder::new().has_headers(empty).from_writer(&file);
        writer.serialize(event).map_err(|e| self.csv_err(e))?;
        writer.flush().map_err(|e| self.io_err(e))?;
        Ok(true)
    }

    fn entries(&self) -> Result<Vec<AttendanceEvent>, LogWriteError> {
        match File::open(&self.path) {
            Ok(file) => self.read_rows(&file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(self.io_err(e)),
        }
    }
}

/// Advisory exclusive lock released on drop.
struct FileLock<'a> {
    file: &'a File,
}

impl<'a> FileLock<'a> {
    fn exclusive(file: &'a File) -> std::io::Result<Self> {
        // SAFETY: the fd is valid for the lifetime of `file`, which outlives the guard.
        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if ret < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self { file })
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        // SAFETY: see `exclusive`.
        let ret = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        if ret < 0 {
            tracing::warn!(error = %std::io::Error::last_os_error(), "failed to unlock attendance log");
        }
    }
}
