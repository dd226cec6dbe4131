//! Append-only session log
//!
//! The connection manager writes one line per connect, per command sent and
//! per frame received. Logging is best-effort: a failing sink is reported
//! through `log::warn!` and never interrupts serial traffic.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Line sink for session events
pub trait SessionLog: Send + Sync {
    fn log_line(&self, line: &str);
}

/// Discards every line
pub struct NullLog;

impl SessionLog for NullLog {
    fn log_line(&self, _line: &str) {}
}

/// Timestamped log file, flushed after every line
pub struct FileLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileLog {
    /// Create `debugger_<timestamp>.log` inside `dir`, creating the directory
    pub fn create_in(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

        let name = format!("debugger_{}.log", Local::now().format("%Y-%m-%d_%H-%M-%S"));
        Self::open(&dir.join(name))
    }

    /// Open (or append to) a log file at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;

        let log = Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        };
        log.log_line("=== Debugger Session Started ===");
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionLog for FileLog {
    fn log_line(&self, line: &str) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.6f");
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        if let Err(e) = writeln!(writer, "[{}] {}", timestamp, line).and_then(|_| writer.flush()) {
            log::warn!("Failed to write session log {}: {}", self.path.display(), e);
        }
    }
}

/// Keeps lines in memory, for assertions in tests
#[cfg(test)]
#[derive(Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<String>>,
}

#[cfg(test)]
impl MemoryLog {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl SessionLog for MemoryLog {
    fn log_line(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}
