use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;

/// One failure that was surfaced to the user.
#[derive(Clone, Debug)]
pub struct ErrorLogEntry {
    pub timestamp: DateTime<Local>,
    pub source: String,
    pub message: String,
}

impl ErrorLogEntry {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorLogEntry {
            timestamp: Local::now(),
            source: source.into(),
            message: message.into(),
        }
    }

    fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// Append-only JSONL record of errors, one object per line.
#[derive(Clone, Debug)]
pub struct ErrorLogStore {
    path: PathBuf,
}

impl ErrorLogStore {
    pub fn new(path: PathBuf) -> Self {
        ErrorLogStore { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_message(&self, source: &str, message: impl Into<String>) -> Result<()> {
        let entry = ErrorLogEntry::new(source, message);
        self.append(&entry)
    }

    fn append(&self, entry: &ErrorLogEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("无法写入 {}", self.path.display()))?;
        serde_json::to_writer(&mut file, &StoredErrorLogEntry::from(entry))?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

#[derive(Serialize)]
struct StoredErrorLogEntry {
    timestamp_ms: i64,
    source: String,
    message: String,
}

impl From<&ErrorLogEntry> for StoredErrorLogEntry {
    fn from(entry: &ErrorLogEntry) -> Self {
        StoredErrorLogEntry {
            timestamp_ms: entry.timestamp_ms(),
            source: entry.source.clone(),
            message: entry.message.clone(),
        }
    }
}
