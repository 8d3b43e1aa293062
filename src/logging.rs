use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// One JSONL record per visited file.
#[derive(Debug, Serialize)]
pub struct FileRecord<'a> {
    pub timestamp: &'a str,
    pub path: &'a str,
    pub encoding: &'a str,
    pub code_page: Option<u16>,
    pub bytes: u64,
    pub status: &'a str,
}

#[derive(Debug, Serialize)]
struct NoteRecord<'a> {
    timestamp: &'a str,
    note: &'a str,
}

/// Append-only JSONL run log. Disabled by default; every call is then a
/// no-op. Log write failures never interrupt the run.
pub struct RunLog {
    file: Option<File>,
}

impl RunLog {
    pub fn disabled() -> Self {
        Self { file: None }
    }

    /// Opens the log, truncating whatever a previous run left behind.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("unable to open log file {}", path.display()))?;
        Ok(Self { file: Some(file) })
    }

    pub fn file(&mut self, record: &FileRecord<'_>) {
        self.write_json(record);
    }

    pub fn note(&mut self, note: &str) {
        let timestamp = now();
        self.write_json(&NoteRecord {
            timestamp: &timestamp,
            note,
        });
    }

    fn write_json<T: Serialize>(&mut self, record: &T) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        if let Ok(json) = serde_json::to_string(record) {
            let _ = writeln!(file, "{json}");
        }
    }
}

pub fn now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".into())
}
