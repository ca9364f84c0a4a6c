//! Append-only JSON-lines event log.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use skillflow_core::event::{EventSink, SinkError};
use skillflow_types::event::EventRecord;

/// Writes each event as one JSON object per line.
#[derive(Debug)]
pub struct JsonlFileSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlFileSink {
    /// Open (or create) `path` for appending, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonlFileSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn deliver(&self, record: &EventRecord) -> Result<(), SinkError> {
        let line = serde_json::to_string(record)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| SinkError::Other(format!("{} writer lock poisoned", self.path.display())))?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}
