//! Advisory/violation event log (`events.jsonl`).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Context advisory injected into the host's next prompt.
    Advisory,
    /// A behavioral monitor observed a violation (loop, unread write, …).
    Violation,
    /// A plugin hook failed and the plugin was disabled for this process.
    PluginError,
    /// A state file was corrupt or version-mismatched and rebuilt empty.
    StateRebuilt,
    /// A phase or turn exceeded its soft deadline.
    DeadlineExceeded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
    /// Emitting component ("router", "loop_breaker", …).
    pub source: String,
    pub message: String,
}

impl EventRecord {
    pub fn new(kind: EventKind, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            kind,
            source: source.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, event: &EventRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(event)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}
