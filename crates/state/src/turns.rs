//! The append-only turn log (`turns.jsonl`) and the pending-turn handoff.
//!
//! Every completed request/response cycle appends exactly one [`TurnRecord`].
//! The log is the learner's and predictor's replay source, so corrupt lines
//! are skipped (and preserved in a `.corrupt` sidecar) rather than aborting
//! the load.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::FileId;

/// One observed tool invocation, as reported by the host on `stop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub target_path: Option<FileId>,
    /// Hash of the normalized operation payload, supplied by the host's
    /// telemetry layer.
    #[serde(default)]
    pub op_hash: Option<String>,
}

/// One completed turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_id: u64,
    pub timestamp: DateTime<Utc>,
    pub project: String,
    pub session_id: String,
    pub prompt_length: usize,
    /// Trimmed prompt text; omitted when the host withholds it.
    #[serde(default)]
    pub prompt_text: Option<String>,
    pub files_injected: Vec<FileId>,
    pub files_used: Vec<FileId>,
    pub token_estimate: usize,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// State carried from `user_prompt_submit` to the matching `stop` event,
/// persisted because each hook event runs in its own process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTurn {
    pub turn_id: u64,
    pub session_id: String,
    pub prompt_text: String,
    pub files_injected: Vec<FileId>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TurnLog {
    path: PathBuf,
}

impl TurnLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, fsync'd so it survives a crash immediately after.
    pub fn append(&self, record: &TurnRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}")?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    /// Load every parseable record.  Corrupt lines are skipped with a warning
    /// and appended to a `.corrupt` sidecar for forensics.
    pub fn load(&self) -> Result<Vec<TurnRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut corrupt = 0usize;

        for (line_idx, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TurnRecord>(&line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    corrupt += 1;
                    warn!(
                        line = line_idx + 1,
                        error = %err,
                        path = %self.path.display(),
                        "corrupt turn record — skipping line"
                    );
                    let sidecar = self.path.with_extension("jsonl.corrupt");
                    if let Ok(mut bad) =
                        OpenOptions::new().create(true).append(true).open(&sidecar)
                    {
                        let _ = writeln!(bad, "{line}");
                    }
                }
            }
        }

        if corrupt > 0 {
            warn!(
                corrupt_lines = corrupt,
                path = %self.path.display(),
                "turn log loaded with skipped corrupt lines — inspect .corrupt sidecar"
            );
        }
        Ok(records)
    }

    /// Load at most the `limit` most recent records.
    pub fn load_recent(&self, limit: usize) -> Result<Vec<TurnRecord>> {
        let mut records = self.load()?;
        if records.len() > limit {
            records.drain(..records.len() - limit);
        }
        Ok(records)
    }
}
