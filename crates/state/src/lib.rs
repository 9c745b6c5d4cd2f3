//! Persistent state and telemetry types shared across the router, learner,
//! predictor, and plugins.
//!
//! Everything on disk is versioned JSON or append-only JSONL.  Writers go
//! through [`store::write_json_atomic`] (temp file + fsync + rename) under an
//! advisory directory lock, so a crash mid-write never leaves a torn file and
//! concurrent sessions in the same project resolve to last-writer-wins.

pub mod attention;
pub mod events;
pub mod store;
pub mod text;
pub mod turns;

pub use attention::{AttentionState, SCORE_EPSILON, SCORE_MAX, STATE_VERSION, Tier};
pub use events::{EventKind, EventLog, EventRecord};
pub use store::{DirLock, StoreError, read_json, write_json_atomic};
pub use turns::{PendingTurn, ToolCall, TurnLog, TurnRecord};

/// Stable project-relative path of a tracked file.
pub type FileId = String;
