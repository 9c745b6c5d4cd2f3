//! Per-session attention scores and their on-disk form (`attn_state.json`).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::FileId;

pub const STATE_VERSION: u32 = 1;

/// Scores saturate here; every phase that writes re-applies the clamp.
pub const SCORE_MAX: f64 = 1.2;

/// Entries below this are dropped during decay.
pub const SCORE_EPSILON: f64 = 0.01;

/// Inclusion bucket derived from score thresholds: full content, outline, or
/// name only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    pub fn from_score(score: f64, hot: f64, warm: f64) -> Self {
        if score >= hot {
            Tier::Hot
        } else if score >= warm {
            Tier::Warm
        } else {
            Tier::Cold
        }
    }
}

/// Session-local attention state: one score and one consecutive-turns-hot
/// streak per file, plus the turn counter.
///
/// Only the router mutates this, and only within a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionState {
    pub version: u32,
    pub turn_count: u64,
    pub last_update: DateTime<Utc>,
    pub scores: BTreeMap<FileId, f64>,
    pub streaks: BTreeMap<FileId, u32>,
}

impl AttentionState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            version: STATE_VERSION,
            turn_count: 0,
            last_update: now,
            scores: BTreeMap::new(),
            streaks: BTreeMap::new(),
        }
    }

    pub fn score(&self, file: &str) -> f64 {
        self.scores.get(file).copied().unwrap_or(0.0)
    }

    pub fn streak(&self, file: &str) -> u32 {
        self.streaks.get(file).copied().unwrap_or(0)
    }

    /// Set `file`'s score, clamped to `[0, SCORE_MAX]`.
    pub fn set_score(&mut self, file: impl Into<FileId>, score: f64) {
        self.scores.insert(file.into(), clamp(score));
    }

    /// Raise `file` to at least `score` (never lowers).
    pub fn raise_score(&mut self, file: impl Into<FileId>, score: f64) {
        let file = file.into();
        let current = self.score(&file);
        self.scores.insert(file, clamp(current.max(score)));
    }

    /// Add `delta` to `file`'s score.
    pub fn add_score(&mut self, file: impl Into<FileId>, delta: f64) {
        let file = file.into();
        let current = self.score(&file);
        self.scores.insert(file, clamp(current + delta));
    }

    pub fn remove(&mut self, file: &str) {
        self.scores.remove(file);
        self.streaks.remove(file);
    }

    /// Files ordered by the cache-stability key: score descending, streak
    /// descending, then path — a reproducible total order.
    pub fn ranked_files(&self) -> Vec<FileId> {
        let mut files: Vec<FileId> = self.scores.keys().cloned().collect();
        files.sort_by(|a, b| {
            self.score(b)
                .total_cmp(&self.score(a))
                .then_with(|| self.streak(b).cmp(&self.streak(a)))
                .then_with(|| a.cmp(b))
        });
        files
    }
}

pub fn clamp(score: f64) -> f64 {
    score.clamp(0.0, SCORE_MAX)
}

// ── Persistence ───────────────────────────────────────────────────────────────

impl AttentionState {
    /// Load `attn_state.json`, falling back to an empty state when the file
    /// is missing, unreadable, corrupt, or carries an unknown version.  The
    /// router treats an empty state as a cold start; losing attention state
    /// is always recoverable.
    pub fn load_or_default(path: &std::path::Path, now: DateTime<Utc>) -> Self {
        Self::load_reporting(path, now, None)
    }

    /// Like [`Self::load_or_default`], additionally recording a
    /// `state_rebuilt` event when the on-disk state had to be discarded.
    pub fn load_reporting(
        path: &std::path::Path,
        now: DateTime<Utc>,
        events: Option<&crate::events::EventLog>,
    ) -> Self {
        let rebuilt_because = match crate::store::read_json::<AttentionState>(path) {
            Ok(Some(state)) if state.version == STATE_VERSION => return state,
            Ok(Some(state)) => {
                tracing::warn!(
                    path = %path.display(),
                    found = state.version,
                    expected = STATE_VERSION,
                    "attention state version mismatch — rebuilding empty"
                );
                Some(format!("version {} (expected {})", state.version, STATE_VERSION))
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "attention state unreadable — rebuilding empty"
                );
                Some(err.to_string())
            }
        };
        if let (Some(reason), Some(events)) = (rebuilt_because, events) {
            let record = crate::events::EventRecord::new(
                crate::events::EventKind::StateRebuilt,
                "attention_state",
                format!("discarded {}: {reason}", path.display()),
            );
            let _ = events.append(&record);
        }
        Self::new(now)
    }

    pub fn save(&self, path: &std::path::Path) -> Result<(), crate::store::StoreError> {
        crate::store::write_json_atomic(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AttentionState {
        AttentionState::new(Utc::now())
    }

    #[test]
    fn scores_clamp_on_every_write() {
        let mut s = state();
        s.set_score("a.rs", 7.0);
        assert_eq!(s.score("a.rs"), SCORE_MAX);
        s.add_score("a.rs", -100.0);
        assert_eq!(s.score("a.rs"), 0.0);
        s.raise_score("a.rs", 0.4);
        s.raise_score("a.rs", 0.2);
        assert_eq!(s.score("a.rs"), 0.4);
    }

    #[test]
    fn tier_thresholds() {
        assert_eq!(Tier::from_score(0.8, 0.8, 0.25), Tier::Hot);
        assert_eq!(Tier::from_score(0.79, 0.8, 0.25), Tier::Warm);
        assert_eq!(Tier::from_score(0.25, 0.8, 0.25), Tier::Warm);
        assert_eq!(Tier::from_score(0.24, 0.8, 0.25), Tier::Cold);
    }

    #[test]
    fn ranking_breaks_score_ties_by_streak_then_path() {
        let mut s = state();
        s.set_score("b.rs", 0.9);
        s.set_score("a.rs", 0.9);
        s.set_score("c.rs", 0.9);
        s.streaks.insert("c.rs".into(), 4);
        assert_eq!(s.ranked_files(), vec!["c.rs", "a.rs", "b.rs"]);
    }

    #[test]
    fn version_mismatch_rebuilds_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attn_state.json");
        let mut s = state();
        s.version = 99;
        s.set_score("a.rs", 0.5);
        crate::store::write_json_atomic(&path, &s).unwrap();

        let loaded = AttentionState::load_or_default(&path, Utc::now());
        assert_eq!(loaded.turn_count, 0);
        assert!(loaded.scores.is_empty());
    }

    #[test]
    fn save_then_load_commits_the_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attn_state.json");
        let mut s = state();
        s.turn_count = 3;
        s.set_score("a.rs", 0.5);
        s.save(&path).unwrap();

        let loaded = AttentionState::load_or_default(&path, Utc::now());
        assert_eq!(loaded.turn_count, 3);
        assert_eq!(loaded.score("a.rs"), 0.5);
    }

    #[test]
    fn serde_round_trip_preserves_state() {
        let mut s = state();
        s.turn_count = 17;
        s.set_score("src/main.rs", 0.5);
        s.streaks.insert("src/main.rs".into(), 2);
        let json = serde_json::to_string(&s).unwrap();
        let back: AttentionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.turn_count, 17);
        assert_eq!(back.score("src/main.rs"), 0.5);
        assert_eq!(back.streak("src/main.rs"), 2);
    }
}
