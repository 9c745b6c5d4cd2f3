//! The persisted predictor model and its incremental post-turn update.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use focal_state::text::salient_tokens;
use focal_state::{FileId, TurnRecord, read_json, write_json_atomic};

pub const MODEL_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictorModel {
    pub version: u32,
    pub turn_count: u64,
    /// file → times its basename appeared literally in a prompt.
    pub mentions: BTreeMap<FileId, u64>,
    /// prompt token → files used in turns where the token appeared.
    pub token_index: BTreeMap<String, BTreeSet<FileId>>,
    /// token → number of turns it appeared in (for keyword strength).
    pub document_frequency: BTreeMap<String, u64>,
    /// Markov transition counts: file active on turn N → file used on N+1.
    pub transitions: BTreeMap<FileId, BTreeMap<FileId, u64>>,
    /// file → total turns used.
    pub popularity: BTreeMap<FileId, u64>,
    /// file → last turn it was used.
    pub last_used: BTreeMap<FileId, u64>,
    /// Files active on the most recent observed turn; the source side of the
    /// next transition update.
    pub prev_active: Vec<FileId>,
}

impl PredictorModel {
    pub fn new() -> Self {
        Self { version: MODEL_VERSION, ..Self::default() }
    }

    /// Load the model; a corrupt or version-mismatched file is discarded
    /// with a warning and rebuilt by replaying `turns` (the turn log).
    pub fn load_or_rebuild(path: &Path, turns: &[TurnRecord]) -> Self {
        match read_json::<PredictorModel>(path) {
            Ok(Some(model)) if model.version == MODEL_VERSION => model,
            Ok(Some(model)) => {
                warn!(
                    path = %path.display(),
                    found = model.version,
                    expected = MODEL_VERSION,
                    turns = turns.len(),
                    "predictor model version mismatch — rebuilding from turn log"
                );
                Self::rebuild(turns)
            }
            Ok(None) => Self::rebuild(turns),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    turns = turns.len(),
                    "predictor model unreadable — rebuilding from turn log"
                );
                Self::rebuild(turns)
            }
        }
    }

    fn rebuild(turns: &[TurnRecord]) -> Self {
        let mut model = Self::new();
        for turn in turns {
            model.update(turn);
        }
        model
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        write_json_atomic(path, self)?;
        Ok(())
    }

    /// Fold one completed turn into the model.  Runs post-turn.
    pub fn update(&mut self, turn: &TurnRecord) {
        self.turn_count += 1;
        let prompt = turn.prompt_text.as_deref().unwrap_or("").to_lowercase();
        let tokens = salient_tokens(&prompt);

        for token in &tokens {
            *self.document_frequency.entry(token.clone()).or_insert(0) += 1;
        }

        // Mentions: any file we have ever seen whose basename occurs
        // literally in the prompt.
        if !prompt.is_empty() {
            let known: BTreeSet<FileId> = self
                .popularity
                .keys()
                .chain(turn.files_used.iter())
                .cloned()
                .collect();
            for file in known {
                if let Some(name) = basename(&file) {
                    if prompt.contains(&name) {
                        *self.mentions.entry(file).or_insert(0) += 1;
                    }
                }
            }
        }

        for token in &tokens {
            let slot = self.token_index.entry(token.clone()).or_default();
            for file in &turn.files_used {
                slot.insert(file.clone());
            }
        }

        for from in &self.prev_active.clone() {
            for to in &turn.files_used {
                *self
                    .transitions
                    .entry(from.clone())
                    .or_default()
                    .entry(to.clone())
                    .or_insert(0) += 1;
            }
        }

        for file in &turn.files_used {
            *self.popularity.entry(file.clone()).or_insert(0) += 1;
            self.last_used.insert(file.clone(), turn.turn_id);
        }

        self.prev_active = turn.files_used.clone();
    }

    /// Same corpus-relative IDF the learner uses, over the predictor's own
    /// document frequencies.
    pub fn idf(&self, token: &str) -> f64 {
        let df = self.document_frequency.get(token).copied().unwrap_or(0);
        (((1 + self.turn_count) as f64) / ((1 + df) as f64)).ln() + 1.0
    }

    /// P(to | from) from the transition counts; 0.0 when `from` was never a
    /// source.
    pub fn transition_probability(&self, from: &str, to: &str) -> f64 {
        let Some(row) = self.transitions.get(from) else {
            return 0.0;
        };
        let total: u64 = row.values().sum();
        if total == 0 {
            return 0.0;
        }
        row.get(to).copied().unwrap_or(0) as f64 / total as f64
    }

    pub fn known_files(&self) -> BTreeSet<&FileId> {
        self.popularity.keys().chain(self.mentions.keys()).collect()
    }
}

/// Lowercased final path component.
pub fn basename(file: &str) -> Option<String> {
    file.rsplit('/').next().map(|n| n.to_lowercase()).filter(|n| !n.is_empty())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;

    pub(crate) fn turn(id: u64, prompt: &str, used: &[&str]) -> TurnRecord {
        TurnRecord {
            turn_id: id,
            timestamp: Utc::now(),
            project: "/work/demo".into(),
            session_id: "sess".into(),
            prompt_length: prompt.len(),
            prompt_text: Some(prompt.to_string()),
            files_injected: Vec::new(),
            files_used: used.iter().map(|s| s.to_string()).collect(),
            token_estimate: prompt.len() / 4,
            tool_calls: Vec::new(),
            notes: None,
        }
    }

    #[test]
    fn transitions_accumulate_across_consecutive_turns() {
        let mut model = PredictorModel::new();
        for id in (1..=9).step_by(2) {
            model.update(&turn(id, "edit the parser", &["src/parser.rs"]));
            model.update(&turn(id + 1, "now the tests", &["tests/parser.rs"]));
        }
        let p = model.transition_probability("src/parser.rs", "tests/parser.rs");
        assert!(p > 0.9, "parser → tests transition should dominate, got {p}");
    }

    #[test]
    fn mentions_count_basename_occurrences() {
        let mut model = PredictorModel::new();
        model.update(&turn(1, "look at src stuff", &["src/lexer.rs"]));
        model.update(&turn(2, "fix the bug in lexer.rs please", &[]));
        assert_eq!(model.mentions.get("src/lexer.rs"), Some(&1));
    }

    #[test]
    fn rebuild_from_turn_log_on_version_mismatch() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("predictor_model.json");
        let stale = PredictorModel { version: 99, ..Default::default() };
        write_json_atomic(&path, &stale)?;

        let turns = vec![
            turn(1, "auth flow", &["src/auth.rs"]),
            turn(2, "auth session", &["src/auth.rs", "src/session.rs"]),
        ];
        let model = PredictorModel::load_or_rebuild(&path, &turns);
        assert_eq!(model.version, MODEL_VERSION);
        assert_eq!(model.turn_count, 2);
        assert_eq!(model.popularity.get("src/auth.rs"), Some(&2));
        Ok(())
    }

    #[test]
    fn save_then_load_round_trips() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("predictor_model.json");
        let mut model = PredictorModel::new();
        model.update(&turn(1, "cache eviction", &["src/cache.rs"]));
        model.save(&path)?;
        let loaded = PredictorModel::load_or_rebuild(&path, &[]);
        assert_eq!(loaded.turn_count, 1);
        assert_eq!(loaded.popularity.get("src/cache.rs"), Some(&1));
        Ok(())
    }
}
