//! The learner proper: association strengths, IDF, and the post-turn
//! `observe` cycle.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use focal_state::text::salient_tokens;
use focal_state::{FileId, TurnRecord, read_json, write_json_atomic};

use crate::coactivation::{CoactivationGraph, JACCARD_THRESHOLD, edge_key, jaccard};
use crate::rhythm::Rhythm;

pub const LEARNED_VERSION: u32 = 1;

/// Turns observed before the learner's answers carry any weight.
pub const MATURITY_TURNS: u64 = 25;

const ASSOC_DECAY: f64 = 0.995;
const ASSOC_PRUNE: f64 = 0.005;

/// Co-activation Jaccard windows span this many recent turns.
const WINDOW_TURNS: usize = 30;

/// Penalty for a file that was injected into context but never used.
const UNUSED_PENALTY: f64 = -0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Maturity {
    /// Recording only; `query` returns nothing.
    Observing,
    Active,
}

/// On-disk form of `learned_state.json`.
#[derive(Debug, Serialize, Deserialize)]
struct LearnedDoc {
    version: u32,
    associations: Vec<(String, FileId, f64)>,
    coactivations: CoactivationGraph,
    rhythms: BTreeMap<FileId, Rhythm>,
    idf: BTreeMap<String, u64>,
    turn_count: u64,
}

#[derive(Debug, Default)]
pub struct Learner {
    turn_count: u64,
    /// token → file → strength.
    associations: BTreeMap<String, BTreeMap<FileId, f64>>,
    /// token → number of turns it appeared in.
    document_frequency: BTreeMap<String, u64>,
    coactivations: CoactivationGraph,
    rhythms: BTreeMap<FileId, Rhythm>,
    /// Recent (turn_id, files_used) pairs backing the Jaccard windows.
    /// Rebuilt from the turn log at load time, not persisted separately.
    window: Vec<(u64, BTreeSet<FileId>)>,
}

impl Learner {
    // ── Construction & persistence ────────────────────────────────────────────

    /// Load `learned_state.json`; a missing, corrupt, or version-mismatched
    /// file yields an empty learner.  `recent_turns` (the tail of the turn
    /// log) rebuilds the co-activation window.
    pub fn load_or_default(path: &Path, recent_turns: &[TurnRecord]) -> Self {
        let mut learner = match read_json::<LearnedDoc>(path) {
            Ok(Some(doc)) if doc.version == LEARNED_VERSION => Self::from_doc(doc),
            Ok(Some(doc)) => {
                warn!(
                    path = %path.display(),
                    found = doc.version,
                    expected = LEARNED_VERSION,
                    "learned state version mismatch — starting empty"
                );
                Self::default()
            }
            Ok(None) => Self::default(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "learned state unreadable — starting empty");
                Self::default()
            }
        };
        learner.window = recent_turns
            .iter()
            .rev()
            .take(WINDOW_TURNS)
            .rev()
            .map(|t| (t.turn_id, t.files_used.iter().cloned().collect()))
            .collect();
        learner
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let doc = LearnedDoc {
            version: LEARNED_VERSION,
            associations: self
                .associations
                .iter()
                .flat_map(|(token, files)| {
                    files.iter().map(move |(file, strength)| {
                        (token.clone(), file.clone(), *strength)
                    })
                })
                .collect(),
            coactivations: self.coactivations.clone(),
            rhythms: self.rhythms.clone(),
            idf: self.document_frequency.clone(),
            turn_count: self.turn_count,
        };
        write_json_atomic(path, &doc)?;
        Ok(())
    }

    fn from_doc(doc: LearnedDoc) -> Self {
        let mut associations: BTreeMap<String, BTreeMap<FileId, f64>> = BTreeMap::new();
        for (token, file, strength) in doc.associations {
            associations.entry(token).or_default().insert(file, strength);
        }
        Self {
            turn_count: doc.turn_count,
            associations,
            document_frequency: doc.idf,
            coactivations: doc.coactivations,
            rhythms: doc.rhythms,
            window: Vec::new(),
        }
    }

    // ── Read surface (used by the router) ─────────────────────────────────────

    pub fn turn_count(&self) -> u64 {
        self.turn_count
    }

    pub fn maturity(&self) -> Maturity {
        if self.turn_count >= MATURITY_TURNS {
            Maturity::Active
        } else {
            Maturity::Observing
        }
    }

    /// `log((1 + N) / (1 + df)) + 1` over the learner's own turn corpus.
    pub fn idf(&self, token: &str) -> f64 {
        let df = self.document_frequency.get(token).copied().unwrap_or(0);
        (((1 + self.turn_count) as f64) / ((1 + df) as f64)).ln() + 1.0
    }

    /// Files associated with `token` and their strengths.  Empty while
    /// observing — recording happens regardless, influence is gated.
    pub fn query(&self, token: &str) -> Vec<(FileId, f64)> {
        if self.maturity() == Maturity::Observing {
            return Vec::new();
        }
        self.associations
            .get(token)
            .map(|files| files.iter().map(|(f, s)| (f.clone(), *s)).collect())
            .unwrap_or_default()
    }

    pub fn coactivations(&self) -> &CoactivationGraph {
        &self.coactivations
    }

    pub fn rhythms(&self) -> &BTreeMap<FileId, Rhythm> {
        &self.rhythms
    }

    /// The `k` files with the highest aggregate association strength —
    /// the session warm-start set.  Strengths decay every cycle, so the
    /// aggregate is recency-weighted usefulness.
    pub fn warm_start_seeds(&self, k: usize) -> Vec<FileId> {
        let mut totals: BTreeMap<&FileId, f64> = BTreeMap::new();
        for files in self.associations.values() {
            for (file, strength) in files {
                *totals.entry(file).or_insert(0.0) += strength;
            }
        }
        let mut ranked: Vec<(&FileId, f64)> = totals.into_iter().collect();
        ranked.sort_by(|(fa, sa), (fb, sb)| sb.total_cmp(sa).then_with(|| fa.cmp(fb)));
        ranked.into_iter().take(k).map(|(f, _)| f.clone()).collect()
    }

    // ── The learn cycle ───────────────────────────────────────────────────────

    /// Fold one completed turn into every model.  Runs post-turn, never on
    /// the routing path.
    pub fn observe(&mut self, turn: &TurnRecord) {
        self.turn_count += 1;

        let prompt = turn.prompt_text.as_deref().unwrap_or("");
        let tokens = salient_tokens(prompt);
        for token in &tokens {
            *self.document_frequency.entry(token.clone()).or_insert(0) += 1;
        }

        let injected: BTreeSet<&FileId> = turn.files_injected.iter().collect();
        let used: BTreeSet<&FileId> = turn.files_used.iter().collect();

        self.update_associations(&tokens, &injected, &used);
        self.update_coactivations(turn.turn_id, &used);
        for file in &used {
            self.rhythms
                .entry((*file).clone())
                .and_modify(|r| r.activate(turn.turn_id))
                .or_insert_with(|| Rhythm::first_activation(turn.turn_id));
        }

        debug!(
            turn = turn.turn_id,
            tokens = tokens.len(),
            used = used.len(),
            edges = self.coactivations.edge_count(),
            "learn cycle complete"
        );
    }

    fn update_associations(
        &mut self,
        tokens: &BTreeSet<String>,
        injected: &BTreeSet<&FileId>,
        used: &BTreeSet<&FileId>,
    ) {
        // usefulness: used files score 1.0 whether or not we injected them
        // (finding a file we missed is as strong a signal as confirming one
        // we picked); injected-but-unused costs a small penalty.
        let mut deltas: Vec<(&FileId, f64)> = Vec::new();
        for file in used {
            deltas.push((*file, 1.0));
        }
        for file in injected {
            if !used.contains(*file) {
                deltas.push((*file, UNUSED_PENALTY));
            }
        }

        for token in tokens {
            let idf = self.idf(token);
            for (file, usefulness) in &deltas {
                let slot = self.associations.entry(token.clone()).or_default();
                let current = slot.get(*file).copied().unwrap_or(0.0);
                let next = (current + usefulness * idf).max(0.0);
                if next > 0.0 {
                    slot.insert((*file).clone(), next);
                }
            }
        }

        // Global decay, then prune what has faded out.
        self.associations.retain(|_, files| {
            files.retain(|_, strength| {
                *strength *= ASSOC_DECAY;
                *strength >= ASSOC_PRUNE
            });
            !files.is_empty()
        });
    }

    fn update_coactivations(&mut self, turn_id: u64, used: &BTreeSet<&FileId>) {
        self.window.push((turn_id, used.iter().map(|f| (*f).clone()).collect()));
        if self.window.len() > WINDOW_TURNS {
            let excess = self.window.len() - WINDOW_TURNS;
            self.window.drain(..excess);
        }

        let files: Vec<&FileId> = used.iter().copied().collect();
        let mut touched = BTreeSet::new();
        for (i, a) in files.iter().enumerate() {
            for b in files.iter().skip(i + 1) {
                let wa = self.window_activations(a);
                let wb = self.window_activations(b);
                if jaccard(&wa, &wb) >= JACCARD_THRESHOLD {
                    self.coactivations.reinforce(a, b);
                    touched.insert(edge_key(a, b));
                }
            }
        }
        self.coactivations.decay_untouched(&touched);
    }

    fn window_activations(&self, file: &str) -> BTreeSet<u64> {
        self.window
            .iter()
            .filter(|(_, used)| used.contains(file))
            .map(|(turn, _)| *turn)
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turn(id: u64, prompt: &str, injected: &[&str], used: &[&str]) -> TurnRecord {
        TurnRecord {
            turn_id: id,
            timestamp: Utc::now(),
            project: "/work/demo".into(),
            session_id: "sess".into(),
            prompt_length: prompt.len(),
            prompt_text: Some(prompt.to_string()),
            files_injected: injected.iter().map(|s| s.to_string()).collect(),
            files_used: used.iter().map(|s| s.to_string()).collect(),
            token_estimate: prompt.len() / 4,
            tool_calls: Vec::new(),
            notes: None,
        }
    }

    #[test]
    fn observing_mode_records_but_answers_nothing() {
        let mut learner = Learner::default();
        for id in 1..=10 {
            learner.observe(&turn(id, "parser tokens", &[], &["src/parser.rs"]));
        }
        assert_eq!(learner.maturity(), Maturity::Observing);
        assert!(learner.query("parser").is_empty());
        // The recording still happened: crossing maturity exposes it.
        for id in 11..=25 {
            learner.observe(&turn(id, "parser tokens", &[], &["src/parser.rs"]));
        }
        assert_eq!(learner.maturity(), Maturity::Active);
        let hits = learner.query("parser");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "src/parser.rs");
        assert!(hits[0].1 > 0.0);
    }

    #[test]
    fn unused_injection_erodes_strength() {
        let mut learner = Learner::default();
        learner.observe(&turn(1, "widget layout", &[], &["src/widget.rs"]));
        let before = learner.associations["widget"]["src/widget.rs"];
        // Injected five more times, never used.
        for id in 2..=6 {
            learner.observe(&turn(id, "widget layout", &["src/widget.rs"], &[]));
        }
        let after = learner
            .associations
            .get("widget")
            .and_then(|f| f.get("src/widget.rs"))
            .copied()
            .unwrap_or(0.0);
        assert!(after < before, "penalty should erode strength: {after} !< {before}");
    }

    #[test]
    fn associations_decay_and_prune_without_reinforcement() {
        let mut learner = Learner::default();
        learner.observe(&turn(1, "flaky cache", &[], &["src/cache.rs"]));
        assert!(learner.associations.contains_key("flaky"));
        // Hundreds of unrelated turns: 0.995^n decay must eventually prune.
        for id in 2..=1500 {
            learner.observe(&turn(id, "other things entirely", &[], &["src/other.rs"]));
        }
        assert!(!learner.associations.contains_key("flaky"));
    }

    #[test]
    fn files_used_together_grow_an_edge() {
        let mut learner = Learner::default();
        for id in 1..=8 {
            learner.observe(&turn(id, "auth flow", &[], &["src/auth.rs", "src/session.rs"]));
        }
        assert!(
            learner.coactivations().weight("src/auth.rs", "src/session.rs") >= 0.5,
            "eight perfect co-uses should accumulate reinforcement"
        );
    }

    #[test]
    fn idf_discounts_ubiquitous_tokens() {
        let mut learner = Learner::default();
        for id in 1..=20 {
            let prompt = if id % 2 == 0 { "common parser" } else { "common other" };
            learner.observe(&turn(id, prompt, &[], &["src/lib.rs"]));
        }
        assert!(learner.idf("common") < learner.idf("parser"));
        assert!(learner.idf("never_seen") > learner.idf("parser"));
    }

    #[test]
    fn warm_start_ranks_by_aggregate_strength() {
        let mut learner = Learner::default();
        for id in 1..=6 {
            learner.observe(&turn(id, "router scoring", &[], &["src/router.rs"]));
        }
        learner.observe(&turn(7, "sidetrack", &[], &["src/minor.rs"]));
        let seeds = learner.warm_start_seeds(1);
        assert_eq!(seeds, vec!["src/router.rs".to_string()]);
    }

    #[test]
    fn save_then_load_round_trips() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("learned_state.json");
        let mut learner = Learner::default();
        for id in 1..=30 {
            learner.observe(&turn(id, "parser grammar", &[], &["src/parser.rs", "src/ast.rs"]));
        }
        learner.save(&path)?;

        let loaded = Learner::load_or_default(&path, &[]);
        assert_eq!(loaded.turn_count(), 30);
        assert_eq!(loaded.maturity(), Maturity::Active);
        assert!(!loaded.query("grammar").is_empty());
        assert_eq!(
            loaded.coactivations().weight("src/parser.rs", "src/ast.rs"),
            learner.coactivations().weight("src/parser.rs", "src/ast.rs"),
        );
        assert_eq!(loaded.rhythms().len(), 2);
        Ok(())
    }

    #[test]
    fn version_mismatch_starts_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("learned_state.json");
        let raw = serde_json::json!({
            "version": 99,
            "associations": [],
            "coactivations": [],
            "rhythms": {},
            "idf": {},
            "turn_count": 400
        });
        std::fs::write(&path, serde_json::to_string(&raw)?)?;
        let learner = Learner::load_or_default(&path, &[]);
        assert_eq!(learner.turn_count(), 0);
        Ok(())
    }
}
