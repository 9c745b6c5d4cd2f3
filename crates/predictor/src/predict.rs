//! The synchronous `predict` query the router calls in Phase 7.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use focal_state::FileId;
use focal_state::text::salient_tokens;

use crate::model::{PredictorModel, basename};

/// Evidence strength behind a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Explicit file mention, sharp keyword, or strong Markov transition.
    Confident,
    /// Recency/co-occurrence/popularity blend; confidence capped.
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub file: FileId,
    pub confidence: f64,
    pub mode: Mode,
}

/// A prompt basename mention is near-certain evidence.
const MENTION_CONFIDENCE: f64 = 0.9;
/// A sharply-discriminating keyword pointing at exactly one file.
const KEYWORD_CONFIDENCE: f64 = 0.7;
/// Keyword sharpness gate.
const KEYWORD_IDF_THRESHOLD: f64 = 3.0;
/// Minimum Markov transition probability that counts as evidence.
const MARKOV_THRESHOLD: f64 = 0.3;
/// Fallback predictions never exceed this confidence.
const FALLBACK_CAP: f64 = 0.4;
/// Recency half-life-ish constant, in turns.
const RECENCY_TAU: f64 = 5.0;
/// Fallback bonus for a file whose rhythm says it is due again.
const DUE_BONUS: f64 = 0.1;

impl PredictorModel {
    /// Rank files the next turn is likely to need.
    ///
    /// Confident mode wins whenever any confident evidence exists; otherwise
    /// every known file is scored by the fallback blend.  `due_now` holds
    /// files whose revisit rhythm has elapsed (computed by the caller from
    /// the learner's rhythm table).
    pub fn predict(
        &self,
        prompt: &str,
        last_hot: &[FileId],
        due_now: &BTreeSet<FileId>,
        limit: usize,
    ) -> Vec<Prediction> {
        let confident = self.confident_candidates(prompt, last_hot);
        if !confident.is_empty() {
            return rank(confident, Mode::Confident, limit);
        }
        rank(self.fallback_scores(last_hot, due_now), Mode::Fallback, limit)
    }

    fn confident_candidates(&self, prompt: &str, last_hot: &[FileId]) -> BTreeMap<FileId, f64> {
        let prompt_lower = prompt.to_lowercase();
        let mut candidates: BTreeMap<FileId, f64> = BTreeMap::new();
        let mut consider = |file: &FileId, confidence: f64| {
            let slot = candidates.entry(file.clone()).or_insert(0.0);
            *slot = slot.max(confidence);
        };

        // (a) The prompt names a file outright.
        for file in self.known_files() {
            if let Some(name) = basename(file) {
                if prompt_lower.contains(&name) {
                    consider(file, MENTION_CONFIDENCE);
                }
            }
        }

        // (b) A sharp keyword that has only ever pulled in one file.
        for token in salient_tokens(&prompt_lower) {
            if self.idf(&token) < KEYWORD_IDF_THRESHOLD {
                continue;
            }
            if let Some(files) = self.token_index.get(&token) {
                if files.len() == 1 {
                    let file = files.iter().next().cloned().unwrap_or_default();
                    consider(&file, KEYWORD_CONFIDENCE);
                }
            }
        }

        // (c) A strong transition out of the previous hot set.
        for from in last_hot {
            if let Some(row) = self.transitions.get(from) {
                for to in row.keys() {
                    let p = self.transition_probability(from, to);
                    if p > MARKOV_THRESHOLD {
                        consider(to, p);
                    }
                }
            }
        }

        candidates
    }

    fn fallback_scores(
        &self,
        last_hot: &[FileId],
        due_now: &BTreeSet<FileId>,
    ) -> BTreeMap<FileId, f64> {
        let max_popularity = self.popularity.values().copied().max().unwrap_or(0) as f64;
        let mut scores = BTreeMap::new();

        for file in self.popularity.keys() {
            let recency = match self.last_used.get(file) {
                Some(last) => {
                    let gap = self.turn_count.saturating_sub(*last) as f64;
                    (-gap / RECENCY_TAU).exp()
                }
                None => 0.0,
            };
            let cooccurrence = last_hot
                .iter()
                .map(|from| self.transition_probability(from, file))
                .fold(0.0f64, f64::max);
            let popularity = if max_popularity > 0.0 {
                self.popularity.get(file).copied().unwrap_or(0) as f64 / max_popularity
            } else {
                0.0
            };

            let mut score = 0.5 * recency + 0.3 * cooccurrence + 0.2 * popularity;
            if due_now.contains(file) {
                score += DUE_BONUS;
            }
            scores.insert(file.clone(), score.min(FALLBACK_CAP));
        }
        scores
    }
}

fn rank(candidates: BTreeMap<FileId, f64>, mode: Mode, limit: usize) -> Vec<Prediction> {
    let mut ranked: Vec<Prediction> = candidates
        .into_iter()
        .filter(|(_, confidence)| *confidence > 0.0)
        .map(|(file, confidence)| Prediction { file, confidence, mode })
        .collect();
    ranked.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.file.cmp(&b.file))
    });
    ranked.truncate(limit);
    ranked
}
