//! The 8-phase routing pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use focal_config::{Clock, RouterConfig};
use focal_learner::{Learner, Maturity};
use focal_predictor::PredictorModel;
use focal_state::text::{salient_tokens, token_set};
use focal_state::{AttentionState, FileId, SCORE_EPSILON, Tier};

use crate::assemble::{Selected, assemble};
use crate::sources::{Indexer, RepoMap};

/// Phase 3 multiplier on `idf × strength`.
const LEARNED_BOOST: f64 = 0.35;
/// Phase 4 bonus factors by BFS depth.
const COACT_DEPTH1: f64 = 0.35;
const COACT_DEPTH2: f64 = 0.15;
/// Phase 7: additive factor per prediction, and how many predictions count.
const PREWARM_FACTOR: f64 = 0.20;
const PREWARM_LIMIT: usize = 5;
/// Phase 2: indexer hits below this normalized relevance are noise.
const INDEXER_FLOOR: f64 = 0.5;
const INDEXER_LIMIT: usize = 5;

/// Per-turn counters and deadline annotations, serialized into the turn log
/// notes when something went sideways.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouteStats {
    pub turn: u64,
    pub decayed: usize,
    pub purged: usize,
    pub keyword_hits: usize,
    pub indexer_hits: usize,
    pub learned_boosts: usize,
    pub coactivation_visits: usize,
    pub coactivation_truncated: bool,
    pub predictions_applied: usize,
    pub predictor_deadline_exceeded: bool,
    pub turn_deadline_exceeded: bool,
    pub persist_failed: bool,
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
    pub missing: usize,
    pub output_chars: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug)]
pub struct RoutingResult {
    pub directly_activated: BTreeSet<FileId>,
    /// Emission-ordered selection (tier order, then the composite sort key).
    pub selection: Vec<Selected>,
    pub output: String,
    pub stats: RouteStats,
}

/// One turn's routing engine.  Borrows read snapshots of the learner and
/// predictor models for the duration of the turn; exclusively owns the
/// mutation of [`AttentionState`].
pub struct Router<'a> {
    pub config: &'a RouterConfig,
    pub learner: &'a Learner,
    pub predictor: &'a PredictorModel,
    pub indexer: Option<&'a dyn Indexer>,
    pub repo_map: Option<&'a dyn RepoMap>,
    pub project_root: &'a Path,
    pub clock: &'a dyn Clock,
}

impl Router<'_> {
    /// Run all eight phases, assemble the context blob, and persist the
    /// state to `state_path` (persist failure is non-fatal: the output is
    /// still returned and the next turn loads the previous committed state).
    pub fn route(
        &self,
        state: &mut AttentionState,
        prompt: &str,
        state_path: Option<&Path>,
    ) -> RoutingResult {
        let started = Instant::now();
        let mut stats = RouteStats::default();

        // Hot set of the *previous* turn, read before any mutation.
        let last_hot: Vec<FileId> = state
            .streaks
            .iter()
            .filter(|(_, streak)| **streak > 0)
            .map(|(file, _)| file.clone())
            .collect();

        state.turn_count += 1;
        state.last_update = self.clock.now();
        stats.turn = state.turn_count;

        self.phase_decay(state, &mut stats);
        let directly_activated = self.phase_keywords(state, prompt, &mut stats);
        self.phase_learned_boost(state, prompt, &mut stats);
        self.phase_coactivation(state, &directly_activated, &mut stats);
        self.phase_pinned_floor(state);
        self.phase_demoted_penalty(state);
        self.phase_prewarm(state, prompt, &last_hot, &mut stats);
        let selection = self.phase_finalize(state, &mut stats);

        let (output, assemble_stats) = assemble(
            &selection,
            self.project_root,
            self.repo_map,
            self.config.caps.max_context_chars,
            self.config.caps.per_file_chars,
        );
        for file in &assemble_stats.missing {
            state.set_score(file.clone(), 0.0);
        }
        stats.missing = assemble_stats.missing.len();
        stats.output_chars = assemble_stats.output_chars;

        if let Some(path) = state_path {
            if let Err(err) = state.save(path) {
                warn!(path = %path.display(), error = %err, "persisting attention state failed — continuing");
                stats.persist_failed = true;
            }
        }

        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        if stats.elapsed_ms > self.config.deadlines.turn_ms {
            stats.turn_deadline_exceeded = true;
        }
        debug!(
            turn = stats.turn,
            hot = stats.hot,
            warm = stats.warm,
            cold = stats.cold,
            chars = stats.output_chars,
            elapsed_ms = stats.elapsed_ms,
            "route complete"
        );

        RoutingResult { directly_activated, selection, output, stats }
    }

    // ── Phase 1: decay ────────────────────────────────────────────────────────

    /// Multiply every score by its category decay rate and prune what faded
    /// out.  Files gone from disk are zeroed this turn (logged) and removed
    /// the next — one full turn of pending purge.
    fn phase_decay(&self, state: &mut AttentionState, stats: &mut RouteStats) {
        let files: Vec<FileId> = state.scores.keys().cloned().collect();
        for file in files {
            let score = state.score(&file);
            if !self.project_root.join(&file).exists() {
                if score <= 0.0 {
                    state.remove(&file);
                    stats.purged += 1;
                } else {
                    warn!(file = %file, "scored file missing on disk — zeroing");
                    state.set_score(file, 0.0);
                }
                continue;
            }
            let decayed = score * self.config.decay_for(&file);
            if decayed < SCORE_EPSILON {
                state.remove(&file);
                stats.purged += 1;
            } else {
                state.set_score(file, decayed);
                stats.decayed += 1;
            }
        }
    }

    // ── Phase 2: keyword activation ───────────────────────────────────────────

    /// Keyword patterns match whole prompt tokens; patterns containing
    /// non-alphanumerics (file names like `lexer.rs`) match as substrings.
    /// Indexer hits supplement the keyword table when an index is wired in.
    fn phase_keywords(
        &self,
        state: &mut AttentionState,
        prompt: &str,
        stats: &mut RouteStats,
    ) -> BTreeSet<FileId> {
        let tokens = token_set(prompt);
        let prompt_lower = prompt.to_lowercase();
        let mut directly = BTreeSet::new();

        for entry in &self.config.keywords {
            let word_pattern = entry.pattern.chars().all(|c| c.is_alphanumeric());
            let hit = if word_pattern {
                tokens.contains(&entry.pattern)
            } else {
                prompt_lower.contains(&entry.pattern)
            };
            if !hit {
                continue;
            }
            stats.keyword_hits += 1;
            for target in &entry.targets {
                state.raise_score(target.clone(), 1.0 * entry.weight);
                directly.insert(target.clone());
            }
        }

        if let Some(indexer) = self.indexer {
            let mut hits = indexer.query(prompt);
            hits.sort_by(|(fa, sa), (fb, sb)| sb.total_cmp(sa).then_with(|| fa.cmp(fb)));
            let best = hits.first().map(|(_, s)| *s).unwrap_or(0.0);
            if best > 0.0 {
                for (file, score) in hits.into_iter().take(INDEXER_LIMIT) {
                    let normalized = (score / best).min(1.0);
                    if normalized < INDEXER_FLOOR {
                        break;
                    }
                    stats.indexer_hits += 1;
                    state.raise_score(file.clone(), normalized);
                    directly.insert(file);
                }
            }
        }

        directly
    }

    // ── Phase 3: learned boost ────────────────────────────────────────────────

    fn phase_learned_boost(
        &self,
        state: &mut AttentionState,
        prompt: &str,
        stats: &mut RouteStats,
    ) {
        if self.learner.maturity() != Maturity::Active {
            return;
        }
        for token in salient_tokens(prompt) {
            let idf = self.learner.idf(&token);
            for (file, strength) in self.learner.query(&token) {
                state.add_score(file, LEARNED_BOOST * idf * strength);
                stats.learned_boosts += 1;
            }
        }
    }

    // ── Phase 4: co-activation spread ─────────────────────────────────────────

    /// Bounded BFS to depth 2 from the directly-activated set.  A file
    /// reachable at both depths takes the larger bonus once.  Bonuses onto
    /// directly-activated files cannot push them past 1.0 (they are already
    /// activated; the spread exists to pull in neighbors).
    fn phase_coactivation(
        &self,
        state: &mut AttentionState,
        directly: &BTreeSet<FileId>,
        stats: &mut RouteStats,
    ) {
        let deadline =
            Instant::now() + Duration::from_millis(self.config.deadlines.coactivation_ms);
        let graph = self.learner.coactivations();
        let mut best_bonus: BTreeMap<FileId, f64> = BTreeMap::new();
        let mut frontier: BTreeSet<FileId> = BTreeSet::new();

        'depth1: for seed in directly {
            for (neighbor, weight) in graph.neighbors(seed) {
                let bonus = COACT_DEPTH1 * weight;
                let slot = best_bonus.entry(neighbor.clone()).or_insert(0.0);
                *slot = slot.max(bonus);
                frontier.insert(neighbor.clone());
                if Instant::now() >= deadline {
                    stats.coactivation_truncated = true;
                    break 'depth1;
                }
            }
        }

        if !stats.coactivation_truncated {
            'depth2: for node in &frontier {
                for (neighbor, weight) in graph.neighbors(node) {
                    let bonus = COACT_DEPTH2 * weight;
                    let slot = best_bonus.entry(neighbor.clone()).or_insert(0.0);
                    *slot = slot.max(bonus);
                    if Instant::now() >= deadline {
                        stats.coactivation_truncated = true;
                        break 'depth2;
                    }
                }
            }
        }

        for (file, bonus) in best_bonus {
            stats.coactivation_visits += 1;
            if directly.contains(&file) {
                let pre = state.score(&file);
                let capped = (pre + bonus).min(pre.max(1.0));
                state.set_score(file, capped);
            } else {
                state.add_score(file, bonus);
            }
        }
    }

    // ── Phase 5 & 6: pinned floor, demoted penalty ────────────────────────────

    fn phase_pinned_floor(&self, state: &mut AttentionState) {
        for file in &self.config.pinned {
            state.raise_score(file.clone(), self.config.thresholds.warm + 0.01);
        }
    }

    fn phase_demoted_penalty(&self, state: &mut AttentionState) {
        for file in &self.config.demoted {
            if self.config.is_pinned(file) {
                continue;
            }
            let score = state.score(file);
            if score > 0.0 {
                state.set_score(file.clone(), score * 0.5);
            }
        }
    }

    // ── Phase 7: predictive pre-warm ──────────────────────────────────────────

    fn phase_prewarm(
        &self,
        state: &mut AttentionState,
        prompt: &str,
        last_hot: &[FileId],
        stats: &mut RouteStats,
    ) {
        let due: BTreeSet<FileId> = self
            .learner
            .rhythms()
            .iter()
            .filter(|(_, rhythm)| rhythm.is_due(state.turn_count))
            .map(|(file, _)| file.clone())
            .collect();

        let started = Instant::now();
        let predictions = self.predictor.predict(prompt, last_hot, &due, PREWARM_LIMIT);
        if started.elapsed() > Duration::from_millis(self.config.deadlines.predictor_ms) {
            stats.predictor_deadline_exceeded = true;
        }

        for prediction in predictions {
            state.add_score(prediction.file, PREWARM_FACTOR * prediction.confidence);
            stats.predictions_applied += 1;
        }
    }

    // ── Phase 8: cache-stability sort, tier caps, streaks ─────────────────────

    fn phase_finalize(&self, state: &mut AttentionState, stats: &mut RouteStats) -> Vec<Selected> {
        let hot_threshold = self.config.thresholds.hot;
        let warm_threshold = self.config.thresholds.warm;
        let mut selection = Vec::with_capacity(state.scores.len());
        let mut hot_count = 0usize;
        let mut warm_count = 0usize;

        for file in state.ranked_files() {
            let score = state.score(&file);
            let mut tier = Tier::from_score(score, hot_threshold, warm_threshold);
            if tier == Tier::Hot && hot_count >= self.config.caps.max_hot {
                tier = Tier::Warm;
            }
            if tier == Tier::Warm
                && warm_count >= self.config.caps.max_warm
                && !self.config.is_pinned(&file)
            {
                tier = Tier::Cold;
            }
            match tier {
                Tier::Hot => hot_count += 1,
                Tier::Warm => warm_count += 1,
                Tier::Cold => {}
            }
            selection.push(Selected { file, tier, score });
        }

        for selected in &selection {
            match selected.tier {
                Tier::Hot => {
                    *state.streaks.entry(selected.file.clone()).or_insert(0) += 1;
                }
                _ => {
                    state.streaks.remove(&selected.file);
                }
            }
        }
        let live: BTreeSet<FileId> = state.scores.keys().cloned().collect();
        state.streaks.retain(|file, _| live.contains(file));

        stats.hot = hot_count;
        stats.warm = warm_count;
        stats.cold = selection.len() - hot_count - warm_count;
        selection
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::fs;

    use focal_config::{Category, FixedClock, KeywordEntry};
    use focal_state::{SCORE_MAX, TurnRecord};

    struct Fixture {
        project: tempfile::TempDir,
        config: RouterConfig,
        learner: Learner,
        predictor: PredictorModel,
        clock: FixedClock,
    }

    impl Fixture {
        fn new(files: &[(&str, &str)]) -> Self {
            let project = tempfile::tempdir().unwrap();
            for (name, content) in files {
                let path = project.path().join(name);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, content).unwrap();
            }
            Self {
                project,
                config: RouterConfig::default(),
                learner: Learner::default(),
                predictor: PredictorModel::new(),
                clock: FixedClock(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()),
            }
        }

        fn keyword(&mut self, pattern: &str, target: &str, category: Category) {
            self.config.keywords.push(KeywordEntry {
                pattern: pattern.to_lowercase(),
                targets: vec![target.to_string()],
                category,
                weight: 1.0,
            });
        }

        fn router(&self) -> Router<'_> {
            Router {
                config: &self.config,
                learner: &self.learner,
                predictor: &self.predictor,
                indexer: None,
                repo_map: None,
                project_root: self.project.path(),
                clock: &self.clock,
            }
        }
    }

    fn fresh_state() -> AttentionState {
        AttentionState::new(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap())
    }

    fn learner_turn(id: u64, prompt: &str, used: &[&str]) -> TurnRecord {
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
    fn cold_start_filename_keyword_goes_hot_with_full_content() {
        let mut fx = Fixture::new(&[("src/lexer.rs", "pub fn lex() {}\n")]);
        fx.keyword("lexer.rs", "src/lexer.rs", Category::Code);
        let mut state = fresh_state();

        let result = fx.router().route(&mut state, "fix the parser bug in lexer.rs", None);

        assert!(result.directly_activated.contains("src/lexer.rs"));
        assert_eq!(state.turn_count, 1);
        let lexer = result
            .selection
            .iter()
            .find(|s| s.file == "src/lexer.rs")
            .expect("lexer selected");
        assert_eq!(lexer.tier, Tier::Hot);
        assert!(result.output.contains("pub fn lex() {}"));
        assert_eq!(state.streak("src/lexer.rs"), 1);
    }

    #[test]
    fn observing_learner_contributes_nothing() {
        let mut fx = Fixture::new(&[("src/parser.rs", "fn parse() {}\n")]);
        fx.keyword("parser", "src/parser.rs", Category::Code);
        // Ten observed turns: still well under maturity.
        for id in 1..=10 {
            fx.learner.observe(&learner_turn(id, "parser grammar", &["src/parser.rs"]));
        }
        assert_eq!(fx.learner.maturity(), Maturity::Observing);

        let mut state = fresh_state();
        let result = fx.router().route(&mut state, "parser grammar question", None);
        assert_eq!(result.stats.learned_boosts, 0);
        // Keyword activation is the only score source: exactly 1.0.
        assert_eq!(state.score("src/parser.rs"), 1.0);
    }

    #[test]
    fn active_learner_boosts_associated_files() {
        let fx = {
            let mut fx = Fixture::new(&[
                ("src/parser.rs", "fn parse() {}\n"),
                ("src/ast.rs", "pub struct Ast;\n"),
            ]);
            for id in 1..=30 {
                fx.learner.observe(&learner_turn(id, "grammar tweaks", &["src/ast.rs"]));
            }
            fx
        };
        assert_eq!(fx.learner.maturity(), Maturity::Active);

        let mut state = fresh_state();
        let result = fx.router().route(&mut state, "more grammar tweaks", None);
        assert!(result.stats.learned_boosts > 0);
        assert!(state.score("src/ast.rs") > 0.0);
    }

    #[test]
    fn pinned_file_never_goes_cold() {
        let mut fx = Fixture::new(&[("CONTRACT.md", "# contract\n")]);
        fx.config.pinned.push("CONTRACT.md".into());
        let mut state = fresh_state();

        // No keyword matches this prompt at all.
        let result = fx.router().route(&mut state, "something entirely unrelated", None);
        let pinned = result
            .selection
            .iter()
            .find(|s| s.file == "CONTRACT.md")
            .expect("pinned file always selected");
        assert_ne!(pinned.tier, Tier::Cold);
        assert!(state.score("CONTRACT.md") >= fx.config.thresholds.warm);
    }

    #[test]
    fn demoted_penalty_halves_score() {
        let mut fx = Fixture::new(&[("src/noisy.rs", "fn noise() {}\n")]);
        fx.keyword("noisy", "src/noisy.rs", Category::Code);
        fx.config.demoted.push("src/noisy.rs".into());
        let mut state = fresh_state();

        fx.router().route(&mut state, "the noisy module", None);
        // Keyword set it to 1.0, demotion halves it.
        assert_eq!(state.score("src/noisy.rs"), 0.5);
    }

    #[test]
    fn scores_stay_in_bounds_even_with_heavy_weights() {
        let mut fx = Fixture::new(&[("src/a.rs", "fn a() {}\n")]);
        fx.config.keywords.push(KeywordEntry {
            pattern: "alpha".into(),
            targets: vec!["src/a.rs".into()],
            category: Category::Code,
            weight: 50.0,
        });
        let mut state = fresh_state();
        state.set_score("src/a.rs", 1.1);

        fx.router().route(&mut state, "alpha alpha alpha", None);
        for score in state.scores.values() {
            assert!(*score >= 0.0 && *score <= SCORE_MAX);
        }
    }

    #[test]
    fn tier_caps_demote_overflow_and_list_evicted() {
        let mut files: Vec<(String, String)> = Vec::new();
        for i in 0..40 {
            files.push((format!("src/f{i:02}.rs"), format!("fn f{i}() {{}}\n")));
        }
        let refs: Vec<(&str, &str)> = files.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        let mut fx = Fixture::new(&refs);
        // Pin four files; prompt matches nothing.
        for i in 0..4 {
            fx.config.pinned.push(format!("src/f{i:02}.rs"));
        }
        let mut state = fresh_state();
        // Everything starts saturated: still hot-eligible after one decay.
        for i in 0..40 {
            state.set_score(format!("src/f{i:02}.rs"), 1.2);
        }

        let result = fx.router().route(&mut state, "completely unrelated prompt", None);
        assert_eq!(result.stats.hot, fx.config.caps.max_hot);
        // Pinned files are exempt from warm eviction, so warm may exceed the
        // cap by at most the pinned count.
        assert!(result.stats.warm <= fx.config.caps.max_warm + 4);
        assert!(result.output.len() <= fx.config.caps.max_context_chars);
        assert!(result.output.contains("evicted:"));
        for selected in &result.selection {
            if fx.config.is_pinned(&selected.file) {
                assert_ne!(selected.tier, Tier::Cold, "{} was evicted", selected.file);
            }
        }
    }

    #[test]
    fn missing_file_is_zeroed_then_purged_next_turn() {
        let fx = Fixture::new(&[]);
        let mut state = fresh_state();
        state.set_score("src/ghost.rs", 0.9);

        fx.router().route(&mut state, "anything", None);
        assert_eq!(state.score("src/ghost.rs"), 0.0);
        assert!(state.scores.contains_key("src/ghost.rs"), "pending purge for one turn");

        fx.router().route(&mut state, "anything", None);
        assert!(!state.scores.contains_key("src/ghost.rs"));
    }

    #[test]
    fn repeated_route_is_deterministic_modulo_decay() {
        let mut fx = Fixture::new(&[
            ("src/a.rs", "fn a() {}\n"),
            ("src/b.rs", "fn b() {}\n"),
        ]);
        fx.keyword("alpha", "src/a.rs", Category::Code);
        fx.keyword("beta", "src/b.rs", Category::Code);

        let mut s1 = fresh_state();
        let mut s2 = fresh_state();
        let r1 = fx.router().route(&mut s1, "alpha and beta together", None);
        let r2 = fx.router().route(&mut s2, "alpha and beta together", None);
        assert_eq!(r1.output, r2.output);
        assert_eq!(s1.scores, s2.scores);

        // Second turn with the same prompt: keyword raise is idempotent at
        // the ceiling, so scores return to exactly 1.0 after decay.
        let r3 = fx.router().route(&mut s1, "alpha and beta together", None);
        assert_eq!(s1.score("src/a.rs"), 1.0);
        assert_eq!(r3.selection[0].tier, r1.selection[0].tier);
    }

    #[test]
    fn decay_uses_keyword_category_rates() {
        let mut fx = Fixture::new(&[
            ("src/code.rs", "fn c() {}\n"),
            ("notes.md", "# notes\n"),
        ]);
        fx.keyword("code", "src/code.rs", Category::Code);
        fx.keyword("notes", "notes.md", Category::Markdown);
        let mut state = fresh_state();
        state.set_score("src/code.rs", 1.0);
        state.set_score("notes.md", 1.0);

        fx.router().route(&mut state, "unrelated", None);
        assert!((state.score("src/code.rs") - 0.85).abs() < 1e-9);
        assert!((state.score("notes.md") - 0.75).abs() < 1e-9);
    }

    #[test]
    fn prewarm_is_additive_and_capped_per_prediction() {
        let mut fx = Fixture::new(&[("src/next.rs", "fn n() {}\n")]);
        // Train the predictor so "next.rs" is a confident mention.
        for id in 1..=3 {
            fx.predictor.update(&learner_turn(id, "work", &["src/next.rs"]));
        }
        let mut state = fresh_state();
        fx.router().route(&mut state, "please open next.rs", None);
        // Mention confidence 0.9 → bonus 0.18: pre-warm alone cannot reach
        // the hot threshold.
        let score = state.score("src/next.rs");
        assert!(score > 0.0 && score < fx.config.thresholds.hot);
    }

    #[test]
    fn coactivation_spreads_to_neighbors_of_activated_files() {
        let mut fx = Fixture::new(&[
            ("src/auth.rs", "fn auth() {}\n"),
            ("src/session.rs", "fn session() {}\n"),
        ]);
        fx.keyword("auth", "src/auth.rs", Category::Code);
        for id in 1..=10 {
            fx.learner
                .observe(&learner_turn(id, "auth work", &["src/auth.rs", "src/session.rs"]));
        }
        let edge = fx.learner.coactivations().weight("src/auth.rs", "src/session.rs");
        assert!(edge > 0.0);

        let mut state = fresh_state();
        let result = fx.router().route(&mut state, "auth problem", None);
        assert!(result.stats.coactivation_visits > 0);
        let expected = COACT_DEPTH1 * edge;
        assert!((state.score("src/session.rs") - expected).abs() < 1e-6);
    }

    #[test]
    fn route_persists_state_atomically_when_given_a_path() {
        let mut fx = Fixture::new(&[("src/a.rs", "fn a() {}\n")]);
        fx.keyword("alpha", "src/a.rs", Category::Code);
        let state_dir = tempfile::tempdir().unwrap();
        let state_path = state_dir.path().join("attn_state.json");

        let mut state = fresh_state();
        let result = fx.router().route(&mut state, "alpha", Some(&state_path));
        assert!(!result.stats.persist_failed);

        let reloaded = AttentionState::load_or_default(&state_path, Utc::now());
        assert_eq!(reloaded.turn_count, 1);
        assert_eq!(reloaded.score("src/a.rs"), 1.0);
    }
}
