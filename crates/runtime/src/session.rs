//! One hook event, end to end.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use focal_config::{Clock, Paths, RouterConfig, SystemClock};
use focal_learner::Learner;
use focal_plugins::{PluginCtx, Supervisor};
use focal_predictor::PredictorModel;
use focal_router::Router;
use focal_state::{
    AttentionState, DirLock, EventKind, EventLog, EventRecord, FileId, PendingTurn, Tier,
    ToolCall, TurnLog, TurnRecord, read_json, write_json_atomic,
};

use crate::protocol::{HookEvent, HookOutput};

/// Files seeded into attention at session start.
const WARM_START_SEEDS: usize = 5;
/// Turn-log tail backing the learner's co-activation window and predictor
/// rebuilds.
const LEARNER_WINDOW: usize = 30;

pub struct Session {
    paths: Paths,
    config: RouterConfig,
    clock: Box<dyn Clock>,
}

impl Session {
    /// Resolve paths for `project_path` and load the keyword config plus
    /// per-project overrides.
    pub fn open(project_path: &Path) -> Result<Self> {
        let paths = Paths::resolve(project_path)
            .with_context(|| format!("resolving state paths for {}", project_path.display()))?;
        let config = RouterConfig::load(&paths.keywords_config(), &paths.router_overrides());
        Ok(Self::with_parts(paths, config))
    }

    /// Assemble a session from pre-resolved parts (tests, embedding).
    pub fn with_parts(paths: Paths, config: RouterConfig) -> Self {
        Self { paths, config, clock: Box::new(SystemClock) }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub async fn handle(&self, event: HookEvent) -> Result<HookOutput> {
        match event {
            HookEvent::SessionStart { session_id, .. } => self.session_start(&session_id),
            HookEvent::UserPromptSubmit { session_id, prompt, turn_id, .. } => {
                self.prompt_submit(&session_id, &prompt, turn_id)
            }
            HookEvent::Stop {
                session_id,
                turn_id,
                files_used,
                tool_calls,
                token_estimate,
                notes,
                ..
            } => {
                self.stop(&session_id, turn_id, files_used, tool_calls, token_estimate, notes)
                    .await
            }
        }
    }

    // ── session_start ─────────────────────────────────────────────────────────

    /// Warm-start the attention state from the learner's historically most
    /// useful files and give plugins their reset hook.
    fn session_start(&self, session_id: &str) -> Result<HookOutput> {
        let _lock = DirLock::acquire(&self.paths.project_dir)?;
        let now = self.clock.now();

        let recent = TurnLog::new(self.paths.turns_log())
            .load_recent(LEARNER_WINDOW)
            .unwrap_or_default();
        let learner = Learner::load_or_default(&self.paths.learned_state(), &recent);
        let mut state = AttentionState::load_or_default(&self.paths.attn_state(), now);

        let seeds = learner.warm_start_seeds(WARM_START_SEEDS);
        for seed in &seeds {
            state.raise_score(seed.clone(), self.config.thresholds.warm + 0.05);
        }
        state.last_update = now;
        if let Err(err) = state.save(&self.paths.attn_state()) {
            warn!(error = %err, "warm-start persist failed — continuing");
        }

        let events = EventLog::new(self.paths.events_log());
        let mut supervisor = Supervisor::from_config(&self.config.plugins);
        let ctx = PluginCtx::new(&self.paths, self.clock.as_ref(), session_id, &events);
        supervisor.session_start(&ctx);

        info!(
            session = session_id,
            seeds = seeds.len(),
            learner_turns = learner.turn_count(),
            "session opened"
        );
        Ok(HookOutput::default())
    }

    // ── user_prompt_submit ────────────────────────────────────────────────────

    /// The latency-critical path: plugin advisories, one routing pass, and
    /// the pending-turn handoff.  No learning happens here.
    fn prompt_submit(
        &self,
        session_id: &str,
        prompt: &str,
        turn_id: Option<u64>,
    ) -> Result<HookOutput> {
        let _lock = DirLock::acquire(&self.paths.project_dir)?;
        let now = self.clock.now();

        let recent = TurnLog::new(self.paths.turns_log())
            .load_recent(LEARNER_WINDOW)
            .unwrap_or_default();
        let learner = Learner::load_or_default(&self.paths.learned_state(), &recent);
        let predictor = PredictorModel::load_or_rebuild(&self.paths.predictor_model(), &recent);
        let events = EventLog::new(self.paths.events_log());
        let mut state = AttentionState::load_reporting(&self.paths.attn_state(), now, Some(&events));
        let mut supervisor = Supervisor::from_config(&self.config.plugins);
        let ctx = PluginCtx::new(&self.paths, self.clock.as_ref(), session_id, &events);
        let advisories = supervisor.prompt_pre(&ctx, prompt);

        let router = Router {
            config: &self.config,
            learner: &learner,
            predictor: &predictor,
            indexer: None,
            repo_map: None,
            project_root: &self.paths.project_root,
            clock: self.clock.as_ref(),
        };
        let state_path = self.paths.attn_state();
        let result = router.route(&mut state, prompt, Some(&state_path));
        supervisor.prompt_post(&ctx, prompt, &result);

        if result.stats.turn_deadline_exceeded
            || result.stats.coactivation_truncated
            || result.stats.predictor_deadline_exceeded
        {
            let _ = events.append(&EventRecord::new(
                EventKind::DeadlineExceeded,
                "router",
                serde_json::to_string(&result.stats).unwrap_or_default(),
            ));
        }

        let injected: Vec<FileId> = result
            .selection
            .iter()
            .filter(|s| s.tier != Tier::Cold)
            .map(|s| s.file.clone())
            .collect();
        let pending = PendingTurn {
            turn_id: turn_id.unwrap_or(state.turn_count),
            session_id: session_id.to_string(),
            prompt_text: prompt.trim().to_string(),
            files_injected: injected,
            started_at: now,
        };
        if let Err(err) = write_json_atomic(&self.paths.pending_turn(), &pending) {
            warn!(error = %err, "pending turn persist failed — stop event will degrade");
        }

        Ok(HookOutput { context: result.output, events: advisories })
    }

    // ── stop ──────────────────────────────────────────────────────────────────

    /// Post-turn: join the pending turn with the host's usage report, append
    /// the turn record, then run the learner and predictor updates on
    /// parallel blocking tasks.  Nothing here races the next prompt — the
    /// directory lock serializes cross-process access.
    async fn stop(
        &self,
        session_id: &str,
        turn_id: Option<u64>,
        files_used: Vec<FileId>,
        tool_calls: Vec<ToolCall>,
        token_estimate: Option<usize>,
        notes: Option<String>,
    ) -> Result<HookOutput> {
        let _lock = DirLock::acquire(&self.paths.project_dir)?;
        let now = self.clock.now();

        let pending: Option<PendingTurn> = match read_json(&self.paths.pending_turn()) {
            Ok(pending) => pending,
            Err(err) => {
                warn!(error = %err, "pending turn unreadable — recording a bare stop");
                None
            }
        };
        let turns_log = TurnLog::new(self.paths.turns_log());
        let recent = turns_log.load_recent(LEARNER_WINDOW).unwrap_or_default();

        let files_used = if files_used.is_empty() {
            // Hosts that do not report usage directly: derive it from the
            // tool calls.
            let mut derived: Vec<FileId> = tool_calls
                .iter()
                .filter_map(|c| c.target_path.clone())
                .collect();
            derived.sort();
            derived.dedup();
            derived
        } else {
            files_used
        };

        let prompt_text = pending.as_ref().map(|p| p.prompt_text.clone());
        // Fast heuristic, deliberately not a real tokenizer.
        let fallback_estimate = prompt_text.as_deref().map(|t| t.len() / 4).unwrap_or(0);
        let record = TurnRecord {
            turn_id: turn_id
                .or(pending.as_ref().map(|p| p.turn_id))
                .unwrap_or_else(|| recent.last().map(|r| r.turn_id + 1).unwrap_or(1)),
            timestamp: now,
            project: self.paths.project_root.display().to_string(),
            session_id: session_id.to_string(),
            prompt_length: prompt_text.as_deref().map(str::len).unwrap_or(0),
            prompt_text,
            files_injected: pending.map(|p| p.files_injected).unwrap_or_default(),
            files_used,
            token_estimate: token_estimate.unwrap_or(fallback_estimate),
            tool_calls,
            notes,
        };
        turns_log.append(&record).context("appending turn record")?;
        let _ = std::fs::remove_file(self.paths.pending_turn());

        // Learned and predictor state may live in a shared directory when
        // the project is a linked worktree.
        let _shared_lock = if self.paths.shared_dir != self.paths.project_dir {
            Some(DirLock::acquire(&self.paths.shared_dir)?)
        } else {
            None
        };

        let learned_path = self.paths.learned_state();
        let learner_record = record.clone();
        let learner_recent = recent.clone();
        let learner_task = tokio::task::spawn_blocking(move || {
            let mut learner = Learner::load_or_default(&learned_path, &learner_recent);
            learner.observe(&learner_record);
            learner.save(&learned_path)
        });

        let model_path = self.paths.predictor_model();
        let predictor_record = record.clone();
        let predictor_task = tokio::task::spawn_blocking(move || {
            let mut model = PredictorModel::load_or_rebuild(&model_path, &recent);
            model.update(&predictor_record);
            model.save(&model_path)
        });

        let (learner_out, predictor_out) = tokio::join!(learner_task, predictor_task);
        for (name, out) in [("learner", learner_out), ("predictor", predictor_out)] {
            match out {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(component = name, error = %err, "post-turn update failed"),
                Err(err) => warn!(component = name, error = %err, "post-turn task panicked"),
            }
        }

        let events = EventLog::new(self.paths.events_log());
        let mut supervisor = Supervisor::from_config(&self.config.plugins);
        let ctx = PluginCtx::new(&self.paths, self.clock.as_ref(), session_id, &events);
        supervisor.stop(&ctx, &record);

        Ok(HookOutput::default())
    }

    // ── status ────────────────────────────────────────────────────────────────

    /// Human-readable snapshot for the `status` subcommand.
    pub fn status(&self) -> Result<String> {
        let now = self.clock.now();
        let state = AttentionState::load_or_default(&self.paths.attn_state(), now);
        let recent = TurnLog::new(self.paths.turns_log())
            .load_recent(LEARNER_WINDOW)
            .unwrap_or_default();
        let learner = Learner::load_or_default(&self.paths.learned_state(), &recent);

        let mut out = String::new();
        out.push_str(&format!("project: {}\n", self.paths.project_root.display()));
        out.push_str(&format!("state dir: {}\n", self.paths.project_dir.display()));
        out.push_str(&format!(
            "turns: {} (learner: {} observed, {:?})\n",
            state.turn_count,
            learner.turn_count(),
            learner.maturity()
        ));
        out.push_str(&format!("tracked files: {}\n", state.scores.len()));
        for file in state.ranked_files().into_iter().take(8) {
            out.push_str(&format!(
                "  {:5.2}  streak {:>2}  {}\n",
                state.score(&file),
                state.streak(&file),
                file
            ));
        }
        Ok(out)
    }
}
