//! Loop detection over recent tool-call signatures.
//!
//! Keeps a ring of the last 12 `(tool, target_path, op_hash)` signatures.
//! When any three of them are pairwise similar (≥ 0.7) the assistant is
//! almost certainly circling — the same tool hammering the same file — so a
//! `strategy_change` advisory is queued for the next prompt and a violation
//! event is logged.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use focal_state::{EventKind, ToolCall, TurnRecord};

use crate::{Plugin, PluginCtx};

pub const NAME: &str = "loop_breaker";

const RING_CAPACITY: usize = 12;
const SIMILARITY_THRESHOLD: f64 = 0.7;
/// Tool equality is mandatory; beyond that the path dominates the score.
const PATH_WEIGHT: f64 = 0.7;
const OP_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub tool: String,
    pub target_path: Option<String>,
    pub op_hash: Option<String>,
}

impl From<&ToolCall> for Signature {
    fn from(call: &ToolCall) -> Self {
        Self {
            tool: call.tool.to_lowercase(),
            target_path: call.target_path.clone(),
            op_hash: call.op_hash.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopBreakerState {
    pub ring: Vec<Signature>,
    pub pending_advisory: bool,
}

#[derive(Debug, Default)]
pub struct LoopBreaker;

impl Plugin for LoopBreaker {
    fn name(&self) -> &'static str {
        NAME
    }

    fn on_prompt_pre(&mut self, ctx: &PluginCtx, _prompt: &str) -> Result<Vec<String>> {
        let mut state: LoopBreakerState = ctx.load_state(NAME);
        if !state.pending_advisory {
            return Ok(Vec::new());
        }
        state.pending_advisory = false;
        ctx.save_state(NAME, &state)?;
        let advisory = "strategy_change: the last few tool calls repeat the same operation \
                        on the same target — step back and try a different approach"
            .to_string();
        ctx.log_event(EventKind::Advisory, NAME, &advisory);
        Ok(vec![advisory])
    }

    fn on_stop(&mut self, ctx: &PluginCtx, turn: &TurnRecord) -> Result<()> {
        if turn.tool_calls.is_empty() {
            return Ok(());
        }
        let mut state: LoopBreakerState = ctx.load_state(NAME);
        for call in &turn.tool_calls {
            state.ring.push(Signature::from(call));
        }
        if state.ring.len() > RING_CAPACITY {
            let excess = state.ring.len() - RING_CAPACITY;
            state.ring.drain(..excess);
        }

        if !state.pending_advisory && has_similar_triple(&state.ring) {
            state.pending_advisory = true;
            ctx.log_event(
                EventKind::Violation,
                NAME,
                format!(
                    "loop detected: 3 of the last {} tool calls are near-identical",
                    state.ring.len()
                ),
            );
        }
        ctx.save_state(NAME, &state)?;
        Ok(())
    }
}

/// Any three signatures forming a pairwise-similar clique.
fn has_similar_triple(ring: &[Signature]) -> bool {
    for i in 0..ring.len() {
        for j in i + 1..ring.len() {
            if similarity(&ring[i], &ring[j]) < SIMILARITY_THRESHOLD {
                continue;
            }
            for k in j + 1..ring.len() {
                if similarity(&ring[i], &ring[k]) >= SIMILARITY_THRESHOLD
                    && similarity(&ring[j], &ring[k]) >= SIMILARITY_THRESHOLD
                {
                    return true;
                }
            }
        }
    }
    false
}

/// Similarity of two signatures in `[0, 1]`.
///
/// Different tools never look alike.  Path similarity is the number of
/// shared trailing components over the deeper path's depth, so `src/a.rs`
/// vs `other/src/a.rs` still counts as close.
pub fn similarity(a: &Signature, b: &Signature) -> f64 {
    if a.tool != b.tool {
        return 0.0;
    }
    let path_sim = match (&a.target_path, &b.target_path) {
        (Some(pa), Some(pb)) => path_suffix_similarity(pa, pb),
        (None, None) => 1.0,
        _ => 0.0,
    };
    let op_sim = match (&a.op_hash, &b.op_hash) {
        (Some(ha), Some(hb)) if ha == hb => 1.0,
        _ => 0.0,
    };
    PATH_WEIGHT * path_sim + OP_WEIGHT * op_sim
}

fn path_suffix_similarity(a: &str, b: &str) -> f64 {
    let ca: Vec<&str> = a.split('/').filter(|c| !c.is_empty()).collect();
    let cb: Vec<&str> = b.split('/').filter(|c| !c.is_empty()).collect();
    let max_depth = ca.len().max(cb.len());
    if max_depth == 0 {
        return 0.0;
    }
    let shared = ca
        .iter()
        .rev()
        .zip(cb.iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    shared as f64 / max_depth as f64
}
