//! Token burn-rate monitor.
//!
//! Reads the host assistant's usage cache (`<home>/usage.json`), keeps an
//! EWMA of tokens/min over the last fifteen minutes, and projects when the
//! remaining quota runs out.  Warns at thirty minutes remaining and again at
//! ten — each at most once per session.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use focal_state::EventKind;

use crate::{Plugin, PluginCtx};

pub const NAME: &str = "burn_rate";

const WINDOW_MINUTES: i64 = 15;
const EWMA_ALPHA: f64 = 0.2;
const WARN_MINUTES_FIRST: f64 = 30.0;
const WARN_MINUTES_FINAL: f64 = 10.0;

/// Shape of the host's usage cache.  Read leniently: missing fields default,
/// unknown fields are ignored, a malformed file is a no-op.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UsageCache {
    pub remaining_tokens: u64,
    pub window: Vec<UsageSample>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsageSample {
    pub ts: DateTime<Utc>,
    pub tokens: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BurnRateState {
    pub session_id: String,
    pub ewma_tokens_per_min: f64,
    pub warned_30: bool,
    pub warned_10: bool,
}

#[derive(Debug, Default)]
pub struct BurnRate;

impl Plugin for BurnRate {
    fn name(&self) -> &'static str {
        NAME
    }

    fn on_session_start(&mut self, ctx: &PluginCtx) -> Result<()> {
        let state = BurnRateState {
            session_id: ctx.session_id.to_string(),
            ..Default::default()
        };
        ctx.save_state(NAME, &state)?;
        Ok(())
    }

    fn on_prompt_pre(&mut self, ctx: &PluginCtx, _prompt: &str) -> Result<Vec<String>> {
        let Some(usage) = read_usage(ctx) else {
            return Ok(Vec::new());
        };

        let now = ctx.clock.now();
        let cutoff = now - Duration::minutes(WINDOW_MINUTES);
        let recent: Vec<&UsageSample> =
            usage.window.iter().filter(|s| s.ts >= cutoff && s.ts <= now).collect();
        if recent.is_empty() {
            return Ok(Vec::new());
        }

        let total: u64 = recent.iter().map(|s| s.tokens).sum();
        let oldest = recent.iter().map(|s| s.ts).min().unwrap_or(now);
        let span_minutes = ((now - oldest).num_seconds() as f64 / 60.0).max(1.0);
        let instantaneous = total as f64 / span_minutes;

        let mut state: BurnRateState = ctx.load_state(NAME);
        state.ewma_tokens_per_min = if state.ewma_tokens_per_min == 0.0 {
            instantaneous
        } else {
            EWMA_ALPHA * instantaneous + (1.0 - EWMA_ALPHA) * state.ewma_tokens_per_min
        };

        let mut advisories = Vec::new();
        if state.ewma_tokens_per_min > 0.0 {
            let minutes_left = usage.remaining_tokens as f64 / state.ewma_tokens_per_min;
            if minutes_left <= WARN_MINUTES_FINAL && !state.warned_10 {
                state.warned_10 = true;
                state.warned_30 = true;
                advisories.push(format!(
                    "burn_rate: ~{minutes_left:.0} min of quota left at {:.0} tokens/min — wrap up",
                    state.ewma_tokens_per_min
                ));
            } else if minutes_left <= WARN_MINUTES_FIRST && !state.warned_30 {
                state.warned_30 = true;
                advisories.push(format!(
                    "burn_rate: ~{minutes_left:.0} min of quota left at {:.0} tokens/min",
                    state.ewma_tokens_per_min
                ));
            }
        }

        for advisory in &advisories {
            ctx.log_event(EventKind::Advisory, NAME, advisory);
        }
        ctx.save_state(NAME, &state)?;
        Ok(advisories)
    }
}

fn read_usage(ctx: &PluginCtx) -> Option<UsageCache> {
    let path = ctx.paths.usage_cache();
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(&path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(usage) => Some(usage),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "usage cache unparsable — skipping");
                None
            }
        },
        Err(err) => {
            warn!(path = %path.display(), error = %err, "usage cache unreadable — skipping");
            None
        }
    }
}
