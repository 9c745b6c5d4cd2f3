//! Behavioral monitors riding alongside the router.
//!
//! A plugin is a capability interface: it declares the lifecycle hooks it
//! cares about by implementing them; everything defaults to a no-op.  The
//! supervisor dispatches hooks in registration order and isolates failures —
//! the first error a plugin returns disables it for the rest of the process,
//! logs a `plugin_error` event, and the remaining plugins keep running.
//!
//! Plugins own nothing but their private state file
//! (`plugins/<name>.json`), accessed through the typed handle on
//! [`PluginCtx`].

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{error, warn};

use focal_config::{Clock, Paths};
use focal_router::RoutingResult;
use focal_state::{EventKind, EventLog, EventRecord, TurnRecord};

pub mod burn_rate;
pub mod loop_breaker;
pub mod verify_first;

pub use burn_rate::BurnRate;
pub use loop_breaker::LoopBreaker;
pub use verify_first::VerifyFirst;

// ── Context ───────────────────────────────────────────────────────────────────

/// Read-only environment handed to every hook invocation.
pub struct PluginCtx<'a> {
    pub paths: &'a Paths,
    pub clock: &'a dyn Clock,
    pub session_id: &'a str,
    events: &'a EventLog,
}

impl<'a> PluginCtx<'a> {
    pub fn new(
        paths: &'a Paths,
        clock: &'a dyn Clock,
        session_id: &'a str,
        events: &'a EventLog,
    ) -> Self {
        Self { paths, clock, session_id, events }
    }

    pub fn log_event(&self, kind: EventKind, source: &str, message: impl Into<String>) {
        let record = EventRecord::new(kind, source, message);
        if let Err(err) = self.events.append(&record) {
            warn!(source, error = %err, "event append failed");
        }
    }

    /// Load the plugin's private state, defaulting on absence or corruption
    /// (a monitor must never take the turn down over its own bookkeeping).
    pub fn load_state<T: DeserializeOwned + Default>(&self, plugin: &str) -> T {
        let path = self.paths.plugin_state(plugin);
        match focal_state::read_json::<T>(&path) {
            Ok(Some(state)) => state,
            Ok(None) => T::default(),
            Err(err) => {
                warn!(plugin, error = %err, "plugin state unreadable — resetting");
                T::default()
            }
        }
    }

    pub fn save_state<T: Serialize>(&self, plugin: &str, state: &T) -> Result<()> {
        let path = self.paths.plugin_state(plugin);
        focal_state::write_json_atomic(&path, state)?;
        Ok(())
    }
}

// ── Plugin contract ───────────────────────────────────────────────────────────

#[allow(unused_variables)]
pub trait Plugin {
    fn name(&self) -> &'static str;

    fn on_session_start(&mut self, ctx: &PluginCtx) -> Result<()> {
        Ok(())
    }

    /// Returns advisory strings to inject into the host's context this turn.
    fn on_prompt_pre(&mut self, ctx: &PluginCtx, prompt: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn on_prompt_post(
        &mut self,
        ctx: &PluginCtx,
        prompt: &str,
        result: &RoutingResult,
    ) -> Result<()> {
        Ok(())
    }

    fn on_stop(&mut self, ctx: &PluginCtx, turn: &TurnRecord) -> Result<()> {
        Ok(())
    }
}

// ── Supervisor ────────────────────────────────────────────────────────────────

struct Slot {
    plugin: Box<dyn Plugin>,
    disabled: bool,
}

#[derive(Default)]
pub struct Supervisor {
    slots: Vec<Slot>,
}

impl Supervisor {
    /// Instantiate the built-in plugins named in `enabled`, preserving
    /// order.  Unknown names are warned about and skipped.
    pub fn from_config(enabled: &[String]) -> Self {
        let mut supervisor = Self::default();
        for name in enabled {
            let plugin: Box<dyn Plugin> = match name.as_str() {
                "loop_breaker" => Box::new(LoopBreaker::default()),
                "verify_first" => Box::new(VerifyFirst::default()),
                "burn_rate" => Box::new(BurnRate::default()),
                other => {
                    warn!(plugin = other, "unknown plugin name — skipping");
                    continue;
                }
            };
            supervisor.register(plugin);
        }
        supervisor
    }

    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        self.slots.push(Slot { plugin, disabled: false });
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.disabled).count()
    }

    pub fn session_start(&mut self, ctx: &PluginCtx) {
        for slot in &mut self.slots {
            if slot.disabled {
                continue;
            }
            if let Err(err) = slot.plugin.on_session_start(ctx) {
                disable(slot, ctx, "on_session_start", err);
            }
        }
    }

    /// Collect every active plugin's advisories for this turn.
    pub fn prompt_pre(&mut self, ctx: &PluginCtx, prompt: &str) -> Vec<String> {
        let mut advisories = Vec::new();
        for slot in &mut self.slots {
            if slot.disabled {
                continue;
            }
            match slot.plugin.on_prompt_pre(ctx, prompt) {
                Ok(mut out) => advisories.append(&mut out),
                Err(err) => disable(slot, ctx, "on_prompt_pre", err),
            }
        }
        advisories
    }

    pub fn prompt_post(&mut self, ctx: &PluginCtx, prompt: &str, result: &RoutingResult) {
        for slot in &mut self.slots {
            if slot.disabled {
                continue;
            }
            if let Err(err) = slot.plugin.on_prompt_post(ctx, prompt, result) {
                disable(slot, ctx, "on_prompt_post", err);
            }
        }
    }

    pub fn stop(&mut self, ctx: &PluginCtx, turn: &TurnRecord) {
        for slot in &mut self.slots {
            if slot.disabled {
                continue;
            }
            if let Err(err) = slot.plugin.on_stop(ctx, turn) {
                disable(slot, ctx, "on_stop", err);
            }
        }
    }
}

fn disable(slot: &mut Slot, ctx: &PluginCtx, hook: &str, err: anyhow::Error) {
    slot.disabled = true;
    let name = slot.plugin.name();
    error!(plugin = name, hook, error = %err, "plugin failed — disabled for process lifetime");
    ctx.log_event(
        EventKind::PluginError,
        name,
        format!("{hook} failed: {err:#}"),
    );
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use focal_config::{FixedClock, Paths};
    use std::path::PathBuf;

    pub struct Harness {
        pub paths: Paths,
        pub clock: FixedClock,
        pub events: EventLog,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let project_dir = dir.path().join("projects").join("abc");
            let paths = Paths {
                home: dir.path().to_path_buf(),
                project_root: PathBuf::from("/work/demo"),
                project_dir: project_dir.clone(),
                shared_dir: project_dir.clone(),
            };
            let events = EventLog::new(paths.events_log());
            Self {
                paths,
                clock: FixedClock(chrono::Utc::now()),
                events,
                _dir: dir,
            }
        }

        pub fn ctx(&self) -> PluginCtx<'_> {
            PluginCtx::new(&self.paths, &self.clock, "sess-1", &self.events)
        }
    }
}
