//! Read-before-write monitor.
//!
//! Tracks which files the assistant has read this session; a write or edit
//! to a file never read is a violation.  Violations surface as one advisory
//! on the following prompt.  The read set resets per session.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use focal_state::{EventKind, FileId, TurnRecord};

use crate::{Plugin, PluginCtx};

pub const NAME: &str = "verify_first";

const READ_TOOLS: &[&str] = &["read", "grep", "glob", "cat", "search"];
const WRITE_TOOLS: &[&str] = &["write", "edit", "multiedit", "create", "append"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyFirstState {
    pub session_id: String,
    pub read_files: BTreeSet<FileId>,
    pub violations: u32,
}

#[derive(Debug, Default)]
pub struct VerifyFirst;

impl Plugin for VerifyFirst {
    fn name(&self) -> &'static str {
        NAME
    }

    fn on_session_start(&mut self, ctx: &PluginCtx) -> Result<()> {
        let state = VerifyFirstState {
            session_id: ctx.session_id.to_string(),
            ..Default::default()
        };
        ctx.save_state(NAME, &state)?;
        Ok(())
    }

    fn on_prompt_pre(&mut self, ctx: &PluginCtx, _prompt: &str) -> Result<Vec<String>> {
        let mut state: VerifyFirstState = ctx.load_state(NAME);
        if state.violations == 0 {
            return Ok(Vec::new());
        }
        let advisory = format!(
            "verify_first: {} write(s) to files that were never read this session — \
             read a file before editing it",
            state.violations
        );
        state.violations = 0;
        ctx.save_state(NAME, &state)?;
        ctx.log_event(EventKind::Advisory, NAME, &advisory);
        Ok(vec![advisory])
    }

    fn on_stop(&mut self, ctx: &PluginCtx, turn: &TurnRecord) -> Result<()> {
        if turn.tool_calls.is_empty() {
            return Ok(());
        }
        let mut state: VerifyFirstState = ctx.load_state(NAME);
        // A stale state file from a previous session starts fresh.
        if state.session_id != turn.session_id {
            state = VerifyFirstState {
                session_id: turn.session_id.clone(),
                ..Default::default()
            };
        }

        for call in &turn.tool_calls {
            let tool = call.tool.to_lowercase();
            let Some(target) = &call.target_path else {
                continue;
            };
            if READ_TOOLS.contains(&tool.as_str()) {
                state.read_files.insert(target.clone());
            } else if WRITE_TOOLS.contains(&tool.as_str())
                && !state.read_files.contains(target)
            {
                state.violations += 1;
                ctx.log_event(
                    EventKind::Violation,
                    NAME,
                    format!("write to {target} before any read"),
                );
                // The write still makes the file known; one violation per
                // unread file, not per keystroke.
                state.read_files.insert(target.clone());
            }
        }
        ctx.save_state(NAME, &state)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use chrono::Utc;
    use focal_state::ToolCall;

    fn turn(session: &str, calls: Vec<ToolCall>) -> TurnRecord {
        TurnRecord {
            turn_id: 1,
            timestamp: Utc::now(),
            project: "/work/demo".into(),
            session_id: session.into(),
            prompt_length: 0,
            prompt_text: None,
            files_injected: Vec::new(),
            files_used: Vec::new(),
            token_estimate: 0,
            tool_calls: calls,
            notes: None,
        }
    }

    fn call(tool: &str, path: &str) -> ToolCall {
        ToolCall { tool: tool.into(), target_path: Some(path.into()), op_hash: None }
    }

    #[test]
    fn write_after_read_is_clean() {
        let harness = Harness::new();
        let mut plugin = VerifyFirst;
        plugin
            .on_stop(
                &harness.ctx(),
                &turn("sess-1", vec![call("read", "src/a.rs"), call("edit", "src/a.rs")]),
            )
            .unwrap();
        assert!(plugin.on_prompt_pre(&harness.ctx(), "next").unwrap().is_empty());
    }

    #[test]
    fn blind_write_logs_a_violation_and_advises_once() {
        let harness = Harness::new();
        let mut plugin = VerifyFirst;
        plugin
            .on_stop(&harness.ctx(), &turn("sess-1", vec![call("edit", "src/a.rs")]))
            .unwrap();

        let advisories = plugin.on_prompt_pre(&harness.ctx(), "next").unwrap();
        assert_eq!(advisories.len(), 1);
        assert!(advisories[0].contains("1 write(s)"));
        // Consumed.
        assert!(plugin.on_prompt_pre(&harness.ctx(), "again").unwrap().is_empty());
        // Repeat writes to the now-known file are not re-flagged.
        plugin
            .on_stop(&harness.ctx(), &turn("sess-1", vec![call("edit", "src/a.rs")]))
            .unwrap();
        assert!(plugin.on_prompt_pre(&harness.ctx(), "more").unwrap().is_empty());
    }

    #[test]
    fn read_set_resets_on_new_session() {
        let harness = Harness::new();
        let mut plugin = VerifyFirst;
        plugin
            .on_stop(&harness.ctx(), &turn("sess-1", vec![call("read", "src/a.rs")]))
            .unwrap();
        // New session: the earlier read no longer counts.
        plugin
            .on_stop(&harness.ctx(), &turn("sess-2", vec![call("edit", "src/a.rs")]))
            .unwrap();
        let advisories = plugin.on_prompt_pre(&harness.ctx(), "next").unwrap();
        assert_eq!(advisories.len(), 1);
    }
}
