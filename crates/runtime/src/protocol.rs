//! The stdin/stdout hook protocol.
//!
//! One JSON object in, one JSON object out.  Unknown input fields are
//! ignored so host-side additions never break older hooks.

use serde::{Deserialize, Serialize};

use focal_state::{FileId, ToolCall};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HookEvent {
    SessionStart {
        session_id: String,
        project_path: String,
    },
    UserPromptSubmit {
        session_id: String,
        project_path: String,
        prompt: String,
        #[serde(default)]
        turn_id: Option<u64>,
    },
    Stop {
        session_id: String,
        project_path: String,
        #[serde(default)]
        turn_id: Option<u64>,
        #[serde(default)]
        files_used: Vec<FileId>,
        #[serde(default)]
        tool_calls: Vec<ToolCall>,
        #[serde(default)]
        token_estimate: Option<usize>,
        #[serde(default)]
        notes: Option<String>,
    },
}

impl HookEvent {
    pub fn project_path(&self) -> &str {
        match self {
            HookEvent::SessionStart { project_path, .. }
            | HookEvent::UserPromptSubmit { project_path, .. }
            | HookEvent::Stop { project_path, .. } => project_path,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HookOutput {
    /// Assembled context blob; empty means "nothing to add".
    pub context: String,
    /// Advisory strings from the plugin supervisor.
    pub events: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_event_parses_with_unknown_fields_ignored() {
        let raw = r#"{
            "event": "user_prompt_submit",
            "session_id": "s1",
            "project_path": "/work/demo",
            "prompt": "fix the lexer",
            "turn_id": 4,
            "host_extra": {"anything": true}
        }"#;
        let event: HookEvent = serde_json::from_str(raw).unwrap();
        match event {
            HookEvent::UserPromptSubmit { prompt, turn_id, .. } => {
                assert_eq!(prompt, "fix the lexer");
                assert_eq!(turn_id, Some(4));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn stop_event_defaults_optional_fields() {
        let raw = r#"{"event": "stop", "session_id": "s1", "project_path": "/work/demo"}"#;
        let event: HookEvent = serde_json::from_str(raw).unwrap();
        match event {
            HookEvent::Stop { files_used, tool_calls, token_estimate, .. } => {
                assert!(files_used.is_empty());
                assert!(tool_calls.is_empty());
                assert!(token_estimate.is_none());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_kind_is_an_error() {
        let raw = r#"{"event": "mystery", "session_id": "s1", "project_path": "/p"}"#;
        assert!(serde_json::from_str::<HookEvent>(raw).is_err());
    }

    #[test]
    fn output_serializes_context_and_events() {
        let out = HookOutput {
            context: "## src/a.rs".into(),
            events: vec!["strategy_change: loop".into()],
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["context"], "## src/a.rs");
        assert_eq!(json["events"][0], "strategy_change: loop");
    }
}
