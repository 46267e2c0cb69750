//! The typed event vocabulary C2 reads off the agent backend's stdout
//! (spec.md §2: "text, thinking, tool-use, tool-result, session-id, done,
//! error"). One JSON object per line.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Incremental text chunk. Never persisted on its own — the broker
    /// forwards it to the client for live rendering and reconciles against
    /// the terminal `Text` block once the turn completes (spec.md §4.1,
    /// §8 invariant 2).
    TextDelta {
        text: String,
    },
    /// Incremental thinking chunk; same contract as `TextDelta`.
    ThinkingDelta {
        text: String,
    },
    /// Terminal, consolidated block — what gets persisted as a
    /// `ConversationBlock`.
    Text {
        text: String,
    },
    Thinking {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    /// The agent backend owns tool execution; when a tool call needs human
    /// authorization it emits this instead of going straight to `tool_use`
    /// and then blocks (on this call only — the stdout stream keeps
    /// flowing for anything else it cares to emit meanwhile) until a
    /// matching line arrives on stdin (see
    /// [`crate::process::AgentProcess::send_permission_response`]).
    /// `request_id` is opaque and chosen by the backend; the broker (C4)
    /// correlates it to its own client-facing request id.
    PermissionRequest {
        request_id: String,
        tool_name: String,
        tool_input: serde_json::Value,
    },
    /// Assigned by the agent backend; persisted by the caller at first
    /// sight and on any change (spec.md §3 Session invariant).
    SessionId {
        agent_session_id: String,
    },
    Done,
    Error {
        message: String,
    },
}

impl AgentEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Done | AgentEvent::Error { .. })
    }
}
