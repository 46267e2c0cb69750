//! Drives one agent turn directly over `rl_transport::AgentProcess`
//! (spec.md §4.5 execution step 6), mirroring the broker's per-turn event
//! loop (`rl_broker::Connection::drive_turn`) but with no interactive
//! client: permission requests are auto-resolved against the agent's own
//! `allowed_tools` list instead of round-tripping to a human.

use std::path::Path;
use std::sync::Arc;

use rl_domain::error::Result;
use rl_store::types::{BlockKind, ConversationBlock};
use rl_transport::{AgentBackendConfig, AgentEvent, AgentProcess};

/// Accumulated result of driving one turn to completion.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    pub output_text: String,
    pub thinking_text: String,
    pub blocks: Vec<ConversationBlock>,
    pub tool_count: u32,
    pub tool_names: Vec<String>,
    pub error: Option<String>,
}

/// Spawns the agent backend in `working_dir` with `prompt`. The returned
/// handle is kept by the caller so `cancel` (spec.md §4.5 "Cancel") can
/// interrupt an in-flight turn via [`AgentProcess::interrupt`].
pub async fn spawn_turn(
    config: &AgentBackendConfig,
    working_dir: &Path,
    prompt: &str,
) -> Result<Arc<AgentProcess>> {
    Ok(Arc::new(
        AgentProcess::spawn(config, working_dir, prompt, None).await?,
    ))
}

/// Runs the event loop to completion, auto-approving/denying permission
/// requests by `allowed_tools` (empty = allow every tool; non-empty =
/// allow only the named tools).
pub async fn drive_turn(process: &Arc<AgentProcess>, allowed_tools: &[String]) -> Result<TurnOutcome> {
    let mut outcome = TurnOutcome::default();
    let mut streamed_text = false;
    let mut streamed_thinking = false;
    let mut tool_use_names: Vec<(String, String)> = Vec::new();

    loop {
        let event = match process.next_event().await {
            Ok(Some(e)) => e,
            Ok(None) => break,
            Err(e) => {
                outcome.error = Some(e.to_string());
                break;
            }
        };

        match event {
            AgentEvent::TextDelta { text } => {
                streamed_text = true;
                outcome.output_text.push_str(&text);
            }
            AgentEvent::ThinkingDelta { text } => {
                streamed_thinking = true;
                outcome.thinking_text.push_str(&text);
            }
            AgentEvent::Text { text } => {
                if streamed_text {
                    // Already accumulated from deltas (same dedup rule
                    // as the broker's drive_turn).
                    continue;
                }
                outcome.output_text.push_str(&text);
            }
            AgentEvent::Thinking { text } => {
                if streamed_thinking {
                    continue;
                }
                outcome.thinking_text.push_str(&text);
            }
            AgentEvent::ToolUse { id, name, input } => {
                outcome.tool_count += 1;
                tool_use_names.push((id.clone(), name.clone()));
                outcome.tool_names.push(name.clone());
                outcome.blocks.push(ConversationBlock {
                    ordinal: 0,
                    kind: BlockKind::ToolUse,
                    text: None,
                    tool_use_id: Some(id),
                    tool_name: Some(name),
                    tool_input: Some(input),
                    is_error: None,
                });
            }
            AgentEvent::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let name = tool_use_names
                    .iter()
                    .find(|(id, _)| *id == tool_use_id)
                    .map(|(_, n)| n.clone())
                    .unwrap_or_default();
                outcome.blocks.push(ConversationBlock {
                    ordinal: 0,
                    kind: BlockKind::ToolResult,
                    text: None,
                    tool_use_id: Some(tool_use_id),
                    tool_name: Some(name),
                    tool_input: Some(content),
                    is_error: Some(is_error),
                });
            }
            AgentEvent::PermissionRequest {
                request_id,
                tool_name,
                tool_input,
            } => {
                let allowed = allowed_tools.is_empty() || allowed_tools.iter().any(|t| t == &tool_name);
                let _ = process
                    .send_permission_response(
                        &request_id,
                        allowed,
                        allowed.then(|| tool_input.clone()),
                        (!allowed)
                            .then(|| format!("tool '{tool_name}' is not in this agent's allowed_tools")),
                    )
                    .await;
            }
            AgentEvent::SessionId { .. } => {
                // No interactive client session to update here; the
                // orchestrator persists whatever it needs on the
                // SwarmAgent/Session rows it owns.
            }
            AgentEvent::Done => break,
            AgentEvent::Error { message } => {
                outcome.error = Some(message);
                break;
            }
        }
    }

    Ok(outcome)
}

/// Ordered blocks ready for `NewConversation.blocks`: thinking, then
/// text, then tool blocks in arrival order (same ordering rule as
/// `rl_broker::Connection::drive_turn`).
pub fn ordered_blocks(outcome: &TurnOutcome) -> Vec<ConversationBlock> {
    let mut blocks = Vec::new();
    if !outcome.thinking_text.is_empty() {
        blocks.push(ConversationBlock {
            ordinal: 0,
            kind: BlockKind::Thinking,
            text: Some(outcome.thinking_text.clone()),
            tool_use_id: None,
            tool_name: None,
            tool_input: None,
            is_error: None,
        });
    }
    if !outcome.output_text.is_empty() {
        blocks.push(ConversationBlock {
            ordinal: 0,
            kind: BlockKind::Text,
            text: Some(outcome.output_text.clone()),
            tool_use_id: None,
            tool_name: None,
            tool_input: None,
            is_error: None,
        });
    }
    blocks.extend(outcome.blocks.clone());
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_blocks_puts_thinking_before_text_before_tools() {
        let outcome = TurnOutcome {
            output_text: "the answer".into(),
            thinking_text: "reasoning".into(),
            blocks: vec![ConversationBlock {
                ordinal: 0,
                kind: BlockKind::ToolUse,
                text: None,
                tool_use_id: Some("t1".into()),
                tool_name: Some("search".into()),
                tool_input: None,
                is_error: None,
            }],
            tool_count: 1,
            tool_names: vec!["search".into()],
            error: None,
        };
        let blocks = ordered_blocks(&outcome);
        assert_eq!(blocks[0].kind, BlockKind::Thinking);
        assert_eq!(blocks[1].kind, BlockKind::Text);
        assert_eq!(blocks[2].kind, BlockKind::ToolUse);
    }

    #[test]
    fn ordered_blocks_omits_empty_text_and_thinking() {
        let outcome = TurnOutcome::default();
        assert!(ordered_blocks(&outcome).is_empty());
    }
}
