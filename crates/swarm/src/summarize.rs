//! Dependency-context composition (spec.md §4.5 step 5): "concatenate
//! sections for each `include != none` predecessor... for summary mode,
//! prefer the predecessor's stored `output_summary`; if absent and
//! output > SUMMARY_THRESHOLD characters, synthesize a 1-2 sentence
//! summary via an auxiliary model."

use std::sync::Arc;

use rl_domain::tool::Message;
use rl_providers::{ChatRequest, LlmProvider};
use rl_store::types::{DependsOn, IncludePolicy, SwarmAgent};

/// Builds the full dependency-context block handed to an agent's prompt.
pub async fn compose_dependency_context(
    depends_on: &[DependsOn],
    predecessors: &[SwarmAgent],
    provider: Option<&Arc<dyn LlmProvider>>,
    summary_threshold_chars: usize,
) -> String {
    let mut sections = Vec::new();
    for dep in depends_on {
        if dep.include == IncludePolicy::None {
            continue;
        }
        let Some(agent) = predecessors.iter().find(|a| a.id == dep.agent_id) else {
            continue;
        };
        let output = agent.output_text.clone().unwrap_or_default();
        if output.is_empty() {
            continue;
        }
        let body = match dep.include {
            IncludePolicy::Full => output,
            IncludePolicy::Summary => {
                summary_body(&output, agent.output_summary.as_deref(), provider, summary_threshold_chars).await
            }
            IncludePolicy::None => unreachable!("filtered above"),
        };
        sections.push(format!("## {}\n\n{}", agent.name, body));
    }
    sections.join("\n\n")
}

async fn summary_body(
    output: &str,
    stored_summary: Option<&str>,
    provider: Option<&Arc<dyn LlmProvider>>,
    summary_threshold_chars: usize,
) -> String {
    if let Some(summary) = stored_summary {
        return summary.to_string();
    }
    if output.chars().count() <= summary_threshold_chars {
        return output.to_string();
    }
    synthesize_summary(output, provider).await
}

/// Synthesizes a short summary of over-threshold output, for both the
/// dependency-context composer above and the orchestrator's own
/// `output_summary` persistence after an agent completes.
pub async fn synthesize_summary(text: &str, provider: Option<&Arc<dyn LlmProvider>>) -> String {
    let Some(provider) = provider else {
        return heuristic_summary(text);
    };
    let req = ChatRequest {
        messages: vec![
            Message::system("Summarize the following agent output in 1-2 plain sentences."),
            Message::user(text),
        ],
        ..Default::default()
    };
    match provider.chat(req).await {
        Ok(resp) if !resp.content.trim().is_empty() => resp.content.trim().to_string(),
        _ => heuristic_summary(text),
    }
}

fn heuristic_summary(text: &str) -> String {
    let first_sentence = text
        .split(['.', '\n'])
        .find(|s| !s.trim().is_empty())
        .unwrap_or(text)
        .trim();
    let truncated: String = first_sentence.chars().take(240).collect();
    if first_sentence.chars().count() > 240 {
        format!("{truncated}…")
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rl_store::types::{AgentMode, AgentStatus, AutonomousFields};

    fn agent(id: &str, name: &str, output: Option<&str>, summary: Option<&str>) -> SwarmAgent {
        SwarmAgent {
            id: id.to_string(),
            swarm_id: "swarm-1".into(),
            name: name.to_string(),
            role: None,
            is_synthesis_agent: false,
            mode: AgentMode::Assigned,
            prompt: None,
            personality: None,
            plugins: vec![],
            allowed_tools: vec![],
            thinking_budget: None,
            model: None,
            sandbox_mode: false,
            depends_on: vec![],
            status: AgentStatus::Completed,
            output_text: output.map(|s| s.to_string()),
            output_summary: summary.map(|s| s.to_string()),
            error_message: None,
            tool_count: 0,
            started_at: None,
            completed_at: None,
            session_id: None,
            autonomous: AutonomousFields::default(),
        }
    }

    fn dep(agent_id: &str, include: IncludePolicy) -> DependsOn {
        DependsOn {
            agent_id: agent_id.to_string(),
            include,
            condition: None,
        }
    }

    #[tokio::test]
    async fn none_policy_is_skipped() {
        let preds = vec![agent("a1", "writer", Some("hello"), None)];
        let deps = vec![dep("a1", IncludePolicy::None)];
        let ctx = compose_dependency_context(&deps, &preds, None, 800).await;
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn full_policy_includes_everything() {
        let preds = vec![agent("a1", "writer", Some("the full text"), None)];
        let deps = vec![dep("a1", IncludePolicy::Full)];
        let ctx = compose_dependency_context(&deps, &preds, None, 800).await;
        assert!(ctx.contains("the full text"));
        assert!(ctx.contains("writer"));
    }

    #[tokio::test]
    async fn summary_policy_prefers_stored_summary() {
        let preds = vec![agent("a1", "writer", Some("long..."), Some("short summary"))];
        let deps = vec![dep("a1", IncludePolicy::Summary)];
        let ctx = compose_dependency_context(&deps, &preds, None, 800).await;
        assert!(ctx.contains("short summary"));
        assert!(!ctx.contains("long..."));
    }

    #[tokio::test]
    async fn summary_policy_below_threshold_uses_full_text() {
        let preds = vec![agent("a1", "writer", Some("short"), None)];
        let deps = vec![dep("a1", IncludePolicy::Summary)];
        let ctx = compose_dependency_context(&deps, &preds, None, 800).await;
        assert!(ctx.contains("short"));
    }

    #[tokio::test]
    async fn summary_policy_above_threshold_falls_back_to_heuristic() {
        let long_output = "a".repeat(900);
        let preds = vec![agent("a1", "writer", Some(&long_output), None)];
        let deps = vec![dep("a1", IncludePolicy::Summary)];
        let ctx = compose_dependency_context(&deps, &preds, None, 800).await;
        assert!(ctx.chars().count() < long_output.chars().count());
    }
}
