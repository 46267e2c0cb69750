//! Autonomous (task-claiming) agent mode (spec.md §4.5 "Autonomous
//! mode (task-claiming)").

use std::path::Path;
use std::time::{Duration, Instant};

use rl_domain::error::Result;
use rl_queue::{PatchTaskRequest, WorkQueue};
use rl_store::types::{SwarmAgent, Task, TaskStatus};
use rl_transport::AgentBackendConfig;

use crate::runner::{drive_turn, spawn_turn};

pub struct AutonomousRunConfig {
    pub poll_interval: Duration,
    pub default_idle_timeout: Duration,
    pub default_max_tasks: u32,
}

/// `true` once either termination condition in spec.md §4.5 fires:
/// "elapsed >= max_duration_seconds OR tasks_completed >= max_tasks".
pub fn is_done(elapsed_secs: u64, max_duration_secs: Option<u64>, tasks_completed: u32, max_tasks: u32) -> bool {
    if let Some(max) = max_duration_secs {
        if elapsed_secs >= max {
            return true;
        }
    }
    tasks_completed >= max_tasks
}

/// Task prompt: goal, task fields, and a memory-protocol closing section
/// (spec.md §4.5 "build a task prompt (goal + task fields + memory
/// protocol section)").
pub fn build_task_prompt(goal: Option<&str>, task: &Task) -> String {
    let mut sections = Vec::new();
    if let Some(goal) = goal {
        sections.push(format!("Goal: {goal}"));
    }
    sections.push(format!("## Task: {}", task.title));
    if let Some(desc) = &task.description {
        sections.push(format!("Description: {desc}"));
    }
    if let Some(ac) = &task.acceptance_criteria {
        sections.push(format!("Acceptance criteria: {ac}"));
    }
    if let Some(ctx) = &task.context_summary {
        sections.push(format!("Context: {ctx}"));
    }
    if !task.scope_paths.is_empty() {
        sections.push(format!("Scope paths: {}", task.scope_paths.join(", ")));
    }
    if !task.required_tools.is_empty() {
        sections.push(format!("Required tools: {}", task.required_tools.join(", ")));
    }
    sections.push(
        "Memory protocol: record any durable facts learned while working this task; \
         report a concise completion summary when done."
            .to_string(),
    );
    sections.join("\n\n")
}

/// Runs the task-claiming loop for one autonomous agent until a
/// termination condition fires or `should_cancel` returns true (the
/// swarm orchestrator wires that to its own cancellation flag).
///
/// `claimant_id` identifies the claimer passed to `WorkQueue::claim_next`
/// — there is no interactive client session here, so the owning swarm's
/// id stands in for `claimed_by_session_id`.
pub async fn run_autonomous_agent(
    queue: &WorkQueue,
    backend_config: &AgentBackendConfig,
    working_dir: &Path,
    agent: &SwarmAgent,
    claimant_id: &str,
    run_config: &AutonomousRunConfig,
    mut on_task_claimed: impl FnMut(&Task),
    mut should_cancel: impl FnMut() -> bool,
) -> Result<()> {
    let max_duration_secs = agent.autonomous.max_duration_seconds;
    let max_tasks = agent.autonomous.max_tasks.unwrap_or(run_config.default_max_tasks);
    let idle_timeout = agent
        .autonomous
        .idle_timeout_seconds
        .map(Duration::from_secs)
        .unwrap_or(run_config.default_idle_timeout);

    let started = Instant::now();
    let mut tasks_completed: u32 = 0;
    let mut idle_since = Instant::now();
    let working_dir_str = working_dir.to_string_lossy().into_owned();
    let task_types: Option<Vec<String>> = if agent.autonomous.task_types.is_empty() {
        None
    } else {
        Some(agent.autonomous.task_types.clone())
    };

    loop {
        if should_cancel() {
            return Ok(());
        }
        if is_done(started.elapsed().as_secs(), max_duration_secs, tasks_completed, max_tasks) {
            return Ok(());
        }

        match queue.claim_next(&working_dir_str, task_types.as_deref(), claimant_id, Some(&agent.id)) {
            Ok(task) => {
                idle_since = Instant::now();
                on_task_claimed(&task);

                let prompt = build_task_prompt(agent.autonomous.goal.as_deref(), &task);
                let process = spawn_turn(backend_config, working_dir, &prompt).await?;
                let outcome = drive_turn(&process, &agent.allowed_tools).await?;

                if outcome.error.is_some() || outcome.output_text.trim().is_empty() {
                    let last_error = outcome.error.unwrap_or_else(|| "agent produced no output".into());
                    queue.patch(
                        &task.id,
                        PatchTaskRequest {
                            status: Some(TaskStatus::Ready),
                            last_error: Some(last_error),
                            ..Default::default()
                        },
                    )?;
                } else {
                    queue.patch(
                        &task.id,
                        PatchTaskRequest {
                            status: Some(TaskStatus::Done),
                            completion_notes: Some(outcome.output_text.clone()),
                            ..Default::default()
                        },
                    )?;
                    tasks_completed += 1;
                }
            }
            Err(_) => {
                if idle_since.elapsed() >= idle_timeout {
                    return Ok(());
                }
                tokio::time::sleep(run_config.poll_interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_when_duration_elapsed() {
        assert!(is_done(100, Some(60), 0, 20));
        assert!(!is_done(30, Some(60), 0, 20));
    }

    #[test]
    fn done_when_task_count_reached() {
        assert!(is_done(0, None, 20, 20));
        assert!(!is_done(0, None, 5, 20));
    }

    #[test]
    fn task_prompt_includes_goal_and_fields() {
        let task = Task {
            id: "t1".into(),
            working_dir: "/w".into(),
            title: "fix the bug".into(),
            description: Some("it crashes on empty input".into()),
            acceptance_criteria: Some("no crash".into()),
            context_summary: None,
            scope_paths: vec!["src/lib.rs".into()],
            required_tools: vec![],
            task_type: None,
            tags: vec![],
            priority: 0,
            status: TaskStatus::Claimed,
            blocked_by: vec![],
            claimed_by_session_id: None,
            claimed_by_agent_id: None,
            claimed_at: None,
            started_at: None,
            completed_at: None,
            attempt_count: 1,
            outcome: None,
            completion_notes: None,
            last_error: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let prompt = build_task_prompt(Some("ship a stable release"), &task);
        assert!(prompt.contains("ship a stable release"));
        assert!(prompt.contains("fix the bug"));
        assert!(prompt.contains("no crash"));
        assert!(prompt.contains("src/lib.rs"));
    }
}
