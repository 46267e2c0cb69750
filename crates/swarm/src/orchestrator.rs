//! Swarm Orchestrator (C9) execution: starts one orchestration task per
//! agent, each awaiting a one-shot broadcast completion signal from every
//! predecessor before proceeding (spec.md §4.5 "Execution", §9 "Signals,
//! not locks, for DAG waits"). Creation (`build_swarm`), the DAG utilities,
//! condition evaluation, dependency-context composition, and autonomous
//! task-claiming each live in their own module (`builder`, `dag`,
//! `condition`, `summarize`, `autonomous`); this module is the glue that
//! drives them end to end.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

use rl_domain::error::{Error, Result};
use rl_providers::LlmProvider;
use rl_queue::WorkQueue;
use rl_sandbox::{RunConfig, SandboxOutcome, SandboxSupervisor};
use rl_store::types::{
    AgentMode, AgentStatus, BlockKind, ConversationMetrics, ConversationRole, DependsOn,
    NewConversation, Session, SwarmAgent, SwarmStatus,
};
use rl_store::StoreGateway;
use rl_transport::{AgentBackendConfig, AgentProcess};

use crate::autonomous::{run_autonomous_agent, AutonomousRunConfig};
use crate::condition::{evaluate, parse_predecessor_output};
use crate::runner::{drive_turn, ordered_blocks, spawn_turn};
use crate::summarize::{compose_dependency_context, synthesize_summary};

/// Agent names/roles exempted from the synthesis agent's
/// skip-on-predecessor-failure check (spec.md §4.5 step 3: "any
/// non-synthesis/non-steward predecessor is failed").
fn is_exempt_from_failure_check(agent: &SwarmAgent) -> bool {
    agent.is_synthesis_agent || agent.role.as_deref() == Some("memory-steward")
}

/// Pure decision for spec.md §4.5 step 3 ("skip synthesis if any
/// non-synthesis/non-steward predecessor failed").
pub fn should_skip_synthesis(
    is_synthesis_agent: bool,
    skip_on_failure: bool,
    predecessors: &[SwarmAgent],
) -> bool {
    is_synthesis_agent
        && skip_on_failure
        && predecessors
            .iter()
            .any(|p| !is_exempt_from_failure_check(p) && p.status == AgentStatus::Failed)
}

/// Pure decision for spec.md §4.5 step 4: evaluate each dependency's
/// `condition` (if any) against that predecessor's parsed output. A
/// missing predecessor, parse/eval error, or `false` result all skip.
pub fn should_skip_on_conditions(depends_on: &[DependsOn], predecessors: &[SwarmAgent]) -> bool {
    for dep in depends_on {
        let Some(expr) = &dep.condition else { continue };
        let Some(pred) = predecessors.iter().find(|p| p.id == dep.agent_id) else {
            return true;
        };
        let output = pred.output_text.clone().unwrap_or_default();
        let parsed = parse_predecessor_output(&output);
        match evaluate(expr, &parsed) {
            Ok(true) => continue,
            Ok(false) | Err(_) => return true,
        }
    }
    false
}

pub struct OrchestratorConfig {
    pub summary_threshold_chars: usize,
    pub autonomous: AutonomousRunConfig,
    pub default_working_dir: PathBuf,
}

/// One-shot-per-agent completion broadcast used to gate dependents,
/// keyed by agent id (spec.md §9).
type SignalMap = HashMap<String, broadcast::Sender<AgentStatus>>;

pub struct SwarmOrchestrator {
    store: Arc<StoreGateway>,
    backend_config: AgentBackendConfig,
    sandbox: Arc<SandboxSupervisor>,
    queue: Arc<WorkQueue>,
    provider: Option<Arc<dyn LlmProvider>>,
    config: OrchestratorConfig,
    /// Processes currently in flight, keyed by `swarm_agent.id`, so
    /// `cancel` can interrupt them (spec.md §5 "Cancel propagates by ...
    /// interrupting the C2 stream").
    in_flight: Mutex<HashMap<String, Arc<AgentProcess>>>,
    /// Swarms with a cancel in progress; checked between steps by
    /// in-flight `run_agent` tasks belonging to that swarm.
    cancelled_swarms: Mutex<HashSet<String>>,
}

impl SwarmOrchestrator {
    pub fn new(
        store: Arc<StoreGateway>,
        backend_config: AgentBackendConfig,
        sandbox: Arc<SandboxSupervisor>,
        queue: Arc<WorkQueue>,
        provider: Option<Arc<dyn LlmProvider>>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            backend_config,
            sandbox,
            queue,
            provider,
            config,
            in_flight: Mutex::new(HashMap::new()),
            cancelled_swarms: Mutex::new(HashSet::new()),
        })
    }

    /// Starts (or continues, after `resume` has reset selected agents to
    /// `pending`) execution of every agent in the swarm. Returns once
    /// every agent has reached a terminal status.
    pub async fn start(self: &Arc<Self>, swarm_id: &str) -> Result<()> {
        let (_swarm, agents) = self.store.load_swarm_with_agents(swarm_id)?;
        self.store
            .update_swarm(swarm_id, |s| s.status = SwarmStatus::Running)?;

        let senders: Arc<SignalMap> = Arc::new(
            agents
                .iter()
                .map(|a| (a.id.clone(), broadcast::channel::<AgentStatus>(1).0))
                .collect(),
        );

        let mut handles = Vec::new();
        for agent in &agents {
            let receivers: Vec<(DependsOn, broadcast::Receiver<AgentStatus>)> = agent
                .depends_on
                .iter()
                .map(|d| (d.clone(), senders[&d.agent_id].subscribe()))
                .collect();
            let this = self.clone();
            let swarm_id = swarm_id.to_string();
            let agent_id = agent.id.clone();
            let senders = senders.clone();
            handles.push(tokio::spawn(async move {
                this.run_agent(&swarm_id, &agent_id, receivers, &senders).await
            }));
        }
        for h in handles {
            let _ = h.await;
        }

        self.finalize_swarm(swarm_id)?;
        Ok(())
    }

    fn finalize_swarm(&self, swarm_id: &str) -> Result<()> {
        let agents = self.store.list_swarm_agents(swarm_id);
        if self.cancelled_swarms.lock().contains(swarm_id) {
            self.store
                .update_swarm(swarm_id, |s| s.status = SwarmStatus::Cancelled)?;
            return Ok(());
        }
        let status = if agents.iter().any(|a| a.status == AgentStatus::Failed) {
            SwarmStatus::Failed
        } else {
            SwarmStatus::Completed
        };
        self.store.update_swarm(swarm_id, |s| s.status = status)?;
        Ok(())
    }

    async fn run_agent(
        self: &Arc<Self>,
        swarm_id: &str,
        agent_id: &str,
        receivers: Vec<(DependsOn, broadcast::Receiver<AgentStatus>)>,
        senders: &SignalMap,
    ) {
        // 1. await all predecessor completion signals.
        for (_, mut rx) in receivers {
            let _ = rx.recv().await;
        }

        let agent = match self.store.list_swarm_agents(swarm_id).into_iter().find(|a| a.id == agent_id) {
            Some(a) => a,
            None => return,
        };

        // Resume semantics: agents left in a terminal state (not reset to
        // `pending`) are not re-run; just forward their existing status.
        if agent.status != AgentStatus::Pending {
            let _ = senders[agent_id].send(agent.status);
            return;
        }

        // 2. swarm-level cancellation.
        if self.cancelled_swarms.lock().contains(swarm_id) {
            let _ = self.mark_terminal(agent_id, AgentStatus::Cancelled, None, None);
            let _ = senders[agent_id].send(AgentStatus::Cancelled);
            return;
        }

        let predecessors: Vec<SwarmAgent> = self
            .store
            .list_swarm_agents(swarm_id)
            .into_iter()
            .filter(|a| agent.depends_on.iter().any(|d| d.agent_id == a.id))
            .collect();

        // 3. synthesis skip-on-failure.
        if should_skip_synthesis(agent.is_synthesis_agent, self.skip_synthesis_on_failure(swarm_id), &predecessors) {
            let _ = self.mark_terminal(agent_id, AgentStatus::Skipped, None, None);
            let _ = senders[agent_id].send(AgentStatus::Skipped);
            return;
        }

        // 4. condition evaluation.
        if should_skip_on_conditions(&agent.depends_on, &predecessors) {
            let _ = self.mark_terminal(agent_id, AgentStatus::Skipped, None, None);
            let _ = senders[agent_id].send(AgentStatus::Skipped);
            return;
        }

        let outcome = self.execute_agent(swarm_id, &agent, &predecessors).await;

        let status = match &outcome {
            Ok(_) => AgentStatus::Completed,
            Err(_) => AgentStatus::Failed,
        };
        let error_message = outcome.as_ref().err().map(|e| e.to_string());
        let _ = self.mark_terminal(agent_id, status, error_message, outcome.ok());

        if agent.is_synthesis_agent {
            if let Some(updated) = self
                .store
                .list_swarm_agents(swarm_id)
                .into_iter()
                .find(|a| a.id == *agent_id)
            {
                let _ = self.store.update_swarm(swarm_id, |s| {
                    s.synthesis_output = updated.output_text.clone();
                    s.synthesis_summary = updated.output_summary.clone();
                });
            }
        }

        let _ = senders[agent_id].send(status);
    }

    fn skip_synthesis_on_failure(&self, swarm_id: &str) -> bool {
        self.store
            .load_swarm_with_agents(swarm_id)
            .map(|(s, _)| s.skip_synthesis_on_failure)
            .unwrap_or(false)
    }

    /// Runs one agent's turn (assigned mode) or its task-claiming loop
    /// (autonomous mode) and persists the resulting conversation
    /// (spec.md §4.5 steps 5-6).
    async fn execute_agent(
        self: &Arc<Self>,
        swarm_id: &str,
        agent: &SwarmAgent,
        predecessors: &[SwarmAgent],
    ) -> Result<(String, Option<String>, u32)> {
        let (swarm, _) = self.store.load_swarm_with_agents(swarm_id)?;
        let working_dir = swarm
            .working_dir
            .clone()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.default_working_dir.clone());

        let session = self.store.create_session(Session::new(
            Uuid::new_v4().to_string(),
            working_dir.to_string_lossy().into_owned(),
        ))?;
        self.store.update_swarm_agent(&agent.id, |a| {
            a.status = AgentStatus::Running;
            a.started_at = Some(Utc::now());
            a.session_id = Some(session.id.clone());
        })?;

        if agent.mode == AgentMode::Autonomous {
            return self.execute_autonomous(swarm_id, agent, &working_dir).await;
        }

        let context = compose_dependency_context(
            &agent.depends_on,
            predecessors,
            self.provider.as_ref(),
            self.config.summary_threshold_chars,
        )
        .await;
        let mut prompt = agent.prompt.clone().unwrap_or_default();
        if !context.is_empty() {
            prompt = format!("{prompt}\n\n# Prior agent output\n\n{context}");
        }

        if agent.sandbox_mode {
            let run_config = RunConfig {
                working_dir: working_dir.to_string_lossy().into_owned(),
                system_prompt: agent.personality.clone(),
                model: agent.model.clone(),
                thinking_budget: agent.thinking_budget,
                allowed_tools: agent.allowed_tools.clone(),
                mount_type: rl_store::types::SandboxMountType::Copy,
                network_mode: rl_store::types::SandboxNetworkMode::Bridge,
                plugins: agent.plugins.clone(),
                env: Default::default(),
            };
            match self.sandbox.ensure(&session.id, run_config) {
                Ok(SandboxOutcome::Active(entry)) => entry.begin_query(),
                Ok(SandboxOutcome::Locked) => {
                    return Err(Error::Locked(format!("session {} is locked", session.id)))
                }
                Err(e) => return Err(e),
            }
        }

        let process = spawn_turn(&self.backend_config, &working_dir, &prompt).await?;
        self.in_flight.lock().insert(agent.id.clone(), process.clone());
        let result = drive_turn(&process, &agent.allowed_tools).await;
        self.in_flight.lock().remove(&agent.id);

        if agent.sandbox_mode {
            if let Some(entry) = self.sandbox.get(&session.id) {
                entry.end_query();
            }
        }

        let outcome = result?;
        if let Some(err) = &outcome.error {
            return Err(Error::Transport(err.clone()));
        }

        self.persist_turn(&session.id, &prompt, &outcome)?;

        let output_text = outcome.output_text.clone();
        let summary = if output_text.chars().count() > self.config.summary_threshold_chars {
            Some(synthesize_summary(&output_text, self.provider.as_ref()).await)
        } else {
            None
        };
        Ok((output_text, summary, outcome.tool_count))
    }

    async fn execute_autonomous(
        self: &Arc<Self>,
        swarm_id: &str,
        agent: &SwarmAgent,
        working_dir: &Path,
    ) -> Result<(String, Option<String>, u32)> {
        let agent_id = agent.id.clone();
        let store = self.store.clone();
        let swarm_id_owned = swarm_id.to_string();
        let this = self.clone();
        let mut tasks_completed = 0u32;
        run_autonomous_agent(
            &self.queue,
            &self.backend_config,
            working_dir,
            agent,
            &agent.id,
            &self.config.autonomous,
            |task| {
                tasks_completed += 1;
                let _ = store.update_swarm_agent(&agent_id, |a| {
                    a.autonomous.current_task_id = Some(task.id.clone());
                    a.autonomous.tasks_completed = tasks_completed;
                });
            },
            || this.cancelled_swarms.lock().contains(&swarm_id_owned),
        )
        .await?;
        self.store
            .update_swarm_agent(&agent.id, |a| a.autonomous.current_task_id = None)?;
        Ok((format!("completed {tasks_completed} task(s)"), None, 0))
    }

    fn persist_turn(
        &self,
        session_id: &str,
        prompt: &str,
        outcome: &crate::runner::TurnOutcome,
    ) -> Result<()> {
        self.store.insert_conversation_with_blocks(NewConversation {
            session_id: session_id.to_string(),
            role: ConversationRole::User,
            timestamp: Utc::now(),
            personality: None,
            medium: None,
            user_id: None,
            metrics: ConversationMetrics::default(),
            prompt_summary: None,
            blocks: vec![rl_store::types::ConversationBlock {
                ordinal: 0,
                kind: BlockKind::Text,
                text: Some(prompt.to_string()),
                tool_use_id: None,
                tool_name: None,
                tool_input: None,
                is_error: None,
            }],
        })?;
        self.store.insert_conversation_with_blocks(NewConversation {
            session_id: session_id.to_string(),
            role: ConversationRole::Assistant,
            timestamp: Utc::now(),
            personality: None,
            medium: None,
            user_id: None,
            metrics: ConversationMetrics {
                tool_uses: outcome.tool_count,
                tool_names: outcome.tool_names.clone(),
                ..Default::default()
            },
            prompt_summary: Some(outcome.output_text.clone()),
            blocks: ordered_blocks(outcome),
        })?;
        Ok(())
    }

    fn mark_terminal(
        &self,
        agent_id: &str,
        status: AgentStatus,
        error_message: Option<String>,
        output: Option<(String, Option<String>, u32)>,
    ) -> Result<SwarmAgent> {
        self.store.update_swarm_agent(agent_id, |a| {
            a.status = status;
            a.completed_at = Some(Utc::now());
            a.error_message = error_message;
            if let Some((text, summary, tool_count)) = output {
                a.output_text = Some(text);
                a.output_summary = summary;
                a.tool_count = tool_count;
            }
        })
    }

    /// spec.md §4.5 "Resume": reset selected agents (by name, or every
    /// failed/cancelled agent when `names` is empty) to `pending` and
    /// clear their outputs, then re-run the swarm. Completed agents are
    /// left untouched and `run_agent` forwards their existing status.
    pub async fn resume(self: &Arc<Self>, swarm_id: &str, names: &[String]) -> Result<()> {
        let agents = self.store.list_swarm_agents(swarm_id);
        self.cancelled_swarms.lock().remove(swarm_id);
        for agent in &agents {
            let selected = if names.is_empty() {
                matches!(agent.status, AgentStatus::Failed | AgentStatus::Cancelled)
            } else {
                names.contains(&agent.name)
            };
            if selected {
                self.store.update_swarm_agent(&agent.id, |a| {
                    a.status = AgentStatus::Pending;
                    a.output_text = None;
                    a.output_summary = None;
                    a.error_message = None;
                    a.started_at = None;
                    a.completed_at = None;
                })?;
            }
        }
        self.start(swarm_id).await
    }

    /// spec.md §4.5 "Cancel": marks the swarm and every non-terminal
    /// agent cancelled, and interrupts in-flight turns.
    pub fn cancel(&self, swarm_id: &str) -> Result<()> {
        self.cancelled_swarms.lock().insert(swarm_id.to_string());
        self.store
            .update_swarm(swarm_id, |s| s.status = SwarmStatus::Cancelled)?;
        for agent in self.store.list_swarm_agents(swarm_id) {
            if matches!(agent.status, AgentStatus::Pending | AgentStatus::Running) {
                self.store.update_swarm_agent(&agent.id, |a| {
                    a.status = AgentStatus::Cancelled;
                    a.completed_at = Some(Utc::now());
                })?;
                if let Some(process) = self.in_flight.lock().get(&agent.id).cloned() {
                    let process = process.clone();
                    tokio::spawn(async move {
                        let _ = process.interrupt().await;
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rl_store::types::AutonomousFields;

    fn agent(id: &str, status: AgentStatus, role: Option<&str>, is_synthesis: bool) -> SwarmAgent {
        SwarmAgent {
            id: id.into(),
            swarm_id: "s".into(),
            name: id.into(),
            role: role.map(str::to_string),
            is_synthesis_agent: is_synthesis,
            mode: AgentMode::Assigned,
            prompt: None,
            personality: None,
            plugins: vec![],
            allowed_tools: vec![],
            thinking_budget: None,
            model: None,
            sandbox_mode: false,
            depends_on: vec![],
            status,
            output_text: None,
            output_summary: None,
            error_message: None,
            tool_count: 0,
            started_at: None,
            completed_at: None,
            session_id: None,
            autonomous: AutonomousFields::default(),
        }
    }

    #[test]
    fn synthesis_skips_when_predecessor_failed_and_flag_set() {
        let preds = vec![agent("a", AgentStatus::Failed, None, false)];
        assert!(should_skip_synthesis(true, true, &preds));
    }

    #[test]
    fn synthesis_runs_when_flag_unset() {
        let preds = vec![agent("a", AgentStatus::Failed, None, false)];
        assert!(!should_skip_synthesis(true, false, &preds));
    }

    #[test]
    fn synthesis_ignores_steward_failure() {
        let preds = vec![agent("a", AgentStatus::Failed, Some("memory-steward"), false)];
        assert!(!should_skip_synthesis(true, true, &preds));
    }

    #[test]
    fn non_synthesis_agent_never_skips_via_failure_rule() {
        let preds = vec![agent("a", AgentStatus::Failed, None, false)];
        assert!(!should_skip_synthesis(false, true, &preds));
    }

    #[test]
    fn condition_false_skips() {
        let preds = vec![agent("a", AgentStatus::Completed, None, false)];
        let mut pred = preds[0].clone();
        pred.output_text = Some(r#"{"ok": false}"#.into());
        let deps = vec![DependsOn {
            agent_id: "a".into(),
            include: rl_store::types::IncludePolicy::Full,
            condition: Some("output.ok == true".into()),
        }];
        assert!(should_skip_on_conditions(&deps, &[pred]));
    }

    #[test]
    fn condition_true_does_not_skip() {
        let mut pred = agent("a", AgentStatus::Completed, None, false);
        pred.output_text = Some(r#"{"ok": true}"#.into());
        let deps = vec![DependsOn {
            agent_id: "a".into(),
            include: rl_store::types::IncludePolicy::Full,
            condition: Some("output.ok == true".into()),
        }];
        assert!(!should_skip_on_conditions(&deps, &[pred]));
    }

    #[test]
    fn no_condition_never_skips() {
        let pred = agent("a", AgentStatus::Completed, None, false);
        let deps = vec![DependsOn {
            agent_id: "a".into(),
            include: rl_store::types::IncludePolicy::Full,
            condition: None,
        }];
        assert!(!should_skip_on_conditions(&deps, &[pred]));
    }

    #[test]
    fn missing_predecessor_skips() {
        let deps = vec![DependsOn {
            agent_id: "missing".into(),
            include: rl_store::types::IncludePolicy::Full,
            condition: Some("output.ok == true".into()),
        }];
        assert!(should_skip_on_conditions(&deps, &[]));
    }
}
