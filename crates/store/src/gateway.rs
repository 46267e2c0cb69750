//! Store Gateway (C1): transactional persistence of everything in spec.md §3.
//!
//! Grounded on the teacher's `sessions::store::SessionStore` one-file-per-
//! concern JSON approach, generalized via [`crate::persist::JsonTable`] to
//! every entity this daemon owns. "Transaction" here means: the mutation is
//! computed and the backing file flushed while holding the table's write
//! lock once, so a reader never observes a half-written row.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use rl_domain::error::{Error, Result};

use crate::persist::JsonTable;
use crate::types::*;

pub struct StoreGateway {
    sessions: JsonTable<Session>,
    conversations: JsonTable<Conversation>,
    emotion_states: JsonTable<EmotionState>,
    stimulus_history: JsonTable<StimulusHistory>,
    swarms: JsonTable<Swarm>,
    swarm_agents: JsonTable<SwarmAgent>,
    swarm_scratchpad: JsonTable<serde_json::Value>,
    tasks: JsonTable<Task>,
    task_queue: JsonTable<QueuedJob>,
    consolidation_runs: JsonTable<ConsolidationRun>,
    notifications: JsonTable<Notification>,
}

impl StoreGateway {
    pub fn open(state_dir: &Path) -> Result<Self> {
        Ok(Self {
            sessions: JsonTable::open(state_dir, "sessions")?,
            conversations: JsonTable::open(state_dir, "conversations")?,
            emotion_states: JsonTable::open(state_dir, "emotion_states")?,
            stimulus_history: JsonTable::open(state_dir, "stimulus_history")?,
            swarms: JsonTable::open(state_dir, "swarms")?,
            swarm_agents: JsonTable::open(state_dir, "swarm_agents")?,
            swarm_scratchpad: JsonTable::open(state_dir, "swarm_scratchpad")?,
            tasks: JsonTable::open(state_dir, "tasks")?,
            task_queue: JsonTable::open(state_dir, "task_queue")?,
            consolidation_runs: JsonTable::open(state_dir, "consolidation_runs")?,
            notifications: JsonTable::open(state_dir, "ambient_notifications")?,
        })
    }

    // ── Sessions ─────────────────────────────────────────────────────

    pub fn create_session(&self, session: Session) -> Result<Session> {
        self.sessions.insert(session.id.clone(), session.clone())?;
        Ok(session)
    }

    pub fn load_session(&self, id: &str) -> Result<Session> {
        self.sessions
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("session {id}")))
    }

    pub fn list_sessions(&self) -> Vec<Session> {
        self.sessions.list()
    }

    pub fn update_session_fields<F>(&self, id: &str, f: F) -> Result<Session>
    where
        F: FnOnce(&mut Session),
    {
        self.sessions.update(id, |s| {
            f(s);
            s.last_activity = Utc::now();
        })
    }

    /// spec.md §4.1: once locked, a session never unlocks for the daemon's
    /// current lifetime.
    pub fn lock_session(&self, id: &str) -> Result<Session> {
        self.sessions.update(id, |s| s.is_locked = true)
    }

    // ── Conversations (atomic insert-with-blocks) ───────────────────

    /// spec.md §4.9 `insertConversationWithBlocks`: one transaction inserts
    /// the conversation row and all of its blocks in ordinal order.
    /// Ordinals are assigned densely starting at 0 regardless of what the
    /// caller passed in, satisfying invariant 3 of §8.
    pub fn insert_conversation_with_blocks(&self, new: NewConversation) -> Result<Conversation> {
        let mut blocks = new.blocks;
        for (i, block) in blocks.iter_mut().enumerate() {
            block.ordinal = i as u32;
        }
        let conversation = Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: new.session_id,
            role: new.role,
            timestamp: new.timestamp,
            personality: new.personality,
            medium: new.medium,
            user_id: new.user_id,
            metrics: new.metrics,
            prompt_summary: new.prompt_summary,
            blocks,
        };
        self.conversations
            .insert(conversation.id.clone(), conversation.clone())?;
        Ok(conversation)
    }

    pub fn load_conversation(&self, id: &str) -> Result<Conversation> {
        self.conversations
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("conversation {id}")))
    }

    /// History for a session, oldest first.
    pub fn list_conversations(&self, session_id: &str) -> Vec<Conversation> {
        let mut rows: Vec<Conversation> = self
            .conversations
            .list()
            .into_iter()
            .filter(|c| c.session_id == session_id)
            .collect();
        rows.sort_by_key(|c| c.timestamp);
        rows
    }

    /// Whether `tool_use_id` appears in some tool_use block anywhere in the
    /// session's conversation history (spec.md §3 ConversationBlock
    /// invariant: tool_result blocks reference a tool_use_id that exists
    /// somewhere in the session, not necessarily the same conversation).
    pub fn tool_use_id_exists(&self, session_id: &str, tool_use_id: &str) -> bool {
        self.list_conversations(session_id).iter().any(|c| {
            c.blocks
                .iter()
                .any(|b| b.kind == BlockKind::ToolUse && b.tool_use_id.as_deref() == Some(tool_use_id))
        })
    }

    // ── Emotion / appraisal ──────────────────────────────────────────

    pub fn insert_emotion_state(&self, state: EmotionState) -> Result<EmotionState> {
        self.emotion_states.insert(state.id.clone(), state.clone())?;
        Ok(state)
    }

    pub fn load_latest_emotion_state(&self, session_id: Option<&str>) -> Option<EmotionState> {
        self.emotion_states
            .list()
            .into_iter()
            .filter(|e| e.session_id.as_deref() == session_id)
            .max_by_key(|e| e.last_update)
    }

    pub fn insert_stimulus_history(&self, row: StimulusHistory) -> Result<StimulusHistory> {
        self.stimulus_history.insert(row.id.clone(), row.clone())?;
        Ok(row)
    }

    pub fn load_recent_stimulus_history(
        &self,
        session_id: Option<&str>,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Vec<StimulusHistory> {
        let mut rows: Vec<StimulusHistory> = self
            .stimulus_history
            .list()
            .into_iter()
            .filter(|r| r.session_id.as_deref() == session_id && r.timestamp >= since)
            .collect();
        rows.sort_by_key(|r| r.timestamp);
        if rows.len() > limit {
            let drop = rows.len() - limit;
            rows.drain(0..drop);
        }
        rows
    }

    // ── Swarm CRUD ───────────────────────────────────────────────────

    pub fn create_swarm(&self, swarm: Swarm) -> Result<Swarm> {
        self.swarms.insert(swarm.id.clone(), swarm.clone())?;
        Ok(swarm)
    }

    pub fn update_swarm<F>(&self, id: &str, f: F) -> Result<Swarm>
    where
        F: FnOnce(&mut Swarm),
    {
        self.swarms.update(id, |s| {
            f(s);
            s.updated_at = Utc::now();
        })
    }

    pub fn list_swarms(&self) -> Vec<Swarm> {
        self.swarms.list()
    }

    pub fn create_swarm_agent(&self, agent: SwarmAgent) -> Result<SwarmAgent> {
        self.swarm_agents.insert(agent.id.clone(), agent.clone())?;
        Ok(agent)
    }

    pub fn update_swarm_agent<F>(&self, id: &str, f: F) -> Result<SwarmAgent>
    where
        F: FnOnce(&mut SwarmAgent),
    {
        self.swarm_agents.update(id, f)
    }

    pub fn list_swarm_agents(&self, swarm_id: &str) -> Vec<SwarmAgent> {
        self.swarm_agents
            .list()
            .into_iter()
            .filter(|a| a.swarm_id == swarm_id)
            .collect()
    }

    pub fn load_swarm_with_agents(&self, id: &str) -> Result<(Swarm, Vec<SwarmAgent>)> {
        let swarm = self
            .swarms
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("swarm {id}")))?;
        let agents = self.list_swarm_agents(id);
        Ok((swarm, agents))
    }

    fn scratchpad_key(swarm_id: &str, key: &str) -> String {
        format!("{swarm_id}:{key}")
    }

    pub fn swarm_scratchpad_set(
        &self,
        swarm_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        self.swarm_scratchpad
            .insert(Self::scratchpad_key(swarm_id, key), value)
    }

    pub fn swarm_scratchpad_get(&self, swarm_id: &str, key: &str) -> Option<serde_json::Value> {
        self.swarm_scratchpad.get(&Self::scratchpad_key(swarm_id, key))
    }

    pub fn swarm_scratchpad_delete(&self, swarm_id: &str, key: &str) -> Result<()> {
        self.swarm_scratchpad
            .remove(&Self::scratchpad_key(swarm_id, key))?;
        Ok(())
    }

    pub fn swarm_scratchpad_list(&self, swarm_id: &str) -> HashMap<String, serde_json::Value> {
        let prefix = format!("{swarm_id}:");
        self.swarm_scratchpad
            .with_write(|rows| {
                rows.iter()
                    .filter(|(k, _)| k.starts_with(&prefix))
                    .map(|(k, v)| (k[prefix.len()..].to_string(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    // ── Work queue (C10) ─────────────────────────────────────────────

    pub fn insert_task(&self, mut task: Task) -> Result<Task> {
        let all_done = self.blocked_by_all_done(&task.blocked_by);
        task.status = Task::initial_status(all_done);
        self.tasks.insert(task.id.clone(), task.clone())?;
        Ok(task)
    }

    fn blocked_by_all_done(&self, blocked_by: &[String]) -> bool {
        if blocked_by.is_empty() {
            return true;
        }
        blocked_by.iter().all(|id| {
            self.tasks
                .get(id)
                .map(|t| t.status == TaskStatus::Done)
                .unwrap_or(false)
        })
    }

    pub fn load_task(&self, id: &str) -> Result<Task> {
        self.tasks.get(id).ok_or_else(|| Error::NotFound(format!("task {id}")))
    }

    pub fn list_tasks(&self) -> Vec<Task> {
        self.tasks.list()
    }

    /// spec.md §4.6: claim a `ready` task atomically, preferring higher
    /// priority then older `created_at`; two concurrent claimers never win
    /// the same task (invariant 7, §8). Simulated "update where still
    /// ready and unclaimed" since the backing store has no row locks: the
    /// whole select-and-mutate happens under one write-lock hold.
    pub fn claim_task_atomically(
        &self,
        working_dir: &str,
        task_types: Option<&[String]>,
        claimed_by_session_id: &str,
        claimed_by_agent_id: Option<&str>,
    ) -> Result<Task> {
        self.tasks.with_write(|rows| {
            let mut candidates: Vec<&mut Task> = rows
                .values_mut()
                .filter(|t| {
                    t.status == TaskStatus::Ready
                        && t.working_dir == working_dir
                        && t.claimed_by_session_id.is_none()
                        && task_types
                            .map(|types| {
                                t.task_type
                                    .as_deref()
                                    .map(|tt| types.iter().any(|x| x == tt))
                                    .unwrap_or(false)
                            })
                            .unwrap_or(true)
                })
                .collect();
            candidates.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| a.created_at.cmp(&b.created_at))
            });
            let task = candidates
                .into_iter()
                .next()
                .ok_or_else(|| Error::NotFound("no ready task available".into()))?;
            task.status = TaskStatus::Claimed;
            task.claimed_by_session_id = Some(claimed_by_session_id.to_string());
            task.claimed_by_agent_id = claimed_by_agent_id.map(str::to_string);
            task.claimed_at = Some(Utc::now());
            task.attempt_count += 1;
            task.updated_at = Utc::now();
            Ok(task.clone())
        })?
    }

    /// Atomic claim of one specific task by id (spec.md §4.6 HTTP "claim"
    /// endpoint: a client names the task it wants). Same single-write-lock
    /// select-and-mutate shape as [`Self::claim_task_atomically`], so two
    /// callers racing for the same id never both succeed.
    pub fn claim_task_by_id(
        &self,
        id: &str,
        claimed_by_session_id: &str,
        claimed_by_agent_id: Option<&str>,
    ) -> Result<Task> {
        self.tasks.with_write(|rows| {
            let task = rows
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("task {id} not found")))?;
            if task.status != TaskStatus::Ready || task.claimed_by_session_id.is_some() {
                return Err(Error::Conflict(format!("task {id} is not ready to claim")));
            }
            task.status = TaskStatus::Claimed;
            task.claimed_by_session_id = Some(claimed_by_session_id.to_string());
            task.claimed_by_agent_id = claimed_by_agent_id.map(str::to_string);
            task.claimed_at = Some(Utc::now());
            task.attempt_count += 1;
            task.updated_at = Utc::now();
            Ok(task.clone())
        })?
    }

    pub fn release_task(&self, id: &str, last_error: Option<String>) -> Result<Task> {
        self.tasks.update(id, |t| {
            t.status = TaskStatus::Ready;
            t.claimed_by_session_id = None;
            t.claimed_by_agent_id = None;
            t.claimed_at = None;
            if let Some(err) = last_error {
                t.last_error = Some(err);
            }
            t.updated_at = Utc::now();
        })
    }

    /// Arbitrary field updates via a mutator closure; cascades a `done`
    /// transition through `blocked_by` dependents (spec.md §4.6, §8
    /// invariant 6, Scenario F).
    pub fn update_task<F>(&self, id: &str, f: F) -> Result<Task>
    where
        F: FnOnce(&mut Task),
    {
        let was_done = self.tasks.get(id).map(|t| t.status == TaskStatus::Done).unwrap_or(false);
        let updated = self.tasks.update(id, |t| {
            let prev_status = t.status;
            f(t);
            if t.status == TaskStatus::InProgress && prev_status != TaskStatus::InProgress {
                t.started_at = Some(Utc::now());
            }
            if t.status == TaskStatus::Done && prev_status != TaskStatus::Done {
                t.completed_at = Some(Utc::now());
            }
            t.updated_at = Utc::now();
        })?;
        if !was_done && updated.status == TaskStatus::Done {
            self.refresh_blocked_cascade(id)?;
        }
        Ok(updated)
    }

    /// spec.md §4.6: for every task with `done_id` in `blocked_by`, remove
    /// it; if the remaining list is empty or all remaining refs are done,
    /// transition `blocked` → `ready`.
    pub fn refresh_blocked_cascade(&self, done_id: &str) -> Result<Vec<Task>> {
        self.tasks.with_write(|rows| {
            let done_id = done_id.to_string();
            let mut touched = Vec::new();
            let ids: Vec<String> = rows.keys().cloned().collect();
            for id in ids {
                let all_done = {
                    let task = rows.get(&id).unwrap();
                    if !task.blocked_by.iter().any(|b| b == &done_id) {
                        continue;
                    }
                    let remaining: Vec<String> = task
                        .blocked_by
                        .iter()
                        .filter(|b| *b != &done_id)
                        .cloned()
                        .collect();
                    remaining.iter().all(|id| {
                        rows.get(id).map(|t| t.status == TaskStatus::Done).unwrap_or(false)
                    })
                };
                let task = rows.get_mut(&id).unwrap();
                task.blocked_by.retain(|b| b != &done_id);
                if task.status == TaskStatus::Blocked && all_done {
                    task.status = TaskStatus::Ready;
                }
                task.updated_at = Utc::now();
                touched.push(task.clone());
            }
            touched
        })
    }

    pub fn delete_task(&self, id: &str) -> Result<()> {
        self.tasks.remove(id)?;
        Ok(())
    }

    // ── Task queue (C11 consolidation jobs) ─────────────────────────

    pub fn enqueue_job(&self, job: QueuedJob) -> Result<QueuedJob> {
        self.task_queue.insert(job.id.clone(), job.clone())?;
        Ok(job)
    }

    /// Atomic claim of the oldest pending job of `task_type`.
    pub fn claim_pending_job(&self, task_type: &str) -> Result<Option<QueuedJob>> {
        self.task_queue.with_write(|rows| {
            let mut candidates: Vec<&mut QueuedJob> = rows
                .values_mut()
                .filter(|j| j.task_type == task_type && j.status == QueuedJobStatus::Pending)
                .collect();
            candidates.sort_by_key(|j| j.created_at);
            if let Some(job) = candidates.into_iter().next() {
                job.status = QueuedJobStatus::Running;
                job.started_at = Some(Utc::now());
                Some(job.clone())
            } else {
                None
            }
        })
    }

    pub fn mark_job_completed(&self, id: &str) -> Result<QueuedJob> {
        self.task_queue.update(id, |j| {
            j.status = QueuedJobStatus::Completed;
            j.completed_at = Some(Utc::now());
        })
    }

    pub fn mark_job_failed(&self, id: &str, error: String) -> Result<QueuedJob> {
        self.task_queue.update(id, |j| {
            j.status = QueuedJobStatus::Failed;
            j.completed_at = Some(Utc::now());
            j.error = Some(error);
        })
    }

    pub fn record_consolidation_run(&self, run: ConsolidationRun) -> Result<ConsolidationRun> {
        self.consolidation_runs.insert(run.id.clone(), run.clone())?;
        Ok(run)
    }

    // ── Ambient notifications (spec.md §6) ──────────────────────────

    pub fn create_notification(&self, notification: Notification) -> Result<Notification> {
        self.notifications
            .insert(notification.id.clone(), notification.clone())?;
        Ok(notification)
    }

    pub fn load_notification(&self, id: &str) -> Result<Notification> {
        self.notifications
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("notification {id}")))
    }

    pub fn list_notifications(&self) -> Vec<Notification> {
        self.notifications.list()
    }

    pub fn acknowledge_notification(&self, id: &str) -> Result<Notification> {
        self.notifications.update(id, |n| {
            n.status = NotificationStatus::Acknowledged;
            n.acknowledged_at = Some(Utc::now());
            n.error = None;
        })
    }

    pub fn fail_notification(&self, id: &str, error: String) -> Result<Notification> {
        self.notifications.update(id, |n| {
            n.status = NotificationStatus::Failed;
            n.error = Some(error);
        })
    }
}

/// Convenience: resolve the default state directory under the daemon's
/// configured data root.
pub fn default_state_dir(data_root: &Path) -> PathBuf {
    data_root.join("store")
}
