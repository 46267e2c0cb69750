//! Work Queue (C10): the public operation surface over `rl_store`'s
//! already-atomic task persistence (spec.md §4.6).
//!
//! This crate is deliberately thin — `StoreGateway::claim_task_atomically`/
//! `claim_task_by_id`/`update_task`/`refresh_blocked_cascade` already hold
//! every invariant spec.md §4.6 and §8 invariant 6/7 require. What lives
//! here is request/response shaping and the pieces those store calls don't
//! own: computing a new task's initial status and sorting "ready" lists.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rl_domain::error::Result;
use rl_store::types::{Task, TaskStatus};
use rl_store::StoreGateway;

/// Request body for task creation (spec.md §4.6 "Create task").
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTaskRequest {
    pub working_dir: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Option<String>,
    #[serde(default)]
    pub context_summary: Option<String>,
    #[serde(default)]
    pub scope_paths: Vec<String>,
    #[serde(default)]
    pub required_tools: Vec<String>,
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub blocked_by: Vec<String>,
}

/// Arbitrary field updates (spec.md §4.6 "Update"). `None` leaves a field
/// unchanged; only `status` and a handful of terminal fields are
/// interpreted specially by `StoreGateway::update_task`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatchTaskRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Option<String>,
    #[serde(default)]
    pub context_summary: Option<String>,
    #[serde(default)]
    pub scope_paths: Option<Vec<String>>,
    #[serde(default)]
    pub required_tools: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub completion_notes: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReadyFilter {
    pub working_dir: Option<String>,
    #[serde(default, deserialize_with = "deserialize_csv_opt")]
    pub task_types: Option<Vec<String>>,
}

/// Accepts `task_types=a,b,c` as a query parameter (axum's `Query`
/// extractor has no native repeated-param support for a comma-joined
/// list), splitting on commas into the `Vec<String>` the rest of this
/// module expects.
fn deserialize_csv_opt<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(|s| s.split(',').map(|p| p.trim().to_string()).collect()))
}

/// Thin orchestration layer over `StoreGateway`'s task tables.
pub struct WorkQueue {
    store: Arc<StoreGateway>,
    default_priority: i32,
}

impl WorkQueue {
    pub fn new(store: Arc<StoreGateway>, default_priority: i32) -> Self {
        Self {
            store,
            default_priority,
        }
    }

    /// spec.md §4.6: "Initial status = ready if blocked_by is empty or all
    /// referenced tasks are done; otherwise blocked."
    pub fn create_task(&self, req: NewTaskRequest) -> Result<Task> {
        let blocked_by_all_done = req.blocked_by.is_empty()
            || req.blocked_by.iter().all(|id| {
                self.store
                    .load_task(id)
                    .map(|t| t.status == TaskStatus::Done)
                    .unwrap_or(false)
            });
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            working_dir: req.working_dir,
            title: req.title,
            description: req.description,
            acceptance_criteria: req.acceptance_criteria,
            context_summary: req.context_summary,
            scope_paths: req.scope_paths,
            required_tools: req.required_tools,
            task_type: req.task_type,
            tags: req.tags,
            priority: req.priority.unwrap_or(self.default_priority),
            status: Task::initial_status(blocked_by_all_done),
            blocked_by: req.blocked_by,
            claimed_by_session_id: None,
            claimed_by_agent_id: None,
            claimed_at: None,
            started_at: None,
            completed_at: None,
            attempt_count: 0,
            outcome: None,
            completion_notes: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_task(task)
    }

    pub fn get_task(&self, id: &str) -> Result<Task> {
        self.store.load_task(id)
    }

    pub fn list_tasks(&self) -> Vec<Task> {
        self.store.list_tasks()
    }

    /// spec.md §4.6 "Ordering: claim and list 'ready' prefer higher
    /// priority, then older created_at."
    pub fn list_ready(&self, filter: &ReadyFilter) -> Vec<Task> {
        let mut ready: Vec<Task> = self
            .store
            .list_tasks()
            .into_iter()
            .filter(|t| t.status == TaskStatus::Ready)
            .filter(|t| {
                filter
                    .working_dir
                    .as_ref()
                    .map(|w| &t.working_dir == w)
                    .unwrap_or(true)
            })
            .filter(|t| {
                filter
                    .task_types
                    .as_ref()
                    .map(|types| {
                        t.task_type
                            .as_deref()
                            .map(|tt| types.iter().any(|x| x == tt))
                            .unwrap_or(false)
                    })
                    .unwrap_or(true)
            })
            .collect();
        sort_ready(&mut ready);
        ready
    }

    /// spec.md §4.6 "Claim": claim the highest-priority, oldest ready task
    /// matching `working_dir`/`task_types`, atomically.
    pub fn claim_next(
        &self,
        working_dir: &str,
        task_types: Option<&[String]>,
        claimed_by_session_id: &str,
        claimed_by_agent_id: Option<&str>,
    ) -> Result<Task> {
        self.store.claim_task_atomically(
            working_dir,
            task_types,
            claimed_by_session_id,
            claimed_by_agent_id,
        )
    }

    /// Claim by id (the HTTP `claim` endpoint naming a specific task;
    /// spec.md §4.6 "Claim rejects with 400 if the task is not ready, 400
    /// if raced away, 404 if not found" — both race and not-ready surface
    /// as `Error::Conflict` here, not-found as `Error::NotFound`).
    pub fn claim_by_id(
        &self,
        id: &str,
        claimed_by_session_id: &str,
        claimed_by_agent_id: Option<&str>,
    ) -> Result<Task> {
        self.store
            .claim_task_by_id(id, claimed_by_session_id, claimed_by_agent_id)
    }

    /// spec.md §4.6 "Release": from claimed/in_progress back to ready.
    pub fn release(&self, id: &str, last_error: Option<String>) -> Result<Task> {
        self.store.release_task(id, last_error)
    }

    /// spec.md §4.6 "Update": arbitrary field updates, with the
    /// `in_progress`/`done` timestamp and cascade side effects owned by
    /// `StoreGateway::update_task`.
    pub fn patch(&self, id: &str, patch: PatchTaskRequest) -> Result<Task> {
        self.store.update_task(id, |t| {
            if let Some(v) = patch.title {
                t.title = v;
            }
            if patch.description.is_some() {
                t.description = patch.description;
            }
            if patch.acceptance_criteria.is_some() {
                t.acceptance_criteria = patch.acceptance_criteria;
            }
            if patch.context_summary.is_some() {
                t.context_summary = patch.context_summary;
            }
            if let Some(v) = patch.scope_paths {
                t.scope_paths = v;
            }
            if let Some(v) = patch.required_tools {
                t.required_tools = v;
            }
            if let Some(v) = patch.tags {
                t.tags = v;
            }
            if let Some(v) = patch.priority {
                t.priority = v;
            }
            if let Some(v) = patch.status {
                t.status = v;
            }
            if patch.outcome.is_some() {
                t.outcome = patch.outcome;
            }
            if patch.completion_notes.is_some() {
                t.completion_notes = patch.completion_notes;
            }
            if patch.last_error.is_some() {
                t.last_error = patch.last_error;
            }
        })
    }

    /// spec.md §4.6 "Delete": hard delete.
    pub fn delete(&self, id: &str) -> Result<()> {
        self.store.delete_task(id)
    }
}

fn sort_ready(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}

/// Returns `true` when a task's `blocked_by` list is satisfied, i.e. every
/// referenced task is `done` (spec.md §8 invariant 6, stated as a pure
/// predicate for unit testing independent of store state).
pub fn blocked_by_satisfied(blocked_by: &[String], lookup: impl Fn(&str) -> Option<TaskStatus>) -> bool {
    blocked_by.is_empty()
        || blocked_by
            .iter()
            .all(|id| lookup(id) == Some(TaskStatus::Done))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn queue() -> WorkQueue {
        let dir = tempdir().unwrap();
        let store = Arc::new(StoreGateway::open(dir.path()).unwrap());
        WorkQueue::new(store, 0)
    }

    #[test]
    fn create_with_no_blockers_is_ready() {
        let q = queue();
        let task = q
            .create_task(NewTaskRequest {
                working_dir: "/w".into(),
                title: "do thing".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(task.status, TaskStatus::Ready);
    }

    #[test]
    fn create_with_unfinished_blocker_is_blocked() {
        let q = queue();
        let blocker = q
            .create_task(NewTaskRequest {
                working_dir: "/w".into(),
                title: "blocker".into(),
                ..Default::default()
            })
            .unwrap();
        let task = q
            .create_task(NewTaskRequest {
                working_dir: "/w".into(),
                title: "blocked".into(),
                blocked_by: vec![blocker.id],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(task.status, TaskStatus::Blocked);
    }

    #[test]
    fn completing_a_blocker_cascades_dependents_to_ready() {
        let q = queue();
        let blocker = q
            .create_task(NewTaskRequest {
                working_dir: "/w".into(),
                title: "blocker".into(),
                ..Default::default()
            })
            .unwrap();
        let dependent = q
            .create_task(NewTaskRequest {
                working_dir: "/w".into(),
                title: "blocked".into(),
                blocked_by: vec![blocker.id.clone()],
                ..Default::default()
            })
            .unwrap();
        q.patch(
            &blocker.id,
            PatchTaskRequest {
                status: Some(TaskStatus::Done),
                ..Default::default()
            },
        )
        .unwrap();
        let reloaded = q.get_task(&dependent.id).unwrap();
        assert_eq!(reloaded.status, TaskStatus::Ready);
        assert!(reloaded.blocked_by.is_empty());
    }

    #[test]
    fn claim_next_picks_highest_priority_then_oldest() {
        let q = queue();
        let low = q
            .create_task(NewTaskRequest {
                working_dir: "/w".into(),
                title: "low".into(),
                priority: Some(1),
                ..Default::default()
            })
            .unwrap();
        let high = q
            .create_task(NewTaskRequest {
                working_dir: "/w".into(),
                title: "high".into(),
                priority: Some(5),
                ..Default::default()
            })
            .unwrap();
        let claimed = q.claim_next("/w", None, "session-1", None).unwrap();
        assert_eq!(claimed.id, high.id);
        assert_ne!(claimed.id, low.id);
    }

    #[test]
    fn claim_by_id_rejects_already_claimed() {
        let q = queue();
        let task = q
            .create_task(NewTaskRequest {
                working_dir: "/w".into(),
                title: "solo".into(),
                ..Default::default()
            })
            .unwrap();
        q.claim_by_id(&task.id, "session-1", None).unwrap();
        let second = q.claim_by_id(&task.id, "session-2", None);
        assert!(second.is_err());
    }

    #[test]
    fn release_returns_task_to_ready() {
        let q = queue();
        let task = q
            .create_task(NewTaskRequest {
                working_dir: "/w".into(),
                title: "solo".into(),
                ..Default::default()
            })
            .unwrap();
        q.claim_by_id(&task.id, "session-1", None).unwrap();
        let released = q.release(&task.id, Some("timed out".into())).unwrap();
        assert_eq!(released.status, TaskStatus::Ready);
        assert!(released.claimed_by_session_id.is_none());
        assert_eq!(released.last_error.as_deref(), Some("timed out"));
    }

    #[test]
    fn blocked_by_satisfied_predicate() {
        let mut done = std::collections::HashMap::new();
        done.insert("a".to_string(), TaskStatus::Done);
        done.insert("b".to_string(), TaskStatus::Ready);
        assert!(blocked_by_satisfied(&[], |_| None));
        assert!(blocked_by_satisfied(&["a".to_string()], |id| done.get(id).copied()));
        assert!(!blocked_by_satisfied(&["b".to_string()], |id| done
            .get(id)
            .copied()));
    }
}
