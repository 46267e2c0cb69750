//! Persisted data model (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxMountType {
    Direct,
    Copy,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxNetworkMode {
    Bridge,
    Host,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub working_dir: String,
    pub personality: Option<String>,
    pub user_id: Option<String>,
    pub medium: Option<String>,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Opaque resume token from the agent backend, assigned at first sight.
    pub agent_session_id: Option<String>,
    pub sandbox_mode: bool,
    pub sandbox_mount_type: SandboxMountType,
    pub sandbox_settings: serde_json::Value,
    pub sandbox_network_mode: SandboxNetworkMode,
    pub is_locked: bool,
    pub created_at: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub name: Option<String>,
}

impl Session {
    pub fn new(id: String, working_dir: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            working_dir,
            personality: None,
            user_id: None,
            medium: None,
            start_time: now,
            last_activity: now,
            agent_session_id: None,
            sandbox_mode: false,
            sandbox_mount_type: SandboxMountType::None,
            sandbox_settings: serde_json::Value::Null,
            sandbox_network_mode: SandboxNetworkMode::Bridge,
            is_locked: false,
            created_at: now,
            end_time: None,
            summary: None,
            name: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation / ConversationBlock
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationMetrics {
    #[serde(default)]
    pub ttft_ms: Option<u64>,
    #[serde(default)]
    pub response_ms: Option<u64>,
    #[serde(default)]
    pub thinking_ms: Option<u64>,
    #[serde(default)]
    pub tool_uses: u32,
    #[serde(default)]
    pub tool_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub session_id: String,
    pub role: ConversationRole,
    pub timestamp: DateTime<Utc>,
    pub personality: Option<String>,
    pub medium: Option<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub metrics: ConversationMetrics,
    /// Assistant turns store the concatenated final text for quick search.
    pub prompt_summary: Option<String>,
    pub blocks: Vec<ConversationBlock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Text,
    Thinking,
    ToolUse,
    ToolResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationBlock {
    pub ordinal: u32,
    pub kind: BlockKind,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<serde_json::Value>,
    #[serde(default)]
    pub is_error: Option<bool>,
}

/// Input to `StoreGateway::insert_conversation_with_blocks`: a conversation
/// row plus its ordinal-ordered blocks, inserted as a single unit (spec.md
/// §3, §4.9).
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub session_id: String,
    pub role: ConversationRole,
    pub timestamp: DateTime<Utc>,
    pub personality: Option<String>,
    pub medium: Option<String>,
    pub user_id: Option<String>,
    pub metrics: ConversationMetrics,
    pub prompt_summary: Option<String>,
    pub blocks: Vec<ConversationBlock>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Emotion / appraisal
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionInstance {
    pub emotion_type: String,
    pub intensity: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppraisalData {
    /// The active emotion map at the time this state was recorded.
    pub active_map: HashMap<String, EmotionInstance>,
    pub last_decay_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionState {
    pub id: String,
    /// `None` for the daemon-global map.
    pub session_id: Option<String>,
    pub primary_type: Option<String>,
    pub primary_intensity: f64,
    pub secondary_type: Option<String>,
    pub secondary_intensity: f64,
    pub overall_intensity: f64,
    pub appraisal_data: AppraisalData,
    pub trigger_data: Option<String>,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StimulusHistory {
    pub id: String,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub stimulus_type: String,
    pub valence: f64,
    pub intensity: f64,
    pub context: serde_json::Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Swarm / SwarmAgent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Swarm {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub parent_session_id: Option<String>,
    pub working_dir: Option<String>,
    pub git_branch_prefix: Option<String>,
    pub base_branch: Option<String>,
    pub status: SwarmStatus,
    pub auto_synthesize: bool,
    pub synthesis_prompt: Option<String>,
    pub skip_synthesis_on_failure: bool,
    pub auto_supervise: bool,
    pub supervisor_warn_threshold: Option<f64>,
    pub supervisor_cancel_threshold: Option<f64>,
    pub synthesis_output: Option<String>,
    pub synthesis_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    Assigned,
    Autonomous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncludePolicy {
    Summary,
    Full,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependsOn {
    pub agent_id: String,
    pub include: IncludePolicy,
    /// Bounded expression evaluated over the predecessor's output (rl-swarm::condition).
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutonomousFields {
    pub goal: Option<String>,
    pub capabilities: Vec<String>,
    pub task_types: Vec<String>,
    pub max_tasks: Option<u32>,
    pub max_duration_seconds: Option<u64>,
    pub idle_timeout_seconds: Option<u64>,
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    pub current_task_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmAgent {
    pub id: String,
    pub swarm_id: String,
    pub name: String,
    pub role: Option<String>,
    pub is_synthesis_agent: bool,
    pub mode: AgentMode,
    pub prompt: Option<String>,
    pub personality: Option<String>,
    pub plugins: Vec<String>,
    pub allowed_tools: Vec<String>,
    pub thinking_budget: Option<u32>,
    pub model: Option<String>,
    pub sandbox_mode: bool,
    pub depends_on: Vec<DependsOn>,
    pub status: AgentStatus,
    pub output_text: Option<String>,
    pub output_summary: Option<String>,
    pub error_message: Option<String>,
    pub tool_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub autonomous: AutonomousFields,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task (work queue)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    Ready,
    Claimed,
    InProgress,
    Done,
    Blocked,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub working_dir: String,
    pub title: String,
    pub description: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub context_summary: Option<String>,
    pub scope_paths: Vec<String>,
    pub required_tools: Vec<String>,
    pub task_type: Option<String>,
    pub tags: Vec<String>,
    pub priority: i32,
    pub status: TaskStatus,
    pub blocked_by: Vec<String>,
    pub claimed_by_session_id: Option<String>,
    pub claimed_by_agent_id: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    pub outcome: Option<String>,
    pub completion_notes: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// spec.md §3: a task is `ready` iff all ids in blocked_by are `done`.
    pub fn initial_status(blocked_by_all_done: bool) -> TaskStatus {
        if blocked_by_all_done {
            TaskStatus::Ready
        } else {
            TaskStatus::Blocked
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// task_queue (C11 consolidation jobs; distinct from the work queue above)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuedJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: String,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub status: QueuedJobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationRun {
    pub id: String,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub summarized: u32,
    pub pruned: u32,
    pub merged: u32,
    pub communities: u32,
    pub error: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ambient_notifications (spec.md §6: "Notification create/list/acknowledge/
// fail endpoints"). Routing itself is an out-of-scope collaborator
// (spec.md §1); this table is only the record of what was raised.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Acknowledged,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub session_id: Option<String>,
    pub swarm_id: Option<String>,
    pub kind: String,
    pub message: String,
    pub payload: serde_json::Value,
    pub status: NotificationStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}
