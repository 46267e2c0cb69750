//! Cache entry for a live sandboxed session (spec.md §3 SandboxSession).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Per-session sandbox configuration, supplied at `ensure` time and
/// refreshed on every call (spec.md §4.3: "update its config and
/// last_activity and return it").
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub working_dir: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub thinking_budget: Option<u32>,
    pub allowed_tools: Vec<String>,
    pub mount_type: rl_store::types::SandboxMountType,
    pub network_mode: rl_store::types::SandboxNetworkMode,
    pub plugins: Vec<String>,
    pub env: std::collections::HashMap<String, String>,
}

/// A cached sandbox entry. One per session_id, at most.
///
/// The actual agent-backend process is not held resident here: each turn
/// spawns a fresh [`rl_transport::AgentProcess`] resumed via
/// `agent_session_id`, so what this cache tracks is session continuity
/// (the resume token, activity clock, and the refcount that keeps the
/// idle reaper from pulling the rug out mid-query) rather than a live OS
/// handle. This is the `(a,b,c) -> Session` resume contract from spec.md
/// §3 applied literally: the "runner" is re-attached, not kept alive.
pub struct SandboxEntry {
    pub session_id: String,
    pub run_config: Mutex<RunConfig>,
    pub agent_session_id: Mutex<Option<String>>,
    pub created_at: DateTime<Utc>,
    last_activity: Mutex<DateTime<Utc>>,
    active_queries: AtomicU32,
    locked: AtomicBool,
}

impl SandboxEntry {
    pub fn new(session_id: String, run_config: RunConfig) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            run_config: Mutex::new(run_config),
            agent_session_id: Mutex::new(None),
            created_at: now,
            last_activity: Mutex::new(now),
            active_queries: AtomicU32::new(0),
            locked: AtomicBool::new(false),
        }
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Utc::now();
    }

    pub fn update_config(&self, run_config: RunConfig) {
        *self.run_config.lock() = run_config;
        self.touch();
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.lock()
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    pub fn lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    pub fn active_queries(&self) -> u32 {
        self.active_queries.load(Ordering::SeqCst)
    }

    pub fn begin_query(&self) {
        self.active_queries.fetch_add(1, Ordering::SeqCst);
        self.touch();
    }

    pub fn end_query(&self) {
        self.active_queries.fetch_sub(1, Ordering::SeqCst);
        self.touch();
    }

    pub fn set_agent_session_id(&self, id: String) {
        *self.agent_session_id.lock() = Some(id);
    }
}
