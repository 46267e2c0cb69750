//! Sandbox Supervisor (C3): `ensure`/reap semantics over the
//! [`SandboxEntry`] cache (spec.md §4.3).
//!
//! Grounded on `sessions::lifecycle::LifecycleManager`'s fixed-tick,
//! elapsed-time-vs-threshold reset check — the idle reaper here is the
//! same shape, evaluated per cache entry instead of per inbound message.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use rl_domain::error::Result;
use rl_store::StoreGateway;

use crate::entry::{RunConfig, SandboxEntry};

/// Minimum idle reaper tick interval (spec.md §4.3: "≥ 30s").
pub const MIN_TICK_INTERVAL: Duration = Duration::from_secs(30);
/// Minimum idle timeout before a sandbox is eligible for reaping
/// (spec.md §4.3: "≥ 30 minutes").
pub const MIN_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub enum SandboxOutcome {
    /// An active (unlocked) entry, newly created or refreshed.
    Active(Arc<SandboxEntry>),
    /// The entry was locked; it has been evicted and the Session persisted
    /// as locked. The caller surfaces the lock to the client.
    Locked,
}

pub struct SandboxSupervisor {
    store: Arc<StoreGateway>,
    entries: Mutex<HashMap<String, Arc<SandboxEntry>>>,
    idle_timeout: Duration,
}

impl SandboxSupervisor {
    pub fn new(store: Arc<StoreGateway>, idle_timeout: Duration) -> Self {
        let idle_timeout = idle_timeout.max(MIN_IDLE_TIMEOUT);
        Self {
            store,
            entries: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// spec.md §4.3 `ensure`.
    pub fn ensure(&self, session_id: &str, run_config: RunConfig) -> Result<SandboxOutcome> {
        let existing = self.entries.lock().get(session_id).cloned();
        if let Some(entry) = existing {
            if entry.is_locked() {
                self.entries.lock().remove(session_id);
                self.store
                    .update_session_fields(session_id, |s| s.is_locked = true)?;
                return Ok(SandboxOutcome::Locked);
            }
            entry.update_config(run_config);
            return Ok(SandboxOutcome::Active(entry));
        }

        let entry = Arc::new(SandboxEntry::new(session_id.to_string(), run_config));
        self.entries
            .lock()
            .insert(session_id.to_string(), entry.clone());
        Ok(SandboxOutcome::Active(entry))
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SandboxEntry>> {
        self.entries.lock().get(session_id).cloned()
    }

    /// Drop any cached entry for `session_id` without touching its lock
    /// state (spec.md §4.1 `update_config`: "if sandbox mode turned off,
    /// closes any cached sandbox"). No live process to tear down — see
    /// [`SandboxEntry`]'s doc comment.
    pub fn close(&self, session_id: &str) {
        self.entries.lock().remove(session_id);
    }

    /// Record a freshly-assigned agent_session_id both in the cache entry
    /// and on the persisted Session row (spec.md §3 Session invariant:
    /// assigned at first sight and on any change).
    pub fn record_agent_session_id(&self, session_id: &str, agent_session_id: String) -> Result<()> {
        if let Some(entry) = self.get(session_id) {
            entry.set_agent_session_id(agent_session_id.clone());
        }
        self.store
            .update_session_fields(session_id, |s| s.agent_session_id = Some(agent_session_id))?;
        Ok(())
    }

    /// spec.md §4.3 idle reaper: run this once per tick from an external
    /// `tokio::time::interval` loop of at least [`MIN_TICK_INTERVAL`].
    pub fn reap_idle(&self) -> Result<Vec<String>> {
        let now = chrono::Utc::now();
        let candidates: Vec<(String, Arc<SandboxEntry>)> = self
            .entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut reaped = Vec::new();
        for (session_id, entry) in candidates {
            if entry.active_queries() > 0 {
                continue;
            }
            let idle_for = now.signed_duration_since(entry.last_activity());
            if idle_for.num_seconds() < self.idle_timeout.as_secs() as i64 {
                continue;
            }
            entry.lock();
            self.entries.lock().remove(&session_id);
            self.store
                .update_session_fields(&session_id, |s| s.is_locked = true)?;
            reaped.push(session_id);
        }
        Ok(reaped)
    }
}
