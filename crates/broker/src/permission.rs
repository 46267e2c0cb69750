//! Permission Arbiter (C4): spec.md §4.4.
//!
//! Grounded directly on the teacher's `ApprovalStore`
//! (`gateway/src/runtime/approval.rs`): a `parking_lot::RwLock`-guarded
//! map of pending requests, each resolved exactly once via a
//! `tokio::sync::oneshot::Sender`, with explicit `remove_expired` and
//! `list_pending` for introspection. Differs from the teacher in the
//! resolution vocabulary (allow-with-original-input / deny-with-interrupt,
//! per spec.md §4.4) rather than a bare approve/deny pair.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Permission request deadline floor (spec.md §4.4: "≥ 5 minutes").
pub const MIN_PERMISSION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How a pending permission request was resolved.
#[derive(Debug, Clone)]
pub enum PermissionResolution {
    /// Allow the tool call to proceed with its original input.
    Allow { tool_input: serde_json::Value },
    /// Deny the tool call. `interrupt` tells the caller to also interrupt
    /// the in-flight query (true for timeout/connection-close, matches the
    /// explicit choice the client made for `permission_response`).
    Deny { message: String, interrupt: bool },
}

struct PendingPermission {
    tool_name: String,
    tool_input: serde_json::Value,
    created_at: DateTime<Utc>,
    respond: oneshot::Sender<PermissionResolution>,
}

/// Serializable snapshot for `permission_request` emission / introspection.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionInfo {
    pub request_id: Uuid,
    pub tool_name: String,
    pub tool_input: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Per-connection table of outstanding tool-use authorization requests
/// (spec.md §3 PendingPermission, §4.4).
pub struct PermissionArbiter {
    pending: RwLock<HashMap<Uuid, PendingPermission>>,
    timeout: Duration,
}

impl PermissionArbiter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            timeout: timeout.max(MIN_PERMISSION_TIMEOUT),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a new request, returning its id, a snapshot to emit as
    /// `permission_request`, and a receiver the caller awaits (bounded by
    /// `self.timeout()` — see `connection.rs`).
    pub fn register(
        &self,
        tool_name: String,
        tool_input: serde_json::Value,
    ) -> (Uuid, PermissionInfo, oneshot::Receiver<PermissionResolution>) {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let created_at = Utc::now();
        let info = PermissionInfo {
            request_id: id,
            tool_name: tool_name.clone(),
            tool_input: tool_input.clone(),
            created_at,
        };
        self.pending.write().insert(
            id,
            PendingPermission {
                tool_name,
                tool_input,
                created_at,
                respond: tx,
            },
        );
        (id, info, rx)
    }

    /// `permission_response{request_id, allowed, deny_message?}` resolution
    /// path. Returns `true` if a pending request was found and resolved.
    pub fn resolve(&self, request_id: &Uuid, allowed: bool, deny_message: Option<String>) -> bool {
        let Some(pending) = self.pending.write().remove(request_id) else {
            return false;
        };
        let resolution = if allowed {
            PermissionResolution::Allow {
                tool_input: pending.tool_input,
            }
        } else {
            PermissionResolution::Deny {
                message: deny_message.unwrap_or_else(|| "Permission denied".into()),
                interrupt: true,
            }
        };
        let _ = pending.respond.send(resolution);
        true
    }

    /// Deadline-passed resolution path (spec.md §4.4): deny-with-interrupt,
    /// "Permission request timed out".
    pub fn resolve_timeout(&self, request_id: &Uuid) {
        if let Some(pending) = self.pending.write().remove(request_id) {
            let _ = pending.respond.send(PermissionResolution::Deny {
                message: "Permission request timed out".into(),
                interrupt: true,
            });
        }
    }

    /// Connection-close resolution path (spec.md §4.4): every outstanding
    /// request on this connection resolves as deny-with-interrupt,
    /// "WebSocket connection closed". The arbiter MUST NOT leave the agent
    /// backend waiting after the connection dies.
    pub fn resolve_all_on_close(&self) {
        let mut pending = self.pending.write();
        for (_, p) in pending.drain() {
            let _ = p.respond.send(PermissionResolution::Deny {
                message: "WebSocket connection closed".into(),
                interrupt: true,
            });
        }
    }

    pub fn list_pending(&self) -> Vec<PermissionInfo> {
        self.pending
            .read()
            .iter()
            .map(|(id, p)| PermissionInfo {
                request_id: *id,
                tool_name: p.tool_name.clone(),
                tool_input: p.tool_input.clone(),
                created_at: p.created_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arbiter() -> PermissionArbiter {
        PermissionArbiter::new(Duration::from_secs(300))
    }

    #[test]
    fn timeout_is_floored_to_minimum() {
        let a = PermissionArbiter::new(Duration::from_secs(1));
        assert_eq!(a.timeout(), MIN_PERMISSION_TIMEOUT);
    }

    #[tokio::test]
    async fn resolve_allow_returns_original_input() {
        let a = arbiter();
        let (id, _info, rx) = a.register("Bash".into(), serde_json::json!({"cmd": "ls"}));
        assert!(a.resolve(&id, true, None));
        match rx.await.unwrap() {
            PermissionResolution::Allow { tool_input } => {
                assert_eq!(tool_input, serde_json::json!({"cmd": "ls"}));
            }
            _ => panic!("expected Allow"),
        }
        assert!(a.list_pending().is_empty());
    }

    #[tokio::test]
    async fn resolve_deny_carries_message() {
        let a = arbiter();
        let (id, _info, rx) = a.register("Bash".into(), serde_json::json!({}));
        assert!(a.resolve(&id, false, Some("no".into())));
        match rx.await.unwrap() {
            PermissionResolution::Deny { message, interrupt } => {
                assert_eq!(message, "no");
                assert!(interrupt);
            }
            _ => panic!("expected Deny"),
        }
    }

    #[tokio::test]
    async fn resolve_timeout_denies_with_interrupt() {
        let a = arbiter();
        let (id, _info, rx) = a.register("Bash".into(), serde_json::json!({}));
        a.resolve_timeout(&id);
        match rx.await.unwrap() {
            PermissionResolution::Deny { message, interrupt } => {
                assert_eq!(message, "Permission request timed out");
                assert!(interrupt);
            }
            _ => panic!("expected Deny"),
        }
    }

    #[tokio::test]
    async fn resolve_all_on_close_denies_every_pending() {
        let a = arbiter();
        let (_id1, _info1, rx1) = a.register("Bash".into(), serde_json::json!({}));
        let (_id2, _info2, rx2) = a.register("Read".into(), serde_json::json!({}));
        a.resolve_all_on_close();
        for rx in [rx1, rx2] {
            match rx.await.unwrap() {
                PermissionResolution::Deny { message, .. } => {
                    assert_eq!(message, "WebSocket connection closed");
                }
                _ => panic!("expected Deny"),
            }
        }
        assert!(a.list_pending().is_empty());
    }

    #[test]
    fn resolve_nonexistent_returns_false() {
        let a = arbiter();
        assert!(!a.resolve(&Uuid::new_v4(), true, None));
    }
}
