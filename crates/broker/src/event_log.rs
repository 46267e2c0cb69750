//! Event Log (C5): per-session append-only ring buffer with monotonic
//! sequence numbers (spec.md §4.2).
//!
//! Grounded on the teacher's `ApprovalStore` (`gateway/src/runtime/
//! approval.rs`) for the "single `parking_lot::RwLock`-guarded table,
//! simple insert/list" shape — here the table is a bounded deque instead
//! of a map, since entries are read back in order rather than looked up
//! by key.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// One outgoing event, stamped with its session-scoped sequence number.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub seq: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Bound on the per-session event log (spec.md §3: "N ≥ 500").
pub const MIN_MAX_EVENT_LOG: usize = 500;

/// Per-session (or per-connection, before a session is bound) append-only
/// log. `seq` starts at 1 and is strictly increasing (spec.md §3).
pub struct EventLog {
    entries: Mutex<VecDeque<EventEnvelope>>,
    next_seq: AtomicU64,
    max_len: usize,
}

impl EventLog {
    pub fn new(max_len: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            next_seq: AtomicU64::new(1),
            max_len: max_len.max(MIN_MAX_EVENT_LOG),
        }
    }

    /// Allocate the next seq, stamp the event, append it, and return the
    /// envelope to send to the client. Oldest entries are dropped once the
    /// log exceeds `max_len` (spec.md §4.2).
    pub fn append(&self, event_type: &str, data: serde_json::Value) -> EventEnvelope {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            seq,
            event_type: event_type.to_string(),
            data,
            timestamp: Utc::now(),
        };
        let mut entries = self.entries.lock();
        entries.push_back(envelope.clone());
        while entries.len() > self.max_len {
            entries.pop_front();
        }
        envelope
    }

    /// Replay contract (spec.md §4.2): every retained event with
    /// `seq > last_seq`, in seq order. The caller is responsible for
    /// excluding `session_ready` (sent explicitly before replay) and for
    /// treating a gap (oldest retained seq > last_seq + 1) as out of scope.
    pub fn replay_since(&self, last_seq: u64) -> Vec<EventEnvelope> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.seq > last_seq)
            .cloned()
            .collect()
    }

    pub fn oldest_retained_seq(&self) -> Option<u64> {
        self.entries.lock().front().map(|e| e.seq)
    }
}

/// Session-scoped logs outlive any one connection (spec.md §4.2: a
/// reconnect replays from the same log), so they live in a registry keyed
/// by session_id rather than owned directly by a `Connection`.
pub struct EventLogRegistry {
    logs: Mutex<HashMap<String, Arc<EventLog>>>,
    max_len: usize,
}

impl EventLogRegistry {
    pub fn new(max_len: usize) -> Self {
        Self {
            logs: Mutex::new(HashMap::new()),
            max_len,
        }
    }

    pub fn get_or_create(&self, session_id: &str) -> Arc<EventLog> {
        let mut logs = self.logs.lock();
        logs.entry(session_id.to_string())
            .or_insert_with(|| Arc::new(EventLog::new(self.max_len)))
            .clone()
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<EventLog>> {
        self.logs.lock().get(session_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_strictly_increasing_starting_at_one() {
        let log = EventLog::new(500);
        let a = log.append("text", serde_json::json!({"text": "he"}));
        let b = log.append("text", serde_json::json!({"text": "llo"}));
        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
    }

    #[test]
    fn replay_since_excludes_up_to_and_including_last_seq() {
        let log = EventLog::new(500);
        log.append("a", serde_json::json!({}));
        log.append("b", serde_json::json!({}));
        log.append("c", serde_json::json!({}));
        let replayed = log.replay_since(1);
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].seq, 2);
        assert_eq!(replayed[1].seq, 3);
    }

    #[test]
    fn bounded_to_max_len_drops_oldest() {
        let log = EventLog::new(MIN_MAX_EVENT_LOG);
        for _ in 0..(MIN_MAX_EVENT_LOG + 10) {
            log.append("tick", serde_json::json!({}));
        }
        let oldest = log.oldest_retained_seq().unwrap();
        assert_eq!(oldest, 11);
    }

    #[test]
    fn registry_returns_same_log_for_same_session() {
        let reg = EventLogRegistry::new(500);
        let a = reg.get_or_create("s1");
        a.append("text", serde_json::json!({}));
        let b = reg.get_or_create("s1");
        assert_eq!(b.replay_since(0).len(), 1);
    }

    #[test]
    fn registry_keeps_sessions_independent() {
        let reg = EventLogRegistry::new(500);
        reg.get_or_create("s1").append("a", serde_json::json!({}));
        let s2 = reg.get_or_create("s2");
        assert!(s2.replay_since(0).is_empty());
    }

    #[test]
    fn max_len_floor_is_enforced() {
        let log = EventLog::new(5);
        for _ in 0..(MIN_MAX_EVENT_LOG + 1) {
            log.append("tick", serde_json::json!({}));
        }
        assert!(log.oldest_retained_seq().unwrap() <= 2);
    }
}
