//! Client wire protocol (spec.md §6): inbound control messages and
//! outbound events.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rl_store::types::{SandboxMountType, SandboxNetworkMode};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound (client → daemon)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PersonalityField {
    Single(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputFormatRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub schema: serde_json::Value,
}

/// `new_session`/`update_config` config payload (spec.md §6).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SessionConfigRequest {
    #[serde(default)]
    pub working_dir: String,
    pub output_style: Option<String>,
    pub personality: Option<PersonalityField>,
    pub model: Option<String>,
    pub user_id: Option<String>,
    pub allowed_tools: Option<Vec<String>>,
    pub include_context: Option<bool>,
    pub enable_streaming: Option<bool>,
    pub thinking_budget: Option<u32>,
    pub sandbox_mode: Option<bool>,
    pub sandbox_mount_type: Option<SandboxMountType>,
    pub sandbox_settings: Option<serde_json::Value>,
    pub sandbox_network_mode: Option<SandboxNetworkMode>,
    pub mission_id: Option<String>,
    pub session_name: Option<String>,
    pub auto_approve: Option<bool>,
    pub lean_mode: Option<bool>,
    pub plugins: Option<Vec<String>>,
    pub env: Option<HashMap<String, String>>,
    pub output_format: Option<OutputFormatRequest>,
}

impl SessionConfigRequest {
    fn personality_primary(&self) -> Option<String> {
        match &self.personality {
            Some(PersonalityField::Single(s)) => Some(s.clone()),
            Some(PersonalityField::List(v)) => v.first().cloned(),
            None => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    NewSession {
        config: SessionConfigRequest,
    },
    ResumeSession {
        session_id: String,
        #[serde(default)]
        last_seq: Option<u64>,
        #[serde(default)]
        user_id: Option<String>,
    },
    UpdateConfig {
        config: SessionConfigRequest,
    },
    PermissionResponse {
        request_id: Uuid,
        allowed: bool,
        #[serde(default)]
        deny_message: Option<String>,
    },
    Ping,
    Cancel,
    Query {
        prompt: String,
    },
    Close,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound (daemon → client)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The envelope every outbound event carries (spec.md §6): `{type, data,
/// timestamp, seq}`. `pong` is the one exception — it carries no `seq`.
#[derive(Debug, Clone, Serialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReadyData {
    pub session_id: String,
    pub config: serde_json::Value,
    pub is_locked: bool,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextData {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolUseData {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResultData {
    pub tool_use_id: String,
    pub name: String,
    pub output: serde_json::Value,
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PermissionRequestData {
    pub request_id: Uuid,
    pub tool_name: String,
    pub tool_input: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Timings {
    pub time_to_first_token: Option<u64>,
    pub response_time: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoneData {
    pub response_text: String,
    pub tool_count: u32,
    pub timings: Timings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelledData {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorData {
    pub message: String,
    pub recoverable: bool,
}

/// Helper: resolve the effective working_dir for a `new_session`/
/// `update_config` request, substituting a daemon-managed fallback when
/// the client names a "virtual scheme" chat medium directory (spec.md
/// §4.1 step 3). The fallback directory itself is owned by the caller
/// (gateway bin config); this only detects the scheme.
pub fn is_virtual_working_dir(working_dir: &str) -> bool {
    working_dir.contains("://")
}

impl SessionConfigRequest {
    pub fn personality_tag(&self) -> Option<String> {
        self.personality_primary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_new_session() {
        let json = r#"{"type":"new_session","config":{"working_dir":"/w","personality":"default"}}"#;
        let msg: InboundMessage = serde_json::from_str(json).unwrap();
        match msg {
            InboundMessage::NewSession { config } => {
                assert_eq!(config.working_dir, "/w");
                assert_eq!(config.personality_tag(), Some("default".into()));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_personality_list_uses_first() {
        let json = r#"{"type":"new_session","config":{"working_dir":"/w","personality":["a","b"]}}"#;
        let msg: InboundMessage = serde_json::from_str(json).unwrap();
        match msg {
            InboundMessage::NewSession { config } => {
                assert_eq!(config.personality_tag(), Some("a".into()));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_query() {
        let json = r#"{"type":"query","prompt":"hello"}"#;
        let msg: InboundMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, InboundMessage::Query { prompt } if prompt == "hello"));
    }

    #[test]
    fn parses_permission_response() {
        let id = Uuid::new_v4();
        let json = format!(
            r#"{{"type":"permission_response","request_id":"{id}","allowed":false,"deny_message":"no"}}"#
        );
        let msg: InboundMessage = serde_json::from_str(&json).unwrap();
        match msg {
            InboundMessage::PermissionResponse {
                request_id,
                allowed,
                deny_message,
            } => {
                assert_eq!(request_id, id);
                assert!(!allowed);
                assert_eq!(deny_message.as_deref(), Some("no"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn pong_has_no_seq() {
        let msg = WireMessage {
            kind: "pong".into(),
            data: serde_json::json!({}),
            timestamp: Utc::now(),
            seq: None,
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert!(v.get("seq").is_none());
    }

    #[test]
    fn virtual_working_dir_detection() {
        assert!(is_virtual_working_dir("chat://session-123"));
        assert!(!is_virtual_working_dir("/home/user/project"));
    }
}
