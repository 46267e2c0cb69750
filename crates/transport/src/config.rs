//! Agent backend launch configuration.
//!
//! Shape mirrors `rl_domain::config::McpServerConfig` (command/args/env),
//! since both describe "spawn a subprocess and talk newline-delimited JSON
//! over stdio" — this is the same launch contract, just for the one
//! process that actually runs turns instead of an MCP tool server.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBackendConfig {
    /// Executable to spawn (e.g. the agent CLI binary).
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Flag name used to resume a prior agent session, e.g. `"--resume"`.
    /// When `None`, attach is not supported and every invocation starts a
    /// fresh agent-side session.
    #[serde(default = "d_resume_arg")]
    pub resume_arg: Option<String>,
    #[serde(default = "d_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

impl Default for AgentBackendConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            resume_arg: d_resume_arg(),
            startup_timeout_ms: d_startup_timeout_ms(),
        }
    }
}

fn d_resume_arg() -> Option<String> {
    Some("--resume".into())
}

fn d_startup_timeout_ms() -> u64 {
    10_000
}
