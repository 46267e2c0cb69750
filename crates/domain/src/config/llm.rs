use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auxiliary LLM client config
//
// This is NOT the agent backend (that is an opaque subprocess reached
// through `rl-transport`). It configures the single structured-output
// model the daemon calls itself: appraisal judgments (C7), dependency-
// output summaries and condition evaluation context (C9).
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_20000u")]
    pub default_timeout_ms: u64,
    #[serde(default = "d_2")]
    pub max_retries: u32,
    /// Startup policy when the configured provider fails to initialize.
    #[serde(default)]
    pub startup_policy: LlmStartupPolicy,
    /// The auxiliary structured-output provider. `None` disables appraisal
    /// judgments and dependency summarization (callers fall back to
    /// heuristics — see `rl-appraisal` and `rl-swarm`).
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 20_000,
            max_retries: 2,
            startup_policy: LlmStartupPolicy::AllowNone,
            provider: None,
        }
    }
}

/// Controls how the gateway handles auxiliary-provider init failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LlmStartupPolicy {
    /// Gateway boots even if the provider fails to initialize; appraisal
    /// falls back to raw physics-only intensity, synthesis skips
    /// LLM-backed summarization.
    #[default]
    AllowNone,
    /// Abort startup if the provider fails to initialize.
    RequireOne,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    OpenaiCompat,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// Header name (e.g. "Authorization", "x-api-key").
    #[serde(default)]
    pub header: Option<String>,
    /// Header value prefix (e.g. "Bearer ").
    #[serde(default)]
    pub prefix: Option<String>,
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key (for config-only setups; prefer env).
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    ApiKey,
    None,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_20000u() -> u64 {
    20_000
}
fn d_2() -> u32 {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_config_default_has_no_provider() {
        let config = LlmConfig::default();
        assert!(config.provider.is_none());
        assert_eq!(config.startup_policy, LlmStartupPolicy::AllowNone);
    }

    #[test]
    fn provider_config_deserializes() {
        let json = r#"{
            "provider": {
                "id": "anthropic",
                "kind": "anthropic",
                "base_url": "https://api.anthropic.com",
                "auth": { "mode": "api_key", "env": "ANTHROPIC_API_KEY" },
                "default_model": "claude-sonnet-4-5"
            }
        }"#;
        let config: LlmConfig = serde_json::from_str(json).unwrap();
        let provider = config.provider.unwrap();
        assert_eq!(provider.id, "anthropic");
        assert_eq!(provider.kind, ProviderKind::Anthropic);
        assert_eq!(provider.auth.env.as_deref(), Some("ANTHROPIC_API_KEY"));
    }
}
