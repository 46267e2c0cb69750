mod appraisal;
mod broker;
mod consolidation;
mod llm;
mod observability;
mod queue;
mod quota;
mod rt_sandbox;
mod server;
mod swarm;

pub use appraisal::*;
pub use broker::*;
pub use consolidation::*;
pub use llm::*;
pub use observability::*;
pub use queue::*;
pub use quota::*;
pub use rt_sandbox::*;
pub use server::*;
pub use swarm::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
//
// One section per concern, following the teacher's `#[serde(default =
// "d_xxx")]`-helper, one-file-per-section pattern. Each new section below
// corresponds to one spec.md §2 component; `server`/`observability`/
// `quota` are the ambient stack any production daemon in this codebase
// carries regardless of feature scope.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    /// C2 Agent Transport launch config.
    #[serde(default)]
    pub agent_backend: rl_transport_config::AgentBackendConfigSection,
    /// C4/C5/C6.
    #[serde(default)]
    pub broker: BrokerConfig,
    /// C3.
    #[serde(default)]
    pub sandbox: SandboxConfig,
    /// C7/C8.
    #[serde(default)]
    pub appraisal: AppraisalConfig,
    /// C9.
    #[serde(default)]
    pub swarm: SwarmConfig,
    /// C10.
    #[serde(default)]
    pub queue: QueueConfig,
    /// C11.
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    /// Where the Store Gateway (C1) keeps its JSON tables.
    #[serde(default = "d_data_dir")]
    pub data_dir: String,
}

fn d_data_dir() -> String {
    "./data".into()
}

/// `rl-transport`'s `AgentBackendConfig` lives in that crate (it's the
/// launch contract, not a generic config concern) but still needs a home
/// in the composed `Config` the way `mcp.rs` held `McpServerConfig` in the
/// teacher. A thin mirror module avoids a dependency cycle (`rl-transport`
/// does not depend on `rl-domain::config`); `gateway::bootstrap` maps one
/// onto the other field-for-field.
pub mod rl_transport_config {
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    #[derive(Debug, Clone, Serialize, Deserialize, Default)]
    pub struct AgentBackendConfigSection {
        pub command: String,
        #[serde(default)]
        pub args: Vec<String>,
        #[serde(default)]
        pub env: HashMap<String, String>,
        #[serde(default = "d_resume_arg")]
        pub resume_arg: Option<String>,
        #[serde(default = "d_startup_timeout_ms")]
        pub startup_timeout_ms: u64,
    }

    fn d_resume_arg() -> Option<String> {
        Some("--resume".into())
    }
    fn d_startup_timeout_ms() -> u64 {
        10_000
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Environment variable holding the admin bearer token.
    /// If the env var is unset, admin endpoints are **disabled** (403).
    #[serde(default = "d_admin_token_env")]
    pub token_env: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            token_env: d_admin_token_env(),
        }
    }
}

fn d_admin_token_env() -> String {
    "RELAYD_ADMIN_TOKEN".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues. Checked at
    /// startup (`relayd doctor`, and implicitly by `serve`) before binding
    /// the socket — an `Error`-severity issue aborts startup.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }
        if self.data_dir.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "data_dir".into(),
                message: "data_dir must not be empty".into(),
            });
        }
        if self.agent_backend.command.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "agent_backend.command".into(),
                message: "agent_backend.command must name the agent backend executable".into(),
            });
        }

        match &self.llm.provider {
            None => {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: "llm.provider".into(),
                    message: "no auxiliary LLM provider configured — appraisal judgments \
                              and swarm synthesis will fall back to heuristics"
                        .into(),
                });
            }
            Some(provider) => {
                if provider.id.is_empty() {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: "llm.provider.id".into(),
                        message: "provider id must not be empty".into(),
                    });
                }
                if provider.base_url.is_empty() {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: "llm.provider.base_url".into(),
                        message: "provider base_url must not be empty".into(),
                    });
                }
                if !provider.base_url.is_empty()
                    && !provider.base_url.starts_with("http://")
                    && !provider.base_url.starts_with("https://")
                {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: "llm.provider.base_url".into(),
                        message: format!(
                            "base_url must start with http:// or https:// (got \"{}\")",
                            provider.base_url
                        ),
                    });
                }
                if provider.auth.mode == AuthMode::ApiKey {
                    let has_env = provider.auth.env.as_ref().is_some_and(|v| !v.is_empty());
                    let has_key = provider.auth.key.as_ref().is_some_and(|v| !v.is_empty());
                    if !has_env && !has_key {
                        errors.push(ConfigError {
                            severity: ConfigSeverity::Error,
                            field: "llm.provider.auth".into(),
                            message: format!(
                                "provider \"{}\" uses {:?} auth mode but has no auth.env or auth.key configured",
                                provider.id, provider.auth.mode
                            ),
                        });
                    }
                }
            }
        }

        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)".into(),
            });
        }

        if let Some(rl) = &self.server.rate_limit {
            if rl.requests_per_second == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.requests_per_second".into(),
                    message: "requests_per_second must be greater than 0".into(),
                });
            }
            if rl.burst_size == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.burst_size".into(),
                    message: "burst_size must be greater than 0".into(),
                });
            }
        }

        if self.broker.max_event_log < 500 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "broker.max_event_log".into(),
                message: "spec.md §2 C5 requires N ≥ 500".into(),
            });
        }
        if self.broker.permission_timeout_ms < 5 * 60 * 1000 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "broker.permission_timeout_ms".into(),
                message: "spec.md §4.4 requires a deadline ≥ 5 minutes".into(),
            });
        }
        if self.sandbox.reaper_tick_secs < 30 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sandbox.reaper_tick_secs".into(),
                message: "spec.md §4.3 requires a tick ≥ 30s".into(),
            });
        }
        if self.sandbox.idle_timeout_secs < 30 * 60 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sandbox.idle_timeout_secs".into(),
                message: "spec.md §4.3 requires an idle timeout ≥ 30 minutes".into(),
            });
        }
        if self.consolidation.poll_secs < 60 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "consolidation.poll_secs".into(),
                message: "spec.md §5 requires a poll tick ≥ 60s".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            server: ServerConfig {
                port: 3210,
                host: "127.0.0.1".into(),
                ..ServerConfig::default()
            },
            agent_backend: rl_transport_config::AgentBackendConfigSection {
                command: "relayd-agent".into(),
                ..Default::default()
            },
            llm: LlmConfig {
                provider: Some(ProviderConfig {
                    id: "anthropic".into(),
                    kind: ProviderKind::Anthropic,
                    base_url: "https://api.anthropic.com".into(),
                    auth: AuthConfig {
                        mode: AuthMode::ApiKey,
                        env: Some("ANTHROPIC_API_KEY".into()),
                        ..AuthConfig::default()
                    },
                    default_model: None,
                }),
                ..LlmConfig::default()
            },
            ..Config::default()
        }
    }

    fn find_issue<'a>(issues: &'a [ConfigError], field_prefix: &str) -> Option<&'a ConfigError> {
        issues.iter().find(|e| e.field.starts_with(field_prefix))
    }

    #[test]
    fn valid_config_passes() {
        let issues = valid_config().validate();
        let errors: Vec<_> = issues.iter().filter(|e| e.severity == ConfigSeverity::Error).collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn server_port_zero_is_error() {
        let mut cfg = valid_config();
        cfg.server.port = 0;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "server.port").expect("expected server.port error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn missing_agent_backend_command_is_error() {
        let mut cfg = valid_config();
        cfg.agent_backend.command.clear();
        let issues = cfg.validate();
        assert!(find_issue(&issues, "agent_backend.command").is_some());
    }

    #[test]
    fn provider_base_url_invalid_scheme_is_error() {
        let mut cfg = valid_config();
        cfg.llm.provider.as_mut().unwrap().base_url = "ws://localhost:1234".into();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "llm.provider.base_url")
            .expect("expected provider base_url error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn provider_api_key_mode_no_credentials_is_error() {
        let mut cfg = valid_config();
        cfg.llm.provider.as_mut().unwrap().auth = AuthConfig {
            mode: AuthMode::ApiKey,
            env: None,
            key: None,
            ..AuthConfig::default()
        };
        let issues = cfg.validate();
        let issue = find_issue(&issues, "llm.provider.auth").expect("expected auth error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn no_provider_is_warning() {
        let mut cfg = valid_config();
        cfg.llm.provider = None;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "llm.provider").expect("expected no-provider warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn cors_wildcard_is_warning() {
        let mut cfg = valid_config();
        cfg.server.cors.allowed_origins = vec!["*".into()];
        let issues = cfg.validate();
        let issue = find_issue(&issues, "server.cors.allowed_origins")
            .expect("expected CORS wildcard warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn rate_limit_zero_rps_is_error() {
        let mut cfg = valid_config();
        cfg.server.rate_limit = Some(RateLimitConfig {
            requests_per_second: 0,
            burst_size: 100,
        });
        let issues = cfg.validate();
        let issue = find_issue(&issues, "server.rate_limit.requests_per_second")
            .expect("expected rps error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn broker_event_log_below_minimum_is_error() {
        let mut cfg = valid_config();
        cfg.broker.max_event_log = 10;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "broker.max_event_log").is_some());
    }

    #[test]
    fn sandbox_idle_timeout_below_minimum_is_error() {
        let mut cfg = valid_config();
        cfg.sandbox.idle_timeout_secs = 60;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "sandbox.idle_timeout_secs").is_some());
    }

    #[test]
    fn config_error_display_format() {
        let err = ConfigError {
            severity: ConfigSeverity::Error,
            field: "server.port".into(),
            message: "port must be greater than 0".into(),
        };
        assert_eq!(
            format!("{err}"),
            "[ERROR] server.port: port must be greater than 0"
        );
    }
}
