//! Provider registry.
//!
//! Constructs and holds the single configured auxiliary LLM provider. At
//! startup the registry reads the [`LlmConfig`], resolves authentication
//! (env var or plaintext), and instantiates the Anthropic adapter if
//! configured.

use crate::anthropic::AnthropicProvider;
use crate::traits::LlmProvider;
use rl_domain::config::{LlmConfig, LlmStartupPolicy, ProviderKind};
use rl_domain::error::{Error, Result};
use std::sync::Arc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds the instantiated auxiliary LLM provider, if any.
///
/// Callers (appraisal judgments, swarm synthesis/condition summarization)
/// check [`Self::provider`] and fall back to heuristics when it is `None`.
pub struct ProviderRegistry {
    provider: Option<Arc<dyn LlmProvider>>,
    /// Set when a configured provider failed to initialize, masked of
    /// any secrets, for surfacing via `relayd doctor`.
    init_error: Option<String>,
}

/// Mask substrings that look like API keys or bearer tokens in an error
/// message so raw secrets never leak into logs or doctor output.
fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = if trimmed.len() > 8 {
                format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..])
            } else {
                "***masked***".to_string()
            };
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

impl ProviderRegistry {
    /// Build the registry from the application's [`LlmConfig`].
    ///
    /// A failed init is logged and recorded rather than aborting startup,
    /// unless `startup_policy` is `RequireOne`.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let Some(pc) = config.provider.as_ref() else {
            return Ok(Self {
                provider: None,
                init_error: None,
            });
        };

        let result: Result<Arc<dyn LlmProvider>> = match pc.kind {
            ProviderKind::Anthropic => {
                AnthropicProvider::from_config(pc).map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
            }
            ProviderKind::OpenaiCompat => Err(Error::Config(
                "provider kind 'openai_compat' is not implemented in this build".into(),
            )),
        };

        match result {
            Ok(provider) => {
                tracing::info!(provider_id = %pc.id, kind = ?pc.kind, "registered auxiliary LLM provider");
                Ok(Self {
                    provider: Some(provider),
                    init_error: None,
                })
            }
            Err(e) => {
                let safe_error = mask_secrets(&e.to_string());
                tracing::warn!(
                    provider_id = %pc.id,
                    kind = ?pc.kind,
                    error = %safe_error,
                    "failed to initialize auxiliary LLM provider"
                );
                if config.startup_policy == LlmStartupPolicy::RequireOne {
                    return Err(Error::Config(format!(
                        "auxiliary LLM provider failed to initialize (startup_policy = require_one): {safe_error}"
                    )));
                }
                Ok(Self {
                    provider: None,
                    init_error: Some(safe_error),
                })
            }
        }
    }

    /// The configured auxiliary provider, if initialized successfully.
    pub fn provider(&self) -> Option<Arc<dyn LlmProvider>> {
        self.provider.clone()
    }

    /// Whether a usable provider is registered.
    pub fn is_empty(&self) -> bool {
        self.provider.is_none()
    }

    /// The masked initialization error, if the configured provider failed.
    pub fn init_error(&self) -> Option<&str> {
        self.init_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_yields_empty_registry() {
        let config = LlmConfig::default();
        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert!(registry.is_empty());
        assert!(registry.init_error().is_none());
    }

    #[test]
    fn mask_secrets_redacts_long_tokens() {
        let masked = mask_secrets("failed with key sk-ant-REDACTED");
        assert!(!masked.contains("abcdefghijklmnopqrstuvwxyz"));
    }
}
