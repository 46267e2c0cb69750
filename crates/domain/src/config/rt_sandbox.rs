use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sandbox Supervisor (C3)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Idle reaper tick interval (spec.md §4.3: "≥ 30s").
    #[serde(default = "d_tick_secs")]
    pub reaper_tick_secs: u64,
    /// Idle timeout before an unused sandbox is reaped (spec.md §4.3:
    /// "≥ 30 minutes").
    #[serde(default = "d_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Launcher command for the container runtime, e.g. a CLI wrapper the
    /// gateway shells out to. Left empty disables sandboxing entirely
    /// (`sandbox_mode` requests then fail at `new_session`/`update_config`).
    #[serde(default)]
    pub launcher_command: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            reaper_tick_secs: d_tick_secs(),
            idle_timeout_secs: d_idle_timeout_secs(),
            launcher_command: String::new(),
        }
    }
}

fn d_tick_secs() -> u64 {
    30
}
fn d_idle_timeout_secs() -> u64 {
    30 * 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_meet_spec_minimums() {
        let cfg = SandboxConfig::default();
        assert!(cfg.reaper_tick_secs >= 30);
        assert!(cfg.idle_timeout_secs >= 30 * 60);
    }
}
