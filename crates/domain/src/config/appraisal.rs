use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Appraisal Engine (C7) / Decay Engine (C8)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppraisalConfig {
    /// Max stimuli flushed in a single appraisal batch (spec.md §4.7
    /// `MAX_BATCH_SIZE`).
    #[serde(default = "d_max_batch")]
    pub max_batch_size: usize,
    /// Window of recent stimuli kept warm per manager (spec.md §4.7
    /// `RECENT_STIMULI_WINDOW = 60 min`).
    #[serde(default = "d_recent_window_mins")]
    pub recent_stimuli_window_mins: i64,
    /// Cap on in-memory recent-stimuli entries (spec.md §4.7
    /// `RECENT_STIMULI_MAX`).
    #[serde(default = "d_recent_max")]
    pub recent_stimuli_max: usize,
    /// Character threshold above which a predecessor/assistant output is
    /// summarized rather than carried in full (spec.md §4.5
    /// `SUMMARY_THRESHOLD`).
    #[serde(default = "d_summary_threshold")]
    pub summary_threshold_chars: usize,
    /// Background decay tick interval.
    #[serde(default = "d_decay_tick_secs")]
    pub decay_tick_secs: u64,
}

impl Default for AppraisalConfig {
    fn default() -> Self {
        Self {
            max_batch_size: d_max_batch(),
            recent_stimuli_window_mins: d_recent_window_mins(),
            recent_stimuli_max: d_recent_max(),
            summary_threshold_chars: d_summary_threshold(),
            decay_tick_secs: d_decay_tick_secs(),
        }
    }
}

fn d_max_batch() -> usize {
    8
}
fn d_recent_window_mins() -> i64 {
    60
}
fn d_recent_max() -> usize {
    50
}
fn d_summary_threshold() -> usize {
    800
}
fn d_decay_tick_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_stimuli_window_matches_spec_constant() {
        assert_eq!(AppraisalConfig::default().recent_stimuli_window_mins, 60);
    }
}
