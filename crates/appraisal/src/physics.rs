//! Physics layer (spec.md §4.7): bounds a raw appraisal judgment into an
//! intensity delta, incorporating recent-stimuli history, time since the
//! last major change, social context and per-emotion characteristics.
//! Pure and deterministic: identical inputs always produce the identical
//! output (spec.md §8 idempotence).

use rl_store::types::StimulusHistory;

use crate::profile::profile_for;

/// Social/environmental state at the moment of appraisal. Distinct from
/// `DecayContext` — physics cares about moment-to-moment presence, decay
/// cares about sustained context over an elapsed window.
#[derive(Debug, Clone, Copy)]
pub struct SocialContext {
    pub is_user_present: bool,
    pub is_user_engaged: bool,
}

/// Everything `calculate_intensity_change` needs beyond the raw judgment.
pub struct PhysicsContext<'a> {
    pub recent_stimuli: &'a [StimulusHistory],
    pub minutes_since_major_change: f64,
    pub social_context: SocialContext,
    /// The currently active intensity for this emotion type, if any —
    /// gives the change inertia instead of jumping straight to the raw
    /// judgment.
    pub current_intensity: Option<f64>,
}

/// Computes the bounded intensity this emotion type should settle at,
/// given a raw (unbounded, model-proposed) intensity. Always in [0, 100].
pub fn calculate_intensity_change(
    emotion_type: &str,
    raw_intensity: f64,
    ctx: &PhysicsContext,
) -> f64 {
    let profile = profile_for(emotion_type);
    let raw = raw_intensity.clamp(0.0, 100.0);

    // Inertia: blend with the currently active value so a single
    // appraisal can't swing intensity instantaneously.
    let blended = match ctx.current_intensity {
        Some(current) => current * 0.3 + raw * 0.7,
        None => raw,
    };

    // Habituation: repeated stimuli of the same type in the recent
    // window dampen the marginal effect of one more.
    let same_type_recent = ctx
        .recent_stimuli
        .iter()
        .filter(|s| s.stimulus_type == emotion_type)
        .count();
    let habituation = 1.0 / (1.0 + 0.1 * same_type_recent as f64);

    // Freshness: a long quiet period since the last major change makes
    // the manager more receptive to a new one; a very recent change
    // damps it (saturation).
    let freshness = if ctx.minutes_since_major_change < 1.0 {
        0.6
    } else if ctx.minutes_since_major_change > 30.0 {
        1.15
    } else {
        1.0
    };

    // Social amplification, scaled by this type's social relevance.
    let mut social = 1.0;
    if ctx.social_context.is_user_present {
        social += 0.15 * profile.social_relevance;
    }
    if ctx.social_context.is_user_engaged {
        social += 0.1 * profile.social_relevance;
    }

    (blended * habituation * freshness * social).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ctx<'a>(recent: &'a [StimulusHistory]) -> PhysicsContext<'a> {
        PhysicsContext {
            recent_stimuli: recent,
            minutes_since_major_change: 15.0,
            social_context: SocialContext {
                is_user_present: true,
                is_user_engaged: true,
            },
            current_intensity: None,
        }
    }

    #[test]
    fn result_is_always_bounded() {
        let empty: Vec<StimulusHistory> = vec![];
        let c = ctx(&empty);
        assert!((0.0..=100.0).contains(&calculate_intensity_change("joy", 500.0, &c)));
        assert!((0.0..=100.0).contains(&calculate_intensity_change("joy", -50.0, &c)));
    }

    #[test]
    fn identical_inputs_are_idempotent() {
        let empty: Vec<StimulusHistory> = vec![];
        let c = ctx(&empty);
        let a = calculate_intensity_change("pride", 72.0, &c);
        let b = calculate_intensity_change("pride", 72.0, &c);
        assert_eq!(a, b);
    }

    #[test]
    fn repeated_stimuli_habituate() {
        let empty: Vec<StimulusHistory> = vec![];
        let mut recent = vec![];
        for _ in 0..5 {
            recent.push(StimulusHistory {
                id: uuid::Uuid::new_v4().to_string(),
                session_id: None,
                timestamp: Utc::now(),
                stimulus_type: "anger".to_string(),
                valence: -5.0,
                intensity: 40.0,
                context: serde_json::Value::Null,
            });
        }
        let baseline = calculate_intensity_change("anger", 60.0, &ctx(&empty));
        let habituated = calculate_intensity_change("anger", 60.0, &ctx(&recent));
        assert!(habituated < baseline);
    }
}
