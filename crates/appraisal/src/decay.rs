//! Decay Engine (C8): a pure function over the active emotion map
//! (spec.md §4.8). No IO, no clock reads — the caller supplies
//! `elapsed_minutes` and persists the result.

use std::collections::HashMap;

use chrono::Utc;
use rl_store::types::EmotionInstance;

use crate::profile::{profile_for, removal_threshold};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    /// Small, named modulation rather than a continuous function: late
    /// night and early morning emotions fade slower (less corrective
    /// social feedback available).
    fn decay_multiplier(self) -> f64 {
        match self {
            TimeOfDay::Morning => 1.05,
            TimeOfDay::Afternoon => 1.1,
            TimeOfDay::Evening => 1.0,
            TimeOfDay::Night => 0.85,
        }
    }
}

/// Inputs to `apply_decay` that are not themselves part of the emotion
/// state (spec.md §4.8 step 3).
#[derive(Debug, Clone, Copy)]
pub struct DecayContext {
    pub is_user_present: bool,
    pub is_user_engaged: bool,
    /// [0,1]; how much stimulus has landed recently (amplifies decay —
    /// an active context "processes through" emotions faster).
    pub recent_emotional_activity: f64,
    /// [-1,1]; positive values worsen negative emotions' persistence and
    /// ease positive ones, and vice versa for negative values.
    pub environmental_stress: f64,
    /// [0,1]; supportive context eases negative emotions faster and
    /// preserves positive ones.
    pub social_support: f64,
    pub time_of_day: TimeOfDay,
    /// [0,1]; higher values dampen decay-rate swings (a stable
    /// personality decays more predictably).
    pub personality_stability: f64,
}

const MIN_DECAY_RATE: f64 = 0.001;

fn adjusted_decay_rate(
    base_rate: f64,
    social_relevance: f64,
    valence_sign: f64,
    ctx: &DecayContext,
) -> f64 {
    let mut rate = base_rate;
    if ctx.is_user_present {
        rate *= 1.0 + 0.3 * social_relevance;
    }
    if ctx.is_user_engaged {
        rate *= 1.1;
    }
    rate *= 1.0 + 0.25 * ctx.recent_emotional_activity.clamp(0.0, 1.0);
    rate *= 1.0 + 0.2 * (ctx.environmental_stress.clamp(-1.0, 1.0) * valence_sign);
    rate *= 1.0 - 0.2 * (ctx.social_support.clamp(0.0, 1.0) * valence_sign);
    rate *= ctx.time_of_day.decay_multiplier();
    rate *= 0.5 + 0.5 * ctx.personality_stability.clamp(0.0, 1.0);
    rate.max(MIN_DECAY_RATE)
}

/// Contextual rebound/persistence beyond the resilience-adjusted value
/// (spec.md §4.8 step 6). Operates on the already resilience-protected
/// `new_intensity`, never increasing it past the pre-decay `intensity`.
fn apply_contextual_modifiers(
    intensity: f64,
    new_intensity: f64,
    profile_sticky: bool,
    ctx: &DecayContext,
) -> f64 {
    let mut value = new_intensity;
    let high_arousal = intensity >= 70.0;
    if high_arousal && ctx.recent_emotional_activity > 0.6 {
        // Rebound: a still-active context keeps a strong emotion from
        // fading as fast as the base curve would suggest.
        value += (intensity - new_intensity) * 0.15;
    }
    if profile_sticky && (ctx.social_support > 0.5 || ctx.environmental_stress.abs() > 0.5) {
        value += (intensity - new_intensity) * 0.1;
    }
    value.min(intensity)
}

/// Applies one decay step to every entry in `active_map`. Returns the new
/// map and `total_activity`, the sum of per-emotion intensity lost (spec.md
/// §4.8: "if > 0, the caller persists state").
pub fn apply_decay(
    active_map: &HashMap<String, EmotionInstance>,
    elapsed_minutes: f64,
    ctx: &DecayContext,
) -> (HashMap<String, EmotionInstance>, f64) {
    let mut new_map = HashMap::with_capacity(active_map.len());
    let mut total_activity = 0.0;
    let now = Utc::now();

    for (emotion_type, instance) in active_map {
        if emotion_type == "neutral" {
            total_activity += instance.intensity;
            continue;
        }
        let profile = profile_for(emotion_type);
        if elapsed_minutes < profile.minimum_persistence {
            new_map.insert(emotion_type.clone(), instance.clone());
            continue;
        }

        let intensity = instance.intensity;
        let rate = adjusted_decay_rate(
            profile.base_decay_rate,
            profile.social_relevance,
            profile.valence_sign,
            ctx,
        );
        let base_decay_factor = (-rate * elapsed_minutes).exp();
        let intermediate = intensity * base_decay_factor;

        let resilience = (intensity / 100.0).max(0.0).sqrt() * profile.resilience;
        let mut new_intensity = intensity - (intensity - intermediate) * (1.0 - resilience);

        new_intensity =
            apply_contextual_modifiers(intensity, new_intensity, profile.sticky, ctx);
        new_intensity = new_intensity.clamp(0.0, 100.0);

        let threshold = removal_threshold(profile.persistence_class, ctx.personality_stability);
        total_activity += intensity - new_intensity;

        if new_intensity < threshold {
            continue;
        }
        new_map.insert(
            emotion_type.clone(),
            EmotionInstance {
                emotion_type: emotion_type.clone(),
                intensity: new_intensity,
                last_updated: now,
            },
        );
    }

    (new_map, total_activity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ctx() -> DecayContext {
        DecayContext {
            is_user_present: true,
            is_user_engaged: false,
            recent_emotional_activity: 0.2,
            environmental_stress: 0.0,
            social_support: 0.3,
            time_of_day: TimeOfDay::Afternoon,
            personality_stability: 0.5,
        }
    }

    fn instance(emotion_type: &str, intensity: f64) -> EmotionInstance {
        EmotionInstance {
            emotion_type: emotion_type.to_string(),
            intensity,
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn neutral_is_always_removed() {
        let mut map = HashMap::new();
        map.insert("neutral".to_string(), instance("neutral", 50.0));
        let (new_map, activity) = apply_decay(&map, 10.0, &ctx());
        assert!(new_map.is_empty());
        assert_eq!(activity, 50.0);
    }

    #[test]
    fn zero_elapsed_is_a_no_op() {
        let mut map = HashMap::new();
        map.insert("joy".to_string(), instance("joy", 80.0));
        let (new_map, activity) = apply_decay(&map, 0.0, &ctx());
        assert_eq!(activity, 0.0);
        assert_eq!(new_map.get("joy").unwrap().intensity, 80.0);
    }

    #[test]
    fn below_minimum_persistence_is_unchanged() {
        let mut map = HashMap::new();
        // "love" has a 10 minute minimum_persistence.
        map.insert("love".to_string(), instance("love", 60.0));
        let (new_map, activity) = apply_decay(&map, 5.0, &ctx());
        assert_eq!(activity, 0.0);
        assert_eq!(new_map.get("love").unwrap().intensity, 60.0);
    }

    #[test]
    fn long_elapsed_time_decays_and_may_remove() {
        let mut map = HashMap::new();
        map.insert("joy".to_string(), instance("joy", 5.0));
        let (new_map, activity) = apply_decay(&map, 600.0, &ctx());
        assert!(activity > 0.0);
        assert!(!new_map.contains_key("joy"));
    }

    #[test]
    fn intensity_never_leaves_the_0_to_100_range() {
        let mut map = HashMap::new();
        map.insert("anger".to_string(), instance("anger", 100.0));
        let (new_map, _) = apply_decay(&map, 120.0, &ctx());
        if let Some(e) = new_map.get("anger") {
            assert!(e.intensity >= 0.0 && e.intensity <= 100.0);
        }
    }
}
