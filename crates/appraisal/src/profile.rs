//! Per-emotion-type characteristics and the OCC goals/standards/attitudes
//! profile (spec.md §4.7, §4.8). Ad-hoc numerics by design (spec.md §8);
//! kept in one table so the decay math stays replaceable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How aggressively a removed-below-threshold emotion should be allowed to
/// linger (spec.md §4.8 step 7 "persistence class").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceClass {
    Low,
    Medium,
    High,
}

impl PersistenceClass {
    fn base_removal_threshold(self) -> f64 {
        match self {
            PersistenceClass::Low => 2.0,
            PersistenceClass::Medium => 1.2,
            PersistenceClass::High => 0.6,
        }
    }
}

/// Static characteristics of one OCC emotion type.
#[derive(Debug, Clone, Copy)]
pub struct EmotionProfile {
    /// Per-minute exponential decay rate before modulation.
    pub base_decay_rate: f64,
    /// Minutes below which the emotion is left untouched (spec.md §4.8
    /// step 2).
    pub minimum_persistence: f64,
    /// [0,1]; higher resists decay toward the intermediate value (step 5).
    pub resilience: f64,
    /// [0,1]; how much presence of another person matters to this type.
    pub social_relevance: f64,
    /// +1.0 for positive-valence types, -1.0 for negative.
    pub valence_sign: f64,
    /// Sticky types get extra persistence under supportive/stressful
    /// contexts (step 6).
    pub sticky: bool,
    pub persistence_class: PersistenceClass,
}

const DEFAULT_PROFILE: EmotionProfile = EmotionProfile {
    base_decay_rate: 0.02,
    minimum_persistence: 2.0,
    resilience: 0.2,
    social_relevance: 0.3,
    valence_sign: 1.0,
    sticky: false,
    persistence_class: PersistenceClass::Medium,
};

/// Looks up the characteristics for `emotion_type`, falling back to a
/// generic medium-persistence profile for types not named in this table
/// (the OCC vocabulary is open-ended; callers may introduce new ones).
pub fn profile_for(emotion_type: &str) -> EmotionProfile {
    match emotion_type {
        "joy" => EmotionProfile {
            base_decay_rate: 0.03,
            minimum_persistence: 1.0,
            resilience: 0.15,
            social_relevance: 0.6,
            valence_sign: 1.0,
            sticky: false,
            persistence_class: PersistenceClass::Low,
        },
        "distress" => EmotionProfile {
            base_decay_rate: 0.015,
            minimum_persistence: 3.0,
            resilience: 0.35,
            social_relevance: 0.5,
            valence_sign: -1.0,
            sticky: true,
            persistence_class: PersistenceClass::High,
        },
        "hope" => EmotionProfile {
            base_decay_rate: 0.025,
            minimum_persistence: 2.0,
            resilience: 0.2,
            social_relevance: 0.4,
            valence_sign: 1.0,
            sticky: false,
            persistence_class: PersistenceClass::Medium,
        },
        "fear" => EmotionProfile {
            base_decay_rate: 0.02,
            minimum_persistence: 1.0,
            resilience: 0.4,
            social_relevance: 0.3,
            valence_sign: -1.0,
            sticky: true,
            persistence_class: PersistenceClass::High,
        },
        "satisfaction" => EmotionProfile {
            base_decay_rate: 0.03,
            minimum_persistence: 2.0,
            resilience: 0.15,
            social_relevance: 0.3,
            valence_sign: 1.0,
            sticky: false,
            persistence_class: PersistenceClass::Low,
        },
        "relief" => EmotionProfile {
            base_decay_rate: 0.04,
            minimum_persistence: 0.5,
            resilience: 0.1,
            social_relevance: 0.2,
            valence_sign: 1.0,
            sticky: false,
            persistence_class: PersistenceClass::Low,
        },
        "disappointment" => EmotionProfile {
            base_decay_rate: 0.02,
            minimum_persistence: 2.0,
            resilience: 0.25,
            social_relevance: 0.4,
            valence_sign: -1.0,
            sticky: false,
            persistence_class: PersistenceClass::Medium,
        },
        "pride" => EmotionProfile {
            base_decay_rate: 0.018,
            minimum_persistence: 3.0,
            resilience: 0.3,
            social_relevance: 0.7,
            valence_sign: 1.0,
            sticky: false,
            persistence_class: PersistenceClass::Medium,
        },
        "shame" => EmotionProfile {
            base_decay_rate: 0.012,
            minimum_persistence: 4.0,
            resilience: 0.4,
            social_relevance: 0.8,
            valence_sign: -1.0,
            sticky: true,
            persistence_class: PersistenceClass::High,
        },
        "admiration" => EmotionProfile {
            base_decay_rate: 0.025,
            minimum_persistence: 2.0,
            resilience: 0.2,
            social_relevance: 0.8,
            valence_sign: 1.0,
            sticky: false,
            persistence_class: PersistenceClass::Medium,
        },
        "reproach" => EmotionProfile {
            base_decay_rate: 0.018,
            minimum_persistence: 3.0,
            resilience: 0.3,
            social_relevance: 0.8,
            valence_sign: -1.0,
            sticky: false,
            persistence_class: PersistenceClass::Medium,
        },
        "gratitude" => EmotionProfile {
            base_decay_rate: 0.02,
            minimum_persistence: 2.0,
            resilience: 0.2,
            social_relevance: 0.9,
            valence_sign: 1.0,
            sticky: false,
            persistence_class: PersistenceClass::Medium,
        },
        "anger" => EmotionProfile {
            base_decay_rate: 0.025,
            minimum_persistence: 1.0,
            resilience: 0.3,
            social_relevance: 0.6,
            valence_sign: -1.0,
            sticky: true,
            persistence_class: PersistenceClass::High,
        },
        "gratification" => EmotionProfile {
            base_decay_rate: 0.03,
            minimum_persistence: 1.0,
            resilience: 0.15,
            social_relevance: 0.3,
            valence_sign: 1.0,
            sticky: false,
            persistence_class: PersistenceClass::Low,
        },
        "remorse" => EmotionProfile {
            base_decay_rate: 0.012,
            minimum_persistence: 4.0,
            resilience: 0.4,
            social_relevance: 0.6,
            valence_sign: -1.0,
            sticky: true,
            persistence_class: PersistenceClass::High,
        },
        "love" => EmotionProfile {
            base_decay_rate: 0.008,
            minimum_persistence: 10.0,
            resilience: 0.5,
            social_relevance: 0.9,
            valence_sign: 1.0,
            sticky: true,
            persistence_class: PersistenceClass::High,
        },
        "hate" => EmotionProfile {
            base_decay_rate: 0.01,
            minimum_persistence: 8.0,
            resilience: 0.45,
            social_relevance: 0.7,
            valence_sign: -1.0,
            sticky: true,
            persistence_class: PersistenceClass::High,
        },
        _ => DEFAULT_PROFILE,
    }
}

/// Computed removal threshold for an emotion about to be dropped below
/// viability (spec.md §4.8 step 7). More stable personalities hang on to
/// fading emotions slightly longer before full removal.
pub fn removal_threshold(class: PersistenceClass, personality_stability: f64) -> f64 {
    let stability = personality_stability.clamp(0.0, 1.0);
    (class.base_removal_threshold() * (1.0 + stability * 0.5)).max(1.0)
}

/// User-specific goals/standards/attitudes that bias appraisal (spec.md
/// §4.7, GLOSSARY "OCC profile"). Free-form key/value so callers can shape
/// it per deployment without a schema migration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OccProfile {
    /// Named goals and their importance, e.g. `"helpfulness" -> 0.9`.
    #[serde(default)]
    pub goals: HashMap<String, f64>,
    /// Standards of conduct the subject holds itself and others to.
    #[serde(default)]
    pub standards: HashMap<String, f64>,
    /// Attitudes toward objects/agents/concepts (liking), e.g.
    /// `"the_user" -> 0.8`.
    #[serde(default)]
    pub attitudes: HashMap<String, f64>,
    /// How resistant this personality is to emotional swings, in [0,1].
    /// Feeds both decay modulation and the removal threshold.
    #[serde(default = "default_stability")]
    pub personality_stability: f64,
}

fn default_stability() -> f64 {
    0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_falls_back_to_default() {
        let p = profile_for("schadenfreude");
        assert_eq!(p.base_decay_rate, DEFAULT_PROFILE.base_decay_rate);
    }

    #[test]
    fn removal_threshold_never_below_one() {
        assert!(removal_threshold(PersistenceClass::High, 0.0) >= 1.0);
        assert!(removal_threshold(PersistenceClass::Low, 1.0) >= 1.0);
    }

    #[test]
    fn more_stable_personalities_linger_longer() {
        let low = removal_threshold(PersistenceClass::Medium, 0.0);
        let high = removal_threshold(PersistenceClass::Medium, 1.0);
        assert!(high > low);
    }
}
